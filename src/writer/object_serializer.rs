//! PDF object serialization.
//!
//! Turns [`Object`] values back into PDF syntax for objects appended in an
//! incremental update.

use crate::object::{Dictionary, Object, ObjectRef};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Put every dictionary entry on its own line
    pretty: bool,
}

impl ObjectSerializer {
    /// Create a serializer producing single-line dictionaries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a serializer that writes one dictionary entry per line.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (for tests and logging).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, obj_ref: ObjectRef, obj: &Object) -> Vec<u8> {
        wrap_indirect(obj_ref, &self.serialize(obj))
    }

    /// Write an object into `buf`.
    pub fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(buf, *r),
            Object::String(s) => write_string(buf, s),
            Object::Name(n) => write_name(buf, n),
            Object::Array(arr) => {
                buf.push(b'[');
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    self.write_object(buf, item);
                }
                buf.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(buf, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(buf, &dict);
                buf.extend_from_slice(b"\nstream\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => buf.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_dictionary(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        buf.extend_from_slice(b"<<");
        // Sorted keys keep output deterministic
        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();
        for key in keys {
            buf.extend_from_slice(if self.pretty { b"\n  " } else { b" " });
            write_name(buf, key);
            buf.push(b' ');
            self.write_object(buf, &dict[key]);
        }
        buf.extend_from_slice(if self.pretty && !dict.is_empty() { b"\n>>" } else { b" >>" });
    }
}

/// Wrap an already-serialized body as `id gen obj ... endobj`.
pub fn wrap_indirect(obj_ref: ObjectRef, body: &[u8]) -> Vec<u8> {
    let mut buf = indirect_header(obj_ref).into_bytes();
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\nendobj\n");
    buf
}

/// The `id gen obj\n` line that opens an indirect object.
pub fn indirect_header(obj_ref: ObjectRef) -> String {
    format!("{} {} obj\n", obj_ref.id, obj_ref.gen)
}

fn write_real(buf: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 {
        buf.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        buf.extend_from_slice(trimmed.as_bytes());
    }
}

/// Literal `(...)` syntax for printable text, hex `<...>` otherwise.
fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    let printable = data.iter().all(|&b| matches!(b, b'\n' | b'\r' | b'\t' | 0x20..=0x7E));
    if printable {
        buf.push(b'(');
        for &byte in data {
            match byte {
                b'(' => buf.extend_from_slice(b"\\("),
                b')' => buf.extend_from_slice(b"\\)"),
                b'\\' => buf.extend_from_slice(b"\\\\"),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                _ => buf.push(byte),
            }
        }
        buf.push(b')');
    } else {
        buf.push(b'<');
        buf.extend_from_slice(hex::encode_upper(data).as_bytes());
        buf.push(b'>');
    }
}

fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!' | b'"' | b'$'..=b'&' | b'\''..=b'.' | b'0'..=b'9' | b';' | b'?' | b'@' | b'A'..=b'Z'
            | b'^'..=b'z' | b'|' | b'~' => buf.push(byte),
            _ => buf.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::name;
    use crate::parser::parse_object;

    #[test]
    fn test_serialize_scalars() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Boolean(true)), "true");
        assert_eq!(s.serialize_to_string(&Object::Integer(-123)), "-123");
        assert_eq!(s.serialize_to_string(&Object::Real(0.5)), "0.5");
        assert_eq!(s.serialize_to_string(&Object::Real(612.0)), "612");
    }

    #[test]
    fn test_serialize_strings() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::String(b"Test (parens)".to_vec())), "(Test \\(parens\\))");
        assert_eq!(s.serialize_to_string(&Object::String(vec![0xFE, 0xFF, 0x00, 0x41])), "<FEFF0041>");
    }

    #[test]
    fn test_serialize_name_escapes() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&name("Name With Space")), "/Name#20With#20Space");
        assert_eq!(s.serialize_to_string(&name("Adobe.PPKLite")), "/Adobe.PPKLite");
    }

    #[test]
    fn test_dictionary_is_sorted_and_reparses() {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), name("Annot"));
        dict.insert("Rect".to_string(), Object::Array(vec![Object::Integer(0); 4]));
        dict.insert("P".to_string(), Object::Reference(ObjectRef::new(3, 0)));
        let out = ObjectSerializer::new().serialize(&Object::Dictionary(dict.clone()));
        assert_eq!(out, b"<< /P 3 0 R /Rect [0 0 0 0] /Type /Annot >>".to_vec());
        let (_, back) = parse_object(&out).unwrap();
        assert_eq!(back, Object::Dictionary(dict));
    }

    #[test]
    fn test_stream_length_is_written() {
        let stream = Object::Stream {
            dict: Dictionary::new(),
            data: bytes::Bytes::from_static(b"abc"),
        };
        let out = ObjectSerializer::new().serialize_to_string(&stream);
        assert_eq!(out, "<< /Length 3 >>\nstream\nabc\nendstream");
    }

    #[test]
    fn test_serialize_indirect() {
        let bytes = ObjectSerializer::new().serialize_indirect(ObjectRef::new(7, 0), &Object::Integer(42));
        assert_eq!(bytes, b"7 0 obj\n42\nendobj\n".to_vec());
    }
}
