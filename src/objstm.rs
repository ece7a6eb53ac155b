//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream starts with `/N` pairs of integers (object number,
//! offset relative to `/First`), followed by the objects themselves:
//!
//! ```text
//! 10 0 11 15        % obj 10 at First+0, obj 11 at First+15
//! << /Type /Page >> [0 0 612 792]
//! ```
//!
//! Cross-reference entries of type 2 point into these streams by index.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;

/// A decoded object stream ready for lookups by index.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    entries: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// Decode an object stream and read its offset table.
    pub fn parse(stream: &Object) -> Result<Self> {
        let dict = match stream {
            Object::Stream { dict, .. } => dict,
            other => {
                return Err(Error::malformed(format!(
                    "object stream is a {}, not a stream",
                    other.type_name()
                )))
            },
        };
        if let Some(kind) = dict.get("Type").and_then(Object::as_name) {
            if kind != "ObjStm" {
                return Err(Error::malformed(format!("expected /Type /ObjStm, got /{}", kind)));
            }
        }

        let n = dict
            .get("N")
            .and_then(Object::as_integer)
            .filter(|n| (0..=1_000_000).contains(n))
            .ok_or_else(|| Error::malformed("object stream without a valid /N"))? as usize;
        let first = dict
            .get("First")
            .and_then(Object::as_integer)
            .filter(|f| *f >= 0)
            .ok_or_else(|| Error::malformed("object stream without a valid /First"))? as usize;

        let data = stream.decode_stream_data()?;
        if data.len() < first {
            return Err(Error::malformed(format!(
                "object stream holds {} bytes but /First is {}",
                data.len(),
                first
            )));
        }

        let mut entries = Vec::with_capacity(n);
        let mut rest = &data[..first];
        for i in 0..n {
            let pair = token(rest).and_then(|(r, a)| token(r).map(|(r, b)| (r, a, b)));
            match pair {
                Ok((r, Token::Integer(id), Token::Integer(offset))) if id >= 0 && offset >= 0 => {
                    entries.push((id as u32, offset as usize));
                    rest = r;
                },
                _ => {
                    return Err(Error::malformed(format!("object stream pair {} is not two integers", i)))
                },
            }
        }

        Ok(Self { data, first, entries })
    }

    /// Number of objects in the stream.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the stream holds no objects.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object at position `index`, checking that it carries number `id`.
    pub fn get(&self, index: usize, id: u32) -> Result<Object> {
        let (stored_id, offset) = match self.entries.get(index) {
            Some(&entry) => entry,
            // Some writers get the index wrong; fall back to a search by number
            None => self
                .entries
                .iter()
                .copied()
                .find(|(n, _)| *n == id)
                .ok_or_else(|| Error::malformed(format!("object {} not in object stream", id)))?,
        };
        if stored_id != id {
            if let Some(&(_, offset)) = self.entries.iter().find(|(n, _)| *n == id) {
                return self.parse_at(id, offset);
            }
            return Err(Error::malformed(format!(
                "object stream slot {} holds object {}, not {}",
                index, stored_id, id
            )));
        }
        self.parse_at(id, offset)
    }

    fn parse_at(&self, id: u32, offset: usize) -> Result<Object> {
        let start = self.first + offset;
        if start >= self.data.len() {
            return Err(Error::malformed(format!("object {} lies beyond its object stream", id)));
        }
        parse_object(&self.data[start..])
            .map(|(_, obj)| obj)
            .map_err(|e| Error::malformed(format!("object {} in object stream: {:?}", id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;
    use bytes::Bytes;

    fn object_stream(header: &[u8], body: &[u8], n: i64) -> Object {
        let mut data = header.to_vec();
        data.extend_from_slice(body);
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(header.len() as i64));
        Object::Stream {
            dict,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_lookup_by_index() {
        let stream = object_stream(b"10 0 11 3 ", b"42 /Test", 2);
        let objstm = ObjectStream::parse(&stream).unwrap();
        assert_eq!(objstm.len(), 2);
        assert_eq!(objstm.get(0, 10).unwrap().as_integer(), Some(42));
        assert_eq!(objstm.get(1, 11).unwrap().as_name(), Some("Test"));
    }

    #[test]
    fn test_wrong_index_falls_back_to_number() {
        let stream = object_stream(b"10 0 11 3 ", b"42 /Test", 2);
        let objstm = ObjectStream::parse(&stream).unwrap();
        assert_eq!(objstm.get(0, 11).unwrap().as_name(), Some("Test"));
        assert!(objstm.get(5, 99).is_err());
    }

    #[test]
    fn test_missing_n_is_malformed() {
        let mut stream = object_stream(b"1 0 ", b"42", 1);
        if let Object::Stream { dict, .. } = &mut stream {
            dict.remove("N");
        }
        assert!(matches!(ObjectStream::parse(&stream), Err(Error::MalformedDocument { .. })));
    }

    #[test]
    fn test_not_a_stream() {
        assert!(ObjectStream::parse(&Object::Integer(1)).is_err());
    }
}
