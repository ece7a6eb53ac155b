//! Tests for object stream parsing (PDF 1.5+ feature).

use bytes::Bytes;
use pdf_seal::object::{Object, ObjectRef};
use pdf_seal::objstm::ObjectStream;
use std::collections::HashMap;

/// Helper to create a test object stream.
///
/// This creates an uncompressed object stream for testing.
/// In real PDFs, these are usually FlateDecode compressed.
fn create_test_object_stream(n: i64, first: i64, data: &[u8]) -> Object {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
    dict.insert("N".to_string(), Object::Integer(n));
    dict.insert("First".to_string(), Object::Integer(first));
    dict.insert("Length".to_string(), Object::Integer(data.len() as i64));

    Object::Stream {
        dict,
        data: Bytes::from(data.to_vec()),
    }
}

fn stream_of(pairs: &[u8], objects: &[u8], n: i64) -> ObjectStream {
    let mut data = Vec::new();
    data.extend_from_slice(pairs);
    data.extend_from_slice(objects);
    ObjectStream::parse(&create_test_object_stream(n, pairs.len() as i64, &data)).unwrap()
}

#[test]
fn test_parse_object_stream_basic() {
    // Object 10: integer 42, object 11: name /Test
    let stream = stream_of(b"10 0 11 3 ", b"42 /Test", 2);

    assert_eq!(stream.len(), 2);
    assert_eq!(stream.get(0, 10).unwrap().as_integer(), Some(42));
    assert_eq!(stream.get(1, 11).unwrap().as_name(), Some("Test"));
}

#[test]
fn test_parse_object_stream_multiple_objects() {
    let stream = stream_of(b"10 0 11 2 12 7 13 13 ", b"1 true false null", 4);

    assert_eq!(stream.len(), 4);
    assert_eq!(stream.get(0, 10).unwrap().as_integer(), Some(1));
    assert_eq!(stream.get(1, 11).unwrap(), Object::Boolean(true));
    assert_eq!(stream.get(2, 12).unwrap(), Object::Boolean(false));
    assert_eq!(stream.get(3, 13).unwrap(), Object::Null);
}

#[test]
fn test_parse_object_stream_signature_field() {
    // Signed files written by other tools often pack form fields into object streams
    let stream = stream_of(
        b"20 0 21 48 ",
        b"<< /FT /Sig /T (Signature1) /V 21 0 R /F 132 >> << /Type /Sig /Filter /Adobe.PPKLite >>",
        2,
    );

    let field = stream.get(0, 20).unwrap();
    let field = field.as_dict().unwrap();
    assert_eq!(field.get("FT").unwrap().as_name(), Some("Sig"));
    assert_eq!(field.get("V").unwrap().as_reference(), Some(ObjectRef::new(21, 0)));

    let signature = stream.get(1, 21).unwrap();
    assert_eq!(signature.as_dict().unwrap().get("Type").unwrap().as_name(), Some("Sig"));
}

#[test]
fn test_parse_object_stream_wrong_index_falls_back_to_number() {
    let stream = stream_of(b"10 0 11 3 ", b"42 99", 2);
    assert_eq!(stream.get(1, 10).unwrap().as_integer(), Some(42));
    assert_eq!(stream.get(7, 11).unwrap().as_integer(), Some(99));
    assert!(stream.get(0, 12).is_err());
}

#[test]
fn test_parse_object_stream_not_stream() {
    let obj = Object::Integer(42);
    assert!(ObjectStream::parse(&obj).is_err());
}

#[test]
fn test_parse_object_stream_missing_n() {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
    dict.insert("First".to_string(), Object::Integer(5));

    let stream = Object::Stream {
        dict,
        data: Bytes::from(b"1 0 42".to_vec()),
    };
    assert!(ObjectStream::parse(&stream).is_err());
}

#[test]
fn test_parse_object_stream_missing_first() {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
    dict.insert("N".to_string(), Object::Integer(1));

    let stream = Object::Stream {
        dict,
        data: Bytes::from(b"1 0 42".to_vec()),
    };
    assert!(ObjectStream::parse(&stream).is_err());
}

#[test]
fn test_parse_object_stream_invalid_n() {
    let stream = create_test_object_stream(-1, 5, b"1 0 42");
    assert!(ObjectStream::parse(&stream).is_err());
}

#[test]
fn test_parse_object_stream_n_too_large() {
    let stream = create_test_object_stream(2_000_000, 5, b"1 0 42");
    assert!(ObjectStream::parse(&stream).is_err());
}

#[test]
fn test_parse_object_stream_first_beyond_data() {
    let stream = create_test_object_stream(1, 1000, b"1 0 42");
    assert!(ObjectStream::parse(&stream).is_err());
}

#[test]
fn test_parse_object_stream_strings() {
    let stream = stream_of(b"30 0 31 13 ", b"(Hello World) <48656C6C6F>", 2);

    assert_eq!(stream.get(0, 30).unwrap().as_string(), Some(&b"Hello World"[..]));
    assert_eq!(stream.get(1, 31).unwrap().as_string(), Some(&b"Hello"[..]));
}

#[test]
fn test_parse_object_stream_nested_structures() {
    let stream = stream_of(b"40 0 ", b"<< /Array [ 1 [ 2 3 ] ] /Dict << /Nested true >> >>", 1);

    let object = stream.get(0, 40).unwrap();
    let dict = object.as_dict().unwrap();
    assert_eq!(dict.get("Array").unwrap().as_array().unwrap().len(), 2);
    let nested = dict.get("Dict").unwrap().as_dict().unwrap();
    assert_eq!(nested.get("Nested"), Some(&Object::Boolean(true)));
}

#[test]
fn test_parse_object_stream_empty() {
    let stream = ObjectStream::parse(&create_test_object_stream(0, 0, b"")).unwrap();
    assert!(stream.is_empty());
}

#[test]
fn test_parse_object_stream_references() {
    let stream = stream_of(b"50 0 ", b"[ 10 0 R 20 0 R ]", 1);

    let object = stream.get(0, 50).unwrap();
    let array = object.as_array().unwrap();
    assert_eq!(array[0].as_reference(), Some(ObjectRef::new(10, 0)));
    assert_eq!(array[1].as_reference(), Some(ObjectRef::new(20, 0)));
}
