use super::*;

use crate::value::Value;

#[test]
fn test_roundtrip_scalars() {
    let codec = BinCodec;
    let mut doc = Document::new();
    doc.set("name", "alice");
    doc.set("age", 42i64);
    doc.set("score", 3.5f64);
    doc.set("active", true);
    doc.set("nickname", Value::Null);

    let bytes = codec.encode(&doc).unwrap();
    let back = codec.decode(&bytes).unwrap();
    assert_eq!(doc, back);
}

#[test]
fn test_roundtrip_nested() {
    let codec = BinCodec;
    let mut doc = Document::new();
    doc.set(
        "tags",
        Value::List(vec![Value::from("a"), Value::from("b")]),
    );

    let mut nested = std::collections::BTreeMap::new();
    nested.insert("city".to_string(), Value::from("pune"));
    doc.set("address", Value::Map(nested));
    doc.set("avatar", Value::Bytes(vec![1, 2, 3, 4]));

    let bytes = codec.encode(&doc).unwrap();
    let back = codec.decode(&bytes).unwrap();
    assert_eq!(doc, back);
}

#[test]
fn test_empty_document() {
    let codec = BinCodec;
    let doc = Document::new();
    let bytes = codec.encode(&doc).unwrap();
    let back = codec.decode(&bytes).unwrap();
    assert_eq!(doc, back);
}

#[test]
fn test_decode_rejects_bad_version() {
    let codec = BinCodec;
    let err = codec.decode(&[9, 0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, crate::Error::DecodeFail(_)));
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let codec = BinCodec;
    let mut doc = Document::new();
    doc.set("k", "v");
    let mut bytes = codec.encode(&doc).unwrap();
    bytes.push(0xff);
    let err = codec.decode(&bytes).unwrap_err();
    assert!(matches!(err, crate::Error::DecodeFail(_)));
}
