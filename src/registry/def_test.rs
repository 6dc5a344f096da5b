use super::*;

use crate::document::Document;

const HASH_DEF: &str = r#"
[properties]
name = with_a
type = hash
key_format = 16s
hash_lim = 1024
unique = false

[code]
fn make_key_value(doc) {
    let a = doc.a
    if a == null {
        return null
    }
    return tostr(a)
}

fn make_key(key) {
    return tostr(key)
}
"#;

#[test]
fn test_parse_hash_properties() {
    let def = IndexDef::parse(HASH_DEF).unwrap();
    assert_eq!(def.name, "with_a");
    assert_eq!(def.kind, IndexType::Hash);
    assert_eq!(def.key_format, KeyFormat::FixedBytes(16));
    assert_eq!(def.size_param, 1024);
    assert!(!def.unique);
}

#[test]
fn test_project_pads_and_truncates_to_key_format() {
    let def = IndexDef::parse(HASH_DEF).unwrap();

    let mut doc = Document::new();
    doc.set("a", "hi");
    let key = def.project(&doc).unwrap().unwrap();
    assert_eq!(key.len(), 16);
    assert_eq!(&key[..2], b"hi");
    assert!(key[2..].iter().all(|&b| b == 0));

    let doc = Document::new();
    assert!(def.project(&doc).unwrap().is_none());
}

const BTREE_DEF: &str = r#"
[properties]
name = by_x
type = btree
key_format = Q
node_capacity = 32

[code]
fn make_key_value(doc) {
    return doc.x
}

fn make_key(key) {
    return key
}
"#;

#[test]
fn test_parse_btree_properties_and_int_key_format() {
    let def = IndexDef::parse(BTREE_DEF).unwrap();
    assert_eq!(def.kind, IndexType::Btree);
    assert_eq!(def.key_format, KeyFormat::UInt64);
    assert_eq!(def.size_param, 32);

    let mut doc = Document::new();
    doc.set("x", 42i64);
    let key = def.project(&doc).unwrap().unwrap();
    assert_eq!(key, 42u64.to_be_bytes().to_vec());
}

#[test]
fn test_roundtrip_to_text_reparses() {
    let def = IndexDef::parse(HASH_DEF).unwrap();
    let source = "fn make_key_value(doc) {\n    return null\n}\nfn make_key(key) {\n    return key\n}\n";
    let text = def.to_text(source);
    let reparsed = IndexDef::parse(&text).unwrap();
    assert_eq!(reparsed.name, def.name);
    assert_eq!(reparsed.kind, def.kind);
    assert_eq!(reparsed.size_param, def.size_param);
}

#[test]
fn test_missing_property_is_precondition() {
    let bad = "[properties]\nname = oops\ntype = hash\n\n[code]\nfn make_key_value(doc) { return null }\nfn make_key(key) { return key }\n";
    let err = IndexDef::parse(bad).unwrap_err();
    assert!(matches!(err, crate::Error::Precondition(_)));
}

#[test]
fn test_unrecognized_key_format_is_precondition() {
    let bad = HASH_DEF.replace("key_format = 16s", "key_format = bogus");
    let err = IndexDef::parse(&bad).unwrap_err();
    assert!(matches!(err, crate::Error::Precondition(_)));
}
