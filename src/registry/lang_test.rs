use super::*;

use crate::document::Document;

#[test]
fn test_md5_and_tostr() {
    let prog = parse(
        r#"
        fn make_key_value(doc) {
            return md5(tostr(doc.name))
        }
        fn make_key(key) {
            return md5(tostr(key))
        }
        "#,
    )
    .unwrap();

    let mut doc = Document::new();
    doc.set("name", "hello");
    let key = prog.eval_make_key_value(&doc).unwrap().unwrap().to_bytes();
    let expected = format!("{:x}", md5::compute(b"hello"));
    assert_eq!(String::from_utf8(key).unwrap(), expected);
}

#[test]
fn test_null_projection_skips_document() {
    let prog = parse(
        r#"
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
        "#,
    )
    .unwrap();

    let doc = Document::new();
    assert!(prog.eval_make_key_value(&doc).unwrap().is_none());
}

#[test]
fn test_conditional_bucketing() {
    // mirrors the "custom_hash_index" test>5 -> 1 else 0 bucketing
    let prog = parse(
        r#"
        fn make_key_value(doc) {
            let t = doc.test
            if t > 5 {
                return 1
            } else {
                return 0
            }
        }
        fn make_key(key) {
            return key
        }
        "#,
    )
    .unwrap();

    let mut doc = Document::new();
    doc.set("test", 6i64);
    let key = prog.eval_make_key_value(&doc).unwrap().unwrap().to_bytes();
    assert_eq!(key, 1i64.to_be_bytes().to_vec());

    let mut doc = Document::new();
    doc.set("test", 3i64);
    let key = prog.eval_make_key_value(&doc).unwrap().unwrap().to_bytes();
    assert_eq!(key, 0i64.to_be_bytes().to_vec());
}

#[test]
fn test_string_helpers() {
    let prog = parse(
        r#"
        fn make_key_value(doc) {
            return prefix(doc.name, 3)
        }
        fn make_key(key) {
            return suffix(key, 2)
        }
        "#,
    )
    .unwrap();

    let mut doc = Document::new();
    doc.set("name", "hello world");
    let key = prog.eval_make_key_value(&doc).unwrap().unwrap().to_bytes();
    assert_eq!(String::from_utf8(key).unwrap(), "hel");
}

#[test]
fn test_unknown_function_is_function_exception() {
    let err = parse(
        r#"
        fn make_key_value(doc) {
            return bogus(doc.a)
        }
        fn make_key(key) {
            return key
        }
        "#,
    )
    .unwrap()
    .eval_make_key_value(&Document::new())
    .unwrap_err();
    assert!(matches!(err, crate::Error::FunctionException(_)));
}
