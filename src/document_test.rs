use super::*;

#[test]
fn test_new_id_is_valid() {
    let id = new_id();
    assert_eq!(id.len(), 32);
    validate_id(&id).unwrap();
}

#[test]
fn test_new_rev_is_valid() {
    let rev = new_rev();
    assert_eq!(rev.len(), 8);
    validate_rev(&rev).unwrap();
}

#[test]
fn test_validate_id_rejects_bad_input() {
    assert!(validate_id("too-short").is_err());
    assert!(validate_id(&"F".repeat(32)).is_err());
    assert!(validate_id(&"g".repeat(32)).is_err());
}

#[test]
fn test_validate_rev_rejects_bad_input() {
    assert!(validate_rev("abc").is_err());
    assert!(validate_rev("ABCD1234").is_err());
}

#[test]
fn test_set_get_and_without_reserved() {
    let mut doc = Document::new();
    doc.set_id(&new_id());
    doc.set_rev(&new_rev());
    doc.set("name", "alice");

    assert!(doc.id().is_some());
    assert!(doc.rev().is_some());

    let stripped = doc.without_reserved();
    assert!(stripped.id().is_none());
    assert!(stripped.rev().is_none());
    assert_eq!(stripped.get("name").unwrap().as_str(), Some("alice"));
}

#[test]
fn test_remove() {
    let mut doc = Document::new();
    doc.set("a", 1i64);
    assert_eq!(doc.remove("a").unwrap().as_int(), Some(1));
    assert!(doc.get("a").is_none());
}
