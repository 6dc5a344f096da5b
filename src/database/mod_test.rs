use super::*;

use tempfile::tempdir;

use crate::registry::IndexDef;
use crate::Value;

const BY_A_DEF: &str = r#"
[properties]
name = by_a
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

const BY_X_DEF: &str = r#"
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
fn test_insert_get_update_delete_roundtrip() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();

    let mut doc = Document::new();
    doc.set("name", "ada");
    let inserted = db.insert(doc).unwrap();
    let id = inserted.id().unwrap().to_string();

    let (entry, got) = db.get("id", &doc_id_to_bytes(&id).unwrap(), true).unwrap();
    assert_eq!(entry.doc_id, id);
    assert_eq!(got.unwrap().get("name"), Some(&Value::from("ada")));

    let mut to_update = inserted.clone();
    to_update.set("name", "lovelace");
    let updated = db.update(to_update).unwrap();
    assert_ne!(updated.rev(), inserted.rev());

    let (_, got) = db.get("id", &doc_id_to_bytes(&id).unwrap(), true).unwrap();
    assert_eq!(got.unwrap().get("name"), Some(&Value::from("lovelace")));

    let deleted = db.delete(updated).unwrap();
    assert!(deleted);

    let err = db.get("id", &doc_id_to_bytes(&id).unwrap(), false).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_duplicate_id_rejected() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();

    let mut doc = Document::new();
    doc.set_id("11112222333344445555666677778888");
    doc.set("name", "first");
    db.insert(doc).unwrap();

    let mut dup = Document::new();
    dup.set_id("11112222333344445555666677778888");
    dup.set("name", "second");
    let err = db.insert(dup).unwrap_err();
    assert!(matches!(err, Error::IndexError(_)));
}

#[test]
fn test_update_rev_conflict() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();

    let mut doc = Document::new();
    doc.set("name", "ada");
    let inserted = db.insert(doc).unwrap();

    let mut stale = inserted.clone();
    stale.set_rev("deadbeef");
    let err = db.update(stale).unwrap_err();
    assert!(matches!(err, Error::RevConflict(_)));
}

#[test]
fn test_delete_twice_reports_record_deleted() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();

    let mut doc = Document::new();
    doc.set("name", "ada");
    let inserted = db.insert(doc).unwrap();

    assert!(db.delete(inserted.clone()).unwrap());

    let err = db.delete(inserted).unwrap_err();
    assert!(matches!(err, Error::RecordDeleted(_)));
}

#[test]
fn test_secondary_hash_index_lookup() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();
    let def = IndexDef::parse(BY_A_DEF).unwrap();
    let source = "fn make_key_value(doc) {\n    let a = doc.a\n    if a == null {\n        return null\n    }\n    return tostr(a)\n}\nfn make_key(key) {\n    return tostr(key)\n}\n";
    db.add_index(def, source, true).unwrap();

    let mut doc = Document::new();
    doc.set("a", "hello");
    db.insert(doc).unwrap();

    let key = db.key_for("by_a", &Value::from("hello")).unwrap();
    let results = db.get_many("by_a", Query::Key(&key), -1, 0, true).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1.as_ref().unwrap().get("a"), Some(&Value::from("hello")));
}

#[test]
fn test_btree_index_range_query() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();
    let def = IndexDef::parse(BY_X_DEF).unwrap();
    let source = "fn make_key_value(doc) {\n    return doc.x\n}\nfn make_key(key) {\n    return key\n}\n";
    db.add_index(def, source, true).unwrap();

    for x in 0..10i64 {
        let mut doc = Document::new();
        doc.set("x", x);
        db.insert(doc).unwrap();
    }

    let start = db.key_for("by_x", &Value::from(3i64)).unwrap();
    let end = db.key_for("by_x", &Value::from(6i64)).unwrap();
    let query = Query::Range {
        start: Some(&start),
        inclusive_start: true,
        end: Some(&end),
        inclusive_end: true,
    };
    let results = db.get_many("by_x", query, -1, 0, false).unwrap();
    assert_eq!(results.len(), 4);
}

#[test]
fn test_write_through_unreindexed_index_fails() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();
    let def = IndexDef::parse(BY_A_DEF).unwrap();
    let source = "fn make_key_value(doc) {\n    return null\n}\nfn make_key(key) {\n    return key\n}\n";
    db.add_index(def, source, false).unwrap();

    let mut doc = Document::new();
    doc.set("a", "hello");
    let err = db.insert(doc).unwrap_err();
    assert!(matches!(err, Error::TryReindex(_)));

    db.reindex_index("by_a").unwrap();

    let mut doc = Document::new();
    doc.set("a", "world");
    db.insert(doc).unwrap();
}

#[test]
fn test_compact_preserves_live_documents() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();

    let mut ids = vec![];
    for i in 0..10 {
        let mut doc = Document::new();
        doc.set("n", i as i64);
        let inserted = db.insert(doc).unwrap();
        ids.push(inserted);
    }
    for doc in ids.iter().step_by(2).cloned() {
        db.delete(doc).unwrap();
    }

    db.compact().unwrap();

    for (i, doc) in ids.iter().enumerate() {
        let id = doc.id().unwrap();
        let result = db.get("id", &doc_id_to_bytes(id).unwrap(), true);
        if i % 2 == 0 {
            assert!(result.is_err());
        } else {
            let (_, got) = result.unwrap();
            assert_eq!(got.unwrap().get("n"), Some(&Value::from(i as i64)));
        }
    }
}

#[test]
fn test_destroy_index_removes_registration() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path()).unwrap();
    let def = IndexDef::parse(BY_A_DEF).unwrap();
    let source = "fn make_key_value(doc) {\n    return null\n}\nfn make_key(key) {\n    return key\n}\n";
    db.add_index(def, source, true).unwrap();
    db.destroy_index("by_a").unwrap();

    let err = db.count_all("by_a").unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[test]
fn test_reopen_reloads_secondary_indexes() {
    let dir = tempdir().unwrap();
    {
        let mut db = Database::create(dir.path()).unwrap();
        let def = IndexDef::parse(BY_A_DEF).unwrap();
        let source = "fn make_key_value(doc) {\n    let a = doc.a\n    if a == null {\n        return null\n    }\n    return tostr(a)\n}\nfn make_key(key) {\n    return tostr(key)\n}\n";
        db.add_index(def, source, true).unwrap();

        let mut doc = Document::new();
        doc.set("a", "hello");
        db.insert(doc).unwrap();
        db.close().unwrap();
    }

    let mut db = Database::open(dir.path()).unwrap();
    let key = db.key_for("by_a", &Value::from("hello")).unwrap();
    let results = db.get_many("by_a", Query::Key(&key), -1, 0, false).unwrap();
    assert_eq!(results.len(), 1);
}
