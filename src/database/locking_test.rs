use super::*;

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use crate::document::Document;

#[test]
fn test_parallel_database_insert_and_get() {
    let dir = tempdir().unwrap();
    let db = ParallelDatabase::create(dir.path(), Config::new()).unwrap();

    let mut doc = Document::new();
    doc.set("name", "ada");
    let inserted = db.insert(doc).unwrap();
    let id = inserted.id().unwrap().to_string();

    let (_, got) = db.get("id", &crate::hash::entry::doc_id_to_bytes(&id).unwrap(), true).unwrap();
    assert_eq!(got.unwrap().get("name").and_then(|v| v.as_str()), Some("ada"));
}

#[test]
fn test_parallel_database_shared_across_threads() {
    let dir = tempdir().unwrap();
    let db = Arc::new(ParallelDatabase::create(dir.path(), Config::new()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut doc = Document::new();
                doc.set("n", i as i64);
                db.insert(doc).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(db.count_all("id").unwrap(), 8);
}

#[test]
fn test_cooperative_database_reentrant_run() {
    let dir = tempdir().unwrap();
    let db = CooperativeDatabase::create(dir.path(), Config::new()).unwrap();

    let mut doc = Document::new();
    doc.set("name", "ada");
    db.insert(doc).unwrap();

    // A method that re-enters the lock from the same thread must not
    // deadlock against itself.
    assert_eq!(db.count_all("id").unwrap(), 1);
    assert_eq!(db.count_all("id").unwrap(), 1);
}

#[test]
fn test_cooperative_database_shared_across_threads() {
    let dir = tempdir().unwrap();
    let db = Arc::new(CooperativeDatabase::create(dir.path(), Config::new()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut doc = Document::new();
                doc.set("n", i as i64);
                db.insert(doc).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(db.count_all("id").unwrap(), 8);
}

#[test]
fn test_reentrant_lock_allows_same_thread_relock() {
    let door = Reentrant::new(0i32);
    let outer = door.lock();
    {
        let inner = door.lock();
        assert_eq!(*inner, 0);
    }
    assert_eq!(*outer, 0);
}
