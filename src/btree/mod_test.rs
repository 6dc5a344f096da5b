use super::*;

use tempfile::tempdir;

fn key(n: u32) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

fn doc_id_for(n: u32) -> String {
    format!("{:032x}", n)
}

#[test]
fn test_insert_get_roundtrip() {
    for capacity in [4usize, 5] {
        let dir = tempdir().unwrap();
        let path = dir.path().join(format!("x{}.btree", capacity));
        let mut idx = BtreeIndex::create(&path, 4, capacity, true).unwrap();

        for i in 0..100u32 {
            idx.insert(&key(i), &doc_id_for(i), "00000001", Handle { offset: i as u64, length: 1 })
                .unwrap();
        }
        for i in 0..100u32 {
            let got = idx.get(&key(i)).unwrap().unwrap();
            assert_eq!(got.doc_id, doc_id_for(i));
            assert_eq!(got.handle.offset, i as u64);
        }
    }
}

#[test]
fn test_range_scan_inclusive_bounds() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("r.btree");
    let mut idx = BtreeIndex::create(&path, 4, 4, true).unwrap();

    for i in 0..100u32 {
        idx.insert(&key(i), &doc_id_for(i), "00000001", Handle { offset: i as u64, length: 1 })
            .unwrap();
    }

    let got = idx.get_many(Some(&key(10)), true, Some(&key(30)), true, 0, -1).unwrap();
    assert_eq!(got.len(), 21);
    assert_eq!(got.first().unwrap().key, key(10));
    assert_eq!(got.last().unwrap().key, key(30));

    // monotonic, non-decreasing
    for w in got.windows(2) {
        assert!(w[0].key <= w[1].key);
    }

    let got_excl = idx.get_many(Some(&key(10)), true, Some(&key(30)), false, 0, -1).unwrap();
    assert_eq!(got_excl.len(), 20);
    assert!(!got_excl.iter().any(|e| e.key == key(30)));
}

#[test]
fn test_delete_triggers_merge_and_borrow() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.btree");
    let mut idx = BtreeIndex::create(&path, 4, 4, true).unwrap();

    for i in 0..50u32 {
        idx.insert(&key(i), &doc_id_for(i), "00000001", Handle { offset: i as u64, length: 1 })
            .unwrap();
    }
    for i in 0..45u32 {
        idx.delete(&key(i), &doc_id_for(i)).unwrap();
    }
    assert_eq!(idx.len().unwrap(), 5);
    for i in 45..50u32 {
        assert!(idx.get(&key(i)).unwrap().is_some());
    }
}

#[test]
fn test_non_unique_duplicate_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nu.btree");
    let mut idx = BtreeIndex::create(&path, 4, 4, false).unwrap();

    for i in 0..20u32 {
        idx.insert(&1u32.to_be_bytes(), &doc_id_for(i), "00000001", Handle { offset: i as u64, length: 1 })
            .unwrap();
    }
    let all = idx.get_many(Some(&1u32.to_be_bytes()), true, Some(&1u32.to_be_bytes()), true, 0, -1)
        .unwrap();
    assert_eq!(all.len(), 20);

    idx.delete(&1u32.to_be_bytes(), &doc_id_for(7)).unwrap();
    let all = idx.get_many(Some(&1u32.to_be_bytes()), true, Some(&1u32.to_be_bytes()), true, 0, -1)
        .unwrap();
    assert_eq!(all.len(), 19);
    assert!(!all.iter().any(|e| e.doc_id == doc_id_for(7)));
}

#[test]
fn test_compact_preserves_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.btree");
    let mut idx = BtreeIndex::create(&path, 4, 5, true).unwrap();

    for i in 0..60u32 {
        idx.insert(&key(i), &doc_id_for(i), "00000001", Handle { offset: i as u64, length: 1 })
            .unwrap();
    }
    for i in (0..60u32).step_by(3) {
        idx.delete(&key(i), &doc_id_for(i)).unwrap();
    }
    idx.compact().unwrap();
    idx.compact().unwrap(); // idempotent

    let remaining: Vec<_> = (0..60u32).filter(|i| i % 3 != 0).collect();
    assert_eq!(idx.len().unwrap(), remaining.len());
    for i in remaining {
        assert!(idx.get(&key(i)).unwrap().is_some());
    }
}
