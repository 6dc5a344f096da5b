use super::*;

use tempfile::tempdir;

use crate::store::{Handle, StorageFile};

fn h(offset: u64, length: u64) -> Handle {
    Handle { offset, length }
}

#[test]
fn test_insert_get_unique() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("id.hash");
    let mut idx = HashIndex::create(&path, 16, 17, true).unwrap();

    let doc_id = "54bee5c4628648b5a742379a1de89b2";
    idx.insert(&doc_id_to_bytes(doc_id).unwrap(), doc_id, "00000001", h(0, 10))
        .unwrap();

    let got = idx.get(&doc_id_to_bytes(doc_id).unwrap()).unwrap().unwrap();
    assert_eq!(entry::doc_id_from_bytes(&got.doc_id), doc_id);
    assert_eq!(got.handle, h(0, 10));
}

#[test]
fn test_unique_duplicate_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("id.hash");
    let mut idx = HashIndex::create(&path, 16, 17, true).unwrap();

    let doc_id = "54bee5c4628648b5a742379a1de89b2";
    let key = doc_id_to_bytes(doc_id).unwrap();
    idx.insert(&key, doc_id, "00000001", h(0, 10)).unwrap();
    let err = idx.insert(&key, doc_id, "00000002", h(10, 10)).unwrap_err();
    assert!(matches!(err, crate::Error::IndexError(_)));
}

#[test]
fn test_delete_and_get_many() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("multi.hash");
    // 4-byte coarse bucketed key, non-unique
    let mut idx = HashIndex::create(&path, 4, 1, false).unwrap();

    for i in 0..100u32 {
        let id = format!("{:032x}", i);
        idx.insert(&1u32.to_be_bytes(), &id, "00000001", h(i as u64, 1)).unwrap();
    }
    let all_one = idx.get_many(&1u32.to_be_bytes(), -1, 0).unwrap();
    assert_eq!(all_one.len(), 100);

    let zero = idx.get_many(&0u32.to_be_bytes(), -1, 0).unwrap();
    assert_eq!(zero.len(), 0);

    let first_id = format!("{:032x}", 0u32);
    idx.delete(&1u32.to_be_bytes(), &first_id).unwrap();
    let all_one = idx.get_many(&1u32.to_be_bytes(), -1, 0).unwrap();
    assert_eq!(all_one.len(), 99);
}

#[test]
fn test_update_same_and_new_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("u.hash");
    let mut idx = HashIndex::create(&path, 4, 8, false).unwrap();

    let doc_id = "00000000000000000000000000000001";
    let doc_id = &doc_id[..32];
    idx.insert(&1u32.to_be_bytes(), doc_id, "00000001", h(0, 5)).unwrap();

    idx.update(doc_id, &1u32.to_be_bytes(), "00000002", h(5, 7), &1u32.to_be_bytes())
        .unwrap();
    let got = idx.get(&1u32.to_be_bytes()).unwrap().unwrap();
    assert_eq!(got.handle, h(5, 7));

    idx.update(doc_id, &2u32.to_be_bytes(), "00000003", h(12, 9), &1u32.to_be_bytes())
        .unwrap();
    assert!(idx.get(&1u32.to_be_bytes()).unwrap().is_none());
    let got = idx.get(&2u32.to_be_bytes()).unwrap().unwrap();
    assert_eq!(got.handle, h(12, 9));
}

#[test]
fn test_compact_rebuilds_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.hash");
    let mut idx = HashIndex::create(&path, 4, 4, false).unwrap();

    let mut ids = vec![];
    for i in 0..20u32 {
        let id = format!("{:032x}", i);
        idx.insert(&(i % 4).to_be_bytes(), &id, "00000001", h(i as u64, 1)).unwrap();
        ids.push(id);
    }
    for i in (0..20u32).step_by(2) {
        idx.delete(&(i % 4).to_be_bytes(), &ids[i as usize]).unwrap();
    }
    idx.compact().unwrap();
    assert_eq!(idx.len().unwrap(), 10);
}

#[test]
fn test_storage_handle_roundtrip_through_hash() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("data.store");
    let idx_path = dir.path().join("data.hash");

    let mut data = StorageFile::create(&data_path).unwrap();
    let mut idx = HashIndex::create(&idx_path, 16, 17, true).unwrap();

    let doc_id = "11112222333344445555666677778888";
    let handle = data.append(b"payload").unwrap();
    idx.insert(&doc_id_to_bytes(doc_id).unwrap(), doc_id, "00000001", handle)
        .unwrap();

    let entry = idx.get(&doc_id_to_bytes(doc_id).unwrap()).unwrap().unwrap();
    assert_eq!(data.read(&entry.handle).unwrap(), b"payload");
}
