use super::*;

use tempfile::tempdir;

#[test]
fn test_append_and_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.store");

    let mut file = StorageFile::create(&path).unwrap();
    let h1 = file.append(b"hello").unwrap();
    let h2 = file.append(b"world!!").unwrap();

    assert_eq!(file.read(&h1).unwrap(), b"hello");
    assert_eq!(file.read(&h2).unwrap(), b"world!!");
}

#[test]
fn test_mark_deleted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.store");

    let mut file = StorageFile::create(&path).unwrap();
    let h1 = file.append(b"alive").unwrap();

    file.mark_deleted(&h1).unwrap();
    let err = file.read(&h1).unwrap_err();
    assert!(matches!(err, crate::Error::RecordDeleted(_)));
}

#[test]
fn test_reopen_preserves_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.store");

    let h1 = {
        let mut file = StorageFile::create(&path).unwrap();
        let h1 = file.append(b"one").unwrap();
        file.append(b"two").unwrap();
        file.sync().unwrap();
        h1
    };

    let mut file = StorageFile::open(&path).unwrap();
    assert_eq!(file.read(&h1).unwrap(), b"one");
}

#[test]
fn test_recovers_from_truncated_tail() {
    use std::io::Write;

    let dir = tempdir().unwrap();
    let path = dir.path().join("data.store");

    let (h1, full_len) = {
        let mut file = StorageFile::create(&path).unwrap();
        let h1 = file.append(b"complete").unwrap();
        file.append(b"second").unwrap();
        file.sync().unwrap();
        (h1, file.len())
    };

    // simulate a crash mid-write: chop off the last few bytes of the
    // second record so its header claims more payload than is present.
    let mut raw = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    raw.set_len(full_len - 3).unwrap();
    raw.flush().unwrap();
    drop(raw);

    let mut file = StorageFile::open(&path).unwrap();
    assert_eq!(file.read(&h1).unwrap(), b"complete");
    // second record was discarded, so appending lands right after the first
    let h3 = file.append(b"third").unwrap();
    assert_eq!(h3.offset, h1.offset + 4 + 1 + 4 + "complete".len() as u64);
}

#[test]
fn test_for_each_visits_live_and_deleted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.store");

    let mut file = StorageFile::create(&path).unwrap();
    let h1 = file.append(b"a").unwrap();
    file.append(b"b").unwrap();
    file.mark_deleted(&h1).unwrap();

    let mut seen = vec![];
    file.for_each(|handle, status, payload| {
        seen.push((handle, status, payload.to_vec()));
        Ok(())
    })
    .unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, Status::Deleted);
    assert_eq!(seen[1].1, Status::Live);
}
