//! On-disk hash index: a fixed directory of bucket heads plus
//! chained-overflow entries, unique or multi-valued, mapping
//! `key -> {doc_id, revision, storage_handle}`.
//!
//! Degenerate case: a `hash_lim` of 1 collapses the directory to a
//! single chain, which is an intentional way to build a "bucket by
//! coarse key" index (spec.md §4.2).

use std::{
    convert::TryFrom,
    ffi, fs,
    hash::Hasher,
    io::{Seek, SeekFrom},
    path::Path,
};

pub mod entry;

use entry::{Entry, Status, NO_NEXT};

use crate::{hash::entry::doc_id_to_bytes, store::Handle, Result};

const MAGIC: &[u8; 4] = b"HSH1";
/// `magic | key_len:u32 | hash_lim:u64 | unique:u8`
const HEADER_LEN: u64 = 4 + 4 + 8 + 1;

/// An open-addressed-header, chained-overflow on-disk hash map.
pub struct HashIndex {
    loc: ffi::OsString,
    fd: fs::File,
    key_len: usize,
    hash_lim: u64,
    unique: bool,
    record_len: u64,
    size: u64,
}

impl HashIndex {
    /// Create a new, empty hash index file with `hash_lim` directory
    /// buckets, keyed by `key_len`-byte keys.
    pub fn create(path: &Path, key_len: usize, hash_lim: u64, unique: bool) -> Result<HashIndex> {
        if hash_lim == 0 {
            err_at!(Precondition, msg: "hash_lim must be >= 1, got {}", hash_lim)
        }
        crate::util::create_file_a(path.as_os_str())?;
        let mut fd = crate::util::open_file_rw(path.as_os_str())?;

        let record_len = Entry::record_len(key_len);
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&u32::try_from(key_len).unwrap().to_be_bytes());
        header.extend_from_slice(&hash_lim.to_be_bytes());
        header.push(unique as u8);
        write_file!(fd, &header, path, "writing hash-index header")?;

        let empty = Entry::empty(key_len).encode(key_len)?;
        for _ in 0..hash_lim {
            write_file!(fd, &empty, path, "writing hash-index directory")?;
        }

        let size = HEADER_LEN + hash_lim * record_len;
        Ok(HashIndex {
            loc: path.as_os_str().to_os_string(),
            fd,
            key_len,
            hash_lim,
            unique,
            record_len,
            size,
        })
    }

    /// Reopen an existing hash index file.
    pub fn open(path: &Path) -> Result<HashIndex> {
        let mut fd = crate::util::open_file_rw(path.as_os_str())?;

        let header = read_file!(fd, SeekFrom::Start(0), HEADER_LEN, "reading hash-index header")?;
        if &header[0..4] != MAGIC {
            err_at!(DecodeFail, msg: "{:?} is not a hash-index file", path)
        }
        let key_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let hash_lim = u64::from_be_bytes([
            header[8], header[9], header[10], header[11], header[12], header[13], header[14],
            header[15],
        ]);
        let unique = header[16] != 0;
        let record_len = Entry::record_len(key_len);

        let size = err_at!(IOError, fd.metadata())?.len();
        Ok(HashIndex {
            loc: path.as_os_str().to_os_string(),
            fd,
            key_len,
            hash_lim,
            unique,
            record_len,
            size,
        })
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn bucket_offset(&self, key: &[u8]) -> u64 {
        let mut hasher = crate::hash::CityHasher::new();
        hasher.write(key);
        let bucket = hasher.finish() % self.hash_lim;
        HEADER_LEN + bucket * self.record_len
    }

    fn read_at(&mut self, offset: u64) -> Result<Entry> {
        let bytes = read_file!(self.fd, SeekFrom::Start(offset), self.record_len, "reading hash entry")?;
        Entry::decode(&bytes, self.key_len)
    }

    fn write_at(&mut self, offset: u64, entry: &Entry) -> Result<()> {
        let bytes = entry.encode(self.key_len)?;
        err_at!(IOError, self.fd.seek(SeekFrom::Start(offset)))?;
        write_file!(self.fd, &bytes, self.loc, "writing hash entry")?;
        Ok(())
    }

    fn append(&mut self, entry: &Entry) -> Result<u64> {
        let offset = self.size;
        self.write_at(offset, entry)?;
        self.size += self.record_len;
        Ok(offset)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len {
            err_at!(
                IndexError,
                msg: "key length {} does not match index key_len {}", key.len(), self.key_len
            )
        }
        Ok(())
    }

    /// Insert `(key, doc_id)` with `rev`/`handle`. A unique index rejects
    /// the insert if a live entry already claims `key`.
    pub fn insert(&mut self, key: &[u8], doc_id: &str, rev: &str, handle: Handle) -> Result<()> {
        self.check_key(key)?;
        let doc_id_bytes = doc_id_to_bytes(doc_id)?;
        let rev_bytes = crate::hash::entry::rev_to_bytes(rev)?;

        let head_off = self.bucket_offset(key);
        let mut offset = head_off;
        let mut empty_slot = None;
        loop {
            let entry = self.read_at(offset)?;
            if entry.status == Status::Live && entry.key == key && self.unique {
                err_at!(IndexError, msg: "duplicate unique key at {:?}", key)
            }
            if entry.status == Status::Empty && empty_slot.is_none() {
                empty_slot = Some(offset);
            }
            if entry.next == NO_NEXT {
                break;
            }
            offset = entry.next;
        }

        let new_entry = Entry {
            key: key.to_vec(),
            doc_id: doc_id_bytes,
            rev: rev_bytes,
            handle,
            status: Status::Live,
            next: NO_NEXT,
        };

        match empty_slot {
            Some(slot) => {
                self.write_at(slot, &new_entry)?;
            }
            None => {
                let new_off = self.append(&new_entry)?;
                let mut tail = self.read_at(offset)?;
                tail.next = new_off;
                self.write_at(offset, &tail)?;
            }
        }
        Ok(())
    }

    /// Overwrite the entry's rev/handle in place if `new_key == old_key`,
    /// otherwise delete at `old_key` and insert at `new_key`.
    pub fn update(
        &mut self,
        doc_id: &str,
        new_key: &[u8],
        new_rev: &str,
        new_handle: Handle,
        old_key: &[u8],
    ) -> Result<()> {
        if new_key == old_key {
            self.check_key(new_key)?;
            let doc_id_bytes = doc_id_to_bytes(doc_id)?;
            let rev_bytes = crate::hash::entry::rev_to_bytes(new_rev)?;

            let mut offset = self.bucket_offset(old_key);
            loop {
                let mut entry = self.read_at(offset)?;
                if entry.status == Status::Live && entry.key == old_key && entry.doc_id == doc_id_bytes {
                    entry.rev = rev_bytes;
                    entry.handle = new_handle;
                    self.write_at(offset, &entry)?;
                    return Ok(());
                }
                if entry.next == NO_NEXT {
                    err_at!(NotFound, msg: "no live entry for key {:?} doc {}", old_key, doc_id)
                }
                offset = entry.next;
            }
        } else {
            self.delete(old_key, doc_id)?;
            self.insert(new_key, doc_id, new_rev, new_handle)
        }
    }

    /// Flip a live entry's status to deleted. Does not unlink from the
    /// chain; [HashIndex::compact] reclaims it.
    pub fn delete(&mut self, key: &[u8], doc_id: &str) -> Result<()> {
        let doc_id_bytes = doc_id_to_bytes(doc_id)?;
        let mut offset = self.bucket_offset(key);
        loop {
            let mut entry = self.read_at(offset)?;
            if entry.status == Status::Live && entry.key == key && entry.doc_id == doc_id_bytes {
                entry.status = Status::Deleted;
                self.write_at(offset, &entry)?;
                return Ok(());
            }
            if entry.next == NO_NEXT {
                err_at!(NotFound, msg: "no live entry for key {:?} doc {}", key, doc_id)
            }
            offset = entry.next;
        }
    }

    /// First entry for `key` regardless of status, live or tombstoned.
    /// Lets a caller tell "never existed" apart from "deleted", which
    /// [HashIndex::get] alone cannot (it only surfaces live entries).
    pub fn get_any(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.check_key(key)?;
        let mut offset = self.bucket_offset(key);
        loop {
            let entry = self.read_at(offset)?;
            if entry.status != Status::Empty && entry.key == key {
                return Ok(Some(entry));
            }
            if entry.next == NO_NEXT {
                return Ok(None);
            }
            offset = entry.next;
        }
    }

    /// First live entry for `key`, if any.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.check_key(key)?;
        let mut offset = self.bucket_offset(key);
        loop {
            let entry = self.read_at(offset)?;
            if entry.status == Status::Live && entry.key == key {
                return Ok(Some(entry));
            }
            if entry.next == NO_NEXT {
                return Ok(None);
            }
            offset = entry.next;
        }
    }

    /// All live entries for `key`, skipping `offset` and yielding at
    /// most `limit` (`limit < 0` means unbounded, matching spec.md's
    /// `get_many(..., limit=-1)` convention).
    pub fn get_many(&mut self, key: &[u8], limit: i64, offset: u64) -> Result<Vec<Entry>> {
        self.check_key(key)?;
        let mut out = Vec::new();
        let mut skipped = 0u64;
        let mut pos = self.bucket_offset(key);
        loop {
            let entry = self.read_at(pos)?;
            if entry.status == Status::Live && entry.key == key {
                if skipped < offset {
                    skipped += 1;
                } else if limit < 0 || (out.len() as i64) < limit {
                    out.push(entry);
                } else {
                    break;
                }
            }
            if entry.next == NO_NEXT {
                break;
            }
            pos = entry.next;
        }
        Ok(out)
    }

    /// Linear scan over every live entry in the file.
    pub fn all(&mut self, limit: i64, offset: u64) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut skipped = 0u64;
        let mut pos = HEADER_LEN;
        while pos < self.size {
            let entry = self.read_at(pos)?;
            if entry.status == Status::Live {
                if skipped < offset {
                    skipped += 1;
                } else if limit < 0 || (out.len() as i64) < limit {
                    out.push(entry);
                } else {
                    break;
                }
            }
            pos += self.record_len;
        }
        Ok(out)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.all(-1, 0)?.len())
    }

    /// Rebuild the file, rehashing only live entries, and atomically
    /// replace the original.
    pub fn compact(&mut self) -> Result<()> {
        let live = self.all(-1, 0)?;

        let tmp_path = {
            let mut p = Path::new(&self.loc).as_os_str().to_os_string();
            p.push(".compact");
            p
        };
        let mut fresh = HashIndex::create(Path::new(&tmp_path), self.key_len, self.hash_lim, self.unique)?;
        for entry in &live {
            let doc_id = crate::hash::entry::doc_id_from_bytes(&entry.doc_id);
            let rev = crate::hash::entry::rev_from_bytes(&entry.rev);
            fresh.insert(&entry.key, &doc_id, &rev, entry.handle)?;
        }
        fresh.sync()?;
        drop(fresh);

        err_at!(IOError, fs::rename(&tmp_path, &self.loc))?;
        *self = HashIndex::open(Path::new(&self.loc))?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        err_at!(IOError, self.fd.sync_all())
    }
}

/// Type uses google's city hash to convert a key byte slice into `u64`,
/// used for bucket placement. See [cityhash_rs].
#[derive(Clone, Copy, Default)]
pub struct CityHasher {
    digest: u128,
}

impl CityHasher {
    pub fn new() -> CityHasher {
        CityHasher::default()
    }
}

impl Hasher for CityHasher {
    fn finish(&self) -> u64 {
        ((self.digest >> 64) as u64) ^ ((self.digest & 0xFFFF_FFFF_FFFF_FFFF) as u64)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.digest = cityhash_rs::cityhash_110_128(bytes);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
