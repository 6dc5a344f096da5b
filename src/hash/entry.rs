//! Fixed-size hash-index entry record.
//!
//! `key[key_len] | doc_id[16] | rev[4] | start:u64 | length:u64 |
//! status:u8 | next:u64`, the same field order as the `entry_line_format`
//! struct the original index-definition files pack with Python's
//! `struct` module (`<32s32sIIcI`), widened to 64-bit offsets/lengths
//! and a 64-bit chain pointer so the entry file isn't capped at 4GiB.

use std::convert::TryFrom;

use crate::{store::Handle, Result};

/// Sentinel `next` value meaning "end of bucket chain".
pub const NO_NEXT: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Empty = 0,
    Live = 1,
    Deleted = 2,
}

impl Status {
    fn from_byte(b: u8) -> Result<Status> {
        match b {
            0 => Ok(Status::Empty),
            1 => Ok(Status::Live),
            2 => Ok(Status::Deleted),
            b => err_at!(DecodeFail, msg: "invalid hash-entry status byte {}", b),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Vec<u8>,
    pub doc_id: [u8; 16],
    pub rev: [u8; 4],
    pub handle: Handle,
    pub status: Status,
    pub next: u64,
}

impl Entry {
    pub fn empty(key_len: usize) -> Entry {
        Entry {
            key: vec![0; key_len],
            doc_id: [0; 16],
            rev: [0; 4],
            handle: Handle { offset: 0, length: 0 },
            status: Status::Empty,
            next: NO_NEXT,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == Status::Live
    }

    pub fn record_len(key_len: usize) -> u64 {
        (key_len + 16 + 4 + 8 + 8 + 1 + 8) as u64
    }

    pub fn encode(&self, key_len: usize) -> Result<Vec<u8>> {
        if self.key.len() != key_len {
            err_at!(
                IndexError,
                msg: "key length {} does not match index key_len {}", self.key.len(), key_len
            )
        }
        let mut buf = Vec::with_capacity(key_len + 45);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.doc_id);
        buf.extend_from_slice(&self.rev);
        buf.extend_from_slice(&self.handle.offset.to_be_bytes());
        buf.extend_from_slice(&self.handle.length.to_be_bytes());
        buf.push(self.status as u8);
        buf.extend_from_slice(&self.next.to_be_bytes());
        Ok(buf)
    }

    pub fn decode(bytes: &[u8], key_len: usize) -> Result<Entry> {
        let want = usize::try_from(Entry::record_len(key_len)).unwrap();
        check_remaining!(bytes, want, "hash entry record")?;

        let mut off = 0;
        let key = bytes[off..off + key_len].to_vec();
        off += key_len;

        let mut doc_id = [0u8; 16];
        doc_id.copy_from_slice(&bytes[off..off + 16]);
        off += 16;

        let mut rev = [0u8; 4];
        rev.copy_from_slice(&bytes[off..off + 4]);
        off += 4;

        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[off..off + 8]);
        let start = u64::from_be_bytes(arr);
        off += 8;

        arr.copy_from_slice(&bytes[off..off + 8]);
        let length = u64::from_be_bytes(arr);
        off += 8;

        let status = Status::from_byte(bytes[off])?;
        off += 1;

        arr.copy_from_slice(&bytes[off..off + 8]);
        let next = u64::from_be_bytes(arr);

        Ok(Entry {
            key,
            doc_id,
            rev,
            handle: Handle { offset: start, length },
            status,
            next,
        })
    }
}

/// Encode a 32-lowercase-hex `_id` into 16 raw bytes.
pub fn doc_id_to_bytes(id: &str) -> Result<[u8; 16]> {
    if id.len() != 32 {
        err_at!(Precondition, msg: "doc id {:?} is not 32 hex chars", id)
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        let byte = u8::from_str_radix(&id[i * 2..i * 2 + 2], 16);
        out[i] = err_at!(Precondition, byte)?;
    }
    Ok(out)
}

pub fn doc_id_from_bytes(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Encode an 8-hex-char `_rev` into 4 raw bytes.
pub fn rev_to_bytes(rev: &str) -> Result<[u8; 4]> {
    if rev.len() != 8 {
        err_at!(Precondition, msg: "rev {:?} is not 8 hex chars", rev)
    }
    let mut out = [0u8; 4];
    for i in 0..4 {
        let byte = u8::from_str_radix(&rev[i * 2..i * 2 + 2], 16);
        out[i] = err_at!(Precondition, byte)?;
    }
    Ok(out)
}

pub fn rev_from_bytes(bytes: &[u8; 4]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
