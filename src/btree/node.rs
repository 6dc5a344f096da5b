//! Fixed-capacity B-tree node record.
//!
//! Every node -- leaf or inner -- occupies one fixed-size slot in the
//! index file so nodes can be addressed by byte offset. Leaf value
//! slots carry `doc_id | rev | storage_start | storage_length`
//! (36 bytes) rather than a bare handle, because a non-unique index's
//! delete must locate one entry among several sharing the same key by
//! `(key, doc_id)`, per spec.md §4.3. Inner value slots reuse the same
//! 36-byte width and store only a child offset in the first 8 bytes.
//!
//! The on-disk record holds one key slot and one value slot more than
//! `capacity` calls for: `insert` appends into a node before checking
//! for overflow, so a node briefly carries `capacity + 1` keys (an
//! inner node, `capacity + 2` children) between that insert and the
//! split call that shrinks it back down. Sizing the record for
//! `capacity` alone would truncate that overflow entry the moment it
//! is written.

use std::convert::TryFrom;

use crate::{hash::entry::doc_id_to_bytes, store::Handle, Result};

pub const NONE: u64 = u64::MAX;
const VALUE_WIDTH: usize = 36;

fn key_slots(capacity: usize) -> usize {
    capacity + 1
}

fn value_slots(capacity: usize) -> usize {
    capacity + 2
}

#[derive(Clone, Debug)]
pub struct Leaf {
    pub doc_id: [u8; 16],
    pub rev: [u8; 4],
    pub handle: Handle,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub is_leaf: bool,
    pub count: usize,
    pub parent: u64,
    pub prev_leaf: u64,
    pub next_leaf: u64,
    /// `count` keys, each `key_len` bytes.
    pub keys: Vec<Vec<u8>>,
    /// Valid for `is_leaf`: `count` entries.
    pub leaves: Vec<Leaf>,
    /// Valid for inner nodes: `count + 1` child offsets.
    pub children: Vec<u64>,
}

impl Node {
    pub fn new_leaf(parent: u64) -> Node {
        Node {
            is_leaf: true,
            count: 0,
            parent,
            prev_leaf: NONE,
            next_leaf: NONE,
            keys: Vec::new(),
            leaves: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_inner(parent: u64) -> Node {
        Node {
            is_leaf: false,
            count: 0,
            parent,
            prev_leaf: NONE,
            next_leaf: NONE,
            keys: Vec::new(),
            leaves: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn record_len(key_len: usize, capacity: usize) -> u64 {
        let fixed = 1 + 4 + 8 + 8 + 8;
        (fixed + key_slots(capacity) * key_len + value_slots(capacity) * VALUE_WIDTH) as u64
    }

    pub fn encode(&self, key_len: usize, capacity: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Node::record_len(key_len, capacity) as usize);
        buf.push(self.is_leaf as u8);
        buf.extend_from_slice(&u32::try_from(self.count).unwrap().to_be_bytes());
        buf.extend_from_slice(&self.parent.to_be_bytes());
        buf.extend_from_slice(&self.prev_leaf.to_be_bytes());
        buf.extend_from_slice(&self.next_leaf.to_be_bytes());

        for i in 0..key_slots(capacity) {
            match self.keys.get(i) {
                Some(k) => buf.extend_from_slice(k),
                None => buf.extend(std::iter::repeat(0u8).take(key_len)),
            }
        }

        if self.is_leaf {
            for i in 0..value_slots(capacity) {
                let mut slot = [0u8; VALUE_WIDTH];
                if let Some(leaf) = self.leaves.get(i) {
                    slot[0..16].copy_from_slice(&leaf.doc_id);
                    slot[16..20].copy_from_slice(&leaf.rev);
                    slot[20..28].copy_from_slice(&leaf.handle.offset.to_be_bytes());
                    slot[28..36].copy_from_slice(&leaf.handle.length.to_be_bytes());
                }
                buf.extend_from_slice(&slot);
            }
        } else {
            for i in 0..value_slots(capacity) {
                let mut slot = [0u8; VALUE_WIDTH];
                let child = self.children.get(i).copied().unwrap_or(NONE);
                slot[0..8].copy_from_slice(&child.to_be_bytes());
                buf.extend_from_slice(&slot);
            }
        }

        Ok(buf)
    }

    pub fn decode(bytes: &[u8], key_len: usize, capacity: usize) -> Result<Node> {
        let want = usize::try_from(Node::record_len(key_len, capacity)).unwrap();
        check_remaining!(bytes, want, "btree node record")?;

        let mut off = 0;
        let is_leaf = bytes[off] != 0;
        off += 1;

        let count = u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]) as usize;
        off += 4;

        let parent = read_u64(bytes, &mut off);
        let prev_leaf = read_u64(bytes, &mut off);
        let next_leaf = read_u64(bytes, &mut off);

        let mut keys = Vec::with_capacity(count);
        for i in 0..key_slots(capacity) {
            let k = bytes[off..off + key_len].to_vec();
            off += key_len;
            if i < count {
                keys.push(k);
            }
        }

        let mut leaves = Vec::new();
        let mut children = Vec::new();
        if is_leaf {
            for i in 0..value_slots(capacity) {
                let slot = &bytes[off..off + VALUE_WIDTH];
                off += VALUE_WIDTH;
                if i < count {
                    let mut doc_id = [0u8; 16];
                    doc_id.copy_from_slice(&slot[0..16]);
                    let mut rev = [0u8; 4];
                    rev.copy_from_slice(&slot[16..20]);
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(&slot[20..28]);
                    let offset = u64::from_be_bytes(arr);
                    arr.copy_from_slice(&slot[28..36]);
                    let length = u64::from_be_bytes(arr);
                    leaves.push(Leaf {
                        doc_id,
                        rev,
                        handle: Handle { offset, length },
                    });
                }
            }
        } else {
            for i in 0..value_slots(capacity) {
                let slot = &bytes[off..off + VALUE_WIDTH];
                off += VALUE_WIDTH;
                if i <= count {
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(&slot[0..8]);
                    children.push(u64::from_be_bytes(arr));
                }
            }
        }

        Ok(Node {
            is_leaf,
            count,
            parent,
            prev_leaf,
            next_leaf,
            keys,
            leaves,
            children,
        })
    }
}

fn read_u64(bytes: &[u8], off: &mut usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[*off..*off + 8]);
    *off += 8;
    u64::from_be_bytes(arr)
}

pub fn leaf_of(doc_id: &str, rev_bytes: [u8; 4], handle: Handle) -> Result<Leaf> {
    Ok(Leaf {
        doc_id: doc_id_to_bytes(doc_id)?,
        rev: rev_bytes,
        handle,
    })
}
