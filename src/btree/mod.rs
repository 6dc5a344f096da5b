//! On-disk, order-preserving B+tree index with range scans.
//!
//! Nodes are fixed-capacity records in a dedicated file, addressed by
//! byte offset; leaves are linked into a doubly-linked chain
//! (`prev_leaf`/`next_leaf`) so range scans never have to re-descend
//! the tree. Both odd and even `node_capacity` work: the split point
//! and the underflow threshold are both derived from `capacity` with
//! the same rounding, so insert and delete stay consistent with each
//! other (spec.md §4.3).

use std::{cmp::Ordering, convert::TryFrom, ffi, fs, io::SeekFrom, path::Path};

pub mod node;

use node::{Leaf, Node, NONE};

use crate::{hash::entry::rev_to_bytes, store::Handle, Result};

const MAGIC: &[u8; 4] = b"BTR1";
/// `magic | key_len:u32 | capacity:u32 | unique:u8 | root:u64`
const HEADER_LEN: u64 = 4 + 4 + 4 + 1 + 8;
const ROOT_FIELD_OFFSET: u64 = 4 + 4 + 4 + 1;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Bias {
    /// Route/insert equal keys before existing equal keys (used to find
    /// the first occurrence of a key).
    Left,
    /// Route/insert equal keys after existing equal keys (used so
    /// repeated inserts of the same key stay in insertion order).
    Right,
}

/// A matched leaf entry, resolved back to caller-facing fields.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Vec<u8>,
    pub doc_id: String,
    pub rev: String,
    pub handle: Handle,
}

fn to_entry(key: &[u8], leaf: &Leaf) -> Entry {
    Entry {
        key: key.to_vec(),
        doc_id: crate::hash::entry::doc_id_from_bytes(&leaf.doc_id),
        rev: crate::hash::entry::rev_from_bytes(&leaf.rev),
        handle: leaf.handle,
    }
}

pub struct BtreeIndex {
    loc: ffi::OsString,
    fd: fs::File,
    key_len: usize,
    capacity: usize,
    unique: bool,
    min_keys: usize,
    record_len: u64,
    size: u64,
    root: u64,
}

impl BtreeIndex {
    pub fn create(path: &Path, key_len: usize, capacity: usize, unique: bool) -> Result<BtreeIndex> {
        if capacity < 2 {
            err_at!(Precondition, msg: "btree node_capacity must be >= 2, got {}", capacity)
        }
        crate::util::create_file_a(path.as_os_str())?;
        let mut fd = crate::util::open_file_rw(path.as_os_str())?;
        let record_len = Node::record_len(key_len, capacity);
        let root = HEADER_LEN;

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&u32::try_from(key_len).unwrap().to_be_bytes());
        header.extend_from_slice(&u32::try_from(capacity).unwrap().to_be_bytes());
        header.push(unique as u8);
        header.extend_from_slice(&root.to_be_bytes());
        write_file!(fd, &header, path, "writing btree header")?;

        let mut index = BtreeIndex {
            loc: path.as_os_str().to_os_string(),
            fd,
            key_len,
            capacity,
            unique,
            min_keys: (capacity + 1) / 2,
            record_len,
            size: root,
            root,
        };
        let empty_root = Node::new_leaf(NONE);
        let off = index.alloc(&empty_root)?;
        debug_assert_eq!(off, root);
        Ok(index)
    }

    pub fn open(path: &Path) -> Result<BtreeIndex> {
        use std::io::Seek;
        let mut fd = crate::util::open_file_rw(path.as_os_str())?;
        let header = read_file!(fd, SeekFrom::Start(0), HEADER_LEN, "reading btree header")?;
        if &header[0..4] != MAGIC {
            err_at!(DecodeFail, msg: "{:?} is not a btree-index file", path)
        }
        let key_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let capacity = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let unique = header[12] != 0;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&header[13..21]);
        let root = u64::from_be_bytes(arr);
        let record_len = Node::record_len(key_len, capacity);
        let size = err_at!(IOError, fd.metadata())?.len();
        err_at!(IOError, fd.seek(SeekFrom::Start(0)))?;

        Ok(BtreeIndex {
            loc: path.as_os_str().to_os_string(),
            fd,
            key_len,
            capacity,
            unique,
            min_keys: (capacity + 1) / 2,
            record_len,
            size,
            root,
        })
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    fn set_root(&mut self, root: u64) -> Result<()> {
        use std::io::{Seek, Write};
        self.root = root;
        err_at!(IOError, self.fd.seek(SeekFrom::Start(ROOT_FIELD_OFFSET)))?;
        err_at!(IOError, self.fd.write_all(&root.to_be_bytes()))?;
        Ok(())
    }

    fn read_node(&mut self, offset: u64) -> Result<Node> {
        let bytes = read_file!(self.fd, SeekFrom::Start(offset), self.record_len, "reading btree node")?;
        Node::decode(&bytes, self.key_len, self.capacity)
    }

    fn write_node(&mut self, offset: u64, node: &Node) -> Result<()> {
        use std::io::Seek;
        let bytes = node.encode(self.key_len, self.capacity)?;
        err_at!(IOError, self.fd.seek(SeekFrom::Start(offset)))?;
        write_file!(self.fd, &bytes, self.loc, "writing btree node")?;
        Ok(())
    }

    fn alloc(&mut self, node: &Node) -> Result<u64> {
        let offset = self.size;
        self.write_node(offset, node)?;
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

    fn child_index(keys: &[Vec<u8>], key: &[u8], bias: Bias) -> usize {
        match bias {
            Bias::Left => keys.partition_point(|k| k.as_slice() < key),
            Bias::Right => keys.partition_point(|k| k.as_slice() <= key),
        }
    }

    fn descend_to_leaf(&mut self, key: &[u8], bias: Bias) -> Result<u64> {
        let mut offset = self.root;
        loop {
            let node = self.read_node(offset)?;
            if node.is_leaf {
                return Ok(offset);
            }
            let idx = Self::child_index(&node.keys, key, bias);
            offset = node.children[idx];
        }
    }

    // ---------------------------------------------------------------
    // insert
    // ---------------------------------------------------------------

    pub fn insert(&mut self, key: &[u8], doc_id: &str, rev: &str, handle: Handle) -> Result<()> {
        self.check_key(key)?;
        let leaf_off = self.descend_to_leaf(key, Bias::Right)?;
        let mut leaf = self.read_node(leaf_off)?;

        if self.unique {
            if let Ok(pos) = leaf.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                let _ = pos;
                err_at!(IndexError, msg: "duplicate unique key at {:?}", key)
            }
        }

        let idx = Self::child_index(&leaf.keys, key, Bias::Right);
        let rev_bytes = rev_to_bytes(rev)?;
        let value = node::leaf_of(doc_id, rev_bytes, handle)?;
        leaf.keys.insert(idx, key.to_vec());
        leaf.leaves.insert(idx, value);
        leaf.count += 1;
        self.write_node(leaf_off, &leaf)?;

        if leaf.count > self.capacity {
            self.split_leaf(leaf_off)?;
        }
        Ok(())
    }

    fn split_leaf(&mut self, leaf_off: u64) -> Result<()> {
        let mut left = self.read_node(leaf_off)?;
        let mid = left.count / 2;

        let right_keys = left.keys.split_off(mid);
        let right_leaves = left.leaves.split_off(mid);
        left.count = left.keys.len();

        let mut right = Node::new_leaf(left.parent);
        right.next_leaf = left.next_leaf;
        right.prev_leaf = leaf_off;
        right.keys = right_keys;
        right.leaves = right_leaves;
        right.count = right.keys.len();
        let sep_key = right.keys[0].clone();

        let right_off = self.alloc(&right)?;

        if left.next_leaf != NONE {
            let mut next = self.read_node(left.next_leaf)?;
            next.prev_leaf = right_off;
            self.write_node(left.next_leaf, &next)?;
        }
        left.next_leaf = right_off;
        self.write_node(leaf_off, &left)?;

        self.promote(left.parent, leaf_off, sep_key, right_off)
    }

    /// Insert `sep_key`/`right_off` into `parent_off` as the separator
    /// following `left_off`, or allocate a new root if there is no
    /// parent. Splits and recurses upward on overflow.
    fn promote(&mut self, parent_off: u64, left_off: u64, sep_key: Vec<u8>, right_off: u64) -> Result<()> {
        if parent_off == NONE {
            let mut new_root = Node::new_inner(NONE);
            new_root.keys.push(sep_key);
            new_root.children.push(left_off);
            new_root.children.push(right_off);
            new_root.count = 1;
            let root_off = self.alloc(&new_root)?;

            let mut left = self.read_node(left_off)?;
            left.parent = root_off;
            self.write_node(left_off, &left)?;
            let mut right = self.read_node(right_off)?;
            right.parent = root_off;
            self.write_node(right_off, &right)?;

            return self.set_root(root_off);
        }

        let mut parent = self.read_node(parent_off)?;
        let pos = parent
            .children
            .iter()
            .position(|&c| c == left_off)
            .expect("left child must be present in parent");
        parent.keys.insert(pos, sep_key);
        parent.children.insert(pos + 1, right_off);
        parent.count = parent.keys.len();
        self.write_node(parent_off, &parent)?;

        let mut right = self.read_node(right_off)?;
        right.parent = parent_off;
        self.write_node(right_off, &right)?;

        if parent.count > self.capacity {
            self.split_inner(parent_off)?;
        }
        Ok(())
    }

    fn split_inner(&mut self, node_off: u64) -> Result<()> {
        let mut left = self.read_node(node_off)?;
        let mid = left.count / 2;

        let sep_key = left.keys[mid].clone();
        let right_keys = left.keys.split_off(mid + 1);
        left.keys.truncate(mid);
        let right_children = left.children.split_off(mid + 1);
        left.count = left.keys.len();

        let mut right = Node::new_inner(left.parent);
        right.keys = right_keys;
        right.children = right_children;
        right.count = right.keys.len();
        let right_off = self.alloc(&right)?;

        for &child in &right.children {
            let mut c = self.read_node(child)?;
            c.parent = right_off;
            self.write_node(child, &c)?;
        }
        self.write_node(node_off, &left)?;

        self.promote(left.parent, node_off, sep_key, right_off)
    }

    // ---------------------------------------------------------------
    // get / get_many / all
    // ---------------------------------------------------------------

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.check_key(key)?;
        let mut out = self.get_many(Some(key), true, Some(key), true, 0, 1)?;
        Ok(if out.is_empty() { None } else { Some(out.remove(0)) })
    }

    /// Range scan. `start`/`end` bounds of `None` are open. `limit < 0`
    /// means unbounded.
    pub fn get_many(
        &mut self,
        start: Option<&[u8]>,
        inclusive_start: bool,
        end: Option<&[u8]>,
        inclusive_end: bool,
        offset: u64,
        limit: i64,
    ) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut skipped = 0u64;

        let mut leaf_off = match start {
            Some(key) => self.descend_to_leaf(key, Bias::Left)?,
            None => self.leftmost_leaf()?,
        };

        'outer: loop {
            if leaf_off == NONE {
                break;
            }
            let node = self.read_node(leaf_off)?;
            for (key, leaf) in node.keys.iter().zip(node.leaves.iter()) {
                if let Some(s) = start {
                    let ord = key.as_slice().cmp(s);
                    let before = if inclusive_start { ord == Ordering::Less } else { ord != Ordering::Greater };
                    if before {
                        continue;
                    }
                }
                if let Some(e) = end {
                    let ord = key.as_slice().cmp(e);
                    let past = if inclusive_end { ord == Ordering::Greater } else { ord != Ordering::Less };
                    if past {
                        break 'outer;
                    }
                }
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                if limit >= 0 && (out.len() as i64) >= limit {
                    break 'outer;
                }
                out.push(to_entry(key, leaf));
            }
            leaf_off = node.next_leaf;
        }

        Ok(out)
    }

    pub fn all(&mut self, limit: i64, offset: u64) -> Result<Vec<Entry>> {
        self.get_many(None, true, None, true, offset, limit)
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.all(-1, 0)?.len())
    }

    fn leftmost_leaf(&mut self) -> Result<u64> {
        let mut offset = self.root;
        loop {
            let node = self.read_node(offset)?;
            if node.is_leaf {
                return Ok(offset);
            }
            offset = node.children[0];
        }
    }

    // ---------------------------------------------------------------
    // delete
    // ---------------------------------------------------------------

    pub fn delete(&mut self, key: &[u8], doc_id: &str) -> Result<()> {
        self.check_key(key)?;
        let mut leaf_off = self.descend_to_leaf(key, Bias::Left)?;
        loop {
            let node = self.read_node(leaf_off)?;
            if let Some(idx) = node
                .keys
                .iter()
                .zip(node.leaves.iter())
                .position(|(k, l)| k.as_slice() == key && crate::hash::entry::doc_id_from_bytes(&l.doc_id) == doc_id)
            {
                return self.remove_at(leaf_off, idx);
            }
            // duplicate keys can straddle a leaf boundary; keep walking
            // the chain while the key still matches.
            if node.next_leaf == NONE {
                err_at!(NotFound, msg: "no entry for key {:?} doc {}", key, doc_id)
            }
            let next = self.read_node(node.next_leaf)?;
            match next.keys.first() {
                Some(k) if k.as_slice() == key => leaf_off = node.next_leaf,
                _ => err_at!(NotFound, msg: "no entry for key {:?} doc {}", key, doc_id),
            }
        }
    }

    fn remove_at(&mut self, leaf_off: u64, idx: usize) -> Result<()> {
        let mut leaf = self.read_node(leaf_off)?;
        leaf.keys.remove(idx);
        leaf.leaves.remove(idx);
        leaf.count = leaf.keys.len();
        self.write_node(leaf_off, &leaf)?;

        if leaf_off == self.root || leaf.count >= self.min_keys {
            return Ok(());
        }
        self.fix_underflow(leaf_off)
    }

    /// Rebalance `node_off`, which has fallen below `min_keys` and is
    /// not the root: borrow from a sibling under the same parent, or
    /// merge with one, recursing upward if the parent then underflows.
    fn fix_underflow(&mut self, node_off: u64) -> Result<()> {
        let node = self.read_node(node_off)?;
        let parent_off = node.parent;
        if parent_off == NONE {
            return self.shrink_root_if_needed();
        }
        let parent = self.read_node(parent_off)?;
        let pos = parent.children.iter().position(|&c| c == node_off).unwrap();

        let left_sib = if pos > 0 { Some(parent.children[pos - 1]) } else { None };
        let right_sib = if pos + 1 < parent.children.len() {
            Some(parent.children[pos + 1])
        } else {
            None
        };

        if let Some(left_off) = left_sib {
            let left = self.read_node(left_off)?;
            if left.count > self.min_keys {
                return self.borrow_from_left(parent_off, pos, left_off, node_off);
            }
        }
        if let Some(right_off) = right_sib {
            let right = self.read_node(right_off)?;
            if right.count > self.min_keys {
                return self.borrow_from_right(parent_off, pos, node_off, right_off);
            }
        }
        if let Some(left_off) = left_sib {
            return self.merge(parent_off, pos - 1, left_off, node_off);
        }
        if let Some(right_off) = right_sib {
            return self.merge(parent_off, pos, node_off, right_off);
        }
        Ok(())
    }

    fn borrow_from_left(&mut self, parent_off: u64, pos: usize, left_off: u64, node_off: u64) -> Result<()> {
        let mut left = self.read_node(left_off)?;
        let mut node = self.read_node(node_off)?;
        let mut parent = self.read_node(parent_off)?;

        if node.is_leaf {
            let key = left.keys.pop().unwrap();
            let val = left.leaves.pop().unwrap();
            left.count -= 1;
            node.keys.insert(0, key.clone());
            node.leaves.insert(0, val);
            node.count += 1;
            parent.keys[pos - 1] = node.keys[0].clone();
        } else {
            let borrowed_key = left.keys.pop().unwrap();
            let borrowed_child = left.children.pop().unwrap();
            left.count -= 1;
            let sep = parent.keys[pos - 1].clone();
            node.keys.insert(0, sep);
            node.children.insert(0, borrowed_child);
            node.count += 1;
            parent.keys[pos - 1] = borrowed_key;

            let mut child = self.read_node(borrowed_child)?;
            child.parent = node_off;
            self.write_node(borrowed_child, &child)?;
        }

        self.write_node(left_off, &left)?;
        self.write_node(node_off, &node)?;
        self.write_node(parent_off, &parent)?;
        Ok(())
    }

    fn borrow_from_right(&mut self, parent_off: u64, pos: usize, node_off: u64, right_off: u64) -> Result<()> {
        let mut node = self.read_node(node_off)?;
        let mut right = self.read_node(right_off)?;
        let mut parent = self.read_node(parent_off)?;

        if node.is_leaf {
            let key = right.keys.remove(0);
            let val = right.leaves.remove(0);
            right.count -= 1;
            node.keys.push(key);
            node.leaves.push(val);
            node.count += 1;
            parent.keys[pos] = right.keys[0].clone();
        } else {
            let borrowed_key = right.keys.remove(0);
            let borrowed_child = right.children.remove(0);
            right.count -= 1;
            let sep = parent.keys[pos].clone();
            node.keys.push(sep);
            node.children.push(borrowed_child);
            node.count += 1;
            parent.keys[pos] = borrowed_key;

            let mut child = self.read_node(borrowed_child)?;
            child.parent = node_off;
            self.write_node(borrowed_child, &child)?;
        }

        self.write_node(node_off, &node)?;
        self.write_node(right_off, &right)?;
        self.write_node(parent_off, &parent)?;
        Ok(())
    }

    /// Merge `right_off` into `left_off`, removing the separator at
    /// `parent.keys[sep_idx]` and recursing if `parent` underflows.
    fn merge(&mut self, parent_off: u64, sep_idx: usize, left_off: u64, right_off: u64) -> Result<()> {
        let mut left = self.read_node(left_off)?;
        let right = self.read_node(right_off)?;
        let mut parent = self.read_node(parent_off)?;

        if left.is_leaf {
            left.keys.extend(right.keys);
            left.leaves.extend(right.leaves);
            left.count = left.keys.len();
            left.next_leaf = right.next_leaf;
            if right.next_leaf != NONE {
                let mut next = self.read_node(right.next_leaf)?;
                next.prev_leaf = left_off;
                self.write_node(right.next_leaf, &next)?;
            }
        } else {
            let sep = parent.keys[sep_idx].clone();
            left.keys.push(sep);
            left.keys.extend(right.keys);
            for &child in &right.children {
                let mut c = self.read_node(child)?;
                c.parent = left_off;
                self.write_node(child, &c)?;
            }
            left.children.extend(right.children);
            left.count = left.keys.len();
        }
        self.write_node(left_off, &left)?;

        parent.keys.remove(sep_idx);
        parent.children.remove(sep_idx + 1);
        parent.count = parent.keys.len();
        self.write_node(parent_off, &parent)?;

        if parent_off == self.root {
            self.shrink_root_if_needed()
        } else if parent.count < self.min_keys {
            self.fix_underflow(parent_off)
        } else {
            Ok(())
        }
    }

    /// If the root is an inner node with no keys left (one child), make
    /// that child the new root, shrinking the tree's height by one.
    fn shrink_root_if_needed(&mut self) -> Result<()> {
        let root = self.read_node(self.root)?;
        if !root.is_leaf && root.count == 0 {
            let only_child = root.children[0];
            let mut child = self.read_node(only_child)?;
            child.parent = NONE;
            self.write_node(only_child, &child)?;
            self.set_root(only_child)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // compact
    // ---------------------------------------------------------------

    /// Rebuild the file by replaying every live entry, in order, into a
    /// fresh tree, then atomically replace the original.
    pub fn compact(&mut self) -> Result<()> {
        let live = self.all(-1, 0)?;
        let tmp_path = {
            let mut p = Path::new(&self.loc).as_os_str().to_os_string();
            p.push(".compact");
            p
        };
        let mut fresh = BtreeIndex::create(Path::new(&tmp_path), self.key_len, self.capacity, self.unique)?;
        for entry in &live {
            fresh.insert(&entry.key, &entry.doc_id, &entry.rev, entry.handle)?;
        }
        fresh.sync()?;
        drop(fresh);

        err_at!(IOError, fs::rename(&tmp_path, &self.loc))?;
        *self = BtreeIndex::open(Path::new(&self.loc))?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        err_at!(IOError, self.fd.sync_all())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
