//! Uniform wrapper over the two on-disk secondary index kinds, so
//! [super::Database] can dispatch through one enum instead of matching
//! on [crate::registry::IndexType] at every call site -- the same shape
//! as the teacher's `Index::Llrb { .. } | Index::Robt { .. }` dispatch
//! in `index.rs`, generalized from an in-memory/immutable split to a
//! hash/btree split.

use std::{fs, path::Path};

use crate::{
    btree::{self, BtreeIndex},
    hash::{self, HashIndex},
    registry::{IndexDef, IndexType},
    store::Handle,
    Result,
};

/// One matched index entry, the shape both [HashIndex] and [BtreeIndex]
/// entries resolve to.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub doc_id: String,
    pub rev: String,
    pub handle: Handle,
}

impl From<hash::entry::Entry> for IndexEntry {
    fn from(e: hash::entry::Entry) -> IndexEntry {
        IndexEntry {
            key: e.key,
            doc_id: hash::entry::doc_id_from_bytes(&e.doc_id),
            rev: hash::entry::rev_from_bytes(&e.rev),
            handle: e.handle,
        }
    }
}

impl From<btree::Entry> for IndexEntry {
    fn from(e: btree::Entry) -> IndexEntry {
        IndexEntry {
            key: e.key,
            doc_id: e.doc_id,
            rev: e.rev,
            handle: e.handle,
        }
    }
}

/// A range or point query against a secondary index. Hash indexes only
/// accept [Query::Key]; btree indexes accept either.
pub enum Query<'a> {
    Key(&'a [u8]),
    Range {
        start: Option<&'a [u8]>,
        inclusive_start: bool,
        end: Option<&'a [u8]>,
        inclusive_end: bool,
    },
}

pub enum SecondaryIndex {
    Hash(HashIndex),
    Btree(BtreeIndex),
}

impl SecondaryIndex {
    pub fn create(path: &Path, def: &IndexDef) -> Result<SecondaryIndex> {
        let key_len = def.key_format.width();
        match def.kind {
            IndexType::Hash => Ok(SecondaryIndex::Hash(HashIndex::create(
                path,
                key_len,
                def.size_param as u64,
                def.unique,
            )?)),
            IndexType::Btree => Ok(SecondaryIndex::Btree(BtreeIndex::create(
                path,
                key_len,
                def.size_param,
                def.unique,
            )?)),
        }
    }

    pub fn open(path: &Path, kind: IndexType) -> Result<SecondaryIndex> {
        match kind {
            IndexType::Hash => Ok(SecondaryIndex::Hash(HashIndex::open(path)?)),
            IndexType::Btree => Ok(SecondaryIndex::Btree(BtreeIndex::open(path)?)),
        }
    }

    /// Like [SecondaryIndex::create], but first removes any file already
    /// at `path` -- used when (re)building an index's data file in
    /// place, where `create`'s create-if-absent semantics would
    /// otherwise fail with an already-exists error.
    pub fn create_truncating(path: &Path, def: &IndexDef) -> Result<SecondaryIndex> {
        if path.exists() {
            err_at!(IOError, fs::remove_file(path))?;
        }
        SecondaryIndex::create(path, def)
    }

    pub fn insert(&mut self, key: &[u8], doc_id: &str, rev: &str, handle: Handle) -> Result<()> {
        match self {
            SecondaryIndex::Hash(idx) => idx.insert(key, doc_id, rev, handle),
            SecondaryIndex::Btree(idx) => idx.insert(key, doc_id, rev, handle),
        }
    }

    pub fn update(
        &mut self,
        doc_id: &str,
        new_key: &[u8],
        new_rev: &str,
        new_handle: Handle,
        old_key: &[u8],
    ) -> Result<()> {
        match self {
            SecondaryIndex::Hash(idx) => idx.update(doc_id, new_key, new_rev, new_handle, old_key),
            SecondaryIndex::Btree(idx) => {
                // BtreeIndex has no in-place overwrite primitive; delete
                // and reinsert even when the key is unchanged.
                idx.delete(old_key, doc_id)?;
                idx.insert(new_key, doc_id, new_rev, new_handle)
            }
        }
    }

    pub fn delete(&mut self, key: &[u8], doc_id: &str) -> Result<()> {
        match self {
            SecondaryIndex::Hash(idx) => idx.delete(key, doc_id),
            SecondaryIndex::Btree(idx) => idx.delete(key, doc_id),
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<IndexEntry>> {
        match self {
            SecondaryIndex::Hash(idx) => Ok(idx.get(key)?.map(IndexEntry::from)),
            SecondaryIndex::Btree(idx) => Ok(idx.get(key)?.map(IndexEntry::from)),
        }
    }

    pub fn get_many(&mut self, query: Query, limit: i64, offset: u64) -> Result<Vec<IndexEntry>> {
        match self {
            SecondaryIndex::Hash(idx) => match query {
                Query::Key(key) => Ok(idx
                    .get_many(key, limit, offset)?
                    .into_iter()
                    .map(IndexEntry::from)
                    .collect()),
                Query::Range { .. } => {
                    err_at!(Precondition, msg: "range query against a hash index")
                }
            },
            SecondaryIndex::Btree(idx) => {
                let (start, inclusive_start, end, inclusive_end) = match query {
                    Query::Key(key) => (Some(key), true, Some(key), true),
                    Query::Range {
                        start,
                        inclusive_start,
                        end,
                        inclusive_end,
                    } => (start, inclusive_start, end, inclusive_end),
                };
                Ok(idx
                    .get_many(start, inclusive_start, end, inclusive_end, offset, limit)?
                    .into_iter()
                    .map(IndexEntry::from)
                    .collect())
            }
        }
    }

    pub fn all(&mut self, limit: i64, offset: u64) -> Result<Vec<IndexEntry>> {
        match self {
            SecondaryIndex::Hash(idx) => Ok(idx.all(limit, offset)?.into_iter().map(IndexEntry::from).collect()),
            SecondaryIndex::Btree(idx) => Ok(idx.all(limit, offset)?.into_iter().map(IndexEntry::from).collect()),
        }
    }

    pub fn len(&mut self) -> Result<usize> {
        match self {
            SecondaryIndex::Hash(idx) => idx.len(),
            SecondaryIndex::Btree(idx) => idx.len(),
        }
    }

    pub fn compact(&mut self) -> Result<()> {
        match self {
            SecondaryIndex::Hash(idx) => idx.compact(),
            SecondaryIndex::Btree(idx) => idx.compact(),
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        match self {
            SecondaryIndex::Hash(idx) => idx.sync(),
            SecondaryIndex::Btree(idx) => idx.sync(),
        }
    }
}
