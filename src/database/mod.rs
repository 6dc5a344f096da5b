//! The database façade: orchestrates storage writes, id-index and
//! secondary-index fan-out, compaction and reindexing (spec.md §4.4).
//!
//! Modeled on the teacher's `index.rs` enum-dispatch style -- one
//! concrete type fronting several interchangeable index kinds -- and on
//! `robt::Config`/`wral::Config`'s chainable configuration structs.

pub mod locking;
mod secondary;

pub use secondary::{IndexEntry, Query, SecondaryIndex};

use std::{collections::HashMap, fs, path::{Path, PathBuf}};

use crate::{
    cache::Cache,
    codec::{BinCodec, Codec},
    document::{self, Document, ID_FIELD, REV_FIELD},
    hash::{entry::doc_id_to_bytes, HashIndex},
    registry::{IndexDef, IndexType, Registry},
    store::{Handle, StorageFile},
    Error, Result,
};

const MAGIC: &[u8; 4] = b"TOM1";
const VERSION: u8 = 1;
const ID_HASH_LIM: u64 = 1024;
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Whether a write auto-flushes. The base engine never does this itself
/// ([Database::flush]/[Database::fsync] are always explicit); this hook
/// only exists so a [locking] wrapper can opt into the original's
/// flush-on-every-write habit without the core engine paying for it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushPolicy {
    Manual,
    AfterEveryWrite,
}

/// Tunables a [Database] is built with. Every field has a default so
/// `Config::new()` produces a working configuration, matching the
/// teacher's `Config::new()` + chainable `set_*` convention.
#[derive(Clone)]
pub struct Config {
    pub cache_capacity: usize,
    pub flush_policy: FlushPolicy,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_policy: FlushPolicy::Manual,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn set_cache_capacity(mut self, capacity: usize) -> Config {
        self.cache_capacity = capacity;
        self
    }

    pub fn set_flush_policy(mut self, policy: FlushPolicy) -> Config {
        self.flush_policy = policy;
        self
    }
}

/// One registered secondary index: its parsed definition, the open data
/// file, and whether it still needs a [Database::reindex_index] pass
/// before writes through it are safe (spec.md §4.4 "try-reindex").
struct IndexHandle {
    name: String,
    def: IndexDef,
    needs_reindex: bool,
    index: SecondaryIndex,
}

impl IndexHandle {
    fn data_path(dir: &Path, name: &str, kind: IndexType) -> PathBuf {
        let ext = match kind {
            IndexType::Hash => "hsh",
            IndexType::Btree => "btr",
        };
        dir.join(format!("{}.{}", name, ext))
    }
}

/// What changed about one document's projection into one secondary
/// index across a write, used to drive both the update pipeline and
/// its rollback on partial failure.
enum ProjChange {
    Unchanged,
    Inserted { key: Vec<u8> },
    Removed { key: Vec<u8>, rev: String, handle: Handle },
    Rekeyed { old_key: Vec<u8>, old_rev: String, old_handle: Handle, new_key: Vec<u8> },
}

/// The embedded, schema-less document store.
///
/// Single-writer, no internal locking -- see [locking] for the
/// parallel/cooperative wrappers that add it.
pub struct Database {
    dir: PathBuf,
    codec: Box<dyn Codec>,
    storage: StorageFile,
    id_index: HashIndex,
    registry: Registry,
    secondaries: Vec<IndexHandle>,
    cache: Cache<u64, Document>,
    flush_policy: FlushPolicy,
}

impl Database {
    fn meta_path(dir: &Path) -> PathBuf {
        dir.join("META")
    }

    fn storage_path(dir: &Path) -> PathBuf {
        dir.join("data.store")
    }

    fn id_index_path(dir: &Path) -> PathBuf {
        dir.join("00id.hsh")
    }

    /// Initialize a brand new, empty database directory.
    pub fn create(dir: &Path) -> Result<Database> {
        Database::create_with_config(dir, Config::new())
    }

    pub fn create_with_config(dir: &Path, config: Config) -> Result<Database> {
        if Self::meta_path(dir).exists() {
            err_at!(DatabaseConflict, msg: "{:?} is already a database", dir)
        }
        err_at!(IOError, fs::create_dir_all(dir))?;

        let mut meta = Vec::with_capacity(5);
        meta.extend_from_slice(MAGIC);
        meta.push(VERSION);
        err_at!(IOError, fs::write(Self::meta_path(dir), &meta))?;

        let storage = StorageFile::create(&Self::storage_path(dir))?;
        let id_index = HashIndex::create(&Self::id_index_path(dir), 16, ID_HASH_LIM, true)?;
        let registry = Registry::open(dir)?;

        Ok(Database {
            dir: dir.to_path_buf(),
            codec: Box::new(BinCodec),
            storage,
            id_index,
            registry,
            secondaries: Vec::new(),
            cache: Cache::new(config.cache_capacity),
            flush_policy: config.flush_policy,
        })
    }

    /// Reopen an existing database directory, loading every registered
    /// secondary index definition in ordinal order.
    pub fn open(dir: &Path) -> Result<Database> {
        Database::open_with_config(dir, Config::new())
    }

    pub fn open_with_config(dir: &Path, config: Config) -> Result<Database> {
        let meta_path = Self::meta_path(dir);
        if !meta_path.exists() {
            err_at!(DatabasePath, msg: "{:?} is not a database (missing META)", dir)
        }
        let meta = err_at!(IOError, fs::read(&meta_path))?;
        if meta.len() < 5 || &meta[0..4] != MAGIC {
            err_at!(DatabasePath, msg: "{:?} META file is not recognized", dir)
        }
        if meta[4] != VERSION {
            err_at!(DatabasePath, msg: "{:?} database version {} unsupported", dir, meta[4])
        }

        let storage = StorageFile::open(&Self::storage_path(dir))?;
        let id_index = HashIndex::open(&Self::id_index_path(dir))?;
        let registry = Registry::open(dir)?;

        let mut secondaries = Vec::new();
        for (name, def) in registry.load_all()? {
            let path = IndexHandle::data_path(dir, &name, def.kind);
            let index = SecondaryIndex::open(&path, def.kind)?;
            secondaries.push(IndexHandle {
                name,
                def,
                needs_reindex: false,
                index,
            });
        }

        Ok(Database {
            dir: dir.to_path_buf(),
            codec: Box::new(BinCodec),
            storage,
            id_index,
            registry,
            secondaries,
            cache: Cache::new(config.cache_capacity),
            flush_policy: config.flush_policy,
        })
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    /// Close and remove every file belonging to this database.
    pub fn destroy(self) -> Result<()> {
        let dir = self.dir.clone();
        drop(self);
        err_at!(IOError, fs::remove_dir_all(&dir))
    }

    fn find_index_mut(&mut self, name: &str) -> Result<&mut IndexHandle> {
        self.secondaries
            .iter_mut()
            .find(|h| h.name == name)
            .ok_or_else(|| Error::Precondition(format!("{}:{} no such index {:?}", file!(), line!(), name)))
    }

    fn find_index(&self, name: &str) -> Result<&IndexHandle> {
        self.secondaries
            .iter()
            .find(|h| h.name == name)
            .ok_or_else(|| Error::Precondition(format!("{}:{} no such index {:?}", file!(), line!(), name)))
    }

    // -----------------------------------------------------------------
    // write pipeline
    // -----------------------------------------------------------------

    /// Compute `make_key_value(doc)` for every registered secondary
    /// index, in registration order. Fails with [Error::TryReindex] if
    /// any index was added but never reindexed.
    fn project_all(&self, doc: &Document) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(self.secondaries.len());
        for handle in &self.secondaries {
            if handle.needs_reindex {
                err_at!(TryReindex, msg: "index {:?} was added but not reindexed", handle.name)
            }
            out.push(handle.def.project(doc)?);
        }
        Ok(out)
    }

    pub fn insert(&mut self, mut doc: Document) -> Result<Document> {
        let id = match doc.id() {
            Some(id) => {
                document::validate_id(id)?;
                id.to_string()
            }
            None => {
                let id = document::new_id();
                doc.set_id(&id);
                id
            }
        };
        let id_bytes = doc_id_to_bytes(&id)?;

        if self.id_index.get(&id_bytes)?.is_some() {
            err_at!(IndexError, msg: "duplicate id {:?}", id)
        }

        let rev = document::new_rev();
        doc.set_rev(&rev);

        let projections = self.project_all(&doc)?;

        let payload = self.codec.encode(&doc)?;
        let handle = self.storage.append(&payload)?;

        if let Err(err) = self.id_index.insert(&id_bytes, &id, &rev, handle) {
            self.storage.mark_deleted(&handle).ok();
            return Err(err);
        }

        let mut applied = 0;
        for (i, handle_key) in projections.iter().enumerate() {
            if let Some(key) = handle_key {
                let idx = &mut self.secondaries[i].index;
                if let Err(err) = idx.insert(key, &id, &rev, handle) {
                    // roll forward: undo every secondary insert applied
                    // so far, then the id entry, then the storage slot.
                    for (j, handle_key) in projections.iter().enumerate().take(applied) {
                        if let Some(key) = handle_key {
                            self.secondaries[j].index.delete(key, &id).ok();
                        }
                    }
                    self.id_index.delete(&id_bytes, &id).ok();
                    self.storage.mark_deleted(&handle).ok();
                    return Err(err);
                }
                applied = i + 1;
            }
        }

        self.cache.put(handle.offset, doc.clone());
        self.maybe_fsync()?;
        Ok(doc)
    }

    fn maybe_fsync(&mut self) -> Result<()> {
        match self.flush_policy {
            FlushPolicy::AfterEveryWrite => self.fsync(),
            FlushPolicy::Manual => Ok(()),
        }
    }

    pub fn update(&mut self, doc: Document) -> Result<Document> {
        let id = doc
            .id()
            .ok_or_else(|| Error::Precondition(format!("{}:{} update requires _id", file!(), line!())))?
            .to_string();
        let caller_rev = doc
            .rev()
            .ok_or_else(|| Error::Precondition(format!("{}:{} update requires _rev", file!(), line!())))?
            .to_string();
        let id_bytes = doc_id_to_bytes(&id)?;

        let old_entry = self
            .id_index
            .get(&id_bytes)?
            .ok_or_else(|| Error::NotFound(format!("{}:{} no live document {:?}", file!(), line!(), id)))?;
        let old_handle = old_entry.handle;

        let current_rev = crate::hash::entry::rev_from_bytes(&old_entry.rev);
        if current_rev != caller_rev {
            err_at!(RevConflict, msg: "update({:?}) rev {} does not match current {}", id, caller_rev, current_rev)
        }

        let current_doc = self.read_handle(old_handle)?;

        let old_projections = self.project_all(&current_doc)?;
        let new_projections = self.project_all(&doc)?;

        let new_rev = document::new_rev();
        let mut new_doc = doc;
        new_doc.set_id(&id);
        new_doc.set_rev(&new_rev);

        let payload = self.codec.encode(&new_doc)?;
        let new_handle = self.storage.append(&payload)?;

        if let Err(err) = self.id_index.update(&id, &id_bytes, &new_rev, new_handle, &id_bytes) {
            self.storage.mark_deleted(&new_handle).ok();
            return Err(err);
        }

        let mut changes: Vec<ProjChange> = Vec::with_capacity(self.secondaries.len());
        let mut failure = None;
        for i in 0..self.secondaries.len() {
            let old_key = &old_projections[i];
            let new_key = &new_projections[i];
            let idx = &mut self.secondaries[i].index;
            let result = match (old_key, new_key) {
                (None, None) => Ok(ProjChange::Unchanged),
                (None, Some(nk)) => idx.insert(nk, &id, &new_rev, new_handle).map(|_| ProjChange::Inserted { key: nk.clone() }),
                (Some(ok), None) => idx.delete(ok, &id).map(|_| ProjChange::Removed {
                    key: ok.clone(),
                    rev: current_rev.clone(),
                    handle: old_handle,
                }),
                (Some(ok), Some(nk)) if ok == nk => idx
                    .update(&id, nk, &new_rev, new_handle, ok)
                    .map(|_| ProjChange::Rekeyed {
                        old_key: ok.clone(),
                        old_rev: current_rev.clone(),
                        old_handle,
                        new_key: nk.clone(),
                    }),
                (Some(ok), Some(nk)) => idx
                    .delete(ok, &id)
                    .and_then(|_| idx.insert(nk, &id, &new_rev, new_handle))
                    .map(|_| ProjChange::Rekeyed {
                        old_key: ok.clone(),
                        old_rev: current_rev.clone(),
                        old_handle,
                        new_key: nk.clone(),
                    }),
            };
            match result {
                Ok(change) => changes.push(change),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            for (i, change) in changes.into_iter().enumerate() {
                let idx = &mut self.secondaries[i].index;
                match change {
                    ProjChange::Unchanged => {}
                    ProjChange::Inserted { key } => {
                        idx.delete(&key, &id).ok();
                    }
                    ProjChange::Removed { key, rev, handle } => {
                        idx.insert(&key, &id, &rev, handle).ok();
                    }
                    ProjChange::Rekeyed { old_key, old_rev, old_handle, new_key } => {
                        idx.delete(&new_key, &id).ok();
                        idx.insert(&old_key, &id, &old_rev, old_handle).ok();
                    }
                }
            }
            self.id_index.update(&id, &id_bytes, &current_rev, old_handle, &id_bytes).ok();
            self.storage.mark_deleted(&new_handle).ok();
            return Err(err);
        }

        self.storage.mark_deleted(&old_handle)?;
        self.cache.invalidate(&old_handle.offset);
        self.cache.put(new_handle.offset, new_doc.clone());
        self.maybe_fsync()?;
        Ok(new_doc)
    }

    pub fn delete(&mut self, doc: Document) -> Result<bool> {
        let id = doc
            .id()
            .ok_or_else(|| Error::Precondition(format!("{}:{} delete requires _id", file!(), line!())))?
            .to_string();
        let caller_rev = doc
            .rev()
            .ok_or_else(|| Error::Precondition(format!("{}:{} delete requires _rev", file!(), line!())))?
            .to_string();
        let id_bytes = doc_id_to_bytes(&id)?;

        let entry = self
            .id_index
            .get_any(&id_bytes)?
            .ok_or_else(|| Error::NotFound(format!("{}:{} no document {:?}", file!(), line!(), id)))?;
        if entry.status == crate::hash::entry::Status::Deleted {
            err_at!(RecordDeleted, msg: "document {:?} already deleted", id)
        }
        let current_rev = crate::hash::entry::rev_from_bytes(&entry.rev);
        if current_rev != caller_rev {
            err_at!(RevConflict, msg: "delete({:?}) rev {} does not match current {}", id, caller_rev, current_rev)
        }
        let handle = entry.handle;

        let current_doc = self.read_handle(handle)?;
        let projections = self.project_all(&current_doc)?;

        let mut removed = Vec::with_capacity(projections.len());
        let mut failure = None;
        for (i, key) in projections.iter().enumerate() {
            if let Some(key) = key {
                match self.secondaries[i].index.delete(key, &id) {
                    Ok(()) => removed.push(i),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }

        if let Some(err) = failure {
            for i in removed {
                if let Some(key) = &projections[i] {
                    self.secondaries[i].index.insert(key, &id, &current_rev, handle).ok();
                }
            }
            return Err(err);
        }

        self.id_index.delete(&id_bytes, &id)?;
        self.storage.mark_deleted(&handle)?;
        self.cache.invalidate(&handle.offset);
        self.maybe_fsync()?;
        Ok(true)
    }

    // -----------------------------------------------------------------
    // read pipeline
    // -----------------------------------------------------------------

    fn read_handle(&mut self, handle: Handle) -> Result<Document> {
        if let Some(doc) = self.cache.get(&handle.offset) {
            return Ok(doc.clone());
        }
        let payload = self.storage.read(&handle)?;
        let doc = self.codec.decode(&payload)?;
        self.cache.put(handle.offset, doc.clone());
        Ok(doc)
    }

    /// Resolve `key` against `index` (`"id"` for the id index), optionally
    /// reading the referenced document through the cache.
    pub fn get(&mut self, index: &str, key: &[u8], with_doc: bool) -> Result<(IndexEntry, Option<Document>)> {
        let entry = if index == "id" {
            let entry = self
                .id_index
                .get_any(key)?
                .ok_or_else(|| Error::NotFound(format!("{}:{} no entry for key {:?}", file!(), line!(), key)))?;
            if entry.status == crate::hash::entry::Status::Deleted {
                err_at!(RecordDeleted, msg: "no entry for key {:?}, already deleted", key)
            }
            IndexEntry::from(entry)
        } else {
            self.find_index_mut(index)?
                .index
                .get(key)?
                .ok_or_else(|| Error::NotFound(format!("{}:{} no entry for key {:?}", file!(), line!(), key)))?
        };

        let doc = if with_doc { Some(self.read_handle(entry.handle)?) } else { None };
        Ok((entry, doc))
    }

    pub fn get_many(
        &mut self,
        index: &str,
        query: Query,
        limit: i64,
        offset: u64,
        with_doc: bool,
    ) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        let entries = if index == "id" {
            match query {
                Query::Key(key) => self
                    .id_index
                    .get_many(key, limit, offset)?
                    .into_iter()
                    .map(IndexEntry::from)
                    .collect(),
                Query::Range { .. } => err_at!(Precondition, msg: "range query against the id index"),
            }
        } else {
            self.find_index_mut(index)?.index.get_many(query, limit, offset)?
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let doc = if with_doc { Some(self.read_handle(entry.handle)?) } else { None };
            out.push((entry, doc));
        }
        Ok(out)
    }

    pub fn all(&mut self, index: &str, limit: i64, offset: u64, with_doc: bool) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        let entries = if index == "id" {
            self.id_index.all(limit, offset)?.into_iter().map(IndexEntry::from).collect()
        } else {
            self.find_index_mut(index)?.index.all(limit, offset)?
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let doc = if with_doc { Some(self.read_handle(entry.handle)?) } else { None };
            out.push((entry, doc));
        }
        Ok(out)
    }

    /// Project a caller-supplied value into a query key the same way
    /// `make_key_value` would have, via the index's `make_key` function.
    pub fn key_for(&self, index: &str, value: &crate::Value) -> Result<Vec<u8>> {
        self.find_index(index)?.def.project_value(value)
    }

    pub fn count_all(&mut self, index: &str) -> Result<usize> {
        if index == "id" {
            self.id_index.len()
        } else {
            self.find_index_mut(index)?.index.len()
        }
    }

    pub fn count_many(&mut self, index: &str, query: Query) -> Result<usize> {
        Ok(self.get_many(index, query, -1, 0, false)?.len())
    }

    // -----------------------------------------------------------------
    // index registry
    // -----------------------------------------------------------------

    /// Register a new secondary index. If `create` is true, the index
    /// is populated from the current documents before this call
    /// returns; otherwise it starts empty and every write through it
    /// fails with [Error::TryReindex] until [Database::reindex_index]
    /// runs.
    pub fn add_index(&mut self, def: IndexDef, source_code: &str, create: bool) -> Result<String> {
        if self.secondaries.iter().any(|h| h.name == def.name) {
            err_at!(IndexConflict, msg: "index {:?} already registered", def.name)
        }
        self.registry.add(&def, source_code)?;

        let path = IndexHandle::data_path(&self.dir, &def.name, def.kind);
        let index = SecondaryIndex::create(&path, &def)?;
        let name = def.name.clone();
        self.secondaries.push(IndexHandle {
            name: name.clone(),
            def,
            needs_reindex: !create,
            index,
        });

        if create {
            self.reindex_index(&name)?;
        }
        Ok(name)
    }

    /// Replace an index's definition. The previous definition is kept
    /// as a [Database::revert_index] point. If `reindex` is true the
    /// index is rebuilt from scratch before this call returns;
    /// otherwise it is marked [IndexHandle::needs_reindex] until an
    /// explicit [Database::reindex_index].
    pub fn edit_index(&mut self, def: IndexDef, source_code: &str, reindex: bool) -> Result<String> {
        let name = def.name.clone();
        self.registry.edit(&def, source_code)?;

        let path = IndexHandle::data_path(&self.dir, &name, def.kind);
        let index = SecondaryIndex::create_truncating(&path, &def)?;
        let handle = self.find_index_mut(&name)?;
        handle.def = def;
        handle.index = index;
        handle.needs_reindex = !reindex;

        if reindex {
            self.reindex_index(&name)?;
        }
        Ok(name)
    }

    pub fn revert_index(&mut self, name: &str) -> Result<String> {
        let def = self.registry.revert(name)?;
        let path = IndexHandle::data_path(&self.dir, name, def.kind);
        let index = SecondaryIndex::create_truncating(&path, &def)?;
        let handle = self.find_index_mut(name)?;
        handle.def = def;
        handle.index = index;
        handle.needs_reindex = true;
        Ok(name.to_string())
    }

    pub fn destroy_index(&mut self, name: &str) -> Result<()> {
        if name == "id" {
            err_at!(IndexConflict, msg: "id index cannot be destroyed")
        }
        let pos = self
            .secondaries
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| Error::IndexConflict(format!("{}:{} no such index {:?}", file!(), line!(), name)))?;
        let removed = self.secondaries.remove(pos);
        let path = IndexHandle::data_path(&self.dir, name, removed.def.kind);
        self.registry.destroy(name)?;
        fs::remove_file(&path).ok();
        Ok(())
    }

    /// Rebuild one secondary index from the current live id-index scan.
    /// Forbidden on the id index itself.
    pub fn reindex_index(&mut self, name: &str) -> Result<()> {
        if name == "id" {
            err_at!(Precondition, msg: "id index cannot be reindexed")
        }
        let pos = self
            .secondaries
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| Error::Precondition(format!("{}:{} no such index {:?}", file!(), line!(), name)))?;

        let def = self.secondaries[pos].def.clone();
        let path = IndexHandle::data_path(&self.dir, name, def.kind);
        let mut fresh = SecondaryIndex::create_truncating(&path, &def)?;

        for entry in self.id_index.all(-1, 0)? {
            let id = crate::hash::entry::doc_id_from_bytes(&entry.doc_id);
            let rev = crate::hash::entry::rev_from_bytes(&entry.rev);
            let doc = self.read_handle(entry.handle)?;
            if let Some(key) = def.project(&doc)? {
                fresh.insert(&key, &id, &rev, entry.handle)?;
            }
        }

        self.secondaries[pos].index = fresh;
        self.secondaries[pos].needs_reindex = false;
        Ok(())
    }

    pub fn reindex(&mut self) -> Result<()> {
        let names: Vec<String> = self.secondaries.iter().map(|h| h.name.clone()).collect();
        for name in names {
            self.reindex_index(&name)?;
        }
        Ok(())
    }

    pub fn compact_index(&mut self, name: &str) -> Result<()> {
        if name == "id" {
            self.id_index.compact()
        } else {
            self.find_index_mut(name)?.index.compact()
        }
    }

    /// Rewrite storage, dropping tombstones, and remap every index's
    /// handles to match. Idempotent: running it twice in a row is a
    /// no-op the second time.
    pub fn compact(&mut self) -> Result<()> {
        let tmp_path = {
            let mut p = Self::storage_path(&self.dir).into_os_string();
            p.push(".compact");
            PathBuf::from(p)
        };
        let mut fresh = StorageFile::create(&tmp_path)?;
        let mut mapping: HashMap<u64, Handle> = HashMap::new();

        self.storage.for_each(|handle, status, payload| {
            if status == crate::store::Status::Live {
                let new_handle = fresh.append(payload)?;
                mapping.insert(handle.offset, new_handle);
            }
            Ok(())
        })?;
        fresh.sync()?;
        drop(fresh);

        err_at!(IOError, fs::rename(&tmp_path, Self::storage_path(&self.dir)))?;
        self.storage = StorageFile::open(&Self::storage_path(&self.dir))?;

        for entry in self.id_index.all(-1, 0)? {
            if let Some(&new_handle) = mapping.get(&entry.handle.offset) {
                let id = crate::hash::entry::doc_id_from_bytes(&entry.doc_id);
                let rev = crate::hash::entry::rev_from_bytes(&entry.rev);
                self.id_index.update(&id, &entry.key, &rev, new_handle, &entry.key)?;
            }
        }
        self.id_index.compact()?;

        for handle in &mut self.secondaries {
            for entry in handle.index.all(-1, 0)? {
                if let Some(&new_handle) = mapping.get(&entry.handle.offset) {
                    handle.index.update(&entry.doc_id, &entry.key, &entry.rev, new_handle, &entry.key)?;
                }
            }
            handle.index.compact()?;
        }

        self.cache.clear();
        Ok(())
    }

    /// Invoke a user-defined aggregation method exposed by `index`.
    /// Reserved prefixes (`destroy`, `reindex`, `compact`) are rejected;
    /// this is the plug-in seam spec.md §4.4 calls out for aggregations,
    /// which this crate does not ship concrete implementations of.
    pub fn run(&mut self, index: &str, method: &str, _args: &[crate::Value]) -> Result<crate::Value> {
        for reserved in ["destroy", "reindex", "compact", "edit", "revert"] {
            if method.starts_with(reserved) {
                err_at!(Precondition, msg: "method {:?} uses a reserved prefix", method)
            }
        }
        self.find_index(index)?;
        err_at!(Precondition, msg: "index {:?} exposes no run_{} method", index, method)
    }

    /// Hand buffered writes to the OS. This engine performs unbuffered
    /// `write(2)` calls already, so there is nothing further to flush;
    /// kept as a named operation to match spec.md's external contract.
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Force every open file to durable storage.
    pub fn fsync(&mut self) -> Result<()> {
        self.storage.sync()?;
        self.id_index.sync()?;
        for handle in &mut self.secondaries {
            handle.index.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
