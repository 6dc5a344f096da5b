//! Thread-safety wrappers over [super::Database] (spec.md §5).
//!
//! The engine's own file handles all require `&mut self` to seek and
//! read, so there is no lock-free concurrent-reader path the way an
//! in-memory structure might offer one; both wrappers here serialize
//! every operation, differing only in what happens when the same thread
//! re-enters the lock.
//!
//! [ParallelDatabase] hands every call the teacher's read/write
//! spin-latch ([crate::util::Spinlock]), acquired for the call's
//! duration and released only after the wrapped result is already owned
//! by the caller's stack frame (return-then-release, resolving the
//! `destroy()` lock/return ordering question the same way for every
//! method).
//!
//! [CooperativeDatabase] instead hands out a reentrant lock, grounded on
//! `original_source`'s `main_lock` discipline: the owning thread may
//! re-enter a locked section without deadlocking itself (needed so a
//! caller-supplied aggregation invoked through [Database::run] can call
//! back into the same locked database). `Spinlock` has no reentrant
//! mode, so this hand-rolls a thread-owned, depth-counted mutex in the
//! same spirit, built on [std::sync::Condvar] rather than spinning,
//! since a full reindex can legitimately hold the lock for a while and
//! a busy-wait would waste a core for no reason.

use std::{
    ops::{Deref, DerefMut},
    path::Path,
    sync::{Condvar, Mutex},
    thread::ThreadId,
};

use crate::{
    database::{Config, Database, IndexEntry, Query},
    registry::IndexDef,
    util::Spinlock,
    Document, Result, Value,
};

/// The surface both wrappers expose, mirroring [Database]'s own methods
/// minus the ones ([Database::create]/[Database::open]) that build the
/// wrapper itself.
pub trait LockedDatabase {
    fn insert(&self, doc: Document) -> Result<Document>;
    fn update(&self, doc: Document) -> Result<Document>;
    fn delete(&self, doc: Document) -> Result<bool>;
    fn get(&self, index: &str, key: &[u8], with_doc: bool) -> Result<(IndexEntry, Option<Document>)>;
    fn get_many(&self, index: &str, query: Query, limit: i64, offset: u64, with_doc: bool)
        -> Result<Vec<(IndexEntry, Option<Document>)>>;
    fn all(&self, index: &str, limit: i64, offset: u64, with_doc: bool) -> Result<Vec<(IndexEntry, Option<Document>)>>;
    fn key_for(&self, index: &str, value: &Value) -> Result<Vec<u8>>;
    fn count_all(&self, index: &str) -> Result<usize>;
    fn count_many(&self, index: &str, query: Query) -> Result<usize>;
    fn add_index(&self, def: IndexDef, source_code: &str, create: bool) -> Result<String>;
    fn edit_index(&self, def: IndexDef, source_code: &str, reindex: bool) -> Result<String>;
    fn revert_index(&self, name: &str) -> Result<String>;
    fn destroy_index(&self, name: &str) -> Result<()>;
    fn reindex_index(&self, name: &str) -> Result<()>;
    fn reindex(&self) -> Result<()>;
    fn compact_index(&self, name: &str) -> Result<()>;
    fn compact(&self) -> Result<()>;
    fn run(&self, index: &str, method: &str, args: &[Value]) -> Result<Value>;
    fn flush(&self) -> Result<()>;
    fn fsync(&self) -> Result<()>;
}

/// Exclusive-access wrapper built on [Spinlock]. Every call spins for
/// the latch, runs against the wrapped [Database], and releases before
/// returning.
pub struct ParallelDatabase {
    door: Spinlock<Database>,
}

impl ParallelDatabase {
    pub fn create(dir: &Path, config: Config) -> Result<ParallelDatabase> {
        let db = Database::create_with_config(dir, config)?;
        Ok(ParallelDatabase { door: Spinlock::new(db) })
    }

    pub fn open(dir: &Path, config: Config) -> Result<ParallelDatabase> {
        let db = Database::open_with_config(dir, config)?;
        Ok(ParallelDatabase { door: Spinlock::new(db) })
    }

    /// Close the database. Fails if another thread is mid-call; the
    /// caller is expected to quiesce other handles first, matching the
    /// original's `close_open_lock` discipline.
    pub fn close(self) -> Result<()> {
        self.door.write().flush()
    }
}

impl LockedDatabase for ParallelDatabase {
    fn insert(&self, doc: Document) -> Result<Document> {
        self.door.write().insert(doc)
    }

    fn update(&self, doc: Document) -> Result<Document> {
        self.door.write().update(doc)
    }

    fn delete(&self, doc: Document) -> Result<bool> {
        self.door.write().delete(doc)
    }

    fn get(&self, index: &str, key: &[u8], with_doc: bool) -> Result<(IndexEntry, Option<Document>)> {
        self.door.write().get(index, key, with_doc)
    }

    fn get_many(
        &self,
        index: &str,
        query: Query,
        limit: i64,
        offset: u64,
        with_doc: bool,
    ) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        self.door.write().get_many(index, query, limit, offset, with_doc)
    }

    fn all(&self, index: &str, limit: i64, offset: u64, with_doc: bool) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        self.door.write().all(index, limit, offset, with_doc)
    }

    fn key_for(&self, index: &str, value: &Value) -> Result<Vec<u8>> {
        self.door.read().key_for(index, value)
    }

    fn count_all(&self, index: &str) -> Result<usize> {
        self.door.write().count_all(index)
    }

    fn count_many(&self, index: &str, query: Query) -> Result<usize> {
        self.door.write().count_many(index, query)
    }

    fn add_index(&self, def: IndexDef, source_code: &str, create: bool) -> Result<String> {
        self.door.write().add_index(def, source_code, create)
    }

    fn edit_index(&self, def: IndexDef, source_code: &str, reindex: bool) -> Result<String> {
        self.door.write().edit_index(def, source_code, reindex)
    }

    fn revert_index(&self, name: &str) -> Result<String> {
        self.door.write().revert_index(name)
    }

    fn destroy_index(&self, name: &str) -> Result<()> {
        self.door.write().destroy_index(name)
    }

    fn reindex_index(&self, name: &str) -> Result<()> {
        self.door.write().reindex_index(name)
    }

    fn reindex(&self) -> Result<()> {
        self.door.write().reindex()
    }

    fn compact_index(&self, name: &str) -> Result<()> {
        self.door.write().compact_index(name)
    }

    fn compact(&self) -> Result<()> {
        self.door.write().compact()
    }

    fn run(&self, index: &str, method: &str, args: &[Value]) -> Result<Value> {
        self.door.write().run(index, method, args)
    }

    fn flush(&self) -> Result<()> {
        self.door.write().flush()
    }

    fn fsync(&self) -> Result<()> {
        self.door.write().fsync()
    }
}

/// Thread-owned, depth-counted mutex: the same thread that holds the
/// lock may acquire it again without blocking on itself. Unlike
/// [Spinlock] this parks the waiting thread on a [Condvar] instead of
/// spinning, since the holder may be doing real work (a full reindex)
/// rather than a short latch-and-go critical section.
struct Reentrant<T> {
    state: Mutex<ReentrantState>,
    ready: Condvar,
    value: std::cell::UnsafeCell<T>,
}

struct ReentrantState {
    owner: Option<ThreadId>,
    depth: usize,
}

unsafe impl<T: Send> Send for Reentrant<T> {}
unsafe impl<T: Send> Sync for Reentrant<T> {}

impl<T> Reentrant<T> {
    fn new(value: T) -> Reentrant<T> {
        Reentrant {
            state: Mutex::new(ReentrantState { owner: None, depth: 0 }),
            ready: Condvar::new(),
            value: std::cell::UnsafeCell::new(value),
        }
    }

    fn lock(&self) -> ReentrantGuard<T> {
        let this = std::thread::current().id();
        let mut state = self.state.lock().unwrap();
        loop {
            match state.owner {
                Some(owner) if owner == this => {
                    state.depth += 1;
                    break;
                }
                None => {
                    state.owner = Some(this);
                    state.depth = 1;
                    break;
                }
                Some(_) => {
                    state = self.ready.wait(state).unwrap();
                }
            }
        }
        ReentrantGuard { lock: self }
    }
}

struct ReentrantGuard<'a, T> {
    lock: &'a Reentrant<T>,
}

impl<'a, T> Deref for ReentrantGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for ReentrantGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for ReentrantGuard<'a, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.lock.ready.notify_all();
        }
    }
}

/// Reentrant-lock wrapper: one thread may hold the lock across several
/// nested calls, e.g. a caller-defined aggregation (spec.md §4.4,
/// [Database::run]) invoked while the lock is already held.
pub struct CooperativeDatabase {
    door: Reentrant<Database>,
}

impl CooperativeDatabase {
    pub fn create(dir: &Path, config: Config) -> Result<CooperativeDatabase> {
        let db = Database::create_with_config(dir, config)?;
        Ok(CooperativeDatabase { door: Reentrant::new(db) })
    }

    pub fn open(dir: &Path, config: Config) -> Result<CooperativeDatabase> {
        let db = Database::open_with_config(dir, config)?;
        Ok(CooperativeDatabase { door: Reentrant::new(db) })
    }

    pub fn close(self) -> Result<()> {
        self.door.lock().flush()
    }
}

impl LockedDatabase for CooperativeDatabase {
    fn insert(&self, doc: Document) -> Result<Document> {
        self.door.lock().insert(doc)
    }

    fn update(&self, doc: Document) -> Result<Document> {
        self.door.lock().update(doc)
    }

    fn delete(&self, doc: Document) -> Result<bool> {
        self.door.lock().delete(doc)
    }

    fn get(&self, index: &str, key: &[u8], with_doc: bool) -> Result<(IndexEntry, Option<Document>)> {
        self.door.lock().get(index, key, with_doc)
    }

    fn get_many(
        &self,
        index: &str,
        query: Query,
        limit: i64,
        offset: u64,
        with_doc: bool,
    ) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        self.door.lock().get_many(index, query, limit, offset, with_doc)
    }

    fn all(&self, index: &str, limit: i64, offset: u64, with_doc: bool) -> Result<Vec<(IndexEntry, Option<Document>)>> {
        self.door.lock().all(index, limit, offset, with_doc)
    }

    fn key_for(&self, index: &str, value: &Value) -> Result<Vec<u8>> {
        self.door.lock().key_for(index, value)
    }

    fn count_all(&self, index: &str) -> Result<usize> {
        self.door.lock().count_all(index)
    }

    fn count_many(&self, index: &str, query: Query) -> Result<usize> {
        self.door.lock().count_many(index, query)
    }

    fn add_index(&self, def: IndexDef, source_code: &str, create: bool) -> Result<String> {
        self.door.lock().add_index(def, source_code, create)
    }

    fn edit_index(&self, def: IndexDef, source_code: &str, reindex: bool) -> Result<String> {
        self.door.lock().edit_index(def, source_code, reindex)
    }

    fn revert_index(&self, name: &str) -> Result<String> {
        self.door.lock().revert_index(name)
    }

    fn destroy_index(&self, name: &str) -> Result<()> {
        self.door.lock().destroy_index(name)
    }

    fn reindex_index(&self, name: &str) -> Result<()> {
        self.door.lock().reindex_index(name)
    }

    fn reindex(&self) -> Result<()> {
        self.door.lock().reindex()
    }

    fn compact_index(&self, name: &str) -> Result<()> {
        self.door.lock().compact_index(name)
    }

    fn compact(&self) -> Result<()> {
        self.door.lock().compact()
    }

    fn run(&self, index: &str, method: &str, args: &[Value]) -> Result<Value> {
        self.door.lock().run(index, method, args)
    }

    fn flush(&self) -> Result<()> {
        self.door.lock().flush()
    }

    fn fsync(&self) -> Result<()> {
        self.door.lock().fsync()
    }
}

#[cfg(test)]
#[path = "locking_test.rs"]
mod locking_test;
