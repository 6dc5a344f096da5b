//! `tome` is an embedded, schema-less document store.
//!
//! Documents are free-form maps keyed by string, each carrying two
//! reserved fields managed by the engine: `_id`, a 32 hex-digit primary
//! key, and `_rev`, an 8 hex-digit token bumped on every successful
//! write. Secondary structure comes from pluggable indexes -- hash
//! indexes for point lookups, btree indexes for ordered range scans --
//! each built from a small index-definition language that projects a
//! document down to the bytes an index keys on.
//!
//! The storage file itself is an append-only log of length-prefixed,
//! checksummed records; compaction rewrites it and swaps it in with an
//! atomic rename. A bounded cache sits in front of the file to absorb
//! repeat reads of hot records.

#[macro_use]
mod error;
#[macro_use]
mod util;

pub mod btree;
mod cache;
mod codec;
pub mod database;
mod document;
pub mod hash;
pub mod registry;
mod shard;
mod store;
mod value;

pub use crate::btree::BtreeIndex;
pub use crate::cache::{Cache, EvictionPolicy, Lru, NoEviction, TwoLevelCache};
pub use crate::codec::{BinCodec, Codec};
pub use crate::database::{
    locking::{CooperativeDatabase, LockedDatabase, ParallelDatabase},
    Config, Database, FlushPolicy, IndexEntry, Query, SecondaryIndex,
};
pub use crate::document::Document;
pub use crate::error::{Error, Result};
pub use crate::hash::HashIndex;
pub use crate::registry::{IndexDef, IndexType, KeyFormat, Registry};
pub use crate::shard::{ShardFn, ShardedIndex};
pub use crate::store::{Handle, Status, StorageFile};
pub use crate::value::Value;
