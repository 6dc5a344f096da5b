//! Bounded in-memory cache of `(file, offset) -> decoded entry`, the
//! engine's front end for repeat reads of hot records (spec.md §4.5).
//!
//! Eviction policy is a small pluggable interface
//! ([EvictionPolicy::record_hit]/[EvictionPolicy::insert]/
//! [EvictionPolicy::evict_one]); this module ships the default
//! ([Lru]) and the null policy ([NoEviction], used when the caller
//! wants the cache disabled outright). LFU and random-replacement
//! policies are external collaborators per spec.md §1 -- callers wire
//! their own [EvictionPolicy] impl in.
//!
//! Two shapes are exposed: [Cache], a flat key space, and
//! [TwoLevelCache], an outer key fanning out to an inner [Cache] --
//! used to give each index its own bounded cache region while still
//! sharing one capacity-evicting structure per outer key, grounded on
//! the teacher's `clru` split of hot-list bookkeeping from eviction
//! policy.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

/// Pluggable replacement policy. Implementations decide which key to
/// surrender when the cache is at capacity; the engine stays correct
/// under any policy, including one that never caches anything.
pub trait EvictionPolicy<K> {
    fn record_hit(&mut self, key: &K);
    fn insert(&mut self, key: K);
    fn remove(&mut self, key: &K);
    fn evict_one(&mut self) -> Option<K>;
}

/// Least-recently-used policy: a recency queue, most-recent at the
/// back. `record_hit`/`insert` are O(n) in the current queue length,
/// which is fine at the bounded sizes this cache is meant for; callers
/// wanting O(1) eviction at scale can supply their own policy.
#[derive(Default)]
pub struct Lru<K> {
    order: VecDeque<K>,
}

impl<K: Eq + Clone> Lru<K> {
    pub fn new() -> Lru<K> {
        Lru { order: VecDeque::new() }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }
}

impl<K: Eq + Clone> EvictionPolicy<K> for Lru<K> {
    fn record_hit(&mut self, key: &K) {
        self.touch(key);
    }

    fn insert(&mut self, key: K) {
        self.order.push_back(key);
    }

    fn remove(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    fn evict_one(&mut self) -> Option<K> {
        self.order.pop_front()
    }
}

/// A policy that never retains anything; [Cache::get] is always a
/// miss. Lets a caller disable caching without special-casing the
/// engine's read path.
#[derive(Default)]
pub struct NoEviction;

impl<K> EvictionPolicy<K> for NoEviction {
    fn record_hit(&mut self, _key: &K) {}
    fn insert(&mut self, _key: K) {}
    fn remove(&mut self, _key: &K) {}
    fn evict_one(&mut self) -> Option<K> {
        None
    }
}

/// Bounded `key -> value` memoization with pluggable eviction.
pub struct Cache<K, V, P = Lru<K>>
where
    K: Eq + Hash + Clone,
    P: EvictionPolicy<K>,
{
    map: HashMap<K, V>,
    policy: P,
    capacity: usize,
}

impl<K, V> Cache<K, V, Lru<K>>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Cache<K, V, Lru<K>> {
        Cache::with_policy(capacity, Lru::new())
    }
}

impl<K, V, P> Cache<K, V, P>
where
    K: Eq + Hash + Clone,
    P: EvictionPolicy<K>,
{
    pub fn with_policy(capacity: usize, policy: P) -> Cache<K, V, P> {
        Cache {
            map: HashMap::new(),
            policy,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.policy.record_hit(key);
            self.map.get(key)
        } else {
            None
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.map.contains_key(&key) {
            self.policy.record_hit(&key);
            self.map.insert(key, value);
            return;
        }
        while self.map.len() >= self.capacity {
            match self.policy.evict_one() {
                Some(victim) => {
                    self.map.remove(&victim);
                }
                None => break,
            }
        }
        self.policy.insert(key.clone());
        self.map.insert(key, value);
    }

    /// Drop `key` from the cache. Called on every mutation that
    /// invalidates the `(file, offset)` tuple it addresses, before the
    /// mutating call returns.
    pub fn invalidate(&mut self, key: &K) {
        self.policy.remove(key);
        self.map.remove(key);
    }

    pub fn clear(&mut self) {
        self.map.clear();
        while self.policy.evict_one().is_some() {}
    }
}

/// Outer key fanning out to a bounded inner [Cache], e.g. one region
/// per open index so a hot index can't starve another's cache budget.
pub struct TwoLevelCache<K1, K2, V>
where
    K1: Eq + Hash + Clone,
    K2: Eq + Hash + Clone,
{
    outer: HashMap<K1, Cache<K2, V>>,
    inner_capacity: usize,
}

impl<K1, K2, V> TwoLevelCache<K1, K2, V>
where
    K1: Eq + Hash + Clone,
    K2: Eq + Hash + Clone,
{
    pub fn new(inner_capacity: usize) -> TwoLevelCache<K1, K2, V> {
        TwoLevelCache {
            outer: HashMap::new(),
            inner_capacity,
        }
    }

    pub fn get(&mut self, outer: &K1, inner: &K2) -> Option<&V> {
        self.outer.get_mut(outer)?.get(inner)
    }

    pub fn put(&mut self, outer: K1, inner: K2, value: V) {
        self.outer
            .entry(outer)
            .or_insert_with(|| Cache::new(self.inner_capacity))
            .put(inner, value);
    }

    pub fn invalidate(&mut self, outer: &K1, inner: &K2) {
        if let Some(cache) = self.outer.get_mut(outer) {
            cache.invalidate(inner);
        }
    }

    /// Drop an entire outer region, e.g. when an index is destroyed or
    /// reindexed.
    pub fn invalidate_region(&mut self, outer: &K1) {
        self.outer.remove(outer);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
