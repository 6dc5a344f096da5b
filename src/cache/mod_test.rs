use super::*;

#[test]
fn test_get_put_hit_miss() {
    let mut cache: Cache<u64, String> = Cache::new(2);
    assert!(cache.get(&1).is_none());

    cache.put(1, "one".to_string());
    assert_eq!(cache.get(&1), Some(&"one".to_string()));
}

#[test]
fn test_lru_eviction_order() {
    let mut cache: Cache<u64, u64> = Cache::new(2);
    cache.put(1, 1);
    cache.put(2, 2);
    cache.get(&1); // 1 is now most-recently used; 2 is the LRU victim
    cache.put(3, 3);

    assert!(cache.get(&1).is_some());
    assert!(cache.get(&2).is_none());
    assert!(cache.get(&3).is_some());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_invalidate() {
    let mut cache: Cache<u64, u64> = Cache::new(4);
    cache.put(1, 1);
    cache.invalidate(&1);
    assert!(cache.get(&1).is_none());
}

#[test]
fn test_no_eviction_policy_never_caches() {
    let mut cache: Cache<u64, u64, NoEviction> = Cache::with_policy(10, NoEviction);
    cache.put(1, 1);
    assert!(cache.get(&1).is_some()); // map still holds it (capacity > 0)...
    cache.invalidate(&1);
    assert!(cache.get(&1).is_none());
}

#[test]
fn test_zero_capacity_cache_is_passthrough() {
    let mut cache: Cache<u64, u64> = Cache::new(0);
    cache.put(1, 1);
    assert!(cache.get(&1).is_none());
}

#[test]
fn test_two_level_cache_regions() {
    let mut cache: TwoLevelCache<String, u64, String> = TwoLevelCache::new(4);
    cache.put("idx-a".into(), 1, "a1".into());
    cache.put("idx-b".into(), 1, "b1".into());

    assert_eq!(cache.get(&"idx-a".to_string(), &1), Some(&"a1".to_string()));
    assert_eq!(cache.get(&"idx-b".to_string(), &1), Some(&"b1".to_string()));

    cache.invalidate_region(&"idx-a".to_string());
    assert!(cache.get(&"idx-a".to_string(), &1).is_none());
    assert!(cache.get(&"idx-b".to_string(), &1).is_some());
}
