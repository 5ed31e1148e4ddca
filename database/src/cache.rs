//! LRU caches in front of RocksDB column families.
//!
//! [`ReadCache`] is a plain bounded cache for immutable values (headers,
//! blocks). [`WriteBackCache`] holds modified entries until they are flushed
//! and never drops a dirty entry without handing it to the caller first.

use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Approximate heap footprint of a cached value, used for byte budgets
pub trait CacheSize {
    fn cache_size(&self) -> usize;
}

impl CacheSize for consensus_core::tx::UtxoEntry {
    fn cache_size(&self) -> usize {
        self.mem_size()
    }
}

/// Bounded LRU cache for values that never change once written
pub struct ReadCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> ReadCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))) }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cached slot. `None` records that the key is known to be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub dirty: bool,
}

/// Per-entry bookkeeping overhead charged against the byte budget
const ENTRY_OVERHEAD: usize = 64;

/// Write-back LRU cache bounded by entry count and bytes.
///
/// Not synchronized; owners wrap it in their own lock.
pub struct WriteBackCache<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    max_entries: usize,
    max_bytes: usize,
    bytes: usize,
}

impl<K: Hash + Eq + Clone, V: Clone + CacheSize> WriteBackCache<K, V> {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self { entries: LruCache::unbounded(), max_entries: max_entries.max(1), max_bytes, bytes: 0 }
    }

    fn entry_size(entry: &CacheEntry<V>) -> usize {
        ENTRY_OVERHEAD + std::mem::size_of::<K>() + entry.value.as_ref().map_or(0, CacheSize::cache_size)
    }

    fn put(&mut self, key: K, entry: CacheEntry<V>) {
        self.bytes += Self::entry_size(&entry);
        if let Some(old) = self.entries.put(key, entry) {
            self.bytes -= Self::entry_size(&old);
        }
    }

    /// Cached state of `key`, refreshing its recency. `None` is a miss.
    pub fn get(&mut self, key: &K) -> Option<Option<V>> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.peek(key)
    }

    /// Populates the cache from the backing store. Never overrides a cached entry.
    pub fn insert_clean(&mut self, key: K, value: Option<V>) {
        if !self.entries.contains(&key) {
            self.put(key, CacheEntry { value, dirty: false });
        }
    }

    /// Records a modification that the backing store has not seen yet
    pub fn write(&mut self, key: K, value: Option<V>) {
        self.put(key, CacheEntry { value, dirty: true });
    }

    /// Puts back a slot captured with [`Self::peek`]; `None` drops the key
    pub fn restore(&mut self, key: K, slot: Option<CacheEntry<V>>) {
        match slot {
            Some(entry) => self.put(key, entry),
            None => {
                if let Some(old) = self.entries.pop(&key) {
                    self.bytes -= Self::entry_size(&old);
                }
            }
        }
    }

    pub fn dirty_entries(&self) -> Vec<(K, Option<V>)> {
        self.entries.iter().filter(|(_, entry)| entry.dirty).map(|(key, entry)| (key.clone(), entry.value.clone())).collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.iter().filter(|(_, entry)| entry.dirty).count()
    }

    pub fn mark_clean(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            entry.dirty = false;
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.entries.len() > self.max_entries || self.bytes > self.max_bytes
    }

    /// Evicts least-recently-used entries until the cache fits its budget.
    /// When the next victim is dirty, every dirty entry is first handed to
    /// `flush` and the cache is marked clean. Returns the number evicted.
    pub fn shrink<E>(&mut self, mut flush: impl FnMut(Vec<(K, Option<V>)>) -> Result<(), E>) -> Result<usize, E> {
        let mut evicted = 0;
        while self.is_over_budget() {
            let victim_dirty = match self.entries.peek_lru() {
                Some((_, entry)) => entry.dirty,
                None => break,
            };
            if victim_dirty {
                flush(self.dirty_entries())?;
                self.mark_clean();
            }
            if let Some((_, entry)) = self.entries.pop_lru() {
                self.bytes -= Self::entry_size(&entry);
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl CacheSize for u64 {
        fn cache_size(&self) -> usize {
            8
        }
    }

    #[test]
    fn read_cache_evicts_least_recent() {
        let c = ReadCache::new(2);
        c.insert(1u32, "one");
        c.insert(2u32, "two");
        assert_eq!(c.get(&1u32), Some("one"));
        c.insert(3u32, "three");
        assert_eq!(c.len(), 2);
        assert!(c.contains(&1));
        assert!(!c.contains(&2));
    }

    #[test]
    fn clean_entries_are_dropped_silently() {
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(2, usize::MAX);
        cache.insert_clean(1, Some(10));
        cache.insert_clean(2, None);
        cache.insert_clean(3, Some(30));
        let evicted = cache.shrink(|_| -> Result<(), ()> { panic!("nothing dirty to flush") }).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(None));
    }

    #[test]
    fn dirty_victim_triggers_full_flush() {
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(2, usize::MAX);
        cache.write(1, Some(10));
        cache.write(2, None);
        cache.insert_clean(3, Some(30));

        let mut flushed = Vec::new();
        cache
            .shrink(|batch| {
                flushed.extend(batch);
                Ok::<_, ()>(())
            })
            .unwrap();

        flushed.sort();
        assert_eq!(flushed, vec![(1, Some(10)), (2, None)]);
        assert_eq!(cache.dirty_count(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_flush_keeps_entries_dirty() {
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(1, usize::MAX);
        cache.write(1, Some(1));
        cache.write(2, Some(2));
        assert_eq!(cache.shrink(|_| Err("disk full")), Err("disk full"));
        assert_eq!(cache.dirty_count(), 2);
    }

    #[test]
    fn restore_puts_back_captured_slots() {
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(10, usize::MAX);
        cache.insert_clean(1, Some(1));
        let before = (cache.peek(&1).cloned(), cache.peek(&2).cloned(), cache.bytes());

        cache.write(1, None);
        cache.write(2, Some(2));
        cache.restore(1, before.0);
        cache.restore(2, before.1);

        assert_eq!(cache.peek(&1), Some(&CacheEntry { value: Some(1), dirty: false }));
        assert_eq!(cache.peek(&2), None);
        assert_eq!(cache.bytes(), before.2);
    }

    #[test]
    fn insert_clean_does_not_override_writes() {
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(10, usize::MAX);
        cache.write(1, None);
        cache.insert_clean(1, Some(5));
        assert_eq!(cache.peek(&1), Some(&CacheEntry { value: None, dirty: true }));
    }

    #[test]
    fn byte_budget_is_enforced() {
        let per_entry = ENTRY_OVERHEAD + std::mem::size_of::<u32>() + 8;
        let mut cache: WriteBackCache<u32, u64> = WriteBackCache::new(100, per_entry * 3);
        for i in 0..5 {
            cache.insert_clean(i, Some(i as u64));
        }
        cache.shrink(|_| Ok::<_, ()>(())).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.bytes(), per_entry * 3);
    }
}
