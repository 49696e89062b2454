//! Block cache and open-table cache
//!
//! Both are charge-bounded LRU maps. The block cache is charged in bytes
//! (block capacity), the table cache in open files (open files capacity).

use super::{table_path, DataBlock, SSTableReader};
use crate::storage::IoCounters;
use crate::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

struct CacheEntry<V> {
    value: V,
    charge: usize,
    tick: u64,
}

/// Least-recently-used map bounded by total charge
pub struct LruCache<K, V> {
    capacity: usize,
    usage: usize,
    tick: u64,
    entries: HashMap<K, CacheEntry<V>>,
    /// Access tick -> key, oldest first
    order: BTreeMap<u64, K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` units of charge
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            usage: 0,
            tick: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    /// Look up a key and mark it as most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    /// Insert a value, evicting least recently used entries over capacity
    ///
    /// Returns the evicted values.
    pub fn insert(&mut self, key: K, value: V, charge: usize) -> Vec<V> {
        let mut evicted = Vec::new();
        if let Some(old) = self.remove(&key) {
            evicted.push(old);
        }

        self.tick += 1;
        self.usage += charge;
        self.order.insert(self.tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                charge,
                tick: self.tick,
            },
        );

        while self.usage > self.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.usage -= entry.charge;
                evicted.push(entry.value);
            }
        }

        evicted
    }

    /// Remove a key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        self.usage -= entry.charge;
        Some(entry.value)
    }

    /// Remove every entry matching a predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let doomed: Vec<K> = self.entries.keys().filter(|k| !keep(k)).cloned().collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.usage = 0;
    }

    /// Total charge currently held
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared cache of decoded data blocks keyed by (table number, block offset)
pub struct BlockCache {
    inner: Mutex<LruCache<(u64, u64), Arc<DataBlock>>>,
}

impl BlockCache {
    /// Create a block cache with a byte capacity
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity_bytes)),
        }
    }

    /// Look up a block
    pub fn get(&self, table: u64, offset: u64) -> Option<Arc<DataBlock>> {
        self.inner.lock().get(&(table, offset))
    }

    /// Cache a block
    pub fn insert(&self, table: u64, offset: u64, block: Arc<DataBlock>) {
        let charge = block.charge();
        self.inner.lock().insert((table, offset), block, charge);
    }

    /// Drop all blocks of a table
    pub fn evict_table(&self, table: u64) {
        self.inner.lock().retain(|(number, _)| *number != table);
    }

    /// Bytes held
    pub fn size(&self) -> usize {
        self.inner.lock().usage()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Cache of open table readers, bounded by the number of open files
pub struct TableCache {
    dir: PathBuf,
    readers: Mutex<LruCache<u64, Arc<SSTableReader>>>,
    block_cache: Arc<BlockCache>,
    io: Arc<IoCounters>,
}

impl TableCache {
    /// Create a table cache over a database directory
    pub fn new(
        dir: PathBuf,
        capacity: usize,
        block_cache: Arc<BlockCache>,
        io: Arc<IoCounters>,
    ) -> Self {
        Self {
            dir,
            readers: Mutex::new(LruCache::new(capacity)),
            block_cache,
            io,
        }
    }

    /// Get an open reader for a table, opening the file if needed
    pub fn get(&self, number: u64) -> Result<Arc<SSTableReader>> {
        if let Some(reader) = self.readers.lock().get(&number) {
            return Ok(reader);
        }

        // Open outside the lock; a racing open of the same table is harmless
        let reader = Arc::new(SSTableReader::open(
            table_path(&self.dir, number),
            number,
            Arc::clone(&self.block_cache),
            Arc::clone(&self.io),
        )?);

        self.readers.lock().insert(number, Arc::clone(&reader), 1);
        Ok(reader)
    }

    /// Forget a table, e.g. after compaction deleted it
    pub fn evict(&self, number: u64) {
        self.readers.lock().remove(&number);
        self.block_cache.evict_table(number);
    }

    /// Number of open tables
    pub fn open_count(&self) -> usize {
        self.readers.lock().len()
    }

    /// Close every open table
    pub fn clear(&self) {
        self.readers.lock().clear();
        self.block_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_oldest() {
        let mut cache = LruCache::new(3);
        cache.insert("a", 1, 1);
        cache.insert("b", 2, 1);
        cache.insert("c", 3, 1);

        // Touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(1));

        let evicted = cache.insert("d", 4, 1);
        assert_eq!(evicted, vec![2]);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.usage(), 3);
    }

    #[test]
    fn test_lru_respects_charge() {
        let mut cache = LruCache::new(10);
        cache.insert(1u64, "small", 4);
        cache.insert(2u64, "big", 8);

        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some("big"));
        assert_eq!(cache.usage(), 8);
    }

    #[test]
    fn test_lru_zero_capacity_holds_nothing() {
        let mut cache = LruCache::new(0);
        cache.insert(1u64, 1u64, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.usage(), 0);
    }

    #[test]
    fn test_lru_replace_and_retain() {
        let mut cache = LruCache::new(100);
        cache.insert((1u64, 0u64), 'a', 10);
        cache.insert((1u64, 0u64), 'b', 20);
        cache.insert((2u64, 0u64), 'c', 5);
        assert_eq!(cache.usage(), 25);

        cache.retain(|(table, _)| *table != 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage(), 5);
    }
}
