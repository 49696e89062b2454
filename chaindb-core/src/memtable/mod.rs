//! MemTable implementation using a concurrent skip list
//!
//! The MemTable holds recent writes in key order. Deletes are kept as
//! tombstones (`None`) so they shadow older values in SSTables until
//! compaction drops them.

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bookkeeping bytes charged per entry on top of key and value
const ENTRY_OVERHEAD: usize = 16;

/// Lookup result inside a single layer of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Key holds a value
    Value(Bytes),
    /// Key was deleted; older layers must not be consulted
    Deleted,
}

impl Lookup {
    fn from_slot(slot: &Option<Bytes>) -> Self {
        match slot {
            Some(value) => Lookup::Value(value.clone()),
            None => Lookup::Deleted,
        }
    }

    /// Convert into the public read result
    pub fn into_value(self) -> Option<Bytes> {
        match self {
            Lookup::Value(value) => Some(value),
            Lookup::Deleted => None,
        }
    }
}

/// MemTable for in-memory writes
pub struct MemTable {
    /// Skip list keyed by user key, `None` marks a delete
    data: SkipMap<Bytes, Option<Bytes>>,
    /// Approximate size in bytes
    size_bytes: AtomicUsize,
    /// Number of the WAL file backing this memtable
    log_number: u64,
}

impl MemTable {
    /// Create a new MemTable backed by the given log
    pub fn new(log_number: u64) -> Self {
        Self {
            data: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            log_number,
        }
    }

    /// Number of the WAL file backing this memtable
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Insert a value, or a tombstone when `value` is `None`
    pub fn insert(&self, key: Bytes, value: Option<Bytes>) {
        let entry_size =
            key.len() + value.as_ref().map_or(0, |v| v.len()) + ENTRY_OVERHEAD;
        self.data.insert(key, value);
        self.size_bytes.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Option<Lookup> {
        self.data
            .get(key)
            .map(|entry| Lookup::from_slot(entry.value()))
    }

    /// Check if the MemTable has outgrown the given budget
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size_bytes.load(Ordering::Relaxed) >= size_limit
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// All entries in key order
    pub fn iter(&self) -> Vec<(Bytes, Option<Bytes>)> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Frozen MemTable waiting to be flushed
///
/// Readers that grabbed the memtable before it was frozen may still hold
/// the shared handle, so freezing does not take ownership.
pub struct ImmutableMemTable {
    inner: Arc<MemTable>,
}

impl ImmutableMemTable {
    /// Freeze a MemTable
    pub fn from(memtable: Arc<MemTable>) -> Self {
        Self { inner: memtable }
    }

    /// Number of the WAL file backing this memtable
    pub fn log_number(&self) -> u64 {
        self.inner.log_number()
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Option<Lookup> {
        self.inner.get(key)
    }

    /// All entries in key order
    pub fn iter(&self) -> Vec<(Bytes, Option<Bytes>)> {
        self.inner.iter()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
