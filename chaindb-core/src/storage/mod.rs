//! Storage engine - coordinates all storage components
//!
//! [`Db`] is a single-writer, leveled LSM database living in one
//! directory. It is guarded by an exclusive `LOCK` file and recovers from its
//! `MANIFEST` and write-ahead logs on open.

mod db;
mod lock;
mod manifest;
mod stats;
mod version;

pub use db::Db;
pub use lock::{FileLock, LOCK_FILE};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use stats::{CompactionCount, DbCounters, DbStats, IoCounters};
pub use version::{TableMeta, Version, VersionEdit};

use crate::config;
use crate::sstable::SSTableConfig;
use crate::wal::SyncPolicy;

/// Database options
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of open table files
    pub open_files_cache_capacity: usize,
    /// Block cache capacity in bytes
    pub block_cache_capacity: usize,
    /// Memtable size before it is frozen and flushed
    pub write_buffer_size: usize,
    /// Target uncompressed block size
    pub block_size: usize,
    /// LZ4-compress table blocks
    pub compression: bool,
    /// Bloom filter bits per key, 0 disables filters
    pub bloom_bits_per_key: usize,
    /// Never schedule compactions triggered by wasted seeks
    pub disable_seek_compaction: bool,
    /// Level-0 table count that triggers compaction
    pub l0_compaction_trigger: usize,
    /// Level-0 table count at which writes are slowed down
    pub l0_slowdown_trigger: usize,
    /// Level-0 table count at which writes pause
    pub l0_stop_trigger: usize,
    /// Target size of compaction output tables
    pub table_size: u64,
    /// Size budget of level 1
    pub base_level_size: u64,
    /// Size ratio between adjacent levels
    pub level_size_multiplier: u64,
    /// Number of levels
    pub max_levels: usize,
    /// WAL sync policy
    pub sync_policy: SyncPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            open_files_cache_capacity: config::DEFAULT_OPEN_FILES_CACHE_CAPACITY,
            block_cache_capacity: config::DEFAULT_BLOCK_CACHE_CAPACITY,
            write_buffer_size: config::DEFAULT_WRITE_BUFFER_SIZE,
            block_size: config::BLOCK_SIZE,
            compression: true,
            bloom_bits_per_key: config::BLOOM_BITS_PER_KEY,
            disable_seek_compaction: false,
            l0_compaction_trigger: config::L0_COMPACTION_TRIGGER,
            l0_slowdown_trigger: config::L0_SLOWDOWN_WRITES_TRIGGER,
            l0_stop_trigger: config::L0_STOP_WRITES_TRIGGER,
            table_size: config::TABLE_SIZE,
            base_level_size: config::BASE_LEVEL_SIZE,
            level_size_multiplier: config::LEVEL_SIZE_MULTIPLIER,
            max_levels: config::MAX_LEVELS,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl Options {
    /// Table format settings derived from these options
    pub fn sstable_config(&self) -> SSTableConfig {
        SSTableConfig {
            block_size: self.block_size,
            compression: self.compression,
            bloom_bits_per_key: self.bloom_bits_per_key,
        }
    }

    /// Size budget of a level >= 1
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let exponent = level.saturating_sub(1) as u32;
        self.base_level_size
            .saturating_mul(self.level_size_multiplier.saturating_pow(exponent))
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.max_levels < 2 {
            return Err(crate::Error::Config("max_levels must be at least 2".into()));
        }
        if self.write_buffer_size == 0 {
            return Err(crate::Error::Config("write_buffer_size must be positive".into()));
        }
        if self.open_files_cache_capacity == 0 {
            return Err(crate::Error::Config(
                "open_files_cache_capacity must be positive".into(),
            ));
        }
        if !(self.l0_compaction_trigger <= self.l0_slowdown_trigger
            && self.l0_slowdown_trigger <= self.l0_stop_trigger)
        {
            return Err(crate::Error::Config(
                "level-0 triggers must satisfy compaction <= slowdown <= stop".into(),
            ));
        }
        Ok(())
    }
}
