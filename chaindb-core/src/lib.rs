//! ChainDB Core - embedded key-value storage for blockchain data
//!
//! An LSM-tree storage engine plus the layer that adapts it for a
//! blockchain node:
//!
//! - **Engine**: WAL, skip-list memtable, leveled SSTables with bloom
//!   filters and a block cache, background compaction ([`storage::Db`])
//! - **Tuning**: environment-driven cache sizing and open-file limits
//!   ([`tuning`], [`limits`])
//! - **StorageEngine**: lifecycle, absence-as-`None` reads, statistics
//!   snapshots ([`engine`])
//! - **KeyValueStore**: the engine-agnostic contract callers depend on
//!   ([`kv`])
//! - **Metering**: periodic gauges and write-stall warnings ([`metering`])

pub mod compaction;
pub mod engine;
pub mod kv;
pub mod limits;
pub mod memtable;
pub mod metering;
pub mod sstable;
pub mod storage;
pub mod tuning;
pub mod wal;

mod error;

pub use engine::{StatsSnapshot, StorageEngine};
pub use error::{Error, ResourceLimitError, Result, StoreError};
pub use kv::{open_blockchain_storage, open_blockchain_storage_with_stats, KeyValueStore, LsmKv};
pub use limits::{LimitNegotiator, ProcessLimits};
pub use metering::{MetricsSink, RecorderSink, StatsSource};
pub use tuning::{EngineConfigResolver, EngineOptions, TuningConfig};

/// ChainDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    pub const MIB: usize = 1024 * 1024;

    /// SSTable block size (4KB)
    pub const BLOCK_SIZE: usize = 4 * 1024;

    /// Bloom filter bits per key
    pub const BLOOM_BITS_PER_KEY: usize = 10;

    /// Open table files kept in the table cache
    pub const DEFAULT_OPEN_FILES_CACHE_CAPACITY: usize = 500;

    /// Block cache capacity (8MB)
    pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 8 * MIB;

    /// MemTable size before it is flushed (4MB)
    pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * MIB;

    /// Level-0 tables that trigger compaction
    pub const L0_COMPACTION_TRIGGER: usize = 4;

    /// Level-0 tables at which each write is slowed down
    pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

    /// Level-0 tables at which writes pause
    pub const L0_STOP_WRITES_TRIGGER: usize = 12;

    /// Compaction output table size (2MB)
    pub const TABLE_SIZE: u64 = 2 * MIB as u64;

    /// Size budget of level 1 (10MB)
    pub const BASE_LEVEL_SIZE: u64 = 10 * MIB as u64;

    /// Size ratio between levels
    pub const LEVEL_SIZE_MULTIPLIER: u64 = 10;

    /// Number of levels
    pub const MAX_LEVELS: usize = 7;

    /// Interval between metering polls
    pub const METERING_INTERVAL: Duration = Duration::from_secs(5);

    /// Minimum gap between two write-stall warnings
    pub const WRITE_STALL_WARNING_INTERVAL: Duration = Duration::from_secs(60);

    /// Engine name used for chain data
    pub const BLOCKCHAIN_ENGINE_NAME: &str = "blockchain";
}
