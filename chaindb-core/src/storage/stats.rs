//! Engine statistics
//!
//! Counters are updated lock-free by the write path and the compaction
//! thread, then assembled into a [`DbStats`] snapshot on demand.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Raw bytes moved to and from disk
#[derive(Debug, Default)]
pub struct IoCounters {
    read: AtomicU64,
    write: AtomicU64,
}

impl IoCounters {
    pub fn add_read(&self, bytes: u64) {
        self.read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_write(&self, bytes: u64) {
        self.write.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.write.load(Ordering::Relaxed)
    }
}

/// Cumulative compaction work charged to one level
#[derive(Debug, Default)]
struct LevelCounters {
    duration_nanos: AtomicU64,
    read: AtomicU64,
    write: AtomicU64,
}

/// Which kind of compaction ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionCount {
    /// Memtable flushed to level 0
    Memtable,
    /// Level 0 merged into level 1
    Level0,
    /// Size-triggered merge of a deeper level
    NonLevel0,
    /// Merge triggered by wasted seeks
    Seek,
}

/// Lifetime counters of one open database
#[derive(Debug)]
pub struct DbCounters {
    write_delay_count: AtomicU64,
    write_delay_nanos: AtomicU64,
    write_paused: AtomicBool,
    mem_comp: AtomicU64,
    level0_comp: AtomicU64,
    non_level0_comp: AtomicU64,
    seek_comp: AtomicU64,
    levels: Vec<LevelCounters>,
}

impl DbCounters {
    pub fn new(max_levels: usize) -> Self {
        Self {
            write_delay_count: AtomicU64::new(0),
            write_delay_nanos: AtomicU64::new(0),
            write_paused: AtomicBool::new(false),
            mem_comp: AtomicU64::new(0),
            level0_comp: AtomicU64::new(0),
            non_level0_comp: AtomicU64::new(0),
            seek_comp: AtomicU64::new(0),
            levels: (0..max_levels).map(|_| LevelCounters::default()).collect(),
        }
    }

    /// Record one delayed write and how long it waited
    pub fn record_write_delay(&self, waited: Duration) {
        self.write_delay_count.fetch_add(1, Ordering::Relaxed);
        self.write_delay_nanos
            .fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set_write_paused(&self, paused: bool) {
        self.write_paused.store(paused, Ordering::Relaxed);
    }

    pub fn record_compaction(&self, kind: CompactionCount) {
        let counter = match kind {
            CompactionCount::Memtable => &self.mem_comp,
            CompactionCount::Level0 => &self.level0_comp,
            CompactionCount::NonLevel0 => &self.non_level0_comp,
            CompactionCount::Seek => &self.seek_comp,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Charge bytes read by a compaction to its input level
    pub fn add_level_read(&self, level: usize, bytes: u64) {
        if let Some(counters) = self.levels.get(level) {
            counters.read.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Charge output bytes and wall time to the level a compaction wrote
    pub fn add_level_write(&self, level: usize, bytes: u64, took: Duration) {
        if let Some(counters) = self.levels.get(level) {
            counters.write.fetch_add(bytes, Ordering::Relaxed);
            counters
                .duration_nanos
                .fetch_add(took.as_nanos() as u64, Ordering::Relaxed);
        }
    }
}

/// Point-in-time statistics of an open database
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbStats {
    pub write_delay_count: u64,
    pub write_delay_duration: Duration,
    pub write_paused: bool,

    pub io_read: u64,
    pub io_write: u64,

    pub block_cache_size: usize,
    pub open_table_count: usize,

    pub level_sizes: Vec<u64>,
    pub level_tables_counts: Vec<usize>,
    pub level_read: Vec<u64>,
    pub level_write: Vec<u64>,
    pub level_durations: Vec<Duration>,

    pub mem_comp: u64,
    pub level0_comp: u64,
    pub non_level0_comp: u64,
    pub seek_comp: u64,
}

impl DbStats {
    /// Assemble a snapshot; per-level vectors cover `0..levels`
    pub(crate) fn collect(
        counters: &DbCounters,
        io: &IoCounters,
        level_sizes: Vec<u64>,
        level_tables_counts: Vec<usize>,
        block_cache_size: usize,
        open_table_count: usize,
    ) -> Self {
        let levels = level_sizes.len();
        let per_level = counters.levels.iter().take(levels);

        Self {
            write_delay_count: counters.write_delay_count.load(Ordering::Relaxed),
            write_delay_duration: Duration::from_nanos(
                counters.write_delay_nanos.load(Ordering::Relaxed),
            ),
            write_paused: counters.write_paused.load(Ordering::Relaxed),
            io_read: io.read(),
            io_write: io.written(),
            block_cache_size,
            open_table_count,
            level_read: per_level
                .clone()
                .map(|l| l.read.load(Ordering::Relaxed))
                .collect(),
            level_write: per_level
                .clone()
                .map(|l| l.write.load(Ordering::Relaxed))
                .collect(),
            level_durations: per_level
                .map(|l| Duration::from_nanos(l.duration_nanos.load(Ordering::Relaxed)))
                .collect(),
            level_sizes,
            level_tables_counts,
            mem_comp: counters.mem_comp.load(Ordering::Relaxed),
            level0_comp: counters.level0_comp.load(Ordering::Relaxed),
            non_level0_comp: counters.non_level0_comp.load(Ordering::Relaxed),
            seek_comp: counters.seek_comp.load(Ordering::Relaxed),
        }
    }
}
