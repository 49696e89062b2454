//! Write-Ahead Log (WAL) implementation
//!
//! Every write lands in the WAL before it reaches the memtable. Each memtable
//! owns exactly one log file; once the memtable is flushed to an SSTable the
//! log is obsolete and removed. On open, logs newer than the manifest's log
//! number are replayed.

mod entry;
mod reader;
mod writer;

pub use entry::{WalEntry, WalEntryType};
pub use reader::WalReader;
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

/// WAL sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after every write
    Immediate,
    /// Hand writes to the OS and leave syncing to rotation and close
    #[default]
    None,
}

/// Path of the log file with the given number
pub fn log_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

/// Parse a log file number from a file name
pub fn parse_log_number(name: &str) -> Option<u64> {
    name.strip_suffix(".log").and_then(|s| s.parse().ok())
}
