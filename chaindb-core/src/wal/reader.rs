//! WAL reader for recovery

use super::{parse_log_number, WalEntry};
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;

/// WAL reader for recovering entries after a crash or a clean close
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    /// Create a new WAL reader over a database directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Log files in the directory, oldest first
    pub fn find_logs(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut logs = Vec::new();

        if !self.dir.exists() {
            return Ok(logs);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(number) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_log_number)
            {
                logs.push((number, path));
            }
        }

        logs.sort_by_key(|(number, _)| *number);

        Ok(logs)
    }

    /// Read every intact entry of a log file
    ///
    /// A torn or corrupted tail ends the log; everything before it is kept.
    /// Returns the entries and the number of bytes read.
    pub fn read_log(path: &Path) -> Result<(Vec<WalEntry>, usize)> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::deserialize_with_checksum(&data[offset..]) {
                Ok((entry, bytes_read)) => {
                    entries.push(entry);
                    offset += bytes_read;
                }
                Err(Error::ChecksumMismatch { .. }) | Err(Error::Corruption(_)) => {
                    warn!(
                        "Corrupted entry at offset {} in {:?}, truncating",
                        offset, path
                    );
                    break;
                }
                Err(Error::InvalidFormat(_)) => {
                    // Incomplete entry at end (crash during write)
                    break;
                }
                Err(e) => {
                    return Err(Error::WalRecovery(format!("{:?}: {}", path, e)));
                }
            }
        }

        Ok((entries, data.len()))
    }
}
