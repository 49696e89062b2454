//! WAL writer implementation

use super::{log_path, SyncPolicy, WalEntry};
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends entries to a single log file
pub struct WalWriter {
    path: PathBuf,
    number: u64,
    sync_policy: SyncPolicy,
    file: BufWriter<File>,
    bytes_written: u64,
}

impl WalWriter {
    /// Create a new log file with the given number
    pub fn create(dir: &Path, number: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let path = log_path(dir, number);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            number,
            sync_policy,
            file: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Append an entry, returning the number of bytes written
    pub fn append(&mut self, entry: &WalEntry) -> Result<usize> {
        let serialized = entry.serialize_with_checksum();

        self.file.write_all(&serialized)?;
        // Always hand the bytes to the OS; fsync is governed by the policy
        self.file.flush()?;
        self.bytes_written += serialized.len() as u64;

        if self.sync_policy == SyncPolicy::Immediate {
            self.sync()?;
        }

        Ok(serialized.len())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Log file number
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wal_writer() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = WalWriter::create(temp_dir.path(), 7, SyncPolicy::Immediate).unwrap();

        let entry = WalEntry::put(b"head", b"block-100");
        let written = writer.append(&entry).unwrap();
        assert_eq!(written, entry.serialize_with_checksum().len());
        assert_eq!(writer.bytes_written(), written as u64);
        assert_eq!(writer.number(), 7);

        writer.sync().unwrap();
        let on_disk = std::fs::metadata(writer.path()).unwrap().len();
        assert_eq!(on_disk, written as u64);
    }
}
