//! Persistent record of the table layout
//!
//! The manifest is rewritten in full after every flush and compaction:
//! written to a temporary file, synced, then renamed over `MANIFEST`.

use super::version::{TableMeta, Version, VersionEdit};
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

/// Manifest format version
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableRecord {
    level: usize,
    number: u64,
    file_size: u64,
    entry_count: u64,
    smallest: Vec<u8>,
    largest: Vec<u8>,
}

/// On-disk manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Logs older than this are fully reflected in tables
    pub log_number: u64,
    pub next_file_number: u64,
    tables: Vec<TableRecord>,
}

impl Manifest {
    /// Snapshot a version
    pub fn new(version: &Version, log_number: u64, next_file_number: u64) -> Self {
        let tables = version
            .all_tables()
            .map(|(level, t)| TableRecord {
                level,
                number: t.number,
                file_size: t.file_size,
                entry_count: t.entry_count,
                smallest: t.smallest.to_vec(),
                largest: t.largest.to_vec(),
            })
            .collect();

        Self {
            format_version: MANIFEST_VERSION,
            log_number,
            next_file_number,
            tables,
        }
    }

    /// Load the manifest of a database directory, if there is one
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest = serde_json::from_slice(&data)
            .map_err(|e| Error::InvalidFormat(format!("unreadable manifest: {}", e)))?;
        if manifest.format_version != MANIFEST_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }

        Ok(Some(manifest))
    }

    /// Atomically replace the manifest
    pub fn store(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Corruption(format!("failed to encode manifest: {}", e)))?;

        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;

        Ok(())
    }

    /// Rebuild the table layout
    pub fn to_version(&self, max_levels: usize) -> Result<Version> {
        let mut edit = VersionEdit::default();
        for record in &self.tables {
            if record.level >= max_levels {
                return Err(Error::InvalidFormat(format!(
                    "table {} on level {} beyond the configured {} levels",
                    record.number, record.level, max_levels
                )));
            }
            edit.add_table(
                record.level,
                Arc::new(TableMeta::new(
                    record.number,
                    record.file_size,
                    record.entry_count,
                    Bytes::from(record.smallest.clone()),
                    Bytes::from(record.largest.clone()),
                )),
            );
        }
        Ok(Version::new(max_levels).apply(&edit))
    }

    /// Numbers of all live tables
    pub fn table_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.tables.iter().map(|t| t.number)
    }
}
