//! SSTable (Sorted String Table) implementation
//!
//! Immutable on-disk storage of sorted key/value entries with:
//! - Block-based format with optional LZ4 compression and CRC32 checksums
//! - A sparse index of each block's last key
//! - A bloom filter over all keys for fast negative lookups
//!
//! File layout:
//!
//! ```text
//! header | data block* | index | bloom | footer (36 bytes)
//! ```

mod block;
mod bloom;
mod builder;
mod cache;
mod reader;

pub use block::{BlockBuilder, DataBlock};
pub use bloom::BloomFilter;
pub use builder::{BuiltTable, SSTableBuilder};
pub use cache::{BlockCache, LruCache, TableCache};
pub use reader::SSTableReader;

use std::path::{Path, PathBuf};

/// SSTable file format version
pub const FORMAT_VERSION: u32 = 1;

/// Magic number at both ends of every table
pub const MAGIC: &[u8; 4] = b"CHDB";

/// Header: magic, version, entry count
pub const HEADER_SIZE: usize = 16;

/// Footer: index and bloom offsets/sizes plus magic
pub const FOOTER_SIZE: usize = 36;

/// SSTable configuration
#[derive(Debug, Clone)]
pub struct SSTableConfig {
    /// Target uncompressed block size in bytes
    pub block_size: usize,
    /// Enable LZ4 block compression
    pub compression: bool,
    /// Bloom filter bits per key, 0 disables the filter
    pub bloom_bits_per_key: usize,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            block_size: crate::config::BLOCK_SIZE,
            compression: true,
            bloom_bits_per_key: crate::config::BLOOM_BITS_PER_KEY,
        }
    }
}

/// Path of the table file with the given number
pub fn table_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

/// Parse a table file number from a file name
pub fn parse_table_number(name: &str) -> Option<u64> {
    name.strip_suffix(".sst").and_then(|s| s.parse().ok())
}
