//! SSTable reader for point lookups and full scans

use super::{BlockCache, BloomFilter, DataBlock, FOOTER_SIZE, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::memtable::Lookup;
use crate::storage::IoCounters;
use crate::{Error, Result};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct IndexEntry {
    last_key: Bytes,
    offset: u64,
    size: u32,
}

/// SSTable reader
pub struct SSTableReader {
    number: u64,
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    entry_count: u64,
    index: Vec<IndexEntry>,
    smallest: Bytes,
    largest: Bytes,
    bloom_filter: BloomFilter,
    block_cache: Arc<BlockCache>,
    io: Arc<IoCounters>,
}

impl SSTableReader {
    /// Open an SSTable file, loading its index and bloom filter
    pub fn open(
        path: PathBuf,
        number: u64,
        block_cache: Arc<BlockCache>,
        io: Arc<IoCounters>,
    ) -> Result<Self> {
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(Error::InvalidFormat(format!(
                "SSTable {} too short: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer)?;

        let mut cursor = std::io::Cursor::new(&footer[..]);
        let index_offset = cursor.get_u64_le();
        let index_size = cursor.get_u64_le();
        let bloom_offset = cursor.get_u64_le();
        let bloom_size = cursor.get_u64_le();
        if &footer[32..] != MAGIC {
            return Err(Error::InvalidFormat("Invalid SSTable magic".into()));
        }

        let data_end = file_size - FOOTER_SIZE as u64;
        if index_offset + index_size > data_end || bloom_offset + bloom_size > data_end {
            return Err(Error::Corruption(format!(
                "SSTable {} footer points past end of file",
                path.display()
            )));
        }

        // Header
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(Error::InvalidFormat("Invalid SSTable header".into()));
        }
        let mut cursor = std::io::Cursor::new(&header[4..]);
        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }
        let entry_count = cursor.get_u64_le();

        let index_data = read_at(&mut file, index_offset, index_size as usize)?;
        let (index, smallest) = Self::parse_index(&index_data)?;

        let bloom_data = read_at(&mut file, bloom_offset, bloom_size as usize)?;
        let bloom_filter = Self::parse_bloom(&bloom_data)?;

        io.add_read(index_size + bloom_size + (HEADER_SIZE + FOOTER_SIZE) as u64);

        let largest = index
            .last()
            .map(|entry| entry.last_key.clone())
            .unwrap_or_default();

        Ok(Self {
            number,
            path,
            file: Mutex::new(file),
            file_size,
            entry_count,
            index,
            smallest,
            largest,
            bloom_filter,
            block_cache,
            io,
        })
    }

    /// Table file number
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path of the table file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the table file in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Entries stored, tombstones included
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Smallest key
    pub fn smallest(&self) -> &Bytes {
        &self.smallest
    }

    /// Largest key
    pub fn largest(&self) -> &Bytes {
        &self.largest
    }

    /// Point lookup
    ///
    /// `None` means the table holds nothing for the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Lookup>> {
        if self.index.is_empty() || key < self.smallest.as_ref() || key > self.largest.as_ref() {
            return Ok(None);
        }
        if !self.bloom_filter.may_contain(key) {
            return Ok(None);
        }

        // First block whose last key is >= the search key
        let idx = self
            .index
            .partition_point(|entry| entry.last_key.as_ref() < key);
        let Some(entry) = self.index.get(idx) else {
            return Ok(None);
        };

        let block = self.cached_block(entry)?;
        Ok(block.get(key))
    }

    /// Every entry in key order, bypassing the block cache
    pub fn entries(&self) -> Result<Vec<(Bytes, Option<Bytes>)>> {
        let mut entries = Vec::with_capacity(self.entry_count as usize);
        for entry in &self.index {
            let block = self.read_block(entry)?;
            entries.extend(block.entries);
        }
        Ok(entries)
    }

    fn cached_block(&self, entry: &IndexEntry) -> Result<Arc<DataBlock>> {
        if let Some(block) = self.block_cache.get(self.number, entry.offset) {
            return Ok(block);
        }

        let block = Arc::new(self.read_block(entry)?);
        self.block_cache
            .insert(self.number, entry.offset, Arc::clone(&block));
        Ok(block)
    }

    fn read_block(&self, entry: &IndexEntry) -> Result<DataBlock> {
        let data = {
            let mut file = self.file.lock();
            read_at(&mut file, entry.offset, entry.size as usize)?
        };
        self.io.add_read(entry.size as u64);

        DataBlock::from_bytes(&data).map_err(|e| match e {
            Error::ChecksumMismatch { .. } | Error::Corruption(_) => Error::Corruption(format!(
                "table {} block at {}: {}",
                self.number, entry.offset, e
            )),
            other => other,
        })
    }

    fn parse_index(data: &[u8]) -> Result<(Vec<IndexEntry>, Bytes)> {
        let short = || Error::Corruption("SSTable index truncated".into());

        let mut cursor = std::io::Cursor::new(data);
        if cursor.remaining() < 4 {
            return Err(short());
        }
        let count = cursor.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count.min(data.len()));

        for _ in 0..count {
            let last_key = take_key(&mut cursor, data).ok_or_else(short)?;
            if cursor.remaining() < 12 {
                return Err(short());
            }
            let offset = cursor.get_u64_le();
            let size = cursor.get_u32_le();

            entries.push(IndexEntry {
                last_key,
                offset,
                size,
            });
        }

        let smallest = take_key(&mut cursor, data).ok_or_else(short)?;

        Ok((entries, smallest))
    }

    fn parse_bloom(data: &[u8]) -> Result<BloomFilter> {
        if data.len() < 5 {
            return Err(Error::InvalidFormat("Bloom filter data too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);
        let size = cursor.get_u32_le() as usize;
        let num_hashes = cursor.get_u8() as usize;

        let pos = cursor.position() as usize;
        if pos + size > data.len() {
            return Err(Error::Corruption("Bloom filter truncated".into()));
        }

        Ok(BloomFilter::from_bytes(data[pos..pos + size].to_vec(), num_hashes))
    }
}

fn read_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn take_key(cursor: &mut std::io::Cursor<&[u8]>, data: &[u8]) -> Option<Bytes> {
    if cursor.remaining() < 4 {
        return None;
    }
    let len = cursor.get_u32_le() as usize;
    if cursor.remaining() < len {
        return None;
    }
    let pos = cursor.position() as usize;
    cursor.set_position((pos + len) as u64);
    Some(Bytes::copy_from_slice(&data[pos..pos + len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{table_path, SSTableBuilder, SSTableConfig};
    use tempfile::TempDir;

    fn build_table(dir: &Path, config: SSTableConfig) -> crate::sstable::BuiltTable {
        let mut builder = SSTableBuilder::new(table_path(dir, 7), 7, config).unwrap();
        for i in 0..2000u32 {
            let key = format!("block:{:06}", i);
            if i % 100 == 0 {
                builder.add(key.as_bytes(), None).unwrap();
            } else {
                builder
                    .add(key.as_bytes(), Some(format!("body-{}", i).as_bytes()))
                    .unwrap();
            }
        }
        builder.finish().unwrap()
    }

    fn open(dir: &Path) -> (SSTableReader, Arc<IoCounters>) {
        let io = Arc::new(IoCounters::default());
        let reader = SSTableReader::open(
            table_path(dir, 7),
            7,
            Arc::new(BlockCache::new(1 << 20)),
            Arc::clone(&io),
        )
        .unwrap();
        (reader, io)
    }

    #[test]
    fn test_write_then_lookup() {
        let dir = TempDir::new().unwrap();
        let built = build_table(dir.path(), SSTableConfig::default());
        assert_eq!(built.entry_count, 2000);
        assert_eq!(built.smallest.as_ref(), b"block:000000");
        assert_eq!(built.largest.as_ref(), b"block:001999");

        let (reader, io) = open(dir.path());
        assert_eq!(reader.entry_count(), 2000);
        assert_eq!(reader.file_size(), built.file_size);

        assert_eq!(
            reader.get(b"block:001234").unwrap(),
            Some(Lookup::Value(Bytes::from("body-1234")))
        );
        assert_eq!(reader.get(b"block:000300").unwrap(), Some(Lookup::Deleted));
        assert_eq!(reader.get(b"block:999999").unwrap(), None);
        assert_eq!(reader.get(b"aaa").unwrap(), None);
        assert!(io.read() > 0);
    }

    #[test]
    fn test_lookup_without_bloom_or_compression() {
        let dir = TempDir::new().unwrap();
        let config = SSTableConfig {
            block_size: 256,
            compression: false,
            bloom_bits_per_key: 0,
        };
        build_table(dir.path(), config);

        let (reader, _) = open(dir.path());
        assert_eq!(
            reader.get(b"block:000001").unwrap(),
            Some(Lookup::Value(Bytes::from("body-1")))
        );
        assert_eq!(reader.get(b"block:0000015").unwrap(), None);
    }

    #[test]
    fn test_entries_in_order() {
        let dir = TempDir::new().unwrap();
        build_table(dir.path(), SSTableConfig::default());

        let (reader, _) = open(dir.path());
        let entries = reader.entries().unwrap();
        assert_eq!(entries.len(), 2000);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(entries[0].1.is_none());
    }

    #[test]
    fn test_corrupt_footer_rejected() {
        let dir = TempDir::new().unwrap();
        build_table(dir.path(), SSTableConfig::default());

        let path = table_path(dir.path(), 7);
        let mut data = std::fs::read(&path).unwrap();
        let len = data.len();
        data[len - 1] = b'X';
        std::fs::write(&path, data).unwrap();

        let result = SSTableReader::open(
            path,
            7,
            Arc::new(BlockCache::new(1024)),
            Arc::new(IoCounters::default()),
        );
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_abandon_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = table_path(dir.path(), 3);
        let mut builder = SSTableBuilder::new(path.clone(), 3, SSTableConfig::default()).unwrap();
        builder.add(b"k", Some(b"v")).unwrap();
        builder.abandon();
        assert!(!path.exists());
    }
}
