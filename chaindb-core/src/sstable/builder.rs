//! SSTable builder for writing sorted data to disk
//!
//! Blocks are streamed to the file as they fill up, so memory use stays
//! bounded by one block plus the index and the key set of the bloom filter.

use super::{BlockBuilder, BloomFilter, SSTableConfig, FOOTER_SIZE, FORMAT_VERSION, MAGIC};
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Summary of a table written to disk
#[derive(Debug, Clone)]
pub struct BuiltTable {
    pub number: u64,
    pub path: PathBuf,
    pub file_size: u64,
    pub entry_count: u64,
    pub smallest: Bytes,
    pub largest: Bytes,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    last_key: Bytes,
    offset: u64,
    size: u32,
}

/// SSTable builder
pub struct SSTableBuilder {
    config: SSTableConfig,
    path: PathBuf,
    number: u64,
    file: BufWriter<File>,
    offset: u64,

    block: BlockBuilder,
    index: Vec<IndexEntry>,
    keys: Vec<Bytes>,

    entry_count: u64,
    smallest: Option<Bytes>,
    largest: Option<Bytes>,
}

impl SSTableBuilder {
    /// Create the table file and write its header
    pub fn new(path: PathBuf, number: u64, config: SSTableConfig) -> Result<Self> {
        let mut file = BufWriter::new(File::create(&path)?);

        let header = Self::encode_header(0);
        file.write_all(&header)?;

        Ok(Self {
            config,
            path,
            number,
            file,
            offset: header.len() as u64,
            block: BlockBuilder::new(),
            index: Vec::new(),
            keys: Vec::new(),
            entry_count: 0,
            smallest: None,
            largest: None,
        })
    }

    /// Add an entry; keys must arrive in strictly increasing order
    pub fn add(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let key = Bytes::copy_from_slice(key);

        debug_assert!(
            self.largest.as_ref().map_or(true, |last| *last < key),
            "keys added out of order"
        );

        if self.smallest.is_none() {
            self.smallest = Some(key.clone());
        }
        self.largest = Some(key.clone());
        self.entry_count += 1;

        if self.config.bloom_bits_per_key > 0 {
            self.keys.push(key.clone());
        }
        self.block.add(key, value.map(Bytes::copy_from_slice));

        if self.block.estimated_size() >= self.config.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    /// Bytes written so far plus the pending block
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block.estimated_size() as u64
    }

    /// Entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(last_key) = self.block.last_key().cloned() else {
            return Ok(());
        };

        let bytes = self.block.finish().to_bytes(self.config.compression);
        self.file.write_all(&bytes)?;

        self.index.push(IndexEntry {
            last_key,
            offset: self.offset,
            size: bytes.len() as u32,
        });
        self.offset += bytes.len() as u64;

        Ok(())
    }

    /// Write index, bloom filter and footer, then sync the file
    pub fn finish(mut self) -> Result<BuiltTable> {
        self.flush_block()?;

        let smallest = self.smallest.take().unwrap_or_default();
        let largest = self.largest.take().unwrap_or_default();

        let index = self.encode_index(&smallest);
        let index_offset = self.offset;
        self.file.write_all(&index)?;
        self.offset += index.len() as u64;

        let bloom = self.encode_bloom();
        let bloom_offset = self.offset;
        self.file.write_all(&bloom)?;
        self.offset += bloom.len() as u64;

        let mut footer = BytesMut::with_capacity(FOOTER_SIZE);
        footer.put_u64_le(index_offset);
        footer.put_u64_le(index.len() as u64);
        footer.put_u64_le(bloom_offset);
        footer.put_u64_le(bloom.len() as u64);
        footer.put_slice(MAGIC);
        self.file.write_all(&footer)?;
        self.offset += footer.len() as u64;

        // Patch the entry count into the header now that it is known
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&Self::encode_header(self.entry_count))?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        Ok(BuiltTable {
            number: self.number,
            path: self.path,
            file_size: self.offset,
            entry_count: self.entry_count,
            smallest,
            largest,
        })
    }

    /// Drop a half-written table
    pub fn abandon(self) {
        let path = self.path.clone();
        drop(self.file);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove abandoned table");
        }
    }

    fn encode_header(entry_count: u64) -> BytesMut {
        let mut buf = BytesMut::with_capacity(super::HEADER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u64_le(entry_count);
        buf
    }

    fn encode_index(&self, smallest: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.index.len() as u32);
        for entry in &self.index {
            buf.put_u32_le(entry.last_key.len() as u32);
            buf.put_slice(&entry.last_key);
            buf.put_u64_le(entry.offset);
            buf.put_u32_le(entry.size);
        }

        buf.put_u32_le(smallest.len() as u32);
        buf.put_slice(smallest);

        buf
    }

    fn encode_bloom(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        if self.config.bloom_bits_per_key == 0 {
            buf.put_u32_le(0);
            buf.put_u8(0);
            return buf;
        }

        let filter = BloomFilter::build(
            self.keys.iter().map(|k| k.as_ref()),
            self.config.bloom_bits_per_key,
        );
        let bits = filter.as_bytes();
        buf.put_u32_le(bits.len() as u32);
        buf.put_u8(filter.num_hashes() as u8);
        buf.put_slice(bits);

        buf
    }
}
