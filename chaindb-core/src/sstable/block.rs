//! SSTable data block implementation

use crate::memtable::Lookup;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Per-entry framing: key length, flag, value length
const ENTRY_FRAMING: usize = 9;

const FLAG_DELETED: u8 = 0;
const FLAG_VALUE: u8 = 1;

/// A decoded block of sorted entries
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    /// Entries in key order, `None` marks a delete
    pub entries: Vec<(Bytes, Option<Bytes>)>,
}

/// Block builder for writing entries
#[derive(Default)]
pub struct BlockBuilder {
    entries: Vec<(Bytes, Option<Bytes>)>,
    estimated_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; keys must arrive in increasing order
    pub fn add(&mut self, key: Bytes, value: Option<Bytes>) {
        self.estimated_size +=
            key.len() + value.as_ref().map_or(0, |v| v.len()) + ENTRY_FRAMING;
        self.entries.push((key, value));
    }

    /// Check if block has data
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Uncompressed size estimate
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    /// Last key added
    pub fn last_key(&self) -> Option<&Bytes> {
        self.entries.last().map(|(k, _)| k)
    }

    /// Finish building and return the data block
    pub fn finish(&mut self) -> DataBlock {
        self.estimated_size = 0;
        DataBlock {
            entries: std::mem::take(&mut self.entries),
        }
    }
}

impl DataBlock {
    /// Binary search for a key inside the block
    pub fn get(&self, key: &[u8]) -> Option<Lookup> {
        self.entries
            .binary_search_by(|(k, _)| k.as_ref().cmp(key))
            .ok()
            .map(|idx| match &self.entries[idx].1 {
                Some(value) => Lookup::Value(value.clone()),
                None => Lookup::Deleted,
            })
    }

    /// Approximate in-memory footprint, used as the cache charge
    pub fn charge(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| k.len() + v.as_ref().map_or(0, |v| v.len()) + ENTRY_FRAMING)
            .sum()
    }

    fn encode_entries(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.charge() + 4);
        buf.put_u32_le(self.entries.len() as u32);
        for (key, value) in &self.entries {
            buf.put_u32_le(key.len() as u32);
            buf.put_slice(key);
            match value {
                Some(value) => {
                    buf.put_u8(FLAG_VALUE);
                    buf.put_u32_le(value.len() as u32);
                    buf.put_slice(value);
                }
                None => {
                    buf.put_u8(FLAG_DELETED);
                    buf.put_u32_le(0);
                }
            }
        }
        buf
    }

    fn decode_entries(data: &[u8]) -> Result<Vec<(Bytes, Option<Bytes>)>> {
        let short = || Error::Corruption("Block entry out of bounds".into());

        let mut cursor = std::io::Cursor::new(data);
        if cursor.remaining() < 4 {
            return Err(short());
        }
        let count = cursor.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count.min(data.len()));

        for _ in 0..count {
            if cursor.remaining() < 4 {
                return Err(short());
            }
            let key_len = cursor.get_u32_le() as usize;
            if cursor.remaining() < key_len + 5 {
                return Err(short());
            }
            let pos = cursor.position() as usize;
            let key = Bytes::copy_from_slice(&data[pos..pos + key_len]);
            cursor.set_position((pos + key_len) as u64);

            let flag = cursor.get_u8();
            let value_len = cursor.get_u32_le() as usize;
            if cursor.remaining() < value_len {
                return Err(short());
            }
            let pos = cursor.position() as usize;
            let value = match flag {
                FLAG_VALUE => Some(Bytes::copy_from_slice(&data[pos..pos + value_len])),
                FLAG_DELETED => None,
                other => {
                    return Err(Error::Corruption(format!("Unknown entry flag {}", other)))
                }
            };
            cursor.set_position((pos + value_len) as u64);

            entries.push((key, value));
        }

        Ok(entries)
    }

    /// Serialize to bytes with optional LZ4 compression
    ///
    /// Format: lz4 flag (1) | payload length (4) | payload | CRC32 (4)
    pub fn to_bytes(&self, use_lz4: bool) -> Bytes {
        let raw = self.encode_entries();
        let mut buf = BytesMut::new();

        if use_lz4 {
            let compressed = lz4_flex::compress_prepend_size(&raw);
            buf.put_u8(1);
            buf.put_u32_le(compressed.len() as u32);
            buf.put_slice(&compressed);
        } else {
            buf.put_u8(0);
            buf.put_u32_le(raw.len() as u32);
            buf.put_slice(&raw);
        }

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserialize from bytes, verifying the checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 9 {
            return Err(Error::InvalidFormat("Block too short".into()));
        }

        let checksum_pos = data.len() - 4;
        let expected_checksum = {
            let mut c = std::io::Cursor::new(&data[checksum_pos..]);
            c.get_u32_le()
        };
        let actual_checksum = crc32fast::hash(&data[..checksum_pos]);
        if expected_checksum != actual_checksum {
            return Err(Error::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let mut cursor = std::io::Cursor::new(data);
        let lz4_flag = cursor.get_u8();
        let payload_len = cursor.get_u32_le() as usize;
        if 5 + payload_len != checksum_pos {
            return Err(Error::Corruption("Block payload length mismatch".into()));
        }
        let payload = &data[5..checksum_pos];

        let entries = if lz4_flag == 1 {
            let decompressed = lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| Error::Compression(e.to_string()))?;
            Self::decode_entries(&decompressed)?
        } else {
            Self::decode_entries(payload)?
        };

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> DataBlock {
        let mut builder = BlockBuilder::new();
        for i in 0..100u32 {
            let key = Bytes::from(format!("key-{:04}", i));
            let value = if i % 10 == 0 {
                None
            } else {
                Some(Bytes::from(format!("value-{}", i)))
            };
            builder.add(key, value);
        }
        assert_eq!(builder.len(), 100);
        assert_eq!(builder.last_key().map(|k| k.as_ref()), Some(&b"key-0099"[..]));
        builder.finish()
    }

    #[test]
    fn test_block_lookup() {
        let block = sample_block();
        assert_eq!(block.get(b"key-0042"), Some(Lookup::Value(Bytes::from("value-42"))));
        assert_eq!(block.get(b"key-0040"), Some(Lookup::Deleted));
        assert_eq!(block.get(b"key-0100"), None);
    }

    #[test]
    fn test_block_serialization_with_and_without_lz4() {
        let block = sample_block();

        for use_lz4 in [true, false] {
            let bytes = block.to_bytes(use_lz4);
            let restored = DataBlock::from_bytes(&bytes).unwrap();
            assert_eq!(restored.entries, block.entries);
        }
    }

    #[test]
    fn test_block_checksum_detects_corruption() {
        let block = sample_block();
        let mut bytes = block.to_bytes(false).to_vec();
        bytes[20] ^= 0x55;

        let result = DataBlock::from_bytes(&bytes);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_builder_resets_after_finish() {
        let mut builder = BlockBuilder::new();
        builder.add(Bytes::from_static(b"a"), Some(Bytes::from_static(b"1")));
        assert!(builder.estimated_size() > 0);

        let block = builder.finish();
        assert_eq!(block.entries.len(), 1);
        assert!(builder.is_empty());
        assert_eq!(builder.estimated_size(), 0);
    }
}
