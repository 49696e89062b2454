//! WAL entry types and serialization

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// WAL entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalEntryType {
    /// Store a value under a key
    Put = 1,
    /// Remove a key
    Delete = 2,
}

impl TryFrom<u8> for WalEntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalEntryType::Put),
            2 => Ok(WalEntryType::Delete),
            _ => Err(Error::InvalidFormat(format!(
                "Invalid WAL entry type: {}",
                value
            ))),
        }
    }
}

/// A single WAL entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Entry type
    pub entry_type: WalEntryType,
    /// Key bytes
    pub key: Bytes,
    /// Value bytes, empty for deletes
    pub value: Bytes,
}

impl WalEntry {
    /// Create a put entry
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self {
            entry_type: WalEntryType::Put,
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        }
    }

    /// Create a delete entry
    pub fn delete(key: &[u8]) -> Self {
        Self {
            entry_type: WalEntryType::Delete,
            key: Bytes::copy_from_slice(key),
            value: Bytes::new(),
        }
    }

    /// Value as the memtable stores it, `None` for deletes
    pub fn memtable_value(&self) -> Option<Bytes> {
        match self.entry_type {
            WalEntryType::Put => Some(self.value.clone()),
            WalEntryType::Delete => None,
        }
    }

    /// Serialize the entry with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry type
    /// - 4 bytes: key length
    /// - N bytes: key
    /// - 4 bytes: value length
    /// - N bytes: value
    /// - 4 bytes: CRC32 checksum
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(17 + self.key.len() + self.value.len());

        // Reserve space for length prefix
        buf.put_u32_le(0);

        buf.put_u8(self.entry_type as u8);

        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);

        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);

        // Checksum covers everything after the length prefix
        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        buf.freeze()
    }

    /// Deserialize entry from bytes, validating checksum
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::InvalidFormat("Entry too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);

        let len = cursor.get_u32_le() as usize;
        if len < 13 {
            return Err(Error::Corruption(format!("WAL entry length {} too small", len)));
        }
        if data.len() < 4 + len {
            return Err(Error::InvalidFormat("Incomplete entry".into()));
        }

        let entry_data = &data[4..4 + len];

        let expected_checksum = {
            let mut c = std::io::Cursor::new(&entry_data[entry_data.len() - 4..]);
            c.get_u32_le()
        };
        let actual_checksum = crc32fast::hash(&entry_data[..entry_data.len() - 4]);

        if expected_checksum != actual_checksum {
            return Err(Error::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let body = &entry_data[..entry_data.len() - 4];
        let mut cursor = std::io::Cursor::new(body);

        let entry_type = WalEntryType::try_from(cursor.get_u8())?;

        let key_len = cursor.get_u32_le() as usize;
        let pos = cursor.position() as usize;
        if pos + key_len + 4 > body.len() {
            return Err(Error::Corruption("WAL key length out of bounds".into()));
        }
        let key = Bytes::copy_from_slice(&body[pos..pos + key_len]);
        cursor.set_position((pos + key_len) as u64);

        let value_len = cursor.get_u32_le() as usize;
        let pos = cursor.position() as usize;
        if pos + value_len > body.len() {
            return Err(Error::Corruption("WAL value length out of bounds".into()));
        }
        let value = Bytes::copy_from_slice(&body[pos..pos + value_len]);

        Ok((
            WalEntry {
                entry_type,
                key,
                value,
            },
            4 + len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization() {
        let entry = WalEntry::put(b"block:0001", b"genesis");
        let serialized = entry.serialize_with_checksum();

        let (deserialized, len) = WalEntry::deserialize_with_checksum(&serialized).unwrap();
        assert_eq!(len, serialized.len());
        assert_eq!(deserialized, entry);
        assert_eq!(deserialized.memtable_value(), Some(Bytes::from_static(b"genesis")));
    }

    #[test]
    fn test_delete_has_no_memtable_value() {
        let entry = WalEntry::delete(b"block:0001");
        let serialized = entry.serialize_with_checksum();

        let (deserialized, _) = WalEntry::deserialize_with_checksum(&serialized).unwrap();
        assert_eq!(deserialized.entry_type, WalEntryType::Delete);
        assert_eq!(deserialized.memtable_value(), None);
    }

    #[test]
    fn test_checksum_validation() {
        let entry = WalEntry::put(b"key", b"value");
        let mut serialized = entry.serialize_with_checksum().to_vec();

        // Corrupt the key
        serialized[10] ^= 0xFF;

        let result = WalEntry::deserialize_with_checksum(&serialized);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_entry() {
        let entry = WalEntry::put(b"key", b"value");
        let serialized = entry.serialize_with_checksum();

        let result = WalEntry::deserialize_with_checksum(&serialized[..serialized.len() - 3]);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
