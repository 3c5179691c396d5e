use crate::checksum::{Checksum, Crc32};
use crate::error::{Result, StorageError};

/// Block size of the name directory superblock (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Every file starts with an 8 byte magic tag
pub const MAGIC_SIZE: usize = 8;

/// Magic tag of shard data logs
pub const DATA_MAGIC: [u8; MAGIC_SIZE] = [0x3a, 0x2c, 0xc5, 0xe2, 0x68, 0x5c, 0x12, 0xa3];

/// Magic tag of shard index logs
pub const INDEX_MAGIC: [u8; MAGIC_SIZE] = [0x3a, 0x37, 0xc5, 0xb2, 0x9e, 0x5c, 0x2a, 0xa3];

/// Magic tag of the name directory, also used to terminate discovery entries
pub const NAMES_MAGIC: [u8; MAGIC_SIZE] = [0x3a, 0x33, 0xc5, 0xf9, 0x8b, 0x5c, 0x73, 0xa3];

/// Location of a value inside a shard data log.
///
/// Serialized as `[offset: u64][length: u32][checksum: u32]`, little endian.
/// The all-zero encoding is reserved and decodes as "no record".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub offset: u64,
    pub length: u32,
    pub checksum: u32,
}

impl IndexRecord {
    pub const SIZE: usize = 16;

    /// Describe `value` stored at `offset`, computing its CRC32.
    pub fn new(offset: u64, value: &[u8]) -> Result<Self> {
        let length = u32::try_from(value.len()).map_err(|_| {
            StorageError::SerializationError(format!("value too large: {} bytes", value.len()))
        })?;
        let record = Self {
            offset,
            length,
            checksum: Crc32.compute(value),
        };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        if self.offset < MAGIC_SIZE as u64 {
            return Err(StorageError::SerializationError(format!(
                "record offset {} overlaps the file header",
                self.offset
            )));
        }
        if self.length == 0 {
            return Err(StorageError::SerializationError(
                "record length cannot be zero".to_string()
            ));
        }
        Ok(())
    }

    /// Offset one past the last value byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    /// Check `data` against the stored checksum.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        Crc32.verify(data, self.checksum)
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buffer = [0u8; Self::SIZE];
        buffer[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.length.to_le_bytes());
        buffer[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buffer
    }

    /// Decode a record; the reserved all-zero pattern yields `None`.
    pub fn deserialize(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < Self::SIZE {
            return Err(StorageError::SerializationError(
                "Data too short for index record".to_string()
            ));
        }
        if data[..Self::SIZE].iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let offset = u64::from_le_bytes([
            data[0], data[1], data[2], data[3],
            data[4], data[5], data[6], data[7],
        ]);
        let length = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let checksum = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

        let record = Self { offset, length, checksum };
        record.validate()?;
        Ok(Some(record))
    }
}

const HEADER_SIZE: usize = 4;
const KEYLEN_MASK: u32 = 0xffff;
const DELKEY_BIT: u32 = 1 << 16;

/// One index log entry: a key relative to the shard name, followed by its
/// record, or a tombstone when `record` is `None`.
///
/// Format: `[header: u32][key][record: 16B, absent for tombstones]`, where the
/// header packs the key length in its low 16 bits and the delete flag in bit 16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub record: Option<IndexRecord>,
}

impl IndexEntry {
    pub fn new_put(key: impl Into<String>, record: IndexRecord) -> Self {
        Self { key: key.into(), record: Some(record) }
    }

    pub fn new_delete(key: impl Into<String>) -> Self {
        Self { key: key.into(), record: None }
    }

    pub fn is_tombstone(&self) -> bool {
        self.record.is_none()
    }

    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.key.len() + if self.record.is_some() { IndexRecord::SIZE } else { 0 }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let key_len = self.key.len();
        if key_len > KEYLEN_MASK as usize {
            return Err(StorageError::SerializationError(format!(
                "Key too long for index entry: {} bytes",
                key_len
            )));
        }

        let mut header = key_len as u32;
        if self.record.is_none() {
            header |= DELKEY_BIT;
        }

        let mut buffer = Vec::with_capacity(self.serialized_size());
        buffer.extend_from_slice(&header.to_le_bytes());
        buffer.extend_from_slice(self.key.as_bytes());
        if let Some(record) = &self.record {
            buffer.extend_from_slice(&record.serialize());
        }
        Ok(buffer)
    }

    /// Decode the entry at the start of `data`, returning it with the number
    /// of bytes it occupied.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::SerializationError(
                "Data too short for index entry header".to_string()
            ));
        }

        let header = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if header & !(KEYLEN_MASK | DELKEY_BIT) != 0 {
            return Err(StorageError::SerializationError(format!(
                "Invalid index entry header: {:#x}",
                header
            )));
        }
        let key_len = (header & KEYLEN_MASK) as usize;
        let deleted = header & DELKEY_BIT != 0;

        let mut offset = HEADER_SIZE;
        if offset + key_len > data.len() {
            return Err(StorageError::SerializationError(
                "Truncated index entry key".to_string()
            ));
        }
        let key = std::str::from_utf8(&data[offset..offset + key_len])
            .map_err(|e| StorageError::SerializationError(format!("Invalid key bytes: {}", e)))?
            .to_string();
        offset += key_len;

        if deleted {
            return Ok((Self::new_delete(key), offset));
        }

        if offset + IndexRecord::SIZE > data.len() {
            return Err(StorageError::SerializationError(
                "Truncated index record".to_string()
            ));
        }
        let record = IndexRecord::deserialize(&data[offset..])?;
        offset += IndexRecord::SIZE;

        Ok((Self { key, record }, offset))
    }
}

/// Name directory header.
///
/// Format: `[magic: 8B][charn: u8][wordn: u8][chars][words][length: u16]`,
/// zero padded to [`PAGE_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub chars: Vec<u8>,
    pub words: Vec<u8>,
    pub length: u16,
}

impl Superblock {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.chars.len() > u8::MAX as usize || self.words.len() > u8::MAX as usize {
            return Err(StorageError::SerializationError(
                "Superblock alphabet or partition too large".to_string()
            ));
        }
        let used = MAGIC_SIZE + 2 + self.chars.len() + self.words.len() + 2;
        if used > PAGE_SIZE {
            return Err(StorageError::SerializationError(
                "Superblock exceeds one page".to_string()
            ));
        }

        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut offset = 0;

        buffer[offset..offset + MAGIC_SIZE].copy_from_slice(&NAMES_MAGIC);
        offset += MAGIC_SIZE;

        buffer[offset] = self.chars.len() as u8;
        buffer[offset + 1] = self.words.len() as u8;
        offset += 2;

        buffer[offset..offset + self.chars.len()].copy_from_slice(&self.chars);
        offset += self.chars.len();

        buffer[offset..offset + self.words.len()].copy_from_slice(&self.words);
        offset += self.words.len();

        buffer[offset..offset + 2].copy_from_slice(&self.length.to_le_bytes());

        Ok(buffer)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < PAGE_SIZE {
            return Err(StorageError::SerializationError(
                "Data too short for superblock".to_string()
            ));
        }
        if data[..MAGIC_SIZE] != NAMES_MAGIC {
            return Err(StorageError::SerializationError(
                "Invalid superblock magic".to_string()
            ));
        }

        let mut offset = MAGIC_SIZE;
        let charn = data[offset] as usize;
        let wordn = data[offset + 1] as usize;
        offset += 2;

        let chars = data[offset..offset + charn].to_vec();
        offset += charn;
        let words = data[offset..offset + wordn].to_vec();
        offset += wordn;
        let length = u16::from_le_bytes([data[offset], data[offset + 1]]);

        let total: usize = words.iter().map(|&w| w as usize).sum();
        if total != length as usize {
            return Err(StorageError::SerializationError(format!(
                "Superblock partition sums to {} but name length is {}",
                total, length
            )));
        }

        Ok(Self { chars, words, length })
    }
}
