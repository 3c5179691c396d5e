use crate::error::{Result, StorageError};

/// Trait for checksum algorithms
pub trait Checksum {
    /// Compute checksum for the given data
    fn compute(&self, data: &[u8]) -> u32;

    /// Verify that the computed checksum matches the expected value
    fn verify(&self, data: &[u8], expected: u32) -> Result<()> {
        let actual = self.compute(data);
        if actual == expected {
            Ok(())
        } else {
            Err(StorageError::ChecksumMismatch { expected, actual })
        }
    }
}

/// CRC32 checksum implementation using crc32fast.
///
/// Every index record carries the CRC32 of the value bytes it addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl Checksum for Crc32 {
    fn compute(&self, data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}
