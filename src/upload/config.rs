//! Upload queue configuration.

use crate::device::COPY_COMMAND_SIZE;
use crate::error::{Error, Result};
use crate::util::size::kib;

/// Default size of one staging buffer.
pub const DEFAULT_STAGING_CAPACITY: u64 = kib(64);

/// Transfers up to this size are never split across staging buffers.
pub const DEFAULT_SMALL_TRANSFER: u64 = kib(1);

/// Configuration for an [`super::UploadQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Bytes per staging buffer, commands and payload together (default: 64 KiB)
    pub staging_capacity: u64,

    /// Chunks smaller than this force a fresh buffer instead of being split
    /// (default: 1 KiB)
    pub small_transfer: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            small_transfer: DEFAULT_SMALL_TRANSFER,
        }
    }
}

impl UploadConfig {
    /// Builder pattern: set staging buffer capacity.
    pub fn with_staging_capacity(mut self, capacity: u64) -> Self {
        self.staging_capacity = capacity;
        self
    }

    /// Builder pattern: set the small-transfer threshold.
    pub fn with_small_transfer(mut self, bytes: u64) -> Self {
        self.small_transfer = bytes;
        self
    }

    /// Reject configurations the queue cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.small_transfer == 0 {
            return Err(Error::InvalidConfig("small_transfer must be non-zero"));
        }
        if self.staging_capacity < COPY_COMMAND_SIZE + self.small_transfer {
            return Err(Error::InvalidConfig(
                "staging_capacity must hold one command plus one small transfer",
            ));
        }
        if self.staging_capacity > u64::from(u32::MAX) {
            return Err(Error::InvalidConfig("staging_capacity must fit in 32 bits"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = UploadConfig::default();
        assert_eq!(config.staging_capacity, 65536);
        assert_eq!(config.small_transfer, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_buffers() {
        assert!(UploadConfig::default()
            .with_staging_capacity(1024)
            .validate()
            .is_err());
        assert!(UploadConfig::default().with_small_transfer(0).validate().is_err());
        assert!(UploadConfig::default()
            .with_staging_capacity(1 << 33)
            .validate()
            .is_err());
        assert!(UploadConfig::default()
            .with_staging_capacity(1056)
            .validate()
            .is_ok());
    }
}
