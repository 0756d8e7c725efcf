//! Error types for heap allocation and staged uploads.

use thiserror::Error;

/// Errors surfaced by the resident heap, the upload queue and the device
/// collaborators underneath them.
///
/// Freeing an address the heap does not own is a caller contract violation
/// and panics instead of producing a variant here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Backing allocation failed or the heap hit its store-count cap.
    #[error("out of device memory: {0}")]
    OutOfDeviceMemory(String),

    /// CPU-side bookkeeping or mapping failed.
    #[error("out of host memory: {0}")]
    OutOfHostMemory(String),

    /// A submission or wait failed; the device context is permanently lost.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// Zero-sized or otherwise unrepresentable request.
    #[error("invalid allocation size {size}")]
    InvalidSize {
        /// Requested size in bytes
        size: u64,
    },

    /// Alignment is not a power of two or exceeds what the heap can honor.
    #[error("invalid alignment {align}")]
    InvalidAlignment {
        /// Requested alignment in bytes
        align: u64,
    },

    /// Configuration rejected at init time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The backend cannot perform the requested operation.
    #[error("unsupported by backend: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Whether this error means the device context is gone for good.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Error::DeviceLost(_))
    }

    /// Whether this is a (recoverable) memory exhaustion error.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfDeviceMemory(_) | Error::OutOfHostMemory(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
