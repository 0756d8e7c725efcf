//! Staged uploads.
//!
//! Payloads are copied into CPU-mapped staging buffers and moved to their
//! destination by copy commands the device executes later, in submission
//! order. A staging buffer is only reused once the device has confirmed it
//! finished reading it.

pub mod config;
pub mod queue;
pub mod staging;

pub use config::{UploadConfig, DEFAULT_SMALL_TRANSFER, DEFAULT_STAGING_CAPACITY};
pub use queue::{UploadQueue, UploadStats};
pub use staging::StagingBuffer;

use crate::error::Result;

/// Something that can fill device memory the CPU cannot write directly.
///
/// [`crate::heap::ResidentHeap::upload`] routes non-mapped destinations
/// through this trait.
pub trait Uploader {
    /// Arrange for `data` to land at device address `dst`.
    ///
    /// Returning `Ok` means the copy is queued, not that it has executed.
    fn upload(&self, dst: u64, data: &[u8]) -> Result<()>;
}
