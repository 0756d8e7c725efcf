//! # gpuheap
//!
//! GPU-resident heap allocation and staged uploads for driver-level resource
//! management.
//!
//! ## Features
//!
//! - Resident heap: durable device virtual addresses carved out of lazily
//!   grown backing stores (64 KiB, 64 KiB, 128 KiB, ... up to 4 GiB)
//! - Contiguous heaps: every store bound back to back in one reserved range
//! - Overalloc padding for hardware prefetch past the end of an allocation
//! - Upload queue: double-ended staging buffers, copy commands executed in
//!   submission order, buffers recycled by timeline progress
//! - Sticky device-lost state shared between components
//! - In-RAM dummy device for tests and tooling
//! - Optional Vulkan backing provider (`gpu-vulkan` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use gpuheap::{DummyDevice, HeapConfig, ResidentHeap, UploadConfig, UploadQueue};
//!
//! let device = Arc::new(DummyDevice::new());
//! let queue = UploadQueue::new(device.clone(), UploadConfig::default()).unwrap();
//! let heap = ResidentHeap::new(device.clone(), HeapConfig::default()).unwrap();
//!
//! let addr = heap.upload(&queue, b"shader binary", 256).unwrap();
//! queue.sync().unwrap();
//! assert_eq!(device.read(addr.raw(), 13).unwrap(), b"shader binary");
//!
//! heap.free(addr, 13);
//! ```

pub mod device;
pub mod diagnostics;
pub mod error;
pub mod heap;
pub mod sync;
pub mod upload;

mod util;

// Re-export public API at crate root for convenience
pub use error::{Error, Result};
pub use heap::{HeapAddress, HeapConfig, HeapStats, ResidentHeap, VirtualAddressAllocator};
pub use upload::{StagingBuffer, UploadConfig, UploadQueue, UploadStats, Uploader};

// Device interfaces
pub use device::{
    BackingAllocation, BackingFlags, BackingHandle, BackingProvider, BindBuilder, BindKind,
    BindOp, CommandList, CopyCommand, MapFlags, SubmissionQueue,
};
pub use device::DummyDevice;

#[cfg(feature = "gpu-vulkan")]
pub use device::vulkan::VulkanBacking;

// Synchronization
pub use sync::status::DeviceStatus;
pub use sync::timeline::Timepoint;

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{GH001, GH002, GH003, GH101, GH102};
