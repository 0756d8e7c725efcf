//! Resident heap: durable GPU virtual addresses carved out of lazily grown
//! backing stores.

pub mod address;
pub mod config;
pub mod resident;
pub mod stats;
pub mod vma;

pub use address::{HeapAddress, PackedKey};
pub use config::{HeapConfig, DEFAULT_MAX_STORE_COUNT, DEFAULT_MIN_STORE_SIZE};
pub use resident::{BackingStore, ResidentHeap};
pub use stats::HeapStats;
pub use vma::VirtualAddressAllocator;
