//! Synchronization primitives.
//!
//! Thin mutex wrappers over std or parking_lot, relaxed statistics counters,
//! and the timeline/device-status glue shared by the heap and upload queue.

pub(crate) mod atomics;
pub(crate) mod mutex;
pub mod status;
pub mod timeline;
