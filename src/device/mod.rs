//! Device collaborators underneath the heap and upload queue.
//!
//! This module defines the interfaces WITHOUT pulling in any backend crate:
//! - [`BackingProvider`]: creates, maps and binds backing memory
//! - [`SubmissionQueue`]: submits command lists against a timeline
//!
//! ## Backends
//! - `dummy`: in-RAM simulation, always available (tests and tooling)
//! - `vulkan`: via `ash` + `gpu-allocator` (enable `gpu-vulkan` feature)

pub mod bind;
pub mod command;
pub mod traits;

pub use bind::{BindBuilder, BindKind, BindOp};
pub use command::{CommandList, CopyCommand, COPY_COMMAND_SIZE, MAX_COPY_SIZE};
pub use traits::{
    BackingAllocation, BackingFlags, BackingHandle, BackingProvider, MapFlags, SubmissionQueue,
};

// Dummy device for testing (always available)
pub mod dummy;
pub use dummy::{DummyDevice, ExecutedCopy};

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
