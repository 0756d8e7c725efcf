//! Backing-memory and submission traits.
//!
//! The heap and upload queue depend on these traits, not on implementations.

use std::ptr::NonNull;
use std::time::Duration;

use super::bind::BindOp;
use super::command::CommandList;
use crate::error::Result;
use crate::sync::timeline::Timepoint;

/// Placement and sharing flags for a backing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BackingFlags {
    pub bits: u32,
}

impl BackingFlags {
    /// Device-local video memory.
    pub const LOCAL: Self = Self { bits: 0x0001 };
    /// System memory reachable through the GART.
    pub const GART: Self = Self { bits: 0x0002 };
    /// The allocation will be CPU-mapped.
    pub const MAP: Self = Self { bits: 0x0004 };
    /// Never exported to other processes.
    pub const NO_SHARE: Self = Self { bits: 0x0008 };

    /// No flags.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl std::ops::BitOr for BackingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

impl std::ops::BitOrAssign for BackingFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

/// CPU access requested when mapping a backing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapFlags {
    pub bits: u32,
}

impl MapFlags {
    pub const READ: Self = Self { bits: 0x0001 };
    pub const WRITE: Self = Self { bits: 0x0002 };

    /// Not mapped at all.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Whether no access bit is set.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl std::ops::BitOr for MapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Opaque handle to one backing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackingHandle(u64);

impl BackingHandle {
    /// Wrap a backend-specific id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Result of [`BackingProvider::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingAllocation {
    /// Handle for later map/bind/destroy calls
    pub handle: BackingHandle,
    /// Device virtual address the backend placed the allocation at
    pub address: u64,
    /// Size in bytes
    pub size: u64,
}

/// Creates and manages real GPU-addressable memory.
pub trait BackingProvider: Send + Sync {
    /// Allocate `size` bytes of backing memory.
    ///
    /// Fails with `OutOfDeviceMemory` when the backend is exhausted.
    fn create(&self, size: u64, align: u64, flags: BackingFlags) -> Result<BackingAllocation>;

    /// Map a backing allocation for CPU access.
    ///
    /// The pointer stays valid until [`BackingProvider::unmap`] or
    /// [`BackingProvider::destroy`].
    fn map(&self, handle: BackingHandle, flags: MapFlags) -> Result<NonNull<u8>>;

    /// Drop the CPU mapping of a backing allocation.
    fn unmap(&self, handle: BackingHandle);

    /// Apply a batch of address-space bind operations, in order.
    fn bind(&self, ops: &[BindOp]) -> Result<()>;

    /// Reserve a range of device address space with no backing behind it.
    fn reserve_address_space(&self, size: u64, align: u64) -> Result<u64>;

    /// Return a range obtained from [`BackingProvider::reserve_address_space`].
    fn release_address_space(&self, address: u64, size: u64);

    /// Free a backing allocation.
    fn destroy(&self, handle: BackingHandle);
}

/// Executes command lists asynchronously against a monotonic timeline.
pub trait SubmissionQueue: Send + Sync {
    /// Submit a command list; the timeline reaches `signal` once it has
    /// executed (and every earlier submission has too).
    fn submit(&self, commands: &CommandList<'_>, signal: Timepoint) -> Result<()>;

    /// Last timepoint the device has confirmed complete.
    fn query_progress(&self) -> Result<Timepoint>;

    /// Block until the timeline reaches `timepoint`.
    ///
    /// `None` waits forever.
    fn wait(&self, timepoint: Timepoint, timeout: Option<Duration>) -> Result<()>;
}
