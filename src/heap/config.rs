//! Resident heap configuration.

use super::address::{MAX_STORE_INDEX, MAX_STORE_OFFSET};
use crate::device::{BackingFlags, MapFlags};
use crate::error::{Error, Result};
use crate::util::size::kib;

/// Size of the first (and second) backing store.
pub const DEFAULT_MIN_STORE_SIZE: u64 = kib(64);

/// Store cap: 64 KiB, 64 KiB, 128 KiB, ... 2 GiB, for 4 GiB in total.
pub const DEFAULT_MAX_STORE_COUNT: u32 = 17;

/// Instruction prefetch can read this far past the end of a shader.
const SHADER_OVERALLOC: u64 = 4096;

/// Configuration for a [`super::ResidentHeap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Placement flags for every backing store
    pub backing_flags: BackingFlags,

    /// CPU access to map stores with (empty = not mapped)
    pub map_flags: MapFlags,

    /// Bytes at the end of each store kept out of the free list
    pub overalloc: u64,

    /// Bind all stores into one reserved, contiguous address range
    pub contiguous: bool,

    /// Size of the first two stores; later stores double (default: 64 KiB)
    pub min_store_size: u64,

    /// Maximum number of backing stores (default: 17)
    pub max_store_count: u32,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            backing_flags: BackingFlags::LOCAL | BackingFlags::NO_SHARE,
            map_flags: MapFlags::empty(),
            overalloc: 0,
            contiguous: false,
            min_store_size: DEFAULT_MIN_STORE_SIZE,
            max_store_count: DEFAULT_MAX_STORE_COUNT,
        }
    }
}

impl HeapConfig {
    /// CPU-writable heap in GART memory, for small records the CPU fills in
    /// directly (events, query slots).
    pub fn mapped() -> Self {
        Self {
            backing_flags: BackingFlags::GART | BackingFlags::MAP | BackingFlags::NO_SHARE,
            map_flags: MapFlags::READ | MapFlags::WRITE,
            ..Self::default()
        }
    }

    /// Heap for shader binaries.
    ///
    /// Keeps 4 KiB of padding behind every store so instruction prefetch
    /// never runs off the end of mapped memory.
    pub fn shader(cpu_writable: bool, contiguous: bool) -> Self {
        let mut config = Self {
            overalloc: SHADER_OVERALLOC,
            contiguous,
            ..Self::default()
        };
        if cpu_writable {
            config.backing_flags |= BackingFlags::MAP;
            config.map_flags = MapFlags::WRITE;
        }
        config
    }

    /// Builder pattern: set backing flags.
    pub fn with_backing_flags(mut self, flags: BackingFlags) -> Self {
        self.backing_flags = flags;
        self
    }

    /// Builder pattern: set map flags.
    pub fn with_map_flags(mut self, flags: MapFlags) -> Self {
        self.map_flags = flags;
        self
    }

    /// Builder pattern: set per-store padding.
    pub fn with_overalloc(mut self, bytes: u64) -> Self {
        self.overalloc = bytes;
        self
    }

    /// Builder pattern: enable contiguous binding.
    pub fn with_contiguous(mut self, contiguous: bool) -> Self {
        self.contiguous = contiguous;
        self
    }

    /// Builder pattern: set the first store size.
    pub fn with_min_store_size(mut self, size: u64) -> Self {
        self.min_store_size = size;
        self
    }

    /// Builder pattern: set the store cap.
    pub fn with_max_store_count(mut self, count: u32) -> Self {
        self.max_store_count = count;
        self
    }

    /// Whether stores are mapped for CPU access.
    pub fn is_mapped(&self) -> bool {
        !self.map_flags.is_empty()
    }

    /// Size of the store at `index`.
    ///
    /// The first two stores are `min_store_size`; each later one doubles.
    pub fn store_size(&self, index: usize) -> u64 {
        self.min_store_size << (index.max(1) - 1)
    }

    /// Combined size of every store the heap may ever create.
    pub fn max_heap_size(&self) -> u64 {
        match self.max_store_count {
            0 => 0,
            n => self.min_store_size << (n - 1),
        }
    }

    /// Reject configurations the heap cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.min_store_size.is_power_of_two() {
            return Err(Error::InvalidConfig("min_store_size must be a power of two"));
        }
        if self.overalloc >= self.min_store_size {
            return Err(Error::InvalidConfig("overalloc must be smaller than min_store_size"));
        }
        if self.max_store_count == 0 {
            return Err(Error::InvalidConfig("max_store_count must be at least 1"));
        }
        if self.max_store_count > u32::from(MAX_STORE_INDEX) + 1 {
            return Err(Error::InvalidConfig("max_store_count exceeds the addressable store count"));
        }
        if self.max_store_count - 1 >= self.min_store_size.leading_zeros() {
            return Err(Error::InvalidConfig("maximum heap size overflows the address space"));
        }
        if self.store_size(self.max_store_count as usize - 1) > MAX_STORE_OFFSET {
            return Err(Error::InvalidConfig("largest backing store is too big to address"));
        }
        if self.is_mapped() && !self.backing_flags.contains(BackingFlags::MAP) {
            return Err(Error::InvalidConfig("map_flags set without BackingFlags::MAP"));
        }
        Ok(())
    }
}
