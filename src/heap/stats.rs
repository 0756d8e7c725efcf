//! Resident heap statistics.

use crate::util::size::format_bytes;

/// Point-in-time statistics of a [`super::ResidentHeap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes of backing memory created so far.
    pub total_size: u64,

    /// Number of backing stores.
    pub store_count: usize,

    /// Bytes handed out and not yet freed.
    pub live_bytes: u64,

    /// High-water mark of `live_bytes`.
    pub peak_live_bytes: u64,

    /// Bytes currently available in the free list.
    pub free_bytes: u64,

    /// Total number of successful allocations.
    pub alloc_count: u64,

    /// Total number of frees.
    pub free_count: u64,

    /// Number of times the heap created a new store.
    pub growth_count: u64,
}

impl HeapStats {
    /// Allocations currently alive.
    pub fn live_allocations(&self) -> u64 {
        self.alloc_count.saturating_sub(self.free_count)
    }

    /// Share of backing memory that is handed out, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.live_bytes as f64 / self.total_size as f64
    }
}

impl std::fmt::Display for HeapStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Resident Heap Statistics:")?;
        writeln!(f, "  Backing:     {} in {} stores", format_bytes(self.total_size), self.store_count)?;
        writeln!(f, "  Live:        {} (peak {})", format_bytes(self.live_bytes), format_bytes(self.peak_live_bytes))?;
        writeln!(f, "  Free:        {}", format_bytes(self.free_bytes))?;
        writeln!(f, "  Allocations: {}", self.alloc_count)?;
        writeln!(f, "  Frees:       {}", self.free_count)?;
        writeln!(f, "  Active:      {}", self.live_allocations())?;
        writeln!(f, "  Growths:     {}", self.growth_count)?;
        Ok(())
    }
}
