//! Free-list allocator over an abstract address range.
//!
//! Pure bookkeeping: no I/O, no locking. The owner serializes access and
//! decides what the addresses mean.

use std::collections::BTreeMap;

use crate::util::layout::checked_align_up;

/// First-fit, lowest-address free-range allocator.
///
/// Free ranges are kept sorted by start address; freeing a range merges it
/// with any free neighbour it touches.
#[derive(Debug, Default, Clone)]
pub struct VirtualAddressAllocator {
    /// start -> length
    free: BTreeMap<u64, u64>,
    free_bytes: u64,
}

impl VirtualAddressAllocator {
    /// Create an allocator with nothing free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns the lowest suitable address, or `None` if no free range fits.
    pub fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        debug_assert!(size > 0);
        debug_assert!(align.is_power_of_two());

        let (start, len, addr) = self.free.iter().find_map(|(&start, &len)| {
            let addr = checked_align_up(start, align)?;
            let end = addr.checked_add(size)?;
            (end <= start + len).then_some((start, len, addr))
        })?;

        self.free.remove(&start);
        if addr > start {
            self.free.insert(start, addr - start);
        }
        let tail = (start + len) - (addr + size);
        if tail > 0 {
            self.free.insert(addr + size, tail);
        }
        self.free_bytes -= size;
        Some(addr)
    }

    /// Return `[addr, addr + size)` to the free set.
    ///
    /// Also used to seed the allocator with fresh ranges.
    pub fn free(&mut self, addr: u64, size: u64) {
        debug_assert!(size > 0);
        let end = addr.checked_add(size).expect("free range overflows");

        let mut start = addr;
        let mut len = size;

        if let Some((&prev_start, &prev_len)) = self.free.range(..addr).next_back() {
            debug_assert!(prev_start + prev_len <= addr, "double free at {:#x}", addr);
            if prev_start + prev_len == addr {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }

        if let Some((&next_start, &next_len)) = self.free.range(addr..).next() {
            debug_assert!(next_start >= end, "double free at {:#x}", addr);
            if next_start == end {
                self.free.remove(&next_start);
                len += next_len;
            }
        }

        self.free.insert(start, len);
        self.free_bytes += size;
    }

    /// Total bytes currently free.
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Number of disjoint free ranges.
    pub fn range_count(&self) -> usize {
        self.free.len()
    }

    /// Iterate free ranges as `(start, len)` in address order.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.free.iter().map(|(&start, &len)| (start, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_address_first() {
        let mut vma = VirtualAddressAllocator::new();
        vma.free(0x1000, 0x1000);
        vma.free(0x8000, 0x1000);

        assert_eq!(vma.alloc(0x100, 1), Some(0x1000));
        assert_eq!(vma.alloc(0x100, 1), Some(0x1100));
    }

    #[test]
    fn test_alignment_splits_head() {
        let mut vma = VirtualAddressAllocator::new();
        vma.free(0x10, 0x100);

        assert_eq!(vma.alloc(0x20, 0x40), Some(0x40));
        // head [0x10, 0x40) and tail [0x60, 0x110) remain
        assert_eq!(vma.range_count(), 2);
        assert_eq!(vma.free_bytes(), 0x100 - 0x20);
        assert_eq!(vma.alloc(0x30, 1), Some(0x10));
    }

    #[test]
    fn test_no_fit_returns_none() {
        let mut vma = VirtualAddressAllocator::new();
        assert_eq!(vma.alloc(1, 1), None);

        vma.free(0, 100);
        assert_eq!(vma.alloc(101, 1), None);
        assert_eq!(vma.alloc(64, 64), Some(0));
        assert_eq!(vma.alloc(64, 64), None);
    }

    #[test]
    fn test_free_merges_both_neighbours() {
        let mut vma = VirtualAddressAllocator::new();
        vma.free(0, 300);
        let a = vma.alloc(100, 1).unwrap();
        let b = vma.alloc(100, 1).unwrap();
        let c = vma.alloc(100, 1).unwrap();
        assert_eq!(vma.range_count(), 0);

        vma.free(a, 100);
        vma.free(c, 100);
        assert_eq!(vma.range_count(), 2);

        vma.free(b, 100);
        assert_eq!(vma.range_count(), 1);
        assert_eq!(vma.ranges().collect::<Vec<_>>(), vec![(0, 300)]);
    }

    #[test]
    fn test_round_trip_restores_capacity() {
        let mut vma = VirtualAddressAllocator::new();
        vma.free(1 << 48, 65536);
        let before = vma.free_bytes();

        let mut live = Vec::new();
        for (i, size) in [10u64, 4000, 333, 16, 9000, 1].iter().enumerate() {
            let align = 1u64 << (i % 5);
            live.push((vma.alloc(*size, align).unwrap(), *size));
        }
        // free in a scrambled order
        for idx in [3, 0, 5, 1, 4, 2] {
            let (addr, size) = live[idx];
            vma.free(addr, size);
        }

        assert_eq!(vma.free_bytes(), before);
        assert_eq!(vma.range_count(), 1);
    }

    #[test]
    fn test_live_ranges_never_overlap() {
        let mut vma = VirtualAddressAllocator::new();
        vma.free(0, 4096);

        let mut live: Vec<(u64, u64)> = Vec::new();
        let sizes = [48u64, 7, 129, 256, 3, 64, 500];
        for (i, &size) in sizes.iter().cycle().take(20).enumerate() {
            if let Some(addr) = vma.alloc(size, 1 << (i % 4)) {
                live.push((addr, size));
            }
            if i % 3 == 2 {
                let (addr, size) = live.remove(0);
                vma.free(addr, size);
            }
        }

        for (i, &(a, sa)) in live.iter().enumerate() {
            for &(b, sb) in &live[i + 1..] {
                assert!(a + sa <= b || b + sb <= a, "{:#x}+{} overlaps {:#x}+{}", a, sa, b, sb);
            }
        }
    }
}
