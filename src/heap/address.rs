//! Heap addresses and the packed free-list key.

/// Bits available for the intra-store offset.
pub const OFFSET_BITS: u32 = 48;

/// Largest representable intra-store offset plus one.
pub const MAX_STORE_OFFSET: u64 = 1 << OFFSET_BITS;

/// Largest store index a key can carry.
pub const MAX_STORE_INDEX: u16 = u16::MAX - 1;

/// An opaque, stable device virtual address returned by the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapAddress(u64);

impl HeapAddress {
    /// Wrap a device virtual address.
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    /// Get the raw device virtual address.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HeapAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Location inside the heap's stores, as tracked by the free list.
///
/// Packs to `(store_index + 1) << 48 | offset`, so every store owns a
/// disjoint key range and ranges from different stores never merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackedKey {
    pub store_index: u16,
    pub offset: u64,
}

impl PackedKey {
    /// Build a key, checking both fields fit their bit budget.
    pub fn new(store_index: usize, offset: u64) -> Self {
        assert!(store_index <= MAX_STORE_INDEX as usize, "store index {} out of range", store_index);
        assert!(offset < MAX_STORE_OFFSET, "store offset {:#x} out of range", offset);
        Self {
            store_index: store_index as u16,
            offset,
        }
    }

    /// Encode into the free-list key space.
    pub const fn pack(self) -> u64 {
        ((self.store_index as u64 + 1) << OFFSET_BITS) | self.offset
    }

    /// Decode a key produced by [`PackedKey::pack`].
    ///
    /// # Panics
    ///
    /// Panics on a key with a zero store field, which `pack` never produces.
    pub fn unpack(key: u64) -> Self {
        let tag = key >> OFFSET_BITS;
        assert!(tag > 0, "key {:#x} has no store tag", key);
        Self {
            store_index: (tag - 1) as u16,
            offset: key & (MAX_STORE_OFFSET - 1),
        }
    }
}
