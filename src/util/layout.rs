//! Alignment arithmetic on device offsets.

/// Align an offset up to the given power-of-two alignment.
///
/// Returns `None` if the result does not fit in a `u64`.
#[inline]
pub const fn checked_align_up(offset: u64, align: u64) -> Option<u64> {
    match offset.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align an offset up to the given power-of-two alignment.
#[inline]
pub const fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

/// Whether `offset` is a multiple of the power-of-two `align`.
#[inline]
pub const fn is_aligned(offset: u64, align: u64) -> bool {
    offset & (align - 1) == 0
}
