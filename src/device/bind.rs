//! Address-space bind operations and their coalescing builder.

use super::traits::BackingHandle;

/// Whether a bind operation maps backing memory or tears a mapping down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Back `[address, address + range)` with `handle` at `backing_offset`.
    Map,
    /// Remove whatever backs `[address, address + range)`.
    Unmap,
}

/// One bind operation on the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOp {
    pub kind: BindKind,
    /// Backing allocation; `None` for unmaps
    pub handle: Option<BackingHandle>,
    /// Start of the device address range
    pub address: u64,
    /// Offset into the backing allocation
    pub backing_offset: u64,
    /// Length in bytes
    pub range: u64,
}

impl BindOp {
    /// Map `range` bytes of `handle` at `address`.
    pub fn map(handle: BackingHandle, address: u64, backing_offset: u64, range: u64) -> Self {
        Self {
            kind: BindKind::Map,
            handle: Some(handle),
            address,
            backing_offset,
            range,
        }
    }

    /// Unmap `range` bytes at `address`.
    pub fn unmap(address: u64, range: u64) -> Self {
        Self {
            kind: BindKind::Unmap,
            handle: None,
            address,
            backing_offset: 0,
            range,
        }
    }

    /// Whether `next` continues this op in address and, for maps, in
    /// backing offset.
    fn is_continued_by(&self, next: &BindOp) -> bool {
        let offset_contiguous = match self.kind {
            BindKind::Map => next.backing_offset == self.backing_offset + self.range,
            BindKind::Unmap => true,
        };
        self.kind == next.kind
            && self.handle == next.handle
            && next.address == self.address + self.range
            && offset_contiguous
    }
}

/// Collects bind operations, merging each into its predecessor when the two
/// are contiguous.
///
/// Holds a single pending op: a contiguous op extends it, anything else
/// flushes it to the output and takes its place.
#[derive(Debug, Default)]
pub struct BindBuilder {
    pending: Option<BindOp>,
    ops: Vec<BindOp>,
}

impl BindBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn push(&mut self, op: BindOp) {
        if op.range == 0 {
            return;
        }
        match self.pending.as_mut() {
            Some(pending) if pending.is_continued_by(&op) => pending.range += op.range,
            Some(_) => {
                if let Some(prev) = self.pending.replace(op) {
                    self.ops.push(prev);
                }
            }
            None => self.pending = Some(op),
        }
    }

    /// Number of operations the builder would emit right now.
    pub fn len(&self) -> usize {
        self.ops.len() + usize::from(self.pending.is_some())
    }

    /// Whether nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush the pending op and return the coalesced list.
    pub fn finish(mut self) -> Vec<BindOp> {
        if let Some(pending) = self.pending.take() {
            self.ops.push(pending);
        }
        self.ops
    }
}
