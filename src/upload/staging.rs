//! Staging buffer with two cursors.
//!
//! ```text
//! 0          push_start      push_end          data_start       capacity
//! | submitted | pending cmds  |      free        | payload ...     |
//! ```
//!
//! Commands grow forward from 0, payloads grow backward from the end. The
//! buffer is full when the two regions meet.

use std::ptr::NonNull;

use crate::device::{BackingHandle, CopyCommand, COPY_COMMAND_SIZE};
use crate::sync::timeline::Timepoint;

/// One CPU-mapped staging buffer.
#[derive(Debug)]
pub struct StagingBuffer {
    handle: BackingHandle,
    map: NonNull<u8>,
    capacity: u64,
    push_start: u64,
    push_end: u64,
    data_start: u64,
    idle_timepoint: Timepoint,
}

// SAFETY: the mapping is owned by this buffer and only written through
// `&mut self`
unsafe impl Send for StagingBuffer {}

impl StagingBuffer {
    /// Wrap a freshly created and mapped backing allocation.
    ///
    /// # Safety
    ///
    /// `map` must point at `capacity` writable bytes that stay mapped for
    /// the lifetime of the buffer.
    pub(crate) unsafe fn new(handle: BackingHandle, map: NonNull<u8>, capacity: u64) -> Self {
        Self {
            handle,
            map,
            capacity,
            push_start: 0,
            push_end: 0,
            data_start: capacity,
            idle_timepoint: 0,
        }
    }

    /// Backing handle.
    pub fn handle(&self) -> BackingHandle {
        self.handle
    }

    /// Total bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Free bytes between the push and data regions.
    pub fn available(&self) -> u64 {
        self.data_start - self.push_end
    }

    /// End of the command region.
    pub fn push_end(&self) -> u64 {
        self.push_end
    }

    /// Start of the payload region.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Timepoint after which the device no longer reads this buffer.
    pub fn idle_timepoint(&self) -> Timepoint {
        self.idle_timepoint
    }

    /// Whether commands were pushed since the last flush.
    pub fn has_pending(&self) -> bool {
        self.push_end > self.push_start
    }

    /// Copy `bytes` into the payload region and return their offset.
    pub(crate) fn write_data(&mut self, bytes: &[u8]) -> u64 {
        let len = bytes.len() as u64;
        assert!(len <= self.available(), "staging payload overruns the command region");
        self.data_start -= len;
        // SAFETY: [data_start, data_start + len) is inside the mapping and
        // not referenced by any pending command
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.as_ptr().add(self.data_start as usize),
                bytes.len(),
            );
        }
        self.data_start
    }

    /// Append one command to the push region.
    pub(crate) fn push_command(&mut self, command: &CopyCommand) {
        assert!(COPY_COMMAND_SIZE <= self.available(), "staging command overruns the payload region");
        let encoded = command.encode();
        // SAFETY: [push_end, push_end + 32) is inside the mapping
        unsafe {
            std::ptr::copy_nonoverlapping(
                encoded.as_ptr(),
                self.map.as_ptr().add(self.push_end as usize),
                encoded.len(),
            );
        }
        self.push_end += COPY_COMMAND_SIZE;
    }

    /// Encoded commands pushed since the last flush.
    pub(crate) fn pending_commands(&self) -> &[u8] {
        let len = (self.push_end - self.push_start) as usize;
        // SAFETY: the push region lies inside the mapping and was written by
        // push_command
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().add(self.push_start as usize), len) }
    }

    /// Record a submission of every pending command.
    pub(crate) fn mark_flushed(&mut self, timepoint: Timepoint) {
        self.idle_timepoint = timepoint;
        self.push_start = self.push_end;
    }

    /// Empty both regions for reuse.
    pub(crate) fn reset(&mut self) {
        self.push_start = 0;
        self.push_end = 0;
        self.data_start = self.capacity;
    }
}
