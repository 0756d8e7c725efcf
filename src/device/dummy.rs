//! Dummy device implementation for testing.
//!
//! Backs every allocation with host RAM and simulates an asynchronous copy
//! engine: submissions stay pending until the timeline is advanced, and a
//! copy reads its staging payload only when it executes. Reusing staging
//! memory too early therefore corrupts the destination, just like on
//! hardware.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ptr::NonNull;
use std::time::Duration;

use super::bind::{BindKind, BindOp};
use super::command::{CommandList, CopyCommand};
use super::traits::*;
use crate::error::{Error, Result};
use crate::sync::mutex::Mutex;
use crate::sync::timeline::Timepoint;
use crate::util::layout::align_up;

/// Granularity of dummy device addresses.
const PAGE_SIZE: u64 = 4096;

/// First device address handed out.
const ADDRESS_BASE: u64 = 0x1_0000_0000;

/// A copy the dummy copy engine has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutedCopy {
    /// Timepoint of the submission that carried the copy
    pub timepoint: Timepoint,
    /// Staging buffer the payload was read from
    pub buffer: BackingHandle,
    /// Payload offset inside the staging buffer
    pub src_offset: u64,
    /// Destination device address
    pub dst_address: u64,
    /// Bytes copied
    pub size: u64,
}

/// Host memory standing in for one backing allocation.
#[derive(Debug)]
struct DummyBacking {
    ptr: NonNull<u8>,
    layout: Layout,
    address: u64,
    size: u64,
    mapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    handle: BackingHandle,
    backing_offset: u64,
    range: u64,
}

#[derive(Debug)]
struct PendingSubmission {
    signal: Timepoint,
    buffer: BackingHandle,
    commands: Vec<CopyCommand>,
}

/// Fault injection switches.
#[derive(Debug, Default)]
struct Faults {
    fail_next_submit: bool,
    fail_next_wait: bool,
    fail_next_map: bool,
    allocation_limit: Option<usize>,
    memory_limit: Option<u64>,
}

#[derive(Debug)]
struct DummyState {
    allocations: HashMap<BackingHandle, DummyBacking>,
    next_handle: u64,
    next_address: u64,
    allocated_bytes: u64,
    created_count: u64,
    reservations: Vec<(u64, u64)>,
    bindings: BTreeMap<u64, Binding>,
    bind_log: Vec<BindOp>,
    pending: VecDeque<PendingSubmission>,
    submitted: Timepoint,
    completed: Timepoint,
    submit_count: u64,
    executed: Vec<ExecutedCopy>,
    fault: Option<String>,
    faults: Faults,
    auto_complete: bool,
}

impl DummyState {
    fn find_backing(&self, address: u64, len: u64) -> Option<*mut u8> {
        self.allocations.values().find_map(|backing| {
            let offset = address.checked_sub(backing.address)?;
            if offset.checked_add(len)? > backing.size {
                return None;
            }
            // SAFETY: offset + len lies within the allocation
            Some(unsafe { backing.ptr.as_ptr().add(offset as usize) })
        })
    }

    /// Resolve a device address range to host memory, trying explicit
    /// bindings first and direct allocation addresses second.
    fn resolve(&self, address: u64, len: u64) -> Option<*mut u8> {
        if let Some((&start, binding)) = self.bindings.range(..=address).next_back() {
            let delta = address - start;
            if delta + len <= binding.range {
                let backing = self.allocations.get(&binding.handle)?;
                let offset = binding.backing_offset + delta;
                if offset + len <= backing.size {
                    // SAFETY: offset + len lies within the allocation
                    return Some(unsafe { backing.ptr.as_ptr().add(offset as usize) });
                }
            }
        }
        self.find_backing(address, len)
    }

    fn execute(&mut self, submission: PendingSubmission) -> std::result::Result<(), String> {
        let (src_base, src_size) = match self.allocations.get(&submission.buffer) {
            Some(backing) => (backing.ptr, backing.size),
            None => return Err(format!("staging buffer {:?} destroyed while in flight", submission.buffer)),
        };

        for cmd in submission.commands {
            let size = u64::from(cmd.size);
            if cmd.src_offset + size > src_size {
                return Err(format!("copy source {:#x}+{} out of bounds", cmd.src_offset, size));
            }
            let dst = self
                .resolve(cmd.dst_address, size)
                .ok_or_else(|| format!("copy destination {:#x} is not mapped", cmd.dst_address))?;

            // SAFETY: both ranges were bounds-checked against live allocations
            unsafe {
                std::ptr::copy(src_base.as_ptr().add(cmd.src_offset as usize), dst, size as usize);
            }
            self.executed.push(ExecutedCopy {
                timepoint: submission.signal,
                buffer: submission.buffer,
                src_offset: cmd.src_offset,
                dst_address: cmd.dst_address,
                size,
            });
        }
        Ok(())
    }

    fn advance(&mut self, timepoint: Timepoint) {
        while self.fault.is_none() {
            match self.pending.front() {
                Some(front) if front.signal <= timepoint => {}
                _ => break,
            }
            let Some(submission) = self.pending.pop_front() else {
                break;
            };
            let signal = submission.signal;
            match self.execute(submission) {
                Ok(()) => self.completed = signal,
                Err(reason) => self.fault = Some(reason),
            }
        }
    }

    fn check_fault(&self) -> Result<()> {
        match &self.fault {
            Some(reason) => Err(Error::DeviceLost(format!("device fault: {}", reason))),
            None => Ok(()),
        }
    }
}

/// In-RAM device implementing both [`BackingProvider`] and
/// [`SubmissionQueue`].
pub struct DummyDevice {
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a device whose submissions complete only when advanced.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState {
                allocations: HashMap::new(),
                next_handle: 1,
                next_address: ADDRESS_BASE,
                allocated_bytes: 0,
                created_count: 0,
                reservations: Vec::new(),
                bindings: BTreeMap::new(),
                bind_log: Vec::new(),
                pending: VecDeque::new(),
                submitted: 0,
                completed: 0,
                submit_count: 0,
                executed: Vec::new(),
                fault: None,
                faults: Faults::default(),
                auto_complete: false,
            }),
        }
    }

    /// Create a device that executes every submission immediately.
    pub fn auto_completing() -> Self {
        let device = Self::new();
        device.set_auto_complete(true);
        device
    }

    /// Toggle immediate execution of submissions.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().auto_complete = enabled;
    }

    /// Execute pending submissions up to and including `timepoint`.
    pub fn advance(&self, timepoint: Timepoint) {
        self.state.lock().advance(timepoint);
    }

    /// Execute everything submitted so far.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        let submitted = state.submitted;
        state.advance(submitted);
    }

    /// Make the next `submit` fail.
    pub fn fail_next_submit(&self) {
        self.state.lock().faults.fail_next_submit = true;
    }

    /// Make the next `wait` fail.
    pub fn fail_next_wait(&self) {
        self.state.lock().faults.fail_next_wait = true;
    }

    /// Make the next `map` fail.
    pub fn fail_next_map(&self) {
        self.state.lock().faults.fail_next_map = true;
    }

    /// Cap the number of live backing allocations.
    pub fn set_allocation_limit(&self, limit: Option<usize>) {
        self.state.lock().faults.allocation_limit = limit;
    }

    /// Cap the total bytes of live backing allocations.
    pub fn set_memory_limit(&self, limit: Option<u64>) {
        self.state.lock().faults.memory_limit = limit;
    }

    /// Copy `len` bytes out of device memory at `address`.
    pub fn read(&self, address: u64, len: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let ptr = state.resolve(address, len)?;
        let mut out = vec![0u8; len as usize];
        // SAFETY: resolve() bounds-checked the range
        unsafe { std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), len as usize) };
        Some(out)
    }

    /// Write bytes into device memory at `address`, bypassing the queue.
    pub fn write(&self, address: u64, data: &[u8]) -> bool {
        let state = self.state.lock();
        match state.resolve(address, data.len() as u64) {
            Some(ptr) => {
                // SAFETY: resolve() bounds-checked the range
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
                true
            }
            None => false,
        }
    }

    /// Copies executed so far, in execution order.
    pub fn executed_copies(&self) -> Vec<ExecutedCopy> {
        self.state.lock().executed.clone()
    }

    /// Every bind operation applied so far.
    pub fn bind_log(&self) -> Vec<BindOp> {
        self.state.lock().bind_log.clone()
    }

    /// Number of backing allocations currently alive.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Total backing allocations ever created.
    pub fn created_count(&self) -> u64 {
        self.state.lock().created_count
    }

    /// Bytes held by live backing allocations.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated_bytes
    }

    /// Number of live address-space reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.lock().reservations.len()
    }

    /// Whether `handle` is currently CPU-mapped.
    pub fn is_mapped(&self, handle: BackingHandle) -> bool {
        self.state
            .lock()
            .allocations
            .get(&handle)
            .map(|b| b.mapped)
            .unwrap_or(false)
    }

    /// Number of successful submissions.
    pub fn submit_count(&self) -> u64 {
        self.state.lock().submit_count
    }

    /// Highest timepoint submitted.
    pub fn submitted(&self) -> Timepoint {
        self.state.lock().submitted
    }

    /// Highest timepoint completed.
    pub fn completed(&self) -> Timepoint {
        self.state.lock().completed
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingProvider for DummyDevice {
    fn create(&self, size: u64, align: u64, _flags: BackingFlags) -> Result<BackingAllocation> {
        if size == 0 || size > isize::MAX as u64 {
            return Err(Error::InvalidSize { size });
        }
        if !align.is_power_of_two() && align != 0 {
            return Err(Error::InvalidAlignment { align });
        }

        let mut state = self.state.lock();
        if let Some(limit) = state.faults.allocation_limit {
            if state.allocations.len() >= limit {
                return Err(Error::OutOfDeviceMemory(format!(
                    "dummy device allocation limit ({}) reached",
                    limit
                )));
            }
        }
        if let Some(limit) = state.faults.memory_limit {
            if state.allocated_bytes + size > limit {
                return Err(Error::OutOfDeviceMemory(format!(
                    "dummy device memory limit ({} bytes) reached",
                    limit
                )));
            }
        }

        let layout = Layout::from_size_align(size as usize, 16)
            .map_err(|_| Error::InvalidSize { size })?;
        // SAFETY: layout has non-zero size
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or_else(|| Error::OutOfHostMemory(format!("failed to back {} bytes", size)))?;

        let address = align_up(state.next_address, align.max(PAGE_SIZE));
        state.next_address = align_up(address + size, PAGE_SIZE);

        let handle = BackingHandle::from_raw(state.next_handle);
        state.next_handle += 1;
        state.allocated_bytes += size;
        state.created_count += 1;
        state.allocations.insert(
            handle,
            DummyBacking {
                ptr,
                layout,
                address,
                size,
                mapped: false,
            },
        );

        Ok(BackingAllocation {
            handle,
            address,
            size,
        })
    }

    fn map(&self, handle: BackingHandle, _flags: MapFlags) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.faults.fail_next_map) {
            return Err(Error::OutOfHostMemory("injected map failure".to_string()));
        }
        let backing = state
            .allocations
            .get_mut(&handle)
            .ok_or(Error::Unsupported("unknown backing handle"))?;
        backing.mapped = true;
        Ok(backing.ptr)
    }

    fn unmap(&self, handle: BackingHandle) {
        if let Some(backing) = self.state.lock().allocations.get_mut(&handle) {
            backing.mapped = false;
        }
    }

    fn bind(&self, ops: &[BindOp]) -> Result<()> {
        let mut state = self.state.lock();
        for op in ops {
            match op.kind {
                BindKind::Map => {
                    let handle = op.handle.ok_or(Error::Unsupported("map without a handle"))?;
                    let size = state
                        .allocations
                        .get(&handle)
                        .map(|b| b.size)
                        .ok_or(Error::Unsupported("unknown backing handle"))?;
                    if op.backing_offset + op.range > size {
                        return Err(Error::InvalidSize { size: op.range });
                    }
                    let reserved = state.reservations.iter().any(|&(base, len)| {
                        op.address >= base && op.address + op.range <= base + len
                    });
                    if !reserved {
                        return Err(Error::Unsupported("bind outside reserved address space"));
                    }
                    state.bindings.insert(
                        op.address,
                        Binding {
                            handle,
                            backing_offset: op.backing_offset,
                            range: op.range,
                        },
                    );
                }
                BindKind::Unmap => {
                    let doomed: Vec<u64> = state
                        .bindings
                        .range(op.address..op.address + op.range)
                        .map(|(&start, _)| start)
                        .collect();
                    for start in doomed {
                        state.bindings.remove(&start);
                    }
                }
            }
            state.bind_log.push(*op);
        }
        Ok(())
    }

    fn reserve_address_space(&self, size: u64, align: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidSize { size });
        }
        let mut state = self.state.lock();
        let address = align_up(state.next_address, align.max(PAGE_SIZE));
        state.next_address = align_up(address + size, PAGE_SIZE);
        state.reservations.push((address, size));
        Ok(address)
    }

    fn release_address_space(&self, address: u64, size: u64) {
        self.state
            .lock()
            .reservations
            .retain(|&(base, len)| !(base == address && len == size));
    }

    fn destroy(&self, handle: BackingHandle) {
        let mut state = self.state.lock();
        if let Some(backing) = state.allocations.remove(&handle) {
            state.allocated_bytes -= backing.size;
            // SAFETY: allocated in create() with this exact layout
            unsafe { dealloc(backing.ptr.as_ptr(), backing.layout) };
        }
    }
}

impl SubmissionQueue for DummyDevice {
    fn submit(&self, commands: &CommandList<'_>, signal: Timepoint) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.faults.fail_next_submit) {
            return Err(Error::DeviceLost("injected submit failure".to_string()));
        }
        state.check_fault()?;
        if signal <= state.submitted {
            return Err(Error::DeviceLost(format!(
                "timeline went backwards: {} after {}",
                signal, state.submitted
            )));
        }
        if !state.allocations.contains_key(&commands.buffer) {
            return Err(Error::DeviceLost("submit from unknown staging buffer".to_string()));
        }

        let decoded: Vec<CopyCommand> = commands.commands().collect();
        if decoded.len() != commands.len() {
            return Err(Error::DeviceLost("malformed command list".to_string()));
        }

        state.pending.push_back(PendingSubmission {
            signal,
            buffer: commands.buffer,
            commands: decoded,
        });
        state.submitted = signal;
        state.submit_count += 1;

        if state.auto_complete {
            state.advance(signal);
        }
        Ok(())
    }

    fn query_progress(&self) -> Result<Timepoint> {
        let state = self.state.lock();
        state.check_fault()?;
        Ok(state.completed)
    }

    fn wait(&self, timepoint: Timepoint, _timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.faults.fail_next_wait) {
            return Err(Error::DeviceLost("injected wait failure".to_string()));
        }
        if timepoint > state.submitted {
            // Nothing will ever signal it; a real wait would hang.
            return Err(Error::DeviceLost(format!(
                "wait on unsubmitted timepoint {}",
                timepoint
            )));
        }
        state.advance(timepoint);
        state.check_fault()
    }
}

// SAFETY: all host memory is owned by the device and only touched under its
// mutex (or through mappings whose users uphold the BackingProvider contract)
unsafe impl Send for DummyDevice {}
unsafe impl Sync for DummyDevice {}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, backing) in state.allocations.drain() {
            // SAFETY: allocated in create() with this exact layout
            unsafe { dealloc(backing.ptr.as_ptr(), backing.layout) };
        }
    }
}
