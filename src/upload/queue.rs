//! The upload queue.
//!
//! Staging buffer lifecycle:
//!
//! ```text
//! FREE --reserve--> ACTIVE --flush--> SUBMITTED --progress >= idle--> FREE
//!                                         \--finish--> destroyed
//! ```
//!
//! Retired buffers wait in a FIFO pool. Flushes happen in timeline order,
//! so only the front of the pool ever needs checking.

use std::collections::VecDeque;
use std::sync::Arc;

use super::config::UploadConfig;
use super::staging::StagingBuffer;
use super::Uploader;
use crate::device::{
    BackingFlags, BackingProvider, CommandList, CopyCommand, MapFlags, SubmissionQueue,
    COPY_COMMAND_SIZE, MAX_COPY_SIZE,
};
use crate::error::Result;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;
use crate::sync::status::DeviceStatus;
use crate::sync::timeline::{Timeline, Timepoint};
use crate::util::size::format_bytes;

/// Alignment requested for staging allocations.
const STAGING_ALIGN: u64 = 4096;

/// Upload queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Payload bytes staged.
    pub bytes_uploaded: u64,

    /// Copy commands emitted.
    pub chunks: u64,

    /// Command lists submitted.
    pub flushes: u64,

    /// Staging buffers allocated.
    pub buffers_created: u64,

    /// Staging buffers taken back out of the pool.
    pub buffers_recycled: u64,

    /// Buffers currently waiting in the pool.
    pub pool_len: usize,

    /// Last timepoint handed to the device.
    pub last_flushed: Timepoint,
}

impl std::fmt::Display for UploadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Upload Queue Statistics:")?;
        writeln!(f, "  Uploaded:      {} in {} chunks", format_bytes(self.bytes_uploaded), self.chunks)?;
        writeln!(f, "  Flushes:       {}", self.flushes)?;
        writeln!(f, "  Buffers:       {} created, {} recycled", self.buffers_created, self.buffers_recycled)?;
        writeln!(f, "  Pool:          {}", self.pool_len)?;
        writeln!(f, "  Last flushed:  {}", self.last_flushed)?;
        Ok(())
    }
}

/// Mutable queue state, guarded by the queue mutex.
#[derive(Debug)]
struct QueueState {
    active: Option<StagingBuffer>,
    /// Submitted buffers, oldest first
    pool: VecDeque<StagingBuffer>,
    timeline: Timeline,
    torn_down: bool,
}

/// Stages payloads and submits copy commands to the device.
///
/// All methods take `&self`; one mutex serializes staging-buffer
/// management. [`UploadQueue::sync`] waits on the device without holding it.
pub struct UploadQueue<D: BackingProvider + SubmissionQueue> {
    device: Arc<D>,
    config: UploadConfig,
    status: Arc<DeviceStatus>,
    state: Mutex<QueueState>,
    bytes_uploaded: AtomicCounter,
    chunks: AtomicCounter,
    flushes: AtomicCounter,
    buffers_created: AtomicCounter,
    buffers_recycled: AtomicCounter,
}

impl<D: BackingProvider + SubmissionQueue> UploadQueue<D> {
    /// Create a queue with its own device status.
    ///
    /// No staging memory is allocated until the first upload.
    pub fn new(device: Arc<D>, config: UploadConfig) -> Result<Self> {
        Self::with_status(device, config, Arc::new(DeviceStatus::new()))
    }

    /// Create a queue that shares `status` with other users of the device.
    pub fn with_status(device: Arc<D>, config: UploadConfig, status: Arc<DeviceStatus>) -> Result<Self> {
        config.validate()?;
        log::info!(
            "upload queue created: {} staging buffers",
            format_bytes(config.staging_capacity)
        );
        Ok(Self {
            device,
            config,
            status,
            state: Mutex::new(QueueState {
                active: None,
                pool: VecDeque::new(),
                timeline: Timeline::new(),
                torn_down: false,
            }),
            bytes_uploaded: AtomicCounter::default(),
            chunks: AtomicCounter::default(),
            flushes: AtomicCounter::default(),
            buffers_created: AtomicCounter::default(),
            buffers_recycled: AtomicCounter::default(),
        })
    }

    /// Stage `data` for a copy to device address `dst`.
    ///
    /// Large payloads are split across staging buffers; earlier chunks may
    /// be submitted before this call returns. Nothing is guaranteed to have
    /// executed until [`UploadQueue::sync`].
    pub fn upload(&self, dst: u64, data: &[u8]) -> Result<()> {
        self.status.check()?;

        let mut state = self.state.lock();
        let mut dst = dst;
        let mut src = data;

        while !src.is_empty() {
            let size = src.len() as u64;
            // don't split small transfers, even at the cost of an early flush
            let min_size = COPY_COMMAND_SIZE + size.min(self.config.small_transfer);
            let mut buffer = self.reserve(&mut state, min_size)?;

            let chunk = size
                .min(buffer.available() - COPY_COMMAND_SIZE)
                .min(MAX_COPY_SIZE);
            let (head, tail) = src.split_at(chunk as usize);
            let src_offset = buffer.write_data(head);
            buffer.push_command(&CopyCommand {
                src_offset,
                dst_address: dst,
                size: chunk as u32,
            });
            state.active = Some(buffer);

            self.chunks.increment();
            self.bytes_uploaded.add(chunk);
            dst += chunk;
            src = tail;
        }
        Ok(())
    }

    /// Submit everything staged so far.
    ///
    /// Returns the timepoint that signals once it has executed, or the last
    /// flushed timepoint if nothing was pending.
    pub fn flush(&self) -> Result<Timepoint> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Flush, then block until the device has executed every submission.
    pub fn sync(&self) -> Result<()> {
        let last = {
            let mut state = self.state.lock();
            self.flush_locked(&mut state)?
        };
        if last == 0 {
            return Ok(());
        }
        self.device
            .wait(last, None)
            .map_err(|err| self.status.set_lost(format!("wait for timepoint {} failed: {}", last, err)))
    }

    /// Sync, then destroy every staging buffer.
    ///
    /// Buffers are destroyed even if the sync fails.
    pub fn finish(mut self) -> Result<()> {
        let result = self.sync();
        self.teardown();
        result
    }

    /// Last timepoint handed to the device.
    pub fn last_flushed(&self) -> Timepoint {
        self.state.lock().timeline.last_flushed()
    }

    /// The device status this queue reports losses to.
    pub fn status(&self) -> &Arc<DeviceStatus> {
        &self.status
    }

    /// The configuration this queue was created with.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Snapshot of the queue statistics.
    pub fn stats(&self) -> UploadStats {
        let state = self.state.lock();
        UploadStats {
            bytes_uploaded: self.bytes_uploaded.get(),
            chunks: self.chunks.get(),
            flushes: self.flushes.get(),
            buffers_created: self.buffers_created.get(),
            buffers_recycled: self.buffers_recycled.get(),
            pool_len: state.pool.len(),
            last_flushed: state.timeline.last_flushed(),
        }
    }

    /// Hand out a buffer with at least `min_size` free bytes.
    ///
    /// The buffer is taken out of `state.active`; the caller puts it back.
    fn reserve(&self, state: &mut QueueState, min_size: u64) -> Result<StagingBuffer> {
        if let Some(active) = state.active.take() {
            if active.available() >= min_size {
                return Ok(active);
            }
            state.active = Some(active);
            self.flush_locked(state)?;
            // nothing was pending, so nothing can still be reading it
            if let Some(idle) = state.active.take() {
                state.pool.push_back(idle);
            }
        }
        self.acquire(state)
    }

    /// Pop an idle buffer from the pool or create a new one.
    fn acquire(&self, state: &mut QueueState) -> Result<StagingBuffer> {
        if let Some(front) = state.pool.front() {
            let idle_at = front.idle_timepoint();
            let progress = self
                .device
                .query_progress()
                .map_err(|err| self.status.set_lost(format!("progress query failed: {}", err)))?;

            if progress >= idle_at {
                if let Some(mut buffer) = state.pool.pop_front() {
                    buffer.reset();
                    self.buffers_recycled.increment();
                    log::debug!(
                        "recycled staging buffer {:?} (idle at {}, progress {})",
                        buffer.handle(),
                        idle_at,
                        progress
                    );
                    return Ok(buffer);
                }
            }
        }
        self.create_buffer()
    }

    fn create_buffer(&self) -> Result<StagingBuffer> {
        let capacity = self.config.staging_capacity;
        let backing = self.device.create(
            capacity,
            STAGING_ALIGN,
            BackingFlags::GART | BackingFlags::MAP | BackingFlags::NO_SHARE,
        )?;
        let map = match self.device.map(backing.handle, MapFlags::WRITE) {
            Ok(map) => map,
            Err(err) => {
                self.device.destroy(backing.handle);
                return Err(err);
            }
        };

        self.buffers_created.increment();
        log::debug!(
            "created staging buffer {:?} ({})",
            backing.handle,
            format_bytes(capacity)
        );
        // SAFETY: freshly mapped allocation of `capacity` bytes, unmapped
        // only in teardown
        Ok(unsafe { StagingBuffer::new(backing.handle, map, capacity) })
    }

    fn flush_locked(&self, state: &mut QueueState) -> Result<Timepoint> {
        self.status.check()?;

        let last = state.timeline.last_flushed();
        let Some(mut buffer) = state.active.take() else {
            return Ok(last);
        };
        if !buffer.has_pending() {
            state.active = Some(buffer);
            return Ok(last);
        }

        let signal = state.timeline.next();
        let list = CommandList {
            buffer: buffer.handle(),
            bytes: buffer.pending_commands(),
        };
        let commands = list.len();
        if let Err(err) = self.device.submit(&list, signal) {
            state.active = Some(buffer);
            return Err(self.status.set_lost(format!("submit of timepoint {} failed: {}", signal, err)));
        }

        state.timeline.commit(signal);
        buffer.mark_flushed(signal);
        state.pool.push_back(buffer);
        self.flushes.increment();

        log::trace!("flushed {} copy commands at timepoint {}", commands, signal);
        Ok(signal)
    }

    fn teardown(&mut self) {
        let state = self.state.get_mut();
        if state.torn_down {
            return;
        }
        state.torn_down = true;

        let buffers: Vec<StagingBuffer> = state.active.take().into_iter().chain(state.pool.drain(..)).collect();
        for buffer in &buffers {
            self.device.unmap(buffer.handle());
            self.device.destroy(buffer.handle());
        }
        log::info!(
            "upload queue destroyed: {} staging buffers, last timepoint {}",
            buffers.len(),
            state.timeline.last_flushed()
        );
    }
}

impl<D: BackingProvider + SubmissionQueue> Uploader for UploadQueue<D> {
    fn upload(&self, dst: u64, data: &[u8]) -> Result<()> {
        UploadQueue::upload(self, dst, data)
    }
}

impl<D: BackingProvider + SubmissionQueue> Drop for UploadQueue<D> {
    fn drop(&mut self) {
        if self.state.get_mut().torn_down {
            return;
        }
        if let Err(err) = self.sync() {
            log::warn!("upload queue dropped without a clean sync: {}", err);
        }
        self.teardown();
    }
}

impl<D: BackingProvider + SubmissionQueue> std::fmt::Debug for UploadQueue<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("config", &self.config)
            .field("lost", &self.status.is_lost())
            .field("stats", &self.stats())
            .finish()
    }
}
