//! The resident heap.
//!
//! Turns `(size, align)` requests into durable device virtual addresses.
//! Backing memory is created lazily in geometrically growing stores and is
//! only released when the heap itself is torn down.
//!
//! The free list runs on packed keys (see [`PackedKey`]), so a single
//! allocation never straddles two stores. Contiguous heaps additionally bind
//! every store back to back inside one reserved address range.

use std::ptr::NonNull;
use std::sync::Arc;

use super::address::{HeapAddress, PackedKey};
use super::config::HeapConfig;
use super::stats::HeapStats;
use super::vma::VirtualAddressAllocator;
use crate::device::{BackingHandle, BackingProvider, BindBuilder, BindOp, MapFlags};
use crate::diagnostics::{self, GH001, GH002, GH003};
use crate::error::{Error, Result};
use crate::sync::atomics::{AtomicCounter, ByteGauge};
use crate::sync::mutex::Mutex;
use crate::upload::Uploader;
use crate::util::layout::is_aligned;
use crate::util::size::format_bytes;

/// One block of backing memory owned by a heap.
#[derive(Debug, Clone, Copy)]
pub struct BackingStore {
    /// Backend handle
    pub handle: BackingHandle,
    /// CPU mapping, if the heap maps its stores
    pub map: Option<NonNull<u8>>,
    /// Size in bytes, padding included
    pub size: u64,
    /// Device address the heap hands out for offset 0 of this store
    pub address: u64,
}

impl BackingStore {
    /// Whether `address` falls inside this store.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size
    }
}

// SAFETY: the mapping pointer is only dereferenced for ranges the heap has
// handed out, and the store outlives every such range
unsafe impl Send for BackingStore {}
unsafe impl Sync for BackingStore {}

/// Mutable heap state, guarded by the heap mutex.
#[derive(Debug)]
struct HeapState {
    /// Append-only; index is the store tag in packed keys
    stores: Vec<BackingStore>,
    vma: VirtualAddressAllocator,
    total_size: u64,
}

/// A carved allocation, before it is handed to the caller.
struct Carved {
    address: HeapAddress,
    cpu: Option<NonNull<u8>>,
}

/// GPU-resident heap over lazily grown backing stores.
///
/// `alloc` and `free` may be called from any thread; one mutex serializes
/// the free list and any growth it triggers.
pub struct ResidentHeap<P: BackingProvider> {
    provider: Arc<P>,
    config: HeapConfig,
    /// Reserved address range of a contiguous heap
    contiguous_base: Option<u64>,
    reserved_size: u64,
    state: Mutex<HeapState>,
    alloc_count: AtomicCounter,
    free_count: AtomicCounter,
    growth_count: AtomicCounter,
    live_bytes: ByteGauge,
}

impl<P: BackingProvider> ResidentHeap<P> {
    /// Create a heap. No backing memory is created until the first `alloc`.
    ///
    /// Contiguous heaps reserve address space for every store they may ever
    /// create up front.
    pub fn new(provider: Arc<P>, config: HeapConfig) -> Result<Self> {
        config.validate()?;

        let (contiguous_base, reserved_size) = if config.contiguous {
            let size = config.max_heap_size();
            let base = provider.reserve_address_space(size, config.min_store_size)?;
            if !is_aligned(base, config.min_store_size) {
                provider.release_address_space(base, size);
                return Err(Error::Unsupported(
                    "address-space reservation is not aligned to the minimum store size",
                ));
            }
            (Some(base), size)
        } else {
            (None, 0)
        };

        log::info!(
            "resident heap created: min store {}, up to {} stores{}",
            format_bytes(config.min_store_size),
            config.max_store_count,
            match contiguous_base {
                Some(base) => format!(", contiguous at {:#x}", base),
                None => String::new(),
            }
        );

        Ok(Self {
            provider,
            state: Mutex::new(HeapState {
                stores: Vec::with_capacity(config.max_store_count as usize),
                vma: VirtualAddressAllocator::new(),
                total_size: 0,
            }),
            config,
            contiguous_base,
            reserved_size,
            alloc_count: AtomicCounter::default(),
            free_count: AtomicCounter::default(),
            growth_count: AtomicCounter::default(),
            live_bytes: ByteGauge::default(),
        })
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two no larger than the minimum store size.
    pub fn alloc(&self, size: u64, align: u64) -> Result<HeapAddress> {
        self.carve(size, align).map(|carved| carved.address)
    }

    /// Allocate from a CPU-mapped heap and return the CPU pointer as well.
    ///
    /// The pointer stays valid until the range is freed or the heap is
    /// torn down.
    pub fn alloc_mapped(&self, size: u64, align: u64) -> Result<(HeapAddress, NonNull<u8>)> {
        if !self.config.is_mapped() {
            return Err(Error::Unsupported("heap stores are not CPU-mapped"));
        }
        // every store of a mapped heap carries a mapping
        self.carve(size, align)
            .map(|carved| carved.cpu.map(|ptr| (carved.address, ptr)))?
            .ok_or(Error::Unsupported("heap stores are not CPU-mapped"))
    }

    /// Allocate space for `data` and fill it.
    ///
    /// Writable mapped heaps are filled with a plain memcpy; everything else
    /// goes through `uploader`. If the upload fails the range is freed
    /// again before the error is returned.
    pub fn upload<U: Uploader + ?Sized>(&self, uploader: &U, data: &[u8], align: u64) -> Result<HeapAddress> {
        let size = data.len() as u64;
        let carved = self.carve(size, align)?;

        match carved.cpu {
            Some(ptr) if self.config.map_flags.contains(MapFlags::WRITE) => {
                // SAFETY: the range was just carved from a mapped store and
                // is exclusively ours
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
                Ok(carved.address)
            }
            _ => match uploader.upload(carved.address.raw(), data) {
                Ok(()) => Ok(carved.address),
                Err(err) => {
                    log::debug!("upload of {} bytes to {} failed, releasing range", size, carved.address);
                    self.free(carved.address, size);
                    Err(err)
                }
            },
        }
    }

    /// Return a range obtained from `alloc`, `alloc_mapped` or `upload`.
    ///
    /// # Panics
    ///
    /// Panics if `address` does not belong to any store of this heap.
    pub fn free(&self, address: HeapAddress, size: u64) {
        assert!(size > 0, "free of a zero-sized range at {}", address);

        let mut state = self.state.lock();
        let owner = state
            .stores
            .iter()
            .position(|store| store.contains(address.raw()));

        let Some(index) = owner else {
            drop(state);
            diagnostics::emit_with_context(&GH003, &format!("address {}, size {}", address, size));
            panic!("free of address {} not owned by this heap", address);
        };

        let offset = address.raw() - state.stores[index].address;
        state.vma.free(PackedKey::new(index, offset).pack(), size);
        drop(state);

        self.free_count.increment();
        self.live_bytes.shrink(size);
    }

    /// Tear the heap down: unbind, unmap and destroy every store in
    /// creation order, then release the address-space reservation.
    pub fn finish(mut self) {
        self.teardown();
    }

    /// Base of the reserved address range of a contiguous heap.
    pub fn contiguous_base_address(&self) -> Option<HeapAddress> {
        self.contiguous_base.map(HeapAddress::new)
    }

    /// Bytes of backing memory created so far.
    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    /// Number of backing stores created so far.
    pub fn store_count(&self) -> usize {
        self.state.lock().stores.len()
    }

    /// The configuration this heap was created with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The backing provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Snapshot of the heap statistics.
    pub fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        HeapStats {
            total_size: state.total_size,
            store_count: state.stores.len(),
            live_bytes: self.live_bytes.current(),
            peak_live_bytes: self.live_bytes.peak(),
            free_bytes: state.vma.free_bytes(),
            alloc_count: self.alloc_count.get(),
            free_count: self.free_count.get(),
            growth_count: self.growth_count.get(),
        }
    }

    fn carve(&self, size: u64, align: u64) -> Result<Carved> {
        if size == 0 {
            return Err(Error::InvalidSize { size });
        }
        if !align.is_power_of_two() || align > self.config.min_store_size {
            return Err(Error::InvalidAlignment { align });
        }

        let mut state = self.state.lock();
        let key = match state.vma.alloc(size, align) {
            Some(key) => key,
            None => {
                self.grow(&mut state)?;
                match state.vma.alloc(size, align) {
                    Some(key) => key,
                    None => {
                        drop(state);
                        diagnostics::emit_with_context(&GH002, &format!("size {}, align {}", size, align));
                        return Err(Error::OutOfDeviceMemory(format!(
                            "{} does not fit in a single backing store",
                            format_bytes(size)
                        )));
                    }
                }
            }
        };

        let key = PackedKey::unpack(key);
        let store = &state.stores[key.store_index as usize];
        let address = HeapAddress::new(store.address + key.offset);
        debug_assert!(is_aligned(address.raw(), align));
        // SAFETY: offset + size lies inside the store's mapping
        let cpu = store
            .map
            .map(|base| unsafe { NonNull::new_unchecked(base.as_ptr().add(key.offset as usize)) });
        drop(state);

        self.alloc_count.increment();
        self.live_bytes.grow(size);
        Ok(Carved { address, cpu })
    }

    /// Append one store and hand its usable range to the free list.
    fn grow(&self, state: &mut HeapState) -> Result<()> {
        let index = state.stores.len();
        if index >= self.config.max_store_count as usize {
            diagnostics::emit_with_context(&GH001, &format!("{} stores", index));
            return Err(Error::OutOfDeviceMemory(format!(
                "resident heap reached its cap of {} backing stores",
                self.config.max_store_count
            )));
        }

        let size = self.config.store_size(index);
        let backing = self
            .provider
            .create(size, self.config.min_store_size, self.config.backing_flags)?;

        // Alignment of handed-out addresses is relative to the store base.
        if self.contiguous_base.is_none()
            && !is_aligned(backing.address, self.config.min_store_size)
        {
            self.provider.destroy(backing.handle);
            return Err(Error::OutOfDeviceMemory(format!(
                "backing store placed at {:#x}, not aligned to {}",
                backing.address,
                format_bytes(self.config.min_store_size)
            )));
        }

        let map = if self.config.is_mapped() {
            match self.provider.map(backing.handle, self.config.map_flags) {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    self.provider.destroy(backing.handle);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let address = match self.contiguous_base {
            Some(base) => {
                let address = base + state.total_size;
                let mut binds = BindBuilder::new();
                binds.push(BindOp::map(backing.handle, address, 0, size));
                if let Err(err) = self.provider.bind(&binds.finish()) {
                    if map.is_some() {
                        self.provider.unmap(backing.handle);
                    }
                    self.provider.destroy(backing.handle);
                    return Err(err);
                }
                address
            }
            None => backing.address,
        };

        let overalloc = self.config.overalloc;
        if self.contiguous_base.is_some() && overalloc > 0 {
            // The previous store's padding now has mapped memory behind it.
            if let Some(prev) = index.checked_sub(1) {
                let prev_size = state.stores[prev].size;
                state
                    .vma
                    .free(PackedKey::new(prev, prev_size - overalloc).pack(), overalloc);
            }
        }
        state.vma.free(PackedKey::new(index, 0).pack(), size - overalloc);

        state.stores.push(BackingStore {
            handle: backing.handle,
            map,
            size,
            address,
        });
        state.total_size += size;
        self.growth_count.increment();

        log::debug!(
            "resident heap grew: store {} ({}) at {:#x}, total {}",
            index,
            format_bytes(size),
            address,
            format_bytes(state.total_size)
        );
        Ok(())
    }

    fn teardown(&mut self) {
        let state = self.state.get_mut();
        let stores = std::mem::take(&mut state.stores);
        state.vma = VirtualAddressAllocator::new();

        if self.contiguous_base.is_some() && !stores.is_empty() {
            let mut unbinds = BindBuilder::new();
            for store in &stores {
                unbinds.push(BindOp::unmap(store.address, store.size));
            }
            if let Err(err) = self.provider.bind(&unbinds.finish()) {
                log::warn!("failed to unbind resident heap stores: {}", err);
            }
        }

        for store in &stores {
            if store.map.is_some() {
                self.provider.unmap(store.handle);
            }
            self.provider.destroy(store.handle);
        }

        if let Some(base) = self.contiguous_base.take() {
            self.provider.release_address_space(base, self.reserved_size);
        }

        if !stores.is_empty() {
            log::info!(
                "resident heap destroyed: {} stores, {}",
                stores.len(),
                format_bytes(state.total_size)
            );
        }
    }
}

impl<P: BackingProvider> Drop for ResidentHeap<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<P: BackingProvider> std::fmt::Debug for ResidentHeap<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentHeap")
            .field("config", &self.config)
            .field("contiguous_base", &self.contiguous_base)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BackingAllocation, BackingFlags, BindKind, DummyDevice};
    use crate::util::size::kib;

    struct FailingUploader;

    impl Uploader for FailingUploader {
        fn upload(&self, _dst: u64, _data: &[u8]) -> Result<()> {
            Err(Error::DeviceLost("queue gone".to_string()))
        }
    }

    /// Writes straight into dummy device memory.
    struct DirectUploader<'a>(&'a DummyDevice);

    impl Uploader for DirectUploader<'_> {
        fn upload(&self, dst: u64, data: &[u8]) -> Result<()> {
            if self.0.write(dst, data) {
                Ok(())
            } else {
                Err(Error::Unsupported("unmapped destination"))
            }
        }
    }

    /// Places every store (and reservation) 256 bytes past where the dummy
    /// device put it.
    struct SkewedDevice(DummyDevice);

    const SKEW: u64 = 256;

    impl BackingProvider for SkewedDevice {
        fn create(&self, size: u64, align: u64, flags: BackingFlags) -> Result<BackingAllocation> {
            let mut backing = self.0.create(size, align, flags)?;
            backing.address += SKEW;
            Ok(backing)
        }

        fn map(&self, handle: BackingHandle, flags: MapFlags) -> Result<NonNull<u8>> {
            self.0.map(handle, flags)
        }

        fn unmap(&self, handle: BackingHandle) {
            self.0.unmap(handle)
        }

        fn bind(&self, ops: &[BindOp]) -> Result<()> {
            self.0.bind(ops)
        }

        fn reserve_address_space(&self, size: u64, align: u64) -> Result<u64> {
            Ok(self.0.reserve_address_space(size, align)? + SKEW)
        }

        fn release_address_space(&self, address: u64, size: u64) {
            self.0.release_address_space(address - SKEW, size)
        }

        fn destroy(&self, handle: BackingHandle) {
            self.0.destroy(handle)
        }
    }

    fn heap(config: HeapConfig) -> (Arc<DummyDevice>, ResidentHeap<DummyDevice>) {
        crate::diagnostics::suppress_diagnostics(true);
        let device = Arc::new(DummyDevice::new());
        let heap = ResidentHeap::new(device.clone(), config).unwrap();
        (device, heap)
    }

    #[test]
    fn test_lazy_first_store() {
        let (device, heap) = heap(HeapConfig::default());
        assert_eq!(heap.store_count(), 0);
        assert_eq!(device.live_allocations(), 0);

        heap.alloc(10, 16).unwrap();
        assert_eq!(heap.store_count(), 1);
        assert_eq!(heap.total_size(), kib(64));
    }

    #[test]
    fn test_scenario_growth_on_exhaustion() {
        let (_device, heap) = heap(HeapConfig::default());

        let a = heap.alloc(10, 16).unwrap();
        assert_eq!(heap.store_count(), 1);

        let b = heap.alloc(40000, 16).unwrap();
        assert_eq!(heap.store_count(), 1);
        assert_eq!(b.raw() % 16, 0);
        assert!(a.raw() + 10 <= b.raw());

        let c = heap.alloc(40000, 16).unwrap();
        assert_eq!(heap.store_count(), 2);
        assert_eq!(heap.total_size(), 2 * kib(64));
        assert_eq!(heap.stats().growth_count, 2);
        assert!(c.raw() + 40000 <= a.raw() || c.raw() >= b.raw() + 40000);
    }

    #[test]
    fn test_geometric_store_sizes() {
        let (device, heap) = heap(HeapConfig::default());
        for _ in 0..4 {
            // each request fills a whole new store
            let size = heap.config().store_size(heap.store_count());
            heap.alloc(size, 16).unwrap();
        }
        assert_eq!(heap.store_count(), 4);
        assert_eq!(heap.total_size(), kib(64) + kib(64) + kib(128) + kib(256));
        assert_eq!(device.allocated_bytes(), heap.total_size());
    }

    #[test]
    fn test_store_cap_yields_out_of_memory() {
        let (_device, heap) = heap(HeapConfig::default().with_max_store_count(2));
        heap.alloc(kib(64), 16).unwrap();
        heap.alloc(kib(64), 16).unwrap();

        let err = heap.alloc(1, 1).unwrap_err();
        assert!(matches!(err, Error::OutOfDeviceMemory(_)));
        assert_eq!(heap.store_count(), 2);
    }

    #[test]
    fn test_oversized_request_rejected_after_one_growth() {
        let (_device, heap) = heap(HeapConfig::default());
        let err = heap.alloc(kib(64) + 1, 16).unwrap_err();
        assert!(err.is_out_of_memory());
        // the store grown for the attempt stays usable
        assert_eq!(heap.store_count(), 1);
        heap.alloc(kib(32), 16).unwrap();
        assert_eq!(heap.store_count(), 1);
    }

    #[test]
    fn test_provider_failure_propagates() {
        let (device, heap) = heap(HeapConfig::default());
        device.set_allocation_limit(Some(0));
        assert!(heap.alloc(16, 16).unwrap_err().is_out_of_memory());
        assert_eq!(heap.store_count(), 0);
    }

    #[test]
    fn test_invalid_requests() {
        let (_device, heap) = heap(HeapConfig::default());
        assert_eq!(heap.alloc(0, 16), Err(Error::InvalidSize { size: 0 }));
        assert_eq!(heap.alloc(16, 3), Err(Error::InvalidAlignment { align: 3 }));
        assert_eq!(
            heap.alloc(16, kib(128)),
            Err(Error::InvalidAlignment { align: kib(128) })
        );
    }

    #[test]
    fn test_alignment_holds_for_device_addresses() {
        let (_device, heap) = heap(HeapConfig::default());
        heap.alloc(3, 1).unwrap();
        for shift in 0..=16 {
            let align = 1u64 << shift;
            let addr = heap.alloc(5, align).unwrap();
            assert_eq!(addr.raw() % align, 0, "align {}", align);
        }
    }

    #[test]
    fn test_free_round_trip() {
        let (_device, heap) = heap(HeapConfig::default());
        heap.alloc(1, 1).unwrap();
        let baseline = heap.stats().free_bytes;

        let sizes = [100u64, 2000, 17, 4096, 9];
        let addrs: Vec<_> = sizes.iter().map(|&s| heap.alloc(s, 64).unwrap()).collect();
        for (addr, size) in addrs.iter().zip(sizes).rev() {
            heap.free(*addr, size);
        }

        let stats = heap.stats();
        assert_eq!(stats.free_bytes, baseline);
        assert_eq!(stats.live_bytes, 1);
        assert_eq!(stats.live_allocations(), 1);
        assert_eq!(stats.peak_live_bytes, 1 + sizes.iter().sum::<u64>());
    }

    #[test]
    #[should_panic(expected = "not owned by this heap")]
    fn test_free_of_foreign_address_panics() {
        let (_device, heap) = heap(HeapConfig::default());
        heap.alloc(16, 16).unwrap();
        heap.free(HeapAddress::new(0x10), 16);
    }

    #[test]
    fn test_overalloc_padding_never_handed_out() {
        let (_device, heap) = heap(HeapConfig::shader(false, false));
        let usable = kib(64) - 4096;
        let addr = heap.alloc(usable, 16).unwrap();
        assert_eq!(heap.store_count(), 1);

        // non-contiguous padding is never reclaimed
        heap.alloc(16, 16).unwrap();
        assert_eq!(heap.store_count(), 2);
        heap.free(addr, usable);
    }

    #[test]
    fn test_contiguous_stores_bind_back_to_back() {
        let (device, heap) = heap(HeapConfig::default().with_contiguous(true));
        let base = heap.contiguous_base_address().unwrap().raw();
        assert_eq!(device.reservation_count(), 1);

        heap.alloc(kib(64), 16).unwrap();
        heap.alloc(kib(64), 16).unwrap();
        heap.alloc(kib(128), 16).unwrap();

        let binds = device.bind_log();
        assert_eq!(binds.len(), 3);
        assert_eq!(binds[0].address, base);
        assert_eq!(binds[1].address, base + kib(64));
        assert_eq!(binds[2].address, base + kib(128));
        assert!(binds.iter().all(|op| op.kind == BindKind::Map));
    }

    #[test]
    fn test_contiguous_padding_reclaimed_by_next_store() {
        let (_device, heap) = heap(HeapConfig::shader(false, true));
        let base = heap.contiguous_base_address().unwrap().raw();
        let usable = kib(64) - 4096;

        heap.alloc(usable, 16).unwrap();
        let before = heap.stats().free_bytes;
        assert_eq!(before, 0);

        // growth into store 1 releases store 0's padding
        heap.alloc(usable, 16).unwrap();
        assert_eq!(heap.stats().free_bytes, 4096);

        let tail = heap.alloc(4096, 16).unwrap();
        assert_eq!(tail.raw(), base + usable);
        assert_eq!(heap.store_count(), 2);
    }

    #[test]
    fn test_mapped_heap_uploads_directly() {
        let (device, heap) = heap(HeapConfig::mapped());
        let addr = heap.upload(&FailingUploader, b"direct", 8).unwrap();
        assert_eq!(device.read(addr.raw(), 6).unwrap(), b"direct".to_vec());

        let (addr, ptr) = heap.alloc_mapped(4, 4).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr(), 4) };
        assert_eq!(device.read(addr.raw(), 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_misaligned_store_rejected() {
        crate::diagnostics::suppress_diagnostics(true);
        let device = Arc::new(SkewedDevice(DummyDevice::new()));
        let heap = ResidentHeap::new(device.clone(), HeapConfig::default()).unwrap();

        let err = heap.alloc(16, 4096).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(heap.store_count(), 0);
        assert_eq!(device.0.live_allocations(), 0);

        // each attempt creates and rejects a fresh store
        assert!(heap.alloc(16, 16).unwrap_err().is_out_of_memory());
        drop(heap);
        assert_eq!(device.0.live_allocations(), 0);
    }

    #[test]
    fn test_misaligned_reservation_rejected() {
        crate::diagnostics::suppress_diagnostics(true);
        let device = Arc::new(SkewedDevice(DummyDevice::new()));
        let err = ResidentHeap::new(device.clone(), HeapConfig::shader(false, true)).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(device.0.reservation_count(), 0);
    }

    #[test]
    fn test_alloc_mapped_across_growth() {
        let (device, heap) = heap(HeapConfig::mapped());
        let mut ranges = Vec::new();
        for i in 0..6u8 {
            let (addr, ptr) = heap.alloc_mapped(kib(30), 64).unwrap();
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), i, kib(30) as usize) };
            ranges.push((addr, i));
        }
        assert!(heap.store_count() >= 2);
        for (addr, fill) in ranges {
            assert_eq!(device.read(addr.raw(), kib(30)).unwrap(), vec![fill; kib(30) as usize]);
        }
    }

    #[test]
    fn test_unmapped_heap_uses_uploader() {
        let (device, heap) = heap(HeapConfig::default());
        let addr = heap.upload(&DirectUploader(&device), b"staged", 16).unwrap();
        assert_eq!(device.read(addr.raw(), 6).unwrap(), b"staged".to_vec());
        assert!(heap.alloc_mapped(4, 4).is_err());
    }

    #[test]
    fn test_failed_upload_frees_range() {
        let (_device, heap) = heap(HeapConfig::default());
        heap.alloc(8, 8).unwrap();
        let free_before = heap.stats().free_bytes;

        let err = heap.upload(&FailingUploader, &[0u8; 256], 16).unwrap_err();
        assert!(err.is_device_lost());

        let stats = heap.stats();
        assert_eq!(stats.free_bytes, free_before);
        assert_eq!(stats.live_bytes, 8);
    }

    #[test]
    fn test_map_failure_destroys_store() {
        let (device, heap) = heap(HeapConfig::mapped());
        device.fail_next_map();
        assert!(heap.alloc(16, 16).unwrap_err().is_out_of_memory());
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(heap.store_count(), 0);
    }

    #[test]
    fn test_finish_releases_everything() {
        let (device, heap) = heap(HeapConfig::shader(true, true));
        heap.alloc(kib(60), 16).unwrap();
        heap.alloc(kib(60), 16).unwrap();
        heap.alloc(kib(100), 16).unwrap();
        assert_eq!(device.live_allocations(), 3);

        heap.finish();
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.reservation_count(), 0);

        // three map binds, then a single coalesced unmap
        let binds = device.bind_log();
        assert_eq!(binds.len(), 4);
        assert_eq!(binds[3].kind, BindKind::Unmap);
        assert_eq!(binds[3].range, kib(256));
    }

    #[test]
    fn test_drop_tears_down() {
        let (device, heap) = heap(HeapConfig::mapped());
        heap.alloc(16, 16).unwrap();
        drop(heap);
        assert_eq!(device.live_allocations(), 0);
    }
}
