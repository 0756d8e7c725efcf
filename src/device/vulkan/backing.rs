//! Vulkan implementation of [`BackingProvider`].

use std::collections::HashMap;
use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::{AllocationError, MemoryLocation};

use super::super::bind::BindOp;
use super::super::traits::{
    BackingAllocation, BackingFlags, BackingHandle, BackingProvider, MapFlags,
};
use crate::error::{Error, Result};
use crate::sync::mutex::Mutex;

/// One buffer plus the memory behind it.
struct VulkanStore {
    buffer: vk::Buffer,
    allocation: Allocation,
}

struct VulkanState {
    allocator: Allocator,
    stores: HashMap<BackingHandle, VulkanStore>,
    next_handle: u64,
}

/// Backing provider over a Vulkan device.
///
/// The allocator must have been created with `buffer_device_address`
/// enabled. Host-visible stores are persistently mapped by `gpu-allocator`,
/// so `map` only hands out the existing pointer and `unmap` is a no-op.
///
/// Sparse address-space binding is not implemented; contiguous heaps fail
/// at creation with [`Error::Unsupported`].
pub struct VulkanBacking {
    device: ash::Device,
    state: Mutex<VulkanState>,
}

impl VulkanBacking {
    /// Wrap a device and an allocator created for it.
    pub fn new(device: ash::Device, allocator: Allocator) -> Self {
        Self {
            device,
            state: Mutex::new(VulkanState {
                allocator,
                stores: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Raw buffer behind a handle, for recording copies against it.
    pub fn buffer(&self, handle: BackingHandle) -> Option<vk::Buffer> {
        self.state.lock().stores.get(&handle).map(|store| store.buffer)
    }

    /// Number of live stores.
    pub fn store_count(&self) -> usize {
        self.state.lock().stores.len()
    }
}

fn location_for(flags: BackingFlags) -> MemoryLocation {
    if flags.contains(BackingFlags::LOCAL) && flags.contains(BackingFlags::MAP) {
        // resizable-BAR style: device local and host visible
        MemoryLocation::CpuToGpu
    } else if flags.contains(BackingFlags::LOCAL) {
        MemoryLocation::GpuOnly
    } else if flags.contains(BackingFlags::MAP) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

fn map_vk_error(err: vk::Result, what: &str) -> Error {
    match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfDeviceMemory(what.to_string()),
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfHostMemory(what.to_string()),
        vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost(what.to_string()),
        other => Error::OutOfDeviceMemory(format!("{}: {:?}", what, other)),
    }
}

fn map_alloc_error(err: AllocationError) -> Error {
    match err {
        AllocationError::OutOfMemory => Error::OutOfDeviceMemory("gpu-allocator out of memory".to_string()),
        other => Error::OutOfDeviceMemory(other.to_string()),
    }
}

impl BackingProvider for VulkanBacking {
    fn create(&self, size: u64, align: u64, flags: BackingFlags) -> Result<BackingAllocation> {
        if size == 0 {
            return Err(Error::InvalidSize { size });
        }

        let usage = vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(|err| map_vk_error(err, "vkCreateBuffer"))?;
        let mut requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        requirements.alignment = requirements.alignment.max(align);

        let mut state = self.state.lock();
        let allocation = match state.allocator.allocate(&AllocationCreateDesc {
            name: "resident store",
            requirements,
            location: location_for(flags),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(map_alloc_error(err));
            }
        };

        if let Err(err) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            if let Err(free_err) = state.allocator.free(allocation) {
                log::warn!("failed to release allocation after bind error: {}", free_err);
            }
            return Err(map_vk_error(err, "vkBindBufferMemory"));
        }

        let address_info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        let address = unsafe { self.device.get_buffer_device_address(&address_info) };

        let handle = BackingHandle::from_raw(state.next_handle);
        state.next_handle += 1;
        state.stores.insert(handle, VulkanStore { buffer, allocation });

        Ok(BackingAllocation {
            handle,
            address,
            size,
        })
    }

    fn map(&self, handle: BackingHandle, _flags: MapFlags) -> Result<NonNull<u8>> {
        let state = self.state.lock();
        let store = state
            .stores
            .get(&handle)
            .ok_or(Error::Unsupported("unknown backing handle"))?;
        store
            .allocation
            .mapped_ptr()
            .map(|ptr| ptr.cast::<u8>())
            .ok_or(Error::Unsupported("backing store is not host visible"))
    }

    fn unmap(&self, _handle: BackingHandle) {}

    fn bind(&self, _ops: &[BindOp]) -> Result<()> {
        Err(Error::Unsupported("sparse address-space binding"))
    }

    fn reserve_address_space(&self, _size: u64, _align: u64) -> Result<u64> {
        Err(Error::Unsupported("sparse address-space binding"))
    }

    fn release_address_space(&self, _address: u64, _size: u64) {}

    fn destroy(&self, handle: BackingHandle) {
        let mut state = self.state.lock();
        if let Some(store) = state.stores.remove(&handle) {
            if let Err(err) = state.allocator.free(store.allocation) {
                log::warn!("failed to free backing store {:?}: {}", handle, err);
            }
            unsafe { self.device.destroy_buffer(store.buffer, None) };
        }
    }
}

// SAFETY: Vulkan handles are plain ids and every allocator call happens
// under the state mutex
unsafe impl Send for VulkanBacking {}
unsafe impl Sync for VulkanBacking {}

impl Drop for VulkanBacking {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, store) in state.stores.drain() {
            if let Err(err) = state.allocator.free(store.allocation) {
                log::warn!("failed to free backing store at drop: {}", err);
            }
            unsafe { self.device.destroy_buffer(store.buffer, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_mapping() {
        assert_eq!(location_for(BackingFlags::LOCAL), MemoryLocation::GpuOnly);
        assert_eq!(
            location_for(BackingFlags::GART | BackingFlags::MAP),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            location_for(BackingFlags::LOCAL | BackingFlags::MAP | BackingFlags::NO_SHARE),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_vk_error_mapping() {
        assert!(map_vk_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "x").is_out_of_memory());
        assert!(map_vk_error(vk::Result::ERROR_DEVICE_LOST, "x").is_device_lost());
    }
}
