//! Vulkan backing provider.
//!
//! Stores are plain buffers with a device address, allocated through
//! `gpu-allocator` and bound with `ash`.

pub mod backing;

pub use backing::VulkanBacking;
