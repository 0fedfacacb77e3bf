//! Device memory allocator facade
//!
//! `MemoryAllocator` is the seam between the resource table and whatever
//! hands out device memory. `VmaAllocator` is the production implementation
//! on top of the Vulkan Memory Allocator. It is the exclusive owner of the
//! allocator context and must be destroyed after every buffer it created and
//! before the logical device.

use ash::{vk, Device, Instance};
use vk_mem::Alloc;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryResidency {
    /// Host memory readable and writable by the CPU (staging, readback)
    CpuVisible,
    /// Host-visible memory the GPU reads directly, rewritten by the CPU every frame
    CpuToGpu,
    /// Device-local memory, reachable only through transfers
    GpuOnly,
}

impl MemoryResidency {
    /// Whether the CPU can map memory of this class
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }

    fn allocation_create_info(self) -> vk_mem::AllocationCreateInfo {
        let host_coherent =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        match self {
            Self::CpuVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: host_coherent,
                ..Default::default()
            },
            Self::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: host_coherent,
                preferred_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
            Self::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                preferred_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
        }
    }
}

/// Parameters for a buffer allocation
///
/// Fully determines the capabilities of the created buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCreateInfo {
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// How the buffer will be used
    pub usage: vk::BufferUsageFlags,
    /// Memory class to allocate from
    pub residency: MemoryResidency,
}

impl BufferCreateInfo {
    /// Describe a buffer
    pub const fn new(
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> Self {
        Self {
            size,
            usage,
            residency,
        }
    }

    /// Reject requests no allocator can satisfy
    pub fn validate(&self) -> VulkanResult<()> {
        if self.size == 0 {
            return Err(VulkanError::allocation(0, "buffer size must be non-zero"));
        }
        if self.usage.is_empty() {
            return Err(VulkanError::allocation(self.size, "buffer usage flags are empty"));
        }
        Ok(())
    }
}

/// Source of raw (buffer, allocation) pairs
pub trait MemoryAllocator {
    /// Backing allocation owned alongside each buffer
    type Allocation;

    /// Create a buffer and bind fresh memory to it
    fn create_buffer(
        &self,
        info: &BufferCreateInfo,
    ) -> VulkanResult<(vk::Buffer, Self::Allocation)>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation);

    /// Map host-visible memory, returning a pointer to its first byte
    fn map_memory(&self, allocation: &mut Self::Allocation) -> VulkanResult<*mut u8>;

    /// Undo one `map_memory`
    fn unmap_memory(&self, allocation: &mut Self::Allocation);
}

/// Copy `data` into host-visible memory at `offset` (map, copy, unmap)
pub(crate) fn write_bytes<A: MemoryAllocator + ?Sized>(
    allocator: &A,
    allocation: &mut A::Allocation,
    offset: usize,
    data: &[u8],
) -> VulkanResult<()> {
    let mapped = allocator.map_memory(allocation)?;
    // SAFETY: callers bounds-check `offset + data.len()` against the buffer size.
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset), data.len());
    }
    allocator.unmap_memory(allocation);
    Ok(())
}

/// Copy `len` bytes out of host-visible memory
pub(crate) fn read_bytes<A: MemoryAllocator + ?Sized>(
    allocator: &A,
    allocation: &mut A::Allocation,
    len: usize,
) -> VulkanResult<Vec<u8>> {
    let mapped = allocator.map_memory(allocation)?;
    let mut out = vec![0u8; len];
    // SAFETY: callers bounds-check `len` against the buffer size.
    unsafe {
        std::ptr::copy_nonoverlapping(mapped, out.as_mut_ptr(), len);
    }
    allocator.unmap_memory(allocation);
    Ok(out)
}

/// Vulkan Memory Allocator wrapper
pub struct VmaAllocator {
    allocator: Option<vk_mem::Allocator>,
}

impl VmaAllocator {
    /// Create the allocator context for a device
    pub fn new(
        instance: &Instance,
        device: &Device,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device);
        let allocator = vk_mem::Allocator::new(create_info).map_err(|result| {
            VulkanError::InitializationFailed(format!(
                "Memory allocator creation failed: {result:?}"
            ))
        })?;

        log::debug!("Device memory allocator created");
        Ok(Self {
            allocator: Some(allocator),
        })
    }

    /// Whether the allocator context is still alive
    pub const fn is_initialized(&self) -> bool {
        self.allocator.is_some()
    }

    /// Destroy the allocator context; safe to call more than once
    pub fn destroy(&mut self) {
        if self.allocator.take().is_some() {
            log::debug!("Device memory allocator destroyed");
        }
    }

    fn inner(&self) -> VulkanResult<&vk_mem::Allocator> {
        self.allocator
            .as_ref()
            .ok_or_else(|| VulkanError::invalid("memory allocator already destroyed"))
    }
}

impl MemoryAllocator for VmaAllocator {
    type Allocation = vk_mem::Allocation;

    fn create_buffer(
        &self,
        info: &BufferCreateInfo,
    ) -> VulkanResult<(vk::Buffer, Self::Allocation)> {
        let allocator = self.inner()?;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(info.size)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let allocation_info = info.residency.allocation_create_info();

        unsafe { allocator.create_buffer(&buffer_info, &allocation_info) }
            .map_err(|result| VulkanError::allocation(info.size, format!("{result:?}")))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation) {
        match self.allocator.as_ref() {
            Some(allocator) => unsafe { allocator.destroy_buffer(buffer, allocation) },
            None => log::warn!("Buffer {buffer:?} outlived the memory allocator"),
        }
    }

    fn map_memory(&self, allocation: &mut Self::Allocation) -> VulkanResult<*mut u8> {
        let allocator = self.inner()?;
        unsafe { allocator.map_memory(allocation) }.map_err(VulkanError::Api)
    }

    fn unmap_memory(&self, allocation: &mut Self::Allocation) {
        if let Some(allocator) = self.allocator.as_ref() {
            unsafe { allocator.unmap_memory(allocation) };
        }
    }
}
