//! Move-only owner of a raw (buffer, allocation) pair
//!
//! Dropping a `ScopedBuffer` releases the GPU memory, so every exit path of
//! a multi-step operation (staged upload, for instance) frees what it
//! allocated. Ownership can be moved out with `take`, never shared.

use ash::vk;

use super::allocator::{write_bytes, BufferCreateInfo, MemoryAllocator};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Exclusively owned GPU buffer with guaranteed release
pub struct ScopedBuffer<'a, A: MemoryAllocator> {
    allocator: &'a A,
    buffer: vk::Buffer,
    allocation: Option<A::Allocation>,
    size: vk::DeviceSize,
}

impl<'a, A: MemoryAllocator> ScopedBuffer<'a, A> {
    /// Allocate a buffer owned by the returned scope
    pub fn create(allocator: &'a A, info: &BufferCreateInfo) -> VulkanResult<Self> {
        info.validate()?;
        let (buffer, allocation) = allocator.create_buffer(info)?;
        Ok(Self::adopt(allocator, buffer, allocation, info.size))
    }

    /// Take ownership of an existing pair
    pub fn adopt(
        allocator: &'a A,
        buffer: vk::Buffer,
        allocation: A::Allocation,
        size: vk::DeviceSize,
    ) -> Self {
        Self {
            allocator,
            buffer,
            allocation: Some(allocation),
            size,
        }
    }

    /// Raw buffer handle (null once released)
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Whether the scope still owns memory
    pub const fn is_valid(&self) -> bool {
        self.allocation.is_some()
    }

    /// Map, copy `data` to the start of the buffer, unmap
    pub fn write(&mut self, data: &[u8]) -> VulkanResult<()> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::invalid(format!(
                "write of {} bytes exceeds buffer of {} bytes",
                data.len(),
                self.size
            )));
        }
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| VulkanError::invalid("write to released buffer"))?;
        write_bytes(self.allocator, allocation, 0, data)
    }

    /// Move the raw pair out without destroying it
    pub fn take(mut self) -> Option<(vk::Buffer, A::Allocation)> {
        let allocation = self.allocation.take()?;
        let buffer = std::mem::replace(&mut self.buffer, vk::Buffer::null());
        Some((buffer, allocation))
    }

    /// Destroy the buffer now
    pub fn release(mut self) {
        self.destroy_now();
    }

    fn destroy_now(&mut self) {
        if let Some(mut allocation) = self.allocation.take() {
            self.allocator.destroy_buffer(self.buffer, &mut allocation);
            self.buffer = vk::Buffer::null();
        }
    }
}

impl<A: MemoryAllocator> Drop for ScopedBuffer<'_, A> {
    fn drop(&mut self) {
        self.destroy_now();
    }
}
