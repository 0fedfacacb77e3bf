//! Buffer creation on top of the resource table
//!
//! Vertex and index data goes through a staging buffer into device-local
//! memory. Uniform buffers live in host-visible memory and are written by
//! mapping. Every transfer blocks until the GPU has finished it, so a
//! staging buffer is never freed while a copy still reads from it.

use ash::vk;

use super::allocator::{read_bytes, write_bytes, BufferCreateInfo, MemoryAllocator, MemoryResidency};
use super::handle::BufferHandle;
use super::resource_table::{RawBuffer, ResourceEntry, ResourceTable};
use super::scoped_buffer::ScopedBuffer;
use crate::render::vulkan::rendering::commands::TransferSubmitter;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Creates, uploads to and maps buffers registered in a `ResourceTable`
pub struct BufferManager<A: MemoryAllocator, S: TransferSubmitter> {
    resources: ResourceTable<A>,
    submitter: S,
}

impl<A: MemoryAllocator, S: TransferSubmitter> BufferManager<A, S> {
    /// Manager over an empty resource table
    pub fn new(allocator: A, submitter: S) -> Self {
        Self {
            resources: ResourceTable::new(allocator),
            submitter,
        }
    }

    /// Underlying resource table
    pub fn resources(&self) -> &ResourceTable<A> {
        &self.resources
    }

    /// Mutable resource table
    pub fn resources_mut(&mut self) -> &mut ResourceTable<A> {
        &mut self.resources
    }

    /// Submitter used for staged copies
    pub fn submitter_mut(&mut self) -> &mut S {
        &mut self.submitter
    }

    /// Allocate and register a buffer
    pub fn create_buffer(&mut self, info: &BufferCreateInfo) -> VulkanResult<BufferHandle> {
        self.resources.create_buffer(info)
    }

    /// Release a buffer; false if the handle was not live
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> bool {
        self.resources.destroy_buffer(handle)
    }

    /// Raw buffer and size, or `RawBuffer::EMPTY`; see `ResourceTable::get_buffer`
    pub fn get_buffer(&self, handle: BufferHandle) -> RawBuffer {
        self.resources.get_buffer(handle)
    }

    /// Raw buffer, or null for an unknown handle
    pub fn get_vk_buffer(&self, handle: BufferHandle) -> vk::Buffer {
        self.resources.get_vk_buffer(handle)
    }

    /// Device-local vertex buffer holding `data`
    pub fn create_vertex_buffer(&mut self, data: &[u8]) -> VulkanResult<BufferHandle> {
        self.create_device_local(data, vk::BufferUsageFlags::VERTEX_BUFFER)
    }

    /// Device-local index buffer holding `data`
    pub fn create_index_buffer(&mut self, data: &[u8]) -> VulkanResult<BufferHandle> {
        self.create_device_local(data, vk::BufferUsageFlags::INDEX_BUFFER)
    }

    /// Host-visible uniform buffer written through mapping
    pub fn create_uniform_buffer(&mut self, size: vk::DeviceSize) -> VulkanResult<BufferHandle> {
        self.resources.create_buffer(&BufferCreateInfo::new(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryResidency::CpuToGpu,
        ))
    }

    /// Registered transfer source that callers fill and copy from themselves
    pub fn create_staging_buffer(&mut self, size: vk::DeviceSize) -> VulkanResult<BufferHandle> {
        self.resources.create_buffer(&BufferCreateInfo::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryResidency::CpuToGpu,
        ))
    }

    fn create_device_local(
        &mut self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<BufferHandle> {
        let size = data.len() as vk::DeviceSize;
        let info = BufferCreateInfo::new(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryResidency::GpuOnly,
        );
        info.validate()?;

        let (buffer, allocation) = {
            let allocator = self.resources.allocator();
            let staging = Self::stage(allocator, data)?;
            let destination = ScopedBuffer::create(allocator, &info)?;

            self.submitter
                .copy_buffer(staging.handle(), destination.handle(), whole_range(size))?;
            staging.release();

            destination
                .take()
                .ok_or_else(|| VulkanError::invalid("destination buffer released during upload"))?
        };

        let handle = self.resources.insert(buffer, allocation, info)?;
        log::debug!("Uploaded {size} bytes into device-local buffer {handle:?}");
        Ok(handle)
    }

    fn stage<'a>(allocator: &'a A, data: &[u8]) -> VulkanResult<ScopedBuffer<'a, A>> {
        let info = BufferCreateInfo::new(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryResidency::CpuVisible,
        );
        let mut staging = ScopedBuffer::create(allocator, &info)?;
        staging.write(data)?;
        Ok(staging)
    }

    /// Overwrite the start of an existing device-local buffer through a staging copy
    pub fn upload_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> VulkanResult<()> {
        let target = self.transfer_endpoint(handle, vk::BufferUsageFlags::TRANSFER_DST)?;
        let size = data.len() as vk::DeviceSize;
        if size > target.size {
            return Err(overflow(size, 0, target.size));
        }

        let staging = Self::stage(self.resources.allocator(), data)?;
        self.submitter
            .copy_buffer(staging.handle(), target.buffer, whole_range(size))?;
        staging.release();
        Ok(())
    }

    /// One-shot copy of `size` bytes between two registered buffers
    ///
    /// `src` must carry `TRANSFER_SRC` and `dst` `TRANSFER_DST`; zero-byte
    /// copies are rejected.
    pub fn copy_buffer(
        &self,
        src: BufferHandle,
        dst: BufferHandle,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if size == 0 {
            return Err(VulkanError::invalid("buffer copy of zero bytes"));
        }
        let source = self.transfer_endpoint(src, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let destination = self.transfer_endpoint(dst, vk::BufferUsageFlags::TRANSFER_DST)?;
        if src_offset.saturating_add(size) > source.size {
            return Err(overflow(size, src_offset, source.size));
        }
        if dst_offset.saturating_add(size) > destination.size {
            return Err(overflow(size, dst_offset, destination.size));
        }

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        self.submitter
            .copy_buffer(source.buffer, destination.buffer, region)
    }

    /// Map a host-visible buffer
    ///
    /// The pointer stays valid until the matching `unmap_buffer`. Writing
    /// while the GPU reads the same buffer is the caller's race to avoid.
    pub fn map_buffer(&mut self, handle: BufferHandle) -> VulkanResult<*mut u8> {
        let (allocator, entry) = self.host_visible_entry(handle)?;
        allocator.map_memory(&mut entry.allocation)
    }

    /// Undo one `map_buffer`
    pub fn unmap_buffer(&mut self, handle: BufferHandle) -> VulkanResult<()> {
        let (allocator, entry) = self.host_visible_entry(handle)?;
        allocator.unmap_memory(&mut entry.allocation);
        Ok(())
    }

    /// Map, copy `data` at `offset`, unmap
    pub fn update_buffer(
        &mut self,
        handle: BufferHandle,
        data: &[u8],
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let (allocator, entry) = self.host_visible_entry(handle)?;
        let len = data.len() as vk::DeviceSize;
        if offset.saturating_add(len) > entry.info.size {
            return Err(overflow(len, offset, entry.info.size));
        }
        write_bytes(allocator, &mut entry.allocation, offset as usize, data)
    }

    /// Copy the first `len` bytes of a host-visible buffer out
    pub fn read_buffer(
        &mut self,
        handle: BufferHandle,
        len: vk::DeviceSize,
    ) -> VulkanResult<Vec<u8>> {
        let (allocator, entry) = self.host_visible_entry(handle)?;
        if len > entry.info.size {
            return Err(overflow(len, 0, entry.info.size));
        }
        read_bytes(allocator, &mut entry.allocation, len as usize)
    }

    /// Release every buffer and the allocator's hold on them
    pub fn destroy_all(&mut self) {
        self.resources.destroy_all();
    }

    fn transfer_endpoint(
        &self,
        handle: BufferHandle,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<RawBuffer> {
        let entry = self
            .resources
            .lookup(handle)
            .ok_or_else(|| not_found(handle))?;
        if !entry.info.usage.contains(usage) {
            return Err(VulkanError::invalid(format!(
                "buffer {handle:?} was not created with {usage:?}"
            )));
        }
        Ok(RawBuffer {
            buffer: entry.buffer,
            size: entry.info.size,
        })
    }

    fn host_visible_entry(
        &mut self,
        handle: BufferHandle,
    ) -> VulkanResult<(&A, &mut ResourceEntry<A>)> {
        let (allocator, entry) = self
            .resources
            .entry_mut(handle)
            .ok_or_else(|| not_found(handle))?;
        if !entry.info.residency.is_host_visible() {
            return Err(VulkanError::invalid(format!(
                "buffer {handle:?} lives in device-local memory and cannot be mapped"
            )));
        }
        Ok((allocator, entry))
    }
}

const fn whole_range(size: vk::DeviceSize) -> vk::BufferCopy {
    vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    }
}

fn not_found(handle: BufferHandle) -> VulkanError {
    VulkanError::ResourceNotFound {
        id: u64::from(handle.raw()),
    }
}

fn overflow(len: vk::DeviceSize, offset: vk::DeviceSize, capacity: vk::DeviceSize) -> VulkanError {
    VulkanError::invalid(format!(
        "{len} bytes at offset {offset} exceed buffer of {capacity} bytes"
    ))
}
