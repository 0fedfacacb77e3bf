//! Handle-indexed registry of GPU buffers
//!
//! The table owns every live (buffer, allocation) pair and the allocator
//! facade used to create them. Handles are never reused, so a destroyed
//! handle simply stops resolving. Whatever is still registered when the
//! table is dropped gets released.

use std::collections::HashMap;

use ash::vk;

use super::allocator::{BufferCreateInfo, MemoryAllocator};
use super::handle::{BufferHandle, BufferTag, HandleAllocator};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// A registered buffer and the memory backing it
pub struct ResourceEntry<A: MemoryAllocator> {
    /// Raw buffer handle
    pub buffer: vk::Buffer,
    /// Memory bound to `buffer`
    pub allocation: A::Allocation,
    /// Request the buffer was created from
    pub info: BufferCreateInfo,
}

/// Raw buffer plus its size, as handed to command recording
///
/// Carries the size rather than the allocation: allocations stay owned by
/// the table and are reached through [`ResourceTable::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    /// Vulkan buffer, null for `EMPTY`
    pub buffer: vk::Buffer,
    /// Size in bytes the buffer was created with
    pub size: vk::DeviceSize,
}

impl RawBuffer {
    /// Returned for handles that do not resolve
    pub const EMPTY: Self = Self {
        buffer: vk::Buffer::null(),
        size: 0,
    };

    /// Whether this is the unresolved sentinel
    pub fn is_empty(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }
}

/// Registry mapping buffer handles to their GPU resources
pub struct ResourceTable<A: MemoryAllocator> {
    allocator: A,
    buffers: HashMap<BufferHandle, ResourceEntry<A>>,
    handles: HandleAllocator<BufferTag>,
}

impl<A: MemoryAllocator> ResourceTable<A> {
    /// Create an empty table that allocates through `allocator`
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            buffers: HashMap::new(),
            handles: HandleAllocator::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_handles(allocator: A, handles: HandleAllocator<BufferTag>) -> Self {
        Self {
            allocator,
            buffers: HashMap::new(),
            handles,
        }
    }

    /// Allocator facade the table creates buffers through
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Mutable allocator access, used to destroy it at teardown
    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    /// Allocate a buffer and register it under a fresh handle
    ///
    /// On failure nothing is registered and no handle is consumed.
    pub fn create_buffer(&mut self, info: &BufferCreateInfo) -> VulkanResult<BufferHandle> {
        info.validate()?;
        if self.handles.is_exhausted() {
            return Err(VulkanError::allocation(info.size, "buffer handle space exhausted"));
        }

        let (buffer, allocation) = self.allocator.create_buffer(info)?;
        self.insert(buffer, allocation, *info)
    }

    /// Register an already allocated pair, taking ownership of it
    pub fn insert(
        &mut self,
        buffer: vk::Buffer,
        mut allocation: A::Allocation,
        info: BufferCreateInfo,
    ) -> VulkanResult<BufferHandle> {
        let Some(handle) = self.handles.allocate() else {
            self.allocator.destroy_buffer(buffer, &mut allocation);
            return Err(VulkanError::allocation(info.size, "buffer handle space exhausted"));
        };

        log::trace!("Registered buffer {:?} ({} bytes) as {:?}", buffer, info.size, handle);
        self.buffers.insert(
            handle,
            ResourceEntry {
                buffer,
                allocation,
                info,
            },
        );
        Ok(handle)
    }

    /// Release the buffer behind `handle`
    ///
    /// Returns false when the handle is unknown or was already destroyed.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> bool {
        match self.buffers.remove(&handle) {
            Some(mut entry) => {
                self.allocator.destroy_buffer(entry.buffer, &mut entry.allocation);
                log::trace!("Destroyed buffer {handle:?}");
                true
            }
            None => {
                log::warn!("Attempted to destroy unknown buffer {handle:?}");
                false
            }
        }
    }

    /// Raw buffer and size for `handle`, or `RawBuffer::EMPTY`
    ///
    /// The allocation is not part of the result; it never leaves the table.
    /// Use [`lookup`](Self::lookup) for the full entry.
    pub fn get_buffer(&self, handle: BufferHandle) -> RawBuffer {
        self.buffers
            .get(&handle)
            .map_or(RawBuffer::EMPTY, |entry| RawBuffer {
                buffer: entry.buffer,
                size: entry.info.size,
            })
    }

    /// Raw Vulkan buffer for `handle`, null if unknown
    pub fn get_vk_buffer(&self, handle: BufferHandle) -> vk::Buffer {
        self.get_buffer(handle).buffer
    }

    /// Full entry for `handle`, `None` if unknown or destroyed
    pub fn lookup(&self, handle: BufferHandle) -> Option<&ResourceEntry<A>> {
        self.buffers.get(&handle)
    }

    /// Allocator and entry borrowed together, for mapping
    pub fn entry_mut(&mut self, handle: BufferHandle) -> Option<(&A, &mut ResourceEntry<A>)> {
        let entry = self.buffers.get_mut(&handle)?;
        Some((&self.allocator, entry))
    }

    /// Whether `handle` names a live buffer
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    /// Number of live buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffer is registered
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Release every registered buffer
    pub fn destroy_all(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        log::debug!("Releasing {} remaining buffers", self.buffers.len());
        for (_, mut entry) in self.buffers.drain() {
            self.allocator.destroy_buffer(entry.buffer, &mut entry.allocation);
        }
    }
}

impl<A: MemoryAllocator> Drop for ResourceTable<A> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::resources::allocator::MemoryResidency;
    use crate::render::vulkan::test_support::{DeviceMemory, MockAllocator};

    fn table() -> (DeviceMemory, ResourceTable<MockAllocator>) {
        let memory = DeviceMemory::default();
        let table = ResourceTable::new(MockAllocator::new(memory.clone()));
        (memory, table)
    }

    fn vertex_info(size: vk::DeviceSize) -> BufferCreateInfo {
        BufferCreateInfo::new(size, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryResidency::GpuOnly)
    }

    #[test]
    fn test_handles_are_distinct_and_resolve() {
        let (_memory, mut table) = table();
        let a = table.create_buffer(&vertex_info(64)).unwrap();
        let b = table.create_buffer(&vertex_info(128)).unwrap();

        assert_ne!(a, b);
        assert!(a.is_valid() && b.is_valid());
        assert_eq!(table.get_buffer(a).size, 64);
        assert_eq!(table.get_buffer(b).size, 128);
        assert_ne!(table.get_vk_buffer(a), table.get_vk_buffer(b));
    }

    #[test]
    fn test_destroyed_handle_stops_resolving() {
        let (memory, mut table) = table();
        let handle = table.create_buffer(&vertex_info(64)).unwrap();

        assert!(table.destroy_buffer(handle));
        assert!(table.get_buffer(handle).is_empty());
        assert!(table.lookup(handle).is_none());
        assert_eq!(memory.live_buffers(), 0);

        assert!(!table.destroy_buffer(handle));
        assert_eq!(memory.destroyed(), 1);
    }

    #[test]
    fn test_handles_not_reused_after_destroy() {
        let (_memory, mut table) = table();
        let first = table.create_buffer(&vertex_info(16)).unwrap();
        table.destroy_buffer(first);
        let second = table.create_buffer(&vertex_info(16)).unwrap();

        assert_ne!(first, second);
        assert!(table.get_buffer(first).is_empty());
    }

    #[test]
    fn test_raw_buffer_and_entry_agree() {
        let (memory, mut table) = table();
        let handle = table.create_buffer(&vertex_info(48)).unwrap();

        let raw = table.get_buffer(handle);
        let entry = table.lookup(handle).unwrap();
        assert_eq!(raw.buffer, entry.buffer);
        assert_eq!(raw.size, entry.info.size);
        assert_eq!(memory.residency(raw.buffer), Some(MemoryResidency::GpuOnly));
    }

    #[test]
    fn test_unknown_handles_resolve_to_empty() {
        let (_memory, table) = table();
        assert_eq!(table.get_buffer(BufferHandle::INVALID), RawBuffer::EMPTY);
        assert_eq!(table.get_vk_buffer(BufferHandle::from_raw(42)), vk::Buffer::null());
    }

    #[test]
    fn test_failed_allocation_registers_nothing() {
        let (memory, mut table) = table();
        memory.fail_next_allocation();

        let err = table.create_buffer(&vertex_info(64)).unwrap_err();
        assert!(matches!(err, VulkanError::Allocation { requested: 64, .. }));
        assert!(table.is_empty());

        let handle = table.create_buffer(&vertex_info(64)).unwrap();
        assert_eq!(handle.raw(), 0);
    }

    #[test]
    fn test_zero_size_is_an_allocation_error() {
        let (memory, mut table) = table();
        assert!(matches!(
            table.create_buffer(&vertex_info(0)),
            Err(VulkanError::Allocation { requested: 0, .. })
        ));
        assert_eq!(memory.live_buffers(), 0);
    }

    #[test]
    fn test_exhausted_handle_space_is_an_allocation_error() {
        let memory = DeviceMemory::default();
        let mut table = ResourceTable::with_handles(
            MockAllocator::new(memory.clone()),
            HandleAllocator::starting_at(u32::MAX - 1),
        );

        let last = table.create_buffer(&vertex_info(8)).unwrap();
        assert_eq!(last.raw(), u32::MAX - 1);

        assert!(matches!(
            table.create_buffer(&vertex_info(8)),
            Err(VulkanError::Allocation { .. })
        ));
        assert_eq!(memory.live_buffers(), 1);
    }

    #[test]
    fn test_drop_releases_everything() {
        let memory = DeviceMemory::default();
        {
            let mut table = ResourceTable::new(MockAllocator::new(memory.clone()));
            for size in [16, 32, 64] {
                table.create_buffer(&vertex_info(size)).unwrap();
            }
            assert_eq!(memory.live_buffers(), 3);
        }
        assert_eq!(memory.live_buffers(), 0);
        assert_eq!(memory.destroyed(), 3);
    }
}
