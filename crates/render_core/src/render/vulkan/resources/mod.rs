//! GPU memory objects: handles, the allocator facade, the resource table and buffer helpers

pub mod allocator;
pub mod buffer_manager;
pub mod handle;
pub mod resource_table;
pub mod scoped_buffer;

pub use allocator::{BufferCreateInfo, MemoryAllocator, MemoryResidency, VmaAllocator};
pub use buffer_manager::BufferManager;
pub use handle::{BufferHandle, BufferTag, Handle, HandleAllocator, ImageHandle, ImageTag};
pub use resource_table::{RawBuffer, ResourceEntry, ResourceTable};
pub use scoped_buffer::ScopedBuffer;
