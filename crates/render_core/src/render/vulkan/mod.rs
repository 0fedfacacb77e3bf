//! Vulkan backend
//!
//! Layered the same way the frame is built: `initialization` brings up the
//! instance, device and window; `resources` owns GPU memory; `rendering`
//! records commands; `state` owns the surface chain and frame pacing.
//! [`Renderer`] ties the layers together.

pub mod error;
pub mod events;
pub mod initialization;
pub mod renderer;
pub mod rendering;
pub mod resources;
pub mod state;

#[cfg(test)]
mod test_support;

pub use error::{VulkanError, VulkanResult};
pub use events::{wait_for_nonzero_size, FramebufferSource, ResizeCallbacks};
pub use initialization::{VulkanContext, Window, WindowError, WindowResult};
pub use renderer::{GpuBuffers, Renderer};
pub use rendering::{DrawCommand, DrawList, VertexInputLayout};
pub use resources::{BufferHandle, BufferManager, MemoryResidency, RawBuffer, ResourceTable};
pub use state::{FrameStats, FrameStatus, ResizeFlag, SurfaceChain, SurfaceChainState};
