//! Rendering backends

pub mod vulkan;

pub use vulkan::{Renderer, VulkanError, VulkanResult};
