//! Window and Vulkan bootstrap collaborators

pub mod context;
pub mod window;

pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanInstance};
pub use window::{Window, WindowError, WindowResult};
