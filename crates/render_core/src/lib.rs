//! # Render Core
//!
//! Vulkan runtime core for small real-time applications: a handle-based GPU
//! buffer table with staged uploads, a presentable image chain that rebuilds
//! itself on resize, and a fixed-depth frame scheduler.
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let (width, height) = (config.window.width, config.window.height);
//!     let mut window = Window::new(&config.window.title, width, height)?;
//!     let mut renderer = Renderer::new(&mut window, &config, &VertexInputLayout::empty())?;
//!     renderer.run(&mut window)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{PresentModePreference, RendererConfig, ShaderConfig, WindowConfig},
        render::vulkan::{
            BufferHandle, DrawCommand, DrawList, FrameStatus, Renderer, VertexInputLayout,
            VulkanError, VulkanResult, Window,
        },
    };
}
