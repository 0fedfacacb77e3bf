//! Core configuration types

pub mod config;

pub use config::{PresentModePreference, RendererConfig, ShaderConfig, WindowConfig};
