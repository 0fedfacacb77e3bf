//! Renderer configuration
//!
//! Everything the application can tune without recompiling: window
//! metadata, frame pacing, validation, present mode, clear color, shader
//! locations and log level. Missing fields fall back to defaults, so a
//! config file only needs the values it changes.

use std::path::Path;

use ash::vk;
use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Directories searched for compiled shaders, in order
const SHADER_DIRS: [&str; 5] = [
    "target/shaders/",
    "shaders/",
    "resources/shaders/",
    "../shaders/",
    "./",
];

/// Locations of the SPIR-V shaders the pipeline is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Shader paths used exactly as given
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Look for both files in the usual shader directories
    ///
    /// Falls back to `shaders/<name>` for files that are found nowhere.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let find = |name: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| format!("{dir}{name}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("shaders/{name}"))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Check that both shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("triangle.vert.spv", "triangle.frag.spv")
    }
}

/// Present mode to ask for; FIFO is used whenever the choice is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PresentModePreference {
    /// Triple-buffered, low latency, no tearing
    #[default]
    Mailbox,
    /// Vertical sync
    Fifo,
    /// No synchronization; may tear
    Immediate,
}

impl PresentModePreference {
    /// Vulkan present mode to ask for
    pub const fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Window title and initial size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Speed Racer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Window title and size
    pub window: WindowConfig,
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Number of frame slots in the ring
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers; `None` means debug builds only
    pub enable_validation: Option<bool>,
    /// Preferred present mode; FIFO is used when unsupported
    pub present_mode: PresentModePreference,
    /// RGBA clear color of the render pass
    pub clear_color: [f32; 4],
    /// Default `env_logger` filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl RendererConfig {
    /// Defaults under a different application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
            max_frames_in_flight: 2,
            enable_validation: None,
            present_mode: PresentModePreference::default(),
            clear_color: [0.2, 0.2, 0.2, 1.0],
            log_level: "info".to_string(),
        }
    }

    /// Set window title and size
    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window = WindowConfig {
            title: title.into(),
            width,
            height,
        };
        self
    }

    /// Set the shader pair
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set the frame slot count
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Force validation layers on or off
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the preferred present mode
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the RGBA clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Resolved validation toggle
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Reject values the renderer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Max frames in flight must be at least 1".to_string()));
        }

        if self.max_frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "Max frames in flight should not exceed 8".to_string(),
            ));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size {}x{} has no area",
                self.window.width, self.window.height
            )));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Speed Racer")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.clear_color, [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(config.present_mode.to_vk(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_frame_count_bounds() {
        assert!(RendererConfig::default().with_max_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_max_frames_in_flight(8).validate().is_ok());
        assert!(RendererConfig::default().with_max_frames_in_flight(9).validate().is_err());
    }

    #[test]
    fn test_empty_name_and_zero_window_rejected() {
        assert!(RendererConfig::new("").validate().is_err());
        assert!(RendererConfig::default().with_window("x", 0, 720).validate().is_err());
    }

    #[test]
    fn test_explicit_validation_overrides_build_type() {
        assert!(RendererConfig::default().with_validation(true).validation_enabled());
        assert!(!RendererConfig::default().with_validation(false).validation_enabled());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RendererConfig = toml::from_str(
            r#"
            max_frames_in_flight = 3
            present_mode = "Fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.window, WindowConfig::default());
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let config = RendererConfig::default()
            .with_shaders(ShaderConfig::new("a.spv", "b.spv"))
            .with_clear_color([0.0, 0.5, 1.0, 1.0]);
        let dir = std::env::temp_dir();

        for ext in ["toml", "ron"] {
            let path = dir.join(format!("render_core_config_test_{}.{ext}", std::process::id()));
            let path = path.to_string_lossy().into_owned();
            config.save_to_file(&path).unwrap();
            let loaded = RendererConfig::load_from_file(&path).unwrap();
            std::fs::remove_file(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        assert!(matches!(
            RendererConfig::default().save_to_file("config.yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            RendererConfig::load_or_default("definitely/not/here.toml"),
            Ok(config) if config == RendererConfig::default()
        ));
    }

    #[test]
    fn test_missing_shaders_fail_validation() {
        let shaders = ShaderConfig::new("missing/vert.spv", "missing/frag.spv");
        assert!(shaders.validate().is_err());
    }
}
