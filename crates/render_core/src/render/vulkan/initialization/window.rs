//! Window management using GLFW
//!
//! Resizable Vulkan-only window. Framebuffer-size events are forwarded to
//! the registered resize callbacks; Escape requests close.

use thiserror::Error;

use crate::render::vulkan::events::{FramebufferSource, ResizeCallbacks};
use crate::render::vulkan::state::ResizeFlag;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Error reported by GLFW
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    resize_callbacks: ResizeCallbacks<ResizeFlag>,
}

impl Window {
    /// Open a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        // Configure for Vulkan (no OpenGL context)
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Window '{title}' created ({width}x{height})");
        Ok(Self {
            glfw,
            window,
            events,
            resize_callbacks: ResizeCallbacks::new(),
        })
    }

    /// Register `callback` to run with `context` on every framebuffer resize
    pub fn on_framebuffer_resize(
        &mut self,
        context: ResizeFlag,
        callback: fn(&ResizeFlag, u32, u32),
    ) {
        self.resize_callbacks.register(context, callback);
    }

    /// Whether the window was asked to close
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Ask the window to close, or cancel a pending close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Poll pending events without blocking
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        self.process_events();
    }

    fn process_events(&mut self) {
        let mut resized = None;
        let mut close = false;
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    resized = Some((width.max(0) as u32, height.max(0) as u32));
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    close = true;
                }
                _ => {}
            }
        }

        if let Some((width, height)) = resized {
            log::debug!("Framebuffer resized to {width}x{height}");
            self.resize_callbacks.dispatch(width, height);
        }
        if close {
            self.window.set_should_close(true);
        }
    }

    /// Framebuffer size in pixels
    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn get_required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(
        &mut self,
        instance: ash::vk::Instance,
    ) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }
}

impl FramebufferSource for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.get_framebuffer_size()
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
        self.process_events();
    }

    fn should_close(&self) -> bool {
        self.window.should_close()
    }
}
