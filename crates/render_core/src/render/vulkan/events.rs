//! Window-event plumbing between the windowing layer and the renderer
//!
//! A resize callback is registered together with the context it acts on;
//! the window dispatches `(width, height)` to every registration when a
//! framebuffer-size event arrives. No global instance lookup is involved.

/// Registered resize callbacks with their context values
pub struct ResizeCallbacks<C> {
    entries: Vec<(C, fn(&C, u32, u32))>,
}

impl<C> ResizeCallbacks<C> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Store `callback` alongside the context it will be invoked with
    pub fn register(&mut self, context: C, callback: fn(&C, u32, u32)) {
        self.entries.push((context, callback));
    }

    /// Invoke every callback with its own context
    pub fn dispatch(&self, width: u32, height: u32) {
        for (context, callback) in &self.entries {
            callback(context, width, height);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for ResizeCallbacks<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that reports a framebuffer size and can block for events
pub trait FramebufferSource {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until at least one window event arrives and process it
    fn wait_events(&mut self);

    /// Whether the user asked to close
    fn should_close(&self) -> bool;
}

/// Block until the framebuffer has a nonzero area
///
/// Returns `None` if the window is closed while waiting (a minimized window
/// that is closed never reports a nonzero size again).
pub fn wait_for_nonzero_size<S: FramebufferSource + ?Sized>(source: &mut S) -> Option<(u32, u32)> {
    let mut size = source.framebuffer_size();
    while size.0 == 0 || size.1 == 0 {
        if source.should_close() {
            return None;
        }
        source.wait_events();
        size = source.framebuffer_size();
    }
    Some(size)
}
