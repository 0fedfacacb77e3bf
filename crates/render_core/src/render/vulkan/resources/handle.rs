//! Opaque resource handles
//!
//! Handles are plain `u32` indices tagged with the kind of resource they
//! name. They are issued monotonically and never recycled, so a destroyed
//! handle can never alias a newer resource.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed opaque handle
pub struct Handle<T> {
    index: u32,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Sentinel meaning "no resource"
    pub const INVALID: Self = Self::from_raw(u32::MAX);

    pub(crate) const fn from_raw(index: u32) -> Self {
        Self {
            index,
            _kind: PhantomData,
        }
    }

    /// Raw integer value
    pub const fn raw(self) -> u32 {
        self.index
    }

    /// Whether this is anything other than the sentinel
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({})", self.index)
        } else {
            f.write_str("Handle(INVALID)")
        }
    }
}

/// Tag type for GPU buffers
#[derive(Debug)]
pub enum BufferTag {}

/// Handle to a buffer registered in the resource table
pub type BufferHandle = Handle<BufferTag>;

/// Marker for image handles
#[derive(Debug)]
pub enum ImageTag {}

/// Handle to an image resource
pub type ImageHandle = Handle<ImageTag>;

/// Monotonic handle issuer
///
/// Never reuses a value, even after the resource it named is destroyed.
/// The sentinel is never issued; once the space below it is used up,
/// `allocate` returns `None`.
pub struct HandleAllocator<T> {
    next: u32,
    _kind: PhantomData<fn() -> T>,
}

impl<T> HandleAllocator<T> {
    /// Create an allocator starting at zero
    pub const fn new() -> Self {
        Self {
            next: 0,
            _kind: PhantomData,
        }
    }

    /// Issue the next handle
    pub fn allocate(&mut self) -> Option<Handle<T>> {
        if self.next == u32::MAX {
            return None;
        }
        let handle = Handle::from_raw(self.next);
        self.next += 1;
        Some(handle)
    }

    /// Number of handles issued so far
    pub const fn issued(&self) -> u32 {
        self.next
    }

    /// Whether `allocate` would fail
    pub const fn is_exhausted(&self) -> bool {
        self.next == u32::MAX
    }

    #[cfg(test)]
    pub(crate) const fn starting_at(next: u32) -> Self {
        Self {
            next,
            _kind: PhantomData,
        }
    }
}

impl<T> Default for HandleAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_are_unique_and_increasing() {
        let mut allocator = HandleAllocator::<BufferTag>::new();
        let mut seen = HashSet::new();
        let mut previous: Option<Handle<BufferTag>> = None;

        for _ in 0..1000 {
            let handle = allocator.allocate().unwrap();
            assert!(seen.insert(handle));
            if let Some(prev) = previous {
                assert!(handle.raw() > prev.raw());
            }
            previous = Some(handle);
        }
        assert_eq!(allocator.issued(), 1000);
    }

    #[test]
    fn test_sentinel_is_never_issued() {
        let mut allocator = HandleAllocator::<BufferTag>::starting_at(u32::MAX - 2);

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert!(a.is_valid());
        assert!(b.is_valid());
        assert_eq!(b.raw(), u32::MAX - 1);

        assert!(allocator.allocate().is_none());
        assert!(allocator.allocate().is_none());
    }

    #[test]
    fn test_allocators_per_kind_are_independent() {
        let mut buffers = HandleAllocator::<BufferTag>::new();
        let mut images = HandleAllocator::<ImageTag>::new();

        buffers.allocate().unwrap();
        let buffer = buffers.allocate().unwrap();
        let image: ImageHandle = images.allocate().unwrap();

        assert_eq!(buffer.raw(), 1);
        assert_eq!(image.raw(), 0);
    }

    #[test]
    fn test_default_handle_is_invalid() {
        let handle = BufferHandle::default();
        assert_eq!(handle, BufferHandle::INVALID);
        assert!(!handle.is_valid());
        assert_eq!(format!("{handle:?}"), "Handle(INVALID)");
    }
}
