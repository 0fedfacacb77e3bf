//! Error taxonomy for the Vulkan core
//!
//! Allocation, submission and surface-chain failures are fatal to the
//! operation that raised them. `StaleSurface` is the one recoverable
//! condition: the frame scheduler consumes it and the renderer rebuilds the
//! image chain.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Device memory could not be allocated, or the request was invalid
    #[error("Allocation of {requested} bytes failed: {reason}")]
    Allocation {
        /// Number of bytes that were requested
        requested: vk::DeviceSize,
        /// What the allocator or validation reported
        reason: String,
    },

    /// The device rejected an image-chain query or creation step
    #[error("Surface chain {stage} failed: {result:?}")]
    SurfaceChain {
        /// Which step of the chain setup failed
        stage: &'static str,
        /// Result code returned by the device
        result: vk::Result,
    },

    /// Queue submission or presentation rejected for a reason other than staleness
    #[error("{operation} rejected by device: {result:?}")]
    Submission {
        /// The queue operation that failed
        operation: &'static str,
        /// Result code returned by the device
        result: vk::Result,
    },

    /// The presentable surface no longer matches the window and must be rebuilt
    #[error("Presentation surface is out of date")]
    StaleSurface,

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl VulkanError {
    pub(crate) fn allocation(requested: vk::DeviceSize, reason: impl Into<String>) -> Self {
        Self::Allocation {
            requested,
            reason: reason.into(),
        }
    }

    pub(crate) const fn surface_chain(stage: &'static str, result: vk::Result) -> Self {
        Self::SurfaceChain { stage, result }
    }

    pub(crate) const fn submission(operation: &'static str, result: vk::Result) -> Self {
        Self::Submission { operation, result }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// True for the recoverable stale-surface condition
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSurface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_surface_is_recoverable() {
        assert!(VulkanError::StaleSurface.is_stale());
        assert!(!VulkanError::submission("queue submit", vk::Result::ERROR_DEVICE_LOST).is_stale());
        assert!(!VulkanError::allocation(64, "out of device memory").is_stale());
    }

    #[test]
    fn test_messages_name_the_failing_step() {
        let err =
            VulkanError::surface_chain("image view creation", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(err.to_string().contains("image view creation"));

        let err = VulkanError::allocation(256, "zero usage flags");
        assert_eq!(err.to_string(), "Allocation of 256 bytes failed: zero usage flags");
    }
}
