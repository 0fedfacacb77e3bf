//! Surface chain, frame synchronization, recovery and teardown ordering

pub mod frame_scheduler;
pub mod presentation;
pub mod recovery;
pub mod swapchain;
pub mod sync;
pub mod teardown;

pub use frame_scheduler::{FrameBackend, FrameScheduler, FrameStats, FrameStatus, ResizeFlag};
pub use presentation::VulkanPresentation;
pub use recovery::{rebuild_surface_chain, recover_surface_chain, DeviceIdle, Recovery};
pub use swapchain::{
    AcquiredImage, PresentOutcome, PresentationDevice, SurfaceChain, SurfaceChainState,
    SurfaceSupport,
};
pub use sync::{FrameSlot, FrameSlots};
pub use teardown::{
    is_valid_teardown_order, release_in_order, TeardownStage, TeardownTarget, TEARDOWN_ORDER,
};
