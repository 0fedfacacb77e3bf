//! Render-loop driver
//!
//! One `draw_frame` call runs one iteration against the current frame slot:
//! wait on its fence, acquire an image, reset the fence, record, submit,
//! present, advance. A stale surface ends the iteration early and leaves the
//! frame index where it was, so the same slot is retried after recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::swapchain::{AcquiredImage, PresentOutcome};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Resize notification shared with the window's event callback
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    /// Flag with no pending resize
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that the framebuffer size changed
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Whether a resize is pending
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented; the frame index advanced
    Presented {
        /// Swapchain image that was presented
        image_index: u32,
    },
    /// The surface chain must be rebuilt before the next frame
    Stale,
}

/// GPU-side steps of one iteration, addressed by frame slot
pub trait FrameBackend {
    /// Block on the slot's fence
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Next presentable image; signals the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquiredImage>;

    /// Unsignal the slot fence; only called once an image was acquired
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Reset and re-record the slot's command buffer against `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Submit the slot's command buffer, signaling its fence on completion
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Queue `image_index` for presentation after the slot finishes rendering
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames that reached the presentation engine
    pub frames_presented: u64,
    /// Frames abandoned because the surface chain went stale
    pub stale_frames: u64,
}

/// Frame ring bookkeeping
#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    current_frame: usize,
    resize: ResizeFlag,
    stats: FrameStats,
}

impl FrameScheduler {
    /// Scheduler over `frames_in_flight` slots; zero is rejected
    pub fn new(frames_in_flight: usize, resize: ResizeFlag) -> VulkanResult<Self> {
        if frames_in_flight == 0 {
            return Err(VulkanError::invalid("at least one frame must be in flight"));
        }
        Ok(Self {
            frames_in_flight,
            current_frame: 0,
            resize,
            stats: FrameStats::default(),
        })
    }

    /// Run one render-loop iteration
    pub fn draw_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> VulkanResult<FrameStatus> {
        let slot = self.current_frame;

        backend.wait_for_slot(slot)?;

        let acquired = match backend.acquire_image(slot) {
            Ok(acquired) => acquired,
            Err(VulkanError::StaleSurface) => return Ok(self.stale()),
            Err(err) => return Err(err),
        };
        if acquired.suboptimal {
            log::debug!("Acquired image {} from a suboptimal chain", acquired.image_index);
        }

        backend.reset_slot_fence(slot)?;
        backend.record(slot, acquired.image_index)?;
        backend.submit(slot)?;

        let outcome = match backend.present(slot, acquired.image_index) {
            Ok(outcome) => Some(outcome),
            Err(VulkanError::StaleSurface) => None,
            Err(err) => return Err(err),
        };
        if outcome.is_some() {
            self.stats.frames_presented += 1;
        }

        let resized = self.resize.take();
        if resized || outcome != Some(PresentOutcome::Optimal) {
            if resized {
                log::debug!("Framebuffer resized; surface chain will be rebuilt");
            }
            self.stats.stale_frames += 1;
            return Ok(FrameStatus::Stale);
        }

        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        Ok(FrameStatus::Presented {
            image_index: acquired.image_index,
        })
    }

    fn stale(&mut self) -> FrameStatus {
        // A pending resize is covered by the rebuild that follows.
        self.resize.take();
        self.stats.stale_frames += 1;
        FrameStatus::Stale
    }

    /// Slot the next `draw_frame` uses
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Flag the resize callback raises
    pub fn resize_flag(&self) -> &ResizeFlag {
        &self.resize
    }

    /// Counters so far
    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}
