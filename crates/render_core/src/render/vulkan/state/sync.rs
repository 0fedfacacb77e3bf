//! Per-frame synchronization objects
//!
//! Each in-flight frame owns an image-available semaphore, a render-finished
//! semaphore, a fence and a command buffer. The fence starts signaled so the
//! first wait on every slot returns immediately. A slot's command buffer is
//! only re-recorded after its fence has been waited on.
//!
//! Slots are created together and destroyed together, after the device is idle.

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Synchronization objects of one ring entry
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Signaled by acquisition, waited on by the submit
    pub image_available: vk::Semaphore,
    /// Signaled by the submit, waited on by presentation
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU finishes this slot's submission
    pub in_flight: vk::Fence,
    /// Re-recorded every time the slot comes around
    pub command_buffer: vk::CommandBuffer,
}

/// Ring of frame slots
pub struct FrameSlots {
    device: Device,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Create one slot per command buffer
    pub fn new(device: Device, command_buffers: &[vk::CommandBuffer]) -> VulkanResult<Self> {
        let mut frame_slots = Self {
            device,
            slots: Vec::with_capacity(command_buffers.len()),
        };

        for &command_buffer in command_buffers {
            match frame_slots.create_slot(command_buffer) {
                Ok(slot) => frame_slots.slots.push(slot),
                Err(err) => {
                    frame_slots.destroy();
                    return Err(err);
                }
            }
        }

        log::debug!("Created {} frame slots", frame_slots.slots.len());
        Ok(frame_slots)
    }

    fn create_slot(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<FrameSlot> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = self
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(VulkanError::Api)?;
            let render_finished = match self.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(err) => {
                    self.device.destroy_semaphore(image_available, None);
                    return Err(VulkanError::Api(err));
                }
            };
            let in_flight = match self.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(err) => {
                    self.device.destroy_semaphore(image_available, None);
                    self.device.destroy_semaphore(render_finished, None);
                    return Err(VulkanError::Api(err));
                }
            };

            Ok(FrameSlot {
                image_available,
                render_finished,
                in_flight,
                command_buffer,
            })
        }
    }

    /// Number of slots in the ring
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handles of slot `index`
    pub fn slot(&self, index: usize) -> VulkanResult<FrameSlot> {
        self.slots
            .get(index)
            .copied()
            .ok_or_else(|| VulkanError::invalid(format!("frame slot {index} out of range")))
    }

    /// Block until the slot's previous submission has finished
    pub fn wait(&self, index: usize) -> VulkanResult<()> {
        let slot = self.slot(index)?;
        unsafe {
            self.device
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
                .map_err(|r| VulkanError::submission("Frame fence wait", r))
        }
    }

    /// Unsignal the slot's fence ahead of its next submission
    pub fn reset(&self, index: usize) -> VulkanResult<()> {
        let slot = self.slot(index)?;
        unsafe {
            self.device
                .reset_fences(&[slot.in_flight])
                .map_err(VulkanError::Api)
        }
    }

    /// Destroy every slot's semaphores and fence; safe to call more than once
    ///
    /// Command buffers belong to their pool and are freed with it.
    pub fn destroy(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        for slot in self.slots.drain(..) {
            unsafe {
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_fence(slot.in_flight, None);
            }
        }
        log::debug!("Frame slots destroyed");
    }
}
