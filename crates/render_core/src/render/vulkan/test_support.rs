//! In-memory stand-ins for the device seams, used by unit tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use ash::vk;
use ash::vk::Handle as _;

use super::rendering::commands::TransferSubmitter;
use super::resources::allocator::{BufferCreateInfo, MemoryAllocator, MemoryResidency};
use super::state::swapchain::{
    AcquiredImage, PresentOutcome, PresentationDevice, SurfaceSupport, SwapchainRequest,
};
use super::{VulkanError, VulkanResult};

struct MockBuffer {
    bytes: Box<[u8]>,
    residency: MemoryResidency,
}

#[derive(Default)]
struct MemoryState {
    next_raw: u64,
    buffers: HashMap<u64, MockBuffer>,
    destroyed: usize,
    maps: usize,
    unmaps: usize,
    copies: usize,
    fail_allocation_in: Option<usize>,
    fail_next_copy: bool,
}

/// Shared fake device memory
#[derive(Clone, Default)]
pub struct DeviceMemory(Rc<RefCell<MemoryState>>);

impl DeviceMemory {
    pub fn live_buffers(&self) -> usize {
        self.0.borrow().buffers.len()
    }

    pub fn destroyed(&self) -> usize {
        self.0.borrow().destroyed
    }

    pub fn copies(&self) -> usize {
        self.0.borrow().copies
    }

    pub fn balanced_mapping(&self) -> bool {
        let state = self.0.borrow();
        state.maps == state.unmaps
    }

    pub fn contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.0
            .borrow()
            .buffers
            .get(&buffer.as_raw())
            .map(|b| b.bytes.to_vec())
            .unwrap_or_default()
    }

    pub fn residency(&self, buffer: vk::Buffer) -> Option<MemoryResidency> {
        self.0.borrow().buffers.get(&buffer.as_raw()).map(|b| b.residency)
    }

    pub fn fail_next_allocation(&self) {
        self.fail_allocation_in(0);
    }

    /// Let `successes` allocations through, then fail one
    pub fn fail_allocation_in(&self, successes: usize) {
        self.0.borrow_mut().fail_allocation_in = Some(successes);
    }

    pub fn fail_next_copy(&self) {
        self.0.borrow_mut().fail_next_copy = true;
    }
}

#[derive(Debug)]
pub struct MockAllocation {
    raw: u64,
}

pub struct MockAllocator {
    memory: DeviceMemory,
}

impl MockAllocator {
    pub fn new(memory: DeviceMemory) -> Self {
        Self { memory }
    }
}

impl MemoryAllocator for MockAllocator {
    type Allocation = MockAllocation;

    fn create_buffer(&self, info: &BufferCreateInfo) -> VulkanResult<(vk::Buffer, MockAllocation)> {
        let mut state = self.memory.0.borrow_mut();
        match state.fail_allocation_in {
            Some(0) => {
                state.fail_allocation_in = None;
                return Err(VulkanError::allocation(info.size, "out of device memory"));
            }
            Some(n) => state.fail_allocation_in = Some(n - 1),
            None => {}
        }
        state.next_raw += 1;
        let raw = state.next_raw;
        state.buffers.insert(
            raw,
            MockBuffer {
                bytes: vec![0u8; info.size as usize].into_boxed_slice(),
                residency: info.residency,
            },
        );
        Ok((vk::Buffer::from_raw(raw), MockAllocation { raw }))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut MockAllocation) {
        assert_eq!(buffer.as_raw(), allocation.raw);
        let mut state = self.memory.0.borrow_mut();
        assert!(state.buffers.remove(&allocation.raw).is_some(), "double free");
        state.destroyed += 1;
    }

    fn map_memory(&self, allocation: &mut MockAllocation) -> VulkanResult<*mut u8> {
        let mut state = self.memory.0.borrow_mut();
        let buffer = state
            .buffers
            .get_mut(&allocation.raw)
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if !buffer.residency.is_host_visible() {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let ptr = buffer.bytes.as_mut_ptr();
        state.maps += 1;
        Ok(ptr)
    }

    fn unmap_memory(&self, _allocation: &mut MockAllocation) {
        self.memory.0.borrow_mut().unmaps += 1;
    }
}

/// Executes copies immediately against `DeviceMemory`
pub struct MockSubmitter {
    memory: DeviceMemory,
}

impl MockSubmitter {
    pub fn new(memory: DeviceMemory) -> Self {
        Self { memory }
    }
}

impl TransferSubmitter for MockSubmitter {
    fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> VulkanResult<()> {
        let mut state = self.memory.0.borrow_mut();
        if std::mem::take(&mut state.fail_next_copy) {
            return Err(VulkanError::submission("Transfer submit", vk::Result::ERROR_DEVICE_LOST));
        }
        let src_offset = region.src_offset as usize;
        let dst_offset = region.dst_offset as usize;
        let len = region.size as usize;

        let source = state
            .buffers
            .get(&src.as_raw())
            .map(|b| b.bytes[src_offset..src_offset + len].to_vec())
            .ok_or(VulkanError::ResourceNotFound { id: src.as_raw() })?;
        let target = state
            .buffers
            .get_mut(&dst.as_raw())
            .ok_or(VulkanError::ResourceNotFound { id: dst.as_raw() })?;
        target.bytes[dst_offset..dst_offset + len].copy_from_slice(&source);
        state.copies += 1;
        Ok(())
    }
}

/// Scripted presentation device that logs every create and destroy
pub struct MockPresentation {
    pub support: SurfaceSupport,
    pub families: (u32, u32),
    pub extra_images: u32,
    pub next_raw: Cell<u64>,
    pub live: Cell<i64>,
    pub log: RefCell<Vec<&'static str>>,
    pub last_request: Cell<Option<SwapchainRequest>>,
    pub fail_view_at: Cell<Option<usize>>,
    pub acquire_result: Cell<Option<vk::Result>>,
    pub present_result: Cell<Option<vk::Result>>,
}

impl MockPresentation {
    pub fn new(capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            support: SurfaceSupport {
                capabilities,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::R8G8B8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            },
            families: (0, 0),
            extra_images: 0,
            next_raw: Cell::new(0),
            live: Cell::new(0),
            log: RefCell::new(Vec::new()),
            last_request: Cell::new(None),
            fail_view_at: Cell::new(None),
            acquire_result: Cell::new(None),
            present_result: Cell::new(None),
        }
    }

    fn next(&self) -> u64 {
        self.next_raw.set(self.next_raw.get() + 1);
        self.live.set(self.live.get() + 1);
        self.next_raw.get()
    }

    fn destroyed(&self, what: &'static str) {
        self.live.set(self.live.get() - 1);
        self.log.borrow_mut().push(what);
    }
}

impl PresentationDevice for &MockPresentation {
    fn queue_families(&self) -> (u32, u32) {
        self.families
    }

    fn query_support(&self) -> VulkanResult<SurfaceSupport> {
        Ok(self.support.clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR> {
        self.last_request.set(Some(*request));
        self.log.borrow_mut().push("create swapchain");
        Ok(vk::SwapchainKHR::from_raw(self.next()))
    }

    fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        let count = self.last_request.get().map_or(0, |r| r.min_image_count) + self.extra_images;
        Ok((0..count).map(|i| vk::Image::from_raw(1000 + u64::from(i))).collect())
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> VulkanResult<vk::ImageView> {
        if let Some(n) = self.fail_view_at.get() {
            if n == 0 {
                self.fail_view_at.set(None);
                return Err(VulkanError::surface_chain(
                    "image view creation",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            self.fail_view_at.set(Some(n - 1));
        }
        self.log.borrow_mut().push("create view");
        Ok(vk::ImageView::from_raw(self.next()))
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        self.log.borrow_mut().push("create framebuffer");
        Ok(vk::Framebuffer::from_raw(self.next()))
    }

    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        self.destroyed("destroy framebuffer");
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        self.destroyed("destroy view");
    }

    fn destroy_swapchain(&self, _swapchain: vk::SwapchainKHR) {
        self.destroyed("destroy swapchain");
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VulkanResult<AcquiredImage> {
        match self.acquire_result.take() {
            Some(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(VulkanError::StaleSurface),
            Some(other) => Err(VulkanError::submission("Image acquisition", other)),
            None => Ok(AcquiredImage {
                image_index: 0,
                suboptimal: false,
            }),
        }
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        _image_index: u32,
        _wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        match self.present_result.take() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
            Some(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(VulkanError::StaleSurface),
            Some(other) => Err(VulkanError::submission("Presentation", other)),
            None => Ok(PresentOutcome::Optimal),
        }
    }
}

pub fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: min,
        max_image_count: max,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D { width: 1, height: 1 },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        ..Default::default()
    }
}
