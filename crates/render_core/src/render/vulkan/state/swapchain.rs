//! Presentable image chain
//!
//! `SurfaceChain` negotiates format, present mode, extent and image count
//! with the surface, then owns the swapchain, one view per image and one
//! framebuffer per view. Device calls go through `PresentationDevice` so the
//! lifecycle can be exercised without a GPU.
//!
//! Lifecycle: `Uninitialized` -> `Ready` -> `Stale` -> `Ready` ... -> `TornDown`.

use ash::vk;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// What the surface supports on the selected physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Queue ownership of the chain's images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingPolicy {
    /// Graphics and presentation share a family
    Exclusive,
    /// Images are used concurrently by two families
    Concurrent {
        /// Graphics queue family
        graphics: u32,
        /// Present queue family
        present: u32,
    },
}

/// Fully negotiated swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    /// Chosen format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Chosen present mode
    pub present_mode: vk::PresentModeKHR,
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Minimum number of images to create
    pub min_image_count: u32,
    /// Queue family sharing of the images
    pub sharing: SharingPolicy,
    /// Current surface transform
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Image handed out by the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the chain images
    pub image_index: u32,
    /// The image is usable but the chain no longer matches the surface exactly
    pub suboptimal: bool,
}

/// Non-fatal present result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The chain matches the surface
    Optimal,
    /// Presented, but the chain should be rebuilt
    Suboptimal,
}

/// Device and surface operations the chain needs
///
/// `acquire_next_image` and `queue_present` report an out-of-date surface
/// as `VulkanError::StaleSurface`.
pub trait PresentationDevice {
    /// Graphics and present queue family indices
    fn queue_families(&self) -> (u32, u32);

    /// Current surface capabilities, formats and present modes
    fn query_support(&self) -> VulkanResult<SurfaceSupport>;

    /// Create a swapchain with a null `old_swapchain`
    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR>;

    /// Images owned by `swapchain`
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;

    /// 2D color view of a chain image
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> VulkanResult<vk::ImageView>;

    /// Framebuffer with `view` as its single attachment
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Next presentable image, signaling `signal` when it is ready
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquiredImage>;

    /// Present `image_index` once `wait` is signaled
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome>;
}

/// Prefer 8-bit BGRA sRGB, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use `preferred` when offered; FIFO is always available
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the framebuffer size clamped into its bounds
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_width: u32,
    framebuffer_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: framebuffer_width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Exclusive when one family does both jobs, concurrent otherwise
pub fn choose_sharing(graphics_family: u32, present_family: u32) -> SharingPolicy {
    if graphics_family == present_family {
        SharingPolicy::Exclusive
    } else {
        SharingPolicy::Concurrent {
            graphics: graphics_family,
            present: present_family,
        }
    }
}

/// Where the chain is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceChainState {
    /// Nothing created yet
    Uninitialized,
    /// Swapchain, views and framebuffers all exist and match
    Ready,
    /// Must be rebuilt before the next frame
    Stale,
    /// Cleaned up; only `create_swapchain` brings it back
    TornDown,
}

/// Swapchain, image views and framebuffers kept in lockstep
pub struct SurfaceChain<D: PresentationDevice> {
    device: D,
    preferred_present_mode: vk::PresentModeKHR,
    state: SurfaceChainState,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    requested_image_count: u32,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<D: PresentationDevice> SurfaceChain<D> {
    /// Uninitialized chain; nothing is created until `create_swapchain`
    pub fn new(device: D, preferred_present_mode: vk::PresentModeKHR) -> Self {
        Self {
            device,
            preferred_present_mode,
            state: SurfaceChainState::Uninitialized,
            swapchain: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            requested_image_count: 0,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
        }
    }

    /// Negotiate parameters and create the swapchain
    pub fn create_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        if width == 0 || height == 0 {
            return Err(VulkanError::invalid(format!(
                "cannot build a surface chain for a {width}x{height} framebuffer"
            )));
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            return Err(VulkanError::invalid("swapchain already exists"));
        }

        let support = self.device.query_support()?;
        let surface_format = choose_surface_format(&support.formats).ok_or(
            VulkanError::surface_chain("format selection", vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
        )?;
        let present_mode = choose_present_mode(&support.present_modes, self.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, width, height);
        let min_image_count = choose_image_count(&support.capabilities);
        let (graphics, present) = self.device.queue_families();

        let request = SwapchainRequest {
            surface_format,
            present_mode,
            extent,
            min_image_count,
            sharing: choose_sharing(graphics, present),
            pre_transform: support.capabilities.current_transform,
        };
        self.swapchain = self.device.create_swapchain(&request)?;
        self.format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.requested_image_count = min_image_count;

        log::info!(
            "Swapchain created: {}x{} {:?} {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            min_image_count
        );
        Ok(())
    }

    /// Enumerate the chain's images and create a color view for each
    pub fn create_image_views(&mut self) -> VulkanResult<()> {
        if self.swapchain == vk::SwapchainKHR::null() {
            return Err(VulkanError::invalid("no swapchain to enumerate images from"));
        }
        let images = self.device.swapchain_images(self.swapchain)?;
        if images.is_empty() {
            return Err(VulkanError::surface_chain(
                "image enumeration",
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ));
        }

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match self.device.create_image_view(image, self.format.format) {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        self.device.destroy_image_view(view);
                    }
                    return Err(err);
                }
            }
        }

        log::debug!("Created {} swapchain image views", views.len());
        self.images = images;
        self.image_views = views;
        Ok(())
    }

    /// One framebuffer per image view, bound to `render_pass`
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        if self.image_views.is_empty() {
            return Err(VulkanError::invalid("no image views to build framebuffers on"));
        }
        if !self.framebuffers.is_empty() {
            return Err(VulkanError::invalid("framebuffers already exist"));
        }

        let mut framebuffers = Vec::with_capacity(self.image_views.len());
        for &view in &self.image_views {
            match self.device.create_framebuffer(render_pass, view, self.extent) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(err) => {
                    for framebuffer in framebuffers {
                        self.device.destroy_framebuffer(framebuffer);
                    }
                    return Err(err);
                }
            }
        }

        self.framebuffers = framebuffers;
        self.state = SurfaceChainState::Ready;
        Ok(())
    }

    /// Rebuild swapchain and views for a new framebuffer size
    ///
    /// The device must be idle. Framebuffers are not rebuilt here; follow up
    /// with `create_framebuffers`.
    pub fn recreate(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        if width == 0 || height == 0 {
            return Err(VulkanError::invalid(format!(
                "cannot recreate surface chain at {width}x{height}"
            )));
        }
        log::debug!("Recreating surface chain at {width}x{height}");

        self.destroy_chain_objects();
        self.state = SurfaceChainState::Stale;
        self.create_swapchain(width, height)?;
        self.create_image_views()
    }

    /// Tear down everything; safe to call repeatedly
    pub fn cleanup(&mut self) {
        if self.state == SurfaceChainState::TornDown {
            return;
        }
        self.destroy_chain_objects();
        self.state = SurfaceChainState::TornDown;
        log::debug!("Surface chain destroyed");
    }

    fn destroy_chain_objects(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Record that the chain no longer matches the surface
    pub fn mark_stale(&mut self) {
        if self.state == SurfaceChainState::Ready {
            self.state = SurfaceChainState::Stale;
        }
    }

    /// Next image to render into, signaling `signal` when it is available
    pub fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VulkanResult<AcquiredImage> {
        let result = self.device.acquire_next_image(self.swapchain, signal);
        if matches!(result, Err(VulkanError::StaleSurface)) {
            self.mark_stale();
        }
        result
    }

    /// Queue `image_index` for display once `wait` is signaled
    pub fn present(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let result = self.device.queue_present(self.swapchain, image_index, wait);
        if matches!(result, Err(VulkanError::StaleSurface) | Ok(PresentOutcome::Suboptimal)) {
            self.mark_stale();
        }
        result
    }

    /// Images, views and framebuffers all match the negotiated count
    pub fn is_consistent(&self) -> bool {
        let count = self.images.len();
        count > 0
            && self.image_views.len() == count
            && self.framebuffers.len() == count
            && count >= self.requested_image_count as usize
    }

    /// Lifecycle state
    pub fn state(&self) -> SurfaceChainState {
        self.state
    }

    /// Raw swapchain, null when not created
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Negotiated surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Negotiated present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images the device actually created
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// One framebuffer per view
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    /// Framebuffer for `image_index`, if it exists
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Presentation device
    pub fn device(&self) -> &D {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::test_support::{capabilities, MockPresentation};
    use ash::vk::Handle as _;

    fn build(chain: &mut SurfaceChain<&MockPresentation>, width: u32, height: u32) {
        chain.create_swapchain(width, height).unwrap();
        chain.create_image_views().unwrap();
        chain.create_framebuffers(vk::RenderPass::from_raw(77)).unwrap();
    }

    #[test]
    fn test_undefined_current_extent_uses_framebuffer_size() {
        let caps = capabilities(2, 8);
        assert_eq!(
            choose_extent(&caps, 1280, 720),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(
            choose_extent(&caps, 9000, 0),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn test_defined_current_extent_wins() {
        let mut caps = capabilities(2, 8);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&caps, 1280, 720), caps.current_extent);
    }

    #[test]
    fn test_format_preference_and_fallback() {
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };

        assert_eq!(choose_surface_format(&[other, preferred]), Some(preferred));
        assert_eq!(choose_surface_format(&[other]), Some(other));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_image_count_clamped_only_by_nonzero_max() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn test_sharing_depends_on_queue_families() {
        assert_eq!(choose_sharing(0, 0), SharingPolicy::Exclusive);
        assert_eq!(
            choose_sharing(0, 2),
            SharingPolicy::Concurrent {
                graphics: 0,
                present: 2
            }
        );
    }

    #[test]
    fn test_full_build_negotiates_and_stays_consistent() {
        let mut mock = MockPresentation::new(capabilities(2, 8));
        mock.extra_images = 1;
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::MAILBOX);
        build(&mut chain, 1280, 720);

        assert_eq!(chain.state(), SurfaceChainState::Ready);
        assert_eq!(
            chain.extent(),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(chain.format().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(chain.image_count(), 4);
        assert_eq!(chain.images().len(), 4);
        assert_eq!(chain.image_views().len(), 4);
        assert_eq!(chain.framebuffers().len(), 4);
        assert!(chain.is_consistent());
        assert_eq!(
            mock.last_request.get().map(|r| r.sharing),
            Some(SharingPolicy::Exclusive)
        );
    }

    #[test]
    fn test_zero_sized_framebuffer_is_rejected() {
        let mock = MockPresentation::new(capabilities(2, 8));
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::MAILBOX);

        assert!(chain.create_swapchain(0, 0).is_err());
        build(&mut chain, 640, 480);
        assert!(chain.recreate(0, 0).is_err());
        assert!(chain.is_consistent());
    }

    #[test]
    fn test_recreate_destroys_in_reverse_creation_order() {
        let mock = MockPresentation::new(capabilities(1, 2));
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::FIFO);
        build(&mut chain, 640, 480);
        mock.log.borrow_mut().clear();

        chain.recreate(800, 600).unwrap();
        assert_eq!(
            *mock.log.borrow(),
            vec![
                "destroy framebuffer",
                "destroy framebuffer",
                "destroy view",
                "destroy view",
                "destroy swapchain",
                "create swapchain",
                "create view",
                "create view",
            ]
        );
        assert_eq!(chain.state(), SurfaceChainState::Stale);
        assert!(chain.framebuffers().is_empty());

        chain.create_framebuffers(vk::RenderPass::from_raw(77)).unwrap();
        assert_eq!(chain.state(), SurfaceChainState::Ready);
        assert_eq!(chain.extent().width, 800);
        assert!(chain.is_consistent());
    }

    #[test]
    fn test_failed_view_creation_leaks_nothing() {
        let mock = MockPresentation::new(capabilities(3, 0));
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::FIFO);
        chain.create_swapchain(640, 480).unwrap();

        mock.fail_view_at.set(Some(2));
        assert!(chain.create_image_views().is_err());
        assert!(chain.image_views().is_empty());
        assert_eq!(mock.live.get(), 1);

        chain.cleanup();
        assert_eq!(mock.live.get(), 0);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mock = MockPresentation::new(capabilities(2, 8));
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::MAILBOX);
        build(&mut chain, 1280, 720);

        chain.cleanup();
        let destroyed = mock.log.borrow().len();
        chain.cleanup();

        assert_eq!(mock.log.borrow().len(), destroyed);
        assert_eq!(mock.live.get(), 0);
        assert_eq!(chain.state(), SurfaceChainState::TornDown);
    }

    #[test]
    fn test_stale_acquire_and_suboptimal_present_mark_chain_stale() {
        let mock = MockPresentation::new(capabilities(2, 8));
        let mut chain = SurfaceChain::new(&mock, vk::PresentModeKHR::MAILBOX);
        build(&mut chain, 1280, 720);

        mock.acquire_result.set(Some(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(chain.acquire_next_image(vk::Semaphore::null()).unwrap_err().is_stale());
        assert_eq!(chain.state(), SurfaceChainState::Stale);

        chain.recreate(1280, 720).unwrap();
        chain.create_framebuffers(vk::RenderPass::from_raw(77)).unwrap();
        mock.present_result.set(Some(vk::Result::SUBOPTIMAL_KHR));
        assert_eq!(
            chain.present(0, vk::Semaphore::null()).unwrap(),
            PresentOutcome::Suboptimal
        );
        assert_eq!(chain.state(), SurfaceChainState::Stale);
    }
}
