//! `PresentationDevice` on top of the KHR surface and swapchain extensions

use std::ffi::CStr;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use super::swapchain::{
    AcquiredImage, PresentOutcome, PresentationDevice, SharingPolicy, SurfaceSupport,
    SwapchainRequest,
};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Device, surface and queues used for presentation
pub struct VulkanPresentation {
    device: Device,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    swapchain_loader: SwapchainLoader,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
}

impl VulkanPresentation {
    /// Presentation over an existing device and surface
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: &Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: Surface,
        present_queue: vk::Queue,
        graphics_family: u32,
        present_family: u32,
    ) -> Self {
        let swapchain_loader = SwapchainLoader::new(instance, &device);
        Self {
            device,
            physical_device,
            surface,
            surface_loader,
            swapchain_loader,
            present_queue,
            graphics_family,
            present_family,
        }
    }

    /// Whether `physical_device` exposes the swapchain extension
    pub fn device_supports_swapchain(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(physical_device) };
        let extensions = match extensions {
            Ok(extensions) => extensions,
            Err(err) => {
                log::warn!("Could not enumerate device extensions: {err:?}");
                return false;
            }
        };
        let wanted = SwapchainLoader::name();
        extensions.iter().any(|ext| {
            // SAFETY: the driver fills extension_name with a NUL-terminated string.
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == wanted
        })
    }
}

impl PresentationDevice for VulkanPresentation {
    fn queue_families(&self) -> (u32, u32) {
        (self.graphics_family, self.present_family)
    }

    fn query_support(&self) -> VulkanResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|r| VulkanError::surface_chain("capability query", r))?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(|r| VulkanError::surface_chain("format query", r))?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(|r| VulkanError::surface_chain("present mode query", r))?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR> {
        let families;
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(request.min_image_count)
            .image_format(request.surface_format.format)
            .image_color_space(request.surface_format.color_space)
            .image_extent(request.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(request.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(request.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        create_info = match request.sharing {
            SharingPolicy::Exclusive => create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE),
            SharingPolicy::Concurrent { graphics, present } => {
                families = [graphics, present];
                create_info
                    .image_sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&families)
            }
        };

        unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|r| VulkanError::surface_chain("swapchain creation", r))
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|r| VulkanError::surface_chain("image enumeration", r))
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(|r| VulkanError::surface_chain("image view creation", r))
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe {
            self.device
                .create_framebuffer(&create_info, None)
                .map_err(|r| VulkanError::surface_chain("framebuffer creation", r))
        }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VulkanResult<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquiredImage {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during acquire_next_image");
                Err(VulkanError::StaleSurface)
            }
            Err(e) => Err(VulkanError::submission("Image acquisition", e)),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date during queue_present");
                Err(VulkanError::StaleSurface)
            }
            Err(e) => Err(VulkanError::submission("Presentation", e)),
        }
    }
}
