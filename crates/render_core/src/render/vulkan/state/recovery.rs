//! Stale surface recovery
//!
//! Once the scheduler reports a stale chain, the chain is rebuilt in a fixed
//! order: wait for a drawable framebuffer size, drain the device, recreate
//! swapchain and views, then rebuild framebuffers.

use ash::vk;

use super::swapchain::{PresentationDevice, SurfaceChain};
use crate::render::vulkan::events::{wait_for_nonzero_size, FramebufferSource};
use crate::render::vulkan::VulkanResult;

/// Blocks until the device has finished all submitted work
pub trait DeviceIdle {
    /// Wait for the device to go idle
    fn wait_idle(&self) -> VulkanResult<()>;
}

/// How a recovery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The chain was rebuilt at the given size
    Rebuilt {
        /// Framebuffer width the chain was rebuilt for
        width: u32,
        /// Framebuffer height the chain was rebuilt for
        height: u32,
    },
    /// The window closed while minimized; nothing was rebuilt
    WindowClosed,
}

/// Wait for a nonzero framebuffer size, then rebuild the chain
pub fn recover_surface_chain<D, I, S>(
    device: &I,
    chain: &mut SurfaceChain<D>,
    window: &mut S,
    render_pass: vk::RenderPass,
) -> VulkanResult<Recovery>
where
    D: PresentationDevice,
    I: DeviceIdle + ?Sized,
    S: FramebufferSource + ?Sized,
{
    let Some((width, height)) = wait_for_nonzero_size(window) else {
        log::debug!("Window closed while minimized; skipping surface rebuild");
        return Ok(Recovery::WindowClosed);
    };
    rebuild_surface_chain(device, chain, render_pass, width, height)?;
    Ok(Recovery::Rebuilt { width, height })
}

/// Drain the device, recreate the chain at `width`x`height` and rebuild its framebuffers
pub fn rebuild_surface_chain<D, I>(
    device: &I,
    chain: &mut SurfaceChain<D>,
    render_pass: vk::RenderPass,
    width: u32,
    height: u32,
) -> VulkanResult<()>
where
    D: PresentationDevice,
    I: DeviceIdle + ?Sized,
{
    device.wait_idle()?;
    chain.recreate(width, height)?;
    chain.create_framebuffers(render_pass)?;

    let extent = chain.extent();
    log::warn!("Surface chain rebuilt at {}x{}", extent.width, extent.height);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::state::SurfaceChainState;
    use crate::render::vulkan::test_support::{capabilities, MockPresentation};
    use crate::render::vulkan::VulkanError;
    use ash::vk::Handle as _;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    impl DeviceIdle for MockPresentation {
        fn wait_idle(&self) -> VulkanResult<()> {
            self.log.borrow_mut().push("wait idle");
            Ok(())
        }
    }

    struct MinimizedWindow<'a> {
        log: &'a RefCell<Vec<&'static str>>,
        sizes: VecDeque<(u32, u32)>,
        current: (u32, u32),
        closes: bool,
    }

    impl FramebufferSource for MinimizedWindow<'_> {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.current
        }

        fn wait_events(&mut self) {
            self.log.borrow_mut().push("wait events");
            if let Some(next) = self.sizes.pop_front() {
                self.current = next;
            }
        }

        fn should_close(&self) -> bool {
            self.closes && self.sizes.is_empty()
        }
    }

    struct FailingIdle {
        calls: Cell<usize>,
    }

    impl DeviceIdle for FailingIdle {
        fn wait_idle(&self) -> VulkanResult<()> {
            self.calls.set(self.calls.get() + 1);
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        }
    }

    fn ready_chain(mock: &MockPresentation) -> SurfaceChain<&MockPresentation> {
        let mut chain = SurfaceChain::new(mock, vk::PresentModeKHR::FIFO);
        chain.create_swapchain(640, 480).unwrap();
        chain.create_image_views().unwrap();
        chain.create_framebuffers(vk::RenderPass::from_raw(7)).unwrap();
        chain.mark_stale();
        mock.log.borrow_mut().clear();
        chain
    }

    #[test]
    fn test_recovery_waits_for_size_then_idles_then_rebuilds() {
        let mock = MockPresentation::new(capabilities(1, 1));
        let mut chain = ready_chain(&mock);
        let mut window = MinimizedWindow {
            log: &mock.log,
            sizes: VecDeque::from([(0, 0), (800, 600)]),
            current: (0, 0),
            closes: false,
        };

        let outcome =
            recover_surface_chain(&mock, &mut chain, &mut window, vk::RenderPass::from_raw(7))
                .unwrap();

        assert_eq!(
            outcome,
            Recovery::Rebuilt {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            *mock.log.borrow(),
            vec![
                "wait events",
                "wait events",
                "wait idle",
                "destroy framebuffer",
                "destroy view",
                "destroy swapchain",
                "create swapchain",
                "create view",
                "create framebuffer",
            ]
        );
        assert_eq!(chain.state(), SurfaceChainState::Ready);
        assert_eq!(chain.extent().width, 800);
        assert!(chain.is_consistent());
    }

    #[test]
    fn test_window_closed_while_minimized_skips_rebuild() {
        let mock = MockPresentation::new(capabilities(1, 1));
        let mut chain = ready_chain(&mock);
        let mut window = MinimizedWindow {
            log: &mock.log,
            sizes: VecDeque::from([(0, 0)]),
            current: (0, 0),
            closes: true,
        };

        let outcome =
            recover_surface_chain(&mock, &mut chain, &mut window, vk::RenderPass::from_raw(7))
                .unwrap();

        assert_eq!(outcome, Recovery::WindowClosed);
        assert_eq!(*mock.log.borrow(), vec!["wait events"]);
        assert_eq!(chain.state(), SurfaceChainState::Stale);
        assert_eq!(chain.framebuffers().len(), 1);
    }

    #[test]
    fn test_failed_idle_leaves_chain_untouched() {
        let mock = MockPresentation::new(capabilities(1, 1));
        let mut chain = ready_chain(&mock);
        let idle = FailingIdle {
            calls: Cell::new(0),
        };

        let result =
            rebuild_surface_chain(&idle, &mut chain, vk::RenderPass::from_raw(7), 1024, 768);

        assert!(matches!(result, Err(VulkanError::Api(_))));
        assert_eq!(idle.calls.get(), 1);
        assert!(mock.log.borrow().is_empty());
        assert_eq!(chain.extent().width, 640);
    }
}
