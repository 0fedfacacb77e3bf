//! Vulkan renderer
//!
//! Owns every GPU object of the running application and drives the frame
//! loop. Construction follows dependency order; whatever exists is released
//! by walking `TEARDOWN_ORDER` once the device is idle, whether construction
//! failed halfway or the renderer is shutting down.

use std::path::Path;

use ash::{vk, Device};

use super::events::{wait_for_nonzero_size, FramebufferSource};
use super::initialization::{VulkanContext, Window};
use super::rendering::{
    CommandPool, CommandRecorder, DrawList, GraphicsPipeline, OneShotSubmitter, RenderPass,
    VertexInputLayout,
};
use super::resources::{BufferManager, ResourceTable, VmaAllocator};
use super::state::{
    rebuild_surface_chain, recover_surface_chain, release_in_order, AcquiredImage, FrameBackend,
    FrameScheduler, FrameSlots, FrameStats, FrameStatus, PresentOutcome, Recovery, ResizeFlag,
    SurfaceChain, TeardownStage, TeardownTarget, VulkanPresentation,
};
use super::{VulkanError, VulkanResult};
use crate::core::RendererConfig;

/// Buffer manager used by the renderer
pub type GpuBuffers = BufferManager<VmaAllocator, OneShotSubmitter>;

/// The running renderer
pub struct Renderer {
    context: VulkanContext,
    buffers: GpuBuffers,
    surface_chain: SurfaceChain<VulkanPresentation>,
    render_pass: RenderPass,
    pipeline: GraphicsPipeline,
    command_pool: CommandPool,
    frame_slots: FrameSlots,
    scheduler: FrameScheduler,
    draw_list: DrawList,
    clear_color: [f32; 4],
    recreations: u64,
    torn_down: bool,
}

impl Renderer {
    /// Bring up device, surface chain, pipeline and frame slots for `window`
    ///
    /// Registers a resize callback on the window. On failure every object
    /// created so far is released before the error is returned.
    pub fn new(
        window: &mut Window,
        config: &RendererConfig,
        vertex_input: &VertexInputLayout,
    ) -> VulkanResult<Self> {
        config
            .validate()
            .and_then(|()| config.shaders.validate())
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let resize = ResizeFlag::new();
        let scheduler = FrameScheduler::new(config.max_frames_in_flight, resize.clone())?;

        let context = VulkanContext::new(
            window,
            &config.application_name,
            config.validation_enabled(),
        )?;
        let mut pending = PendingRenderer::new(context);
        if let Err(err) = pending.build(window, config, vertex_input) {
            log::error!("Renderer construction failed: {err}");
            pending.release();
            return Err(err);
        }
        let renderer = pending.finish(scheduler, config.clear_color)?;

        window.on_framebuffer_resize(resize, |flag, _, _| flag.request());
        log::info!(
            "Renderer ready: {} frames in flight, {} swapchain images",
            config.max_frames_in_flight,
            renderer.surface_chain.image_count()
        );
        Ok(renderer)
    }

    /// Render one frame, rebuilding the surface chain if it went stale
    pub fn draw_frame(&mut self, window: &mut Window) -> VulkanResult<FrameStatus> {
        let mut backend = VulkanFrameBackend {
            device: &self.context.device.device,
            graphics_queue: self.context.device.graphics_queue,
            slots: &self.frame_slots,
            surface_chain: &mut self.surface_chain,
            render_pass: self.render_pass.handle(),
            pipeline: self.pipeline.handle(),
            draw_list: &self.draw_list,
            resources: self.buffers.resources(),
            clear_color: self.clear_color,
        };
        let status = self.scheduler.draw_frame(&mut backend)?;

        if status == FrameStatus::Stale {
            self.recover(window)?;
        }
        Ok(status)
    }

    fn recover<S: FramebufferSource + ?Sized>(&mut self, window: &mut S) -> VulkanResult<()> {
        let recovery = recover_surface_chain(
            &self.context,
            &mut self.surface_chain,
            window,
            self.render_pass.handle(),
        )?;
        if matches!(recovery, Recovery::Rebuilt { .. }) {
            self.recreations += 1;
        }
        Ok(())
    }

    /// Rebuild the surface chain and framebuffers at `width`x`height`
    pub fn recreate(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        rebuild_surface_chain(
            &self.context,
            &mut self.surface_chain,
            self.render_pass.handle(),
            width,
            height,
        )?;
        self.recreations += 1;
        Ok(())
    }

    /// Draw until the window asks to close, then wait for the device
    pub fn run(&mut self, window: &mut Window) -> VulkanResult<()> {
        while !window.should_close() {
            window.poll_events();
            if let Err(err) = self.draw_frame(window) {
                log::error!("Render loop aborted: {err}");
                if let Err(idle) = self.context.wait_idle() {
                    log::error!("Device did not go idle after failure: {idle}");
                }
                return Err(err);
            }
        }

        self.context.wait_idle()
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    /// Buffer manager for creating and updating GPU buffers
    pub fn buffers(&self) -> &GpuBuffers {
        &self.buffers
    }

    /// Mutable buffer manager
    pub fn buffers_mut(&mut self) -> &mut GpuBuffers {
        &mut self.buffers
    }

    /// Draws recorded into every frame
    pub fn draw_list_mut(&mut self) -> &mut DrawList {
        &mut self.draw_list
    }

    /// Current swapchain, views and framebuffers
    pub fn surface_chain(&self) -> &SurfaceChain<VulkanPresentation> {
        &self.surface_chain
    }

    /// Presented and stale frame counts so far
    pub fn stats(&self) -> FrameStats {
        self.scheduler.stats()
    }

    /// Index of the frame slot the next iteration uses
    pub fn current_frame(&self) -> usize {
        self.scheduler.current_frame()
    }

    /// Destroy every GPU object in dependency order; safe to call more than once
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        GpuObjects {
            context: &mut self.context,
            buffers: Some(&mut self.buffers),
            surface_chain: Some(&mut self.surface_chain),
            render_pass: Some(&mut self.render_pass),
            pipeline: Some(&mut self.pipeline),
            command_pool: Some(&mut self.command_pool),
            frame_slots: Some(&mut self.frame_slots),
        }
        .release_all();

        let stats = self.scheduler.stats();
        log::info!(
            "Renderer shut down after {} frames ({} stale, {} surface rebuilds)",
            stats.frames_presented,
            stats.stale_frames,
            self.recreations
        );
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Objects created so far while a `Renderer` is being built
struct PendingRenderer {
    context: VulkanContext,
    buffers: Option<GpuBuffers>,
    surface_chain: Option<SurfaceChain<VulkanPresentation>>,
    render_pass: Option<RenderPass>,
    pipeline: Option<GraphicsPipeline>,
    command_pool: Option<CommandPool>,
    frame_slots: Option<FrameSlots>,
}

impl PendingRenderer {
    const fn new(context: VulkanContext) -> Self {
        Self {
            context,
            buffers: None,
            surface_chain: None,
            render_pass: None,
            pipeline: None,
            command_pool: None,
            frame_slots: None,
        }
    }

    /// Create every object after the context, storing each as soon as it exists
    fn build(
        &mut self,
        window: &mut Window,
        config: &RendererConfig,
        vertex_input: &VertexInputLayout,
    ) -> VulkanResult<()> {
        let device = self.context.raw_device();
        let graphics_family = self.context.graphics_queue_family();

        let mut allocator = VmaAllocator::new(
            self.context.instance(),
            &device,
            self.context.physical_device().device,
        )?;
        let queue = self.context.graphics_queue();
        let submitter = match OneShotSubmitter::new(device.clone(), queue, graphics_family) {
            Ok(submitter) => submitter,
            Err(err) => {
                allocator.destroy();
                return Err(err);
            }
        };
        self.buffers = Some(BufferManager::new(allocator, submitter));

        let (width, height) = wait_for_nonzero_size(window).ok_or_else(|| {
            VulkanError::InitializationFailed("window closed before first frame".to_string())
        })?;
        let presentation = self.context.presentation();
        let surface_chain = self
            .surface_chain
            .insert(SurfaceChain::new(presentation, config.present_mode.to_vk()));
        surface_chain.create_swapchain(width, height)?;
        surface_chain.create_image_views()?;

        let render_pass = self.render_pass.insert(RenderPass::new_color_pass(
            device.clone(),
            surface_chain.format().format,
        )?);
        surface_chain.create_framebuffers(render_pass.handle())?;

        self.pipeline = Some(GraphicsPipeline::from_files(
            device.clone(),
            render_pass.handle(),
            Path::new(&config.shaders.vertex_shader_path),
            Path::new(&config.shaders.fragment_shader_path),
            vertex_input,
        )?);

        let command_pool = self.command_pool.insert(CommandPool::new(
            device.clone(),
            graphics_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?);
        let command_buffers =
            command_pool.allocate_command_buffers(config.max_frames_in_flight as u32)?;
        self.frame_slots = Some(FrameSlots::new(device, &command_buffers)?);
        Ok(())
    }

    /// Hand every object to a `Renderer`, or release them if any is missing
    fn finish(
        mut self,
        scheduler: FrameScheduler,
        clear_color: [f32; 4],
    ) -> VulkanResult<Renderer> {
        match (
            self.buffers.take(),
            self.surface_chain.take(),
            self.render_pass.take(),
            self.pipeline.take(),
            self.command_pool.take(),
            self.frame_slots.take(),
        ) {
            (
                Some(buffers),
                Some(surface_chain),
                Some(render_pass),
                Some(pipeline),
                Some(command_pool),
                Some(frame_slots),
            ) => Ok(Renderer {
                context: self.context,
                buffers,
                surface_chain,
                render_pass,
                pipeline,
                command_pool,
                frame_slots,
                scheduler,
                draw_list: DrawList::default(),
                clear_color,
                recreations: 0,
                torn_down: false,
            }),
            (buffers, surface_chain, render_pass, pipeline, command_pool, frame_slots) => {
                self.buffers = buffers;
                self.surface_chain = surface_chain;
                self.render_pass = render_pass;
                self.pipeline = pipeline;
                self.command_pool = command_pool;
                self.frame_slots = frame_slots;
                self.release();
                Err(VulkanError::InitializationFailed(
                    "renderer construction finished with objects missing".to_string(),
                ))
            }
        }
    }

    fn release(&mut self) {
        GpuObjects {
            context: &mut self.context,
            buffers: self.buffers.as_mut(),
            surface_chain: self.surface_chain.as_mut(),
            render_pass: self.render_pass.as_mut(),
            pipeline: self.pipeline.as_mut(),
            command_pool: self.command_pool.as_mut(),
            frame_slots: self.frame_slots.as_mut(),
        }
        .release_all();
    }
}

/// Whichever renderer objects exist, borrowed for ordered release
struct GpuObjects<'a> {
    context: &'a mut VulkanContext,
    buffers: Option<&'a mut GpuBuffers>,
    surface_chain: Option<&'a mut SurfaceChain<VulkanPresentation>>,
    render_pass: Option<&'a mut RenderPass>,
    pipeline: Option<&'a mut GraphicsPipeline>,
    command_pool: Option<&'a mut CommandPool>,
    frame_slots: Option<&'a mut FrameSlots>,
}

impl GpuObjects<'_> {
    fn release_all(mut self) {
        if let Err(err) = self.context.wait_idle() {
            log::error!("wait_idle before teardown failed: {err}");
        }
        let released = release_in_order(&mut self);
        log::debug!("Released {} teardown stages", released.len());
    }
}

impl TeardownTarget for GpuObjects<'_> {
    fn is_created(&self, stage: TeardownStage) -> bool {
        match stage {
            TeardownStage::SyncObjects => self.frame_slots.is_some(),
            // The one-shot transfer pool lives in the buffer manager.
            TeardownStage::CommandPool => self.command_pool.is_some() || self.buffers.is_some(),
            TeardownStage::Pipeline => self.pipeline.is_some(),
            TeardownStage::SurfaceChain => self.surface_chain.is_some(),
            TeardownStage::RenderPass => self.render_pass.is_some(),
            TeardownStage::BufferResources | TeardownStage::Allocator => self.buffers.is_some(),
            TeardownStage::Device | TeardownStage::Surface | TeardownStage::Instance => true,
        }
    }

    fn release(&mut self, stage: TeardownStage) {
        match stage {
            TeardownStage::SyncObjects => {
                if let Some(slots) = self.frame_slots.as_mut() {
                    slots.destroy();
                }
            }
            TeardownStage::CommandPool => {
                if let Some(pool) = self.command_pool.as_mut() {
                    pool.destroy();
                }
                if let Some(buffers) = self.buffers.as_mut() {
                    buffers.submitter_mut().destroy();
                }
            }
            TeardownStage::Pipeline => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.destroy();
                }
            }
            TeardownStage::SurfaceChain => {
                if let Some(chain) = self.surface_chain.as_mut() {
                    chain.cleanup();
                }
            }
            TeardownStage::RenderPass => {
                if let Some(render_pass) = self.render_pass.as_mut() {
                    render_pass.destroy();
                }
            }
            TeardownStage::BufferResources => {
                if let Some(buffers) = self.buffers.as_mut() {
                    buffers.destroy_all();
                }
            }
            TeardownStage::Allocator => {
                if let Some(buffers) = self.buffers.as_mut() {
                    buffers.resources_mut().allocator_mut().destroy();
                }
            }
            TeardownStage::Device => self.context.destroy_device(),
            TeardownStage::Surface => self.context.destroy_surface(),
            TeardownStage::Instance => self.context.destroy_instance(),
        }
    }
}

/// Per-frame GPU work against the renderer's objects
struct VulkanFrameBackend<'a> {
    device: &'a Device,
    graphics_queue: vk::Queue,
    slots: &'a FrameSlots,
    surface_chain: &'a mut SurfaceChain<VulkanPresentation>,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    draw_list: &'a DrawList,
    resources: &'a ResourceTable<VmaAllocator>,
    clear_color: [f32; 4],
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.slots.wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquiredImage> {
        let frame = self.slots.slot(slot)?;
        self.surface_chain.acquire_next_image(frame.image_available)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.slots.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let frame = self.slots.slot(slot)?;
        let framebuffer = self.surface_chain.framebuffer(image_index).ok_or_else(|| {
            VulkanError::invalid(format!("no framebuffer for image {image_index}"))
        })?;
        let extent = self.surface_chain.extent();

        unsafe {
            self.device
                .reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let mut recorder = CommandRecorder::new(frame.command_buffer, self.device);
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;
        {
            let mut pass = recorder.begin_render_pass(
                self.render_pass,
                framebuffer,
                render_area,
                &clear_values,
            )?;
            pass.bind_pipeline(self.pipeline);
            pass.set_viewport(&viewport);
            pass.set_scissor(&render_area);
            self.draw_list.record(&mut pass, self.resources);
        }
        recorder.end()?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.slots.slot(slot)?;
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], frame.in_flight)
                .map_err(|r| VulkanError::submission("Queue submit", r))
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let frame = self.slots.slot(slot)?;
        self.surface_chain.present(image_index, frame.render_finished)
    }
}
