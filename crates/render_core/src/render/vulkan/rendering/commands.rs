//! Command pools, command recording and one-shot transfer submission

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Command pool bound to one queue family
///
/// Destroyed explicitly through `destroy`; freeing the pool frees every
/// command buffer allocated from it.
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool
    pub fn new(
        device: Device,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Return command buffers to the pool
    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if self.command_pool != vk::CommandPool::null() {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, command_buffers);
            }
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Destroy the pool; safe to call more than once
    pub fn destroy(&mut self) {
        if self.command_pool != vk::CommandPool::null() {
            unsafe {
                self.device.destroy_command_pool(self.command_pool, None);
            }
            self.command_pool = vk::CommandPool::null();
        }
    }
}

/// Records into a command buffer owned by someone else
pub struct CommandRecorder<'d> {
    command_buffer: vk::CommandBuffer,
    device: &'d Device,
    recording: bool,
}

impl<'d> CommandRecorder<'d> {
    /// Wrap a command buffer for recording
    pub fn new(command_buffer: vk::CommandBuffer, device: &'d Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin command recording
    pub fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::invalid("Command buffer already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(self)
    }

    /// Begin an inline render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_, 'd>> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Record a whole-range buffer copy
    pub fn cmd_copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        unsafe {
            self.device
                .cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }
}

/// Render pass in progress; ended when dropped
pub struct ActiveRenderPass<'r, 'd> {
    recorder: &'r mut CommandRecorder<'d>,
}

impl ActiveRenderPass<'_, '_> {
    /// Set dynamic viewport 0
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe {
            self.recorder
                .device
                .cmd_set_viewport(self.recorder.command_buffer, 0, &[*viewport]);
        }
    }

    /// Set dynamic scissor 0
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe {
            self.recorder
                .device
                .cmd_set_scissor(self.recorder.command_buffer, 0, &[*scissor]);
        }
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder.device.cmd_bind_pipeline(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Bind vertex buffers starting at `first_binding`
    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.recorder.device.cmd_bind_vertex_buffers(
                self.recorder.command_buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.recorder.device.cmd_bind_index_buffer(
                self.recorder.command_buffer,
                buffer,
                offset,
                index_type,
            );
        }
    }

    /// Draw `vertex_count` vertices as one instance
    pub fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.recorder
                .device
                .cmd_draw(self.recorder.command_buffer, vertex_count, 1, 0, 0);
        }
    }

    /// Draw `index_count` indices as one instance
    pub fn draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.recorder
                .device
                .cmd_draw_indexed(self.recorder.command_buffer, index_count, 1, 0, 0, 0);
        }
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder
                .device
                .cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

/// Synchronous buffer-to-buffer transfers
pub trait TransferSubmitter {
    /// Copy `region` from `src` to `dst`, returning once the copy has completed
    fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> VulkanResult<()>;
}

/// Runs short command sequences on the graphics queue and waits for them
///
/// Each call allocates a transient command buffer, submits it with a
/// dedicated fence and blocks until the fence signals. The command buffer
/// is freed on every path out of `execute`.
pub struct OneShotSubmitter {
    device: Device,
    queue: vk::Queue,
    pool: CommandPool,
}

impl OneShotSubmitter {
    /// Create a transient pool on `queue_family_index`
    pub fn new(device: Device, queue: vk::Queue, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(
            device.clone(),
            queue_family_index,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        Ok(Self { device, queue, pool })
    }

    /// Record with `record`, submit, and wait for completion
    pub fn execute<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>),
    {
        let command_buffer = self
            .pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("command buffer allocation returned nothing"))?;

        let result = self.record_and_submit(command_buffer, record);
        self.pool.free_command_buffers(&[command_buffer]);
        result
    }

    fn record_and_submit<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>),
    {
        let mut recorder = CommandRecorder::new(command_buffer, &self.device);
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut recorder);
        let command_buffer = recorder.end()?;

        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(VulkanError::Api)?
        };

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        let outcome = unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], fence)
                .map_err(|result| VulkanError::submission("One-shot submit", result))
                .and_then(|()| {
                    self.device
                        .wait_for_fences(&[fence], true, u64::MAX)
                        .map_err(|result| VulkanError::submission("One-shot fence wait", result))
                })
        };

        unsafe {
            self.device.destroy_fence(fence, None);
        }
        outcome
    }

    /// Release the transient pool; safe to call more than once
    pub fn destroy(&mut self) {
        self.pool.destroy();
    }
}

impl TransferSubmitter for OneShotSubmitter {
    fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> VulkanResult<()> {
        log::trace!("One-shot copy of {} bytes {:?} -> {:?}", region.size, src, dst);
        self.execute(|recorder| recorder.cmd_copy_buffer(src, dst, region))
    }
}
