//! SPIR-V shader modules and the graphics pipeline
//!
//! The pipeline leaves viewport and scissor dynamic: the surface extent
//! changes on every recreation, and the pipeline outlives those changes.

use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module, destroyed when dropped
///
/// Modules are only needed while the pipeline is being built.
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V words
    pub fn from_words(device: Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load shader from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "Failed to open shader file {}: {e}",
                path.display()
            ))
        })?;

        let words = ash::util::read_spv(&mut file).map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "Invalid SPIR-V in {}: {e}",
                path.display()
            ))
        })?;

        log::debug!("Loaded shader {}", path.display());
        Self::from_words(device, &words)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Vertex buffer bindings and attributes the pipeline consumes
#[derive(Debug, Clone, Default)]
pub struct VertexInputLayout {
    /// Vertex buffer bindings
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Shader inputs read from those bindings
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputLayout {
    /// No vertex buffers; positions come from the vertex shader
    pub fn empty() -> Self {
        Self::default()
    }

    /// One interleaved per-vertex binding of `stride` bytes
    pub fn interleaved(stride: u32) -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: Vec::new(),
        }
    }

    /// Append an attribute at the next location of binding 0
    pub fn with_attribute(mut self, format: vk::Format, offset: u32) -> Self {
        let location = self.attributes.len() as u32;
        self.attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        });
        self
    }
}

/// Graphics pipeline and its layout
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create graphics pipeline
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        vertex_input: &VertexInputLayout,
    ) -> VulkanResult<Self> {
        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the values are set per frame.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();
        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(err));
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            return Err(VulkanError::InitializationFailed(
                "pipeline creation returned no pipeline".to_string(),
            ));
        };
        log::debug!("Graphics pipeline created");

        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    /// Load both stages from disk and build the pipeline
    pub fn from_files(
        device: Device,
        render_pass: vk::RenderPass,
        vertex_path: &Path,
        fragment_path: &Path,
        vertex_input: &VertexInputLayout,
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_file(device.clone(), vertex_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), fragment_path)?;
        Self::new(device, render_pass, &vertex_shader, &fragment_shader, vertex_input)
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Destroy pipeline and layout; safe to call more than once
    pub fn destroy(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_take_consecutive_locations() {
        let layout = VertexInputLayout::interleaved(20)
            .with_attribute(vk::Format::R32G32_SFLOAT, 0)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, 8);

        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride, 20);
        assert_eq!(layout.attributes[0].location, 0);
        assert_eq!(layout.attributes[1].location, 1);
        assert_eq!(layout.attributes[1].offset, 8);
    }

    #[test]
    fn test_empty_layout_has_no_bindings() {
        let layout = VertexInputLayout::empty();
        assert!(layout.bindings.is_empty());
        assert!(layout.attributes.is_empty());
    }
}
