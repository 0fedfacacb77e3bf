//! Command recording, render pass, pipeline and draw submission

pub mod commands;
pub mod draw;
pub mod render_pass;
pub mod shader;

pub use commands::{
    ActiveRenderPass, CommandPool, CommandRecorder, OneShotSubmitter, TransferSubmitter,
};
pub use draw::{DrawCommand, DrawList};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, ShaderModule, VertexInputLayout};
