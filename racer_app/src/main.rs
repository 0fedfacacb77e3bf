//! Speed Racer demo application
//!
//! Uploads a colored quad through the staged buffer path and draws it every
//! frame until the window closes. Resizing and minimizing exercise the
//! surface chain rebuild.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use render_core::foundation::logging;
use render_core::prelude::*;

const CONFIG_PATH: &str = "speed_racer.toml";

/// Shader pair reading the interleaved `Vertex` layout
const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";
const MESH_FRAGMENT_SHADER: &str = "triangle.frag.spv";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

impl Vertex {
    const fn new(x: f32, y: f32, color: [f32; 3]) -> Self {
        Self { position: [x, y], color }
    }

    fn layout() -> VertexInputLayout {
        VertexInputLayout::interleaved(std::mem::size_of::<Self>() as u32)
            .with_attribute(vk::Format::R32G32_SFLOAT, 0)
            .with_attribute(vk::Format::R32G32B32_SFLOAT, 8)
    }
}

const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(-0.5, -0.5, [1.0, 0.0, 0.0]),
    Vertex::new(0.5, -0.5, [0.0, 1.0, 0.0]),
    Vertex::new(0.5, 0.5, [0.0, 0.0, 1.0]),
    Vertex::new(-0.5, 0.5, [1.0, 1.0, 1.0]),
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RendererConfig::load_or_default(CONFIG_PATH)?;
    // The built-in triangle shaders take no vertex input; the quad needs the mesh pair.
    if config.shaders == ShaderConfig::default() {
        config.shaders =
            ShaderConfig::with_path_resolution(MESH_VERTEX_SHADER, MESH_FRAGMENT_SHADER);
    }
    logging::init_with_default_filter(&config.log_level);
    log::info!("Starting {}", config.application_name);

    let mut window = Window::new(
        &config.window.title,
        config.window.width,
        config.window.height,
    )?;
    let mut renderer = Renderer::new(&mut window, &config, &Vertex::layout())?;

    let buffers = renderer.buffers_mut();
    let vertex_buffer =
        buffers.create_vertex_buffer(bytemuck::cast_slice(&QUAD_VERTICES))?;
    let index_buffer = buffers.create_index_buffer(bytemuck::cast_slice(&QUAD_INDICES))?;
    log::debug!("Quad uploaded: vertices {vertex_buffer:?}, indices {index_buffer:?}");

    let draw_list = renderer.draw_list_mut();
    draw_list.clear();
    draw_list.push(DrawCommand::Indexed {
        vertex_buffer,
        index_buffer,
        index_count: QUAD_INDICES.len() as u32,
    });

    let result = renderer.run(&mut window);
    let stats = renderer.stats();
    log::info!(
        "Presented {} frames ({} stale)",
        stats.frames_presented,
        stats.stale_frames
    );

    drop(renderer);
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_mesh_shader() {
        let source = include_str!("../../resources/shaders/mesh.vert");
        let inputs = source
            .lines()
            .filter(|line| line.contains("layout(location") && line.contains(") in "))
            .count();

        let layout = Vertex::layout();
        assert_eq!(layout.attributes.len(), inputs);
        assert_eq!(layout.bindings[0].stride, 20);
        assert_eq!(layout.attributes[1].offset, 8);
        assert_eq!(layout.attributes[1].location, 1);
    }
}
