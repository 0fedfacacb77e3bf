//! Draw commands recorded into every frame
//!
//! Commands name buffers by handle. They are resolved against the resource
//! table at record time, so a buffer destroyed between frames is skipped
//! instead of being bound as a dangling handle.

use ash::vk;

use super::commands::ActiveRenderPass;
use crate::render::vulkan::resources::{BufferHandle, MemoryAllocator, ResourceTable};

/// One draw inside the frame's render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCommand {
    /// Non-indexed draw, optionally fed by a vertex buffer
    Vertices {
        /// Vertices to draw
        vertex_count: u32,
        /// Buffer bound at binding 0; `None` for shaders with no vertex inputs
        vertex_buffer: Option<BufferHandle>,
    },
    /// Indexed draw with 16-bit indices
    Indexed {
        /// Buffer bound at binding 0
        vertex_buffer: BufferHandle,
        /// `u16` index buffer
        index_buffer: BufferHandle,
        /// Indices to draw
        index_count: u32,
    },
}

/// A draw command with its handles turned into raw buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDraw {
    /// Resolved `DrawCommand::Vertices`
    Vertices {
        /// Vertices to draw
        vertex_count: u32,
        /// Raw vertex buffer, if any
        vertex_buffer: Option<vk::Buffer>,
    },
    /// Resolved `DrawCommand::Indexed`
    Indexed {
        /// Raw vertex buffer
        vertex_buffer: vk::Buffer,
        /// Raw index buffer
        index_buffer: vk::Buffer,
        /// Indices to draw
        index_count: u32,
    },
}

/// Ordered list of draws
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl Default for DrawList {
    /// A single three-vertex draw with positions generated in the shader
    fn default() -> Self {
        Self {
            commands: vec![DrawCommand::Vertices {
                vertex_count: 3,
                vertex_buffer: None,
            }],
        }
    }
}

impl DrawList {
    /// Empty list
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Append a draw
    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    /// Remove every draw
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Draws in recording order
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Resolve handles, dropping draws whose buffers are gone
    pub fn resolve<A: MemoryAllocator>(&self, resources: &ResourceTable<A>) -> Vec<ResolvedDraw> {
        let mut resolved = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            match *command {
                DrawCommand::Vertices {
                    vertex_count,
                    vertex_buffer,
                } => {
                    let buffer = match vertex_buffer {
                        Some(handle) => {
                            let raw = resources.get_buffer(handle);
                            if raw.is_empty() {
                                log::warn!("Skipping draw with stale vertex buffer {handle:?}");
                                continue;
                            }
                            Some(raw.buffer)
                        }
                        None => None,
                    };
                    resolved.push(ResolvedDraw::Vertices {
                        vertex_count,
                        vertex_buffer: buffer,
                    });
                }
                DrawCommand::Indexed {
                    vertex_buffer,
                    index_buffer,
                    index_count,
                } => {
                    let vertices = resources.get_buffer(vertex_buffer);
                    let indices = resources.get_buffer(index_buffer);
                    if vertices.is_empty() || indices.is_empty() {
                        log::warn!(
                            "Skipping indexed draw with stale buffers {:?}/{:?}",
                            vertex_buffer,
                            index_buffer
                        );
                        continue;
                    }
                    resolved.push(ResolvedDraw::Indexed {
                        vertex_buffer: vertices.buffer,
                        index_buffer: indices.buffer,
                        index_count,
                    });
                }
            }
        }
        resolved
    }

    /// Record every resolvable draw into an open render pass
    pub fn record<A: MemoryAllocator>(
        &self,
        pass: &mut ActiveRenderPass<'_, '_>,
        resources: &ResourceTable<A>,
    ) {
        for draw in self.resolve(resources) {
            match draw {
                ResolvedDraw::Vertices {
                    vertex_count,
                    vertex_buffer,
                } => {
                    if let Some(buffer) = vertex_buffer {
                        pass.bind_vertex_buffers(0, &[buffer], &[0]);
                    }
                    pass.draw(vertex_count);
                }
                ResolvedDraw::Indexed {
                    vertex_buffer,
                    index_buffer,
                    index_count,
                } => {
                    pass.bind_vertex_buffers(0, &[vertex_buffer], &[0]);
                    pass.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT16);
                    pass.draw_indexed(index_count);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::resources::{BufferCreateInfo, MemoryResidency};
    use crate::render::vulkan::test_support::{DeviceMemory, MockAllocator};

    fn table_with(count: usize) -> (ResourceTable<MockAllocator>, Vec<BufferHandle>) {
        let mut table = ResourceTable::new(MockAllocator::new(DeviceMemory::default()));
        let info = BufferCreateInfo::new(
            64,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
            MemoryResidency::GpuOnly,
        );
        let handles = (0..count).map(|_| table.create_buffer(&info).unwrap()).collect();
        (table, handles)
    }

    #[test]
    fn test_default_list_draws_one_triangle() {
        let (table, _) = table_with(0);
        assert_eq!(
            DrawList::default().resolve(&table),
            vec![ResolvedDraw::Vertices {
                vertex_count: 3,
                vertex_buffer: None
            }]
        );
    }

    #[test]
    fn test_default_draw_matches_bundled_triangle_shader() {
        // The default list binds no vertex buffer, so the default vertex
        // shader must not declare vertex inputs.
        let source = include_str!("../../../../../../resources/shaders/triangle.vert");
        let declares_inputs = source
            .lines()
            .any(|line| line.contains("layout(location") && line.contains(") in "));
        assert!(!declares_inputs);

        assert!(DrawList::default().commands().iter().all(|command| matches!(
            command,
            DrawCommand::Vertices {
                vertex_buffer: None,
                ..
            }
        )));
    }

    #[test]
    fn test_indexed_draw_resolves_raw_buffers() {
        let (table, handles) = table_with(2);
        let mut list = DrawList::new();
        list.push(DrawCommand::Indexed {
            vertex_buffer: handles[0],
            index_buffer: handles[1],
            index_count: 6,
        });

        assert_eq!(
            list.resolve(&table),
            vec![ResolvedDraw::Indexed {
                vertex_buffer: table.get_vk_buffer(handles[0]),
                index_buffer: table.get_vk_buffer(handles[1]),
                index_count: 6,
            }]
        );
    }

    #[test]
    fn test_destroyed_buffers_are_skipped() {
        let (mut table, handles) = table_with(2);
        let mut list = DrawList::new();
        list.push(DrawCommand::Indexed {
            vertex_buffer: handles[0],
            index_buffer: handles[1],
            index_count: 6,
        });
        list.push(DrawCommand::Vertices {
            vertex_count: 3,
            vertex_buffer: Some(handles[0]),
        });

        table.destroy_buffer(handles[1]);
        let resolved = list.resolve(&table);
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0], ResolvedDraw::Vertices { vertex_count: 3, .. }));
    }
}
