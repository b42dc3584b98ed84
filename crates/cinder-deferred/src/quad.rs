//! Full-screen quad used by the light passes.

use cinder_rhi::{
    BufferCreateInfo, BufferHandle, BufferUsage, CommandBuffer, Core, Format, IndexType,
    MemoryUsage, VertexArrayCreateInfo, VertexArrayHandle, VertexAttribute, VertexBindingLayout,
    VertexInputRate,
};

use crate::error::Result;

const POSITIONS: [f32; 8] = [-1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0];
const INDICES: [u16; 6] = [0, 1, 2, 3, 0, 2];

pub const QUAD_INDEX_COUNT: u32 = INDICES.len() as u32;

/// One `vec2` position per vertex at location 0.
pub fn quad_vertex_layout() -> VertexBindingLayout {
    VertexBindingLayout {
        stride: std::mem::size_of::<[f32; 2]>() as u32,
        input_rate: VertexInputRate::Vertex,
        attributes: vec![VertexAttribute::new("vertexPosition", 0, 0, Format::R32G32Sfloat)],
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FullscreenQuad {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_array: VertexArrayHandle,
}

impl FullscreenQuad {
    pub fn new<C: Core>(core: &mut C) -> Result<Self> {
        let vertex_buffer = core.create_buffer(
            &BufferCreateInfo::new(
                "Light Vertex Position Buffer",
                std::mem::size_of_val(&POSITIONS) as u64,
                BufferUsage::VERTEX,
                MemoryUsage::GpuOnly,
            )
            .with_data(bytemuck::cast_slice(&POSITIONS)),
        )?;
        let index_buffer = core.create_buffer(
            &BufferCreateInfo::new(
                "Light Index Buffer",
                std::mem::size_of_val(&INDICES) as u64,
                BufferUsage::INDEX,
                MemoryUsage::GpuOnly,
            )
            .with_data(bytemuck::cast_slice(&INDICES)),
        )?;
        let vertex_array = core.create_vertex_array(&VertexArrayCreateInfo {
            debug_name: "Light Vertex Array Object",
            vertex_buffers: &[vertex_buffer],
            layouts: &[quad_vertex_layout()],
            index_buffer: Some(index_buffer),
            index_type: IndexType::Uint16,
        })?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_array,
        })
    }

    /// Bind the quad for indexed draws.
    pub fn bind(&self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.bind_vertex_array(self.vertex_array)?;
        cmd.bind_vertex_buffers(0, &[(self.vertex_buffer, 0)])?;
        cmd.bind_index_buffer(self.index_buffer, 0, IndexType::Uint16)?;
        Ok(())
    }

    pub fn draw(&self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.draw_indices(0, QUAD_INDEX_COUNT, 0, 1, 0)?;
        Ok(())
    }

    pub fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        core.delete_vertex_array(self.vertex_array)?;
        core.delete_buffer(self.index_buffer)?;
        core.delete_buffer(self.vertex_buffer)?;
        Ok(())
    }
}
