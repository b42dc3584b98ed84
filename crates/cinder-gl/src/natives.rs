//! GL objects keyed by the same handles as the resource registry.

use cinder_rhi::handles::ResourceKind;
use cinder_rhi::{
    BufferHandle, ClearColor, ComputePipelineHandle, FramebufferHandle, GraphicsPipelineHandle,
    ImageHandle, RenderPassHandle, SamplerHandle, VertexArrayHandle,
};
use glow::HasContext;
use slotmap::{Key, SecondaryMap};

use crate::error::{GlError, Result};

pub struct GlBuffer {
    pub buffer: glow::Buffer,
    /// CPU copy handed out by `map_buffer` for host-visible memory.
    pub shadow: Option<Vec<u8>>,
}

pub struct GlTexture {
    /// `None` for the default framebuffer's color buffer.
    pub texture: Option<glow::Texture>,
    pub target: u32,
    pub internal_format: u32,
}

/// Load operations of a render pass. GL has no render pass object.
pub struct GlRenderPass {
    pub clear_mask: u32,
    pub color_clears: Vec<bool>,
    pub depth_clear: bool,
}

pub struct GlFramebuffer {
    /// `None` renders into the default framebuffer.
    pub framebuffer: Option<glow::Framebuffer>,
    pub color_count: usize,
}

pub struct GlGraphicsPipeline {
    pub program: glow::Program,
    /// Vertex formats live in a VAO that buffers are bound into at draw time.
    pub vertex_array: glow::VertexArray,
    /// Strides per vertex binding, for `glBindVertexBuffer`.
    pub strides: Vec<i32>,
}

#[derive(Default)]
pub struct NativeObjects {
    pub buffers: SecondaryMap<BufferHandle, GlBuffer>,
    pub textures: SecondaryMap<ImageHandle, GlTexture>,
    pub samplers: SecondaryMap<SamplerHandle, glow::Sampler>,
    pub render_passes: SecondaryMap<RenderPassHandle, GlRenderPass>,
    pub framebuffers: SecondaryMap<FramebufferHandle, GlFramebuffer>,
    pub graphics_pipelines: SecondaryMap<GraphicsPipelineHandle, GlGraphicsPipeline>,
    pub compute_pipelines: SecondaryMap<ComputePipelineHandle, glow::Program>,
    pub vertex_arrays: SecondaryMap<VertexArrayHandle, glow::VertexArray>,
}

impl NativeObjects {
    /// Delete every GL object.
    ///
    /// # Safety
    /// The context that created the objects must be current.
    pub unsafe fn destroy_all(&mut self, gl: &glow::Context) {
        for (_, buffer) in self.buffers.drain() {
            gl.delete_buffer(buffer.buffer);
        }
        for (_, texture) in self.textures.drain() {
            if let Some(texture) = texture.texture {
                gl.delete_texture(texture);
            }
        }
        for (_, sampler) in self.samplers.drain() {
            gl.delete_sampler(sampler);
        }
        for (_, framebuffer) in self.framebuffers.drain() {
            if let Some(framebuffer) = framebuffer.framebuffer {
                gl.delete_framebuffer(framebuffer);
            }
        }
        for (_, pipeline) in self.graphics_pipelines.drain() {
            gl.delete_program(pipeline.program);
            gl.delete_vertex_array(pipeline.vertex_array);
        }
        for (_, program) in self.compute_pipelines.drain() {
            gl.delete_program(program);
        }
        for (_, vertex_array) in self.vertex_arrays.drain() {
            gl.delete_vertex_array(vertex_array);
        }
        self.render_passes.clear();
    }
}

impl GlRenderPass {
    /// Clear colors for the attachments this pass clears, in attachment order.
    pub fn cleared_colors<'a>(
        &'a self,
        values: &'a [ClearColor],
    ) -> impl Iterator<Item = (usize, ClearColor)> + 'a {
        self.color_clears
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(_, (clear, _))| **clear)
            .map(|(index, (_, value))| (index, *value))
    }
}

pub fn native<K: Key + ResourceKind, V>(map: &SecondaryMap<K, V>, handle: K) -> Result<&V> {
    map.get(handle).ok_or(GlError::MissingNative(K::KIND))
}

pub fn native_mut<K: Key + ResourceKind, V>(map: &mut SecondaryMap<K, V>, handle: K) -> Result<&mut V> {
    map.get_mut(handle).ok_or(GlError::MissingNative(K::KIND))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cleared_attachments_get_clear_values() {
        let pass = GlRenderPass {
            clear_mask: glow::COLOR_BUFFER_BIT,
            color_clears: vec![true, false, true],
            depth_clear: false,
        };
        let values = [ClearColor::BLACK, ClearColor::TRANSPARENT, ClearColor([1.0; 4])];
        let cleared: Vec<_> = pass.cleared_colors(&values).map(|(i, _)| i).collect();
        assert_eq!(cleared, vec![0, 2]);
    }
}
