//! Execution of recorded RHI commands on the GL context.
//!
//! GL has no command buffers, so submission walks the command list and
//! issues the matching calls directly. Descriptor sets are flattened onto
//! GL binding points as `set * BINDINGS_PER_SET + binding`: uniform and
//! storage buffers through indexed buffer targets, sampled images on the
//! texture unit of the same number paired with the set's sampler, and
//! storage images on the image unit of the same number.

use cinder_rhi::format::{mip_extent, SubresourceRegion};
use cinder_rhi::{
    BindingKind, BlendState, BoundResource, ClearDepthStencil, Command, DescriptorSetHandle,
    GraphicsPipelineDesc, ImageDesc, ResourceRegistry,
};
use glow::{CompressedPixelUnpackData, HasContext, PixelUnpackData};
use tracing::trace;

use crate::error::{GlError, Result};
use crate::natives::{native, GlTexture, NativeObjects};
use crate::translate::{
    blend_factor_to_gl, blend_op_to_gl, buffer_barrier_bits, compare_op_to_gl, cull_face_to_gl,
    front_face_to_gl, image_barrier_bits, index_type_to_gl, is_layered_target, polygon_mode_to_gl,
    texel_layout, topology_to_gl, TexelLayout,
};

/// Binding points reserved for each descriptor set.
pub const BINDINGS_PER_SET: u32 = 16;

pub const fn binding_point(set_index: u32, binding: u32) -> u32 {
    set_index * BINDINGS_PER_SET + binding
}

/// Framebuffers used as blit endpoints.
pub struct BlitTargets {
    pub read: glow::Framebuffer,
    pub draw: glow::Framebuffer,
}

struct DrawState {
    topology: u32,
    index_type: u32,
    index_size: u64,
    index_offset: u64,
    strides: Vec<i32>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            topology: glow::TRIANGLES,
            index_type: glow::UNSIGNED_INT,
            index_size: 4,
            index_offset: 0,
            strides: Vec::new(),
        }
    }
}

/// Issues one RHI command list on the context.
pub struct Replayer<'a> {
    gl: &'a glow::Context,
    registry: &'a ResourceRegistry,
    natives: &'a NativeObjects,
    blit: &'a BlitTargets,
    debug_groups: bool,
    state: DrawState,
}

impl<'a> Replayer<'a> {
    pub fn new(
        gl: &'a glow::Context,
        registry: &'a ResourceRegistry,
        natives: &'a NativeObjects,
        blit: &'a BlitTargets,
        debug_groups: bool,
    ) -> Self {
        Self {
            gl,
            registry,
            natives,
            blit,
            debug_groups,
            state: DrawState::default(),
        }
    }

    /// # Safety
    /// The context must be current and every native object live.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn replay(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.replay_one(command)?;
        }
        Ok(())
    }

    unsafe fn replay_one(&mut self, command: &Command) -> Result<()> {
        let gl = self.gl;
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                width,
                height,
                clear_colors,
                clear_depth,
            } => {
                let pass = native(&self.natives.render_passes, *render_pass)?;
                let fb = native(&self.natives.framebuffers, *framebuffer)?;
                gl.bind_framebuffer(glow::FRAMEBUFFER, fb.framebuffer);
                gl.viewport(0, 0, *width as i32, *height as i32);
                gl.disable(glow::SCISSOR_TEST);

                for (index, color) in pass.cleared_colors(clear_colors) {
                    gl.color_mask_draw_buffer(index as u32, true, true, true, true);
                    gl.clear_buffer_f32_slice(glow::COLOR, index as u32, &color.0);
                }
                if pass.depth_clear {
                    let value = clear_depth.unwrap_or(ClearDepthStencil::FAR);
                    gl.depth_mask(true);
                    if pass.clear_mask & glow::STENCIL_BUFFER_BIT != 0 {
                        gl.clear_buffer_depth_stencil(
                            glow::DEPTH_STENCIL,
                            0,
                            value.depth,
                            value.stencil as i32,
                        );
                    } else {
                        gl.clear_buffer_f32_slice(glow::DEPTH, 0, &[value.depth]);
                    }
                }
            }
            Command::EndRenderPass => {}
            Command::BindGraphicsPipeline(handle) => {
                let desc = self.registry.graphics_pipeline(*handle)?;
                let pipeline = native(&self.natives.graphics_pipelines, *handle)?;
                let color_count = self
                    .registry
                    .render_pass(desc.render_pass)?
                    .color_attachments
                    .len();
                gl.use_program(Some(pipeline.program));
                gl.bind_vertex_array(Some(pipeline.vertex_array));
                self.apply_fixed_function(desc, color_count);
                self.state.topology = topology_to_gl(desc.topology);
                self.state.strides.clone_from(&pipeline.strides);
            }
            Command::BindComputePipeline(handle) => {
                let program = native(&self.natives.compute_pipelines, *handle)?;
                gl.use_program(Some(*program));
            }
            Command::BindDescriptorSets { first_set, sets, .. } => {
                for (set_index, set) in (*first_set..).zip(sets) {
                    self.bind_set(set_index, *set)?;
                }
            }
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                for (binding, (buffer, offset)) in (*first_binding..).zip(buffers) {
                    let native_buffer = native(&self.natives.buffers, *buffer)?;
                    let stride = self.state.strides.get(binding as usize).copied().unwrap_or(0);
                    gl.bind_vertex_buffer(binding, Some(native_buffer.buffer), *offset as i32, stride);
                }
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let native_buffer = native(&self.natives.buffers, *buffer)?;
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(native_buffer.buffer));
                self.state.index_type = index_type_to_gl(*index_type);
                self.state.index_size = index_type.size();
                self.state.index_offset = *offset;
            }
            Command::BindVertexArray(handle) => {
                let desc = self.registry.vertex_array(*handle)?;
                let vertex_array = native(&self.natives.vertex_arrays, *handle)?;
                gl.bind_vertex_array(Some(*vertex_array));
                self.state.index_type = index_type_to_gl(desc.index_type);
                self.state.index_size = desc.index_type.size();
                self.state.index_offset = 0;
            }
            Command::SetViewport(viewport) => {
                gl.viewport(
                    viewport.x as i32,
                    viewport.y as i32,
                    viewport.width as i32,
                    viewport.height as i32,
                );
                gl.depth_range_f32(viewport.min_depth, viewport.max_depth);
            }
            Command::SetScissor(scissor) => {
                gl.enable(glow::SCISSOR_TEST);
                gl.scissor(scissor.x, scissor.y, scissor.width as i32, scissor.height as i32);
            }
            Command::SetDepthBias {
                constant, slope, ..
            } => {
                gl.polygon_offset(*slope, *constant);
            }
            Command::DrawVertices {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                gl.draw_arrays_instanced_base_instance(
                    self.state.topology,
                    *first_vertex as i32,
                    *vertex_count as i32,
                    *instance_count as i32,
                    *first_instance,
                );
            }
            Command::DrawIndices {
                first_index,
                index_count,
                vertex_offset,
                instance_count,
                first_instance,
            } => {
                let offset = self.state.index_offset + u64::from(*first_index) * self.state.index_size;
                gl.draw_elements_instanced_base_vertex_base_instance(
                    self.state.topology,
                    *index_count as i32,
                    self.state.index_type,
                    offset as i32,
                    *instance_count as i32,
                    *vertex_offset,
                    *first_instance,
                );
            }
            Command::Dispatch { x, y, z } => gl.dispatch_compute(*x, *y, *z),
            Command::ImageBarrier(barrier) => {
                let bits = image_barrier_bits(barrier.src, barrier.dst);
                if bits != 0 {
                    gl.memory_barrier(bits);
                }
            }
            Command::BufferBarrier(barrier) => {
                let bits = buffer_barrier_bits(barrier.src, barrier.dst);
                if bits != 0 {
                    gl.memory_barrier(bits);
                }
            }
            Command::BlitImage {
                src,
                src_mip,
                dst,
                dst_mip,
            } => {
                let src_desc = self.registry.image(*src)?;
                let dst_desc = self.registry.image(*dst)?;
                let src_tex = native(&self.natives.textures, *src)?;
                let dst_tex = native(&self.natives.textures, *dst)?;
                self.blit(src_desc, src_tex, *src_mip, dst_desc, dst_tex, *dst_mip);
            }
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let src = native(&self.natives.buffers, *src)?;
                let dst = native(&self.natives.buffers, *dst)?;
                gl.bind_buffer(glow::COPY_READ_BUFFER, Some(src.buffer));
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(dst.buffer));
                gl.copy_buffer_sub_data(
                    glow::COPY_READ_BUFFER,
                    glow::COPY_WRITE_BUFFER,
                    *src_offset as i32,
                    *dst_offset as i32,
                    *size as i32,
                );
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                let buffer = native(&self.natives.buffers, *src)?;
                let desc = self.registry.image(*dst)?;
                let texture = native(&self.natives.textures, *dst)?;
                gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(buffer.buffer));
                upload_regions(gl, desc, texture, regions)?;
                gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            }
            Command::BeginDebugLabel { name, .. } => {
                if self.debug_groups {
                    gl.push_debug_group(glow::DEBUG_SOURCE_APPLICATION, 0, name);
                }
            }
            Command::EndDebugLabel => {
                if self.debug_groups {
                    gl.pop_debug_group();
                }
            }
        }
        Ok(())
    }

    unsafe fn apply_fixed_function(&self, desc: &GraphicsPipelineDesc, color_count: usize) {
        let gl = self.gl;

        if desc.depth.test {
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(compare_op_to_gl(desc.depth.compare));
        } else {
            gl.disable(glow::DEPTH_TEST);
        }
        gl.depth_mask(desc.depth.write);

        match cull_face_to_gl(desc.raster.cull_mode) {
            Some(face) => {
                gl.enable(glow::CULL_FACE);
                gl.cull_face(face);
            }
            None => gl.disable(glow::CULL_FACE),
        }
        gl.front_face(front_face_to_gl(desc.raster.front_face));
        gl.polygon_mode(glow::FRONT_AND_BACK, polygon_mode_to_gl(desc.raster.polygon_mode));
        if desc.raster.depth_bias {
            gl.enable(glow::POLYGON_OFFSET_FILL);
        } else {
            gl.disable(glow::POLYGON_OFFSET_FILL);
        }
        if desc.raster.depth_clamp {
            gl.enable(glow::DEPTH_CLAMP);
        } else {
            gl.disable(glow::DEPTH_CLAMP);
        }
        if let Some(width) = desc.raster.line_width {
            gl.line_width(width);
        }

        for index in 0..color_count {
            apply_blend(gl, index as u32, &desc.blend_for(index));
        }
    }

    unsafe fn bind_set(&self, set_index: u32, set: DescriptorSetHandle) -> Result<()> {
        let gl = self.gl;
        let desc = self.registry.descriptor_set(set)?;
        let sampler = desc.slots.iter().find_map(|slot| match slot.item {
            Some(BoundResource::Sampler(sampler)) => self.natives.samplers.get(sampler).copied(),
            _ => None,
        });

        for slot in &desc.slots {
            let Some(item) = slot.item else {
                continue;
            };
            let point = binding_point(set_index, slot.binding);
            match (slot.kind, item) {
                (BindingKind::UniformBuffer, BoundResource::Buffer(buffer)) => {
                    let buffer = native(&self.natives.buffers, buffer)?;
                    gl.bind_buffer_base(glow::UNIFORM_BUFFER, point, Some(buffer.buffer));
                }
                (BindingKind::StorageBuffer, BoundResource::Buffer(buffer)) => {
                    let buffer = native(&self.natives.buffers, buffer)?;
                    gl.bind_buffer_base(glow::SHADER_STORAGE_BUFFER, point, Some(buffer.buffer));
                }
                (BindingKind::SampledImage | BindingKind::DepthImage, BoundResource::Image(image)) => {
                    let texture = native(&self.natives.textures, image)?;
                    let raw = texture.texture.ok_or(GlError::MissingNative("texture"))?;
                    gl.active_texture(glow::TEXTURE0 + point);
                    gl.bind_texture(texture.target, Some(raw));
                    gl.bind_sampler(point, sampler);
                }
                (BindingKind::StorageImage, BoundResource::Image(image)) => {
                    let texture = native(&self.natives.textures, image)?;
                    let raw = texture.texture.ok_or(GlError::MissingNative("texture"))?;
                    gl.bind_image_texture(
                        point,
                        raw,
                        0,
                        is_layered_target(texture.target) || texture.target == glow::TEXTURE_CUBE_MAP,
                        0,
                        glow::READ_WRITE,
                        texture.internal_format,
                    );
                }
                // Samplers are paired with the set's images above.
                _ => {}
            }
        }
        trace!("Bound set '{}' at {}", desc.debug_name, set_index);
        Ok(())
    }

    unsafe fn blit(
        &self,
        src_desc: &ImageDesc,
        src: &GlTexture,
        src_mip: u32,
        dst_desc: &ImageDesc,
        dst: &GlTexture,
        dst_mip: u32,
    ) {
        let gl = self.gl;
        let depth = src_desc.format.is_depth();
        let (attachment, mask, filter) = if depth {
            (
                crate::translate::depth_attachment_point(src_desc.format),
                glow::DEPTH_BUFFER_BIT,
                glow::NEAREST,
            )
        } else {
            (glow::COLOR_ATTACHMENT0, glow::COLOR_BUFFER_BIT, glow::LINEAR)
        };
        let src_w = mip_extent(src_desc.width, src_mip) as i32;
        let src_h = mip_extent(src_desc.height, src_mip) as i32;
        let dst_w = mip_extent(dst_desc.width, dst_mip) as i32;
        let dst_h = mip_extent(dst_desc.height, dst_mip) as i32;

        let layers = src_desc.array_layers.min(dst_desc.array_layers);
        for layer in 0..layers {
            attach_layer(gl, glow::READ_FRAMEBUFFER, self.blit.read, attachment, src, src_mip, layer);
            attach_layer(gl, glow::DRAW_FRAMEBUFFER, self.blit.draw, attachment, dst, dst_mip, layer);
            gl.blit_framebuffer(0, 0, src_w, src_h, 0, 0, dst_w, dst_h, mask, filter);
        }
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    }
}

unsafe fn apply_blend(gl: &glow::Context, index: u32, blend: &BlendState) {
    use cinder_rhi::ColorMask;

    if blend.enabled {
        gl.enable_draw_buffer(glow::BLEND, index);
        gl.blend_func_separate_draw_buffer(
            index,
            blend_factor_to_gl(blend.src_color),
            blend_factor_to_gl(blend.dst_color),
            blend_factor_to_gl(blend.src_alpha),
            blend_factor_to_gl(blend.dst_alpha),
        );
        gl.blend_equation_separate_draw_buffer(
            index,
            blend_op_to_gl(blend.color_op),
            blend_op_to_gl(blend.alpha_op),
        );
    } else {
        gl.disable_draw_buffer(glow::BLEND, index);
    }
    let mask = blend.color_mask;
    gl.color_mask_draw_buffer(
        index,
        mask.contains(ColorMask::RED),
        mask.contains(ColorMask::GREEN),
        mask.contains(ColorMask::BLUE),
        mask.contains(ColorMask::ALPHA),
    );
}

/// Attach one layer of one mip of `texture` to a scratch framebuffer.
unsafe fn attach_layer(
    gl: &glow::Context,
    target: u32,
    framebuffer: glow::Framebuffer,
    attachment: u32,
    texture: &GlTexture,
    mip: u32,
    layer: u32,
) {
    gl.bind_framebuffer(target, Some(framebuffer));
    match texture.target {
        glow::TEXTURE_2D => {
            gl.framebuffer_texture_2d(target, attachment, glow::TEXTURE_2D, texture.texture, mip as i32);
        }
        glow::TEXTURE_CUBE_MAP => gl.framebuffer_texture_2d(
            target,
            attachment,
            glow::TEXTURE_CUBE_MAP_POSITIVE_X + layer,
            texture.texture,
            mip as i32,
        ),
        _ => gl.framebuffer_texture_layer(target, attachment, texture.texture, mip as i32, layer as i32),
    }
}

/// Copy regions from the bound `PIXEL_UNPACK_BUFFER` into `texture`.
///
/// # Safety
/// The context must be current with the source buffer bound for unpacking.
pub unsafe fn upload_regions(
    gl: &glow::Context,
    desc: &ImageDesc,
    texture: &GlTexture,
    regions: &[SubresourceRegion],
) -> Result<()> {
    let raw = texture.texture.ok_or(GlError::MissingNative("texture"))?;
    let layout = texel_layout(desc.format);
    gl.bind_texture(texture.target, Some(raw));
    gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

    for region in regions {
        let level = region.mip as i32;
        let (w, h) = (region.width as i32, region.height as i32);
        let offset = region.offset as u32;
        let range = offset..offset + region.size as u32;

        if is_layered_target(texture.target) {
            let z = region.layer as i32;
            match layout {
                TexelLayout::Uncompressed { format, ty, .. } => gl.tex_sub_image_3d(
                    texture.target,
                    level,
                    0,
                    0,
                    z,
                    w,
                    h,
                    1,
                    format,
                    ty,
                    PixelUnpackData::BufferOffset(offset),
                ),
                TexelLayout::Compressed { internal } => gl.compressed_tex_sub_image_3d(
                    texture.target,
                    level,
                    0,
                    0,
                    z,
                    w,
                    h,
                    1,
                    internal,
                    CompressedPixelUnpackData::BufferRange(range),
                ),
            }
        } else {
            let face = if texture.target == glow::TEXTURE_CUBE_MAP {
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + region.layer
            } else {
                texture.target
            };
            match layout {
                TexelLayout::Uncompressed { format, ty, .. } => gl.tex_sub_image_2d(
                    face,
                    level,
                    0,
                    0,
                    w,
                    h,
                    format,
                    ty,
                    PixelUnpackData::BufferOffset(offset),
                ),
                TexelLayout::Compressed { internal } => gl.compressed_tex_sub_image_2d(
                    face,
                    level,
                    0,
                    0,
                    w,
                    h,
                    internal,
                    CompressedPixelUnpackData::BufferRange(range),
                ),
            }
        }
    }
    gl.bind_texture(texture.target, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_do_not_share_binding_points() {
        assert_eq!(binding_point(0, 3), 3);
        assert_eq!(binding_point(1, 0), BINDINGS_PER_SET);
        assert!(binding_point(0, BINDINGS_PER_SET - 1) < binding_point(1, 0));
    }
}
