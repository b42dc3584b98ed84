//! Translation of recorded RHI commands into a native command buffer.
//!
//! Image layouts are tracked per image on the native side. Barriers move an
//! image from whatever layout it is actually in, render passes leave their
//! attachments in the pass's final layouts, and transfers transition their
//! operands on demand.

use std::ffi::CString;

use ash::vk;
use cinder_rhi::format::mip_extent;
use cinder_rhi::{
    BindPoint, BufferBarrier, Command, ImageBarrier, ImageDesc, ImageHandle, ResourceRegistry,
    Scissor, Viewport,
};
use tracing::trace;

use crate::error::Result;
use crate::natives::{native, native_mut, NativeObjects};
use crate::translate::{aspect_mask, buffer_state, image_state, index_type_to_vk, ImageState};

/// Stages and access a transition waits on when the previous use is unknown.
const UNKNOWN_SRC: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_WRITE);

pub fn full_range(desc: &ImageDesc) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(desc.format),
        base_mip_level: 0,
        level_count: desc.mip_levels,
        base_array_layer: 0,
        layer_count: desc.array_layers,
    }
}

/// Stages and access that make an image usable in `layout`.
pub fn layout_destination(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::SHADER_READ)
        }
        _ => (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_READ),
    }
}

/// Build a whole-image layout transition.
pub fn layout_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
}

struct ActivePass {
    attachments: Vec<ImageHandle>,
    final_layouts: Vec<vk::ImageLayout>,
}

/// Records one RHI command list into a native command buffer.
pub struct Replayer<'a> {
    device: &'a ash::Device,
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    registry: &'a ResourceRegistry,
    natives: &'a mut NativeObjects,
    cmd: vk::CommandBuffer,
    graphics_layout: vk::PipelineLayout,
    compute_layout: vk::PipelineLayout,
    active_pass: Option<ActivePass>,
}

impl<'a> Replayer<'a> {
    pub fn new(
        device: &'a ash::Device,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
        registry: &'a ResourceRegistry,
        natives: &'a mut NativeObjects,
        cmd: vk::CommandBuffer,
    ) -> Self {
        Self {
            device,
            debug_utils,
            registry,
            natives,
            cmd,
            graphics_layout: vk::PipelineLayout::null(),
            compute_layout: vk::PipelineLayout::null(),
            active_pass: None,
        }
    }

    /// Record every command.
    ///
    /// # Safety
    /// `cmd` must be in the recording state and every native object must be live.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn record(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.record_one(command)?;
        }
        Ok(())
    }

    unsafe fn record_one(&mut self, command: &Command) -> Result<()> {
        let device = self.device;
        let cmd = self.cmd;
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                width,
                height,
                clear_colors,
                clear_depth,
            } => self.begin_render_pass(*render_pass, *framebuffer, *width, *height, clear_colors, *clear_depth)?,
            Command::EndRenderPass => {
                device.cmd_end_render_pass(cmd);
                if let Some(pass) = self.active_pass.take() {
                    for (image, layout) in pass.attachments.into_iter().zip(pass.final_layouts) {
                        native_mut(&mut self.natives.images, image)?.layout = layout;
                    }
                }
            }
            Command::BindGraphicsPipeline(pipeline) => {
                let pipeline = *native(&self.natives.graphics_pipelines, *pipeline)?;
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                self.graphics_layout = pipeline.layout;
            }
            Command::BindComputePipeline(pipeline) => {
                let pipeline = *native(&self.natives.compute_pipelines, *pipeline)?;
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
                self.compute_layout = pipeline.layout;
            }
            Command::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
            } => {
                let (point, layout) = match bind_point {
                    BindPoint::Graphics => (vk::PipelineBindPoint::GRAPHICS, self.graphics_layout),
                    BindPoint::Compute => (vk::PipelineBindPoint::COMPUTE, self.compute_layout),
                };
                let native_sets = sets
                    .iter()
                    .map(|&set| native(&self.natives.sets, set).copied())
                    .collect::<Result<Vec<_>>>()?;
                device.cmd_bind_descriptor_sets(cmd, point, layout, *first_set, &native_sets, &[]);
            }
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                let (handles, offsets): (Vec<_>, Vec<_>) = buffers
                    .iter()
                    .map(|&(buffer, offset)| {
                        native(&self.natives.buffers, buffer).map(|b| (b.buffer, offset))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .unzip();
                device.cmd_bind_vertex_buffers(cmd, *first_binding, &handles, &offsets);
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let buffer = native(&self.natives.buffers, *buffer)?.buffer;
                device.cmd_bind_index_buffer(cmd, buffer, *offset, index_type_to_vk(*index_type));
            }
            Command::BindVertexArray(vertex_array) => {
                // Vertex arrays have no native object; bind what they describe.
                let desc = self.registry.vertex_array(*vertex_array)?;
                let buffers = desc
                    .vertex_buffers
                    .iter()
                    .map(|&buffer| native(&self.natives.buffers, buffer).map(|b| b.buffer))
                    .collect::<Result<Vec<_>>>()?;
                if !buffers.is_empty() {
                    let offsets = vec![0; buffers.len()];
                    device.cmd_bind_vertex_buffers(cmd, 0, &buffers, &offsets);
                }
                if let Some(index) = desc.index_buffer {
                    let buffer = native(&self.natives.buffers, index)?.buffer;
                    device.cmd_bind_index_buffer(cmd, buffer, 0, index_type_to_vk(desc.index_type));
                }
            }
            Command::SetViewport(viewport) => {
                device.cmd_set_viewport(cmd, 0, &[to_vk_viewport(viewport)]);
            }
            Command::SetScissor(scissor) => {
                device.cmd_set_scissor(cmd, 0, &[to_vk_scissor(scissor)]);
            }
            Command::SetDepthBias {
                constant,
                clamp,
                slope,
            } => device.cmd_set_depth_bias(cmd, *constant, *clamp, *slope),
            Command::DrawVertices {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance),
            Command::DrawIndices {
                first_index,
                index_count,
                vertex_offset,
                instance_count,
                first_instance,
            } => device.cmd_draw_indexed(
                cmd,
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            Command::Dispatch { x, y, z } => device.cmd_dispatch(cmd, *x, *y, *z),
            Command::ImageBarrier(barrier) => self.image_barrier(barrier)?,
            Command::BufferBarrier(barrier) => self.buffer_barrier(barrier)?,
            Command::BlitImage {
                src,
                src_mip,
                dst,
                dst_mip,
            } => self.blit(*src, *src_mip, *dst, *dst_mip)?,
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let src = native(&self.natives.buffers, *src)?.buffer;
                let dst = native(&self.natives.buffers, *dst)?.buffer;
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                device.cmd_copy_buffer(cmd, src, dst, &[region]);
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                self.transition(*dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
                let desc = self.registry.image(*dst)?;
                let buffer = native(&self.natives.buffers, *src)?.buffer;
                let image = native(&self.natives.images, *dst)?.image;
                let copies: Vec<_> = regions
                    .iter()
                    .map(|region| vk::BufferImageCopy {
                        buffer_offset: region.offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: aspect_mask(desc.format),
                            mip_level: region.mip,
                            base_array_layer: region.layer,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D::default(),
                        image_extent: vk::Extent3D {
                            width: region.width,
                            height: region.height,
                            depth: 1,
                        },
                    })
                    .collect();
                device.cmd_copy_buffer_to_image(
                    cmd,
                    buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &copies,
                );
            }
            Command::BeginDebugLabel { name, color } => {
                if let Some(debug_utils) = self.debug_utils {
                    let name = CString::new(name.as_str()).unwrap_or_default();
                    let label = vk::DebugUtilsLabelEXT::default()
                        .label_name(&name)
                        .color(color.unwrap_or([1.0; 4]));
                    debug_utils.cmd_begin_debug_utils_label(cmd, &label);
                }
            }
            Command::EndDebugLabel => {
                if let Some(debug_utils) = self.debug_utils {
                    debug_utils.cmd_end_debug_utils_label(cmd);
                }
            }
        }
        Ok(())
    }

    unsafe fn begin_render_pass(
        &mut self,
        render_pass: cinder_rhi::RenderPassHandle,
        framebuffer: cinder_rhi::FramebufferHandle,
        width: u32,
        height: u32,
        clear_colors: &[cinder_rhi::ClearColor],
        clear_depth: Option<cinder_rhi::ClearDepthStencil>,
    ) -> Result<()> {
        let fb_desc = self.registry.framebuffer(framebuffer)?;
        let attachments: Vec<ImageHandle> = fb_desc.attachments().collect();
        let pass = native(&self.natives.render_passes, render_pass)?;
        let initial_layouts = pass.initial_layouts.clone();
        let final_layouts = pass.final_layouts.clone();
        let vk_pass = pass.pass;
        let vk_framebuffer = *native(&self.natives.framebuffers, framebuffer)?;

        // Loaded attachments must already be in the layout the pass declares.
        for (&image, expected) in attachments.iter().zip(&initial_layouts) {
            if let Some(expected) = *expected {
                self.transition(image, expected)?;
            }
        }

        let color_count = fb_desc.color_attachments.len();
        let mut clear_values: Vec<vk::ClearValue> = (0..color_count)
            .map(|index| vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_colors.get(index).map_or([0.0; 4], |c| c.0),
                },
            })
            .collect();
        if fb_desc.depth_attachment.is_some() {
            let depth = clear_depth.unwrap_or(cinder_rhi::ClearDepthStencil::FAR);
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: depth.depth,
                    stencil: depth.stencil,
                },
            });
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk_pass)
            .framebuffer(vk_framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D { width, height },
            })
            .clear_values(&clear_values);
        self.device
            .cmd_begin_render_pass(self.cmd, &begin_info, vk::SubpassContents::INLINE);

        self.active_pass = Some(ActivePass {
            attachments,
            final_layouts,
        });
        Ok(())
    }

    /// Move `image` into `layout` if it is not there already.
    pub unsafe fn transition(&mut self, image: ImageHandle, layout: vk::ImageLayout) -> Result<()> {
        let desc = self.registry.image(image)?;
        let native_image = native_mut(&mut self.natives.images, image)?;
        if native_image.layout == layout {
            return Ok(());
        }
        trace!("'{}': {:?} -> {:?}", desc.debug_name, native_image.layout, layout);
        let (dst_stages, dst_access) = layout_destination(layout);
        let barrier = layout_barrier(
            native_image.image,
            full_range(desc),
            native_image.layout,
            layout,
            UNKNOWN_SRC.1,
            dst_access,
        );
        native_image.layout = layout;
        self.device.cmd_pipeline_barrier(
            self.cmd,
            UNKNOWN_SRC.0,
            dst_stages,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
        Ok(())
    }

    unsafe fn image_barrier(&mut self, barrier: &ImageBarrier) -> Result<()> {
        let desc = self.registry.image(barrier.image)?;
        let native_image = native_mut(&mut self.natives.images, barrier.image)?;
        let (src_stages, src_access) = barrier.src.map_or(UNKNOWN_SRC, |src| {
            let ImageState { stages, access, .. } = image_state(src, desc.format);
            (stages, access)
        });
        let dst = image_state(barrier.dst, desc.format);
        let native_barrier = layout_barrier(
            native_image.image,
            full_range(desc),
            native_image.layout,
            dst.layout,
            src_access,
            dst.access,
        );
        native_image.layout = dst.layout;
        self.device.cmd_pipeline_barrier(
            self.cmd,
            src_stages,
            dst.stages,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[native_barrier],
        );
        Ok(())
    }

    unsafe fn buffer_barrier(&mut self, barrier: &BufferBarrier) -> Result<()> {
        let buffer = native(&self.natives.buffers, barrier.buffer)?.buffer;
        let (src_stages, src_access) = barrier.src.map_or(UNKNOWN_SRC, buffer_state);
        let (dst_stages, dst_access) = buffer_state(barrier.dst);
        let native_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        self.device.cmd_pipeline_barrier(
            self.cmd,
            src_stages,
            dst_stages,
            vk::DependencyFlags::empty(),
            &[],
            &[native_barrier],
            &[],
        );
        Ok(())
    }

    unsafe fn blit(&mut self, src: ImageHandle, src_mip: u32, dst: ImageHandle, dst_mip: u32) -> Result<()> {
        // Layouts are tracked per image, so blits within one image go through GENERAL.
        let (src_layout, dst_layout) = if src == dst {
            self.transition(src, vk::ImageLayout::GENERAL)?;
            (vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL)
        } else {
            self.transition(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
            self.transition(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
        };
        let src_desc = self.registry.image(src)?;
        let dst_desc = self.registry.image(dst)?;
        let region = blit_region(src_desc, src_mip, dst_desc, dst_mip);
        let filter = if src_desc.format.is_depth() {
            vk::Filter::NEAREST
        } else {
            vk::Filter::LINEAR
        };
        let src_image = native(&self.natives.images, src)?.image;
        let dst_image = native(&self.natives.images, dst)?.image;
        self.device.cmd_blit_image(
            self.cmd,
            src_image,
            src_layout,
            dst_image,
            dst_layout,
            &[region],
            filter,
        );

        if src == dst {
            // The next level reads what this one wrote.
            let range = full_range(src_desc);
            let barrier = layout_barrier(
                src_image,
                range,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::GENERAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            );
            self.device.cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }
}

/// Whole-level blit region from `src_mip` of one image to `dst_mip` of another.
pub fn blit_region(src: &ImageDesc, src_mip: u32, dst: &ImageDesc, dst_mip: u32) -> vk::ImageBlit {
    let corner = |desc: &ImageDesc, mip: u32| vk::Offset3D {
        x: mip_extent(desc.width, mip) as i32,
        y: mip_extent(desc.height, mip) as i32,
        z: 1,
    };
    let layers = |desc: &ImageDesc, mip: u32| vk::ImageSubresourceLayers {
        aspect_mask: aspect_mask(desc.format),
        mip_level: mip,
        base_array_layer: 0,
        layer_count: desc.array_layers.min(src.array_layers).min(dst.array_layers),
    };
    vk::ImageBlit {
        src_subresource: layers(src, src_mip),
        src_offsets: [vk::Offset3D::default(), corner(src, src_mip)],
        dst_subresource: layers(dst, dst_mip),
        dst_offsets: [vk::Offset3D::default(), corner(dst, dst_mip)],
    }
}

fn to_vk_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn to_vk_scissor(scissor: &Scissor) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: scissor.x,
            y: scissor.y,
        },
        extent: vk::Extent2D {
            width: scissor.width,
            height: scissor.height,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::{Format, ImageCreateInfo, ImageUsage};

    fn image(width: u32, height: u32) -> ImageDesc {
        let info = ImageCreateInfo::new(
            "Bloom Chain",
            Format::R16G16B16A16Sfloat,
            width,
            height,
            ImageUsage::SAMPLED | ImageUsage::GENERATE_MIPMAPS,
        );
        ImageDesc::from_info(&info).unwrap()
    }

    #[test]
    fn blit_regions_cover_whole_levels() {
        let desc = image(256, 64);
        let region = blit_region(&desc, 1, &desc, 2);
        assert_eq!(region.src_offsets[1].x, 128);
        assert_eq!(region.src_offsets[1].y, 32);
        assert_eq!(region.dst_offsets[1].x, 64);
        assert_eq!(region.dst_offsets[1].y, 16);
        assert_eq!(region.dst_subresource.mip_level, 2);
    }

    #[test]
    fn small_levels_never_collapse_to_zero() {
        let desc = image(4, 1);
        let region = blit_region(&desc, 0, &desc, 5);
        assert_eq!(region.dst_offsets[1].x, 1);
        assert_eq!(region.dst_offsets[1].y, 1);
    }

    #[test]
    fn full_range_spans_every_level_and_layer() {
        let desc = image(256, 256);
        let range = full_range(&desc);
        assert_eq!(range.level_count, 9);
        assert_eq!(range.layer_count, 1);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn attachment_layouts_wait_on_attachment_stages() {
        let (stages, access) = layout_destination(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(stages, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }
}
