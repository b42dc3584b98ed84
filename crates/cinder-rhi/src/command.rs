//! Backend-neutral command recording.
//!
//! A [`CommandBuffer`] records a linear list of [`Command`]s and enforces the
//! recording state machine. Backends translate the list into native calls
//! on submit. Illegal calls fail without recording anything.

use crate::error::{Result, RhiError};
use crate::handles::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, FramebufferHandle,
    GraphicsPipelineHandle, ImageHandle, RenderPassHandle, VertexArrayHandle,
};
use crate::hazard::{BufferAccess, BufferBarrier, HazardTracker, ImageAccess, ImageBarrier};
use crate::flags::ShaderStages;
use crate::format::SubresourceRegion;
use crate::info::RenderPassDesc;
use crate::registry::ResourceRegistry;
use crate::state::IndexType;

/// RGBA clear color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
    pub const BLACK: Self = Self([0.0, 0.0, 0.0, 1.0]);
    pub const TRANSPARENT: Self = Self([0.0; 4]);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearDepthStencil {
    pub depth: f32,
    pub stencil: u32,
}

impl ClearDepthStencil {
    pub const FAR: Self = Self {
        depth: 1.0,
        stencil: 0,
    };
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// `[0, width] x [0, height]` with the full depth range.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Scissor {
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// One recorded operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
        clear_colors: Vec<ClearColor>,
        clear_depth: Option<ClearDepthStencil>,
    },
    EndRenderPass,
    BindGraphicsPipeline(GraphicsPipelineHandle),
    BindComputePipeline(ComputePipelineHandle),
    BindDescriptorSets {
        bind_point: BindPoint,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(BufferHandle, u64)>,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    },
    BindVertexArray(VertexArrayHandle),
    SetViewport(Viewport),
    SetScissor(Scissor),
    SetDepthBias {
        constant: f32,
        clamp: f32,
        slope: f32,
    },
    DrawVertices {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndices {
        first_index: u32,
        index_count: u32,
        vertex_offset: i32,
        instance_count: u32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    ImageBarrier(ImageBarrier),
    BufferBarrier(BufferBarrier),
    BlitImage {
        src: ImageHandle,
        src_mip: u32,
        dst: ImageHandle,
        dst_mip: u32,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: BufferHandle,
        dst: ImageHandle,
        regions: Vec<SubresourceRegion>,
    },
    BeginDebugLabel {
        name: String,
        color: Option<[f32; 4]>,
    },
    EndDebugLabel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferLevel {
    Primary,
    /// Replayed inside the given render pass of a primary buffer.
    Secondary {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ActivePass {
    render_pass: RenderPassHandle,
    framebuffer: FramebufferHandle,
}

/// Records GPU work for later submission.
#[derive(Debug)]
pub struct CommandBuffer {
    debug_name: String,
    level: CommandBufferLevel,
    state: CommandBufferState,
    active_pass: Option<ActivePass>,
    label_depth: u32,
    commands: Vec<Command>,
    hazards: HazardTracker,
}

impl CommandBuffer {
    pub fn new(debug_name: &str) -> Result<Self> {
        Self::with_level(debug_name, CommandBufferLevel::Primary)
    }

    /// Secondary buffer that inherits `render_pass` and `framebuffer`.
    pub fn new_secondary(
        debug_name: &str,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
    ) -> Result<Self> {
        Self::with_level(
            debug_name,
            CommandBufferLevel::Secondary {
                render_pass,
                framebuffer,
            },
        )
    }

    fn with_level(debug_name: &str, level: CommandBufferLevel) -> Result<Self> {
        if debug_name.is_empty() {
            return Err(RhiError::MissingDebugName("command buffer"));
        }
        Ok(Self {
            debug_name: debug_name.to_owned(),
            level,
            state: CommandBufferState::Initial,
            active_pass: None,
            label_depth: 0,
            commands: Vec::new(),
            hazards: HazardTracker::new(),
        })
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub const fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub const fn state(&self) -> CommandBufferState {
        self.state
    }

    pub const fn is_in_render_pass(&self) -> bool {
        self.active_pass.is_some()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub const fn hazards(&self) -> &HazardTracker {
        &self.hazards
    }

    fn fail(&self, reason: impl Into<String>) -> RhiError {
        let reason = reason.into();
        tracing::error!("{}: {reason}", self.debug_name);
        RhiError::InvalidCommandState {
            buffer: self.debug_name.clone(),
            reason,
        }
    }

    fn require_recording(&self, what: &str) -> Result<()> {
        if self.state == CommandBufferState::Recording {
            Ok(())
        } else {
            Err(self.fail(format!("{what} while {:?}", self.state)))
        }
    }

    fn require_inside_pass(&self, what: &str) -> Result<()> {
        self.require_recording(what)?;
        if self.active_pass.is_none() {
            return Err(self.fail(format!("{what} outside a render pass")));
        }
        Ok(())
    }

    fn require_outside_pass(&self, what: &str) -> Result<()> {
        self.require_recording(what)?;
        if self.active_pass.is_some() {
            return Err(self.fail(format!("{what} inside a render pass")));
        }
        Ok(())
    }

    /// Start recording, discarding anything recorded before.
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CommandBufferState::Initial | CommandBufferState::Executable => {}
            state => return Err(self.fail(format!("begin while {state:?}"))),
        }
        self.commands.clear();
        self.hazards.reset();
        self.label_depth = 0;
        self.active_pass = match self.level {
            CommandBufferLevel::Primary => None,
            CommandBufferLevel::Secondary {
                render_pass,
                framebuffer,
            } => Some(ActivePass {
                render_pass,
                framebuffer,
            }),
        };
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<()> {
        self.require_recording("end")?;
        if matches!(self.level, CommandBufferLevel::Primary) && self.active_pass.is_some() {
            return Err(self.fail("end inside a render pass"));
        }
        if self.label_depth != 0 {
            return Err(self.fail(format!("end with {} open debug labels", self.label_depth)));
        }
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Called by a backend when the buffer is handed to the GPU.
    pub fn mark_pending(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Executable {
            return Err(self.fail(format!("submit while {:?}", self.state)));
        }
        if !matches!(self.level, CommandBufferLevel::Primary) {
            return Err(self.fail("secondary buffers cannot be submitted directly"));
        }
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// Called by a backend once the GPU has finished with the buffer.
    pub fn mark_complete(&mut self) {
        if self.state == CommandBufferState::Pending {
            self.state = CommandBufferState::Executable;
        }
    }

    /// Enter a render pass.
    ///
    /// The framebuffer is checked against the pass, attachment accesses are
    /// declared to the hazard tracker, and one clear value is required per
    /// attachment that clears: `clear_colors.len()` colors plus one depth.
    pub fn bind_render_pass(
        &mut self,
        resources: &ResourceRegistry,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
        clear_colors: &[ClearColor],
        clear_depth: Option<ClearDepthStencil>,
    ) -> Result<()> {
        self.require_outside_pass("bind_render_pass")?;
        if !matches!(self.level, CommandBufferLevel::Primary) {
            return Err(self.fail("secondary buffers cannot begin render passes"));
        }

        let pass = resources.render_pass(render_pass)?;
        let fb = resources.framebuffer(framebuffer)?;
        let compatible = resources.render_pass(fb.render_pass)?;
        if !formats_match(compatible, pass) {
            return Err(RhiError::IncompatibleFramebuffer {
                framebuffer: fb.debug_name.clone(),
                render_pass: pass.debug_name.clone(),
                reason: format!("framebuffer was created for '{}'", compatible.debug_name),
            });
        }
        resources.check_framebuffer(fb)?;

        let clears_needed = pass.color_attachments.iter().any(|a| a.should_clear)
            || pass.depth_attachment.is_some_and(|d| d.should_clear);
        if clears_needed && clear_colors.len() != pass.color_attachments.len() {
            return Err(self.fail(format!(
                "'{}' has {} color attachments, got {} clear colors",
                pass.debug_name,
                pass.color_attachments.len(),
                clear_colors.len()
            )));
        }
        if pass.depth_attachment.is_some_and(|d| d.should_clear) && clear_depth.is_none() {
            return Err(self.fail(format!("'{}' clears depth but no value given", pass.debug_name)));
        }
        if width > fb.width || height > fb.height {
            return Err(self.fail(format!(
                "render area {width}x{height} exceeds '{}' ({}x{})",
                fb.debug_name, fb.width, fb.height
            )));
        }

        for &image in &fb.color_attachments {
            self.declare_image(image, ImageAccess::ColorAttachment);
        }
        if let (Some(image), Some(depth)) = (fb.depth_attachment, pass.depth_attachment) {
            let access = if depth.read_only {
                ImageAccess::DepthRead
            } else {
                ImageAccess::DepthAttachment
            };
            self.declare_image(image, access);
        }

        self.commands.push(Command::BeginDebugLabel {
            name: pass.debug_name.clone(),
            color: Some(pass.debug_color),
        });
        self.commands.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            width,
            height,
            clear_colors: clear_colors.to_vec(),
            clear_depth: pass.depth_attachment.and(clear_depth),
        });
        self.active_pass = Some(ActivePass {
            render_pass,
            framebuffer,
        });
        Ok(())
    }

    /// Leave the current render pass.
    pub fn unbind_render_pass(&mut self) -> Result<()> {
        self.require_inside_pass("unbind_render_pass")?;
        if !matches!(self.level, CommandBufferLevel::Primary) {
            return Err(self.fail("secondary buffers cannot end their inherited render pass"));
        }
        self.commands.push(Command::EndRenderPass);
        self.commands.push(Command::EndDebugLabel);
        self.active_pass = None;
        Ok(())
    }

    pub fn bind_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()> {
        self.require_recording("bind_graphics_pipeline")?;
        self.commands.push(Command::BindGraphicsPipeline(pipeline));
        Ok(())
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.require_outside_pass("bind_compute_pipeline")?;
        self.commands.push(Command::BindComputePipeline(pipeline));
        Ok(())
    }

    pub fn bind_graphics_descriptor_sets(
        &mut self,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) -> Result<()> {
        self.require_recording("bind_graphics_descriptor_sets")?;
        self.commands.push(Command::BindDescriptorSets {
            bind_point: BindPoint::Graphics,
            first_set,
            sets: sets.to_vec(),
        });
        Ok(())
    }

    pub fn bind_compute_descriptor_sets(
        &mut self,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) -> Result<()> {
        self.require_outside_pass("bind_compute_descriptor_sets")?;
        self.commands.push(Command::BindDescriptorSets {
            bind_point: BindPoint::Compute,
            first_set,
            sets: sets.to_vec(),
        });
        Ok(())
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(BufferHandle, u64)]) -> Result<()> {
        self.require_recording("bind_vertex_buffers")?;
        self.commands.push(Command::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, index_type: IndexType) -> Result<()> {
        self.require_recording("bind_index_buffer")?;
        self.commands.push(Command::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
        Ok(())
    }

    pub fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()> {
        self.require_recording("bind_vertex_array")?;
        self.commands.push(Command::BindVertexArray(vertex_array));
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.require_recording("set_viewport")?;
        self.commands.push(Command::SetViewport(viewport));
        Ok(())
    }

    pub fn set_scissor(&mut self, scissor: Scissor) -> Result<()> {
        self.require_recording("set_scissor")?;
        self.commands.push(Command::SetScissor(scissor));
        Ok(())
    }

    pub fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) -> Result<()> {
        self.require_recording("set_depth_bias")?;
        self.commands.push(Command::SetDepthBias {
            constant,
            clamp,
            slope,
        });
        Ok(())
    }

    pub fn draw_vertices(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_inside_pass("draw_vertices")?;
        self.commands.push(Command::DrawVertices {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    pub fn draw_indices(
        &mut self,
        first_index: u32,
        index_count: u32,
        vertex_offset: i32,
        instance_count: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_inside_pass("draw_indices")?;
        self.commands.push(Command::DrawIndices {
            first_index,
            index_count,
            vertex_offset,
            instance_count,
            first_instance,
        });
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_outside_pass("dispatch")?;
        self.commands.push(Command::Dispatch { x, y, z });
        Ok(())
    }

    fn declare_image(&mut self, image: ImageHandle, access: ImageAccess) {
        if let Some(barrier) = self.hazards.use_image(image, access) {
            self.commands.push(Command::ImageBarrier(barrier));
        }
    }

    /// Declare how the next pass touches `image`; records a barrier if needed.
    pub fn use_image(&mut self, image: ImageHandle, access: ImageAccess) -> Result<()> {
        self.require_outside_pass("use_image")?;
        self.declare_image(image, access);
        Ok(())
    }

    /// Declare how the next pass touches `buffer`; records a barrier if needed.
    pub fn use_buffer(&mut self, buffer: BufferHandle, access: BufferAccess) -> Result<()> {
        self.require_outside_pass("use_buffer")?;
        if let Some(barrier) = self.hazards.use_buffer(buffer, access) {
            self.commands.push(Command::BufferBarrier(barrier));
        }
        Ok(())
    }

    /// Always records a compute-visibility barrier for `image`.
    ///
    /// `is_write` prepares the image for a storage write, otherwise for
    /// sampled reads in compute and fragment shaders.
    pub fn wait_for_compute_memory_barrier(&mut self, image: ImageHandle, is_write: bool) -> Result<()> {
        self.require_outside_pass("wait_for_compute_memory_barrier")?;
        let access = if is_write {
            ImageAccess::StorageWrite(ShaderStages::COMPUTE)
        } else {
            ImageAccess::SampledRead(ShaderStages::COMPUTE | ShaderStages::FRAGMENT)
        };
        let barrier = self.hazards.force_image(image, access);
        self.commands.push(Command::ImageBarrier(barrier));
        Ok(())
    }

    /// Record arbitrary barriers.
    pub fn pipeline_barrier(&mut self, images: &[ImageBarrier], buffers: &[BufferBarrier]) -> Result<()> {
        self.require_outside_pass("pipeline_barrier")?;
        for barrier in images {
            self.hazards.note_image_barrier(barrier);
            self.commands.push(Command::ImageBarrier(*barrier));
        }
        for barrier in buffers {
            self.hazards.note_buffer_barrier(barrier);
            self.commands.push(Command::BufferBarrier(*barrier));
        }
        Ok(())
    }

    /// Turn automatic barriers from [`use_image`](Self::use_image) on or off.
    pub fn set_automatic_barriers(&mut self, enabled: bool) {
        self.hazards.set_automatic(enabled);
    }

    /// Blit `src_mip` of `src` into `dst_mip` of `dst` with linear filtering.
    pub fn blit_image(&mut self, src: ImageHandle, src_mip: u32, dst: ImageHandle, dst_mip: u32) -> Result<()> {
        self.require_outside_pass("blit_image")?;
        self.commands.push(Command::BlitImage {
            src,
            src_mip,
            dst,
            dst_mip,
        });
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.require_outside_pass("copy_buffer")?;
        self.declare_buffer(src, BufferAccess::TransferSrc);
        self.declare_buffer(dst, BufferAccess::TransferDst);
        self.commands.push(Command::CopyBuffer {
            src,
            dst,
            src_offset,
            dst_offset,
            size,
        });
        Ok(())
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: BufferHandle,
        dst: ImageHandle,
        regions: &[SubresourceRegion],
    ) -> Result<()> {
        self.require_outside_pass("copy_buffer_to_image")?;
        self.declare_buffer(src, BufferAccess::TransferSrc);
        self.declare_image(dst, ImageAccess::TransferDst);
        self.commands.push(Command::CopyBufferToImage {
            src,
            dst,
            regions: regions.to_vec(),
        });
        Ok(())
    }

    fn declare_buffer(&mut self, buffer: BufferHandle, access: BufferAccess) {
        if let Some(barrier) = self.hazards.use_buffer(buffer, access) {
            self.commands.push(Command::BufferBarrier(barrier));
        }
    }

    pub fn begin_debug_label(&mut self, name: &str, color: Option<[f32; 4]>) -> Result<()> {
        self.require_recording("begin_debug_label")?;
        self.label_depth += 1;
        self.commands.push(Command::BeginDebugLabel {
            name: name.to_owned(),
            color,
        });
        Ok(())
    }

    pub fn end_debug_label(&mut self) -> Result<()> {
        self.require_recording("end_debug_label")?;
        if self.label_depth == 0 {
            return Err(self.fail("end_debug_label without an open label"));
        }
        self.label_depth -= 1;
        self.commands.push(Command::EndDebugLabel);
        Ok(())
    }

    /// Replay secondary buffers inline at this point.
    pub fn execute_secondaries(&mut self, secondaries: &[&Self]) -> Result<()> {
        self.require_inside_pass("execute_secondaries")?;
        let Some(active) = self.active_pass else {
            return Err(self.fail("execute_secondaries outside a render pass"));
        };
        for secondary in secondaries {
            let CommandBufferLevel::Secondary {
                render_pass,
                framebuffer,
            } = secondary.level
            else {
                return Err(self.fail(format!("'{}' is not a secondary buffer", secondary.debug_name)));
            };
            if secondary.state != CommandBufferState::Executable {
                return Err(self.fail(format!(
                    "'{}' is {:?}, not executable",
                    secondary.debug_name, secondary.state
                )));
            }
            if render_pass != active.render_pass || framebuffer != active.framebuffer {
                return Err(self.fail(format!(
                    "'{}' inherits a different render pass",
                    secondary.debug_name
                )));
            }
        }
        for secondary in secondaries {
            self.commands.extend(secondary.commands.iter().cloned());
        }
        Ok(())
    }

    /// Number of recorded commands matching `pred`.
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

/// Render passes are compatible when their attachment formats agree.
pub fn formats_match(a: &RenderPassDesc, b: &RenderPassDesc) -> bool {
    a.color_attachments.len() == b.color_attachments.len()
        && a
            .color_attachments
            .iter()
            .zip(&b.color_attachments)
            .all(|(x, y)| x.format == y.format)
        && a.depth_attachment.map(|d| d.format) == b.depth_attachment.map(|d| d.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::info::{
        AttachmentInfo, FramebufferCreateInfo, FramebufferDesc, ImageCreateInfo, ImageDesc,
        RenderPassCreateInfo,
    };

    struct Target {
        registry: ResourceRegistry,
        pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        images: Vec<ImageHandle>,
    }

    fn three_color_target() -> Target {
        let mut registry = ResourceRegistry::new();
        let colors = [AttachmentInfo::cleared(Format::R8G8B8A8Unorm); 3];
        let pass = registry.insert_render_pass(
            RenderPassDesc::from_info(&RenderPassCreateInfo {
                debug_name: "G-Buffer Render Pass",
                color_attachments: &colors,
                depth_attachment: None,
                debug_color: [1.0; 4],
            })
            .unwrap(),
        );
        let images: Vec<_> = ["Albedo", "Normal", "Specular"]
            .into_iter()
            .map(|name| {
                let info = ImageCreateInfo::render_target(name, Format::R8G8B8A8Unorm, 16, 16);
                registry.insert_image(ImageDesc::from_info(&info).unwrap())
            })
            .collect();
        let framebuffer = registry.insert_framebuffer(
            FramebufferDesc::from_info(&FramebufferCreateInfo {
                debug_name: "G-Buffer Framebuffer",
                render_pass: pass,
                color_attachments: &images,
                depth_attachment: None,
                width: 16,
                height: 16,
            })
            .unwrap(),
        );
        Target {
            registry,
            pass,
            framebuffer,
            images,
        }
    }

    #[test]
    fn three_color_pass_has_three_clears() {
        let target = three_color_target();
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        cmd.bind_render_pass(
            &target.registry,
            target.pass,
            target.framebuffer,
            16,
            16,
            &[ClearColor::BLACK; 3],
            Some(ClearDepthStencil::FAR),
        )
        .unwrap();
        cmd.unbind_render_pass().unwrap();
        cmd.end().unwrap();

        let begin = cmd
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::BeginRenderPass {
                    clear_colors,
                    clear_depth,
                    ..
                } => Some(clear_colors.len() + usize::from(clear_depth.is_some())),
                _ => None,
            })
            .unwrap();
        assert_eq!(begin, 3);
        assert_eq!(
            cmd.count(|c| matches!(c, Command::ImageBarrier(_))),
            target.images.len()
        );
    }

    #[test]
    fn draw_before_begin_fails() {
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        let err = cmd.draw_indices(0, 6, 0, 1, 0).unwrap_err();
        assert!(matches!(err, RhiError::InvalidCommandState { .. }));
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn draw_outside_pass_fails() {
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        assert!(cmd.draw_vertices(3, 1, 0, 0).is_err());
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn nested_render_pass_fails() {
        let target = three_color_target();
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        let bind = |cmd: &mut CommandBuffer| {
            cmd.bind_render_pass(
                &target.registry,
                target.pass,
                target.framebuffer,
                16,
                16,
                &[ClearColor::BLACK; 3],
                None,
            )
        };
        bind(&mut cmd).unwrap();
        assert!(bind(&mut cmd).is_err());
        assert!(cmd.dispatch(1, 1, 1).is_err());
        assert!(cmd.end().is_err());
    }

    #[test]
    fn secondary_only_replays_inside_its_pass() {
        let target = three_color_target();
        let mut secondary =
            CommandBuffer::new_secondary("Opaque", target.pass, target.framebuffer).unwrap();
        secondary.begin().unwrap();
        secondary.draw_vertices(3, 1, 0, 0).unwrap();
        secondary.end().unwrap();

        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        assert!(cmd.execute_secondaries(&[&secondary]).is_err());

        cmd.bind_render_pass(
            &target.registry,
            target.pass,
            target.framebuffer,
            16,
            16,
            &[ClearColor::BLACK; 3],
            None,
        )
        .unwrap();
        cmd.execute_secondaries(&[&secondary]).unwrap();
        assert_eq!(cmd.count(|c| matches!(c, Command::DrawVertices { .. })), 1);
        assert_eq!(secondary.state(), CommandBufferState::Executable);
    }

    #[test]
    fn rerecording_requires_completion() {
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd.mark_pending().unwrap();
        assert!(cmd.begin().is_err());
        cmd.mark_complete();
        cmd.begin().unwrap();
    }

    #[test]
    fn compute_barrier_is_always_recorded() {
        let target = three_color_target();
        let image = target.images[0];
        let mut cmd = CommandBuffer::new("Frame").unwrap();
        cmd.begin().unwrap();
        cmd.wait_for_compute_memory_barrier(image, true).unwrap();
        cmd.wait_for_compute_memory_barrier(image, true).unwrap();
        cmd.use_image(image, ImageAccess::SampledRead(ShaderStages::COMPUTE | ShaderStages::FRAGMENT))
            .unwrap();
        cmd.use_image(image, ImageAccess::SampledRead(ShaderStages::COMPUTE | ShaderStages::FRAGMENT))
            .unwrap();
        assert_eq!(cmd.count(|c| matches!(c, Command::ImageBarrier(_))), 3);
    }
}
