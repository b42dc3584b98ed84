//! A backend with no device behind it.
//!
//! [`HeadlessCore`] runs the whole resource contract against the registry,
//! keeps buffer contents in memory so uploads can be read back, and validates
//! every submitted command buffer. [`HeadlessWindowBinding`] simulates a
//! swapchain with per-frame fences and logs every synchronization step.

use glam::Mat4;
use hashbrown::{HashMap, HashSet};
use slotmap::SecondaryMap;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandBuffer};
use crate::core::{AdapterInfo, Core, GraphicsApi};
use crate::descriptor::{Binding, DescriptorSetDesc};
use crate::error::{Result, RhiError};
use crate::format::Format;
use crate::handles::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineHandle, ImageHandle, RenderPassHandle, SamplerHandle,
    VertexArrayHandle,
};
use crate::info::{
    AttachmentInfo, BufferCreateInfo, BufferDesc, ComputePipelineCreateInfo, ComputePipelineDesc,
    DescriptorSetCreateInfo, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDesc,
    FramebufferCreateInfo, FramebufferDesc, GraphicsPipelineCreateInfo, GraphicsPipelineDesc,
    ImageCreateInfo, ImageDesc, RenderPassCreateInfo, RenderPassDesc, SamplerCreateInfo,
    SamplerDesc, VertexArrayCreateInfo, VertexArrayDesc,
};
use crate::registry::ResourceRegistry;
use crate::validate::{validate_command_buffer, CommandStats};
use crate::window::{AcquireOutcome, FrameCounter, WindowGraphicsBinding};

/// A submitted command buffer, kept for inspection.
#[derive(Clone, Debug)]
pub struct Submission {
    pub debug_name: String,
    pub commands: Vec<Command>,
    pub stats: CommandStats,
}

/// Creation, deletion and upload counters.
#[derive(Clone, Debug, Default)]
pub struct HeadlessStats {
    pub created: HashMap<&'static str, usize>,
    pub deleted: HashMap<&'static str, usize>,
    /// Descriptor slots actually written by `change_bindings`.
    pub binding_writes: usize,
    pub image_uploads: usize,
    pub mip_generations: usize,
    /// Uploads that had to go through a staging buffer.
    pub staging_copies: usize,
}

impl HeadlessStats {
    pub fn created(&self, kind: &str) -> usize {
        self.created.get(kind).copied().unwrap_or(0)
    }

    pub fn deleted(&self, kind: &str) -> usize {
        self.deleted.get(kind).copied().unwrap_or(0)
    }
}

/// Core that validates everything and draws nothing.
pub struct HeadlessCore {
    registry: ResourceRegistry,
    adapter: AdapterInfo,
    flip_y: bool,
    contents: SecondaryMap<BufferHandle, Vec<u8>>,
    mapped: HashSet<BufferHandle>,
    stats: HeadlessStats,
    submissions: Vec<Submission>,
}

impl Default for HeadlessCore {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessCore {
    pub fn new() -> Self {
        info!("Creating headless core");
        Self {
            registry: ResourceRegistry::new(),
            adapter: AdapterInfo {
                vendor: "Cinder".into(),
                renderer: "Headless".into(),
                api_version: "1.0".into(),
            },
            flip_y: false,
            contents: SecondaryMap::new(),
            mapped: HashSet::new(),
            stats: HeadlessStats::default(),
            submissions: Vec::new(),
        }
    }

    /// Emulate a clip space with Y pointing down, like Vulkan.
    #[must_use]
    pub const fn with_flipped_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub const fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Result<&[u8]> {
        self.contents
            .get(buffer)
            .map(Vec::as_slice)
            .ok_or(RhiError::InvalidHandle("buffer"))
    }

    /// Read a `Pod` value back from the start of a buffer.
    pub fn read_pod<T: bytemuck::Pod>(&self, buffer: BufferHandle) -> Result<T> {
        let bytes = self.buffer_contents(buffer)?;
        let size = std::mem::size_of::<T>();
        if bytes.len() < size {
            return Err(RhiError::UploadOutOfRange(format!(
                "reading {size} bytes from a {} byte buffer",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    fn created(&mut self, kind: &'static str, name: &str) {
        debug!("Created {kind} '{name}'");
        *self.stats.created.entry(kind).or_default() += 1;
    }

    fn deleted(&mut self, kind: &'static str) {
        *self.stats.deleted.entry(kind).or_default() += 1;
    }

    /// Validate and retire a finished recording.
    pub fn submit(&mut self, cmd: &mut CommandBuffer) -> Result<CommandStats> {
        cmd.mark_pending()?;
        let stats = match validate_command_buffer(&self.registry, cmd) {
            Ok(stats) => stats,
            Err(err) => {
                cmd.mark_complete();
                return Err(err);
            }
        };
        self.submissions.push(Submission {
            debug_name: cmd.debug_name().to_owned(),
            commands: cmd.commands().to_vec(),
            stats,
        });
        cmd.mark_complete();
        Ok(stats)
    }

    fn check_image_data(desc: &ImageDesc, data: &[u8]) -> Result<()> {
        let needed = desc.upload_size();
        if (data.len() as u64) < needed {
            return Err(RhiError::UploadOutOfRange(format!(
                "'{}' needs {needed} bytes, got {}",
                desc.debug_name,
                data.len()
            )));
        }
        Ok(())
    }
}

impl Core for HeadlessCore {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Headless
    }

    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.registry
    }

    fn adjust_perspective(&self, projection: &mut Mat4) {
        if self.flip_y {
            projection.y_axis.y *= -1.0;
        }
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo<'_>) -> Result<BufferHandle> {
        let desc = BufferDesc::from_info(info)?;
        let mut bytes = vec![0; desc.size as usize];
        if let Some(data) = info.initial_data {
            bytes[..data.len()].copy_from_slice(data);
            if !desc.memory.is_host_coherent() {
                debug!("Staging '{} Staging' for '{}'", desc.debug_name, desc.debug_name);
                self.stats.staging_copies += 1;
            }
        }
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_buffer(desc);
        self.contents.insert(handle, bytes);
        self.created("buffer", &name);
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.remove_buffer(buffer)?;
        self.contents.remove(buffer);
        self.mapped.remove(&buffer);
        self.deleted("buffer");
        Ok(())
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let desc = self.registry.buffer(buffer)?;
        let end = offset + data.len() as u64;
        if end > desc.size {
            return Err(RhiError::UploadOutOfRange(format!(
                "'{}': bytes {offset}..{end} of {}",
                desc.debug_name, desc.size
            )));
        }
        if !desc.memory.is_host_coherent() {
            self.stats.staging_copies += 1;
        }
        let bytes = self
            .contents
            .get_mut(buffer)
            .ok_or(RhiError::InvalidHandle("buffer"))?;
        bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        let desc = self.registry.buffer(buffer)?;
        if !desc.memory.is_host_visible() {
            return Err(RhiError::Unsupported(format!(
                "'{}' is not host visible",
                desc.debug_name
            )));
        }
        self.mapped.insert(buffer);
        self.contents
            .get_mut(buffer)
            .map(Vec::as_mut_slice)
            .ok_or(RhiError::InvalidHandle("buffer"))
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.buffer(buffer)?;
        self.mapped.remove(&buffer);
        Ok(())
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> Result<()> {
        let desc = self.registry.buffer_mut(buffer)?;
        if size == 0 {
            return Err(RhiError::InvalidCreateInfo {
                name: desc.debug_name.clone(),
                reason: "size must be non-zero".into(),
            });
        }
        desc.size = size;
        self.contents.insert(buffer, vec![0; size as usize]);
        self.mapped.remove(&buffer);
        Ok(())
    }

    fn create_image(&mut self, info: &ImageCreateInfo<'_>) -> Result<ImageHandle> {
        let desc = ImageDesc::from_info(info)?;
        if let Some(data) = info.initial_data {
            Self::check_image_data(&desc, data)?;
            self.stats.image_uploads += 1;
            if desc.generate_mipmaps {
                self.stats.mip_generations += 1;
            }
        }
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_image(desc);
        self.created("image", &name);
        Ok(handle)
    }

    fn delete_image(&mut self, image: ImageHandle) -> Result<()> {
        self.registry.remove_image(image)?;
        self.deleted("image");
        Ok(())
    }

    fn upload_image(&mut self, image: ImageHandle, data: &[u8]) -> Result<()> {
        let desc = self.registry.image(image)?;
        Self::check_image_data(desc, data)?;
        let generate = desc.generate_mipmaps;
        self.stats.image_uploads += 1;
        if generate {
            self.stats.mip_generations += 1;
        }
        Ok(())
    }

    fn resize_image(&mut self, image: ImageHandle, width: u32, height: u32) -> Result<()> {
        let desc = self.registry.image_mut(image)?;
        *desc = desc.resized(width, height);
        Ok(())
    }

    fn generate_mipmaps(&mut self, image: ImageHandle) -> Result<()> {
        let desc = self.registry.image(image)?;
        if desc.format.is_compressed() {
            warn!("'{}' is block compressed, skipping mip generation", desc.debug_name);
            return Ok(());
        }
        self.stats.mip_generations += 1;
        Ok(())
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo<'_>) -> Result<SamplerHandle> {
        let desc = SamplerDesc::from_info(info)?;
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_sampler(desc);
        self.created("sampler", &name);
        Ok(handle)
    }

    fn delete_sampler(&mut self, sampler: SamplerHandle) -> Result<()> {
        self.registry.remove_sampler(sampler)?;
        self.deleted("sampler");
        Ok(())
    }

    fn create_render_pass(&mut self, info: &RenderPassCreateInfo<'_>) -> Result<RenderPassHandle> {
        let desc = RenderPassDesc::from_info(info)?;
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_render_pass(desc);
        self.created("render pass", &name);
        Ok(handle)
    }

    fn delete_render_pass(&mut self, render_pass: RenderPassHandle) -> Result<()> {
        self.registry.remove_render_pass(render_pass)?;
        self.deleted("render pass");
        Ok(())
    }

    fn create_framebuffer(&mut self, info: &FramebufferCreateInfo<'_>) -> Result<FramebufferHandle> {
        let desc = FramebufferDesc::from_info(info)?;
        self.registry.check_framebuffer(&desc)?;
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_framebuffer(desc);
        self.created("framebuffer", &name);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<()> {
        self.registry.remove_framebuffer(framebuffer)?;
        self.deleted("framebuffer");
        Ok(())
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> Result<()> {
        let mut desc = self.registry.framebuffer(framebuffer)?.clone();
        desc.width = width;
        desc.height = height;
        self.registry.check_framebuffer(&desc)?;
        *self.registry.framebuffer_mut(framebuffer)? = desc;
        Ok(())
    }

    fn create_descriptor_set_layout(
        &mut self,
        info: &DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<DescriptorSetLayoutHandle> {
        let desc = DescriptorSetLayoutDesc::from_info(info)?;
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_set_layout(desc);
        self.created("descriptor set layout", &name);
        Ok(handle)
    }

    fn delete_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) -> Result<()> {
        self.registry.remove_set_layout(layout)?;
        self.deleted("descriptor set layout");
        Ok(())
    }

    fn create_descriptor_set(&mut self, info: &DescriptorSetCreateInfo<'_>) -> Result<DescriptorSetHandle> {
        if info.debug_name.is_empty() {
            return Err(RhiError::MissingDebugName("descriptor set"));
        }
        let layout = self.registry.set_layout(info.layout)?;
        let mut desc = DescriptorSetDesc::new(info.debug_name, info.layout, layout);
        self.registry
            .check_binding_resources(info.debug_name, info.bindings, 0)?;
        desc.apply(info.bindings, 0)?;
        let handle = self.registry.insert_descriptor_set(desc);
        self.created("descriptor set", info.debug_name);
        Ok(handle)
    }

    fn delete_descriptor_set(&mut self, set: DescriptorSetHandle) -> Result<()> {
        self.registry.remove_descriptor_set(set)?;
        self.deleted("descriptor set");
        Ok(())
    }

    fn change_bindings(&mut self, set: DescriptorSetHandle, bindings: &[Binding], offset: usize) -> Result<()> {
        let written = self.registry.update_descriptor_set(set, bindings, offset)?;
        self.stats.binding_writes += written.len();
        Ok(())
    }

    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> Result<GraphicsPipelineHandle> {
        let desc = GraphicsPipelineDesc::from_info(info)?;
        self.registry.render_pass(desc.render_pass)?;
        for layout in &desc.set_layouts {
            self.registry.set_layout(*layout)?;
        }
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_graphics_pipeline(desc);
        self.created("graphics pipeline", &name);
        Ok(handle)
    }

    fn delete_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()> {
        self.registry.remove_graphics_pipeline(pipeline)?;
        self.deleted("graphics pipeline");
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineCreateInfo<'_>,
    ) -> Result<ComputePipelineHandle> {
        let desc = ComputePipelineDesc::from_info(info)?;
        for layout in &desc.set_layouts {
            self.registry.set_layout(*layout)?;
        }
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_compute_pipeline(desc);
        self.created("compute pipeline", &name);
        Ok(handle)
    }

    fn delete_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.registry.remove_compute_pipeline(pipeline)?;
        self.deleted("compute pipeline");
        Ok(())
    }

    fn create_vertex_array(&mut self, info: &VertexArrayCreateInfo<'_>) -> Result<VertexArrayHandle> {
        let desc = VertexArrayDesc::from_info(info)?;
        for buffer in desc.vertex_buffers.iter().chain(&desc.index_buffer) {
            self.registry.buffer(*buffer)?;
        }
        let name = desc.debug_name.clone();
        let handle = self.registry.insert_vertex_array(desc);
        self.created("vertex array", &name);
        Ok(handle)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()> {
        self.registry.remove_vertex_array(vertex_array)?;
        self.deleted("vertex array");
        Ok(())
    }

    fn execute_immediate(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.submit(cmd).map(|_| ())
    }

    fn wait_until_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One step of the simulated present loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    WaitedForFence { frame: usize },
    ResetFence { frame: usize },
    Acquired { frame: usize, image_index: u32 },
    Submitted { frame: usize, image_index: u32 },
    SubmittedUnsynchronized,
    Presented { frame: usize, image_index: u32 },
    Recreated { width: u32, height: u32 },
}

/// Swapchain stand-in for [`HeadlessCore`].
pub struct HeadlessWindowBinding {
    frames: FrameCounter,
    fences: Vec<bool>,
    images: Vec<ImageHandle>,
    framebuffers: Vec<FramebufferHandle>,
    render_pass: RenderPassHandle,
    format: Format,
    extent: (u32, u32),
    image_count: u32,
    image_index: u32,
    next_image: u32,
    acquired: bool,
    dirty: bool,
    events: Vec<FrameEvent>,
}

impl HeadlessWindowBinding {
    pub fn new(
        core: &mut HeadlessCore,
        width: u32,
        height: u32,
        max_frames_in_flight: usize,
        image_count: u32,
    ) -> Result<Self> {
        let format = Format::B8G8R8A8Unorm;
        let render_pass = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Swapchain Render Pass",
            color_attachments: &[AttachmentInfo::cleared(format)],
            depth_attachment: None,
            debug_color: [0.3, 0.6, 0.9, 1.0],
        })?;
        core.registry_mut().render_pass_mut(render_pass)?.presents = true;

        let frames = FrameCounter::new(max_frames_in_flight);
        let mut binding = Self {
            fences: vec![true; frames.max()],
            frames,
            images: Vec::new(),
            framebuffers: Vec::new(),
            render_pass,
            format,
            extent: (width.max(1), height.max(1)),
            image_count: image_count.max(1),
            image_index: 0,
            next_image: 0,
            acquired: false,
            dirty: false,
            events: Vec::new(),
        };
        binding.build_swapchain(core)?;
        Ok(binding)
    }

    pub fn events(&self) -> &[FrameEvent] {
        &self.events
    }

    /// Make the next acquire report a stale swapchain.
    pub fn mark_out_of_date(&mut self) {
        self.dirty = true;
    }

    /// Whether the fence of `frame` is signalled.
    pub fn fence_signaled(&self, frame: usize) -> bool {
        self.fences.get(frame).copied().unwrap_or(false)
    }

    fn build_swapchain(&mut self, core: &mut HeadlessCore) -> Result<()> {
        let (width, height) = self.extent;
        for index in 0..self.image_count {
            let name = format!("Swapchain Image {index}");
            let image = core.create_image(&ImageCreateInfo::render_target(&name, self.format, width, height))?;
            let fb_name = format!("Swapchain Framebuffer {index}");
            let framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
                debug_name: &fb_name,
                render_pass: self.render_pass,
                color_attachments: &[image],
                depth_attachment: None,
                width,
                height,
            })?;
            self.images.push(image);
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn release_swapchain(&mut self, core: &mut HeadlessCore) -> Result<()> {
        for framebuffer in self.framebuffers.drain(..) {
            core.delete_framebuffer(framebuffer)?;
        }
        for image in self.images.drain(..) {
            core.delete_image(image)?;
        }
        Ok(())
    }

    fn recreate(&mut self, core: &mut HeadlessCore) -> Result<()> {
        self.release_swapchain(core)?;
        self.build_swapchain(core)?;
        self.dirty = false;
        self.acquired = false;
        self.next_image = 0;
        self.events.push(FrameEvent::Recreated {
            width: self.extent.0,
            height: self.extent.1,
        });
        Ok(())
    }
}

impl WindowGraphicsBinding for HeadlessWindowBinding {
    type Core = HeadlessCore;

    fn acquire_next_image(&mut self, core: &mut HeadlessCore) -> Result<AcquireOutcome> {
        let frame = self.frames.current();
        // The simulated GPU finishes at submit, so a signalled fence never blocks.
        self.events.push(FrameEvent::WaitedForFence { frame });

        if self.dirty {
            warn!("Headless swapchain out of date");
            self.recreate(core)?;
            return Ok(AcquireOutcome::OutOfDate);
        }

        self.fences[frame] = false;
        self.events.push(FrameEvent::ResetFence { frame });

        self.image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.acquired = true;
        self.events.push(FrameEvent::Acquired {
            frame,
            image_index: self.image_index,
        });
        Ok(AcquireOutcome::Acquired {
            image_index: self.image_index,
        })
    }

    fn submit_command_buffer_for_current_frame(
        &mut self,
        core: &mut HeadlessCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        if !self.acquired {
            return Err(RhiError::InvalidCommandState {
                buffer: cmd.debug_name().to_owned(),
                reason: "submitted for a frame with no acquired image".into(),
            });
        }
        core.submit(cmd)?;
        let frame = self.frames.current();
        self.fences[frame] = true;
        self.events.push(FrameEvent::Submitted {
            frame,
            image_index: self.image_index,
        });
        Ok(())
    }

    fn submit_command_buffer_no_synchronization(
        &mut self,
        core: &mut HeadlessCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        core.submit(cmd)?;
        self.events.push(FrameEvent::SubmittedUnsynchronized);
        Ok(())
    }

    fn present_swapchain(&mut self, core: &mut HeadlessCore) -> Result<bool> {
        if self.dirty {
            warn!("Headless swapchain stale at present");
            self.recreate(core)?;
            return Ok(false);
        }
        let frame = self.frames.current();
        self.events.push(FrameEvent::Presented {
            frame,
            image_index: self.image_index,
        });
        self.acquired = false;
        self.frames.advance();
        Ok(true)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.extent = (width.max(1), height.max(1));
        self.dirty = true;
    }

    fn current_image_index(&self) -> u32 {
        self.image_index
    }

    fn current_frame_index(&self) -> usize {
        self.frames.current()
    }

    fn max_frames_in_flight(&self) -> usize {
        self.frames.max()
    }

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn current_framebuffer(&self) -> FramebufferHandle {
        self.framebuffers[self.image_index as usize]
    }

    fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    fn surface_format(&self) -> Format {
        self.format
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn destroy(&mut self, core: &mut HeadlessCore) -> Result<()> {
        self.release_swapchain(core)?;
        core.delete_render_pass(self.render_pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ClearColor;
    use crate::descriptor::{BindingKind, BoundResource, LayoutBinding};
    use crate::flags::{BufferUsage, ImageUsage, MemoryUsage, ShaderStages};
    use crate::info::ShaderStageInfo;
    use crate::state::{DepthState, PrimitiveTopology, RasterState};

    #[test]
    fn unnamed_creation_fails_for_every_kind() {
        let mut core = HeadlessCore::new();
        assert!(core.create_buffer(&BufferCreateInfo::uniform("", 16)).is_err());
        assert!(core
            .create_image(&ImageCreateInfo::render_target("", Format::R8Unorm, 4, 4))
            .is_err());
        assert!(core.create_sampler(&SamplerCreateInfo::new("")).is_err());
        assert!(core
            .create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo {
                debug_name: "",
                bindings: &[],
            })
            .is_err());
        assert_eq!(core.resources().live_count(), 0);
    }

    #[test]
    fn double_delete_fails() {
        let mut core = HeadlessCore::new();
        let buffer = core.create_buffer(&BufferCreateInfo::uniform("Engine UBO", 64)).unwrap();
        core.delete_buffer(buffer).unwrap();
        assert!(matches!(
            core.delete_buffer(buffer),
            Err(RhiError::InvalidHandle("buffer"))
        ));
    }

    #[test]
    fn texture_mip_scenarios() {
        let mut core = HeadlessCore::new();
        let pixels = vec![0u8; 256 * 256 * 4];
        let unset = core
            .create_image(
                &ImageCreateInfo::new("Unset", Format::R8G8B8A8Unorm, 256, 256, ImageUsage::SAMPLED)
                    .with_data(&pixels),
            )
            .unwrap();
        assert_eq!(core.resources().image(unset).unwrap().mip_levels, 1);

        let generated = core
            .create_image(
                &ImageCreateInfo::new(
                    "Generated",
                    Format::R8G8B8A8Unorm,
                    256,
                    256,
                    ImageUsage::SAMPLED | ImageUsage::GENERATE_MIPMAPS,
                )
                .with_data(&pixels),
            )
            .unwrap();
        assert_eq!(core.resources().image(generated).unwrap().mip_levels, 9);
        assert_eq!(core.stats().mip_generations, 1);
    }

    #[test]
    fn short_image_data_is_rejected() {
        let mut core = HeadlessCore::new();
        let pixels = vec![0u8; 10];
        let result = core.create_image(
            &ImageCreateInfo::new("Short", Format::R8G8B8A8Unorm, 4, 4, ImageUsage::SAMPLED)
                .with_data(&pixels),
        );
        assert!(matches!(result, Err(RhiError::UploadOutOfRange(_))));
    }

    #[test]
    fn non_coherent_uploads_are_staged() {
        let mut core = HeadlessCore::new();
        let readback = core
            .create_buffer(&BufferCreateInfo::new(
                "Readback",
                16,
                BufferUsage::STORAGE,
                MemoryUsage::GpuToCpu,
            ))
            .unwrap();
        core.upload_buffer(readback, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(core.stats().staging_copies, 1);
        assert_eq!(&core.buffer_contents(readback).unwrap()[4..8], &[1, 2, 3, 4]);

        let ubo = core.create_buffer(&BufferCreateInfo::uniform("UBO", 16)).unwrap();
        core.upload_pod(ubo, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(core.stats().staging_copies, 1);
        assert_eq!(core.read_pod::<[f32; 4]>(ubo).unwrap(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn change_bindings_skips_empty_items() {
        let mut core = HeadlessCore::new();
        let layout = core
            .create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo {
                debug_name: "Ambient Occlusion Layout",
                bindings: &[
                    LayoutBinding::new(0, BindingKind::SampledImage, ShaderStages::FRAGMENT),
                    LayoutBinding::new(1, BindingKind::SampledImage, ShaderStages::FRAGMENT),
                    LayoutBinding::new(2, BindingKind::SampledImage, ShaderStages::FRAGMENT),
                ],
            })
            .unwrap();
        let ao = core
            .create_image(&ImageCreateInfo::render_target("AO", Format::R8Unorm, 8, 8))
            .unwrap();
        let env = core
            .create_image(&ImageCreateInfo::new("Env", Format::R16G16B16A16Sfloat, 8, 8, ImageUsage::SAMPLED))
            .unwrap();
        let set = core
            .create_descriptor_set(&DescriptorSetCreateInfo {
                debug_name: "Ambient Occlusion",
                layout,
                bindings: &[
                    Binding::sampled_image(ao),
                    Binding::sampled_image(ao),
                    Binding::sampled_image(ao),
                ],
            })
            .unwrap();

        core.change_bindings(
            set,
            &[
                Binding::empty(BindingKind::SampledImage),
                Binding::empty(BindingKind::SampledImage),
                Binding::sampled_image(env),
            ],
            0,
        )
        .unwrap();
        let desc = core.resources().descriptor_set(set).unwrap();
        assert_eq!(desc.slots[0].item, Some(BoundResource::Image(ao)));
        assert_eq!(desc.slots[2].item, Some(BoundResource::Image(env)));
        assert_eq!(core.stats().binding_writes, 1);

        assert!(matches!(
            core.change_bindings(set, &[Binding::empty(BindingKind::StorageImage)], 0),
            Err(RhiError::BindingMismatch { .. })
        ));
    }

    #[test]
    fn draw_without_descriptor_sets_fails_at_submit() {
        let mut core = HeadlessCore::new();
        let mut window = HeadlessWindowBinding::new(&mut core, 32, 32, 2, 2).unwrap();
        let layout = core
            .create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo {
                debug_name: "Engine Layout",
                bindings: &[LayoutBinding::new(
                    0,
                    BindingKind::UniformBuffer,
                    ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                )],
            })
            .unwrap();
        let code = [0u8; 4];
        let pipeline = core
            .create_graphics_pipeline(&GraphicsPipelineCreateInfo {
                debug_name: "Fullscreen",
                stages: &[ShaderStageInfo::new(ShaderStages::VERTEX, &code)],
                vertex_bindings: &[],
                set_layouts: &[layout],
                render_pass: window.render_pass(),
                topology: PrimitiveTopology::TriangleList,
                raster: RasterState::default(),
                depth: DepthState::DISABLED,
                blend: &[],
            })
            .unwrap();

        window.acquire_next_image(&mut core).unwrap();
        let mut cmd = CommandBuffer::new("Frame 0").unwrap();
        cmd.begin().unwrap();
        cmd.bind_render_pass(
            core.resources(),
            window.render_pass(),
            window.current_framebuffer(),
            32,
            32,
            &[ClearColor::BLACK],
            None,
        )
        .unwrap();
        cmd.bind_graphics_pipeline(pipeline).unwrap();
        cmd.draw_vertices(3, 1, 0, 0).unwrap();
        cmd.unbind_render_pass().unwrap();
        cmd.end().unwrap();

        let err = window
            .submit_command_buffer_for_current_frame(&mut core, &mut cmd)
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidCommandState { .. }));
    }

    #[test]
    fn frames_rotate_and_wait_before_reuse() {
        let mut core = HeadlessCore::new();
        let mut window = HeadlessWindowBinding::new(&mut core, 64, 64, 2, 3).unwrap();
        let mut ring = [
            CommandBuffer::new("Frame 0").unwrap(),
            CommandBuffer::new("Frame 1").unwrap(),
        ];

        let mut frames = Vec::new();
        for _ in 0..3 {
            let outcome = window.acquire_next_image(&mut core).unwrap();
            assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));
            let frame = window.current_frame_index();
            frames.push(frame);

            let cmd = &mut ring[frame];
            cmd.begin().unwrap();
            cmd.end().unwrap();
            window
                .submit_command_buffer_for_current_frame(&mut core, cmd)
                .unwrap();
            assert!(window.present_swapchain(&mut core).unwrap());
        }
        assert_eq!(frames, vec![0, 1, 0]);

        let events = window.events();
        let submit_frame_0: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, FrameEvent::Submitted { frame: 0, .. }))
            .map(|(i, _)| i)
            .collect();
        let waits_frame_0: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, FrameEvent::WaitedForFence { frame: 0 }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(submit_frame_0.len(), 2);
        assert!(waits_frame_0[0] < submit_frame_0[0]);
        assert!(submit_frame_0[0] < waits_frame_0[1]);
        assert!(waits_frame_0[1] < submit_frame_0[1]);
    }

    #[test]
    fn stale_swapchain_is_rebuilt_without_advancing() {
        let mut core = HeadlessCore::new();
        let mut window = HeadlessWindowBinding::new(&mut core, 64, 64, 3, 3).unwrap();
        let live_before = core.resources().live_count();

        window.resize(128, 96);
        assert_eq!(
            window.acquire_next_image(&mut core).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(window.current_frame_index(), 0);
        assert_eq!(window.extent(), (128, 96));
        assert_eq!(core.resources().live_count(), live_before);

        window.acquire_next_image(&mut core).unwrap();
        window.mark_out_of_date();
        assert!(!window.present_swapchain(&mut core).unwrap());
        assert_eq!(window.current_frame_index(), 0);
    }
}
