//! The Vulkan implementation of [`Core`].

use ash::vk;
use cinder_rhi::format::subresource_regions;
use cinder_rhi::{
    AdapterInfo, Binding, BindingKind, BoundResource, BufferCreateInfo, BufferDesc, BufferHandle,
    BufferUsage, Command, CommandBuffer, ComputePipelineCreateInfo, ComputePipelineDesc,
    ComputePipelineHandle, Core, DescriptorSetCreateInfo, DescriptorSetDesc, DescriptorSetHandle,
    DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle,
    FramebufferCreateInfo, FramebufferDesc, FramebufferHandle, GraphicsApi,
    GraphicsPipelineCreateInfo, GraphicsPipelineDesc, GraphicsPipelineHandle, ImageAccess,
    ImageBarrier, ImageCreateInfo, ImageDesc, ImageHandle, ImageUsage, MemoryUsage,
    RenderPassCreateInfo, RenderPassDesc, RenderPassHandle, ResourceRegistry, Result, RhiError,
    SamplerCreateInfo, SamplerDesc, SamplerHandle, ShaderStages, VertexArrayCreateInfo,
    VertexArrayDesc, VertexArrayHandle, DEFAULT_MAX_FRAMES_IN_FLIGHT,
};
use glam::Mat4;
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info, warn};

use crate::command::execute_single_time_commands;
use crate::context::{ContextOptions, VulkanContext};
use crate::deletion::{DeferredDeletionQueue, Retired};
use crate::descriptors::{allocate_set, create_set_layout, write_slots, SlotWrite};
use crate::error::VulkanError;
use crate::memory::{NativeBuffer, NativeImage};
use crate::natives::{native, native_mut, NativeObjects};
use crate::pipeline::{create_compute_pipeline, create_graphics_pipeline};
use crate::render_pass::{create_framebuffer, NativeRenderPass};
use crate::replay::Replayer;
use crate::translate::{
    buffer_usage_to_vk, descriptor_image_layout, filter_to_vk, format_to_vk, image_usage_to_vk,
    memory_location, mipmap_mode_to_vk, view_aspect_mask, wrap_to_vk,
};

const MAX_SAMPLER_ANISOTROPY: f32 = 16.0;

/// Builder for [`VulkanCore`].
pub struct VulkanCoreBuilder {
    app_name: String,
    enable_validation: bool,
    debug_names: bool,
    frames_in_flight: usize,
    display: Option<RawDisplayHandle>,
}

impl Default for VulkanCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VulkanCoreBuilder {
    pub fn new() -> Self {
        Self {
            app_name: "Cinder Application".to_string(),
            enable_validation: cfg!(debug_assertions),
            debug_names: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            display: None,
        }
    }

    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable the Khronos validation layer and route its output into tracing.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Name native objects after their debug names.
    #[must_use]
    pub const fn debug_names(mut self, enable: bool) -> Self {
        self.debug_names = enable;
        self
    }

    #[must_use]
    pub const fn frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable presentation to windows on this display.
    #[must_use]
    pub const fn with_display_handle(mut self, display: RawDisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    pub fn build(self) -> Result<VulkanCore> {
        let ctx = VulkanContext::new(&ContextOptions {
            app_name: &self.app_name,
            enable_validation: self.enable_validation,
            debug_names: self.debug_names,
            display: self.display,
        })?;
        let frames_in_flight = self.frames_in_flight.max(1);
        let adapter = ctx.capabilities().adapter_info();
        info!(
            "Vulkan core ready: {} ({} frames in flight)",
            adapter.renderer, frames_in_flight
        );
        Ok(VulkanCore {
            registry: ResourceRegistry::new(),
            natives: NativeObjects::default(),
            deletions: DeferredDeletionQueue::new(frames_in_flight),
            frame_number: 0,
            frames_in_flight,
            adapter,
            presents: self.display.is_some(),
            ctx,
        })
    }
}

/// A Vulkan device plus every resource created on it.
///
/// Deleted objects are retired with the current frame number and destroyed
/// once no frame in flight can still reference them.
pub struct VulkanCore {
    registry: ResourceRegistry,
    natives: NativeObjects,
    deletions: DeferredDeletionQueue,
    frame_number: u64,
    frames_in_flight: usize,
    adapter: AdapterInfo,
    presents: bool,
    // Dropped last, after every native object is gone.
    ctx: VulkanContext,
}

impl VulkanCore {
    pub fn builder() -> VulkanCoreBuilder {
        VulkanCoreBuilder::new()
    }

    pub const fn context(&self) -> &VulkanContext {
        &self.ctx
    }

    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub const fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Whether the device was created with swapchain support.
    pub const fn can_present(&self) -> bool {
        self.presents
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletions.pending_count()
    }

    pub(crate) fn advance_frame(&mut self) {
        self.frame_number += 1;
    }

    pub(crate) fn retire(&mut self, object: Retired) {
        self.deletions.queue(object, self.frame_number);
    }

    /// Destroy every retired object no frame in flight can reference.
    pub(crate) fn process_deletions(&mut self) -> Result<()> {
        let ready = self.deletions.drain_ready(self.frame_number);
        self.destroy_retired(ready)
    }

    /// Destroy everything retired so far. The device must be idle.
    pub(crate) fn flush_deletions(&mut self) -> Result<()> {
        let all = self.deletions.drain_all();
        self.destroy_retired(all)
    }

    fn destroy_retired(&mut self, objects: Vec<Retired>) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let mut allocator = self.ctx.allocator.lock();
        for object in objects {
            unsafe { object.destroy(&self.ctx.device, &mut allocator, self.ctx.descriptor_pool) }?;
        }
        Ok(())
    }

    /// Record `commands` into a native command buffer that is already recording.
    ///
    /// # Safety
    /// `cmd` must be in the recording state.
    pub(crate) unsafe fn record(&mut self, cmd: vk::CommandBuffer, commands: &[Command]) -> Result<()> {
        let mut replayer = Replayer::new(
            &self.ctx.device,
            self.ctx.debug_utils(),
            &self.registry,
            &mut self.natives,
            cmd,
        );
        replayer.record(commands)?;
        Ok(())
    }

    /// Record `commands` into a one-shot buffer and wait for it.
    fn run_one_shot(&mut self, commands: &[Command]) -> Result<()> {
        let ctx = &self.ctx;
        let registry = &self.registry;
        let natives = &mut self.natives;
        unsafe {
            execute_single_time_commands::<RhiError, _>(ctx.device(), &ctx.command_pool, ctx.queue, |cmd| {
                Replayer::new(ctx.device(), ctx.debug_utils(), registry, natives, cmd)
                    .record(commands)
                    .map_err(RhiError::from)
            })
        }
    }

    /// Move `image` into `layout` right away.
    fn transition_now(&mut self, image: ImageHandle, layout: vk::ImageLayout) -> Result<()> {
        let ctx = &self.ctx;
        let registry = &self.registry;
        let natives = &mut self.natives;
        unsafe {
            execute_single_time_commands::<RhiError, _>(ctx.device(), &ctx.command_pool, ctx.queue, |cmd| {
                Replayer::new(ctx.device(), ctx.debug_utils(), registry, natives, cmd)
                    .transition(image, layout)
                    .map_err(RhiError::from)
            })
        }
    }

    /// Validate a finished recording for submission.
    pub(crate) fn begin_submit(&self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.mark_pending()?;
        if let Err(err) = cinder_rhi::validate_command_buffer(&self.registry, cmd) {
            cmd.mark_complete();
            return Err(err);
        }
        Ok(())
    }

    fn allocate_buffer(&self, desc: &BufferDesc, usage: vk::BufferUsageFlags) -> Result<NativeBuffer> {
        let buffer = self.ctx.allocator.lock().create_buffer(
            desc.size,
            usage,
            memory_location(desc.memory),
            &desc.debug_name,
        )?;
        self.ctx.set_name(buffer.buffer, &desc.debug_name);
        Ok(buffer)
    }

    fn buffer_usage(desc: &BufferDesc) -> vk::BufferUsageFlags {
        buffer_usage_to_vk(desc.usage) | vk::BufferUsageFlags::TRANSFER_DST
    }

    /// Create a coherent staging buffer holding `data`.
    fn create_staging(&mut self, owner: &str, data: &[u8]) -> Result<BufferHandle> {
        let name = format!("{owner} Staging");
        self.create_buffer(
            &BufferCreateInfo::new(
                &name,
                data.len() as u64,
                BufferUsage::TRANSFER_SRC,
                MemoryUsage::CpuOnly,
            )
            .with_data(data),
        )
    }

    /// Free a staging buffer after a one-shot submission finished with it.
    fn release_staging(&mut self, staging: BufferHandle) -> Result<()> {
        self.registry.remove_buffer(staging)?;
        if let Some(mut buffer) = self.natives.buffers.remove(staging) {
            self.ctx.allocator.lock().free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    fn allocate_image(&self, desc: &ImageDesc) -> Result<NativeImage> {
        let format = format_to_vk(desc.format);
        let image_type = if desc.axis_count() == 3 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };
        let flags = if desc.is_cubemap() {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let usage = image_usage_to_vk(desc.usage)
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth.max(1),
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = self
            .ctx
            .allocator
            .lock()
            .create_image(&create_info, &desc.debug_name)?;
        let aspect = view_aspect_mask(desc.format);
        let mut native = NativeImage {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            owned: true,
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type(desc))
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });
        match unsafe { self.ctx.device.create_image_view(&view_info, None) } {
            Ok(view) => native.view = view,
            Err(e) => {
                self.ctx.allocator.lock().free_image(&mut native)?;
                return Err(VulkanError::from(e).into());
            }
        }

        self.ctx.set_name(native.image, &desc.debug_name);
        self.ctx.set_name(native.view, &format!("{} View", desc.debug_name));
        Ok(native)
    }

    /// Layout an image rests in between uses.
    fn resting_layout(desc: &ImageDesc) -> Option<vk::ImageLayout> {
        desc.usage
            .contains(ImageUsage::STORAGE)
            .then_some(vk::ImageLayout::GENERAL)
    }

    fn final_access(desc: &ImageDesc) -> ImageAccess {
        if desc.usage.contains(ImageUsage::STORAGE) {
            ImageAccess::StorageWrite(ShaderStages::ALL)
        } else {
            ImageAccess::SampledRead(ShaderStages::ALL)
        }
    }

    fn mip_chain(image: ImageHandle, mip_levels: u32) -> impl Iterator<Item = Command> {
        (1..mip_levels).map(move |level| Command::BlitImage {
            src: image,
            src_mip: level - 1,
            dst: image,
            dst_mip: level,
        })
    }

    /// Resolve a bound resource to its native descriptor write.
    fn slot_write(&self, binding: u32, kind: BindingKind, item: BoundResource) -> Result<SlotWrite> {
        Ok(match item {
            BoundResource::Buffer(handle) => SlotWrite::Buffer {
                binding,
                kind,
                buffer: native(&self.natives.buffers, handle)?.buffer,
                range: vk::WHOLE_SIZE,
            },
            BoundResource::Image(handle) => SlotWrite::Image {
                binding,
                kind,
                view: native(&self.natives.images, handle)?.view,
                layout: descriptor_image_layout(kind, self.registry.image(handle)?.format),
            },
            BoundResource::Sampler(handle) => SlotWrite::Sampler {
                binding,
                sampler: *native(&self.natives.samplers, handle)?,
            },
        })
    }

    fn write_set(&self, set: DescriptorSetHandle, slots: &[usize]) -> Result<()> {
        let desc = self.registry.descriptor_set(set)?;
        let mut writes = Vec::with_capacity(slots.len());
        for &index in slots {
            let slot = &desc.slots[index];
            if let Some(item) = slot.item {
                writes.push(self.slot_write(slot.binding, slot.kind, item)?);
            }
        }
        let native_set = *native(&self.natives.sets, set)?;
        unsafe { write_slots(&self.ctx.device, native_set, &writes) };
        Ok(())
    }

    /// Point every set that references `item` at its new native object.
    fn rewrite_sets_referencing(&self, item: BoundResource) -> Result<()> {
        for set in self.registry.sets_referencing(item) {
            let slots: Vec<usize> = self
                .registry
                .descriptor_set(set)?
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.item == Some(item))
                .map(|(index, _)| index)
                .collect();
            self.write_set(set, &slots)?;
        }
        Ok(())
    }

    fn build_framebuffer(&self, desc: &FramebufferDesc) -> Result<vk::Framebuffer> {
        let views = desc
            .attachments()
            .map(|image| native(&self.natives.images, image).map(|native| native.view))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let render_pass = native(&self.natives.render_passes, desc.render_pass)?.pass;
        let framebuffer =
            unsafe { create_framebuffer(&self.ctx.device, render_pass, &views, desc.width, desc.height) }?;
        self.ctx.set_name(framebuffer, &desc.debug_name);
        Ok(framebuffer)
    }

    fn set_layouts(&self, layouts: &[DescriptorSetLayoutHandle]) -> Result<Vec<vk::DescriptorSetLayout>> {
        layouts
            .iter()
            .map(|&layout| {
                self.registry.set_layout(layout)?;
                Ok(*native(&self.natives.set_layouts, layout)?)
            })
            .collect()
    }

    /// Register a render pass whose color attachments end in the present layout.
    pub(crate) fn create_presenting_render_pass(
        &mut self,
        info: &RenderPassCreateInfo<'_>,
    ) -> Result<RenderPassHandle> {
        let mut desc = RenderPassDesc::from_info(info)?;
        desc.presents = true;
        self.insert_render_pass(desc)
    }

    fn insert_render_pass(&mut self, desc: RenderPassDesc) -> Result<RenderPassHandle> {
        let native = unsafe { NativeRenderPass::new(&self.ctx.device, &desc) }?;
        self.ctx.set_name(native.pass, &desc.debug_name);
        debug!("Created render pass '{}'", desc.debug_name);
        let handle = self.registry.insert_render_pass(desc);
        self.natives.render_passes.insert(handle, native);
        Ok(handle)
    }

    /// Register an image the swapchain owns.
    pub(crate) fn insert_borrowed_image(&mut self, desc: ImageDesc, image: vk::Image) -> Result<ImageHandle> {
        let format = format_to_vk(desc.format);
        let aspect = view_aspect_mask(desc.format);
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.ctx.device.create_image_view(&view_info, None) }.map_err(VulkanError::from)?;
        self.ctx.set_name(view, &format!("{} View", desc.debug_name));
        let handle = self.registry.insert_image(desc);
        self.natives.images.insert(
            handle,
            NativeImage {
                image,
                view,
                allocation: None,
                format,
                aspect,
                layout: vk::ImageLayout::UNDEFINED,
                owned: false,
            },
        );
        Ok(handle)
    }

    /// Forget a swapchain image's layout, as after a fresh acquire.
    pub(crate) fn reset_image_layout(&mut self, image: ImageHandle) -> Result<()> {
        native_mut(&mut self.natives.images, image)?.layout = vk::ImageLayout::UNDEFINED;
        Ok(())
    }
}

fn view_type(desc: &ImageDesc) -> vk::ImageViewType {
    if desc.is_cubemap() {
        if desc.array_layers > 6 {
            vk::ImageViewType::CUBE_ARRAY
        } else {
            vk::ImageViewType::CUBE
        }
    } else if desc.axis_count() == 3 {
        vk::ImageViewType::TYPE_3D
    } else if desc.array_layers > 1 {
        vk::ImageViewType::TYPE_2D_ARRAY
    } else {
        vk::ImageViewType::TYPE_2D
    }
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

impl Core for VulkanCore {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Vulkan clip space has Y pointing down.
    fn adjust_perspective(&self, projection: &mut Mat4) {
        projection.y_axis.y *= -1.0;
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo<'_>) -> Result<BufferHandle> {
        let desc = BufferDesc::from_info(info)?;
        let native = self.allocate_buffer(&desc, Self::buffer_usage(&desc))?;
        let handle = self.registry.insert_buffer(desc);
        self.natives.buffers.insert(handle, native);
        if let Some(data) = info.initial_data {
            if let Err(err) = self.upload_buffer(handle, 0, data) {
                self.delete_buffer(handle)?;
                return Err(err);
            }
        }
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.remove_buffer(buffer)?;
        if let Some(native) = self.natives.buffers.remove(buffer) {
            self.retire(Retired::Buffer(native));
        }
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
        if data.is_empty() {
            return Ok(());
        }
        if desc.memory.is_host_coherent() {
            native_mut(&mut self.natives.buffers, buffer)?.write_bytes(offset, data)?;
            return Ok(());
        }

        let name = desc.debug_name.clone();
        let staging = self.create_staging(&name, data)?;
        let result = self.run_one_shot(&[Command::CopyBuffer {
            src: staging,
            dst: buffer,
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        }]);
        self.release_staging(staging)?;
        result
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        let desc = self.registry.buffer(buffer)?;
        if !desc.memory.is_host_visible() {
            return Err(RhiError::Unsupported(format!(
                "'{}' is not host visible",
                desc.debug_name
            )));
        }
        let native = native_mut(&mut self.natives.buffers, buffer)?;
        native.mapped = true;
        native
            .mapped_slice_mut()
            .ok_or_else(|| RhiError::Backend("buffer memory is not persistently mapped".into()))
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.buffer(buffer)?;
        // Host-visible allocations stay persistently mapped.
        native_mut(&mut self.natives.buffers, buffer)?.mapped = false;
        Ok(())
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> Result<()> {
        let mut desc = self.registry.buffer(buffer)?.clone();
        if size == 0 {
            return Err(RhiError::InvalidCreateInfo {
                name: desc.debug_name,
                reason: "size must be non-zero".into(),
            });
        }
        desc.size = size;
        let replacement = self.allocate_buffer(&desc, Self::buffer_usage(&desc))?;
        if let Some(old) = self.natives.buffers.insert(buffer, replacement) {
            self.retire(Retired::Buffer(old));
        }
        *self.registry.buffer_mut(buffer)? = desc;
        self.rewrite_sets_referencing(BoundResource::Buffer(buffer))
    }

    fn create_image(&mut self, info: &ImageCreateInfo<'_>) -> Result<ImageHandle> {
        let desc = ImageDesc::from_info(info)?;
        if let Some(data) = info.initial_data {
            check_image_data(&desc, data)?;
        }
        let native = self.allocate_image(&desc)?;
        let resting = Self::resting_layout(&desc);
        debug!(
            "Created image '{}' {}x{} {:?}",
            desc.debug_name, desc.width, desc.height, desc.format
        );
        let handle = self.registry.insert_image(desc);
        self.natives.images.insert(handle, native);

        let result = match (info.initial_data, resting) {
            (Some(data), _) => self.upload_image(handle, data),
            (None, Some(layout)) => self.transition_now(handle, layout),
            (None, None) => Ok(()),
        };
        if let Err(err) = result {
            self.delete_image(handle)?;
            return Err(err);
        }
        Ok(handle)
    }

    fn delete_image(&mut self, image: ImageHandle) -> Result<()> {
        self.registry.remove_image(image)?;
        if let Some(native) = self.natives.images.remove(image) {
            self.retire(Retired::Image(native));
        }
        Ok(())
    }

    fn upload_image(&mut self, image: ImageHandle, data: &[u8]) -> Result<()> {
        let desc = self.registry.image(image)?.clone();
        check_image_data(&desc, data)?;
        let mips = if desc.generate_mipmaps { 1 } else { desc.mip_levels };
        let (regions, total) = subresource_regions(desc.format, desc.width, desc.height, mips, desc.array_layers);

        let staging = self.create_staging(&desc.debug_name, &data[..total as usize])?;
        let mut commands = vec![Command::CopyBufferToImage {
            src: staging,
            dst: image,
            regions,
        }];
        let generate = desc.generate_mipmaps && !desc.format.is_compressed();
        if generate {
            commands.extend(Self::mip_chain(image, desc.mip_levels));
        }
        commands.push(Command::ImageBarrier(ImageBarrier {
            image,
            src: Some(ImageAccess::TransferDst),
            dst: Self::final_access(&desc),
        }));

        let result = self.run_one_shot(&commands);
        self.release_staging(staging)?;
        result
    }

    fn resize_image(&mut self, image: ImageHandle, width: u32, height: u32) -> Result<()> {
        let desc = self.registry.image(image)?.resized(width, height);
        let replacement = self.allocate_image(&desc)?;
        if let Some(old) = self.natives.images.insert(image, replacement) {
            self.retire(Retired::Image(old));
        }
        let resting = Self::resting_layout(&desc);
        *self.registry.image_mut(image)? = desc;
        if let Some(layout) = resting {
            self.transition_now(image, layout)?;
        }
        // Framebuffers are rebuilt by resize_framebuffer.
        self.rewrite_sets_referencing(BoundResource::Image(image))
    }

    fn generate_mipmaps(&mut self, image: ImageHandle) -> Result<()> {
        let desc = self.registry.image(image)?.clone();
        if desc.format.is_compressed() {
            warn!("'{}' is block compressed, skipping mip generation", desc.debug_name);
            return Ok(());
        }
        if desc.mip_levels <= 1 {
            return Ok(());
        }
        let mut commands: Vec<_> = Self::mip_chain(image, desc.mip_levels).collect();
        commands.push(Command::ImageBarrier(ImageBarrier {
            image,
            src: Some(ImageAccess::TransferDst),
            dst: Self::final_access(&desc),
        }));
        self.run_one_shot(&commands)
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo<'_>) -> Result<SamplerHandle> {
        let desc = SamplerDesc::from_info(info)?;
        let capabilities = self.ctx.capabilities();
        let anisotropy = desc.max_anisotropy > 1.0 && capabilities.supports_anisotropy;
        let max_anisotropy = desc
            .max_anisotropy
            .min(MAX_SAMPLER_ANISOTROPY)
            .min(capabilities.max_sampler_anisotropy);

        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(filter_to_vk(desc.min_filter))
            .mag_filter(filter_to_vk(desc.mag_filter))
            .mipmap_mode(mipmap_mode_to_vk(desc.mip_filter))
            .address_mode_u(wrap_to_vk(desc.wrap_u))
            .address_mode_v(wrap_to_vk(desc.wrap_v))
            .address_mode_w(wrap_to_vk(desc.wrap_w))
            .mip_lod_bias(desc.mip_lod_bias)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { max_anisotropy } else { 1.0 })
            .compare_enable(false)
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);
        let sampler = unsafe { self.ctx.device.create_sampler(&create_info, None) }.map_err(VulkanError::from)?;
        self.ctx.set_name(sampler, &desc.debug_name);
        let handle = self.registry.insert_sampler(desc);
        self.natives.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn delete_sampler(&mut self, sampler: SamplerHandle) -> Result<()> {
        self.registry.remove_sampler(sampler)?;
        if let Some(native) = self.natives.samplers.remove(sampler) {
            self.retire(Retired::Sampler(native));
        }
        Ok(())
    }

    fn create_render_pass(&mut self, info: &RenderPassCreateInfo<'_>) -> Result<RenderPassHandle> {
        let desc = RenderPassDesc::from_info(info)?;
        self.insert_render_pass(desc)
    }

    fn delete_render_pass(&mut self, render_pass: RenderPassHandle) -> Result<()> {
        self.registry.remove_render_pass(render_pass)?;
        if let Some(native) = self.natives.render_passes.remove(render_pass) {
            self.retire(Retired::RenderPass(native.pass));
        }
        Ok(())
    }

    fn create_framebuffer(&mut self, info: &FramebufferCreateInfo<'_>) -> Result<FramebufferHandle> {
        let desc = FramebufferDesc::from_info(info)?;
        self.registry.check_framebuffer(&desc)?;
        let framebuffer = self.build_framebuffer(&desc)?;
        let handle = self.registry.insert_framebuffer(desc);
        self.natives.framebuffers.insert(handle, framebuffer);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<()> {
        self.registry.remove_framebuffer(framebuffer)?;
        if let Some(native) = self.natives.framebuffers.remove(framebuffer) {
            self.retire(Retired::Framebuffer(native));
        }
        Ok(())
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> Result<()> {
        let mut desc = self.registry.framebuffer(framebuffer)?.clone();
        desc.width = width;
        desc.height = height;
        self.registry.check_framebuffer(&desc)?;
        let replacement = self.build_framebuffer(&desc)?;
        if let Some(old) = self.natives.framebuffers.insert(framebuffer, replacement) {
            self.retire(Retired::Framebuffer(old));
        }
        *self.registry.framebuffer_mut(framebuffer)? = desc;
        Ok(())
    }

    fn create_descriptor_set_layout(
        &mut self,
        info: &DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<DescriptorSetLayoutHandle> {
        let desc = DescriptorSetLayoutDesc::from_info(info)?;
        let layout = unsafe { create_set_layout(&self.ctx.device, &desc) }?;
        self.ctx.set_name(layout, &desc.debug_name);
        let handle = self.registry.insert_set_layout(desc);
        self.natives.set_layouts.insert(handle, layout);
        Ok(handle)
    }

    fn delete_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) -> Result<()> {
        self.registry.remove_set_layout(layout)?;
        if let Some(native) = self.natives.set_layouts.remove(layout) {
            self.retire(Retired::SetLayout(native));
        }
        Ok(())
    }

    fn create_descriptor_set(&mut self, info: &DescriptorSetCreateInfo<'_>) -> Result<DescriptorSetHandle> {
        if info.debug_name.is_empty() {
            return Err(RhiError::MissingDebugName("descriptor set"));
        }
        let layout_desc = self.registry.set_layout(info.layout)?;
        let mut desc = DescriptorSetDesc::new(info.debug_name, info.layout, layout_desc);
        self.registry
            .check_binding_resources(info.debug_name, info.bindings, 0)?;
        let written: Vec<usize> = desc.apply(info.bindings, 0)?.into_iter().map(|(index, _)| index).collect();

        let layout = *native(&self.natives.set_layouts, info.layout)?;
        let set = unsafe { allocate_set(&self.ctx.device, self.ctx.descriptor_pool, layout) }?;
        self.ctx.set_name(set, info.debug_name);
        let handle = self.registry.insert_descriptor_set(desc);
        self.natives.sets.insert(handle, set);
        self.write_set(handle, &written)?;
        Ok(handle)
    }

    fn delete_descriptor_set(&mut self, set: DescriptorSetHandle) -> Result<()> {
        self.registry.remove_descriptor_set(set)?;
        if let Some(native) = self.natives.sets.remove(set) {
            self.retire(Retired::DescriptorSet(native));
        }
        Ok(())
    }

    /// Sets must not be referenced by a frame still in flight.
    fn change_bindings(&mut self, set: DescriptorSetHandle, bindings: &[Binding], offset: usize) -> Result<()> {
        let written: Vec<usize> = self
            .registry
            .update_descriptor_set(set, bindings, offset)?
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        self.write_set(set, &written)
    }

    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> Result<GraphicsPipelineHandle> {
        let desc = GraphicsPipelineDesc::from_info(info)?;
        let color_count = self.registry.render_pass(desc.render_pass)?.color_attachments.len();
        let render_pass = native(&self.natives.render_passes, desc.render_pass)?.pass;
        let set_layouts = self.set_layouts(&desc.set_layouts)?;
        let capabilities = self.ctx.capabilities();
        let pipeline = unsafe {
            create_graphics_pipeline(
                &self.ctx.device,
                &desc,
                info.stages,
                render_pass,
                color_count,
                &set_layouts,
                capabilities.supports_wide_lines,
                capabilities.supports_depth_clamp,
            )
        }?;
        self.ctx.set_name(pipeline.pipeline, &desc.debug_name);
        debug!("Created graphics pipeline '{}'", desc.debug_name);
        let handle = self.registry.insert_graphics_pipeline(desc);
        self.natives.graphics_pipelines.insert(handle, pipeline);
        Ok(handle)
    }

    fn delete_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()> {
        self.registry.remove_graphics_pipeline(pipeline)?;
        if let Some(native) = self.natives.graphics_pipelines.remove(pipeline) {
            self.retire(Retired::Pipeline {
                pipeline: native.pipeline,
                layout: native.layout,
            });
        }
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineCreateInfo<'_>,
    ) -> Result<ComputePipelineHandle> {
        let desc = ComputePipelineDesc::from_info(info)?;
        let set_layouts = self.set_layouts(&desc.set_layouts)?;
        let pipeline =
            unsafe { create_compute_pipeline(&self.ctx.device, &desc.debug_name, &info.stage, &set_layouts) }?;
        self.ctx.set_name(pipeline.pipeline, &desc.debug_name);
        debug!("Created compute pipeline '{}'", desc.debug_name);
        let handle = self.registry.insert_compute_pipeline(desc);
        self.natives.compute_pipelines.insert(handle, pipeline);
        Ok(handle)
    }

    fn delete_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.registry.remove_compute_pipeline(pipeline)?;
        if let Some(native) = self.natives.compute_pipelines.remove(pipeline) {
            self.retire(Retired::Pipeline {
                pipeline: native.pipeline,
                layout: native.layout,
            });
        }
        Ok(())
    }

    /// Vertex arrays have no native object; replay binds their buffers.
    fn create_vertex_array(&mut self, info: &VertexArrayCreateInfo<'_>) -> Result<VertexArrayHandle> {
        let desc = VertexArrayDesc::from_info(info)?;
        for buffer in desc.vertex_buffers.iter().chain(&desc.index_buffer) {
            self.registry.buffer(*buffer)?;
        }
        Ok(self.registry.insert_vertex_array(desc))
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()> {
        self.registry.remove_vertex_array(vertex_array)?;
        Ok(())
    }

    fn execute_immediate(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.begin_submit(cmd)?;
        let result = self.run_one_shot(cmd.commands());
        cmd.mark_complete();
        result
    }

    fn wait_until_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanCore {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();

        let natives = std::mem::take(&mut self.natives);
        let mut retired = self.deletions.drain_all();
        retired.extend(natives.buffers.into_iter().map(|(_, b)| Retired::Buffer(b)));
        retired.extend(natives.images.into_iter().map(|(_, i)| Retired::Image(i)));
        retired.extend(natives.samplers.into_iter().map(|(_, s)| Retired::Sampler(s)));
        retired.extend(natives.framebuffers.into_iter().map(|(_, f)| Retired::Framebuffer(f)));
        retired.extend(
            natives
                .render_passes
                .into_iter()
                .map(|(_, p)| Retired::RenderPass(p.pass)),
        );
        retired.extend(
            natives
                .graphics_pipelines
                .into_iter()
                .map(|(_, p)| p)
                .chain(natives.compute_pipelines.into_iter().map(|(_, p)| p))
                .map(|p| Retired::Pipeline {
                    pipeline: p.pipeline,
                    layout: p.layout,
                }),
        );
        retired.extend(natives.sets.into_iter().map(|(_, s)| Retired::DescriptorSet(s)));
        retired.extend(natives.set_layouts.into_iter().map(|(_, l)| Retired::SetLayout(l)));

        if let Err(e) = self.destroy_retired(retired) {
            warn!("Error while destroying Vulkan resources: {e}");
        }
        info!("Vulkan core destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::Format;

    fn image(usage: ImageUsage, layers: u32, depth: u32) -> ImageDesc {
        ImageDesc {
            debug_name: "Test".into(),
            format: Format::R8G8B8A8Unorm,
            width: 64,
            height: 64,
            depth,
            mip_levels: 1,
            array_layers: layers,
            usage,
            generate_mipmaps: false,
        }
    }

    #[test]
    fn view_types_follow_image_shape() {
        assert_eq!(view_type(&image(ImageUsage::SAMPLED, 1, 1)), vk::ImageViewType::TYPE_2D);
        assert_eq!(
            view_type(&image(ImageUsage::SAMPLED, 4, 1)),
            vk::ImageViewType::TYPE_2D_ARRAY
        );
        assert_eq!(
            view_type(&image(ImageUsage::SAMPLED | ImageUsage::CUBEMAP, 6, 1)),
            vk::ImageViewType::CUBE
        );
        assert_eq!(
            view_type(&image(ImageUsage::SAMPLED | ImageUsage::CUBEMAP, 12, 1)),
            vk::ImageViewType::CUBE_ARRAY
        );
        assert_eq!(view_type(&image(ImageUsage::SAMPLED, 1, 8)), vk::ImageViewType::TYPE_3D);
    }

    #[test]
    fn storage_images_rest_in_general() {
        let storage = image(ImageUsage::STORAGE | ImageUsage::SAMPLED, 1, 1);
        assert_eq!(VulkanCore::resting_layout(&storage), Some(vk::ImageLayout::GENERAL));
        assert_eq!(VulkanCore::resting_layout(&image(ImageUsage::SAMPLED, 1, 1)), None);
    }

    #[test]
    fn mip_chain_blits_each_level_from_the_previous() {
        let handle = ImageHandle::default();
        let blits: Vec<_> = VulkanCore::mip_chain(handle, 4).collect();
        assert_eq!(blits.len(), 3);
        assert!(matches!(
            blits[2],
            Command::BlitImage {
                src_mip: 2,
                dst_mip: 3,
                ..
            }
        ));
    }

    #[test]
    fn short_uploads_are_rejected() {
        let desc = image(ImageUsage::SAMPLED, 1, 1);
        let err = check_image_data(&desc, &[0; 16]).unwrap_err();
        assert!(matches!(err, RhiError::UploadOutOfRange(_)));
    }
}
