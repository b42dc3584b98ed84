//! Swapchain presentation for [`VulkanCore`].

use std::sync::Arc;

use ash::vk;
use cinder_rhi::{
    AcquireOutcome, AttachmentInfo, CommandBuffer, Core, Format, FrameCounter,
    FramebufferCreateInfo, FramebufferHandle, ImageCreateInfo, ImageDesc, ImageHandle,
    RenderPassCreateInfo, RenderPassHandle, Result, RhiError, WindowGraphicsBinding,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::command::{begin_command_buffer, submit};
use crate::core::VulkanCore;
use crate::error::VulkanError;
use crate::surface::SurfaceContext;
use crate::swapchain::{Swapchain, SwapchainStatus};
use crate::sync::{create_fence, wait_for_fence, FrameSync};
use crate::translate::format_from_vk;

const SWAPCHAIN_PASS_COLOR: [f32; 4] = [0.3, 0.6, 0.9, 1.0];

/// A window's swapchain, its framebuffers and per-frame synchronization.
pub struct VulkanWindowBinding {
    surface: SurfaceContext,
    swapchain: Option<Swapchain>,
    vsync: bool,
    frames: FrameCounter,
    sync: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    immediate_cmd: vk::CommandBuffer,
    immediate_fence: vk::Fence,
    render_pass: RenderPassHandle,
    images: Vec<ImageHandle>,
    framebuffers: Vec<FramebufferHandle>,
    format: Format,
    extent: (u32, u32),
    requested_extent: (u32, u32),
    image_index: u32,
    acquired: bool,
    dirty: bool,
}

impl VulkanWindowBinding {
    /// Create a surface and swapchain for `window`.
    ///
    /// The core must have been built with the window's display handle.
    pub fn new<W>(core: &mut VulkanCore, window: &W, width: u32, height: u32, vsync: bool) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        if !core.can_present() {
            return Err(RhiError::Unsupported(
                "core was built without a display handle".into(),
            ));
        }
        let ctx = core.context();
        let device = Arc::clone(&ctx.device);
        let surface = unsafe { SurfaceContext::from_window(ctx, window) }?;

        let frames = FrameCounter::new(core.frames_in_flight());
        let sync = (0..frames.max())
            .map(|_| unsafe { FrameSync::new(&device) })
            .collect::<crate::error::Result<Vec<_>>>()?;
        let mut command_buffers =
            unsafe { ctx.command_pool.allocate(&device, frames.max() as u32 + 1) }?;
        let immediate_cmd = command_buffers.pop().ok_or(VulkanError::MissingNative("command buffer"))?;
        let immediate_fence = unsafe { create_fence(&device, false) }?;

        let mut binding = Self {
            surface,
            swapchain: None,
            vsync,
            frames,
            sync,
            command_buffers,
            immediate_cmd,
            immediate_fence,
            render_pass: RenderPassHandle::default(),
            images: Vec::new(),
            framebuffers: Vec::new(),
            format: Format::B8G8R8A8Unorm,
            extent: (0, 0),
            requested_extent: (width, height),
            image_index: 0,
            acquired: false,
            dirty: false,
        };
        binding.build_swapchain(core)?;
        Ok(binding)
    }

    pub const fn vsync(&self) -> bool {
        self.vsync
    }

    /// Use a different present mode from the next recreation on.
    pub fn set_vsync(&mut self, vsync: bool) {
        if vsync != self.vsync {
            self.vsync = vsync;
            self.dirty = true;
        }
    }

    fn build_swapchain(&mut self, core: &mut VulkanCore) -> Result<()> {
        let (width, height) = self.requested_extent;
        let ctx = core.context();
        let support = unsafe { self.surface.capabilities(ctx) }?;
        let swapchain = unsafe {
            Swapchain::new(
                &self.surface.swapchain_loader,
                self.surface.surface,
                &support,
                width,
                height,
                self.vsync,
            )
        }?;

        let format = format_from_vk(swapchain.format.format).ok_or_else(|| {
            RhiError::Unsupported(format!("swapchain format {:?}", swapchain.format.format))
        })?;
        let extent = (swapchain.extent.width, swapchain.extent.height);

        if self.render_pass == RenderPassHandle::default() || format != self.format {
            if core.resources().render_pass(self.render_pass).is_ok() {
                core.delete_render_pass(self.render_pass)?;
            }
            self.render_pass = core.create_presenting_render_pass(&RenderPassCreateInfo {
                debug_name: "Swapchain Render Pass",
                color_attachments: &[AttachmentInfo::cleared(format)],
                depth_attachment: None,
                debug_color: SWAPCHAIN_PASS_COLOR,
            })?;
        }
        self.format = format;
        self.extent = extent;

        for (index, &native) in swapchain.images.iter().enumerate() {
            let name = format!("Swapchain Image {index}");
            let desc = ImageDesc::from_info(&ImageCreateInfo::render_target(&name, format, extent.0, extent.1))?;
            let image = core.insert_borrowed_image(desc, native)?;
            self.images.push(image);

            let fb_name = format!("Swapchain Framebuffer {index}");
            let framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
                debug_name: &fb_name,
                render_pass: self.render_pass,
                color_attachments: &[image],
                depth_attachment: None,
                width: extent.0,
                height: extent.1,
            })?;
            self.framebuffers.push(framebuffer);
        }
        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// Destroy the swapchain and everything built on its images. Waits for idle.
    fn release_swapchain(&mut self, core: &mut VulkanCore) -> Result<()> {
        core.wait_until_idle()?;
        for framebuffer in self.framebuffers.drain(..) {
            core.delete_framebuffer(framebuffer)?;
        }
        for image in self.images.drain(..) {
            core.delete_image(image)?;
        }
        // Views go before the swapchain that owns their images.
        core.flush_deletions()?;
        if let Some(swapchain) = self.swapchain.take() {
            unsafe { swapchain.destroy(&self.surface.swapchain_loader) };
        }
        Ok(())
    }

    fn recreate(&mut self, core: &mut VulkanCore) -> Result<()> {
        let (width, height) = self.requested_extent;
        if width == 0 || height == 0 {
            debug!("Window is minimized, keeping the swapchain stale");
            return Ok(());
        }
        self.release_swapchain(core)?;
        self.build_swapchain(core)?;
        self.dirty = false;
        self.acquired = false;
        info!("Recreated swapchain at {}x{}", self.extent.0, self.extent.1);
        Ok(())
    }

    /// Reset, record and close a native command buffer.
    fn record(core: &mut VulkanCore, native: vk::CommandBuffer, cmd: &CommandBuffer) -> Result<()> {
        let device = Arc::clone(&core.context().device);
        unsafe {
            device
                .reset_command_buffer(native, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::from)?;
            begin_command_buffer(&device, native, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            core.record(native, cmd.commands())?;
            device.end_command_buffer(native).map_err(VulkanError::from)?;
        }
        Ok(())
    }

    fn submit_frame(&mut self, core: &mut VulkanCore, cmd: &CommandBuffer) -> Result<()> {
        let frame = self.frames.current();
        let native = self.command_buffers[frame];
        Self::record(core, native, cmd)?;

        let ctx = core.context();
        let sync = &self.sync[frame];
        unsafe {
            // Only reset once a submission is certain to signal it again.
            sync.reset(ctx.device())?;
            submit(
                ctx.device(),
                ctx.queue,
                native,
                Some((sync.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
                Some(sync.render_finished),
                sync.in_flight,
            )?;
        }
        Ok(())
    }

    fn submit_immediate(&mut self, core: &mut VulkanCore, cmd: &CommandBuffer) -> Result<()> {
        Self::record(core, self.immediate_cmd, cmd)?;
        let ctx = core.context();
        unsafe {
            ctx.device()
                .reset_fences(&[self.immediate_fence])
                .map_err(VulkanError::from)?;
            submit(ctx.device(), ctx.queue, self.immediate_cmd, None, None, self.immediate_fence)?;
            wait_for_fence(ctx.device(), self.immediate_fence)?;
        }
        Ok(())
    }
}

impl WindowGraphicsBinding for VulkanWindowBinding {
    type Core = VulkanCore;

    fn acquire_next_image(&mut self, core: &mut VulkanCore) -> Result<AcquireOutcome> {
        let frame = self.frames.current();
        unsafe { self.sync[frame].wait(core.context().device()) }?;
        core.process_deletions()?;

        if self.dirty || self.swapchain.is_none() {
            self.recreate(core)?;
            return Ok(AcquireOutcome::OutOfDate);
        }
        let Some(swapchain) = &self.swapchain else {
            return Ok(AcquireOutcome::OutOfDate);
        };

        let (image_index, status) = unsafe {
            swapchain.acquire_next_image(&self.surface.swapchain_loader, self.sync[frame].image_available)
        }?;
        match status {
            SwapchainStatus::OutOfDate => {
                warn!("Swapchain out of date on acquire");
                self.dirty = true;
                self.recreate(core)?;
                Ok(AcquireOutcome::OutOfDate)
            }
            status => {
                if status == SwapchainStatus::Suboptimal {
                    debug!("Swapchain suboptimal, recreating after this frame");
                    self.dirty = true;
                }
                self.image_index = image_index;
                self.acquired = true;
                core.reset_image_layout(self.images[image_index as usize])?;
                Ok(AcquireOutcome::Acquired { image_index })
            }
        }
    }

    fn submit_command_buffer_for_current_frame(
        &mut self,
        core: &mut VulkanCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        if !self.acquired {
            return Err(RhiError::Swapchain("submit before acquiring an image".into()));
        }
        core.begin_submit(cmd)?;
        let result = self.submit_frame(core, cmd);
        cmd.mark_complete();
        result
    }

    fn submit_command_buffer_no_synchronization(
        &mut self,
        core: &mut VulkanCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        core.begin_submit(cmd)?;
        let result = self.submit_immediate(core, cmd);
        cmd.mark_complete();
        result
    }

    fn present_swapchain(&mut self, core: &mut VulkanCore) -> Result<bool> {
        if !self.acquired {
            return Err(RhiError::Swapchain("present before acquiring an image".into()));
        }
        self.acquired = false;
        let Some(swapchain) = &self.swapchain else {
            return Ok(false);
        };
        let frame = self.frames.current();
        let ctx = core.context();
        let status = unsafe {
            swapchain.present(
                &self.surface.swapchain_loader,
                ctx.queue,
                self.image_index,
                self.sync[frame].render_finished,
            )
        }?;

        if status == SwapchainStatus::OutOfDate || self.dirty {
            warn!("Swapchain stale on present");
            self.dirty = true;
            return Ok(false);
        }
        self.frames.advance();
        core.advance_frame();
        Ok(true)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.extent {
            self.requested_extent = (width, height);
            self.dirty = true;
        }
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
        self.images.len() as u32
    }

    fn current_framebuffer(&self) -> FramebufferHandle {
        self.framebuffers
            .get(self.image_index as usize)
            .copied()
            .unwrap_or_default()
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

    fn destroy(&mut self, core: &mut VulkanCore) -> Result<()> {
        self.release_swapchain(core)?;
        if core.resources().render_pass(self.render_pass).is_ok() {
            core.delete_render_pass(self.render_pass)?;
            core.flush_deletions()?;
        }
        let ctx = core.context();
        let device = ctx.device();
        unsafe {
            for sync in self.sync.drain(..) {
                sync.destroy(device);
            }
            device.destroy_fence(self.immediate_fence, None);
            let mut buffers = std::mem::take(&mut self.command_buffers);
            buffers.push(self.immediate_cmd);
            ctx.command_pool.free(device, &buffers);
            self.surface.destroy();
        }
        info!("Destroyed window binding");
        Ok(())
    }
}
