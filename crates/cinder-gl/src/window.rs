//! Presentation to the default framebuffer.
//!
//! GL has a single back buffer per window, exposed to the renderer as
//! "Swapchain Image 0". Frames in flight are bounded with fence syncs
//! inserted after each frame's commands.

use cinder_rhi::{
    AcquireOutcome, AttachmentInfo, CommandBuffer, Core, Format, FrameCounter,
    FramebufferCreateInfo, FramebufferHandle, ImageCreateInfo, ImageDesc, ImageHandle,
    RenderPassCreateInfo, RenderPassHandle, Result, RhiError, WindowGraphicsBinding,
};
use glow::HasContext;
use tracing::{info, warn};

use crate::core::GlCore;
use crate::error::GlError;
use crate::surface::GlSurface;

const SURFACE_FORMAT: Format = Format::R8G8B8A8Unorm;

/// Nanoseconds per `glClientWaitSync` attempt before logging a stall.
const FENCE_TIMEOUT_NS: i32 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceWait {
    Signaled,
    TimedOut,
    Failed,
}

const fn classify_wait(status: u32) -> FenceWait {
    match status {
        glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => FenceWait::Signaled,
        glow::TIMEOUT_EXPIRED => FenceWait::TimedOut,
        _ => FenceWait::Failed,
    }
}

/// Block until `fence` signals, then delete it.
fn wait_for_fence(gl: &glow::Context, fence: glow::Fence) -> Result<()> {
    // SAFETY: the fence was created on this context and is deleted exactly once.
    unsafe {
        loop {
            let status = gl.client_wait_sync(fence, glow::SYNC_FLUSH_COMMANDS_BIT, FENCE_TIMEOUT_NS);
            match classify_wait(status) {
                FenceWait::Signaled => break,
                FenceWait::TimedOut => warn!("Frame fence has not signalled after 1s"),
                FenceWait::Failed => {
                    gl.delete_sync(fence);
                    return Err(RhiError::Backend(format!("glClientWaitSync failed ({status:#x})")));
                }
            }
        }
        gl.delete_sync(fence);
    }
    Ok(())
}

/// A window's default framebuffer driven through [`GlCore`].
pub struct GlWindowBinding<S: GlSurface> {
    surface: S,
    frames: FrameCounter,
    fences: Vec<Option<glow::Fence>>,
    render_pass: RenderPassHandle,
    image: ImageHandle,
    framebuffer: FramebufferHandle,
    extent: (u32, u32),
    acquired: bool,
    dirty: bool,
}

impl<S: GlSurface> GlWindowBinding<S> {
    pub fn new(core: &mut GlCore, surface: S, vsync: bool) -> Result<Self> {
        surface.make_current().map_err(GlError::Surface)?;
        if let Err(e) = surface.set_swap_interval(vsync) {
            warn!("Could not set swap interval: {e}");
        }
        let (width, height) = surface.size();
        let extent = (width.max(1), height.max(1));

        let render_pass = core.create_presenting_render_pass(&RenderPassCreateInfo {
            debug_name: "Swapchain Render Pass",
            color_attachments: &[AttachmentInfo::cleared(SURFACE_FORMAT)],
            depth_attachment: None,
            debug_color: [0.3, 0.6, 0.9, 1.0],
        })?;
        let image = core.insert_default_framebuffer_image(ImageDesc::from_info(
            &ImageCreateInfo::render_target("Swapchain Image 0", SURFACE_FORMAT, extent.0, extent.1),
        )?);
        let framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Swapchain Framebuffer 0",
            render_pass,
            color_attachments: &[image],
            depth_attachment: None,
            width: extent.0,
            height: extent.1,
        })?;

        let frames = FrameCounter::new(core.config().frames_in_flight);
        info!(
            "GL window binding {}x{} with {} frames in flight",
            extent.0,
            extent.1,
            frames.max()
        );
        Ok(Self {
            surface,
            fences: (0..frames.max()).map(|_| None).collect(),
            frames,
            render_pass,
            image,
            framebuffer,
            extent,
            acquired: false,
            dirty: false,
        })
    }

    pub const fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: GlSurface> WindowGraphicsBinding for GlWindowBinding<S> {
    type Core = GlCore;

    fn acquire_next_image(&mut self, core: &mut GlCore) -> Result<AcquireOutcome> {
        let frame = self.frames.current();
        if let Some(fence) = self.fences[frame].take() {
            wait_for_fence(core.gl(), fence)?;
        }

        if self.dirty {
            let (width, height) = self.surface.size();
            if width == 0 || height == 0 {
                // Minimized; stay stale until the window has an area again.
                return Ok(AcquireOutcome::OutOfDate);
            }
            core.resize_default_framebuffer(self.image, self.framebuffer, width, height)?;
            self.extent = (width, height);
            self.dirty = false;
            info!("Default framebuffer resized to {width}x{height}");
            return Ok(AcquireOutcome::OutOfDate);
        }

        self.acquired = true;
        Ok(AcquireOutcome::Acquired { image_index: 0 })
    }

    fn submit_command_buffer_for_current_frame(
        &mut self,
        core: &mut GlCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        if !self.acquired {
            return Err(RhiError::InvalidCommandState {
                buffer: cmd.debug_name().to_owned(),
                reason: "submitted for a frame with no acquired image".into(),
            });
        }
        core.submit(cmd)?;
        let gl = core.gl();
        // SAFETY: the context is current.
        let fence = unsafe { gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(GlError::ObjectCreation)?;
        if let Some(previous) = self.fences[self.frames.current()].replace(fence) {
            // SAFETY: superseded by the newer fence of the same frame.
            unsafe { gl.delete_sync(previous) };
        }
        Ok(())
    }

    fn submit_command_buffer_no_synchronization(
        &mut self,
        core: &mut GlCore,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        core.submit(cmd)?;
        core.wait_until_idle()
    }

    fn present_swapchain(&mut self, _core: &mut GlCore) -> Result<bool> {
        self.acquired = false;
        if self.dirty {
            return Ok(false);
        }
        self.surface.swap_buffers().map_err(GlError::Surface)?;
        self.frames.advance();
        Ok(true)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.extent {
            self.dirty = true;
        }
    }

    fn current_image_index(&self) -> u32 {
        0
    }

    fn current_frame_index(&self) -> usize {
        self.frames.current()
    }

    fn max_frames_in_flight(&self) -> usize {
        self.frames.max()
    }

    fn image_count(&self) -> u32 {
        1
    }

    fn current_framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    fn surface_format(&self) -> Format {
        SURFACE_FORMAT
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn destroy(&mut self, core: &mut GlCore) -> Result<()> {
        for fence in self.fences.iter_mut().filter_map(Option::take) {
            wait_for_fence(core.gl(), fence)?;
        }
        core.delete_framebuffer(self.framebuffer)?;
        core.delete_image(self.image)?;
        core.delete_render_pass(self.render_pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_classification() {
        assert_eq!(classify_wait(glow::ALREADY_SIGNALED), FenceWait::Signaled);
        assert_eq!(classify_wait(glow::CONDITION_SATISFIED), FenceWait::Signaled);
        assert_eq!(classify_wait(glow::TIMEOUT_EXPIRED), FenceWait::TimedOut);
        assert_eq!(classify_wait(glow::WAIT_FAILED), FenceWait::Failed);
    }
}
