//! Presentation through a flip-model DXGI swapchain.
//!
//! The swapchain's single writable back buffer is exposed to the renderer
//! as "Swapchain Image 0". Frames in flight are bounded with event queries
//! ended after each frame's commands.

use std::ffi::c_void;

use cinder_rhi::{
    AcquireOutcome, AttachmentInfo, CommandBuffer, Core, Format, FrameCounter,
    FramebufferCreateInfo, FramebufferHandle, ImageCreateInfo, ImageDesc, ImageHandle,
    RenderPassCreateInfo, RenderPassHandle, Result, RhiError, WindowGraphicsBinding,
};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::{info, warn};
use windows::core::HRESULT;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{ID3D11Query, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIOutput, IDXGISwapChain1, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, DXGI_PRESENT,
    DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_FLIP_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};

use crate::core::Dx11Core;
use crate::error::Dx11Error;

const SURFACE_FORMAT: Format = Format::B8G8R8A8Unorm;
const BUFFER_COUNT: u32 = 2;

/// What a `Present` result means for the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PresentStatus {
    Presented,
    /// The device went away; the caller rebuilds on the next acquire.
    Lost,
    Failed,
}

fn classify_present(result: HRESULT) -> PresentStatus {
    if result == DXGI_ERROR_DEVICE_REMOVED || result == DXGI_ERROR_DEVICE_RESET {
        PresentStatus::Lost
    } else if result.is_ok() {
        PresentStatus::Presented
    } else {
        PresentStatus::Failed
    }
}

fn window_hwnd(window: &impl HasWindowHandle) -> Result<HWND> {
    let handle = window
        .window_handle()
        .map_err(|e| Dx11Error::Swapchain(format!("window handle unavailable: {e}")))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Ok(HWND(win32.hwnd.get() as *mut c_void)),
        other => Err(Dx11Error::Unsupported(format!("{other:?} is not a Win32 window")).into()),
    }
}

/// A window's DXGI swapchain driven through [`Dx11Core`].
pub struct Dx11WindowBinding {
    swapchain: IDXGISwapChain1,
    frames: FrameCounter,
    queries: Vec<ID3D11Query>,
    pending: Vec<bool>,
    render_pass: RenderPassHandle,
    image: ImageHandle,
    framebuffer: FramebufferHandle,
    extent: (u32, u32),
    requested: (u32, u32),
    vsync: bool,
    acquired: bool,
    dirty: bool,
}

impl Dx11WindowBinding {
    pub fn new(
        core: &mut Dx11Core,
        window: &impl HasWindowHandle,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self> {
        let hwnd = window_hwnd(window)?;
        let extent = (width.max(1), height.max(1));
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: extent.0,
            Height: extent.1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: BUFFER_COUNT,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: 0,
        };
        // SAFETY: `hwnd` belongs to a live window and `desc` is a live local.
        let (swapchain, back_buffer) = unsafe {
            let swapchain = core
                .factory()
                .CreateSwapChainForHwnd(core.device(), hwnd, &desc, None, None::<&IDXGIOutput>)
                .map_err(Dx11Error::from)?;
            let back_buffer: ID3D11Texture2D = swapchain.GetBuffer(0).map_err(Dx11Error::from)?;
            (swapchain, back_buffer)
        };

        let render_pass = core.create_presenting_render_pass(&RenderPassCreateInfo {
            debug_name: "Swapchain Render Pass",
            color_attachments: &[AttachmentInfo::cleared(SURFACE_FORMAT)],
            depth_attachment: None,
            debug_color: [0.3, 0.6, 0.9, 1.0],
        })?;
        let image = core.insert_back_buffer(
            ImageDesc::from_info(&ImageCreateInfo::render_target(
                "Swapchain Image 0",
                SURFACE_FORMAT,
                extent.0,
                extent.1,
            ))?,
            &back_buffer,
        )?;
        let framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Swapchain Framebuffer 0",
            render_pass,
            color_attachments: &[image],
            depth_attachment: None,
            width: extent.0,
            height: extent.1,
        })?;

        let frames = FrameCounter::new(core.frames_in_flight());
        let queries = (0..frames.max())
            .map(|_| core.create_event_query())
            .collect::<Result<Vec<_>>>()?;
        info!(
            "DXGI swapchain {}x{} with {} frames in flight",
            extent.0,
            extent.1,
            frames.max()
        );
        Ok(Self {
            swapchain,
            pending: vec![false; queries.len()],
            queries,
            frames,
            render_pass,
            image,
            framebuffer,
            extent,
            requested: extent,
            vsync,
            acquired: false,
            dirty: false,
        })
    }

    pub const fn swapchain(&self) -> &IDXGISwapChain1 {
        &self.swapchain
    }

    fn recreate(&mut self, core: &mut Dx11Core, width: u32, height: u32) -> Result<()> {
        core.release_back_buffer(self.image, self.framebuffer);
        // SAFETY: every reference to the old back buffer was just released.
        let back_buffer: ID3D11Texture2D = unsafe {
            self.swapchain
                .ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))
                .map_err(Dx11Error::from)?;
            self.swapchain.GetBuffer(0).map_err(Dx11Error::from)?
        };
        core.attach_back_buffer(self.image, self.framebuffer, &back_buffer, width, height)?;
        self.extent = (width, height);
        info!("Swapchain resized to {width}x{height}");
        Ok(())
    }
}

impl WindowGraphicsBinding for Dx11WindowBinding {
    type Core = Dx11Core;

    fn acquire_next_image(&mut self, core: &mut Dx11Core) -> Result<AcquireOutcome> {
        let frame = self.frames.current();
        if std::mem::take(&mut self.pending[frame]) {
            core.wait_for_query(&self.queries[frame])?;
        }

        if self.dirty {
            let (width, height) = self.requested;
            if width == 0 || height == 0 {
                // Minimized; stay stale until the window has an area again.
                return Ok(AcquireOutcome::OutOfDate);
            }
            self.recreate(core, width, height)?;
            self.dirty = false;
            return Ok(AcquireOutcome::OutOfDate);
        }

        self.acquired = true;
        Ok(AcquireOutcome::Acquired { image_index: 0 })
    }

    fn submit_command_buffer_for_current_frame(
        &mut self,
        core: &mut Dx11Core,
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
        // SAFETY: the query belongs to this device.
        unsafe { core.context().End(&self.queries[frame]) };
        self.pending[frame] = true;
        Ok(())
    }

    fn submit_command_buffer_no_synchronization(
        &mut self,
        core: &mut Dx11Core,
        cmd: &mut CommandBuffer,
    ) -> Result<()> {
        core.submit(cmd)?;
        core.wait_until_idle()
    }

    fn present_swapchain(&mut self, core: &mut Dx11Core) -> Result<bool> {
        self.acquired = false;
        if self.dirty {
            return Ok(false);
        }
        // SAFETY: the swapchain is live.
        let result = unsafe { self.swapchain.Present(u32::from(self.vsync), DXGI_PRESENT(0)) };
        core.drain_debug_messages();
        match classify_present(result) {
            PresentStatus::Presented => {
                self.frames.advance();
                Ok(true)
            }
            PresentStatus::Lost => {
                warn!("Device lost during present ({result:?})");
                self.dirty = true;
                Ok(false)
            }
            PresentStatus::Failed => Err(Dx11Error::Swapchain(format!("Present failed: {result:?}")).into()),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.requested = (width, height);
        if self.requested != self.extent {
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

    fn destroy(&mut self, core: &mut Dx11Core) -> Result<()> {
        for (query, pending) in self.queries.iter().zip(&mut self.pending) {
            if std::mem::take(pending) {
                core.wait_for_query(query)?;
            }
        }
        core.delete_framebuffer(self.framebuffer)?;
        core.delete_image(self.image)?;
        core.delete_render_pass(self.render_pass)
    }
}

#[cfg(test)]
mod tests {
    use windows::Win32::Foundation::{E_FAIL, S_OK};
    use windows::Win32::Graphics::Dxgi::DXGI_STATUS_OCCLUDED;

    use super::*;

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(S_OK), PresentStatus::Presented);
        assert_eq!(classify_present(DXGI_STATUS_OCCLUDED), PresentStatus::Presented);
        assert_eq!(classify_present(DXGI_ERROR_DEVICE_REMOVED), PresentStatus::Lost);
        assert_eq!(classify_present(DXGI_ERROR_DEVICE_RESET), PresentStatus::Lost);
        assert_eq!(classify_present(E_FAIL), PresentStatus::Failed);
    }
}
