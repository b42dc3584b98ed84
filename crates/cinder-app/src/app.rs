//! `App` trait definition.

use winit::event::{DeviceEvent, DeviceId, WindowEvent};

use crate::context::AppContext;
use crate::frame::FrameContext;

/// Trait for Cinder applications.
///
/// The framework owns the window, the Vulkan core and the swapchain, and
/// calls into the application once per frame.
pub trait App: Sized {
    /// Called once after the window, core and swapchain exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Advance time-dependent state by `dt` seconds. Runs before `render`.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record the frame into `frame.command_buffer`.
    ///
    /// The buffer is already recording and is submitted and presented by
    /// the framework afterwards. The output must end up in
    /// `frame.framebuffer`, which was built for `frame.render_pass`.
    fn render(&mut self, ctx: &mut AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// The swapchain was rebuilt at `width` x `height`.
    ///
    /// Size-dependent resources such as renderer targets are resized here.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` to stop the framework from handling the event.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Raw input, such as mouse motion while the cursor is grabbed.
    #[allow(unused_variables)]
    fn on_device_event(&mut self, device_id: DeviceId, event: &DeviceEvent) {}

    /// Release GPU resources. The device is idle when this runs.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
