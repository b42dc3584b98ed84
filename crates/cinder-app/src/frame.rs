//! Per-frame context for rendering.

use cinder_rhi::{CommandBuffer, FramebufferHandle, RenderPassHandle};

/// The frame being recorded.
pub struct FrameContext<'a> {
    /// Recording buffer for this frame in flight.
    pub command_buffer: &'a mut CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Frame-in-flight slot, for per-frame resources.
    pub frame_index: usize,
    /// Framebuffer of the acquired swapchain image.
    pub framebuffer: FramebufferHandle,
    pub render_pass: RenderPassHandle,
    pub extent: (u32, u32),
    /// Seconds since the previous frame.
    pub dt: f32,
    pub frame_number: u64,
}
