//! Swapchain ownership and the present loop.

use crate::command::CommandBuffer;
use crate::core::Core;
use crate::error::Result;
use crate::format::Format;
use crate::handles::{FramebufferHandle, RenderPassHandle};

/// Frames the CPU may record ahead of the GPU unless configured otherwise.
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Result of [`WindowGraphicsBinding::acquire_next_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32 },
    /// The swapchain was stale and has been rebuilt; skip this frame.
    OutOfDate,
}

/// Round-robin frame-in-flight index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    max: usize,
}

impl FrameCounter {
    pub fn new(max_frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            max: max_frames_in_flight.max(1),
        }
    }

    pub const fn current(&self) -> usize {
        self.current
    }

    pub const fn max(&self) -> usize {
        self.max
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.max;
    }
}

/// A window's swapchain plus per-frame synchronization.
///
/// Every call takes the owning core explicitly.
pub trait WindowGraphicsBinding {
    type Core: Core;

    /// Wait on the current frame's fence, then acquire a swapchain image.
    fn acquire_next_image(&mut self, core: &mut Self::Core) -> Result<AcquireOutcome>;

    /// Submit gated on image-available, signalling render-finished and the frame fence.
    fn submit_command_buffer_for_current_frame(
        &mut self,
        core: &mut Self::Core,
        cmd: &mut CommandBuffer,
    ) -> Result<()>;

    /// Submit and wait on a private fence, outside the frame loop.
    fn submit_command_buffer_no_synchronization(
        &mut self,
        core: &mut Self::Core,
        cmd: &mut CommandBuffer,
    ) -> Result<()>;

    /// Present the acquired image. `Ok(false)` means the swapchain was stale.
    ///
    /// The frame index only advances on success.
    fn present_swapchain(&mut self, core: &mut Self::Core) -> Result<bool>;

    /// Mark the swapchain for recreation at the next acquire or present.
    fn resize(&mut self, width: u32, height: u32);

    fn current_image_index(&self) -> u32;
    fn current_frame_index(&self) -> usize;
    fn max_frames_in_flight(&self) -> usize;
    fn image_count(&self) -> u32;
    fn current_framebuffer(&self) -> FramebufferHandle;
    /// Render pass every swapchain framebuffer was built for.
    fn render_pass(&self) -> RenderPassHandle;
    fn surface_format(&self) -> Format;
    fn extent(&self) -> (u32, u32);

    /// Release the swapchain and its synchronization objects.
    fn destroy(&mut self, core: &mut Self::Core) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::FrameCounter;

    #[test]
    fn frame_counter_wraps() {
        let mut counter = FrameCounter::new(3);
        let seen: Vec<_> = (0..5)
            .map(|_| {
                let frame = counter.current();
                counter.advance();
                frame
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn zero_frames_is_clamped() {
        assert_eq!(FrameCounter::new(0).max(), 1);
    }
}
