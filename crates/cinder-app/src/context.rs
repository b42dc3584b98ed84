//! Application context.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use cinder_rhi::{CommandBuffer, CommandBufferState, WindowGraphicsBinding};
use cinder_vulkan::{VulkanCore, VulkanWindowBinding};
use winit::window::Window;

/// Everything an application renders with.
///
/// Owns the Vulkan core, the window's swapchain binding and one command
/// buffer per frame in flight.
pub struct AppContext {
    pub window: Arc<Window>,
    pub core: VulkanCore,
    pub binding: VulkanWindowBinding,
    /// Per-frame command buffers. A slot is empty while its buffer is
    /// handed to the application.
    ring: Vec<Option<CommandBuffer>>,
    /// Total frames presented.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
    vsync: bool,
}

fn frame_command_buffer(index: usize) -> anyhow::Result<CommandBuffer> {
    Ok(CommandBuffer::new(&format!("Frame Command Buffer {index}"))?)
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, mut core: VulkanCore, vsync: bool) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let binding = VulkanWindowBinding::new(
            &mut core,
            window.as_ref(),
            size.width.max(1),
            size.height.max(1),
            vsync,
        )
        .context("creating the window swapchain")?;

        let (width, height) = binding.extent();
        tracing::info!(
            "Swapchain created: {}x{} ({} images, {} frames in flight)",
            width,
            height,
            binding.image_count(),
            binding.max_frames_in_flight()
        );

        let ring = (0..binding.max_frames_in_flight())
            .map(|index| frame_command_buffer(index).map(Some))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            window,
            core,
            binding,
            ring,
            frame_count: 0,
            last_frame_time: Instant::now(),
            vsync,
        })
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> (u32, u32) {
        self.binding.extent()
    }

    pub fn width(&self) -> u32 {
        self.extent().0
    }

    pub fn height(&self) -> u32 {
        self.extent().1
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.extent();
        width as f32 / height.max(1) as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    pub const fn vsync(&self) -> bool {
        self.vsync
    }

    /// Switch present modes; takes effect when the swapchain is rebuilt.
    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
        self.binding.set_vsync(vsync);
    }

    pub(crate) fn take_command_buffer(&mut self, frame_index: usize) -> anyhow::Result<CommandBuffer> {
        self.ring
            .get_mut(frame_index)
            .and_then(Option::take)
            .with_context(|| format!("command buffer for frame {frame_index} is not available"))
    }

    /// Put a frame's buffer back. A buffer abandoned mid-recording is
    /// replaced, since it can't be begun again.
    pub(crate) fn restore_command_buffer(
        &mut self,
        frame_index: usize,
        cmd: CommandBuffer,
    ) -> anyhow::Result<()> {
        let cmd = if cmd.state() == CommandBufferState::Recording {
            tracing::warn!("{} abandoned while recording; replacing it", cmd.debug_name());
            frame_command_buffer(frame_index)?
        } else {
            cmd
        };
        let slot = self
            .ring
            .get_mut(frame_index)
            .with_context(|| format!("no command buffer slot for frame {frame_index}"))?;
        *slot = Some(cmd);
        Ok(())
    }

    /// Destroy the swapchain binding. The device must be idle.
    pub(crate) fn cleanup(&mut self) -> anyhow::Result<()> {
        self.ring.clear();
        self.binding.destroy(&mut self.core)?;
        Ok(())
    }
}
