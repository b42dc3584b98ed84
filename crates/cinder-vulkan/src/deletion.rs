//! Deferred destruction of native objects an in-flight frame may still use.
//!
//! Objects are queued with the frame number they were retired on and only
//! destroyed once every frame that could have recorded them has completed.

use std::collections::VecDeque;

use ash::vk;

use crate::error::Result;
use crate::memory::{GpuAllocator, NativeBuffer, NativeImage};

/// A native object waiting to be destroyed.
pub enum Retired {
    Buffer(NativeBuffer),
    Image(NativeImage),
    Sampler(vk::Sampler),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    SetLayout(vk::DescriptorSetLayout),
    DescriptorSet(vk::DescriptorSet),
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
}

impl Retired {
    /// Destroy the object now.
    ///
    /// # Safety
    /// The GPU must no longer use the object.
    pub unsafe fn destroy(
        self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        descriptor_pool: vk::DescriptorPool,
    ) -> Result<()> {
        match self {
            Self::Buffer(mut buffer) => allocator.free_buffer(&mut buffer)?,
            Self::Image(mut image) => allocator.free_image(&mut image)?,
            Self::Sampler(sampler) => device.destroy_sampler(sampler, None),
            Self::RenderPass(pass) => device.destroy_render_pass(pass, None),
            Self::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer, None),
            Self::SetLayout(layout) => device.destroy_descriptor_set_layout(layout, None),
            Self::DescriptorSet(set) => device.free_descriptor_sets(descriptor_pool, &[set])?,
            Self::Pipeline { pipeline, layout } => {
                device.destroy_pipeline(pipeline, None);
                device.destroy_pipeline_layout(layout, None);
            }
        }
        Ok(())
    }
}

struct PendingDeletion {
    object: Retired,
    frame_queued: u64,
}

/// Queue for deferred deletions.
pub struct DeferredDeletionQueue {
    pending: VecDeque<PendingDeletion>,
    frames_in_flight: usize,
}

impl DeferredDeletionQueue {
    pub const fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    pub fn queue(&mut self, object: Retired, frame_number: u64) {
        self.pending.push_back(PendingDeletion {
            object,
            frame_queued: frame_number,
        });
    }

    /// Objects old enough to destroy at `current_frame_number`.
    pub fn drain_ready(&mut self, current_frame_number: u64) -> Vec<Retired> {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);
        let mut ready = Vec::new();
        // FIFO with non-decreasing frame numbers, so only the front can mature.
        while self
            .pending
            .front()
            .is_some_and(|p| p.frame_queued < cutoff)
        {
            if let Some(pending) = self.pending.pop_front() {
                ready.push(pending.object);
            }
        }
        ready
    }

    /// Everything still queued, for shutdown or after a device idle.
    pub fn drain_all(&mut self) -> Vec<Retired> {
        self.pending.drain(..).map(|p| p.object).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(raw: u64) -> Retired {
        use ash::vk::Handle;
        Retired::Sampler(vk::Sampler::from_raw(raw))
    }

    #[test]
    fn objects_wait_for_every_frame_in_flight() {
        let mut queue = DeferredDeletionQueue::new(2);
        queue.queue(sampler(1), 10);
        queue.queue(sampler(2), 11);

        assert!(queue.drain_ready(11).is_empty());
        assert!(queue.drain_ready(12).is_empty());
        assert_eq!(queue.drain_ready(13).len(), 1);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.drain_ready(14).len(), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let mut queue = DeferredDeletionQueue::new(3);
        queue.queue(sampler(1), 0);
        queue.queue(sampler(2), 0);
        assert_eq!(queue.drain_all().len(), 2);
        assert_eq!(queue.pending_count(), 0);
    }
}
