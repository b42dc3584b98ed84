//! Automatic read/write hazard tracking.
//!
//! Each command buffer remembers the last access to every image and buffer it
//! touched. Declaring a new access produces a barrier whenever the access
//! changes or either side writes. Repeating the same read produces nothing.

use hashbrown::HashMap;

use crate::flags::ShaderStages;
use crate::handles::{BufferHandle, ImageHandle};

/// How a pass touches an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    SampledRead(ShaderStages),
    StorageWrite(ShaderStages),
    ColorAttachment,
    DepthAttachment,
    /// Depth attached for testing only, or sampled as a depth texture.
    DepthRead,
    TransferSrc,
    TransferDst,
    Present,
}

impl ImageAccess {
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::StorageWrite(_) | Self::ColorAttachment | Self::DepthAttachment | Self::TransferDst
        )
    }
}

/// How a pass touches a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    UniformRead(ShaderStages),
    StorageRead(ShaderStages),
    StorageWrite(ShaderStages),
    VertexRead,
    IndexRead,
    IndirectRead,
    TransferSrc,
    TransferDst,
}

impl BufferAccess {
    pub const fn is_write(self) -> bool {
        matches!(self, Self::StorageWrite(_) | Self::TransferDst)
    }
}

/// Transition of one image between two accesses.
///
/// `src: None` means the image has not been seen in this command buffer;
/// backends fall back to whatever state they track for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub src: Option<ImageAccess>,
    pub dst: ImageAccess,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src: Option<BufferAccess>,
    pub dst: BufferAccess,
}

fn needs_barrier<A: PartialEq + Copy>(last: Option<A>, next: A, is_write: impl Fn(A) -> bool) -> bool {
    match last {
        None => true,
        Some(last) => last != next || is_write(last) || is_write(next),
    }
}

/// Last-access bookkeeping for one command buffer.
#[derive(Debug)]
pub struct HazardTracker {
    automatic: bool,
    images: HashMap<ImageHandle, ImageAccess>,
    buffers: HashMap<BufferHandle, BufferAccess>,
}

impl Default for HazardTracker {
    fn default() -> Self {
        Self {
            automatic: true,
            images: HashMap::new(),
            buffers: HashMap::new(),
        }
    }
}

impl HazardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`use_image`](Self::use_image) emits barriers.
    pub const fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn set_automatic(&mut self, automatic: bool) {
        self.automatic = automatic;
    }

    /// Record an image access, returning the barrier it needs.
    ///
    /// With automatic barriers off the access is still remembered, so turning
    /// them back on resumes from the right state.
    pub fn use_image(&mut self, image: ImageHandle, access: ImageAccess) -> Option<ImageBarrier> {
        let last = self.images.insert(image, access);
        (self.automatic && needs_barrier(last, access, ImageAccess::is_write)).then_some(ImageBarrier {
            image,
            src: last,
            dst: access,
        })
    }

    /// Record a buffer access, returning the barrier it needs.
    pub fn use_buffer(&mut self, buffer: BufferHandle, access: BufferAccess) -> Option<BufferBarrier> {
        let last = self.buffers.insert(buffer, access);
        (self.automatic && needs_barrier(last, access, BufferAccess::is_write)).then_some(
            BufferBarrier {
                buffer,
                src: last,
                dst: access,
            },
        )
    }

    /// Unconditional transition used by manual barriers.
    pub fn force_image(&mut self, image: ImageHandle, access: ImageAccess) -> ImageBarrier {
        let src = self.images.insert(image, access);
        ImageBarrier {
            image,
            src,
            dst: access,
        }
    }

    /// Bring the tracker in line with a barrier recorded by hand.
    pub fn note_image_barrier(&mut self, barrier: &ImageBarrier) {
        self.images.insert(barrier.image, barrier.dst);
    }

    pub fn note_buffer_barrier(&mut self, barrier: &BufferBarrier) {
        self.buffers.insert(barrier.buffer, barrier.dst);
    }

    pub fn last_image_access(&self, image: ImageHandle) -> Option<ImageAccess> {
        self.images.get(&image).copied()
    }

    pub fn last_buffer_access(&self, buffer: BufferHandle) -> Option<BufferAccess> {
        self.buffers.get(&buffer).copied()
    }

    /// Forget everything; called when recording restarts.
    pub fn reset(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn image() -> ImageHandle {
        let mut images: SlotMap<ImageHandle, ()> = SlotMap::with_key();
        images.insert(())
    }

    #[test]
    fn write_then_read_needs_one_barrier() {
        let mut tracker = HazardTracker::new();
        let target = image();

        let first = tracker.use_image(target, ImageAccess::StorageWrite(ShaderStages::COMPUTE));
        assert_eq!(first.map(|b| b.src), Some(None));

        let read = ImageAccess::SampledRead(ShaderStages::FRAGMENT);
        let barrier = tracker.use_image(target, read).unwrap();
        assert_eq!(barrier.src, Some(ImageAccess::StorageWrite(ShaderStages::COMPUTE)));
        assert_eq!(barrier.dst, read);
    }

    #[test]
    fn repeated_read_is_free() {
        let mut tracker = HazardTracker::new();
        let target = image();
        let read = ImageAccess::SampledRead(ShaderStages::COMPUTE);

        assert!(tracker.use_image(target, read).is_some());
        assert!(tracker.use_image(target, read).is_none());
    }

    #[test]
    fn write_after_write_needs_a_barrier() {
        let mut tracker = HazardTracker::new();
        let target = image();
        let write = ImageAccess::StorageWrite(ShaderStages::COMPUTE);

        tracker.use_image(target, write);
        assert!(tracker.use_image(target, write).is_some());
    }

    #[test]
    fn manual_mode_still_tracks_state() {
        let mut tracker = HazardTracker::new();
        let target = image();
        tracker.set_automatic(false);

        assert!(tracker
            .use_image(target, ImageAccess::ColorAttachment)
            .is_none());
        assert_eq!(
            tracker.last_image_access(target),
            Some(ImageAccess::ColorAttachment)
        );

        tracker.set_automatic(true);
        let barrier = tracker
            .use_image(target, ImageAccess::SampledRead(ShaderStages::FRAGMENT))
            .unwrap();
        assert_eq!(barrier.src, Some(ImageAccess::ColorAttachment));
    }
}
