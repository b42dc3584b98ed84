//! Descriptor set layouts and bindings.
//!
//! The explicit set/slot model is used on every backend. OpenGL and D3D11
//! flatten `(set, binding)` onto their own slot tables internally.

use crate::error::{Result, RhiError};
use crate::flags::ShaderStages;
use crate::handles::{BufferHandle, DescriptorSetLayoutHandle, ImageHandle, SamplerHandle};
use crate::info::DescriptorSetLayoutDesc;

/// What a layout slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    /// A standalone sampler.
    Sampler,
    /// An image read through a sampler.
    SampledImage,
    /// A read-write image. Vulkan keeps these in the GENERAL layout.
    StorageImage,
    /// A depth image sampled in a read-only depth layout.
    DepthImage,
}

impl BindingKind {
    pub const fn is_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }

    pub const fn is_image(self) -> bool {
        matches!(self, Self::SampledImage | Self::StorageImage | Self::DepthImage)
    }
}

/// One slot of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    /// Descriptors in the slot. Layouts only accept 1.
    pub count: u32,
    pub kind: BindingKind,
    pub stages: ShaderStages,
}

impl LayoutBinding {
    pub const fn new(binding: u32, kind: BindingKind, stages: ShaderStages) -> Self {
        Self {
            binding,
            count: 1,
            kind,
            stages,
        }
    }
}

/// A concrete resource placed in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundResource {
    Buffer(BufferHandle),
    Image(ImageHandle),
    Sampler(SamplerHandle),
}

/// A slot update: the declared kind plus an optional resource.
///
/// `item: None` leaves whatever the slot held before untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Binding {
    pub kind: BindingKind,
    pub item: Option<BoundResource>,
}

impl Binding {
    pub const fn empty(kind: BindingKind) -> Self {
        Self { kind, item: None }
    }

    pub const fn uniform_buffer(buffer: BufferHandle) -> Self {
        Self {
            kind: BindingKind::UniformBuffer,
            item: Some(BoundResource::Buffer(buffer)),
        }
    }

    pub const fn storage_buffer(buffer: BufferHandle) -> Self {
        Self {
            kind: BindingKind::StorageBuffer,
            item: Some(BoundResource::Buffer(buffer)),
        }
    }

    pub const fn sampler(sampler: SamplerHandle) -> Self {
        Self {
            kind: BindingKind::Sampler,
            item: Some(BoundResource::Sampler(sampler)),
        }
    }

    pub const fn sampled_image(image: ImageHandle) -> Self {
        Self {
            kind: BindingKind::SampledImage,
            item: Some(BoundResource::Image(image)),
        }
    }

    pub const fn storage_image(image: ImageHandle) -> Self {
        Self {
            kind: BindingKind::StorageImage,
            item: Some(BoundResource::Image(image)),
        }
    }

    pub const fn depth_image(image: ImageHandle) -> Self {
        Self {
            kind: BindingKind::DepthImage,
            item: Some(BoundResource::Image(image)),
        }
    }

    /// Same kind, resource optional.
    pub const fn sampled_image_opt(image: Option<ImageHandle>) -> Self {
        match image {
            Some(image) => Self::sampled_image(image),
            None => Self::empty(BindingKind::SampledImage),
        }
    }
}

/// Current contents of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotState {
    pub binding: u32,
    pub kind: BindingKind,
    pub item: Option<BoundResource>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetDesc {
    pub debug_name: String,
    pub layout: DescriptorSetLayoutHandle,
    /// One entry per layout binding, in layout order.
    pub slots: Vec<SlotState>,
}

impl DescriptorSetDesc {
    /// Empty set shaped after `layout`.
    pub fn new(debug_name: &str, layout: DescriptorSetLayoutHandle, layout_desc: &DescriptorSetLayoutDesc) -> Self {
        Self {
            debug_name: debug_name.to_owned(),
            layout,
            slots: layout_desc
                .bindings
                .iter()
                .map(|b| SlotState {
                    binding: b.binding,
                    kind: b.kind,
                    item: None,
                })
                .collect(),
        }
    }

    /// Check that `bindings` may be written starting at layout index `offset`.
    pub fn check_update(&self, bindings: &[Binding], offset: usize) -> Result<()> {
        if offset + bindings.len() > self.slots.len() {
            return Err(RhiError::BindingMismatch {
                set: self.debug_name.clone(),
                slot: (offset + bindings.len()) as u32,
                reason: format!(
                    "update of {} bindings at offset {offset} overruns a layout of {}",
                    bindings.len(),
                    self.slots.len()
                ),
            });
        }
        for (binding, slot) in bindings.iter().zip(&self.slots[offset..]) {
            if binding.kind != slot.kind {
                return Err(RhiError::BindingMismatch {
                    set: self.debug_name.clone(),
                    slot: slot.binding,
                    reason: format!("layout declares {:?}, got {:?}", slot.kind, binding.kind),
                });
            }
            let fits = match binding.item {
                None => true,
                Some(BoundResource::Buffer(_)) => binding.kind.is_buffer(),
                Some(BoundResource::Image(_)) => binding.kind.is_image(),
                Some(BoundResource::Sampler(_)) => binding.kind == BindingKind::Sampler,
            };
            if !fits {
                return Err(RhiError::BindingMismatch {
                    set: self.debug_name.clone(),
                    slot: slot.binding,
                    reason: format!("{:?} cannot hold {:?}", binding.kind, binding.item),
                });
            }
        }
        Ok(())
    }

    /// Write `bindings` starting at layout index `offset`, skipping `None` items.
    ///
    /// Returns the `(slot index, binding)` pairs that were actually written.
    pub fn apply(&mut self, bindings: &[Binding], offset: usize) -> Result<Vec<(usize, Binding)>> {
        self.check_update(bindings, offset)?;
        let mut written = Vec::with_capacity(bindings.len());
        for (i, binding) in bindings.iter().enumerate() {
            if let Some(item) = binding.item {
                self.slots[offset + i].item = Some(item);
                written.push((offset + i, *binding));
            }
        }
        Ok(written)
    }

    /// First slot with nothing bound, if any.
    pub fn first_empty_slot(&self) -> Option<&SlotState> {
        self.slots.iter().find(|s| s.item.is_none())
    }

    /// Whether any slot references `item`.
    pub fn references(&self, item: BoundResource) -> bool {
        self.slots.iter().any(|s| s.item == Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn layout() -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc {
            debug_name: "Ambient Occlusion".into(),
            bindings: vec![
                LayoutBinding::new(0, BindingKind::SampledImage, ShaderStages::FRAGMENT),
                LayoutBinding::new(1, BindingKind::SampledImage, ShaderStages::FRAGMENT),
                LayoutBinding::new(2, BindingKind::SampledImage, ShaderStages::FRAGMENT),
            ],
        }
    }

    #[test]
    fn none_items_keep_the_previous_binding() {
        let mut images: SlotMap<ImageHandle, ()> = SlotMap::with_key();
        let first = images.insert(());
        let second = images.insert(());

        let mut set = DescriptorSetDesc::new("AO", DescriptorSetLayoutHandle::default(), &layout());
        set.apply(&[Binding::sampled_image(first); 3], 0).unwrap();

        let written = set
            .apply(
                &[
                    Binding::empty(BindingKind::SampledImage),
                    Binding::sampled_image(second),
                ],
                1,
            )
            .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(set.slots[1].item, Some(BoundResource::Image(first)));
        assert_eq!(set.slots[2].item, Some(BoundResource::Image(second)));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut buffers: SlotMap<BufferHandle, ()> = SlotMap::with_key();
        let ubo = buffers.insert(());

        let mut set = DescriptorSetDesc::new("AO", DescriptorSetLayoutHandle::default(), &layout());
        let err = set.apply(&[Binding::uniform_buffer(ubo)], 0).unwrap_err();
        assert!(matches!(err, RhiError::BindingMismatch { slot: 0, .. }));
        assert!(set.slots[0].item.is_none());
    }

    #[test]
    fn overrun_is_rejected() {
        let set = DescriptorSetDesc::new("AO", DescriptorSetLayoutHandle::default(), &layout());
        let update = [Binding::empty(BindingKind::SampledImage); 2];
        assert!(set.check_update(&update, 2).is_err());
    }
}
