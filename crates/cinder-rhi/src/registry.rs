//! Arena ownership of every live resource description.
//!
//! Backends keep their native objects in `SecondaryMap`s keyed by the same
//! handles, so a handle that no longer resolves here cannot reach freed
//! native memory either.

use slotmap::SlotMap;

use crate::descriptor::{Binding, BindingKind, BoundResource, DescriptorSetDesc};
use crate::error::{Result, RhiError};
use crate::flags::{BufferUsage, ImageUsage};
use crate::handles::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineHandle, ImageHandle, RenderPassHandle, ResourceKind,
    SamplerHandle, VertexArrayHandle,
};
use crate::info::{
    BufferDesc, ComputePipelineDesc, DescriptorSetLayoutDesc, FramebufferDesc,
    GraphicsPipelineDesc, ImageDesc, RenderPassDesc, SamplerDesc, VertexArrayDesc,
};

macro_rules! arena_accessors {
    ($($field:ident: $handle:ty => $desc:ty, $get:ident, $get_mut:ident, $insert:ident, $remove:ident;)*) => {
        $(
            pub fn $get(&self, handle: $handle) -> Result<&$desc> {
                self.$field
                    .get(handle)
                    .ok_or(RhiError::InvalidHandle(<$handle as ResourceKind>::KIND))
            }

            pub fn $get_mut(&mut self, handle: $handle) -> Result<&mut $desc> {
                self.$field
                    .get_mut(handle)
                    .ok_or(RhiError::InvalidHandle(<$handle as ResourceKind>::KIND))
            }

            pub fn $insert(&mut self, desc: $desc) -> $handle {
                self.$field.insert(desc)
            }

            pub fn $remove(&mut self, handle: $handle) -> Result<$desc> {
                self.$field
                    .remove(handle)
                    .ok_or(RhiError::InvalidHandle(<$handle as ResourceKind>::KIND))
            }
        )*

        /// Total number of live resources of every kind.
        pub fn live_count(&self) -> usize {
            0 $(+ self.$field.len())*
        }
    };
}

/// Backend-neutral descriptions of all live resources of one `Core`.
#[derive(Default)]
pub struct ResourceRegistry {
    buffers: SlotMap<BufferHandle, BufferDesc>,
    images: SlotMap<ImageHandle, ImageDesc>,
    samplers: SlotMap<SamplerHandle, SamplerDesc>,
    render_passes: SlotMap<RenderPassHandle, RenderPassDesc>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferDesc>,
    set_layouts: SlotMap<DescriptorSetLayoutHandle, DescriptorSetLayoutDesc>,
    sets: SlotMap<DescriptorSetHandle, DescriptorSetDesc>,
    graphics_pipelines: SlotMap<GraphicsPipelineHandle, GraphicsPipelineDesc>,
    compute_pipelines: SlotMap<ComputePipelineHandle, ComputePipelineDesc>,
    vertex_arrays: SlotMap<VertexArrayHandle, VertexArrayDesc>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    arena_accessors! {
        buffers: BufferHandle => BufferDesc, buffer, buffer_mut, insert_buffer, remove_buffer;
        images: ImageHandle => ImageDesc, image, image_mut, insert_image, remove_image;
        samplers: SamplerHandle => SamplerDesc, sampler, sampler_mut, insert_sampler, remove_sampler;
        render_passes: RenderPassHandle => RenderPassDesc, render_pass, render_pass_mut, insert_render_pass, remove_render_pass;
        framebuffers: FramebufferHandle => FramebufferDesc, framebuffer, framebuffer_mut, insert_framebuffer, remove_framebuffer;
        set_layouts: DescriptorSetLayoutHandle => DescriptorSetLayoutDesc, set_layout, set_layout_mut, insert_set_layout, remove_set_layout;
        sets: DescriptorSetHandle => DescriptorSetDesc, descriptor_set, descriptor_set_mut, insert_descriptor_set, remove_descriptor_set;
        graphics_pipelines: GraphicsPipelineHandle => GraphicsPipelineDesc, graphics_pipeline, graphics_pipeline_mut, insert_graphics_pipeline, remove_graphics_pipeline;
        compute_pipelines: ComputePipelineHandle => ComputePipelineDesc, compute_pipeline, compute_pipeline_mut, insert_compute_pipeline, remove_compute_pipeline;
        vertex_arrays: VertexArrayHandle => VertexArrayDesc, vertex_array, vertex_array_mut, insert_vertex_array, remove_vertex_array;
    }

    /// Check a framebuffer's attachments against its render pass.
    ///
    /// Counts, formats and presence of depth must match exactly, and every
    /// attachment must be at least as large as the framebuffer.
    pub fn check_framebuffer(&self, desc: &FramebufferDesc) -> Result<()> {
        let pass = self.render_pass(desc.render_pass)?;
        let mismatch = |reason: String| RhiError::IncompatibleFramebuffer {
            framebuffer: desc.debug_name.clone(),
            render_pass: pass.debug_name.clone(),
            reason,
        };

        if desc.color_attachments.len() != pass.color_attachments.len() {
            return Err(mismatch(format!(
                "{} color attachments, render pass declares {}",
                desc.color_attachments.len(),
                pass.color_attachments.len()
            )));
        }
        for (index, (&image, declared)) in desc
            .color_attachments
            .iter()
            .zip(&pass.color_attachments)
            .enumerate()
        {
            let image = self.image(image)?;
            if image.format != declared.format {
                return Err(mismatch(format!(
                    "color {index} is {:?}, render pass declares {:?}",
                    image.format, declared.format
                )));
            }
            if !image.usage.contains(ImageUsage::RENDER_TARGET) {
                return Err(mismatch(format!("'{}' is not a render target", image.debug_name)));
            }
        }

        match (desc.depth_attachment, pass.depth_attachment) {
            (None, None) => {}
            (Some(image), Some(declared)) => {
                let image = self.image(image)?;
                if image.format != declared.format {
                    return Err(mismatch(format!(
                        "depth is {:?}, render pass declares {:?}",
                        image.format, declared.format
                    )));
                }
            }
            (Some(_), None) => return Err(mismatch("unexpected depth attachment".into())),
            (None, Some(_)) => return Err(mismatch("missing depth attachment".into())),
        }

        for handle in desc.attachments() {
            let image = self.image(handle)?;
            if image.width < desc.width || image.height < desc.height {
                return Err(mismatch(format!(
                    "'{}' is {}x{}, smaller than {}x{}",
                    image.debug_name, image.width, image.height, desc.width, desc.height
                )));
            }
        }
        Ok(())
    }

    /// Check that every resource in `bindings` is live and usable as its kind.
    ///
    /// `offset` is only used to report the failing slot.
    pub fn check_binding_resources(
        &self,
        set_name: &str,
        bindings: &[Binding],
        offset: usize,
    ) -> Result<()> {
        for (slot, binding) in bindings.iter().enumerate() {
            let Some(item) = binding.item else {
                continue;
            };
            let bad_usage = |reason: String| RhiError::BindingMismatch {
                set: set_name.to_owned(),
                slot: (offset + slot) as u32,
                reason,
            };
            match item {
                BoundResource::Buffer(handle) => {
                    let buffer = self.buffer(handle)?;
                    let needed = match binding.kind {
                        BindingKind::UniformBuffer => BufferUsage::UNIFORM,
                        _ => BufferUsage::STORAGE,
                    };
                    if !buffer.usage.contains(needed) {
                        return Err(bad_usage(format!(
                            "'{}' lacks {needed:?} usage",
                            buffer.debug_name
                        )));
                    }
                }
                BoundResource::Image(handle) => {
                    let image = self.image(handle)?;
                    let ok = match binding.kind {
                        BindingKind::SampledImage => image.usage.contains(ImageUsage::SAMPLED),
                        BindingKind::StorageImage => image.usage.contains(ImageUsage::STORAGE),
                        BindingKind::DepthImage => {
                            image.format.is_depth() && image.usage.contains(ImageUsage::SAMPLED)
                        }
                        _ => false,
                    };
                    if !ok {
                        return Err(bad_usage(format!(
                            "'{}' ({:?}, {:?}) cannot be bound as {:?}",
                            image.debug_name, image.format, image.usage, binding.kind
                        )));
                    }
                }
                BoundResource::Sampler(handle) => {
                    self.sampler(handle)?;
                }
            }
        }
        Ok(())
    }

    /// Validate and apply a sub-range update to a descriptor set.
    ///
    /// Returns the slots actually written so backends can mirror them.
    pub fn update_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        bindings: &[Binding],
        offset: usize,
    ) -> Result<Vec<(usize, Binding)>> {
        let name = self.descriptor_set(set)?.debug_name.clone();
        self.descriptor_set(set)?.check_update(bindings, offset)?;
        self.check_binding_resources(&name, bindings, offset)?;
        self.descriptor_set_mut(set)?.apply(bindings, offset)
    }

    /// Framebuffers that attach `image`.
    pub fn framebuffers_using(&self, image: ImageHandle) -> Vec<FramebufferHandle> {
        self.framebuffers
            .iter()
            .filter(|(_, fb)| fb.attachments().any(|a| a == image))
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Descriptor sets that reference `item`.
    pub fn sets_referencing(&self, item: BoundResource) -> Vec<DescriptorSetHandle> {
        self.sets
            .iter()
            .filter(|(_, set)| set.references(item))
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn descriptor_set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    /// Handles of every live image, in arena order.
    pub fn image_handles(&self) -> impl Iterator<Item = ImageHandle> + '_ {
        self.images.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::info::{
        AttachmentInfo, FramebufferCreateInfo, ImageCreateInfo, RenderPassCreateInfo,
    };

    fn image(reg: &mut ResourceRegistry, name: &str, format: Format) -> ImageHandle {
        let info = ImageCreateInfo::render_target(name, format, 64, 64);
        reg.insert_image(ImageDesc::from_info(&info).unwrap())
    }

    fn pass(reg: &mut ResourceRegistry) -> RenderPassHandle {
        let colors = [AttachmentInfo::cleared(Format::R16G16B16A16Sfloat)];
        let info = RenderPassCreateInfo {
            debug_name: "Lighting",
            color_attachments: &colors,
            depth_attachment: None,
            debug_color: [1.0, 0.9, 0.5, 1.0],
        };
        reg.insert_render_pass(RenderPassDesc::from_info(&info).unwrap())
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut reg = ResourceRegistry::new();
        let handle = image(&mut reg, "HDR", Format::R16G16B16A16Sfloat);
        reg.remove_image(handle).unwrap();
        assert!(matches!(reg.image(handle), Err(RhiError::InvalidHandle("image"))));
        assert!(matches!(reg.remove_image(handle), Err(RhiError::InvalidHandle(_))));
    }

    #[test]
    fn mismatched_framebuffer_format_is_rejected() {
        let mut reg = ResourceRegistry::new();
        let render_pass = pass(&mut reg);
        let wrong = image(&mut reg, "LDR", Format::R8G8B8A8Unorm);
        let fb = FramebufferDesc::from_info(&FramebufferCreateInfo {
            debug_name: "Main HDR Framebuffer",
            render_pass,
            color_attachments: &[wrong],
            depth_attachment: None,
            width: 64,
            height: 64,
        })
        .unwrap();
        assert!(matches!(
            reg.check_framebuffer(&fb),
            Err(RhiError::IncompatibleFramebuffer { .. })
        ));

        let right = image(&mut reg, "HDR", Format::R16G16B16A16Sfloat);
        let fb = FramebufferDesc {
            color_attachments: vec![right],
            ..fb
        };
        reg.check_framebuffer(&fb).unwrap();
    }

    #[test]
    fn undersized_attachment_is_rejected() {
        let mut reg = ResourceRegistry::new();
        let render_pass = pass(&mut reg);
        let hdr = image(&mut reg, "HDR", Format::R16G16B16A16Sfloat);
        let fb = FramebufferDesc {
            debug_name: "Too Big".into(),
            render_pass,
            color_attachments: vec![hdr],
            depth_attachment: None,
            width: 128,
            height: 64,
        };
        assert!(reg.check_framebuffer(&fb).is_err());
    }

    #[test]
    fn storage_binding_requires_storage_usage() {
        let mut reg = ResourceRegistry::new();
        let target = image(&mut reg, "HDR", Format::R16G16B16A16Sfloat);
        let result = reg.check_binding_resources("Bloom", &[Binding::storage_image(target)], 0);
        assert!(matches!(result, Err(RhiError::BindingMismatch { .. })));
        reg.check_binding_resources("Bloom", &[Binding::sampled_image(target)], 0)
            .unwrap();
    }
}
