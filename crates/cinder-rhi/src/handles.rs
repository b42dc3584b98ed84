//! Typed generational handles for every resource kind.
//!
//! A handle is an index plus a generation. Deleting a resource bumps the
//! generation of its slot, so stale copies of the handle stop resolving.

use slotmap::new_key_type;

new_key_type! {
    pub struct BufferHandle;
    pub struct ImageHandle;
    pub struct SamplerHandle;
    pub struct RenderPassHandle;
    pub struct FramebufferHandle;
    pub struct DescriptorSetLayoutHandle;
    pub struct DescriptorSetHandle;
    pub struct GraphicsPipelineHandle;
    pub struct ComputePipelineHandle;
    pub struct VertexArrayHandle;
}

/// Human-readable kind name, used in error messages.
pub trait ResourceKind {
    const KIND: &'static str;
}

macro_rules! resource_kind {
    ($($handle:ty => $name:literal),* $(,)?) => {
        $(impl ResourceKind for $handle {
            const KIND: &'static str = $name;
        })*
    };
}

resource_kind! {
    BufferHandle => "buffer",
    ImageHandle => "image",
    SamplerHandle => "sampler",
    RenderPassHandle => "render pass",
    FramebufferHandle => "framebuffer",
    DescriptorSetLayoutHandle => "descriptor set layout",
    DescriptorSetHandle => "descriptor set",
    GraphicsPipelineHandle => "graphics pipeline",
    ComputePipelineHandle => "compute pipeline",
    VertexArrayHandle => "vertex array",
}
