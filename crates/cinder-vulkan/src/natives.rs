//! Native objects keyed by the same handles as the resource registry.

use ash::vk;
use cinder_rhi::handles::ResourceKind;
use cinder_rhi::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineHandle, ImageHandle, RenderPassHandle, SamplerHandle,
};
use slotmap::{Key, SecondaryMap};

use crate::error::{Result, VulkanError};
use crate::memory::{NativeBuffer, NativeImage};
use crate::pipeline::NativePipeline;
use crate::render_pass::NativeRenderPass;

#[derive(Default)]
pub struct NativeObjects {
    pub buffers: SecondaryMap<BufferHandle, NativeBuffer>,
    pub images: SecondaryMap<ImageHandle, NativeImage>,
    pub samplers: SecondaryMap<SamplerHandle, vk::Sampler>,
    pub render_passes: SecondaryMap<RenderPassHandle, NativeRenderPass>,
    pub framebuffers: SecondaryMap<FramebufferHandle, vk::Framebuffer>,
    pub set_layouts: SecondaryMap<DescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    pub sets: SecondaryMap<DescriptorSetHandle, vk::DescriptorSet>,
    pub graphics_pipelines: SecondaryMap<GraphicsPipelineHandle, NativePipeline>,
    pub compute_pipelines: SecondaryMap<ComputePipelineHandle, NativePipeline>,
}

/// Look up the native object behind `handle`.
pub fn native<K: Key + ResourceKind, V>(map: &SecondaryMap<K, V>, handle: K) -> Result<&V> {
    map.get(handle).ok_or(VulkanError::MissingNative(K::KIND))
}

pub fn native_mut<K: Key + ResourceKind, V>(map: &mut SecondaryMap<K, V>, handle: K) -> Result<&mut V> {
    map.get_mut(handle).ok_or(VulkanError::MissingNative(K::KIND))
}
