//! Descriptor set layouts shared by every image set and pipeline.

use cinder_rhi::{
    BindingKind, Core, DescriptorSetLayoutCreateInfo, DescriptorSetLayoutHandle, LayoutBinding,
    ShaderStages,
};

use crate::error::Result;

const FRAGMENT: ShaderStages = ShaderStages::FRAGMENT;
const COMPUTE: ShaderStages = ShaderStages::COMPUTE;

/// Every layout the renderer binds.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorLayouts {
    /// `{0: EngineUbo}`
    pub engine: DescriptorSetLayoutHandle,
    /// `{0 sampler, 1 depth, 2 albedo, 3 normal, 4 specular+roughness}`
    pub gbuffer: DescriptorSetLayoutHandle,
    /// `{0 sampler, 1 lit HDR, 2 bloom, 3 post UBO}`
    pub tonemap: DescriptorSetLayoutHandle,
    /// `{0 sampler, 1 depth, 2 albedo, 3 normal, 4 specular+roughness, 5 AO, 6 DebugUbo}`
    pub debug: DescriptorSetLayoutHandle,
    /// `{0 sampler, 1 noise, 2 SsaoUbo}`
    pub ssao_input: DescriptorSetLayoutHandle,
    /// `{0 AO, 1 BRDF LUT, 2 environment map}`
    pub ambient_occlusion: DescriptorSetLayoutHandle,
    pub point_light: DescriptorSetLayoutHandle,
    /// `{0 light UBO, 1 shadow map}`
    pub shadowed_light: DescriptorSetLayoutHandle,
    /// `{0 ShadowUbo}`, vertex only.
    pub shadow: DescriptorSetLayoutHandle,
    pub bloom: DescriptorSetLayoutHandle,
    pub ssr: DescriptorSetLayoutHandle,
    pub dof_source: DescriptorSetLayoutHandle,
    pub dof_blur: DescriptorSetLayoutHandle,
    pub dof_combine: DescriptorSetLayoutHandle,
}

fn layout<C: Core>(
    core: &mut C,
    debug_name: &str,
    bindings: &[LayoutBinding],
) -> Result<DescriptorSetLayoutHandle> {
    Ok(core.create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo {
        debug_name,
        bindings,
    })?)
}

impl DescriptorLayouts {
    pub fn new<C: Core>(core: &mut C) -> Result<Self> {
        use BindingKind::{DepthImage, SampledImage, Sampler, StorageImage, UniformBuffer};
        let b = LayoutBinding::new;

        let engine = layout(
            core,
            "Engine UBO Set Layout",
            &[b(0, UniformBuffer, ShaderStages::VERTEX | FRAGMENT)],
        )?;
        let gbuffer = layout(
            core,
            "GBuffer Descriptor Set Layout",
            &[
                b(0, Sampler, FRAGMENT),
                b(1, DepthImage, FRAGMENT),
                b(2, SampledImage, FRAGMENT),
                b(3, SampledImage, FRAGMENT),
                b(4, SampledImage, FRAGMENT),
            ],
        )?;
        let tonemap = layout(
            core,
            "Tonemap Descriptor Set Layout",
            &[
                b(0, Sampler, FRAGMENT),
                b(1, SampledImage, FRAGMENT),
                b(2, SampledImage, FRAGMENT),
                b(3, UniformBuffer, FRAGMENT),
            ],
        )?;
        let debug = layout(
            core,
            "Debug Descriptor Set Layout",
            &[
                b(0, Sampler, FRAGMENT),
                b(1, DepthImage, FRAGMENT),
                b(2, SampledImage, FRAGMENT),
                b(3, SampledImage, FRAGMENT),
                b(4, SampledImage, FRAGMENT),
                b(5, SampledImage, FRAGMENT),
                b(6, UniformBuffer, FRAGMENT),
            ],
        )?;
        let ssao_input = layout(
            core,
            "SSAO Input Descriptor Set Layout",
            &[
                b(0, Sampler, FRAGMENT),
                b(1, SampledImage, FRAGMENT),
                b(2, UniformBuffer, FRAGMENT),
            ],
        )?;
        let ambient_occlusion = layout(
            core,
            "Ambient Occlusion Descriptor Set Layout",
            &[
                b(0, SampledImage, FRAGMENT),
                b(1, SampledImage, FRAGMENT),
                b(2, SampledImage, FRAGMENT),
            ],
        )?;
        let point_light = layout(
            core,
            "Pointlight UBO Descriptor Set Layout",
            &[b(0, UniformBuffer, FRAGMENT)],
        )?;
        let shadowed_light = layout(
            core,
            "Shadowmapped Light Descriptor Set Layout",
            &[b(0, UniformBuffer, FRAGMENT), b(1, DepthImage, FRAGMENT)],
        )?;
        let shadow = layout(
            core,
            "Shadow Map Descriptor Set Layout",
            &[b(0, UniformBuffer, ShaderStages::VERTEX)],
        )?;
        let bloom = layout(
            core,
            "Bloom Descriptor Set Layout",
            &[
                b(0, UniformBuffer, COMPUTE),
                b(1, Sampler, COMPUTE),
                b(2, StorageImage, COMPUTE),
                b(3, SampledImage, COMPUTE),
                b(4, SampledImage, COMPUTE),
            ],
        )?;
        let ssr = layout(
            core,
            "SSR Descriptor Set Layout",
            &[
                b(0, UniformBuffer, COMPUTE),
                b(1, StorageImage, COMPUTE),
                b(2, SampledImage, COMPUTE),
                b(3, DepthImage, COMPUTE),
                b(4, SampledImage, COMPUTE),
                b(5, SampledImage, COMPUTE),
            ],
        )?;
        let dof_source = layout(
            core,
            "Depth of Field Source Descriptor Layout",
            &[b(0, DepthImage, FRAGMENT), b(1, SampledImage, FRAGMENT)],
        )?;
        let dof_blur = layout(
            core,
            "Depth of Field Blur Descriptor Layout",
            &[b(0, SampledImage, FRAGMENT)],
        )?;
        let dof_combine = layout(
            core,
            "Depth of Field Combination Descriptor Layout",
            &[b(0, SampledImage, FRAGMENT), b(1, SampledImage, FRAGMENT)],
        )?;

        Ok(Self {
            engine,
            gbuffer,
            tonemap,
            debug,
            ssao_input,
            ambient_occlusion,
            point_light,
            shadowed_light,
            shadow,
            bloom,
            ssr,
            dof_source,
            dof_blur,
            dof_combine,
        })
    }

    pub fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        for layout in [
            self.dof_combine,
            self.dof_blur,
            self.dof_source,
            self.ssr,
            self.bloom,
            self.shadow,
            self.shadowed_light,
            self.point_light,
            self.ambient_occlusion,
            self.ssao_input,
            self.debug,
            self.tonemap,
            self.gbuffer,
            self.engine,
        ] {
            core.delete_descriptor_set_layout(layout)?;
        }
        Ok(())
    }
}
