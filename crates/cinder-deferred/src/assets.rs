//! Collaborators the renderer draws through: pipeline/texture lookup and the
//! geometry renderer that fills render queues.

use cinder_rhi::{
    BlendState, CommandBuffer, ComputePipelineCreateInfo, ComputePipelineHandle, Core,
    DepthState, DescriptorSetHandle, DescriptorSetLayoutHandle, GraphicsPipelineCreateInfo,
    GraphicsPipelineHandle, ImageHandle, PrimitiveTopology, RasterState, RenderPassHandle,
    ShaderStageInfo, ShaderStages, VertexBindingLayout,
};
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::layouts::DescriptorLayouts;
use crate::passes::RenderPasses;
use crate::quad::quad_vertex_layout;

pub const BLOOM_PIPELINE: &str = "@CORESHADERS/postProcessing/bloom";
pub const SSR_PIPELINE: &str = "@CORESHADERS/postProcessing/screenSpaceReflections";
pub const SSAO_PIPELINE: &str = "@CORESHADERS/postProcessing/screenSpaceAmbientOcclusion";
pub const TONEMAP_PIPELINE: &str = "@CORESHADERS/postProcessing/tonemapping";
pub const DOF_SEPARATION_PIPELINE: &str = "@CORESHADERS/postProcessing/dofSeparation";
pub const DOF_BLUR_PIPELINE: &str = "@CORESHADERS/postProcessing/dofBlur";
pub const DOF_COMBINATION_PIPELINE: &str = "@CORESHADERS/postProcessing/dofCombination";
pub const IBL_PIPELINE: &str = "@CORESHADERS/lighting/ibl";
pub const POINT_LIGHT_PIPELINE: &str = "@CORESHADERS/lighting/point";
pub const SPOT_LIGHT_PIPELINE: &str = "@CORESHADERS/lighting/spot";
pub const DIRECTIONAL_LIGHT_PIPELINE: &str = "@CORESHADERS/lighting/directional";
pub const DEBUG_PIPELINE: &str = "@CORESHADERS/editor/debug";
pub const BRDF_LUT_TEXTURE: &str = "@CORESHADERS/textures/ibl_brdf_lut";

/// Render queue names passed to [`GeometryRenderer::render_queue`].
pub mod queues {
    pub const OPAQUE: &str = "Opaque";
    pub const UNLIT: &str = "Unlit";
    pub const SKY: &str = "Sky";
    pub const TRANSPARENT: &str = "Transparent";
    pub const SHADOW_MAP: &str = "ShadowMap";
}

/// Resolves pipelines and textures by asset address.
///
/// Anything may be missing; the renderer skips the passes that need it.
pub trait PipelineAssets {
    fn graphics_pipeline(&self, address: &str) -> Option<GraphicsPipelineHandle>;
    fn compute_pipeline(&self, address: &str) -> Option<ComputePipelineHandle>;
    fn texture(&self, address: &str) -> Option<ImageHandle>;
}

/// Draws scene geometry into whatever pass the renderer has bound.
pub trait GeometryRenderer<C: Core> {
    /// Set 0 for the next queues. The renderer swaps in a light's shadow set
    /// while rendering shadow maps, then restores the engine set.
    fn set_engine_descriptor_set(&mut self, set: DescriptorSetHandle);

    fn render_queue(
        &mut self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        world: &hecs::World,
        queue: &str,
    ) -> Result<()>;
}

enum PipelineKind<'a> {
    Graphics {
        render_pass: RenderPassHandle,
        set_layouts: &'a [DescriptorSetLayoutHandle],
        vertex_bindings: &'a [VertexBindingLayout],
        blend: BlendState,
    },
    Compute {
        set_layouts: &'a [DescriptorSetLayoutHandle],
    },
}

fn graphics<'a>(
    render_pass: RenderPassHandle,
    set_layouts: &'a [DescriptorSetLayoutHandle],
    vertex_bindings: &'a [VertexBindingLayout],
    blend: BlendState,
) -> PipelineKind<'a> {
    PipelineKind::Graphics {
        render_pass,
        set_layouts,
        vertex_bindings,
        blend,
    }
}

/// The standard pipelines plus any registered textures.
#[derive(Debug, Default)]
pub struct PipelineLibrary {
    graphics: HashMap<String, GraphicsPipelineHandle>,
    compute: HashMap<String, ComputePipelineHandle>,
    textures: HashMap<String, ImageHandle>,
}

impl PipelineLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every standard pipeline whose shader bytes `load` can supply.
    ///
    /// `load` receives an address and a single stage. `output_pass` is the
    /// pass the tonemap and debug pipelines draw into.
    pub fn build<C: Core>(
        core: &mut C,
        layouts: &DescriptorLayouts,
        passes: &RenderPasses,
        output_pass: RenderPassHandle,
        mut load: impl FnMut(&str, ShaderStages) -> Option<Vec<u8>>,
    ) -> Result<Self> {
        let l = layouts;
        let quad = [quad_vertex_layout()];
        let lighting_sets = [l.engine, l.gbuffer, l.ambient_occlusion];
        let point_sets = [l.engine, l.gbuffer, l.point_light];
        let shadowed_sets = [l.engine, l.gbuffer, l.shadowed_light];
        let ssao_sets = [l.engine, l.gbuffer, l.ssao_input];
        let tonemap_sets = [l.engine, l.gbuffer, l.tonemap];
        let debug_sets = [l.engine, l.debug];
        let dof_source_sets = [l.engine, l.dof_source];
        let dof_blur_sets = [l.engine, l.dof_blur];
        let dof_combine_sets = [l.engine, l.gbuffer, l.dof_combine];
        let bloom_sets = [l.bloom];
        let ssr_sets = [l.ssr];

        let table = [
            (IBL_PIPELINE, graphics(passes.lighting, &lighting_sets, &quad, BlendState::ADDITIVE)),
            (POINT_LIGHT_PIPELINE, graphics(passes.lighting, &point_sets, &quad, BlendState::ADDITIVE)),
            (SPOT_LIGHT_PIPELINE, graphics(passes.lighting, &shadowed_sets, &quad, BlendState::ADDITIVE)),
            (
                DIRECTIONAL_LIGHT_PIPELINE,
                graphics(passes.lighting, &shadowed_sets, &quad, BlendState::ADDITIVE),
            ),
            (SSAO_PIPELINE, graphics(passes.ssao, &ssao_sets, &[], BlendState::OPAQUE)),
            (TONEMAP_PIPELINE, graphics(output_pass, &tonemap_sets, &[], BlendState::OPAQUE)),
            (DEBUG_PIPELINE, graphics(output_pass, &debug_sets, &[], BlendState::OPAQUE)),
            (
                DOF_SEPARATION_PIPELINE,
                graphics(passes.dof_separation, &dof_source_sets, &[], BlendState::OPAQUE),
            ),
            (DOF_BLUR_PIPELINE, graphics(passes.dof_blur, &dof_blur_sets, &[], BlendState::OPAQUE)),
            (
                DOF_COMBINATION_PIPELINE,
                graphics(passes.dof_combine, &dof_combine_sets, &[], BlendState::ALPHA),
            ),
            (BLOOM_PIPELINE, PipelineKind::Compute { set_layouts: &bloom_sets }),
            (SSR_PIPELINE, PipelineKind::Compute { set_layouts: &ssr_sets }),
        ];

        let mut library = Self::new();
        for (address, kind) in table {
            match kind {
                PipelineKind::Graphics {
                    render_pass,
                    set_layouts,
                    vertex_bindings,
                    blend,
                } => {
                    let (Some(vertex), Some(fragment)) = (
                        load(address, ShaderStages::VERTEX),
                        load(address, ShaderStages::FRAGMENT),
                    ) else {
                        debug!("No shader code for {address}, pipeline left absent");
                        continue;
                    };
                    let stages = [
                        ShaderStageInfo::new(ShaderStages::VERTEX, &vertex),
                        ShaderStageInfo::new(ShaderStages::FRAGMENT, &fragment),
                    ];
                    let pipeline = core.create_graphics_pipeline(&GraphicsPipelineCreateInfo {
                        debug_name: address,
                        stages: &stages,
                        vertex_bindings,
                        set_layouts,
                        render_pass,
                        topology: PrimitiveTopology::TriangleList,
                        raster: RasterState::default(),
                        depth: DepthState::DISABLED,
                        blend: &[blend],
                    })?;
                    library.graphics.insert(address.to_owned(), pipeline);
                }
                PipelineKind::Compute { set_layouts } => {
                    let Some(code) = load(address, ShaderStages::COMPUTE) else {
                        debug!("No shader code for {address}, pipeline left absent");
                        continue;
                    };
                    let pipeline = core.create_compute_pipeline(&ComputePipelineCreateInfo {
                        debug_name: address,
                        stage: ShaderStageInfo::new(ShaderStages::COMPUTE, &code),
                        set_layouts,
                    })?;
                    library.compute.insert(address.to_owned(), pipeline);
                }
            }
        }

        info!(
            "Built {} graphics and {} compute pipelines",
            library.graphics.len(),
            library.compute.len()
        );
        Ok(library)
    }

    /// Make a texture resolvable by address. The caller keeps ownership.
    pub fn insert_texture(&mut self, address: impl Into<String>, image: ImageHandle) {
        self.textures.insert(address.into(), image);
    }

    pub fn remove_texture(&mut self, address: &str) -> Option<ImageHandle> {
        self.textures.remove(address)
    }

    pub fn pipeline_count(&self) -> usize {
        self.graphics.len() + self.compute.len()
    }

    /// Delete every pipeline. Registered textures are left alone.
    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        for (_, pipeline) in self.graphics.drain() {
            core.delete_graphics_pipeline(pipeline)?;
        }
        for (_, pipeline) in self.compute.drain() {
            core.delete_compute_pipeline(pipeline)?;
        }
        self.textures.clear();
        Ok(())
    }
}

impl PipelineAssets for PipelineLibrary {
    fn graphics_pipeline(&self, address: &str) -> Option<GraphicsPipelineHandle> {
        self.graphics.get(address).copied()
    }

    fn compute_pipeline(&self, address: &str) -> Option<ComputePipelineHandle> {
        self.compute.get(address).copied()
    }

    fn texture(&self, address: &str) -> Option<ImageHandle> {
        self.textures.get(address).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::headless::HeadlessCore;
    use cinder_rhi::{AttachmentInfo, Format, RenderPassCreateInfo};

    fn output_pass(core: &mut HeadlessCore) -> RenderPassHandle {
        core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Output",
            color_attachments: &[AttachmentInfo::cleared(Format::B8G8R8A8Unorm)],
            depth_attachment: None,
            debug_color: [1.0; 4],
        })
        .unwrap()
    }

    #[test]
    fn missing_shaders_leave_pipelines_absent() {
        let mut core = HeadlessCore::new();
        let layouts = DescriptorLayouts::new(&mut core).unwrap();
        let passes = RenderPasses::new(&mut core).unwrap();
        let output = output_pass(&mut core);

        let library = PipelineLibrary::build(&mut core, &layouts, &passes, output, |address, _| {
            (address == BLOOM_PIPELINE || address == TONEMAP_PIPELINE).then(|| vec![0x07, 0x23, 0x02, 0x03])
        })
        .unwrap();

        assert_eq!(library.pipeline_count(), 2);
        assert!(library.compute_pipeline(BLOOM_PIPELINE).is_some());
        assert!(library.graphics_pipeline(TONEMAP_PIPELINE).is_some());
        assert!(library.graphics_pipeline(SSAO_PIPELINE).is_none());
        assert!(library.compute_pipeline(SSR_PIPELINE).is_none());
    }

    #[test]
    fn every_standard_pipeline_builds() {
        let mut core = HeadlessCore::new();
        let layouts = DescriptorLayouts::new(&mut core).unwrap();
        let passes = RenderPasses::new(&mut core).unwrap();
        let output = output_pass(&mut core);

        let mut library =
            PipelineLibrary::build(&mut core, &layouts, &passes, output, |_, _| Some(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(library.pipeline_count(), 12);

        library.destroy(&mut core).unwrap();
        assert_eq!(core.stats().deleted("graphics pipeline"), 10);
        assert_eq!(core.stats().deleted("compute pipeline"), 2);
    }
}
