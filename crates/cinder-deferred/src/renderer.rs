//! The deferred frame: shadows, G-buffer, SSAO, lighting, post-processing.

use cinder_core::math::near_far_from_projection;
use cinder_core::EnvironmentMap;
use cinder_rhi::{
    ClearColor, ClearDepthStencil, CommandBuffer, Core, DescriptorSetHandle, FramebufferHandle,
    GraphicsPipelineHandle, ImageAccess, RenderPassHandle, ResourceRegistry,
    SamplerCreateInfo, SamplerHandle, Scissor, ShaderStages, TextureFilter, TextureWrapMode,
    Viewport,
};
use glam::{Mat4, Vec2, Vec3};
use hecs::World;
use tracing::{debug, info};

use crate::assets::{
    queues, GeometryRenderer, PipelineAssets, PipelineLibrary, BLOOM_PIPELINE, BRDF_LUT_TEXTURE,
    DEBUG_PIPELINE, DIRECTIONAL_LIGHT_PIPELINE, DOF_BLUR_PIPELINE, DOF_COMBINATION_PIPELINE,
    DOF_SEPARATION_PIPELINE, IBL_PIPELINE, POINT_LIGHT_PIPELINE, SPOT_LIGHT_PIPELINE,
    SSAO_PIPELINE, SSR_PIPELINE, TONEMAP_PIPELINE,
};
use crate::bloom::{bloom_mip_count, BloomLevels};
use crate::config::{PostProcessSettings, RendererConfig};
use crate::dof::DofPipelines;
use crate::error::{RenderError, Result};
use crate::image_set::{ambient_occlusion_extent, ImageSet, ImageSetContext};
use crate::layouts::DescriptorLayouts;
use crate::lights::LightCache;
use crate::passes::RenderPasses;
use crate::quad::FullscreenQuad;
use crate::render_mode::DeferredRenderMode;
use crate::ssao::SsaoInputs;
use crate::uniforms::{DebugUbo, EngineUbo, PostProcessUbo};

const OUTPUT_CLEAR: ClearColor = ClearColor([0.3, 0.6, 0.9, 1.0]);
const UNOCCLUDED: ClearColor = ClearColor([1.0; 4]);
const LIGHTING_DEBUG_COLOR: [f32; 4] = [1.0, 1.0, 0.75, 1.0];
const SSR_DEBUG_COLOR: [f32; 4] = [0.5, 0.8, 1.0, 1.0];

/// Per-frame inputs from the application.
#[derive(Clone, Copy, Debug)]
pub struct FrameInput {
    /// GL-style projection; the core adjusts it for its clip space.
    pub projection: Mat4,
    pub view: Mat4,
    pub eye: Vec3,
    pub time: f32,
    /// Frame-in-flight index, selects the image set.
    pub frame_index: usize,
    pub output_framebuffer: FramebufferHandle,
    /// Pass the output framebuffer was built for.
    pub output_render_pass: RenderPassHandle,
}

fn read_gbuffer(cmd: &mut CommandBuffer, set: &ImageSet, stages: ShaderStages) -> Result<()> {
    for image in [set.gbuffer.albedo, set.gbuffer.normal, set.gbuffer.specular_roughness] {
        cmd.use_image(image, ImageAccess::SampledRead(stages))?;
    }
    cmd.use_image(set.gbuffer.depth, ImageAccess::DepthRead)?;
    Ok(())
}

fn set_full_viewport(cmd: &mut CommandBuffer, (width, height): (u32, u32)) -> Result<()> {
    cmd.set_viewport(Viewport::from_size(width, height))?;
    cmd.set_scissor(Scissor::from_size(width, height))?;
    Ok(())
}

/// Deferred renderer with per-frame-in-flight image sets.
///
/// Targets are allocated at `framebuffer_size` and the frame is drawn into
/// the top-left `render_size` of them, so shrinking the window only
/// rewrites uniforms.
pub struct DeferredRenderer {
    config: RendererConfig,
    post_process: PostProcessSettings,
    render_mode: DeferredRenderMode,
    framebuffer_size: (u32, u32),
    render_size: (u32, u32),
    bloom_levels: BloomLevels,

    ssao: SsaoInputs,
    quad: FullscreenQuad,
    passes: RenderPasses,
    layouts: DescriptorLayouts,
    screen_sampler: SamplerHandle,
    image_sets: Vec<ImageSet>,
    lights: LightCache,
}

impl DeferredRenderer {
    pub fn new<C: Core>(core: &mut C, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let framebuffer_size = (config.width, config.height);

        let mut ssao = SsaoInputs::new(core, &config)?;
        let quad = FullscreenQuad::new(core)?;
        let passes = RenderPasses::new(core)?;
        let layouts = DescriptorLayouts::new(core)?;
        ssao.create_descriptor_set(core, layouts.ssao_input)?;
        let screen_sampler = core.create_sampler(
            &SamplerCreateInfo::new("Screen Sampler")
                .with_filter(TextureFilter::Linear)
                .with_wrap(TextureWrapMode::Repeat),
        )?;

        let mips = bloom_mip_count(config.width, config.height);
        let bloom_levels = BloomLevels {
            stored: mips.max(2),
            active: mips,
        };
        let post_process = PostProcessSettings::default();
        let threshold_filter = config.bloom_threshold_filter();

        let ctx = ImageSetContext {
            passes: &passes,
            layouts: &layouts,
            screen_sampler,
            framebuffer: framebuffer_size,
            bloom_levels,
            threshold_filter,
            post_process: PostProcessUbo::from(&post_process),
        };
        let mut image_sets = Vec::with_capacity(config.max_frames_in_flight);
        for index in 0..config.max_frames_in_flight {
            let set = ImageSet::new(core, &ctx, index)?;
            set.bloom
                .update_uniforms(core, bloom_levels, framebuffer_size, framebuffer_size, threshold_filter)?;
            set.bloom.rebind_first_upsample(core, bloom_levels)?;
            image_sets.push(set);
        }

        info!(
            "Created deferred renderer: {} image sets, {} bloom levels",
            image_sets.len(),
            bloom_levels.stored
        );
        Ok(Self {
            config,
            post_process,
            render_mode: DeferredRenderMode::Default,
            framebuffer_size,
            render_size: framebuffer_size,
            bloom_levels,
            ssao,
            quad,
            passes,
            layouts,
            screen_sampler,
            image_sets,
            lights: LightCache::new(),
        })
    }

    /// Build the standard pipelines against this renderer's layouts and passes.
    pub fn build_pipelines<C: Core>(
        &self,
        core: &mut C,
        output_pass: RenderPassHandle,
        load: impl FnMut(&str, ShaderStages) -> Option<Vec<u8>>,
    ) -> Result<PipelineLibrary> {
        PipelineLibrary::build(core, &self.layouts, &self.passes, output_pass, load)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn layouts(&self) -> &DescriptorLayouts {
        &self.layouts
    }

    pub fn render_passes(&self) -> &RenderPasses {
        &self.passes
    }

    pub fn render_modes(&self) -> &'static [DeferredRenderMode] {
        &DeferredRenderMode::ALL
    }

    pub fn render_mode(&self) -> DeferredRenderMode {
        self.render_mode
    }

    pub fn set_render_mode(&mut self, mode: DeferredRenderMode) {
        if mode != self.render_mode {
            info!("Render mode: {mode}");
        }
        self.render_mode = mode;
    }

    pub fn post_process(&self) -> &PostProcessSettings {
        &self.post_process
    }

    /// Takes effect on the next frame.
    pub fn set_post_process(&mut self, settings: PostProcessSettings) {
        self.post_process = settings;
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    pub fn render_size(&self) -> (u32, u32) {
        self.render_size
    }

    pub fn bloom_levels(&self) -> BloomLevels {
        self.bloom_levels
    }

    pub fn lights(&self) -> &LightCache {
        &self.lights
    }

    pub fn image_set_count(&self) -> usize {
        self.image_sets.len()
    }

    pub fn image_set(&self, index: usize) -> Result<&ImageSet> {
        self.image_sets.get(index).ok_or(RenderError::ImageSetOutOfRange {
            index,
            count: self.image_sets.len(),
        })
    }

    /// Record one frame into `cmd`, ending in the output framebuffer.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn render<C: Core, A: PipelineAssets, G: GeometryRenderer<C>>(
        &mut self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        world: &World,
        frame: &FrameInput,
        assets: &A,
        geometry: &mut G,
    ) -> Result<()> {
        let index = frame.frame_index % self.image_sets.len();
        self.sync_environment(core, world, assets, index)?;
        self.lights.sync(core, world, &self.layouts)?;

        let set = &self.image_sets[index];
        let mut projection = frame.projection;
        core.adjust_perspective(&mut projection);
        self.upload_engine_ubo(core, set, frame, projection)?;

        let lit = self.render_mode == DeferredRenderMode::Default;
        if lit {
            self.render_shadows(core, cmd, world, geometry)?;
        }
        geometry.set_engine_descriptor_set(set.engine_set);

        cmd.bind_render_pass(
            core.resources(),
            self.passes.gbuffer,
            set.gbuffer.framebuffer,
            self.render_size.0,
            self.render_size.1,
            &[ClearColor::BLACK; 3],
            Some(ClearDepthStencil::FAR),
        )?;
        set_full_viewport(cmd, self.render_size)?;
        geometry.render_queue(core, cmd, world, queues::OPAQUE)?;
        cmd.unbind_render_pass()?;

        if self.render_mode.needs_ambient_occlusion() {
            self.render_ssao(core.resources(), cmd, set, assets)?;
        }
        self.render_lighting(core, cmd, world, set, assets, geometry)?;

        if lit {
            self.render_post_processing(core, cmd, set, frame, assets)
        } else {
            self.render_debug(core, cmd, set, frame, assets)
        }
    }

    /// Resolve the BRDF lookup table and the scene's environment map and
    /// bring image set `index` up to date with them. Every other set catches
    /// up when its own frame is recorded.
    fn sync_environment<C: Core, A: PipelineAssets>(
        &mut self,
        core: &mut C,
        world: &World,
        assets: &A,
        index: usize,
    ) -> Result<()> {
        let brdf_lut = assets.texture(BRDF_LUT_TEXTURE);
        let environment_map = world
            .query::<&EnvironmentMap>()
            .iter()
            .next()
            .and_then(|(_, map)| assets.texture(&map.specular_texture));
        if self.image_sets[index].bind_environment(core, brdf_lut, environment_map)? {
            debug!("Rebound IBL inputs of image set {index}: brdf {brdf_lut:?}, environment {environment_map:?}");
        }
        Ok(())
    }

    fn upload_engine_ubo<C: Core>(&self, core: &mut C, set: &ImageSet, frame: &FrameInput, projection: Mat4) -> Result<()> {
        let framebuffer = Vec2::new(self.framebuffer_size.0 as f32, self.framebuffer_size.1 as f32);
        let render = Vec2::new(self.render_size.0 as f32, self.render_size.1 as f32);
        let ubo = EngineUbo {
            projection,
            view: frame.view,
            inverse_projection: projection.inverse(),
            inverse_view: frame.view.inverse(),
            eye_position: frame.eye.extend(1.0),
            framebuffer_resolution: framebuffer,
            render_resolution: render,
            render_scale: render / framebuffer,
            time: frame.time,
            _pad0: 0.0,
        };
        core.upload_pod(set.engine_ubo, &ubo)?;
        Ok(())
    }

    fn render_shadows<C: Core, G: GeometryRenderer<C>>(
        &self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        world: &World,
        geometry: &mut G,
    ) -> Result<()> {
        for light in self.lights.shadowed_lights() {
            let extent = (light.resolution, light.resolution);
            geometry.set_engine_descriptor_set(light.shadow_set);
            cmd.bind_render_pass(
                core.resources(),
                light.shadow_pass,
                light.shadow_framebuffer,
                extent.0,
                extent.1,
                &[],
                Some(ClearDepthStencil::FAR),
            )?;
            set_full_viewport(cmd, extent)?;
            geometry.render_queue(core, cmd, world, queues::SHADOW_MAP)?;
            cmd.unbind_render_pass()?;
        }
        Ok(())
    }

    fn render_ssao<A: PipelineAssets>(
        &self,
        resources: &ResourceRegistry,
        cmd: &mut CommandBuffer,
        set: &ImageSet,
        assets: &A,
    ) -> Result<()> {
        let extent = ambient_occlusion_extent(self.render_size);
        read_gbuffer(cmd, set, ShaderStages::FRAGMENT)?;
        cmd.bind_render_pass(
            resources,
            self.passes.ssao,
            set.ambient_occlusion_framebuffer,
            extent.0,
            extent.1,
            &[UNOCCLUDED],
            None,
        )?;
        set_full_viewport(cmd, extent)?;
        match (assets.graphics_pipeline(SSAO_PIPELINE), self.ssao.descriptor_set) {
            (Some(pipeline), Some(inputs)) => {
                cmd.bind_graphics_pipeline(pipeline)?;
                cmd.bind_graphics_descriptor_sets(0, &[set.engine_set, set.gbuffer_set, inputs])?;
                cmd.draw_vertices(6, 1, 0, 0)?;
            }
            _ => debug!("SSAO pipeline missing, ambient occlusion left unoccluded"),
        }
        cmd.unbind_render_pass()?;
        Ok(())
    }

    /// Draw the quad once per light set, each bound at index 2.
    fn draw_lights(
        &self,
        cmd: &mut CommandBuffer,
        set: &ImageSet,
        label: &str,
        pipeline: Option<GraphicsPipelineHandle>,
        light_sets: &[DescriptorSetHandle],
    ) -> Result<()> {
        if light_sets.is_empty() {
            return Ok(());
        }
        let Some(pipeline) = pipeline else {
            debug!("No pipeline for {label}, skipping {} lights", light_sets.len());
            return Ok(());
        };
        cmd.begin_debug_label(label, Some(LIGHTING_DEBUG_COLOR))?;
        cmd.bind_graphics_pipeline(pipeline)?;
        cmd.bind_graphics_descriptor_sets(0, &[set.engine_set, set.gbuffer_set])?;
        for &light_set in light_sets {
            cmd.bind_graphics_descriptor_sets(2, &[light_set])?;
            self.quad.draw(cmd)?;
        }
        cmd.end_debug_label()?;
        Ok(())
    }

    fn render_lighting<C: Core, A: PipelineAssets, G: GeometryRenderer<C>>(
        &self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        world: &World,
        set: &ImageSet,
        assets: &A,
        geometry: &mut G,
    ) -> Result<()> {
        let lit = self.render_mode == DeferredRenderMode::Default;
        read_gbuffer(cmd, set, ShaderStages::FRAGMENT)?;
        cmd.use_image(set.ambient_occlusion, ImageAccess::SampledRead(ShaderStages::FRAGMENT))?;
        if lit {
            for light in self.lights.shadowed_lights() {
                cmd.use_image(light.shadow_map, ImageAccess::DepthRead)?;
            }
        }

        cmd.bind_render_pass(
            core.resources(),
            self.passes.lighting,
            set.lit_framebuffer,
            self.render_size.0,
            self.render_size.1,
            &[ClearColor::BLACK],
            Some(ClearDepthStencil::FAR),
        )?;
        set_full_viewport(cmd, self.render_size)?;

        if lit {
            self.quad.bind(cmd)?;

            match (assets.graphics_pipeline(IBL_PIPELINE), set.environment()) {
                (Some(pipeline), (Some(_), Some(_))) => {
                    cmd.begin_debug_label("Image Based Lighting", Some(LIGHTING_DEBUG_COLOR))?;
                    cmd.bind_graphics_pipeline(pipeline)?;
                    cmd.bind_graphics_descriptor_sets(
                        0,
                        &[set.engine_set, set.gbuffer_set, set.ambient_occlusion_set],
                    )?;
                    self.quad.draw(cmd)?;
                    cmd.end_debug_label()?;
                }
                _ => debug!("Image based lighting skipped"),
            }

            let point: Vec<_> = self.lights.point_lights().map(|l| l.descriptor_set).collect();
            self.draw_lights(cmd, set, "Point Lighting", assets.graphics_pipeline(POINT_LIGHT_PIPELINE), &point)?;
            let spot: Vec<_> = self.lights.spot_lights().map(|l| l.light_set).collect();
            self.draw_lights(cmd, set, "Spot Lighting", assets.graphics_pipeline(SPOT_LIGHT_PIPELINE), &spot)?;
            let directional: Vec<_> = self.lights.directional_lights().map(|l| l.light_set).collect();
            self.draw_lights(
                cmd,
                set,
                "Directional Lighting",
                assets.graphics_pipeline(DIRECTIONAL_LIGHT_PIPELINE),
                &directional,
            )?;
        }

        geometry.render_queue(core, cmd, world, queues::UNLIT)?;
        if lit {
            geometry.render_queue(core, cmd, world, queues::SKY)?;
            geometry.render_queue(core, cmd, world, queues::TRANSPARENT)?;
        }
        cmd.unbind_render_pass()?;
        Ok(())
    }

    fn render_post_processing<C: Core, A: PipelineAssets>(
        &self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        set: &ImageSet,
        frame: &FrameInput,
        assets: &A,
    ) -> Result<()> {
        if self.config.screen_space_reflections {
            match assets.compute_pipeline(SSR_PIPELINE) {
                Some(pipeline) => {
                    cmd.begin_debug_label("Screen Space Reflections Pass", Some(SSR_DEBUG_COLOR))?;
                    cmd.use_image(set.lit_hdr, ImageAccess::SampledRead(ShaderStages::COMPUTE))?;
                    read_gbuffer(cmd, set, ShaderStages::COMPUTE)?;
                    cmd.wait_for_compute_memory_barrier(set.ssr_target, true)?;
                    cmd.bind_compute_pipeline(pipeline)?;
                    cmd.bind_compute_descriptor_sets(0, &[set.ssr_set])?;
                    cmd.dispatch(self.render_size.0, self.render_size.1, 1)?;
                    cmd.wait_for_compute_memory_barrier(set.ssr_target, false)?;
                    cmd.end_debug_label()?;
                }
                None => debug!("SSR pipeline missing, reflections skipped"),
            }
        }

        if self.config.bloom {
            match assets.compute_pipeline(BLOOM_PIPELINE) {
                Some(pipeline) => {
                    set.bloom
                        .record(cmd, pipeline, self.bloom_levels, self.render_size, set.lit_hdr)?;
                }
                None => debug!("Bloom pipeline missing, bloom skipped"),
            }
        }

        if self.config.depth_of_field {
            let pipelines = (
                assets.graphics_pipeline(DOF_SEPARATION_PIPELINE),
                assets.graphics_pipeline(DOF_BLUR_PIPELINE),
                assets.graphics_pipeline(DOF_COMBINATION_PIPELINE),
            );
            match pipelines {
                (Some(separation), Some(blur), Some(combination)) => set.depth_of_field.record(
                    core.resources(),
                    cmd,
                    &self.passes,
                    DofPipelines {
                        separation,
                        blur,
                        combination,
                    },
                    set.engine_set,
                    set.gbuffer_set,
                    set.gbuffer.depth,
                    set.lit_hdr,
                    self.render_size,
                )?,
                _ => debug!("Depth of field pipelines missing, depth of field skipped"),
            }
        }

        core.upload_pod(set.post_process_ubo, &PostProcessUbo::from(&self.post_process))?;
        let bloom_output = set.bloom.output(self.bloom_levels);
        cmd.use_image(set.lit_hdr, ImageAccess::SampledRead(ShaderStages::FRAGMENT))?;
        cmd.use_image(bloom_output, ImageAccess::SampledRead(ShaderStages::FRAGMENT))?;
        self.render_output(core.resources(), cmd, frame, |cmd| {
            match assets.graphics_pipeline(TONEMAP_PIPELINE) {
                Some(pipeline) => {
                    cmd.bind_graphics_pipeline(pipeline)?;
                    cmd.bind_graphics_descriptor_sets(0, &[set.engine_set, set.gbuffer_set, set.tonemap_set])?;
                    cmd.draw_vertices(6, 1, 0, 0)?;
                }
                None => debug!("Tonemap pipeline missing, output left cleared"),
            }
            Ok(())
        })
    }

    fn render_debug<C: Core, A: PipelineAssets>(
        &self,
        core: &mut C,
        cmd: &mut CommandBuffer,
        set: &ImageSet,
        frame: &FrameInput,
        assets: &A,
    ) -> Result<()> {
        let (near_distance, far_distance) = near_far_from_projection(&frame.projection);
        let ubo = DebugUbo {
            render_mode: self.render_mode.as_u32(),
            near_distance,
            far_distance,
            _pad0: 0.0,
        };
        core.upload_pod(set.debug_ubo, &ubo)?;

        read_gbuffer(cmd, set, ShaderStages::FRAGMENT)?;
        cmd.use_image(set.ambient_occlusion, ImageAccess::SampledRead(ShaderStages::FRAGMENT))?;
        self.render_output(core.resources(), cmd, frame, |cmd| {
            match assets.graphics_pipeline(DEBUG_PIPELINE) {
                Some(pipeline) => {
                    cmd.bind_graphics_pipeline(pipeline)?;
                    cmd.bind_graphics_descriptor_sets(0, &[set.engine_set, set.debug_set])?;
                    cmd.draw_vertices(6, 1, 0, 0)?;
                }
                None => debug!("Debug pipeline missing, output left cleared"),
            }
            Ok(())
        })
    }

    /// Bind the output pass over the whole output framebuffer around `draw`.
    fn render_output(
        &self,
        resources: &ResourceRegistry,
        cmd: &mut CommandBuffer,
        frame: &FrameInput,
        draw: impl FnOnce(&mut CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let output = resources.framebuffer(frame.output_framebuffer)?;
        let extent = (output.width, output.height);
        cmd.bind_render_pass(
            resources,
            frame.output_render_pass,
            frame.output_framebuffer,
            extent.0,
            extent.1,
            &[OUTPUT_CLEAR],
            Some(ClearDepthStencil::FAR),
        )?;
        set_full_viewport(cmd, extent)?;
        draw(cmd)?;
        cmd.unbind_render_pass()?;
        Ok(())
    }

    /// Change the render area.
    ///
    /// Sizes inside the current allocation only update bloom uniforms and
    /// bindings. Growing past it reallocates every image set.
    pub fn resize<C: Core>(&mut self, core: &mut C, width: u32, height: u32) -> Result<()> {
        let size = (width.max(1), height.max(1));
        if size == self.render_size {
            return Ok(());
        }
        core.wait_until_idle()?;
        self.render_size = size;
        let active = bloom_mip_count(size.0, size.1);

        if size.0 <= self.framebuffer_size.0 && size.1 <= self.framebuffer_size.1 {
            self.bloom_levels.active = active.min(self.bloom_levels.stored);
            for set in &self.image_sets {
                set.bloom.update_uniforms(
                    core,
                    self.bloom_levels,
                    size,
                    self.framebuffer_size,
                    self.config.bloom_threshold_filter(),
                )?;
                set.bloom.rebind_first_upsample(core, self.bloom_levels)?;
            }
            debug!(
                "Render area {}x{} inside {}x{} framebuffers",
                size.0, size.1, self.framebuffer_size.0, self.framebuffer_size.1
            );
            return Ok(());
        }

        let framebuffer = (
            size.0.max(self.framebuffer_size.0),
            size.1.max(self.framebuffer_size.1),
        );
        let stored = bloom_mip_count(framebuffer.0, framebuffer.1).max(2);
        self.framebuffer_size = framebuffer;
        self.bloom_levels = BloomLevels {
            stored,
            active: active.min(stored),
        };

        let threshold_filter = self.config.bloom_threshold_filter();
        let ctx = ImageSetContext {
            passes: &self.passes,
            layouts: &self.layouts,
            screen_sampler: self.screen_sampler,
            framebuffer,
            bloom_levels: self.bloom_levels,
            threshold_filter,
            post_process: PostProcessUbo::from(&self.post_process),
        };
        for (index, set) in self.image_sets.iter_mut().enumerate() {
            set.resize(core, &ctx, index)?;
            set.bloom
                .update_uniforms(core, self.bloom_levels, size, framebuffer, threshold_filter)?;
            set.bloom.rebind_first_upsample(core, self.bloom_levels)?;
        }
        info!(
            "Reallocated deferred targets at {}x{} ({} bloom levels)",
            framebuffer.0, framebuffer.1, stored
        );
        Ok(())
    }

    /// Release every resource the renderer created.
    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        core.wait_until_idle()?;
        for mut set in self.image_sets.drain(..) {
            set.destroy(core)?;
        }
        self.lights.destroy(core)?;
        core.delete_sampler(self.screen_sampler)?;
        self.layouts.destroy(core)?;
        self.passes.destroy(core)?;
        self.quad.destroy(core)?;
        self.ssao.destroy(core)?;
        info!("Destroyed deferred renderer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cinder_core::{Camera, PointLight, SpotLight, Transform};
    use cinder_rhi::headless::{HeadlessCore, HeadlessWindowBinding};
    use cinder_rhi::{Command, Format, ImageCreateInfo, WindowGraphicsBinding};

    /// Records which queues were requested and with which set 0.
    #[derive(Default)]
    struct RecordingGeometry {
        engine_set: Option<DescriptorSetHandle>,
        queues: Vec<(String, Option<DescriptorSetHandle>)>,
    }

    impl GeometryRenderer<HeadlessCore> for RecordingGeometry {
        fn set_engine_descriptor_set(&mut self, set: DescriptorSetHandle) {
            self.engine_set = Some(set);
        }

        fn render_queue(
            &mut self,
            _core: &mut HeadlessCore,
            _cmd: &mut CommandBuffer,
            _world: &World,
            queue: &str,
        ) -> Result<()> {
            self.queues.push((queue.to_owned(), self.engine_set));
            Ok(())
        }
    }

    struct Harness {
        core: HeadlessCore,
        window: HeadlessWindowBinding,
        renderer: DeferredRenderer,
        library: PipelineLibrary,
        camera: Camera,
        world: World,
    }

    impl Harness {
        fn new(config: RendererConfig) -> Self {
            let mut core = HeadlessCore::new();
            let window = HeadlessWindowBinding::new(&mut core, config.width, config.height, 3, 3).unwrap();
            let renderer = DeferredRenderer::new(&mut core, config).unwrap();
            let library = renderer
                .build_pipelines(&mut core, window.render_pass(), |_, _| Some(vec![0x07, 0x23, 0x02, 0x03]))
                .unwrap();
            Self {
                core,
                window,
                renderer,
                library,
                camera: Camera::default(),
                world: World::new(),
            }
        }

        fn frame(&self, frame_index: usize) -> FrameInput {
            FrameInput {
                projection: self.camera.projection_matrix(),
                view: self.camera.view_matrix(),
                eye: self.camera.position,
                time: 1.5,
                frame_index,
                output_framebuffer: self.window.current_framebuffer(),
                output_render_pass: self.window.render_pass(),
            }
        }

        /// Record and submit frame 0, returning the submitted commands.
        fn render(&mut self, geometry: &mut RecordingGeometry) -> Vec<Command> {
            self.render_frame(geometry, 0)
        }

        fn render_frame(&mut self, geometry: &mut RecordingGeometry, frame_index: usize) -> Vec<Command> {
            let frame = self.frame(frame_index);
            let mut cmd = CommandBuffer::new("Frame").unwrap();
            cmd.begin().unwrap();
            self.renderer
                .render(&mut self.core, &mut cmd, &self.world, &frame, &self.library, geometry)
                .unwrap();
            cmd.end().unwrap();
            self.core.submit(&mut cmd).unwrap();
            self.core.submissions().last().unwrap().commands.clone()
        }

        fn pass_names(&self, commands: &[Command]) -> Vec<String> {
            commands
                .iter()
                .filter_map(|command| match command {
                    Command::BeginRenderPass { render_pass, .. } => Some(
                        self.core
                            .resources()
                            .render_pass(*render_pass)
                            .unwrap()
                            .debug_name
                            .clone(),
                    ),
                    _ => None,
                })
                .collect()
        }
    }

    fn labels(commands: &[Command]) -> Vec<&str> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::BeginDebugLabel { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn default_frame_runs_passes_in_order() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        harness.world.spawn((
            Transform::looking_at(glam::Vec3::new(0.0, 6.0, 2.0), glam::Vec3::ZERO),
            SpotLight::default(),
        ));
        harness.world.spawn((Transform::default(), PointLight::default()));

        let mut geometry = RecordingGeometry::default();
        let commands = harness.render(&mut geometry);

        assert_eq!(
            harness.pass_names(&commands),
            [
                "Spotlight Shadow Render Pass",
                "GBuffer Render Pass",
                "SSAO Renderpass",
                "Main HDR Render Pass",
                "Swapchain Render Pass",
            ]
        );
        let queues: Vec<_> = geometry.queues.iter().map(|(queue, _)| queue.as_str()).collect();
        assert_eq!(queues, ["ShadowMap", "Opaque", "Unlit", "Sky", "Transparent"]);

        let spot = harness.renderer.lights().spot_lights().next().unwrap().shadow_set;
        let engine = harness.renderer.image_set(0).unwrap().engine_set;
        assert_eq!(geometry.queues[0].1, Some(spot));
        assert_eq!(geometry.queues[1].1, Some(engine));

        let stats = harness.core.submissions().last().unwrap().stats;
        // SSAO, one point light, one spot light and the tonemap.
        assert_eq!(stats.draws, 4);
        assert_eq!(stats.dispatches as usize, harness.renderer.bloom_levels().dispatch_count());
        assert_eq!(stats.dispatches, 10);

        let labels = labels(&commands);
        assert!(labels.contains(&"Point Lighting"));
        assert!(labels.contains(&"Spot Lighting"));
        assert!(!labels.contains(&"Image Based Lighting"));
        assert!(labels.contains(&"Bloom Pass"));
    }

    #[test]
    fn engine_ubo_carries_camera_and_sizes() {
        let mut harness = Harness::new(RendererConfig::new(800, 600));
        harness.render(&mut RecordingGeometry::default());

        let set = harness.renderer.image_set(0).unwrap();
        let ubo: EngineUbo = harness.core.read_pod(set.engine_ubo).unwrap();
        assert_eq!(ubo.eye_position, harness.camera.position.extend(1.0));
        assert_eq!(ubo.render_resolution, Vec2::new(800.0, 600.0));
        assert_eq!(ubo.render_scale, Vec2::ONE);
        assert_relative_eq!(ubo.time, 1.5);
    }

    #[test]
    fn debug_mode_replaces_lighting_and_post_processing() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        harness.world.spawn((Transform::default(), SpotLight::default()));
        harness.renderer.set_render_mode(DeferredRenderMode::Normal);

        let mut geometry = RecordingGeometry::default();
        let commands = harness.render(&mut geometry);

        assert_eq!(
            harness.pass_names(&commands),
            ["GBuffer Render Pass", "Main HDR Render Pass", "Swapchain Render Pass"]
        );
        let queues: Vec<_> = geometry.queues.iter().map(|(queue, _)| queue.as_str()).collect();
        assert_eq!(queues, ["Opaque", "Unlit"]);
        assert_eq!(harness.core.submissions().last().unwrap().stats.dispatches, 0);

        let set = harness.renderer.image_set(0).unwrap();
        let ubo: DebugUbo = harness.core.read_pod(set.debug_ubo).unwrap();
        assert_eq!(ubo.render_mode, DeferredRenderMode::Normal.as_u32());
        assert_relative_eq!(ubo.near_distance, harness.camera.near, epsilon = 1e-4);
        assert_relative_eq!(ubo.far_distance, harness.camera.far, max_relative = 1e-3);
    }

    #[test]
    fn ambient_occlusion_mode_still_runs_ssao() {
        let mut harness = Harness::new(RendererConfig::new(640, 480));
        harness.renderer.set_render_mode(DeferredRenderMode::AmbientOcclusion);
        let commands = harness.render(&mut RecordingGeometry::default());
        assert!(harness.pass_names(&commands).contains(&"SSAO Renderpass".to_owned()));
    }

    #[test]
    fn optional_effects_record_their_passes() {
        let config = RendererConfig::new(1280, 720).with_ssr(true).with_depth_of_field(true);
        let mut harness = Harness::new(config);
        let commands = harness.render(&mut RecordingGeometry::default());

        let labels = labels(&commands);
        assert!(labels.contains(&"Screen Space Reflections Pass"));
        assert!(labels.contains(&"Depth of Field Pass"));
        let passes = harness.pass_names(&commands);
        assert_eq!(passes.iter().filter(|name| *name == "Depth of Field Blur Render Pass").count(), 2);
        assert_eq!(passes.last().map(String::as_str), Some("Swapchain Render Pass"));

        let ssr = commands.iter().find_map(|command| match command {
            Command::Dispatch { x, y, z } if (*x, *y, *z) == (1280, 720, 1) => Some(()),
            _ => None,
        });
        assert!(ssr.is_some());
    }

    #[test]
    fn missing_pipelines_skip_their_draws() {
        let mut harness = Harness::new(RendererConfig::new(640, 480));
        harness.library.destroy(&mut harness.core).unwrap();
        harness.world.spawn((Transform::default(), PointLight::default()));

        harness.render(&mut RecordingGeometry::default());
        let stats = harness.core.submissions().last().unwrap().stats;
        assert_eq!(stats.draws, 0);
        assert_eq!(stats.dispatches, 0);
        assert_eq!(stats.render_passes, 4);
    }

    #[test]
    fn image_based_lighting_needs_both_textures() {
        let mut harness = Harness::new(RendererConfig::new(640, 480));
        let lut = harness
            .core
            .create_image(&ImageCreateInfo::render_target("BRDF LUT", Format::R16G16Sfloat, 512, 512))
            .unwrap();
        harness.library.insert_texture(BRDF_LUT_TEXTURE, lut);
        let commands = harness.render(&mut RecordingGeometry::default());
        assert!(!labels(&commands).contains(&"Image Based Lighting"));

        let sky = harness
            .core
            .create_image(&ImageCreateInfo::render_target("Sky", Format::R16G16B16A16Sfloat, 256, 256))
            .unwrap();
        harness.library.insert_texture("sky.ktx", sky);
        harness.world.spawn((EnvironmentMap {
            specular_texture: "sky.ktx".into(),
        },));
        let writes = harness.core.stats().binding_writes;
        let commands = harness.render(&mut RecordingGeometry::default());

        assert!(labels(&commands).contains(&"Image Based Lighting"));
        // BRDF and environment slots of the recorded image set only.
        assert_eq!(harness.core.stats().binding_writes - writes, 2);
    }

    #[test]
    fn environment_changes_reach_each_set_on_its_own_frame() {
        let mut harness = Harness::new(RendererConfig::new(640, 480));
        let texture = |core: &mut HeadlessCore, name: &str| {
            core.create_image(&ImageCreateInfo::render_target(name, Format::R16G16B16A16Sfloat, 64, 64))
                .unwrap()
        };
        let lut = texture(&mut harness.core, "BRDF LUT");
        let sky = texture(&mut harness.core, "Sky");
        let night = texture(&mut harness.core, "Night Sky");
        harness.library.insert_texture(BRDF_LUT_TEXTURE, lut);
        harness.library.insert_texture("sky.ktx", sky);
        harness.library.insert_texture("night.ktx", night);
        let environment = harness.world.spawn((EnvironmentMap {
            specular_texture: "sky.ktx".into(),
        },));
        let mut geometry = RecordingGeometry::default();
        let writes = harness.core.stats().binding_writes;
        let environments = |harness: &Harness| -> Vec<_> {
            (0..harness.renderer.image_set_count())
                .map(|index| harness.renderer.image_set(index).unwrap().environment())
                .collect()
        };

        let commands = harness.render_frame(&mut geometry, 0);
        assert!(labels(&commands).contains(&"Image Based Lighting"));
        assert_eq!(harness.core.stats().binding_writes - writes, 2);
        assert_eq!(
            environments(&harness),
            [(Some(lut), Some(sky)), (None, None), (None, None)]
        );

        harness.render_frame(&mut geometry, 1);
        harness.render_frame(&mut geometry, 0);
        assert_eq!(harness.core.stats().binding_writes - writes, 4);
        assert_eq!(
            environments(&harness),
            [(Some(lut), Some(sky)), (Some(lut), Some(sky)), (None, None)]
        );

        harness.world.get::<&mut EnvironmentMap>(environment).unwrap().specular_texture = "night.ktx".into();
        harness.render_frame(&mut geometry, 2);
        assert_eq!(
            environments(&harness),
            [(Some(lut), Some(sky)), (Some(lut), Some(sky)), (Some(lut), Some(night))]
        );

        harness.render_frame(&mut geometry, 0);
        assert_eq!(
            environments(&harness),
            [(Some(lut), Some(night)), (Some(lut), Some(sky)), (Some(lut), Some(night))]
        );
        assert_eq!(harness.core.stats().binding_writes - writes, 8);
    }

    #[test]
    fn resize_to_current_size_is_a_no_op() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        let images = harness.core.stats().created("image");
        let writes = harness.core.stats().binding_writes;

        harness.renderer.resize(&mut harness.core, 1280, 720).unwrap();
        assert_eq!(harness.core.stats().created("image"), images);
        assert_eq!(harness.core.stats().binding_writes, writes);
    }

    #[test]
    fn shrinking_keeps_allocations() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        let images = harness.core.stats().created("image");

        harness.renderer.resize(&mut harness.core, 640, 360).unwrap();
        assert_eq!(harness.renderer.framebuffer_size(), (1280, 720));
        assert_eq!(harness.renderer.render_size(), (640, 360));
        assert_eq!(harness.renderer.bloom_levels(), BloomLevels { stored: 6, active: 5 });
        assert_eq!(harness.core.stats().created("image"), images);

        let commands = harness.render(&mut RecordingGeometry::default());
        assert_eq!(harness.core.submissions().last().unwrap().stats.dispatches, 8);
        let gbuffer = commands.iter().find_map(|command| match command {
            Command::BeginRenderPass { width, height, clear_colors, .. } if clear_colors.len() == 3 => {
                Some((*width, *height))
            }
            _ => None,
        });
        assert_eq!(gbuffer, Some((640, 360)));

        let set = harness.renderer.image_set(0).unwrap();
        let ubo: EngineUbo = harness.core.read_pod(set.engine_ubo).unwrap();
        assert_eq!(ubo.render_scale, Vec2::splat(0.5));
    }

    #[test]
    fn growing_reallocates_every_image_set() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        let old_depth = harness.renderer.image_set(0).unwrap().gbuffer.depth;

        harness.renderer.resize(&mut harness.core, 1920, 1080).unwrap();
        assert_eq!(harness.renderer.framebuffer_size(), (1920, 1080));
        assert_eq!(harness.renderer.bloom_levels(), BloomLevels { stored: 7, active: 7 });

        let set = harness.renderer.image_set(0).unwrap();
        assert_eq!(set.gbuffer.depth, old_depth);
        let depth = harness.core.resources().image(old_depth).unwrap();
        assert_eq!((depth.width, depth.height), (1920, 1080));

        let commands = harness.render(&mut RecordingGeometry::default());
        assert_eq!(harness.core.submissions().last().unwrap().stats.dispatches, 12);
        assert!(!commands.is_empty());
    }

    #[test]
    fn growing_one_axis_keeps_the_other() {
        let mut harness = Harness::new(RendererConfig::new(1280, 720));
        harness.renderer.resize(&mut harness.core, 1000, 900).unwrap();
        assert_eq!(harness.renderer.framebuffer_size(), (1280, 900));
        assert_eq!(harness.renderer.render_size(), (1000, 900));
    }

    #[test]
    fn image_set_follows_frame_index() {
        let harness = Harness::new(RendererConfig::new(320, 240).with_frames_in_flight(2));
        assert_eq!(harness.renderer.image_set_count(), 2);
        assert!(matches!(
            harness.renderer.image_set(2),
            Err(RenderError::ImageSetOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn destroy_releases_everything() {
        let mut harness = Harness::new(RendererConfig::new(640, 480));
        harness.world.spawn((Transform::default(), SpotLight::default()));
        harness.world.spawn((Transform::default(), PointLight::default()));
        harness.render(&mut RecordingGeometry::default());
        harness.renderer.resize(&mut harness.core, 1024, 768).unwrap();

        harness.renderer.destroy(&mut harness.core).unwrap();
        harness.library.destroy(&mut harness.core).unwrap();
        harness.window.destroy(&mut harness.core).unwrap();
        assert_eq!(harness.core.resources().live_count(), 0);
    }
}
