//! Per-frame-in-flight render targets, uniform buffers and descriptor sets.
//!
//! Each frame in flight owns one [`ImageSet`] so the CPU can record frame
//! N+1 while the GPU still reads frame N's targets.

use cinder_rhi::{
    Binding, BindingKind, BufferCreateInfo, BufferHandle, Core, DescriptorSetCreateInfo,
    DescriptorSetHandle, FramebufferCreateInfo, FramebufferHandle, ImageCreateInfo, ImageHandle,
    ImageUsage, SamplerHandle,
};
use glam::Vec4;
use tracing::trace;

use crate::bloom::{BloomChain, BloomInputs, BloomLevels};
use crate::dof::DepthOfField;
use crate::error::Result;
use crate::layouts::DescriptorLayouts;
use crate::passes::{
    RenderPasses, AMBIENT_OCCLUSION_FORMAT, DEPTH_FORMAT, GBUFFER_ALBEDO_FORMAT,
    GBUFFER_NORMAL_FORMAT, GBUFFER_SPECULAR_ROUGHNESS_FORMAT, HDR_FORMAT,
};
use crate::uniforms::{DebugUbo, EngineUbo, PostProcessUbo};

pub const SSR_FORMAT: cinder_rhi::Format = HDR_FORMAT;

/// Shared state an image set is built against.
#[derive(Clone, Copy, Debug)]
pub struct ImageSetContext<'a> {
    pub passes: &'a RenderPasses,
    pub layouts: &'a DescriptorLayouts,
    pub screen_sampler: SamplerHandle,
    pub framebuffer: (u32, u32),
    pub bloom_levels: BloomLevels,
    pub threshold_filter: Vec4,
    pub post_process: PostProcessUbo,
}

pub(crate) fn ambient_occlusion_extent(framebuffer: (u32, u32)) -> (u32, u32) {
    ((framebuffer.0 / 2).max(1), (framebuffer.1 / 2).max(1))
}

#[derive(Clone, Copy, Debug)]
pub struct GBuffer {
    pub albedo: ImageHandle,
    pub normal: ImageHandle,
    pub specular_roughness: ImageHandle,
    pub depth: ImageHandle,
    pub framebuffer: FramebufferHandle,
}

impl GBuffer {
    fn new<C: Core>(core: &mut C, passes: &RenderPasses, (width, height): (u32, u32)) -> Result<Self> {
        let albedo = core.create_image(
            &ImageCreateInfo::render_target("GBuffer Albedo Image", GBUFFER_ALBEDO_FORMAT, width, height)
                .with_mip_levels(1),
        )?;
        let normal = core.create_image(
            &ImageCreateInfo::render_target("GBuffer Normal Image", GBUFFER_NORMAL_FORMAT, width, height)
                .with_mip_levels(1),
        )?;
        let specular_roughness = core.create_image(
            &ImageCreateInfo::render_target(
                "GBuffer Specular + Roughness Image",
                GBUFFER_SPECULAR_ROUGHNESS_FORMAT,
                width,
                height,
            )
            .with_mip_levels(1),
        )?;
        let depth = core.create_image(
            &ImageCreateInfo::new(
                "GBuffer Depth Image",
                DEPTH_FORMAT,
                width,
                height,
                ImageUsage::TRANSFER_SRC | ImageUsage::DEPTH_STENCIL | ImageUsage::SAMPLED,
            )
            .with_mip_levels(1),
        )?;
        let framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "G-Buffer Framebuffer",
            render_pass: passes.gbuffer,
            color_attachments: &[albedo, normal, specular_roughness],
            depth_attachment: Some(depth),
            width,
            height,
        })?;

        Ok(Self {
            albedo,
            normal,
            specular_roughness,
            depth,
            framebuffer,
        })
    }

    fn colors(&self) -> [ImageHandle; 3] {
        [self.albedo, self.normal, self.specular_roughness]
    }
}

/// Render targets and sets for one frame in flight.
#[derive(Debug)]
pub struct ImageSet {
    pub gbuffer: GBuffer,
    pub lit_hdr: ImageHandle,
    pub lit_framebuffer: FramebufferHandle,
    pub ambient_occlusion: ImageHandle,
    pub ambient_occlusion_framebuffer: FramebufferHandle,

    pub engine_ubo: BufferHandle,
    pub debug_ubo: BufferHandle,
    pub post_process_ubo: BufferHandle,

    pub depth_of_field: DepthOfField,
    pub ssr_target: ImageHandle,
    pub ssr_set: DescriptorSetHandle,
    pub bloom: BloomChain,

    pub engine_set: DescriptorSetHandle,
    pub gbuffer_set: DescriptorSetHandle,
    pub tonemap_set: DescriptorSetHandle,
    pub debug_set: DescriptorSetHandle,
    pub ambient_occlusion_set: DescriptorSetHandle,

    /// Image-based lighting inputs last written into `ambient_occlusion_set`.
    brdf_lut: Option<ImageHandle>,
    environment_map: Option<ImageHandle>,
}

impl ImageSet {
    pub fn new<C: Core>(core: &mut C, ctx: &ImageSetContext<'_>, index: usize) -> Result<Self> {
        let (width, height) = ctx.framebuffer;
        let gbuffer = GBuffer::new(core, ctx.passes, ctx.framebuffer)?;

        let lit_hdr = core.create_image(
            &ImageCreateInfo::render_target("Lit HDR Render Target", HDR_FORMAT, width, height).with_mip_levels(1),
        )?;
        let lit_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Main HDR Framebuffer",
            render_pass: ctx.passes.lighting,
            color_attachments: &[lit_hdr],
            depth_attachment: Some(gbuffer.depth),
            width,
            height,
        })?;

        let (ao_width, ao_height) = ambient_occlusion_extent(ctx.framebuffer);
        let ambient_occlusion = core.create_image(
            &ImageCreateInfo::render_target("SSAO Render Target", AMBIENT_OCCLUSION_FORMAT, ao_width, ao_height)
                .with_mip_levels(1),
        )?;
        let ambient_occlusion_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "SSAO Framebuffer",
            render_pass: ctx.passes.ssao,
            color_attachments: &[ambient_occlusion],
            depth_attachment: None,
            width: ao_width,
            height: ao_height,
        })?;

        let engine_ubo = core.create_buffer(&BufferCreateInfo::uniform("EngineUbo", EngineUbo::SIZE))?;
        let debug_ubo = core.create_buffer(&BufferCreateInfo::uniform("DebugUbo", DebugUbo::SIZE))?;
        let post_process_ubo = core.create_buffer(
            &BufferCreateInfo::uniform("Post Processing UBO", PostProcessUbo::SIZE)
                .with_data(bytemuck::bytes_of(&ctx.post_process)),
        )?;

        let depth_of_field =
            DepthOfField::new(core, ctx.passes, ctx.layouts, ctx.framebuffer, gbuffer.depth, lit_hdr)?;
        let (ssr_target, ssr_set) = create_ssr(core, ctx, &gbuffer, lit_hdr, engine_ubo)?;
        let bloom = create_bloom(core, ctx, lit_hdr, index)?;

        let engine_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Engine UBO Descriptor Set",
            layout: ctx.layouts.engine,
            bindings: &[Binding::uniform_buffer(engine_ubo)],
        })?;
        let gbuffer_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Gbuffer Descriptor Set",
            layout: ctx.layouts.gbuffer,
            bindings: &gbuffer_bindings(ctx.screen_sampler, &gbuffer),
        })?;
        let tonemap_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Tonemap Descriptor Set",
            layout: ctx.layouts.tonemap,
            bindings: &[
                Binding::sampler(ctx.screen_sampler),
                Binding::sampled_image(lit_hdr),
                Binding::sampled_image(bloom.output(ctx.bloom_levels)),
                Binding::uniform_buffer(post_process_ubo),
            ],
        })?;
        let debug_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Debug Descriptor Set",
            layout: ctx.layouts.debug,
            bindings: &debug_bindings(ctx.screen_sampler, &gbuffer, ambient_occlusion, debug_ubo),
        })?;
        let ambient_occlusion_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Ambient Occlusion Descriptor Set",
            layout: ctx.layouts.ambient_occlusion,
            bindings: &[
                Binding::sampled_image(ambient_occlusion),
                Binding::empty(BindingKind::SampledImage),
                Binding::empty(BindingKind::SampledImage),
            ],
        })?;

        trace!("Created image set {index} at {width}x{height}");
        Ok(Self {
            gbuffer,
            lit_hdr,
            lit_framebuffer,
            ambient_occlusion,
            ambient_occlusion_framebuffer,
            engine_ubo,
            debug_ubo,
            post_process_ubo,
            depth_of_field,
            ssr_target,
            ssr_set,
            bloom,
            engine_set,
            gbuffer_set,
            tonemap_set,
            debug_set,
            ambient_occlusion_set,
            brdf_lut: None,
            environment_map: None,
        })
    }

    /// Grow every target to `ctx.framebuffer`.
    ///
    /// Fixed-size targets are resized in place. The DOF, SSR and bloom
    /// resources depend on the size in ways a resize cannot express, so they
    /// are rebuilt and the sets that reference them rebound.
    pub fn resize<C: Core>(&mut self, core: &mut C, ctx: &ImageSetContext<'_>, index: usize) -> Result<()> {
        let (width, height) = ctx.framebuffer;
        for image in self.gbuffer.colors() {
            core.resize_image(image, width, height)?;
        }
        core.resize_image(self.gbuffer.depth, width, height)?;
        core.resize_image(self.lit_hdr, width, height)?;
        let (ao_width, ao_height) = ambient_occlusion_extent(ctx.framebuffer);
        core.resize_image(self.ambient_occlusion, ao_width, ao_height)?;

        core.resize_framebuffer(self.gbuffer.framebuffer, width, height)?;
        core.resize_framebuffer(self.lit_framebuffer, width, height)?;
        core.resize_framebuffer(self.ambient_occlusion_framebuffer, ao_width, ao_height)?;

        self.depth_of_field.destroy(core)?;
        self.depth_of_field =
            DepthOfField::new(core, ctx.passes, ctx.layouts, ctx.framebuffer, self.gbuffer.depth, self.lit_hdr)?;

        core.delete_descriptor_set(self.ssr_set)?;
        core.delete_image(self.ssr_target)?;
        (self.ssr_target, self.ssr_set) = create_ssr(core, ctx, &self.gbuffer, self.lit_hdr, self.engine_ubo)?;

        self.bloom.destroy(core)?;
        self.bloom = create_bloom(core, ctx, self.lit_hdr, index)?;

        self.update_descriptor_sets(core, ctx)
    }

    /// Rewrite every binding that may point at a resized or rebuilt resource.
    pub fn update_descriptor_sets<C: Core>(&self, core: &mut C, ctx: &ImageSetContext<'_>) -> Result<()> {
        core.change_bindings(self.engine_set, &[Binding::uniform_buffer(self.engine_ubo)], 0)?;
        core.change_bindings(self.gbuffer_set, &gbuffer_bindings(ctx.screen_sampler, &self.gbuffer), 0)?;
        core.change_bindings(
            self.tonemap_set,
            &[
                Binding::sampler(ctx.screen_sampler),
                Binding::sampled_image(self.lit_hdr),
                Binding::sampled_image(self.bloom.output(ctx.bloom_levels)),
                Binding::uniform_buffer(self.post_process_ubo),
            ],
            0,
        )?;
        core.change_bindings(
            self.debug_set,
            &debug_bindings(ctx.screen_sampler, &self.gbuffer, self.ambient_occlusion, self.debug_ubo),
            0,
        )?;
        core.change_bindings(
            self.ambient_occlusion_set,
            &[Binding::sampled_image(self.ambient_occlusion)],
            0,
        )?;
        Ok(())
    }

    /// The BRDF lookup table and environment map this set samples.
    pub const fn environment(&self) -> (Option<ImageHandle>, Option<ImageHandle>) {
        (self.brdf_lut, self.environment_map)
    }

    /// Rebind the image-based lighting inputs if they differ from the ones
    /// this set already holds. `None` keeps the current slot.
    ///
    /// Only call this for the set of the frame being recorded; the others
    /// may still be read by frames in flight.
    pub fn bind_environment<C: Core>(
        &mut self,
        core: &mut C,
        brdf_lut: Option<ImageHandle>,
        environment_map: Option<ImageHandle>,
    ) -> Result<bool> {
        if self.environment() == (brdf_lut, environment_map) {
            return Ok(false);
        }
        core.change_bindings(
            self.ambient_occlusion_set,
            &[
                Binding::empty(BindingKind::SampledImage),
                Binding::sampled_image_opt(brdf_lut),
                Binding::sampled_image_opt(environment_map),
            ],
            0,
        )?;
        self.brdf_lut = brdf_lut;
        self.environment_map = environment_map;
        Ok(true)
    }

    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        for set in [
            self.ambient_occlusion_set,
            self.debug_set,
            self.tonemap_set,
            self.gbuffer_set,
            self.engine_set,
        ] {
            core.delete_descriptor_set(set)?;
        }
        self.bloom.destroy(core)?;
        core.delete_descriptor_set(self.ssr_set)?;
        core.delete_image(self.ssr_target)?;
        self.depth_of_field.destroy(core)?;

        for buffer in [self.post_process_ubo, self.debug_ubo, self.engine_ubo] {
            core.delete_buffer(buffer)?;
        }

        for framebuffer in [
            self.ambient_occlusion_framebuffer,
            self.lit_framebuffer,
            self.gbuffer.framebuffer,
        ] {
            core.delete_framebuffer(framebuffer)?;
        }
        core.delete_image(self.ambient_occlusion)?;
        core.delete_image(self.lit_hdr)?;
        core.delete_image(self.gbuffer.depth)?;
        for image in self.gbuffer.colors() {
            core.delete_image(image)?;
        }
        Ok(())
    }
}

fn gbuffer_bindings(sampler: SamplerHandle, gbuffer: &GBuffer) -> [Binding; 5] {
    [
        Binding::sampler(sampler),
        Binding::depth_image(gbuffer.depth),
        Binding::sampled_image(gbuffer.albedo),
        Binding::sampled_image(gbuffer.normal),
        Binding::sampled_image(gbuffer.specular_roughness),
    ]
}

fn debug_bindings(
    sampler: SamplerHandle,
    gbuffer: &GBuffer,
    ambient_occlusion: ImageHandle,
    debug_ubo: BufferHandle,
) -> [Binding; 7] {
    [
        Binding::sampler(sampler),
        Binding::depth_image(gbuffer.depth),
        Binding::sampled_image(gbuffer.albedo),
        Binding::sampled_image(gbuffer.normal),
        Binding::sampled_image(gbuffer.specular_roughness),
        Binding::sampled_image(ambient_occlusion),
        Binding::uniform_buffer(debug_ubo),
    ]
}

fn create_ssr<C: Core>(
    core: &mut C,
    ctx: &ImageSetContext<'_>,
    gbuffer: &GBuffer,
    lit_hdr: ImageHandle,
    engine_ubo: BufferHandle,
) -> Result<(ImageHandle, DescriptorSetHandle)> {
    let (width, height) = ctx.framebuffer;
    let target = core.create_image(
        &ImageCreateInfo::new(
            "SSR Render Target",
            SSR_FORMAT,
            width,
            height,
            ImageUsage::RENDER_TARGET | ImageUsage::STORAGE | ImageUsage::SAMPLED,
        )
        .with_mip_levels(1),
    )?;
    let set = core.create_descriptor_set(&DescriptorSetCreateInfo {
        debug_name: "SSR Descriptor Set",
        layout: ctx.layouts.ssr,
        bindings: &[
            Binding::uniform_buffer(engine_ubo),
            Binding::storage_image(target),
            Binding::sampled_image(lit_hdr),
            Binding::depth_image(gbuffer.depth),
            Binding::sampled_image(gbuffer.normal),
            Binding::sampled_image(gbuffer.specular_roughness),
        ],
    })?;
    Ok((target, set))
}

fn create_bloom<C: Core>(
    core: &mut C,
    ctx: &ImageSetContext<'_>,
    lit_hdr: ImageHandle,
    index: usize,
) -> Result<BloomChain> {
    let inputs = BloomInputs {
        layout: ctx.layouts.bloom,
        sampler: ctx.screen_sampler,
        lit_hdr,
        threshold_filter: ctx.threshold_filter,
    };
    BloomChain::new(core, &inputs, ctx.bloom_levels.stored, ctx.framebuffer, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::bloom_mip_count;
    use crate::config::PostProcessSettings;
    use cinder_rhi::headless::HeadlessCore;
    use cinder_rhi::{BoundResource, Format, SamplerCreateInfo};

    struct Shared {
        passes: RenderPasses,
        layouts: DescriptorLayouts,
        sampler: SamplerHandle,
    }

    fn setup() -> (HeadlessCore, Shared) {
        let mut core = HeadlessCore::new();
        let passes = RenderPasses::new(&mut core).unwrap();
        let layouts = DescriptorLayouts::new(&mut core).unwrap();
        let sampler = core.create_sampler(&SamplerCreateInfo::new("Screen Sampler")).unwrap();
        (
            core,
            Shared {
                passes,
                layouts,
                sampler,
            },
        )
    }

    fn context(shared: &Shared, framebuffer: (u32, u32)) -> ImageSetContext<'_> {
        let mips = bloom_mip_count(framebuffer.0, framebuffer.1);
        ImageSetContext {
            passes: &shared.passes,
            layouts: &shared.layouts,
            screen_sampler: shared.sampler,
            framebuffer,
            bloom_levels: BloomLevels {
                stored: mips.max(2),
                active: mips,
            },
            threshold_filter: Vec4::ONE,
            post_process: PostProcessUbo::from(&PostProcessSettings::default()),
        }
    }

    #[test]
    fn ambient_occlusion_is_half_size() {
        assert_eq!(ambient_occlusion_extent((1280, 720)), (640, 360));
        assert_eq!(ambient_occlusion_extent((1, 1)), (1, 1));
    }

    #[test]
    fn new_set_allocates_targets_at_framebuffer_size() {
        let (mut core, shared) = setup();
        let ctx = context(&shared, (800, 600));
        let set = ImageSet::new(&mut core, &ctx, 0).unwrap();

        let resources = core.resources();
        let depth = resources.image(set.gbuffer.depth).unwrap();
        assert_eq!((depth.width, depth.height), (800, 600));
        assert!(depth.usage.contains(ImageUsage::TRANSFER_SRC));
        let ao = resources.image(set.ambient_occlusion).unwrap();
        assert_eq!((ao.width, ao.height), (400, 300));

        let gbuffer_set = resources.descriptor_set(set.gbuffer_set).unwrap();
        assert!(gbuffer_set.first_empty_slot().is_none());
        let ao_set = resources.descriptor_set(set.ambient_occlusion_set).unwrap();
        assert_eq!(ao_set.first_empty_slot().map(|slot| slot.binding), Some(1));
    }

    #[test]
    fn resize_rebinds_rebuilt_resources() {
        let (mut core, shared) = setup();
        let ctx = context(&shared, (640, 480));
        let mut set = ImageSet::new(&mut core, &ctx, 0).unwrap();
        let old_bloom = set.bloom.output(ctx.bloom_levels);

        let grown = context(&shared, (1920, 1080));
        set.resize(&mut core, &grown, 0).unwrap();

        let resources = core.resources();
        let lit = resources.image(set.lit_hdr).unwrap();
        assert_eq!((lit.width, lit.height), (1920, 1080));
        let fb = resources.framebuffer(set.gbuffer.framebuffer).unwrap();
        assert_eq!((fb.width, fb.height), (1920, 1080));

        let new_bloom = set.bloom.output(grown.bloom_levels);
        assert_ne!(new_bloom, old_bloom);
        let tonemap = resources.descriptor_set(set.tonemap_set).unwrap();
        assert!(tonemap.references(BoundResource::Image(new_bloom)));
        assert!(resources.image(old_bloom).is_err());
    }

    #[test]
    fn environment_is_only_rewritten_when_it_changes() {
        let (mut core, shared) = setup();
        let ctx = context(&shared, (256, 256));
        let mut set = ImageSet::new(&mut core, &ctx, 0).unwrap();
        let lut = core
            .create_image(&ImageCreateInfo::render_target("BRDF LUT", Format::R16G16Sfloat, 64, 64))
            .unwrap();

        let writes = core.stats().binding_writes;
        assert!(set.bind_environment(&mut core, Some(lut), None).unwrap());
        assert_eq!(set.environment(), (Some(lut), None));
        assert_eq!(core.stats().binding_writes - writes, 1);

        assert!(!set.bind_environment(&mut core, Some(lut), None).unwrap());
        assert_eq!(core.stats().binding_writes - writes, 1);
        let ao_set = core.resources().descriptor_set(set.ambient_occlusion_set).unwrap();
        assert!(ao_set.references(BoundResource::Image(lut)));
    }

    #[test]
    fn destroy_releases_everything() {
        let (mut core, shared) = setup();
        let ctx = context(&shared, (256, 256));
        let mut set = ImageSet::new(&mut core, &ctx, 1).unwrap();
        let images = core.stats().created("image");
        set.destroy(&mut core).unwrap();

        let stats = core.stats();
        assert_eq!(stats.deleted("image"), images);
        assert_eq!(stats.deleted("descriptor set"), stats.created("descriptor set"));
        assert_eq!(stats.deleted("framebuffer"), stats.created("framebuffer"));
        assert_eq!(stats.deleted("buffer"), stats.created("buffer"));
    }
}
