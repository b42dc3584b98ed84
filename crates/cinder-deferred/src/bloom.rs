//! Compute bloom: threshold filter, a downsample chain, then a tent-filtered
//! upsample chain back to half resolution.
//!
//! Targets are stored as `[downsample 0..stored, upsample 0..stored]`. The
//! chain is allocated for the framebuffer size and only the first `active`
//! levels run, so shrinking the render area never reallocates.

use cinder_rhi::{
    Binding, BufferCreateInfo, BufferHandle, CommandBuffer, ComputePipelineHandle, Core,
    DescriptorSetCreateInfo, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageAccess,
    ImageCreateInfo, ImageHandle, ImageUsage, SamplerHandle, ShaderStages,
};
use glam::{Vec2, Vec4};

use crate::error::Result;
use crate::passes::BLOOM_FORMAT;
use crate::uniforms::{BloomStage, BloomUbo};

pub const MAX_BLOOM_MIPS: usize = 40;
pub const BLOOM_DEBUG_COLOR: [f32; 4] = [1.0, 0.6, 0.55, 1.0];

/// `floor(log2(min(w, h))) - 3`, capped at [`MAX_BLOOM_MIPS`].
pub fn bloom_mip_count(width: u32, height: u32) -> usize {
    let min = width.min(height).max(1);
    (min.ilog2() as usize).saturating_sub(3).min(MAX_BLOOM_MIPS)
}

/// Levels allocated versus levels used for the current render area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BloomLevels {
    pub stored: usize,
    pub active: usize,
}

impl BloomLevels {
    pub fn first_upsample_set(self) -> usize {
        self.stored - 1
    }

    pub fn set_count(self) -> usize {
        self.stored * 2 - 2
    }

    /// Compute dispatches one bloom pass records.
    pub fn dispatch_count(self) -> usize {
        if self.active <= 2 {
            0
        } else {
            2 * self.active - 2
        }
    }
}

#[derive(Debug, Default)]
pub struct BloomChain {
    pub targets: Vec<ImageHandle>,
    pub descriptor_sets: Vec<DescriptorSetHandle>,
    pub uniform_buffers: Vec<BufferHandle>,
}

/// Everything the chain's descriptor sets reference from outside.
#[derive(Clone, Copy, Debug)]
pub struct BloomInputs {
    pub layout: DescriptorSetLayoutHandle,
    pub sampler: SamplerHandle,
    pub lit_hdr: ImageHandle,
    pub threshold_filter: Vec4,
}

impl BloomChain {
    pub fn new<C: Core>(
        core: &mut C,
        inputs: &BloomInputs,
        stored: usize,
        framebuffer: (u32, u32),
        image_set: usize,
    ) -> Result<Self> {
        let stored = stored.max(2);
        let mut chain = Self::default();
        let usage = ImageUsage::RENDER_TARGET | ImageUsage::SAMPLED | ImageUsage::STORAGE;

        for direction in ["Downscale", "Upscale"] {
            for level in 0..stored {
                let name = format!("Bloom Render Target {direction} Mip {level}");
                let image = core.create_image(
                    &ImageCreateInfo::new(
                        &name,
                        BLOOM_FORMAT,
                        (framebuffer.0 >> level).max(1),
                        (framebuffer.1 >> level).max(1),
                        usage,
                    )
                    .with_mip_levels(1),
                )?;
                chain.targets.push(image);
            }
        }

        let targets = &chain.targets;
        let mut layouts: Vec<(String, BloomStage, [ImageHandle; 3])> = Vec::with_capacity(stored * 2 - 2);
        layouts.push((
            format!("Bloom DS Filter [{image_set}]"),
            BloomStage::Filter,
            [targets[1], inputs.lit_hdr, targets[0]],
        ));
        for i in 1..stored - 1 {
            layouts.push((
                format!("Bloom DS Downsample [{image_set}]({i})"),
                BloomStage::Downsample,
                [targets[i + 1], targets[i], targets[0]],
            ));
        }
        layouts.push((
            format!("Bloom DS First Upsample [{image_set}]"),
            BloomStage::Upsample,
            [targets[stored * 2 - 1], targets[stored - 2], targets[stored - 1]],
        ));
        for i in (1..=stored - 2).rev() {
            layouts.push((
                format!("Bloom DS Upsample [{image_set}]({i})"),
                BloomStage::Upsample,
                [targets[stored + i], targets[stored + i + 1], targets[i]],
            ));
        }

        for (name, stage, [output, first, second]) in layouts {
            let ubo = BloomUbo::new(inputs.threshold_filter, stage);
            let buffer = core.create_buffer(
                &BufferCreateInfo::uniform("Bloom Uniform Buffer", BloomUbo::SIZE).with_data(bytemuck::bytes_of(&ubo)),
            )?;
            let set = core.create_descriptor_set(&DescriptorSetCreateInfo {
                debug_name: &name,
                layout: inputs.layout,
                bindings: &[
                    Binding::uniform_buffer(buffer),
                    Binding::sampler(inputs.sampler),
                    Binding::storage_image(output),
                    Binding::sampled_image(first),
                    Binding::sampled_image(second),
                ],
            })?;
            chain.uniform_buffers.push(buffer);
            chain.descriptor_sets.push(set);
        }

        Ok(chain)
    }

    /// Last upsample output, sampled by the tonemapper.
    pub fn output(&self, levels: BloomLevels) -> ImageHandle {
        self.targets[levels.stored + 1]
    }

    /// Write reciprocal sizes for the active levels.
    ///
    /// Sizes are expressed in UVs of the full allocation, so a render area
    /// smaller than the framebuffer scales them by `render / framebuffer`.
    pub fn update_uniforms<C: Core>(
        &self,
        core: &mut C,
        levels: BloomLevels,
        render: (u32, u32),
        framebuffer: (u32, u32),
        threshold_filter: Vec4,
    ) -> Result<()> {
        let BloomLevels { stored, active } = levels;
        if active <= 1 {
            return Ok(());
        }

        let scale = Vec2::new(
            render.0 as f32 / framebuffer.0 as f32,
            render.1 as f32 / framebuffer.1 as f32,
        );
        let mut mip = Vec2::new(render.0 as f32, render.1 as f32);
        let mut sizes = Vec::with_capacity(active);
        for _ in 0..active {
            sizes.push(scale / mip);
            mip /= 2.0;
        }

        let mut upload = |index: usize, stage: BloomStage, input: Vec2, output: Vec2| {
            let ubo = BloomUbo {
                in_reciprocal_size: input,
                out_reciprocal_size: output,
                ..BloomUbo::new(threshold_filter, stage)
            };
            core.upload_pod(self.uniform_buffers[index], &ubo)
        };

        upload(0, BloomStage::Filter, Vec2::ZERO, sizes[0])?;
        for i in 1..active - 1 {
            upload(i, BloomStage::Downsample, Vec2::ZERO, sizes[i + 1])?;
        }
        upload(
            levels.first_upsample_set(),
            BloomStage::Upsample,
            sizes[active - 2],
            sizes[active - 1],
        )?;
        let first = stored * 2 - active;
        for (offset, i) in (1..=active - 2).rev().enumerate() {
            upload(first + offset, BloomStage::Upsample, sizes[i - 1], sizes[i])?;
        }
        Ok(())
    }

    /// Point the first upsample at the smallest active level.
    pub fn rebind_first_upsample<C: Core>(&self, core: &mut C, levels: BloomLevels) -> Result<()> {
        let BloomLevels { stored, active } = levels;
        if active <= 2 {
            return Ok(());
        }
        core.change_bindings(
            self.descriptor_sets[levels.first_upsample_set()],
            &[
                Binding::storage_image(self.targets[stored + active - 1]),
                Binding::sampled_image(self.targets[active - 2]),
                Binding::sampled_image(self.targets[active - 1]),
            ],
            2,
        )?;
        Ok(())
    }

    fn step(
        &self,
        cmd: &mut CommandBuffer,
        set: usize,
        output: ImageHandle,
        inputs: &[ImageHandle],
        extent: (u32, u32),
    ) -> Result<()> {
        cmd.use_image(output, ImageAccess::StorageWrite(ShaderStages::COMPUTE))?;
        for &input in inputs {
            cmd.use_image(input, ImageAccess::SampledRead(ShaderStages::COMPUTE))?;
        }
        cmd.bind_compute_descriptor_sets(0, &[self.descriptor_sets[set]])?;
        cmd.dispatch(extent.0.div_ceil(4), extent.1.div_ceil(4), 1)?;
        Ok(())
    }

    pub fn record(
        &self,
        cmd: &mut CommandBuffer,
        pipeline: ComputePipelineHandle,
        levels: BloomLevels,
        render: (u32, u32),
        lit_hdr: ImageHandle,
    ) -> Result<()> {
        let BloomLevels { stored, active } = levels;
        if active <= 2 {
            return Ok(());
        }
        let targets = &self.targets;

        let mut extents = Vec::with_capacity(active - 1);
        extents.push(render);
        for i in 1..active - 1 {
            let (w, h) = extents[i - 1];
            extents.push((w.div_ceil(2), h.div_ceil(2)));
        }

        cmd.begin_debug_label("Bloom Pass", Some(BLOOM_DEBUG_COLOR))?;
        cmd.bind_compute_pipeline(pipeline)?;

        cmd.begin_debug_label("Bloom First Downsample", Some(BLOOM_DEBUG_COLOR))?;
        self.step(cmd, 0, targets[1], &[lit_hdr], extents[0])?;
        cmd.end_debug_label()?;

        cmd.begin_debug_label("Bloom Downsamples", Some(BLOOM_DEBUG_COLOR))?;
        for i in 1..active - 1 {
            self.step(cmd, i, targets[i + 1], &[targets[i]], extents[i])?;
        }
        cmd.end_debug_label()?;

        cmd.begin_debug_label("Bloom First Upsample", Some(BLOOM_DEBUG_COLOR))?;
        self.step(
            cmd,
            levels.first_upsample_set(),
            targets[stored + active - 1],
            &[targets[active - 2], targets[active - 1]],
            extents[active - 2],
        )?;
        cmd.end_debug_label()?;

        cmd.begin_debug_label("Bloom Upsamples", Some(BLOOM_DEBUG_COLOR))?;
        let first = stored * 2 - active;
        for (offset, i) in (0..active - 2).rev().enumerate() {
            self.step(
                cmd,
                first + offset,
                targets[stored + i + 1],
                &[targets[stored + i + 2], targets[i + 1]],
                extents[i],
            )?;
        }
        cmd.end_debug_label()?;

        cmd.end_debug_label()?;
        cmd.wait_for_compute_memory_barrier(self.output(levels), false)?;
        Ok(())
    }

    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        for set in self.descriptor_sets.drain(..) {
            core.delete_descriptor_set(set)?;
        }
        for buffer in self.uniform_buffers.drain(..) {
            core.delete_buffer(buffer)?;
        }
        for image in self.targets.drain(..) {
            core.delete_image(image)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cinder_rhi::headless::HeadlessCore;
    use cinder_rhi::{
        BindingKind, BoundResource, Command, ComputePipelineCreateInfo, DescriptorSetLayoutCreateInfo,
        Format, LayoutBinding, SamplerCreateInfo, ShaderStageInfo,
    };

    struct Fixture {
        core: HeadlessCore,
        inputs: BloomInputs,
        pipeline: ComputePipelineHandle,
    }

    fn fixture(width: u32, height: u32) -> Fixture {
        let mut core = HeadlessCore::new();
        let c = ShaderStages::COMPUTE;
        let layout = core
            .create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo {
                debug_name: "Bloom Descriptor Set Layout",
                bindings: &[
                    LayoutBinding::new(0, BindingKind::UniformBuffer, c),
                    LayoutBinding::new(1, BindingKind::Sampler, c),
                    LayoutBinding::new(2, BindingKind::StorageImage, c),
                    LayoutBinding::new(3, BindingKind::SampledImage, c),
                    LayoutBinding::new(4, BindingKind::SampledImage, c),
                ],
            })
            .unwrap();
        let sampler = core.create_sampler(&SamplerCreateInfo::new("Screen Sampler")).unwrap();
        let lit_hdr = core
            .create_image(&ImageCreateInfo::render_target(
                "Lit HDR",
                Format::R16G16B16A16Sfloat,
                width,
                height,
            ))
            .unwrap();
        let pipeline = core
            .create_compute_pipeline(&ComputePipelineCreateInfo {
                debug_name: "Bloom",
                stage: ShaderStageInfo::new(ShaderStages::COMPUTE, &[1, 2, 3, 4]),
                set_layouts: &[layout],
            })
            .unwrap();
        Fixture {
            core,
            inputs: BloomInputs {
                layout,
                sampler,
                lit_hdr,
                threshold_filter: Vec4::new(1.0, 0.5, 1.0, 0.5),
            },
            pipeline,
        }
    }

    fn record(fx: &mut Fixture, chain: &BloomChain, levels: BloomLevels, render: (u32, u32)) -> Vec<Command> {
        let mut cmd = CommandBuffer::new("Bloom Test").unwrap();
        cmd.begin().unwrap();
        chain.record(&mut cmd, fx.pipeline, levels, render, fx.inputs.lit_hdr).unwrap();
        cmd.end().unwrap();
        fx.core.submit(&mut cmd).unwrap();
        cmd.commands().to_vec()
    }

    #[test]
    fn mip_count_follows_the_smaller_axis() {
        assert_eq!(bloom_mip_count(1920, 1080), 7);
        assert_eq!(bloom_mip_count(3840, 2160), 8);
        assert_eq!(bloom_mip_count(16, 16), 1);
        assert_eq!(bloom_mip_count(4, 4), 0);
        assert_eq!(bloom_mip_count(0, 0), 0);
    }

    #[test]
    fn full_hd_chain_dispatches_twelve_times() {
        let mut fx = fixture(1920, 1080);
        let levels = BloomLevels {
            stored: 7,
            active: 7,
        };
        let chain = BloomChain::new(&mut fx.core, &fx.inputs, levels.stored, (1920, 1080), 0).unwrap();
        assert_eq!(chain.targets.len(), 14);
        assert_eq!(chain.descriptor_sets.len(), levels.set_count());
        assert_eq!(chain.uniform_buffers.len(), 12);

        let commands = record(&mut fx, &chain, levels, (1920, 1080));
        let dispatches: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches.len(), 12);
        assert_eq!(dispatches.len(), levels.dispatch_count());
        assert_eq!(dispatches[0], (480, 270));
        assert_eq!(dispatches[1], (240, 135));
        // The last upsample runs at the full render extent again.
        assert_eq!(*dispatches.last().unwrap(), (480, 270));

        let last = commands.last().unwrap();
        assert!(matches!(
            last,
            Command::ImageBarrier(b) if b.image == chain.output(levels)
        ));
    }

    #[test]
    fn tiny_render_area_skips_bloom() {
        let mut fx = fixture(64, 64);
        let levels = BloomLevels {
            stored: 3,
            active: 2,
        };
        let chain = BloomChain::new(&mut fx.core, &fx.inputs, levels.stored, (64, 64), 0).unwrap();
        let commands = record(&mut fx, &chain, levels, (32, 32));
        assert!(commands.is_empty());
    }

    #[test]
    fn rebinding_targets_the_smallest_active_level() {
        let mut fx = fixture(1920, 1080);
        let chain = BloomChain::new(&mut fx.core, &fx.inputs, 7, (1920, 1080), 0).unwrap();
        let levels = BloomLevels {
            stored: 7,
            active: 5,
        };
        let writes = fx.core.stats().binding_writes;
        chain.rebind_first_upsample(&mut fx.core, levels).unwrap();
        assert_eq!(fx.core.stats().binding_writes, writes + 3);

        let set = fx.core.resources().descriptor_set(chain.descriptor_sets[6]).unwrap();
        assert_eq!(set.slots[2].item, Some(BoundResource::Image(chain.targets[7 + 4])));
        assert_eq!(set.slots[3].item, Some(BoundResource::Image(chain.targets[3])));
        assert_eq!(set.slots[4].item, Some(BoundResource::Image(chain.targets[4])));

        // Fewer active levels still validate against the same sets.
        let commands = record(&mut fx, &chain, levels, (1280, 720));
        let dispatches = commands.iter().filter(|c| matches!(c, Command::Dispatch { .. })).count();
        assert_eq!(dispatches, 8);
    }

    #[test]
    fn uniforms_scale_with_the_render_area() {
        let mut fx = fixture(1920, 1080);
        let levels = BloomLevels {
            stored: 7,
            active: 6,
        };
        let chain = BloomChain::new(&mut fx.core, &fx.inputs, levels.stored, (1920, 1080), 0).unwrap();
        chain
            .update_uniforms(&mut fx.core, levels, (960, 540), (1920, 1080), fx.inputs.threshold_filter)
            .unwrap();

        let filter: BloomUbo = fx.core.read_pod(chain.uniform_buffers[0]).unwrap();
        assert_eq!(filter.stage, BloomStage::Filter as u32);
        assert_relative_eq!(filter.out_reciprocal_size.x, 0.5 / 960.0);
        assert_relative_eq!(filter.filter_radius, 0.005);

        let first_upsample: BloomUbo = fx.core.read_pod(chain.uniform_buffers[6]).unwrap();
        assert_eq!(first_upsample.stage, BloomStage::Upsample as u32);
        assert_relative_eq!(first_upsample.out_reciprocal_size.x, 0.5 / 30.0);
        assert_relative_eq!(first_upsample.in_reciprocal_size.x, 0.5 / 60.0);
    }
}
