//! Screen-space ambient occlusion inputs: sample kernel, rotation noise and
//! the descriptor set that exposes them.

use cinder_rhi::{
    Binding, BufferCreateInfo, BufferHandle, Core, DescriptorSetCreateInfo, DescriptorSetHandle,
    DescriptorSetLayoutHandle, Format, ImageCreateInfo, ImageHandle, ImageUsage, SamplerCreateInfo,
    SamplerHandle, TextureFilter, TextureWrapMode,
};
use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RendererConfig;
use crate::error::Result;
use crate::uniforms::{SsaoUbo, SSAO_KERNEL_SIZE};

pub const NOISE_DIMENSION: u32 = 4;

/// Hemisphere samples, denser towards the origin.
pub fn generate_kernel(rng: &mut impl Rng, radius: f32, bias: f32) -> SsaoUbo {
    let mut kernels = [Vec4::ZERO; SSAO_KERNEL_SIZE];
    for (i, kernel) in kernels.iter_mut().enumerate() {
        let sample = Vec3::new(
            rng.gen::<f32>() * 2.0 - 1.0,
            rng.gen::<f32>() * 2.0 - 1.0,
            rng.gen::<f32>(),
        )
        .normalize_or_zero()
            * rng.gen::<f32>();

        let t = i as f32 / SSAO_KERNEL_SIZE as f32;
        let scale = 0.1 + 0.9 * t * t;
        *kernel = (sample * scale).extend(0.0);
    }

    SsaoUbo {
        kernels,
        radius,
        bias,
        _pad0: [0.0; 2],
    }
}

/// One random `i16` per texel, read as two snorm bytes.
pub fn generate_noise(rng: &mut impl Rng) -> Vec<i16> {
    (0..NOISE_DIMENSION * NOISE_DIMENSION).map(|_| rng.gen()).collect()
}

#[derive(Debug)]
pub struct SsaoInputs {
    pub uniform_buffer: BufferHandle,
    pub noise_texture: ImageHandle,
    pub noise_sampler: SamplerHandle,
    pub descriptor_set: Option<DescriptorSetHandle>,
}

impl SsaoInputs {
    pub fn new<C: Core>(core: &mut C, config: &RendererConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.ssao_seed);
        let kernel = generate_kernel(&mut rng, config.ssao_radius, config.ssao_bias);
        let noise = generate_noise(&mut rng);

        let uniform_buffer = core.create_buffer(
            &BufferCreateInfo::uniform("SSAO Uniform Buffer", SsaoUbo::SIZE).with_data(bytemuck::bytes_of(&kernel)),
        )?;
        let noise_texture = core.create_image(
            &ImageCreateInfo::new(
                "SSAO Noise Texture",
                Format::R8G8Snorm,
                NOISE_DIMENSION,
                NOISE_DIMENSION,
                ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            )
            .with_mip_levels(1)
            .with_data(bytemuck::cast_slice(&noise)),
        )?;
        let noise_sampler = core.create_sampler(
            &SamplerCreateInfo::new("SSAO Noise Sampler")
                .with_filter(TextureFilter::Nearest)
                .with_wrap(TextureWrapMode::Repeat),
        )?;

        Ok(Self {
            uniform_buffer,
            noise_texture,
            noise_sampler,
            descriptor_set: None,
        })
    }

    pub fn create_descriptor_set<C: Core>(&mut self, core: &mut C, layout: DescriptorSetLayoutHandle) -> Result<()> {
        let set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "SSAO Input Descriptor Set",
            layout,
            bindings: &[
                Binding::sampler(self.noise_sampler),
                Binding::sampled_image(self.noise_texture),
                Binding::uniform_buffer(self.uniform_buffer),
            ],
        })?;
        self.descriptor_set = Some(set);
        Ok(())
    }

    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        if let Some(set) = self.descriptor_set.take() {
            core.delete_descriptor_set(set)?;
        }
        core.delete_sampler(self.noise_sampler)?;
        core.delete_image(self.noise_texture)?;
        core.delete_buffer(self.uniform_buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cinder_rhi::headless::HeadlessCore;

    #[test]
    fn kernel_stays_in_the_upper_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let ubo = generate_kernel(&mut rng, 0.5, 0.025);
        for (i, kernel) in ubo.kernels.iter().enumerate() {
            let t = i as f32 / SSAO_KERNEL_SIZE as f32;
            assert!(kernel.z >= 0.0);
            assert!(kernel.truncate().length() <= 0.1 + 0.9 * t * t + 1e-5);
            assert_eq!(kernel.w, 0.0);
        }
        assert_relative_eq!(ubo.radius, 0.5);
        assert_relative_eq!(ubo.bias, 0.025);
    }

    #[test]
    fn same_seed_same_kernel() {
        let a = generate_kernel(&mut StdRng::seed_from_u64(3), 0.5, 0.025);
        let b = generate_kernel(&mut StdRng::seed_from_u64(3), 0.5, 0.025);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn inputs_upload_kernel_and_noise() {
        let mut core = HeadlessCore::new();
        let inputs = SsaoInputs::new(&mut core, &RendererConfig::default()).unwrap();

        let ubo: SsaoUbo = core.read_pod(inputs.uniform_buffer).unwrap();
        assert_relative_eq!(ubo.radius, 0.5);

        let noise = core.resources().image(inputs.noise_texture).unwrap();
        assert_eq!((noise.width, noise.height, noise.format), (4, 4, Format::R8G8Snorm));
        assert_eq!(generate_noise(&mut StdRng::seed_from_u64(0)).len() * 2, 32);
    }
}
