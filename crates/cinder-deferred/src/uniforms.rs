//! GPU-side uniform blocks.
//!
//! Every struct is `#[repr(C)]`, free of implicit padding and laid out to
//! match std140 in the shaders that read it.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::config::PostProcessSettings;

/// Number of hemisphere samples in the SSAO kernel.
pub const SSAO_KERNEL_SIZE: usize = 64;

/// Per-frame camera and timing data, bound as set 0 by every pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct EngineUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
    pub eye_position: Vec4,
    pub framebuffer_resolution: Vec2,
    pub render_resolution: Vec2,
    pub render_scale: Vec2,
    pub time: f32,
    pub _pad0: f32,
}

impl EngineUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SsaoUbo {
    pub kernels: [Vec4; SSAO_KERNEL_SIZE],
    pub radius: f32,
    pub bias: f32,
    pub _pad0: [f32; 2],
}

impl SsaoUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Which step of the bloom chain a dispatch runs.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BloomStage {
    Filter = 0,
    Downsample = 1,
    Upsample = 2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BloomUbo {
    pub in_reciprocal_size: Vec2,
    pub out_reciprocal_size: Vec2,
    /// `(threshold, threshold - knee, 2 knee, 0.25 / knee)`
    pub threshold_filter: Vec4,
    pub stage: u32,
    pub level_of_detail: f32,
    pub filter_radius: f32,
    pub _pad0: f32,
}

impl BloomUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
    pub const FILTER_RADIUS: f32 = 0.005;

    pub fn new(threshold_filter: Vec4, stage: BloomStage) -> Self {
        Self {
            threshold_filter,
            stage: stage as u32,
            filter_radius: Self::FILTER_RADIUS,
            ..Self::default()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PostProcessUbo {
    pub vignette_color: Vec4,
    pub chromatic_distortion_red: Vec2,
    pub chromatic_distortion_green: Vec2,
    pub chromatic_distortion_blue: Vec2,
    pub vignette_radius: f32,
    pub vignette_softness: f32,
    pub grain_amount: f32,
    pub grain_pixel_size: f32,
    pub panini_distortion_strength: f32,
    pub is_animated: u32,
}

impl PostProcessUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl From<&PostProcessSettings> for PostProcessUbo {
    fn from(settings: &PostProcessSettings) -> Self {
        Self {
            vignette_color: settings.vignette_color,
            chromatic_distortion_red: settings.chromatic_distortion_red,
            chromatic_distortion_green: settings.chromatic_distortion_green,
            chromatic_distortion_blue: settings.chromatic_distortion_blue,
            vignette_radius: settings.vignette_radius,
            vignette_softness: settings.vignette_softness,
            grain_amount: settings.grain_amount,
            grain_pixel_size: settings.grain_pixel_size,
            panini_distortion_strength: settings.panini_distortion_strength,
            is_animated: u32::from(settings.is_animated),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DebugUbo {
    pub render_mode: u32,
    pub near_distance: f32,
    pub far_distance: f32,
    pub _pad0: f32,
}

impl DebugUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightUbo {
    pub color: Vec3,
    pub attenuation_radius: f32,
    pub position: Vec3,
    pub intensity: f32,
}

impl PointLightUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SpotLightUbo {
    /// Bias times the light's view-projection.
    pub shadow_matrix: Mat4,
    pub color: Vec3,
    pub attenuation_radius: f32,
    pub position: Vec3,
    pub intensity: f32,
    pub direction: Vec3,
    /// Cosine of the inner half-angle.
    pub inner_angle: f32,
    /// Cosine of the outer half-angle.
    pub outer_angle: f32,
    pub shadow_resolution: f32,
    pub _pad0: [f32; 2],
}

impl SpotLightUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DirectionalLightUbo {
    pub shadow_matrix: Mat4,
    pub color: Vec3,
    pub source_radius: f32,
    pub direction: Vec3,
    pub intensity: f32,
    pub shadow_resolution: f32,
    pub _pad0: [f32; 3],
}

impl DirectionalLightUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Light view-projection used while rendering a shadow map.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowUbo {
    pub shadow_matrix: Mat4,
}

impl ShadowUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std140_sizes() {
        assert_eq!(EngineUbo::SIZE, 4 * 64 + 16 + 16 + 16);
        assert_eq!(SsaoUbo::SIZE, 64 * 16 + 16);
        assert_eq!(BloomUbo::SIZE, 48);
        assert_eq!(PostProcessUbo::SIZE, 64);
        assert_eq!(DebugUbo::SIZE, 16);
        assert_eq!(PointLightUbo::SIZE, 32);
        assert_eq!(SpotLightUbo::SIZE, 128);
        assert_eq!(DirectionalLightUbo::SIZE, 112);
        assert_eq!(ShadowUbo::SIZE, 64);
    }

    #[test]
    fn post_process_ubo_carries_settings() {
        let ubo = PostProcessUbo::from(&PostProcessSettings::default());
        assert_eq!(ubo.is_animated, 1);
        assert_eq!(ubo.grain_pixel_size, 1.0);
    }
}
