//! Renderer and post-processing configuration.

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// Renderer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Initial framebuffer width.
    pub width: u32,
    /// Initial framebuffer height.
    pub height: u32,
    /// One image set is allocated per frame in flight.
    pub max_frames_in_flight: usize,
    /// World-space radius of the SSAO hemisphere.
    pub ssao_radius: f32,
    /// Depth bias applied when comparing SSAO samples.
    pub ssao_bias: f32,
    /// Seed of the SSAO kernel and noise generator.
    pub ssao_seed: u64,
    /// Luminance above which bloom starts.
    pub bloom_threshold: f32,
    /// Fraction of the threshold used as the soft knee.
    pub bloom_soft_threshold: f32,
    pub bloom: bool,
    pub screen_space_reflections: bool,
    pub depth_of_field: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_frames_in_flight: cinder_rhi::DEFAULT_MAX_FRAMES_IN_FLIGHT,
            ssao_radius: 0.5,
            ssao_bias: 0.025,
            ssao_seed: 0,
            bloom_threshold: 1.0,
            bloom_soft_threshold: 0.5,
            bloom: true,
            screen_space_reflections: false,
            depth_of_field: false,
        }
    }
}

impl RendererConfig {
    /// Create a config for an initial framebuffer size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the number of image sets.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Set the SSAO radius and bias.
    pub fn with_ssao(mut self, radius: f32, bias: f32) -> Self {
        self.ssao_radius = radius;
        self.ssao_bias = bias;
        self
    }

    pub fn with_ssao_seed(mut self, seed: u64) -> Self {
        self.ssao_seed = seed;
        self
    }

    /// Set the bloom threshold and soft-threshold fraction.
    pub fn with_bloom_threshold(mut self, threshold: f32, soft_threshold: f32) -> Self {
        self.bloom_threshold = threshold;
        self.bloom_soft_threshold = soft_threshold;
        self
    }

    pub fn with_bloom(mut self, enabled: bool) -> Self {
        self.bloom = enabled;
        self
    }

    pub fn with_ssr(mut self, enabled: bool) -> Self {
        self.screen_space_reflections = enabled;
        self
    }

    pub fn with_depth_of_field(mut self, enabled: bool) -> Self {
        self.depth_of_field = enabled;
        self
    }

    /// Reject sizes and counts no renderer can be built with.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidConfig(format!(
                "framebuffer size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.max_frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "at least one frame in flight is required".into(),
            ));
        }
        Ok(())
    }

    /// Soft-threshold curve: `(t, t - knee, 2 knee, 0.25 / knee)`.
    pub fn bloom_threshold_filter(&self) -> Vec4 {
        const BIAS: f32 = 0.000_01;
        let threshold = self.bloom_threshold;
        let knee = threshold * self.bloom_soft_threshold;
        Vec4::new(threshold, threshold - knee, 2.0 * knee, 0.25 / (knee + BIAS))
    }
}

/// Tonemapping and lens effects.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostProcessSettings {
    pub vignette_color: Vec4,
    pub vignette_radius: f32,
    pub vignette_softness: f32,
    pub grain_amount: f32,
    pub grain_pixel_size: f32,
    pub chromatic_distortion_red: Vec2,
    pub chromatic_distortion_green: Vec2,
    pub chromatic_distortion_blue: Vec2,
    pub panini_distortion_strength: f32,
    /// Animate grain with the engine clock.
    pub is_animated: bool,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            vignette_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            vignette_radius: 0.75,
            vignette_softness: 0.8,
            grain_amount: 0.0007,
            grain_pixel_size: 1.0,
            chromatic_distortion_red: Vec2::splat(0.00045),
            chromatic_distortion_green: Vec2::splat(0.0003),
            chromatic_distortion_blue: Vec2::splat(-0.0003),
            panini_distortion_strength: 0.0,
            is_animated: true,
        }
    }
}

impl PostProcessSettings {
    pub fn with_vignette(mut self, color: Vec4, radius: f32, softness: f32) -> Self {
        self.vignette_color = color;
        self.vignette_radius = radius;
        self.vignette_softness = softness;
        self
    }

    pub fn with_grain(mut self, amount: f32, pixel_size: f32) -> Self {
        self.grain_amount = amount;
        self.grain_pixel_size = pixel_size;
        self
    }

    /// Per-channel UV offsets of the chromatic aberration.
    pub fn with_chromatic_distortion(mut self, red: Vec2, green: Vec2, blue: Vec2) -> Self {
        self.chromatic_distortion_red = red;
        self.chromatic_distortion_green = green;
        self.chromatic_distortion_blue = blue;
        self
    }

    pub fn with_panini(mut self, strength: f32) -> Self {
        self.panini_distortion_strength = strength;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_knee_matches_soft_threshold() {
        let filter = RendererConfig::default().bloom_threshold_filter();
        assert_relative_eq!(filter.x, 1.0);
        assert_relative_eq!(filter.y, 0.5);
        assert_relative_eq!(filter.z, 1.0);
        assert_relative_eq!(filter.w, 0.25 / 0.500_01, epsilon = 1e-6);
    }

    #[test]
    fn zero_sized_config_is_rejected() {
        assert!(RendererConfig::new(0, 720).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::new(1920, 1080).validate().is_ok());
    }

    #[test]
    fn post_process_defaults() {
        let settings = PostProcessSettings::default();
        assert_relative_eq!(settings.vignette_radius, 0.75);
        assert_relative_eq!(settings.chromatic_distortion_blue.x, -0.0003);
        assert!(settings.is_animated);
    }
}
