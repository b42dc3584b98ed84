//! Core math and scene types for the Cinder engine.
//!
//! This crate provides:
//! - Projection helpers (light-space matrices, shadow bias, near/far recovery)
//! - A perspective camera
//! - The scene components the renderer reads: transforms, lights and environment maps

pub mod camera;
pub mod components;
pub mod math;

pub use camera::Camera;
pub use components::{DirectionalLight, EnvironmentMap, PointLight, SpotLight, Transform};

/// Engine-wide constants
pub mod constants {
    /// Smallest shadow map edge, in texels
    pub const MIN_SHADOW_RESOLUTION: u32 = 8;
    /// Largest shadow map edge, in texels
    pub const MAX_SHADOW_RESOLUTION: u32 = 16192;
    /// Shadow map edge used when a light does not specify one
    pub const DEFAULT_SHADOW_RESOLUTION: u32 = 1024;
}
