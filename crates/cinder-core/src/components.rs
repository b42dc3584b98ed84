//! Scene components read by the renderer.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SHADOW_RESOLUTION, MAX_SHADOW_RESOLUTION, MIN_SHADOW_RESOLUTION};

/// World transform of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Transform at `position` whose forward axis points at `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let forward = (target - position).normalize_or_zero();
        let rotation = if forward == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(Vec3::NEG_Z, forward)
        };
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    /// -Z rotated into world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// +Y rotated into world space.
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

fn clamp_shadow_resolution(resolution: u32) -> u32 {
    resolution.clamp(MIN_SHADOW_RESOLUTION, MAX_SHADOW_RESOLUTION)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub color: Vec3,
    pub attenuation_radius: f32,
    pub intensity: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            attenuation_radius: 10.0,
            intensity: 1.0,
        }
    }
}

/// Cone light. Angles are half-angles in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpotLight {
    pub color: Vec3,
    pub attenuation_radius: f32,
    pub intensity: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub shadow_resolution: u32,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            attenuation_radius: 20.0,
            intensity: 1.0,
            inner_angle: 20.0,
            outer_angle: 30.0,
            shadow_resolution: DEFAULT_SHADOW_RESOLUTION,
        }
    }
}

impl SpotLight {
    /// Shadow map edge clamped to the supported range.
    pub fn shadow_map_size(&self) -> u32 {
        clamp_shadow_resolution(self.shadow_resolution)
    }
}

/// Light infinitely far away, shining along the entity's forward axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub source_radius: f32,
    pub intensity: f32,
    pub shadow_resolution: u32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            source_radius: 0.0,
            intensity: 1.0,
            shadow_resolution: DEFAULT_SHADOW_RESOLUTION,
        }
    }
}

impl DirectionalLight {
    /// Shadow map edge clamped to the supported range.
    pub fn shadow_map_size(&self) -> u32 {
        clamp_shadow_resolution(self.shadow_resolution)
    }
}

/// Image-based lighting source, referenced by asset address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMap {
    pub specular_texture: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn looking_at_sets_forward() {
        let transform = Transform::looking_at(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO);
        let forward = transform.forward();
        assert_relative_eq!(forward.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn shadow_resolution_is_clamped() {
        let light = SpotLight {
            shadow_resolution: 1,
            ..SpotLight::default()
        };
        assert_eq!(light.shadow_map_size(), MIN_SHADOW_RESOLUTION);

        let light = DirectionalLight {
            shadow_resolution: 1 << 20,
            ..DirectionalLight::default()
        };
        assert_eq!(light.shadow_map_size(), MAX_SHADOW_RESOLUTION);
    }
}
