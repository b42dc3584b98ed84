//! Projection helpers shared by the renderer and the camera.
//!
//! Projections are right-handed with a GL-style `[-1, 1]` depth range.
//! Backends with a different clip space fix them up through
//! `Core::adjust_perspective`.

use glam::{Mat4, Vec3, Vec4};

/// Half extent of the orthographic box a directional light shadows.
pub const DIRECTIONAL_SHADOW_HALF_SIZE: f32 = 40.0;
/// Depth of the directional shadow box.
pub const DIRECTIONAL_SHADOW_DEPTH: f32 = 160.0;
/// How far back along its direction a directional light is placed.
pub const DIRECTIONAL_SHADOW_DISTANCE: f32 = 100.0;
/// Near plane of spot light shadow frusta.
pub const SPOT_SHADOW_NEAR: f32 = 0.1;

/// Maps clip-space `[-1, 1]` x/y to texture-space `[0, 1]`.
pub const SHADOW_BIAS: Mat4 = Mat4::from_cols(
    Vec4::new(0.5, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 0.5, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(0.5, 0.5, 0.0, 1.0),
);

/// Perspective projection of a spot light shadow, before API adjustment.
///
/// The field of view covers the whole outer cone.
pub fn spot_shadow_projection(outer_angle_degrees: f32, attenuation_radius: f32) -> Mat4 {
    let fov = (outer_angle_degrees * 2.0).to_radians();
    let far = attenuation_radius.max(SPOT_SHADOW_NEAR * 2.0);
    Mat4::perspective_rh_gl(fov, 1.0, SPOT_SHADOW_NEAR, far)
}

/// View matrix looking down a spot light's cone.
pub fn spot_shadow_view(position: Vec3, forward: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(position, position + forward, up)
}

/// Orthographic projection of a directional light shadow, before API adjustment.
pub fn directional_shadow_projection() -> Mat4 {
    let h = DIRECTIONAL_SHADOW_HALF_SIZE;
    Mat4::orthographic_rh_gl(-h, h, -h, h, 0.0, DIRECTIONAL_SHADOW_DEPTH)
}

/// View matrix of a directional light, centred on the origin.
pub fn directional_shadow_view(forward: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(forward * -DIRECTIONAL_SHADOW_DISTANCE, Vec3::ZERO, up)
}

/// Recover the near and far planes from a GL-style perspective projection.
///
/// Uses `near = p[3][2] / (p[2][2] - 1)` and `far = p[3][2] / (p[2][2] + 1)`.
pub fn near_far_from_projection(projection: &Mat4) -> (f32, f32) {
    let p32 = projection.w_axis.z;
    let p22 = projection.z_axis.z;
    (p32 / (p22 - 1.0), p32 / (p22 + 1.0))
}

/// `up` unless it is parallel to `forward`, in which case a perpendicular axis.
pub fn safe_up(forward: Vec3, up: Vec3) -> Vec3 {
    if forward.cross(up).length_squared() < 1e-6 {
        if forward.x.abs() < 0.9 {
            Vec3::X
        } else {
            Vec3::Z
        }
    } else {
        up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn near_far_round_trip() {
        let projection = Mat4::perspective_rh_gl(1.0, 16.0 / 9.0, 0.1, 500.0);
        let (near, far) = near_far_from_projection(&projection);
        assert_relative_eq!(near, 0.1, epsilon = 1e-4);
        assert_relative_eq!(far, 500.0, epsilon = 0.5);
    }

    #[test]
    fn bias_maps_clip_to_texture_space() {
        let corner = SHADOW_BIAS * Vec4::new(-1.0, 1.0, 0.25, 1.0);
        assert_relative_eq!(corner.x, 0.0);
        assert_relative_eq!(corner.y, 1.0);
        assert_relative_eq!(corner.z, 0.25);
    }

    #[test]
    fn spot_light_sees_along_its_axis() {
        let view = spot_shadow_view(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = spot_shadow_projection(30.0, 20.0);
        let clip = projection * view * Vec4::new(0.0, 0.0, -10.0, 1.0);
        let ndc = clip / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }

    #[test]
    fn directional_light_covers_the_origin() {
        let forward = Vec3::new(0.3, -1.0, 0.2).normalize();
        let matrix = directional_shadow_projection() * directional_shadow_view(forward, safe_up(forward, Vec3::Y));
        let clip = matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.z > -1.0 && clip.z < 1.0);
        assert!(clip.x.abs() < 1e-4 && clip.y.abs() < 1e-4);
    }

    #[test]
    fn safe_up_avoids_degenerate_basis() {
        assert_eq!(safe_up(Vec3::NEG_Y, Vec3::Y), Vec3::X);
        assert_eq!(safe_up(Vec3::NEG_Z, Vec3::Y), Vec3::Y);
    }
}
