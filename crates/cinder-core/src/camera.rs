//! Camera and view management.

use glam::{Mat4, Vec3};

/// Perspective camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 8.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

impl Camera {
    /// Create a camera looking at `target`.
    pub fn new(position: Vec3, target: Vec3, fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up: Vec3::Y,
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio from a framebuffer size.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    /// Place the camera on a sphere around `center` and face it.
    ///
    /// `yaw` and `pitch` are in radians; pitch is clamped short of the poles.
    pub fn orbit(&mut self, center: Vec3, radius: f32, yaw: f32, pitch: f32) {
        let pitch = pitch.clamp(-1.5, 1.5);
        let offset = Vec3::new(
            radius * pitch.cos() * yaw.sin(),
            radius * pitch.sin(),
            radius * pitch.cos() * yaw.cos(),
        );
        self.position = center + offset;
        self.look_at(center);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// GL-style projection. Backends adjust it for their clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::near_far_from_projection;
    use approx::assert_relative_eq;

    #[test]
    fn orbit_faces_the_center() {
        let mut camera = Camera::default();
        camera.orbit(Vec3::ZERO, 10.0, 0.5, 0.3);
        assert_relative_eq!(camera.position.length(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(camera.direction.dot(-camera.position.normalize()), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_planes_are_recoverable() {
        let camera = Camera::default();
        let (near, far) = near_far_from_projection(&camera.projection_matrix());
        assert_relative_eq!(near, camera.near, epsilon = 1e-4);
        assert_relative_eq!(far, camera.far, max_relative = 1e-3);
    }
}
