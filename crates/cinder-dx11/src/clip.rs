//! Clip-space conventions.

use glam::{Mat4, Vec4};

/// Remap a GL-style projection with depth in `[-w, w]` to D3D's `[0, w]`.
pub fn gl_to_d3d_depth(projection: &mut Mat4) {
    let remap = Mat4::from_cols(
        Vec4::X,
        Vec4::Y,
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 1.0),
    );
    *projection = remap * *projection;
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::Vec3;

    use super::*;

    #[test]
    fn near_and_far_planes_land_on_zero_and_one() {
        let mut projection = Mat4::perspective_rh_gl(1.0, 1.5, 0.1, 100.0);
        gl_to_d3d_depth(&mut projection);

        let near = projection.project_point3(Vec3::new(0.0, 0.0, -0.1));
        let far = projection.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert_relative_eq!(near.z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn x_and_y_are_untouched() {
        let original = Mat4::perspective_rh_gl(1.2, 1.0, 0.5, 50.0);
        let mut projection = original;
        gl_to_d3d_depth(&mut projection);
        let p = Vec3::new(1.0, -2.0, -10.0);
        let a = original.project_point3(p);
        let b = projection.project_point3(p);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-6);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-6);
    }
}
