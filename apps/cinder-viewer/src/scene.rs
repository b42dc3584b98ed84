//! The demo scene: a ground plane, a ring of cubes and one light of each kind.

use std::f32::consts::TAU;

use cinder_core::{DirectionalLight, PointLight, SpotLight, Transform};
use glam::{Quat, Vec3};
use hecs::World;

use crate::geometry::{MeshInstance, MeshKind};

const CUBE_COUNT: usize = 6;
const RING_RADIUS: f32 = 3.0;
const GROUND_SIZE: f32 = 24.0;

/// Rotation about +Y in radians per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spin(pub f32);

pub fn build_scene() -> World {
    let mut world = World::new();

    world.spawn((
        Transform {
            scale: Vec3::new(GROUND_SIZE, 1.0, GROUND_SIZE),
            ..Transform::default()
        },
        MeshInstance {
            mesh: MeshKind::Plane,
            albedo: Vec3::splat(0.6),
            roughness: 0.9,
            metallic: 0.0,
        },
    ));

    for i in 0..CUBE_COUNT {
        let t = i as f32 / CUBE_COUNT as f32;
        let angle = t * TAU;
        let position = Vec3::new(angle.cos() * RING_RADIUS, 0.5, angle.sin() * RING_RADIUS);
        world.spawn((
            Transform::from_position(position),
            MeshInstance {
                mesh: MeshKind::Cube,
                albedo: Vec3::new(0.9 - 0.6 * t, 0.3 + 0.5 * t, 0.4),
                roughness: 0.2 + 0.6 * t,
                metallic: if i % 2 == 0 { 0.0 } else { 1.0 },
            },
            Spin(0.5 + t),
        ));
    }

    // Centerpiece.
    world.spawn((
        Transform {
            position: Vec3::new(0.0, 1.0, 0.0),
            scale: Vec3::splat(2.0),
            ..Transform::default()
        },
        MeshInstance {
            mesh: MeshKind::Cube,
            albedo: Vec3::new(0.95, 0.95, 0.95),
            roughness: 0.4,
            metallic: 0.0,
        },
        Spin(0.2),
    ));

    world.spawn((
        Transform::from_position(Vec3::new(0.0, 3.5, 0.0)),
        PointLight {
            color: Vec3::new(1.0, 0.8, 0.6),
            attenuation_radius: 8.0,
            intensity: 4.0,
        },
    ));
    world.spawn((
        Transform::looking_at(Vec3::new(6.0, 7.0, 6.0), Vec3::ZERO),
        SpotLight {
            color: Vec3::new(0.6, 0.8, 1.0),
            attenuation_radius: 20.0,
            intensity: 8.0,
            ..SpotLight::default()
        },
    ));
    world.spawn((
        Transform::looking_at(Vec3::new(-4.0, 10.0, 3.0), Vec3::ZERO),
        DirectionalLight {
            intensity: 1.5,
            ..DirectionalLight::default()
        },
    ));

    world
}

/// Turn every spinning entity by `dt` seconds worth of rotation.
pub fn animate(world: &mut World, dt: f32) {
    for (_, (transform, spin)) in world.query_mut::<(&mut Transform, &Spin)>() {
        transform.rotation = (Quat::from_rotation_y(spin.0 * dt) * transform.rotation).normalize();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn scene_has_one_light_of_each_kind() {
        let world = build_scene();
        assert_eq!(world.query::<&PointLight>().iter().count(), 1);
        assert_eq!(world.query::<&SpotLight>().iter().count(), 1);
        assert_eq!(world.query::<&DirectionalLight>().iter().count(), 1);
    }

    #[test]
    fn scene_has_ground_and_cubes() {
        let world = build_scene();
        let kinds: Vec<MeshKind> = world
            .query::<&MeshInstance>()
            .iter()
            .map(|(_, instance)| instance.mesh)
            .collect();
        assert_eq!(kinds.iter().filter(|&&k| k == MeshKind::Plane).count(), 1);
        assert_eq!(kinds.iter().filter(|&&k| k == MeshKind::Cube).count(), CUBE_COUNT + 1);
    }

    #[test]
    fn animate_turns_spinning_entities_only() {
        let mut world = World::new();
        let spinning = world.spawn((Transform::default(), Spin(1.0)));
        let still = world.spawn((Transform::default(),));

        animate(&mut world, 0.5);

        let turned = world.get::<&Transform>(spinning).unwrap().rotation;
        assert_relative_eq!(turned.angle_between(Quat::IDENTITY), 0.5, epsilon = 1e-5);
        assert_eq!(world.get::<&Transform>(still).unwrap().rotation, Quat::IDENTITY);
    }
}
