//! GPU resources for light entities, kept in sync with the ECS world.
//!
//! Resources are created the first frame an entity carries a light,
//! rebuilt when its shadow resolution changes and released once the entity
//! or its light component is gone.

use cinder_core::math::{
    directional_shadow_projection, directional_shadow_view, safe_up, spot_shadow_projection,
    spot_shadow_view, SHADOW_BIAS,
};
use cinder_core::{DirectionalLight, PointLight, SpotLight, Transform};
use cinder_rhi::{
    Binding, BufferCreateInfo, BufferHandle, Core, DescriptorSetCreateInfo, DescriptorSetHandle,
    FramebufferCreateInfo, FramebufferHandle, ImageCreateInfo, ImageHandle, RenderPassHandle,
};
use glam::Mat4;
use hashbrown::{HashMap, HashSet};
use hecs::{Entity, World};
use tracing::debug;

use crate::error::Result;
use crate::layouts::DescriptorLayouts;
use crate::passes::{create_shadow_pass, ShadowKind, SHADOW_MAP_FORMAT};
use crate::uniforms::{DirectionalLightUbo, PointLightUbo, ShadowUbo, SpotLightUbo};

#[derive(Clone, Copy, Debug)]
pub struct PointLightResources {
    pub uniform_buffer: BufferHandle,
    pub descriptor_set: DescriptorSetHandle,
}

impl PointLightResources {
    fn new<C: Core>(core: &mut C, layouts: &DescriptorLayouts) -> Result<Self> {
        let uniform_buffer = core.create_buffer(&BufferCreateInfo::uniform("LightUbo", PointLightUbo::SIZE))?;
        let descriptor_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Point Light Descriptor Set",
            layout: layouts.point_light,
            bindings: &[Binding::uniform_buffer(uniform_buffer)],
        })?;
        Ok(Self {
            uniform_buffer,
            descriptor_set,
        })
    }

    fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        core.delete_descriptor_set(self.descriptor_set)?;
        core.delete_buffer(self.uniform_buffer)?;
        Ok(())
    }
}

/// A light that renders a shadow map before the G-buffer pass.
#[derive(Clone, Copy, Debug)]
pub struct ShadowedLightResources {
    pub resolution: u32,
    pub light_buffer: BufferHandle,
    /// Set 2 of the lighting pipeline: light UBO plus shadow map.
    pub light_set: DescriptorSetHandle,
    pub shadow_pass: RenderPassHandle,
    pub shadow_map: ImageHandle,
    pub shadow_framebuffer: FramebufferHandle,
    pub shadow_buffer: BufferHandle,
    /// Replaces the engine set while the geometry renders into the shadow map.
    pub shadow_set: DescriptorSetHandle,
}

impl ShadowedLightResources {
    fn new<C: Core>(
        core: &mut C,
        layouts: &DescriptorLayouts,
        kind: ShadowKind,
        resolution: u32,
        light_ubo_size: u64,
    ) -> Result<Self> {
        let shadow_pass = create_shadow_pass(core, kind.render_pass_name())?;
        let shadow_map = core.create_image(
            &ImageCreateInfo::depth_target(kind.depth_image_name(), SHADOW_MAP_FORMAT, resolution, resolution)
                .with_mip_levels(1),
        )?;
        let shadow_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Shadow Map Framebuffer",
            render_pass: shadow_pass,
            color_attachments: &[],
            depth_attachment: Some(shadow_map),
            width: resolution,
            height: resolution,
        })?;

        let light_buffer = core.create_buffer(&BufferCreateInfo::uniform("LightUbo", light_ubo_size))?;
        let light_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Shadowmapped Light Descriptor Set",
            layout: layouts.shadowed_light,
            bindings: &[Binding::uniform_buffer(light_buffer), Binding::depth_image(shadow_map)],
        })?;

        let shadow_buffer = core.create_buffer(&BufferCreateInfo::uniform("ShadowMapUbo", ShadowUbo::SIZE))?;
        let shadow_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Shadow Map Descriptor Set",
            layout: layouts.shadow,
            bindings: &[Binding::uniform_buffer(shadow_buffer)],
        })?;

        Ok(Self {
            resolution,
            light_buffer,
            light_set,
            shadow_pass,
            shadow_map,
            shadow_framebuffer,
            shadow_buffer,
            shadow_set,
        })
    }

    fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        core.delete_descriptor_set(self.shadow_set)?;
        core.delete_buffer(self.shadow_buffer)?;
        core.delete_descriptor_set(self.light_set)?;
        core.delete_buffer(self.light_buffer)?;
        core.delete_framebuffer(self.shadow_framebuffer)?;
        core.delete_image(self.shadow_map)?;
        core.delete_render_pass(self.shadow_pass)?;
        Ok(())
    }
}

/// Bias matrix times the light's API-adjusted view-projection.
fn light_space<C: Core>(core: &C, mut projection: Mat4, view: Mat4) -> (Mat4, Mat4) {
    core.adjust_perspective(&mut projection);
    let view_projection = projection * view;
    (view_projection, SHADOW_BIAS * view_projection)
}

/// Look up `entity` in `map`, creating or rebuilding it at `resolution`.
fn ensure_shadowed<C: Core>(
    core: &mut C,
    layouts: &DescriptorLayouts,
    map: &mut HashMap<Entity, ShadowedLightResources>,
    entity: Entity,
    kind: ShadowKind,
    resolution: u32,
    light_ubo_size: u64,
) -> Result<ShadowedLightResources> {
    if let Some(existing) = map.get(&entity).copied() {
        if existing.resolution == resolution {
            return Ok(existing);
        }
        debug!(
            "Shadow resolution of {entity:?} changed {} -> {resolution}, rebuilding",
            existing.resolution
        );
        existing.destroy(core)?;
        map.remove(&entity);
    }
    let created = ShadowedLightResources::new(core, layouts, kind, resolution, light_ubo_size)?;
    map.insert(entity, created);
    Ok(created)
}

fn release<C: Core, R>(
    core: &mut C,
    map: &mut HashMap<Entity, R>,
    seen: &HashSet<Entity>,
    destroy: impl Fn(&R, &mut C) -> Result<()>,
) -> Result<()> {
    let stale: Vec<Entity> = map.keys().filter(|entity| !seen.contains(*entity)).copied().collect();
    for entity in stale {
        if let Some(resources) = map.remove(&entity) {
            destroy(&resources, core)?;
            debug!("Released light resources of {entity:?}");
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct LightCache {
    point: HashMap<Entity, PointLightResources>,
    spot: HashMap<Entity, ShadowedLightResources>,
    directional: HashMap<Entity, ShadowedLightResources>,
}

impl LightCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create, rebuild or release resources to match `world`, then upload
    /// every light's uniforms.
    pub fn sync<C: Core>(&mut self, core: &mut C, world: &World, layouts: &DescriptorLayouts) -> Result<()> {
        let mut seen = HashSet::new();
        for (entity, (transform, light)) in world.query::<(&Transform, &PointLight)>().iter() {
            seen.insert(entity);
            let resources = match self.point.get(&entity) {
                Some(existing) => *existing,
                None => {
                    let created = PointLightResources::new(core, layouts)?;
                    self.point.insert(entity, created);
                    created
                }
            };
            let ubo = PointLightUbo {
                color: light.color,
                attenuation_radius: light.attenuation_radius,
                position: transform.position,
                intensity: light.intensity,
            };
            core.upload_pod(resources.uniform_buffer, &ubo)?;
        }
        release(core, &mut self.point, &seen, PointLightResources::destroy)?;

        seen.clear();
        for (entity, (transform, light)) in world.query::<(&Transform, &SpotLight)>().iter() {
            seen.insert(entity);
            let resolution = light.shadow_map_size();
            let resources = ensure_shadowed(
                core,
                layouts,
                &mut self.spot,
                entity,
                ShadowKind::Spot,
                resolution,
                SpotLightUbo::SIZE,
            )?;

            let forward = transform.forward();
            let (view_projection, shadow_matrix) = light_space(
                core,
                spot_shadow_projection(light.outer_angle, light.attenuation_radius),
                spot_shadow_view(transform.position, forward, safe_up(forward, transform.up())),
            );
            let ubo = SpotLightUbo {
                shadow_matrix,
                color: light.color,
                attenuation_radius: light.attenuation_radius,
                position: transform.position,
                intensity: light.intensity,
                direction: forward,
                inner_angle: light.inner_angle.to_radians().cos(),
                outer_angle: light.outer_angle.to_radians().cos(),
                shadow_resolution: resolution as f32,
                _pad0: [0.0; 2],
            };
            core.upload_pod(resources.light_buffer, &ubo)?;
            core.upload_pod(resources.shadow_buffer, &ShadowUbo { shadow_matrix: view_projection })?;
        }
        release(core, &mut self.spot, &seen, ShadowedLightResources::destroy)?;

        seen.clear();
        for (entity, (transform, light)) in world.query::<(&Transform, &DirectionalLight)>().iter() {
            seen.insert(entity);
            let resolution = light.shadow_map_size();
            let resources = ensure_shadowed(
                core,
                layouts,
                &mut self.directional,
                entity,
                ShadowKind::Directional,
                resolution,
                DirectionalLightUbo::SIZE,
            )?;

            let forward = transform.forward();
            let (view_projection, shadow_matrix) = light_space(
                core,
                directional_shadow_projection(),
                directional_shadow_view(forward, safe_up(forward, transform.up())),
            );
            let ubo = DirectionalLightUbo {
                shadow_matrix,
                color: light.color,
                source_radius: light.source_radius,
                direction: forward,
                intensity: light.intensity,
                shadow_resolution: resolution as f32,
                _pad0: [0.0; 3],
            };
            core.upload_pod(resources.light_buffer, &ubo)?;
            core.upload_pod(resources.shadow_buffer, &ShadowUbo { shadow_matrix: view_projection })?;
        }
        release(core, &mut self.directional, &seen, ShadowedLightResources::destroy)?;

        Ok(())
    }

    pub fn point_lights(&self) -> impl Iterator<Item = &PointLightResources> {
        self.point.values()
    }

    pub fn spot_lights(&self) -> impl Iterator<Item = &ShadowedLightResources> {
        self.spot.values()
    }

    pub fn directional_lights(&self) -> impl Iterator<Item = &ShadowedLightResources> {
        self.directional.values()
    }

    /// Every light that renders a shadow map.
    pub fn shadowed_lights(&self) -> impl Iterator<Item = &ShadowedLightResources> {
        self.spot.values().chain(self.directional.values())
    }

    pub fn spot_light(&self, entity: Entity) -> Option<&ShadowedLightResources> {
        self.spot.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.point.len() + self.spot.len() + self.directional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        for (_, resources) in self.point.drain() {
            resources.destroy(core)?;
        }
        for (_, resources) in self.spot.drain().chain(self.directional.drain()) {
            resources.destroy(core)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cinder_rhi::headless::HeadlessCore;
    use glam::Vec3;

    fn setup() -> (HeadlessCore, DescriptorLayouts, LightCache) {
        let mut core = HeadlessCore::new();
        let layouts = DescriptorLayouts::new(&mut core).unwrap();
        (core, layouts, LightCache::new())
    }

    #[test]
    fn point_light_uniforms_follow_the_entity() {
        let (mut core, layouts, mut lights) = setup();
        let mut world = World::new();
        let entity = world.spawn((
            Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
            PointLight {
                intensity: 4.0,
                ..PointLight::default()
            },
        ));

        lights.sync(&mut core, &world, &layouts).unwrap();
        let buffer = lights.point_lights().next().unwrap().uniform_buffer;
        let ubo: PointLightUbo = core.read_pod(buffer).unwrap();
        assert_eq!(ubo.position, Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(ubo.intensity, 4.0);

        world.get::<&mut Transform>(entity).unwrap().position = Vec3::ZERO;
        lights.sync(&mut core, &world, &layouts).unwrap();
        let ubo: PointLightUbo = core.read_pod(buffer).unwrap();
        assert_eq!(ubo.position, Vec3::ZERO);
        assert_eq!(core.stats().created("buffer"), 1);
    }

    #[test]
    fn spot_light_is_rebuilt_on_resolution_change() {
        let (mut core, layouts, mut lights) = setup();
        let mut world = World::new();
        let entity = world.spawn((
            Transform::looking_at(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO),
            SpotLight {
                shadow_resolution: 512,
                ..SpotLight::default()
            },
        ));

        lights.sync(&mut core, &world, &layouts).unwrap();
        let first = *lights.spot_light(entity).unwrap();
        let map = core.resources().image(first.shadow_map).unwrap();
        assert_eq!((map.width, map.height), (512, 512));

        let ubo: SpotLightUbo = core.read_pod(first.light_buffer).unwrap();
        assert_relative_eq!(ubo.inner_angle, 20f32.to_radians().cos());
        assert_relative_eq!(ubo.outer_angle, 30f32.to_radians().cos());
        assert_relative_eq!(ubo.direction.y, -1.0, epsilon = 1e-5);

        lights.sync(&mut core, &world, &layouts).unwrap();
        assert_eq!(core.stats().created("render pass"), 1);

        world.get::<&mut SpotLight>(entity).unwrap().shadow_resolution = 2048;
        lights.sync(&mut core, &world, &layouts).unwrap();
        let second = *lights.spot_light(entity).unwrap();
        assert_eq!(second.resolution, 2048);
        assert!(core.resources().image(first.shadow_map).is_err());
        assert_eq!(core.stats().created("render pass"), 2);
        assert_eq!(core.stats().deleted("render pass"), 1);
    }

    #[test]
    fn shadow_resources_are_named_after_their_light() {
        let (mut core, layouts, mut lights) = setup();
        let mut world = World::new();
        world.spawn((Transform::default(), DirectionalLight::default()));
        world.spawn((
            Transform::looking_at(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO),
            SpotLight::default(),
        ));
        lights.sync(&mut core, &world, &layouts).unwrap();

        let names = |resources: &ShadowedLightResources| {
            let pass = core.resources().render_pass(resources.shadow_pass).unwrap();
            let map = core.resources().image(resources.shadow_map).unwrap();
            (pass.debug_name.clone(), map.debug_name.clone())
        };
        let sun = names(lights.directional_lights().next().unwrap());
        assert_eq!(sun.0, "Directional Shadow Render Pass");
        assert_eq!(sun.1, "Directional Shadow Map Depth Image");
        let spot = names(lights.spot_lights().next().unwrap());
        assert_eq!(spot.0, "Spotlight Shadow Render Pass");
        assert_eq!(spot.1, "Spot Shadow Map Depth Image");
    }

    #[test]
    fn despawned_lights_are_released() {
        let (mut core, layouts, mut lights) = setup();
        let mut world = World::new();
        let sun = world.spawn((Transform::default(), DirectionalLight::default()));
        world.spawn((Transform::default(), PointLight::default()));

        lights.sync(&mut core, &world, &layouts).unwrap();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights.shadowed_lights().count(), 1);

        world.despawn(sun).unwrap();
        lights.sync(&mut core, &world, &layouts).unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(core.stats().deleted("image"), 1);
        assert_eq!(core.stats().deleted("framebuffer"), 1);

        lights.destroy(&mut core).unwrap();
        assert!(lights.is_empty());
        assert_eq!(core.stats().deleted("buffer"), core.stats().created("buffer"));
    }
}
