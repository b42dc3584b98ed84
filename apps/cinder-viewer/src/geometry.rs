//! Instanced drawing of the scene's meshes for the deferred renderer.

use bytemuck::{Pod, Zeroable};
use cinder_core::Transform;
use cinder_deferred::passes::create_shadow_pass;
use cinder_deferred::{queues, DeferredRenderer, GeometryRenderer, Result};
use cinder_rhi::{
    BlendState, BufferCreateInfo, BufferHandle, BufferUsage, CommandBuffer, Core, CullMode,
    DepthState, DescriptorSetHandle, DescriptorSetLayoutHandle, Format, GraphicsPipelineCreateInfo,
    GraphicsPipelineHandle, IndexType, MemoryUsage, PrimitiveTopology, RasterState,
    RenderPassHandle, ShaderStageInfo, ShaderStages, VertexAttribute, VertexBindingLayout,
    VertexInputRate,
};
use glam::{Mat4, Vec3, Vec4};
use hecs::World;
use tracing::{debug, info, warn};

use crate::mesh::{self, vertex_layout, GpuMesh};

pub const MESH_PIPELINE: &str = "@VIEWER/mesh";
pub const SHADOW_PIPELINE: &str = "@VIEWER/meshShadow";

const INITIAL_INSTANCE_CAPACITY: u64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshKind {
    Cube,
    Plane,
}

impl MeshKind {
    pub const ALL: [Self; 2] = [Self::Cube, Self::Plane];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Draws an entity's [`Transform`] with one of the built-in meshes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshKind,
    pub albedo: Vec3,
    pub roughness: f32,
    pub metallic: f32,
}

/// Per-instance vertex data, binding 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct InstanceData {
    pub model: Mat4,
    pub albedo: Vec4,
    /// Roughness, metallic, unused, unused.
    pub material: Vec4,
}

pub const INSTANCE_STRIDE: u64 = std::mem::size_of::<InstanceData>() as u64;

fn instance_layout() -> VertexBindingLayout {
    let vec4 = |name: &str, location: u32, offset: u32| {
        VertexAttribute::new(name, location, offset, Format::R32G32B32A32Sfloat)
    };
    VertexBindingLayout {
        stride: INSTANCE_STRIDE as u32,
        input_rate: VertexInputRate::Instance,
        attributes: vec![
            vec4("model0", 2, 0),
            vec4("model1", 3, 16),
            vec4("model2", 4, 32),
            vec4("model3", 5, 48),
            vec4("albedo", 6, 64),
            vec4("material", 7, 80),
        ],
    }
}

/// A run of instances sharing one mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch {
    pub mesh: MeshKind,
    pub first_instance: u32,
    pub count: u32,
}

/// Gather every mesh instance in `world`, grouped by mesh.
pub fn batch_instances(world: &World) -> (Vec<InstanceData>, Vec<Batch>) {
    let mut gathered: Vec<(MeshKind, InstanceData)> = world
        .query::<(&Transform, &MeshInstance)>()
        .iter()
        .map(|(_, (transform, instance))| {
            (
                instance.mesh,
                InstanceData {
                    model: transform.matrix(),
                    albedo: instance.albedo.extend(1.0),
                    material: Vec4::new(instance.roughness, instance.metallic, 0.0, 0.0),
                },
            )
        })
        .collect();
    gathered.sort_by_key(|(kind, _)| *kind);

    let mut batches: Vec<Batch> = Vec::new();
    for (index, (kind, _)) in gathered.iter().enumerate() {
        match batches.last_mut() {
            Some(batch) if batch.mesh == *kind => batch.count += 1,
            _ => batches.push(Batch {
                mesh: *kind,
                first_instance: index as u32,
                count: 1,
            }),
        }
    }
    let instances = gathered.into_iter().map(|(_, data)| data).collect();
    (instances, batches)
}

struct InstanceBuffer {
    buffer: BufferHandle,
    capacity: u64,
}

/// Scene geometry for the opaque and shadow-map queues.
pub struct SceneGeometry {
    meshes: Vec<GpuMesh>,
    instances: Vec<InstanceBuffer>,
    batches: Vec<Batch>,
    frame_index: usize,
    shadow_pass: RenderPassHandle,
    mesh_pipeline: Option<GraphicsPipelineHandle>,
    shadow_pipeline: Option<GraphicsPipelineHandle>,
    engine_set: Option<DescriptorSetHandle>,
}

impl SceneGeometry {
    pub fn new<C: Core>(
        core: &mut C,
        renderer: &DeferredRenderer,
        frames_in_flight: usize,
        mut load: impl FnMut(&str, ShaderStages) -> Option<Vec<u8>>,
    ) -> Result<Self> {
        let meshes = vec![
            GpuMesh::upload(core, "Cube", &mesh::cube())?,
            GpuMesh::upload(core, "Plane", &mesh::plane())?,
        ];
        debug_assert_eq!(meshes.len(), MeshKind::ALL.len());

        let instances = (0..frames_in_flight.max(1))
            .map(|frame| -> Result<InstanceBuffer> {
                let capacity = INITIAL_INSTANCE_CAPACITY * INSTANCE_STRIDE;
                let buffer = core.create_buffer(&BufferCreateInfo::new(
                    &format!("Instance Buffer {frame}"),
                    capacity,
                    BufferUsage::VERTEX,
                    MemoryUsage::CpuToGpu,
                ))?;
                Ok(InstanceBuffer { buffer, capacity })
            })
            .collect::<Result<Vec<_>>>()?;

        let shadow_pass = create_shadow_pass(core, "Mesh Shadow Render Pass")?;
        let layouts = renderer.layouts();
        let mesh_pipeline = build_pipeline(
            core,
            MESH_PIPELINE,
            &mut load,
            &PipelineTarget {
                render_pass: renderer.render_passes().gbuffer,
                set_layout: layouts.engine,
                raster: RasterState::default(),
                blend: &[BlendState::OPAQUE; 3],
            },
        )?;
        let shadow_pipeline = build_pipeline(
            core,
            SHADOW_PIPELINE,
            &mut load,
            &PipelineTarget {
                render_pass: shadow_pass,
                set_layout: layouts.shadow,
                raster: RasterState {
                    cull_mode: CullMode::None,
                    ..RasterState::default()
                },
                blend: &[],
            },
        )?;
        if mesh_pipeline.is_none() {
            warn!("No mesh shaders found; the scene will render without geometry");
        }

        Ok(Self {
            meshes,
            instances,
            batches: Vec::new(),
            frame_index: 0,
            shadow_pass,
            mesh_pipeline,
            shadow_pipeline,
            engine_set: None,
        })
    }

    pub fn instance_count(&self) -> u32 {
        self.batches.iter().map(|batch| batch.count).sum()
    }

    /// Upload this frame's instances. Call before the renderer records.
    pub fn prepare<C: Core>(&mut self, core: &mut C, world: &World, frame_index: usize) -> Result<()> {
        let (instances, batches) = batch_instances(world);
        self.frame_index = frame_index % self.instances.len();
        self.batches = batches;
        if instances.is_empty() {
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(&instances);
        let target = &mut self.instances[self.frame_index];
        let needed = bytes.len() as u64;
        if needed > target.capacity {
            let capacity = needed.next_power_of_two();
            debug!("Growing instance buffer {} to {capacity} bytes", self.frame_index);
            core.resize_buffer(target.buffer, capacity)?;
            target.capacity = capacity;
        }
        core.upload_buffer(target.buffer, 0, bytes)?;
        Ok(())
    }

    pub fn destroy<C: Core>(&mut self, core: &mut C) -> Result<()> {
        for pipeline in [self.mesh_pipeline.take(), self.shadow_pipeline.take()].into_iter().flatten() {
            core.delete_graphics_pipeline(pipeline)?;
        }
        for instances in self.instances.drain(..) {
            core.delete_buffer(instances.buffer)?;
        }
        for mesh in self.meshes.drain(..) {
            mesh.destroy(core)?;
        }
        core.delete_render_pass(self.shadow_pass)?;
        Ok(())
    }
}

struct PipelineTarget<'a> {
    render_pass: RenderPassHandle,
    set_layout: DescriptorSetLayoutHandle,
    raster: RasterState,
    blend: &'a [BlendState],
}

fn build_pipeline<C: Core>(
    core: &mut C,
    address: &str,
    load: &mut impl FnMut(&str, ShaderStages) -> Option<Vec<u8>>,
    target: &PipelineTarget<'_>,
) -> Result<Option<GraphicsPipelineHandle>> {
    let (Some(vertex), Some(fragment)) = (
        load(address, ShaderStages::VERTEX),
        load(address, ShaderStages::FRAGMENT),
    ) else {
        debug!("No shader code for {address}, pipeline left absent");
        return Ok(None);
    };
    let stages = [
        ShaderStageInfo::new(ShaderStages::VERTEX, &vertex),
        ShaderStageInfo::new(ShaderStages::FRAGMENT, &fragment),
    ];
    let pipeline = core.create_graphics_pipeline(&GraphicsPipelineCreateInfo {
        debug_name: address,
        stages: &stages,
        vertex_bindings: &[vertex_layout(), instance_layout()],
        set_layouts: &[target.set_layout],
        render_pass: target.render_pass,
        topology: PrimitiveTopology::TriangleList,
        raster: target.raster,
        depth: DepthState::READ_WRITE,
        blend: target.blend,
    })?;
    info!("Built {address}");
    Ok(Some(pipeline))
}

impl<C: Core> GeometryRenderer<C> for SceneGeometry {
    fn set_engine_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.engine_set = Some(set);
    }

    fn render_queue(
        &mut self,
        _core: &mut C,
        cmd: &mut CommandBuffer,
        _world: &World,
        queue: &str,
    ) -> Result<()> {
        let pipeline = match queue {
            queues::OPAQUE => self.mesh_pipeline,
            queues::SHADOW_MAP => self.shadow_pipeline,
            _ => return Ok(()),
        };
        let (Some(pipeline), Some(set)) = (pipeline, self.engine_set) else {
            return Ok(());
        };
        if self.batches.is_empty() {
            return Ok(());
        }

        let instances = self.instances[self.frame_index].buffer;
        cmd.bind_graphics_pipeline(pipeline)?;
        cmd.bind_graphics_descriptor_sets(0, &[set])?;
        for batch in &self.batches {
            let mesh = &self.meshes[batch.mesh.index()];
            cmd.bind_vertex_buffers(0, &[(mesh.vertices, 0), (instances, 0)])?;
            cmd.bind_index_buffer(mesh.indices, 0, IndexType::Uint16)?;
            cmd.draw_indices(0, mesh.index_count, 0, batch.count, batch.first_instance)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(mesh: MeshKind) -> MeshInstance {
        MeshInstance {
            mesh,
            albedo: Vec3::ONE,
            roughness: 0.5,
            metallic: 0.0,
        }
    }

    #[test]
    fn instances_are_grouped_by_mesh() {
        let mut world = World::new();
        world.spawn((Transform::default(), instance(MeshKind::Plane)));
        world.spawn((Transform::default(), instance(MeshKind::Cube)));
        world.spawn((Transform::default(), instance(MeshKind::Plane)));
        world.spawn((Transform::default(), instance(MeshKind::Cube)));
        world.spawn((Transform::default(), instance(MeshKind::Cube)));
        // No transform: not drawn.
        world.spawn((instance(MeshKind::Cube),));

        let (instances, batches) = batch_instances(&world);
        assert_eq!(instances.len(), 5);
        assert_eq!(
            batches,
            vec![
                Batch {
                    mesh: MeshKind::Cube,
                    first_instance: 0,
                    count: 3
                },
                Batch {
                    mesh: MeshKind::Plane,
                    first_instance: 3,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn instance_data_carries_transform_and_material() {
        let mut world = World::new();
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        world.spawn((
            transform,
            MeshInstance {
                mesh: MeshKind::Cube,
                albedo: Vec3::new(0.2, 0.4, 0.6),
                roughness: 0.3,
                metallic: 1.0,
            },
        ));

        let (instances, _) = batch_instances(&world);
        assert_eq!(instances[0].model, transform.matrix());
        assert_eq!(instances[0].albedo, Vec4::new(0.2, 0.4, 0.6, 1.0));
        assert_eq!(instances[0].material, Vec4::new(0.3, 1.0, 0.0, 0.0));
    }

    #[test]
    fn instance_layout_covers_the_struct() {
        let layout = instance_layout();
        assert_eq!(u64::from(layout.stride), INSTANCE_STRIDE);
        assert_eq!(INSTANCE_STRIDE, 96);
        let last = layout.attributes.last().unwrap();
        assert_eq!(u64::from(last.offset) + 16, INSTANCE_STRIDE);
    }

    #[test]
    fn empty_world_has_no_batches() {
        let (instances, batches) = batch_instances(&World::new());
        assert!(instances.is_empty());
        assert!(batches.is_empty());
    }
}
