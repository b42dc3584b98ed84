//! Built-in meshes and their GPU buffers.

use bytemuck::{Pod, Zeroable};
use cinder_rhi::{
    BufferCreateInfo, BufferHandle, BufferUsage, Core, Format, MemoryUsage, VertexAttribute,
    VertexBindingLayout, VertexInputRate,
};
use glam::Vec3;

use cinder_deferred::Result;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// Binding 0: per-vertex position and normal.
pub fn vertex_layout() -> VertexBindingLayout {
    VertexBindingLayout {
        stride: VERTEX_STRIDE,
        input_rate: VertexInputRate::Vertex,
        attributes: vec![
            VertexAttribute::new("position", 0, 0, Format::R32G32B32Sfloat),
            VertexAttribute::new("normal", 1, 12, Format::R32G32B32Sfloat),
        ],
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshData {
    /// Append a unit square facing `normal`, wound counter-clockwise when
    /// seen from the front. `tangent` must be perpendicular to `normal`.
    fn push_quad(&mut self, center: Vec3, normal: Vec3, tangent: Vec3) {
        let bitangent = normal.cross(tangent);
        let base = self.vertices.len() as u16;
        for (u, v) in [(-0.5_f32, -0.5_f32), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = center + tangent * u + bitangent * v;
            self.vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
            });
        }
        self.indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
    }
}

/// Unit cube centered on the origin with flat-shaded faces.
pub fn cube() -> MeshData {
    let mut mesh = MeshData::default();
    for (normal, tangent) in [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::Z),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::X),
    ] {
        mesh.push_quad(normal * 0.5, normal, tangent);
    }
    mesh
}

/// Unit square in the XZ plane facing +Y.
pub fn plane() -> MeshData {
    let mut mesh = MeshData::default();
    mesh.push_quad(Vec3::ZERO, Vec3::Y, Vec3::Z);
    mesh
}

/// A mesh's vertex and index buffers.
pub struct GpuMesh {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload<C: Core>(core: &mut C, name: &str, data: &MeshData) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
        let vertices = core.create_buffer(
            &BufferCreateInfo::new(
                &format!("{name} Vertices"),
                vertex_bytes.len() as u64,
                BufferUsage::VERTEX,
                MemoryUsage::GpuOnly,
            )
            .with_data(vertex_bytes),
        )?;
        let indices = core.create_buffer(
            &BufferCreateInfo::new(
                &format!("{name} Indices"),
                index_bytes.len() as u64,
                BufferUsage::INDEX,
                MemoryUsage::GpuOnly,
            )
            .with_data(index_bytes),
        )?;
        Ok(Self {
            vertices,
            indices,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        core.delete_buffer(self.vertices)?;
        core.delete_buffer(self.indices)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn assert_front_facing(mesh: &MeshData) {
        for triangle in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| &mesh.vertices[triangle[i] as usize]);
            let (pa, pb, pc) = (Vec3::from(a.position), Vec3::from(b.position), Vec3::from(c.position));
            let face = (pb - pa).cross(pc - pa);
            assert!(face.dot(Vec3::from(a.normal)) > 0.0, "triangle {triangle:?} is wound backwards");
        }
    }

    #[test]
    fn cube_has_flat_faces() {
        let cube = cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        for vertex in &cube.vertices {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert_relative_eq!(normal.length(), 1.0);
            // Every vertex sits on the face its normal points out of.
            assert_relative_eq!(position.dot(normal), 0.5);
            assert_relative_eq!(position.abs().max_element(), 0.5);
        }
        assert_front_facing(&cube);
    }

    #[test]
    fn plane_faces_up() {
        let plane = plane();
        assert_eq!(plane.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(plane.vertices.iter().all(|v| v.position[1] == 0.0 && v.normal == [0.0, 1.0, 0.0]));
        assert_front_facing(&plane);
    }

    #[test]
    fn vertex_layout_matches_vertex() {
        let layout = vertex_layout();
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes[1].offset, 12);
    }
}
