use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::gpu::WGPU;

/// Floats per interleaved vertex: position, normal, uv.
pub const FLOATS_PER_VERTEX: usize = 8;
pub const VERTEX_STRIDE: u64 = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as u64;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

/// Bounding geometry the ray marcher rasterizes to spawn one ray per
/// covered fragment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyMesh {
    pub vertices: Vec<f32>,
    pub indices: Vec<u16>,
}

impl ProxyMesh {
    pub fn new(vertices: Vec<f32>, indices: Vec<u16>) -> Self {
        Self { vertices, indices }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / FLOATS_PER_VERTEX
    }

    /// Axis aligned cube spanning `[-1, 1]^3`, four vertices per face so
    /// every face carries its own normal. Triangles wind counter-clockwise
    /// seen from outside.
    pub fn unit_cube() -> Self {
        // (normal, u, v) with u × v = normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut uvs = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (face, (normal, u, v)) in faces.into_iter().enumerate() {
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (a, b) in corners {
                positions.push(normal + u * a + v * b);
                normals.push(normal);
                uvs.push(Vec2::new((a + 1.0) * 0.5, (b + 1.0) * 0.5));
            }
            let base = (face * 4) as u16;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(pack_interleaved(&positions, &normals, &uvs), indices)
    }
}

/// Interleave per-vertex attributes as `[px, py, pz, nx, ny, nz, u, v]`.
/// Missing normals or uvs are written as zeros.
pub fn pack_interleaved(positions: &[Vec3], normals: &[Vec3], uvs: &[Vec2]) -> Vec<f32> {
    let mut vertices = Vec::with_capacity(positions.len() * FLOATS_PER_VERTEX);
    for (i, position) in positions.iter().enumerate() {
        let normal = normals.get(i).copied().unwrap_or(Vec3::ZERO);
        let uv = uvs.get(i).copied().unwrap_or(Vec2::ZERO);
        vertices.extend_from_slice(&position.to_array());
        vertices.extend_from_slice(&normal.to_array());
        vertices.extend_from_slice(&uv.to_array());
    }
    vertices
}

/// A [`ProxyMesh`] uploaded to vertex and index buffers.
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn new(wgpu: &WGPU, mesh: &ProxyMesh) -> Self {
        let vertex_buffer = wgpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Proxy Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        // Index buffers must be a multiple of 4 bytes long.
        let mut indices = mesh.indices.clone();
        if indices.len() % 2 == 1 {
            indices.push(0);
        }
        let index_buffer = wgpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Proxy Mesh Index Buffer"),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }

    pub fn vertex_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: VERTEX_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mesh: &ProxyMesh, index: u16) -> Vec3 {
        let offset = index as usize * FLOATS_PER_VERTEX;
        Vec3::from_slice(&mesh.vertices[offset..offset + 3])
    }

    fn normal(mesh: &ProxyMesh, index: u16) -> Vec3 {
        let offset = index as usize * FLOATS_PER_VERTEX + 3;
        Vec3::from_slice(&mesh.vertices[offset..offset + 3])
    }

    #[test]
    fn cube_has_separate_faces() {
        let cube = ProxyMesh::unit_cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertex_count()));
        for chunk in cube.vertices.chunks_exact(FLOATS_PER_VERTEX) {
            assert!(chunk[..3].iter().all(|c| c.abs() == 1.0));
        }
    }

    #[test]
    fn cube_winds_counter_clockwise_from_outside() {
        let cube = ProxyMesh::unit_cube();
        for triangle in cube.indices.chunks_exact(3) {
            let a = position(&cube, triangle[0]);
            let b = position(&cube, triangle[1]);
            let c = position(&cube, triangle[2]);
            let winding = (b - a).cross(c - a).normalize();
            assert_eq!(winding, normal(&cube, triangle[0]));
            // outward: the face center lies along its normal
            assert!((a + b + c).dot(winding) > 0.0);
        }
    }

    #[test]
    fn packs_attributes_with_stride_eight() {
        let vertices = pack_interleaved(
            &[Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)],
            &[Vec3::Z],
            &[Vec2::new(0.25, 0.75), Vec2::ONE],
        );
        assert_eq!(
            vertices,
            vec![
                1.0, 2.0, 3.0, 0.0, 0.0, 1.0, 0.25, 0.75, //
                4.0, 5.0, 6.0, 0.0, 0.0, 0.0, 1.0, 1.0,
            ]
        );
        assert_eq!(VERTEX_STRIDE, 32);
        assert_eq!(VERTEX_ATTRIBUTES[1].offset, 12);
        assert_eq!(VERTEX_ATTRIBUTES[2].offset, 24);
    }
}
