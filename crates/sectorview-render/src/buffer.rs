//! Vertex, index, instance, and uniform buffer creation.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Corners of the unit cube `[0, 1]³`. Corner `i` has `x = i & 1`,
/// `y = (i >> 1) & 1`, `z = (i >> 2) & 1`.
pub const UNIT_CUBE_CORNERS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
];

/// Twelve triangles of the unit cube, counter-clockwise seen from outside.
pub const UNIT_CUBE_INDICES: [u16; 36] = [
    0, 2, 3, 0, 3, 1, // -Z
    4, 5, 7, 4, 7, 6, // +Z
    0, 4, 6, 0, 6, 2, // -X
    1, 3, 7, 1, 7, 5, // +X
    0, 1, 5, 0, 5, 4, // -Y
    2, 6, 7, 2, 7, 3, // +Y
];

/// An indexed mesh uploaded to the GPU.
pub struct MeshBuffer {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub index_format: wgpu::IndexFormat,
}

impl MeshBuffer {
    /// Bind vertex buffer slot 0 and the index buffer.
    pub fn bind<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>) {
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), self.index_format);
    }

    /// Draw `instance_count` instances of the whole mesh.
    pub fn draw_instanced(&self, render_pass: &mut wgpu::RenderPass, instance_count: u32) {
        render_pass.draw_indexed(0..self.index_count, 0, 0..instance_count);
    }

    /// Release both buffers immediately.
    pub fn destroy(&self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }
}

/// Index data that can be either u16 or u32 format.
pub enum IndexData<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl IndexData<'_> {
    pub fn format(&self) -> wgpu::IndexFormat {
        match self {
            IndexData::U16(_) => wgpu::IndexFormat::Uint16,
            IndexData::U32(_) => wgpu::IndexFormat::Uint32,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            IndexData::U16(data) => data.len() as u32,
            IndexData::U32(data) => data.len() as u32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(data) => bytemuck::cast_slice(data),
            IndexData::U32(data) => bytemuck::cast_slice(data),
        }
    }
}

/// Creates GPU buffers on one device.
pub struct BufferAllocator<'a> {
    device: &'a wgpu::Device,
}

impl<'a> BufferAllocator<'a> {
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self { device }
    }

    /// Create a complete mesh buffer from vertex and index data.
    pub fn create_mesh(&self, label: &str, vertices: &[u8], indices: IndexData) -> MeshBuffer {
        let vertex_buffer = self.init_buffer(
            &format!("{label}-vertices"),
            vertices,
            wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = self.init_buffer(
            &format!("{label}-indices"),
            indices.as_bytes(),
            wgpu::BufferUsages::INDEX,
        );

        MeshBuffer {
            vertex_buffer,
            index_buffer,
            index_count: indices.count(),
            index_format: indices.format(),
        }
    }

    /// Upload the unit cube as a position-only indexed mesh.
    pub fn create_unit_cube(&self, label: &str) -> MeshBuffer {
        let vertices: Vec<VertexPosition> = UNIT_CUBE_CORNERS
            .iter()
            .map(|&position| VertexPosition { position })
            .collect();
        self.create_mesh(
            label,
            bytemuck::cast_slice(&vertices),
            IndexData::U16(&UNIT_CUBE_INDICES),
        )
    }

    /// Create a per-instance vertex buffer.
    pub fn create_instance_buffer<T: Pod>(&self, label: &str, instances: &[T]) -> wgpu::Buffer {
        self.init_buffer(
            label,
            bytemuck::cast_slice(instances),
            wgpu::BufferUsages::VERTEX,
        )
    }

    /// Create a uniform buffer that can be rewritten with `Queue::write_buffer`.
    pub fn create_uniform_buffer<T: Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.init_buffer(
            label,
            bytemuck::bytes_of(value),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )
    }

    fn init_buffer(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }
}

/// Position-only vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VertexPosition {
    pub position: [f32; 3],
}

impl VertexPosition {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<VertexPosition>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn corner(i: u16) -> Vec3 {
        Vec3::from(UNIT_CUBE_CORNERS[i as usize])
    }

    #[test]
    fn test_corner_bit_layout() {
        for (i, c) in UNIT_CUBE_CORNERS.iter().enumerate() {
            assert_eq!(c[0], (i & 1) as f32);
            assert_eq!(c[1], ((i >> 1) & 1) as f32);
            assert_eq!(c[2], ((i >> 2) & 1) as f32);
        }
    }

    #[test]
    fn test_cube_triangles_face_outward() {
        let center = Vec3::splat(0.5);
        for tri in UNIT_CUBE_INDICES.chunks_exact(3) {
            let (a, b, c) = (corner(tri[0]), corner(tri[1]), corner(tri[2]));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(
                normal.dot(centroid - center) > 0.0,
                "triangle {tri:?} faces inward"
            );
        }
    }

    #[test]
    fn test_index_data_u16() {
        let data = IndexData::U16(&UNIT_CUBE_INDICES);
        assert_eq!(data.count(), 36);
        assert_eq!(data.format(), wgpu::IndexFormat::Uint16);
        assert_eq!(data.as_bytes().len(), 72);
    }

    #[test]
    fn test_index_data_u32() {
        let indices = [0u32, 1, 2];
        let data = IndexData::U32(&indices);
        assert_eq!(data.format(), wgpu::IndexFormat::Uint32);
        assert_eq!(data.as_bytes().len(), 12);
    }

    #[test]
    fn test_vertex_position_layout() {
        let layout = VertexPosition::layout();
        assert_eq!(layout.array_stride, 12);
        assert_eq!(layout.attributes.len(), 1);
        assert_eq!(layout.attributes[0].format, wgpu::VertexFormat::Float32x3);
    }
}
