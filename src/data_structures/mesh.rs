//! CPU-side mesh records as stored in a mesh file.

/// A contiguous index range of a mesh, stored as two `int32` in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Submesh {
    pub index_first: i32,
    pub index_count: i32,
}

/// A named morph target. The file format allows exactly one frame per shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlendShape {
    pub name: String,
    /// Frame weight, already divided by 100.
    pub weight: f32,
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 3]>,
}

/// Axis-aligned bounds in mesh space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub center: [f32; 3],
    pub size: [f32; 3],
}

impl Bounds {
    pub fn min(&self) -> [f32; 3] {
        std::array::from_fn(|i| self.center[i] - self.size[i] * 0.5)
    }

    pub fn max(&self) -> [f32; 3] {
        std::array::from_fn(|i| self.center[i] + self.size[i] * 0.5)
    }
}

/// A mesh loaded from one mesh file.
///
/// Meshes live in the [`MeshStore`](crate::resources::mesh::MeshStore) arena
/// and are referenced by `index` everywhere else. The buffer offsets are only
/// meaningful after the scene geometry has been packed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    /// Position in the mesh array, assigned at first load.
    pub index: usize,
    pub name: String,
    pub vertices: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub uv: Vec<[f32; 2]>,
    pub uv2: Vec<[f32; 2]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub bone_weights: Vec<[f32; 4]>,
    pub bone_indices: Vec<[f32; 4]>,
    pub indices: Vec<u16>,
    pub submeshes: Vec<Submesh>,
    /// Row-major, row-vector 4x4 matrices as stored in the file.
    pub bindposes: Vec<[[f32; 4]; 4]>,
    pub blend_shapes: Vec<BlendShape>,
    pub bounds: Bounds,
    /// Byte offset of the first vertex in the shared vertex buffer.
    pub vertex_buffer_offset: u64,
    /// Byte offset of the first index in the shared index buffer.
    pub index_buffer_offset: u64,
}

impl Mesh {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn has_geometry(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty()
    }
}
