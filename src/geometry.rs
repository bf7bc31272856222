//! Packing of every mesh into one shared vertex buffer and one shared index
//! buffer.
//!
//! Meshes are appended in mesh-array order. Each mesh records where its data
//! starts (in bytes) so acceleration-structure builds and shaders can address
//! it inside the shared buffers. Indices are copied verbatim and stay local to
//! their mesh.

use bytemuck::{Pod, Zeroable};

use crate::{
    context::{ContextError, GeometryDesc, GeometryFlags, IndexFormat, VertexFormat},
    data_structures::mesh::Mesh,
};

/// Interleaved vertex as seen by the raytracing shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;
}

pub const INDEX_SIZE: u64 = std::mem::size_of::<u16>() as u64;

/// Per-mesh lookup data handed to the hit shaders, one entry per mesh index.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshConstants {
    pub mesh_index: u32,
    pub vertex_buffer_offset: u32,
    pub vertex_stride: u32,
    pub index_buffer_offset: u32,
}

impl MeshConstants {
    /// Shader offsets are 32-bit, so meshes placed past 4 GiB are rejected.
    pub fn new(mesh: &Mesh) -> Result<Self, ContextError> {
        let offset = |what: &str, value: u64| {
            u32::try_from(value).map_err(|_| ContextError::InvalidGeometry {
                label: mesh.name.clone(),
                reason: format!("{what} offset {value} does not fit in 32 bits"),
            })
        };
        Ok(Self {
            mesh_index: mesh.index as u32,
            vertex_buffer_offset: offset("vertex buffer", mesh.vertex_buffer_offset)?,
            vertex_stride: Vertex::STRIDE as u32,
            index_buffer_offset: offset("index buffer", mesh.index_buffer_offset)?,
        })
    }
}

/// The shared buffers in CPU memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackedGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl PackedGeometry {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index bytes padded to a multiple of four so the buffer can be viewed
    /// as 32-bit words.
    pub fn index_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&self.indices).to_vec();
        bytes.resize(bytes.len().next_multiple_of(4), 0);
        bytes
    }

    /// Vertices of `mesh`, sliced at its recorded offset.
    pub fn mesh_vertices(&self, mesh: &Mesh) -> &[Vertex] {
        let first = (mesh.vertex_buffer_offset / Vertex::STRIDE) as usize;
        &self.vertices[first..first + mesh.vertex_count()]
    }

    /// Indices of `mesh`, sliced at its recorded offset.
    pub fn mesh_indices(&self, mesh: &Mesh) -> &[u16] {
        let first = (mesh.index_buffer_offset / INDEX_SIZE) as usize;
        &self.indices[first..first + mesh.index_count()]
    }
}

/// Appends every mesh to the shared buffers and records its offsets.
///
/// Missing normals or UVs are zero filled. A mesh without geometry gets a
/// zero-length range at the current end of the buffers.
pub fn pack(meshes: &mut [Mesh]) -> PackedGeometry {
    let vertex_total = meshes.iter().map(Mesh::vertex_count).sum();
    let index_total = meshes.iter().map(Mesh::index_count).sum();
    let mut packed = PackedGeometry {
        vertices: Vec::with_capacity(vertex_total),
        indices: Vec::with_capacity(index_total),
    };

    for mesh in meshes.iter_mut() {
        mesh.vertex_buffer_offset = packed.vertices.len() as u64 * Vertex::STRIDE;
        mesh.index_buffer_offset = packed.indices.len() as u64 * INDEX_SIZE;

        packed
            .vertices
            .extend(mesh.vertices.iter().enumerate().map(|(i, position)| Vertex {
                position: *position,
                normal: mesh.normals.get(i).copied().unwrap_or_default(),
                uv: mesh.uv.get(i).copied().unwrap_or_default(),
            }));
        packed.indices.extend_from_slice(&mesh.indices);

        log::debug!(
            "packed mesh #{} `{}` at vertex offset {} index offset {}",
            mesh.index,
            mesh.name,
            mesh.vertex_buffer_offset,
            mesh.index_buffer_offset
        );
    }

    log::info!(
        "packed {} meshes: {} vertices, {} indices",
        meshes.len(),
        packed.vertices.len(),
        packed.indices.len()
    );
    packed
}

/// Opaque triangle-list geometry of `mesh` inside the shared buffers.
pub fn geometry_desc(mesh: &Mesh) -> GeometryDesc {
    GeometryDesc {
        vertex_buffer_offset: mesh.vertex_buffer_offset,
        vertex_count: mesh.vertex_count() as u32,
        vertex_stride: Vertex::STRIDE,
        vertex_format: VertexFormat::Float32x3,
        index_buffer_offset: mesh.index_buffer_offset,
        index_count: mesh.index_count() as u32,
        index_format: IndexFormat::Uint16,
        flags: GeometryFlags::OPAQUE,
    }
}
