//! Mesh file parsing and the deduplicating mesh store.

use std::{collections::HashMap, io, path::Path};

use crate::{
    config::Validation,
    data_structures::mesh::{BlendShape, Bounds, Mesh, Submesh},
    resources::{
        error::{Result, SceneError},
        reader::BinaryReader,
    },
};

/// Arena of loaded meshes, addressed by path string and by index.
///
/// The mesh index doubles as the mesh id handed out to renderers: it equals the
/// position in first-load order and never changes afterwards.
#[derive(Debug, Default)]
pub struct MeshStore {
    by_path: HashMap<String, usize>,
    meshes: Vec<Mesh>,
    validation: Validation,
}

impl MeshStore {
    pub fn new(validation: Validation) -> Self {
        Self {
            validation,
            ..Default::default()
        }
    }

    /// Returns the index of the mesh stored at `path`, loading it on first use.
    ///
    /// The cache is keyed by the path string, so two spellings of one file are
    /// two meshes. A missing file yields an empty mesh in trusted mode and
    /// [`SceneError::MeshNotFound`] in strict mode.
    pub fn load_or_get(&mut self, path: &str) -> Result<usize> {
        if let Some(&index) = self.by_path.get(path) {
            return Ok(index);
        }

        let reader = match BinaryReader::open(Path::new(path), self.validation) {
            Ok(reader) => Some(reader),
            Err(e) if e.kind() == io::ErrorKind::NotFound => match self.validation {
                Validation::Trusted => {
                    log::warn!("mesh file {path} not found, using an empty mesh");
                    None
                }
                Validation::Strict => return Err(SceneError::MeshNotFound(path.into())),
            },
            Err(e) => return Err(e.into()),
        };

        let index = self.meshes.len();
        let mut mesh = Mesh::new(index);
        if let Some(mut reader) = reader {
            read_mesh(&mut reader, &mut mesh)?;
            log::debug!(
                "loaded mesh #{index} `{}` from {path}: {} vertices, {} indices",
                mesh.name,
                mesh.vertex_count(),
                mesh.index_count()
            );
        }
        self.by_path.insert(path.to_string(), index);
        self.meshes.push(mesh);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Mesh> {
        self.meshes.get(index)
    }

    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    /// Meshes in index order.
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut [Mesh] {
        &mut self.meshes
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Parses one mesh file into `mesh`, leaving its index untouched.
pub fn read_mesh(reader: &mut BinaryReader, mesh: &mut Mesh) -> Result<()> {
    mesh.name = reader.read_string()?;

    let vertex_count = reader.read_count("vertex", 12)?;
    if vertex_count > 0 {
        mesh.vertices = reader.read_vec(vertex_count, BinaryReader::read_float3)?;
    }

    // colors and bone data are sized to their count even when it is zero
    let color_count = reader.read_count("color", 4)?;
    mesh.colors = reader.read_vec(color_count, |r| {
        let rgba = r.read_byte4()?;
        Ok(rgba.map(|c| c as f32 / 255.0))
    })?;

    let uv_count = reader.read_count("uv", 8)?;
    if uv_count > 0 {
        mesh.uv = reader.read_vec(uv_count, BinaryReader::read_float2)?;
    }

    let uv2_count = reader.read_count("uv2", 8)?;
    if uv2_count > 0 {
        mesh.uv2 = reader.read_vec(uv2_count, BinaryReader::read_float2)?;
    }

    let normal_count = reader.read_count("normal", 12)?;
    if normal_count > 0 {
        mesh.normals = reader.read_vec(normal_count, BinaryReader::read_float3)?;
    }

    let tangent_count = reader.read_count("tangent", 16)?;
    if tangent_count > 0 {
        mesh.tangents = reader.read_vec(tangent_count, BinaryReader::read_float4)?;
    }

    let bone_weight_count = reader.read_count("bone weight", 20)?;
    let bones = reader.read_vec(bone_weight_count, |r| {
        let weight = r.read_float4()?;
        let index = r.read_byte4()?.map(f32::from);
        Ok((weight, index))
    })?;
    (mesh.bone_weights, mesh.bone_indices) = bones.into_iter().unzip();

    let index_count = reader.read_count("index", 2)?;
    if index_count > 0 {
        mesh.indices = reader.read_vec(index_count, BinaryReader::read_u16)?;
    }
    if reader.validation() == Validation::Strict {
        if let Some(&index) = mesh.indices.iter().find(|&&i| usize::from(i) >= vertex_count) {
            return Err(SceneError::IndexOutOfRange {
                mesh: mesh.name.clone(),
                index,
                vertex_count,
            });
        }
    }

    let submesh_count = reader.read_count("submesh", 8)?;
    if submesh_count > 0 {
        mesh.submeshes = reader.read_vec(submesh_count, |r| {
            Ok(Submesh {
                index_first: r.read_i32()?,
                index_count: r.read_i32()?,
            })
        })?;
    }

    let bindpose_count = reader.read_count("bindpose", 64)?;
    if bindpose_count > 0 {
        mesh.bindposes = reader.read_vec(bindpose_count, BinaryReader::read_matrix)?;
    }

    // name length, frame count and weight
    let blend_shape_count = reader.read_count("blend shape", 12)?;
    if blend_shape_count > 0 {
        mesh.blend_shapes = reader.read_vec(blend_shape_count, |r| {
            read_blend_shape(r, vertex_count, normal_count, tangent_count)
        })?;
    }

    mesh.bounds = Bounds {
        center: reader.read_float3()?,
        size: reader.read_float3()?,
    };

    Ok(())
}

/// Deltas are sized by the owning mesh's counts; tangent deltas have three
/// components even though mesh tangents have four.
fn read_blend_shape(
    reader: &mut BinaryReader,
    vertex_count: usize,
    normal_count: usize,
    tangent_count: usize,
) -> Result<BlendShape> {
    let name = reader.read_string()?;
    let frames = reader.read_i32()?;
    if frames != 1 {
        return Err(SceneError::BlendShapeFrames {
            shape: name,
            frames,
        });
    }
    let weight = reader.read_f32()? / 100.0;

    let mut shape = BlendShape {
        name,
        weight,
        ..Default::default()
    };
    if vertex_count > 0 {
        shape.vertices = reader.read_vec(vertex_count, BinaryReader::read_float3)?;
    }
    if normal_count > 0 {
        shape.normals = reader.read_vec(normal_count, BinaryReader::read_float3)?;
    }
    if tangent_count > 0 {
        shape.tangents = reader.read_vec(tangent_count, BinaryReader::read_float3)?;
    }
    Ok(shape)
}
