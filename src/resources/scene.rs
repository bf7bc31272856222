//! Scene container parsing.
//!
//! The container is one object record followed, depth first, by the records of
//! its descendants. Each record announces its child count after its components,
//! so the tree is rebuilt with an explicit stack of partially read nodes, each
//! carrying the number of children still to be read.

use std::path::Path;

use cgmath::Matrix4;

use crate::{
    data_structures::{
        instance::{LocalTransform, to_world},
        scene_graph::{MeshRenderer, Object, ObjectId},
    },
    resources::{
        error::{Result, SceneError},
        mesh::MeshStore,
        reader::BinaryReader,
    },
};

/// Smallest possible object record in bytes, used to sanity check child counts.
const MIN_OBJECT_RECORD: usize = 4 + 4 + 1 + 12 + 16 + 12 + 4 + 4;

pub const MESH_RENDERER: &str = "MeshRenderer";

/// The loaded object tree plus the objects that render a mesh, in pre-order.
#[derive(Clone, Debug)]
pub struct SceneGraph {
    pub root: Object,
    pub render_objects: Vec<ObjectId>,
}

pub struct SceneGraphLoader<'a> {
    data_dir: String,
    meshes: &'a mut MeshStore,
    render_objects: Vec<ObjectId>,
    next_id: usize,
}

impl<'a> SceneGraphLoader<'a> {
    pub fn new(data_dir: &Path, meshes: &'a mut MeshStore) -> Self {
        Self {
            data_dir: data_dir.to_string_lossy().into_owned(),
            meshes,
            render_objects: Vec::new(),
            next_id: 0,
        }
    }

    /// Reads the whole tree. Every returned transform is world-space.
    pub fn load(mut self, reader: &mut BinaryReader) -> Result<SceneGraph> {
        let mut stack = vec![self.read_object(reader, None)?];
        loop {
            let depth = stack.len() - 1;
            let (object, remaining) = &mut stack[depth];
            if *remaining > 0 {
                *remaining -= 1;
                let parent_world = object.transform;
                let child = self.read_object(reader, Some(&parent_world))?;
                stack.push(child);
            } else if depth == 0 {
                break;
            } else if let Some((finished, _)) = stack.pop() {
                stack[depth - 1].0.children.push(finished);
            }
        }
        let (root, _) = stack.swap_remove(0);

        log::info!(
            "scene graph loaded: {} objects, {} render objects, {} meshes",
            self.next_id,
            self.render_objects.len(),
            self.meshes.len()
        );
        Ok(SceneGraph {
            root,
            render_objects: self.render_objects,
        })
    }

    /// Reads one record up to (and including) its child count.
    ///
    /// The node's transform is composed with `parent_world` right away; the
    /// root keeps its local transform.
    fn read_object(
        &mut self,
        reader: &mut BinaryReader,
        parent_world: Option<&Matrix4<f32>>,
    ) -> Result<(Object, usize)> {
        let id = ObjectId(self.next_id);
        self.next_id += 1;

        let name = reader.read_string()?;
        let layer = reader.read_i32()?;
        let active = reader.read_bool()?;
        let local_pos = reader.read_float3()?;
        let local_rot = reader.read_float4()?;
        let local_scale = reader.read_float3()?;

        let local = LocalTransform::from_raw(local_pos, local_rot, local_scale).to_matrix();
        let transform = match parent_world {
            Some(parent_world) => to_world(&local, parent_world),
            None => local,
        };

        let mut object = Object {
            layer,
            active,
            transform,
            ..Object::new(id, name)
        };

        let component_count = reader.read_count("component", 4)?;
        for _ in 0..component_count {
            let component = reader.read_string()?;
            if component != MESH_RENDERER {
                log::error!("object `{}` declares unsupported component `{component}`", object.name);
                return Err(SceneError::UnsupportedComponent(component));
            }
            let renderer = self.read_mesh_renderer(reader)?;
            if renderer.mesh.is_some() {
                self.render_objects.push(id);
            }
            object.mesh_renderer = Some(renderer);
        }

        let child_count = reader.read_count("child", MIN_OBJECT_RECORD)?;
        object.children.reserve(child_count);
        log::debug!("object #{} `{}` with {child_count} children", id.0, object.name);
        Ok((object, child_count))
    }

    fn read_mesh_renderer(&mut self, reader: &mut BinaryReader) -> Result<MeshRenderer> {
        let lightmap_index = reader.read_i32()?;
        let lightmap_scale_offset = reader.read_float4()?;
        let cast_shadow = reader.read_bool()?;
        let receive_shadow = reader.read_bool()?;

        // keywords and materials are not used by the raytracer
        let keyword_count = reader.read_count("keyword", 4)?;
        for _ in 0..keyword_count {
            reader.read_string()?;
        }
        let material_count = reader.read_count("material", 4)?;
        for _ in 0..material_count {
            reader.read_string()?;
        }

        let mut renderer = MeshRenderer {
            lightmap_index,
            lightmap_scale_offset,
            cast_shadow,
            receive_shadow,
            ..Default::default()
        };
        let mesh_path = reader.read_string()?;
        if !mesh_path.is_empty() {
            let path = format!("{}/{}", self.data_dir, mesh_path);
            renderer.mesh = Some(self.meshes.load_or_get(&path)?);
            renderer.mesh_key = path;
        }
        Ok(renderer)
    }
}
