//! Scene graph and hierarchical scene organization.
//!
//! An [`Object`] is a node of the loaded scene tree. Objects own their
//! children; meshes are referenced through the mesh index held by the
//! [`MeshRenderer`] component. Transforms stored on objects are world-space
//! once loading has finished.

use cgmath::{Matrix4, SquareMatrix};

/// Pre-order position of an object in the scene file (root is `0`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

/// The single component kind the scene container knows about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshRenderer {
    /// Index of the mesh in the mesh array, `None` when the component had no mesh path.
    pub mesh: Option<usize>,
    /// Resolved mesh path used as the store key.
    pub mesh_key: String,
    pub lightmap_index: i32,
    pub lightmap_scale_offset: [f32; 4],
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

#[derive(Clone, Debug)]
pub struct Object {
    pub id: ObjectId,
    pub name: String,
    pub layer: i32,
    pub active: bool,
    /// World transform after load (local for a freshly read node).
    pub transform: Matrix4<f32>,
    pub children: Vec<Object>,
    pub mesh_renderer: Option<MeshRenderer>,
}

impl Object {
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            layer: 0,
            active: true,
            transform: Matrix4::identity(),
            children: Vec::new(),
            mesh_renderer: None,
        }
    }

    /// Index of the rendered mesh, if this object renders one.
    pub fn mesh_index(&self) -> Option<usize> {
        self.mesh_renderer.as_ref().and_then(|renderer| renderer.mesh)
    }

    /// Pre-order traversal of this subtree, `self` first.
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    /// Every node of this subtree indexed by its [`ObjectId`].
    ///
    /// Ids are assigned in pre-order at load time, so the traversal order is
    /// also the id order.
    pub fn flatten(&self) -> Vec<&Object> {
        self.iter().collect()
    }

    pub fn find(&self, name: &str) -> Option<&Object> {
        self.iter().find(|object| object.name == name)
    }
}

pub struct PreOrder<'a> {
    stack: Vec<&'a Object>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a Object;

    fn next(&mut self) -> Option<Self::Item> {
        let object = self.stack.pop()?;
        self.stack.extend(object.children.iter().rev());
        Some(object)
    }
}
