//! The scene lifecycle.
//!
//! A [`Scene`] owns everything built from one scene container: the object
//! tree, the mesh store, the packed geometry with its GPU buffers and
//! descriptor slots, and the acceleration structures. It moves through
//! [`SceneState`] in one direction only:
//!
//! `Unloaded -> Loading -> GeometryPacked -> AccelerationBuilt -> Ready -> Destroyed`
//!
//! GPU resources are released by [`Scene::destroy`], never on drop.

use std::path::Path;

use thiserror::Error;

use crate::{
    acceleration::{self, AccelerationStructures, InstanceRecord},
    config::Validation,
    context::{BufferUsage, BufferView, ContextError, DescriptorIndex, GraphicsContext},
    data_structures::scene_graph::{Object, ObjectId},
    geometry::{self, INDEX_SIZE, MeshConstants, PackedGeometry, Vertex},
    resources::{self, error::SceneError, mesh::MeshStore},
    software::bvh::Aabb,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneState {
    Unloaded,
    Loading,
    GeometryPacked,
    AccelerationBuilt,
    Ready,
    Destroyed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] SceneError),
    #[error(transparent)]
    Device(#[from] ContextError),
    #[error("cannot {operation} a scene in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SceneState,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The shared buffers on the device, each with a shader resource view.
pub struct SceneBuffers<C: GraphicsContext> {
    pub vertex_buffer: C::Buffer,
    pub vertex_descriptor: DescriptorIndex,
    pub index_buffer: C::Buffer,
    pub index_descriptor: DescriptorIndex,
}

pub struct Scene<C: GraphicsContext> {
    state: SceneState,
    root: Option<Object>,
    meshes: MeshStore,
    render_objects: Vec<ObjectId>,
    packed: PackedGeometry,
    mesh_constants: Vec<MeshConstants>,
    buffers: Option<SceneBuffers<C>>,
    acceleration: Option<AccelerationStructures<C>>,
}

impl<C: GraphicsContext> Default for Scene<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: GraphicsContext> Scene<C> {
    pub fn new() -> Self {
        Self {
            state: SceneState::Unloaded,
            root: None,
            meshes: MeshStore::default(),
            render_objects: Vec::new(),
            packed: PackedGeometry::default(),
            mesh_constants: Vec::new(),
            buffers: None,
            acceleration: None,
        }
    }

    /// Loads `data_dir/local_path`, packs its geometry and builds the
    /// acceleration structures.
    ///
    /// On failure the scene stays in the state it failed in; whatever was
    /// already created on the device is released by [`destroy`](Self::destroy).
    pub fn load(
        &mut self,
        ctx: &mut C,
        data_dir: &Path,
        local_path: &Path,
        validation: Validation,
    ) -> Result<()> {
        self.expect_state("load", SceneState::Unloaded)?;
        self.transition(SceneState::Loading);

        let (graph, meshes) = resources::load_scene_graph(data_dir, local_path, validation)?;
        self.root = Some(graph.root);
        self.render_objects = graph.render_objects;
        self.meshes = meshes;

        self.packed = geometry::pack(self.meshes.meshes_mut());
        self.transition(SceneState::GeometryPacked);

        if self.packed.is_empty() {
            log::warn!("scene has no geometry, skipping buffers and acceleration structures");
        } else {
            self.upload(ctx)?;
            self.build_acceleration(ctx)?;
        }
        self.transition(SceneState::AccelerationBuilt);

        self.mesh_constants = self
            .meshes
            .meshes()
            .iter()
            .map(MeshConstants::new)
            .collect::<std::result::Result<_, _>>()?;
        self.transition(SceneState::Ready);
        Ok(())
    }

    fn upload(&mut self, ctx: &mut C) -> Result<()> {
        let (vertex_buffer, vertex_descriptor) = upload_with_view(
            ctx,
            "vertex buffer",
            self.packed.vertex_bytes(),
            BufferView::Structured {
                stride: Vertex::STRIDE as u32,
                elements: self.packed.vertices.len() as u32,
            },
        )?;

        let index_bytes = self.packed.index_bytes();
        // two u16 indices per 32-bit word
        let index_view = BufferView::Raw {
            elements: (index_bytes.len() as u64 / 4) as u32,
        };
        let (index_buffer, index_descriptor) =
            match upload_with_view(ctx, "index buffer", &index_bytes, index_view) {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    let released = ctx
                        .release_descriptor(vertex_descriptor)
                        .and(ctx.release_buffer(vertex_buffer));
                    if let Err(release) = released {
                        log::warn!("cannot release the vertex buffer after a failed upload: {release}");
                    }
                    return Err(e.into());
                }
            };

        log::debug!(
            "uploaded {} vertex bytes and {} index bytes",
            self.packed.vertices.len() as u64 * Vertex::STRIDE,
            self.packed.indices.len() as u64 * INDEX_SIZE
        );
        self.buffers = Some(SceneBuffers {
            vertex_buffer,
            vertex_descriptor,
            index_buffer,
            index_descriptor,
        });
        Ok(())
    }

    fn build_acceleration(&mut self, ctx: &mut C) -> Result<()> {
        let (Some(buffers), Some(root)) = (&self.buffers, &self.root) else {
            return Ok(());
        };
        self.acceleration = Some(acceleration::build(
            ctx,
            self.meshes.meshes(),
            root,
            &self.render_objects,
            &buffers.vertex_buffer,
            &buffers.index_buffer,
        )?);
        Ok(())
    }

    /// Releases every device resource: the top level, the bottom levels, the
    /// index buffer and its descriptor, then the vertex buffer and its
    /// descriptor.
    ///
    /// A failed release does not stop the teardown. The scene always ends up
    /// `Destroyed` and the first failure is returned.
    pub fn destroy(&mut self, ctx: &mut C) -> Result<()> {
        if self.state == SceneState::Destroyed {
            return Err(Error::InvalidState {
                operation: "destroy",
                state: self.state,
            });
        }

        let mut first_error = None;
        let mut check = |step: &str, result: std::result::Result<(), ContextError>| {
            if let Err(e) = result {
                log::error!("scene teardown: {step} failed: {e}");
                first_error.get_or_insert(e);
            }
        };

        check("wait idle", ctx.wait_idle());
        if let Some(acceleration) = self.acceleration.take() {
            check("top level release", ctx.release_top_level(acceleration.top_level));
            for bottom_level in acceleration.bottom_levels {
                check("bottom level release", ctx.release_bottom_level(bottom_level));
            }
        }
        if let Some(buffers) = self.buffers.take() {
            check("index descriptor release", ctx.release_descriptor(buffers.index_descriptor));
            check("index buffer release", ctx.release_buffer(buffers.index_buffer));
            check("vertex descriptor release", ctx.release_descriptor(buffers.vertex_descriptor));
            check("vertex buffer release", ctx.release_buffer(buffers.vertex_buffer));
        }

        self.root = None;
        self.render_objects.clear();
        self.meshes = MeshStore::default();
        self.packed = PackedGeometry::default();
        self.mesh_constants.clear();
        self.transition(SceneState::Destroyed);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn expect_state(&self, operation: &'static str, expected: SceneState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: SceneState) {
        log::info!("scene {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn root(&self) -> Option<&Object> {
        self.root.as_ref()
    }

    pub fn meshes(&self) -> &MeshStore {
        &self.meshes
    }

    /// Objects with a mesh, in pre-order. A position in this list is the
    /// instance id of the object.
    pub fn render_objects(&self) -> &[ObjectId] {
        &self.render_objects
    }

    pub fn packed(&self) -> &PackedGeometry {
        &self.packed
    }

    /// Shader lookup data, indexed by mesh index.
    pub fn mesh_constants(&self) -> &[MeshConstants] {
        &self.mesh_constants
    }

    pub fn buffers(&self) -> Option<&SceneBuffers<C>> {
        self.buffers.as_ref()
    }

    pub fn acceleration(&self) -> Option<&AccelerationStructures<C>> {
        self.acceleration.as_ref()
    }

    pub fn top_level(&self) -> Option<&C::TopLevel> {
        self.acceleration.as_ref().map(|a| &a.top_level)
    }

    pub fn instances(&self) -> &[InstanceRecord] {
        self.acceleration.as_ref().map_or(&[], |a| a.instances.as_slice())
    }

    /// World-space bounds of every rendered mesh.
    pub fn world_bounds(&self) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        let Some(root) = &self.root else {
            return bounds;
        };
        let objects = root.flatten();
        for id in &self.render_objects {
            let Some(object) = objects.get(id.0) else {
                continue;
            };
            let Some(mesh) = object.mesh_index().and_then(|index| self.meshes.get(index)) else {
                continue;
            };
            let mut local = Aabb::EMPTY;
            mesh.vertices.iter().for_each(|v| local.grow_point(*v));
            bounds.grow(&local.transformed(&object.transform));
        }
        bounds
    }
}

/// Creates a buffer and places a view of it in a descriptor slot. The buffer
/// is released again when no slot can be allocated.
fn upload_with_view<C: GraphicsContext>(
    ctx: &mut C,
    label: &str,
    contents: &[u8],
    view: BufferView,
) -> std::result::Result<(C::Buffer, DescriptorIndex), ContextError> {
    let buffer = ctx.create_buffer(label, contents, BufferUsage::Geometry)?;
    match ctx.allocate_descriptor(&buffer, view) {
        Ok(descriptor) => Ok((buffer, descriptor)),
        Err(e) => {
            if let Err(release) = ctx.release_buffer(buffer) {
                log::warn!("cannot release `{label}` after a failed descriptor allocation: {release}");
            }
            Err(e)
        }
    }
}

impl<C: GraphicsContext> Drop for Scene<C> {
    fn drop(&mut self) {
        if self.buffers.is_some() || self.acceleration.is_some() {
            log::warn!("scene dropped without destroy, its device resources were not released");
        }
    }
}
