//! Engine data structures: meshes, scene-graph objects and local transforms.
//!
//! - `mesh` holds the CPU-side mesh record loaded from a mesh file
//! - `instance` holds the local position/rotation/scale of a node and its matrix form
//! - `scene_graph` holds the object tree and mesh-renderer components

pub mod instance;
pub mod mesh;
pub mod scene_graph;
