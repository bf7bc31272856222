//! rt-ngin
//!
//! A minimal raytracing demo framework. It loads a compact binary scene
//! container, flattens the object hierarchy into world-space instances, packs
//! every distinct mesh into one shared vertex buffer and one shared index
//! buffer, and builds a two-level acceleration structure over the result.
//!
//! High-level modules
//! - `acceleration`: bottom/top-level structure building and instance records
//! - `camera`: camera and projection used to generate primary rays
//! - `config`: run configuration (TOML file plus command-line overrides)
//! - `context`: the device interface consumed by the core, plus descriptor slots
//! - `data_structures`: meshes, scene-graph objects and local transforms
//! - `geometry`: packing of all meshes into shared GPU buffers
//! - `render`: frame rendering on top of a [`trace::Tracer`]
//! - `resources`: binary reader, mesh store and scene-graph loader
//! - `scene`: the scene lifecycle tying everything together
//! - `software`: CPU implementation of the device interface
//! - `trace`: rays, hits and the tracer abstraction
//! - `hardware` (feature `hardware`): wgpu ray-query backend and window loop
//!

pub mod acceleration;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod geometry;
pub mod render;
pub mod resources;
pub mod scene;
pub mod software;
pub mod trace;

#[cfg(feature = "hardware")]
pub mod hardware;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use config::{RenderConfig, Validation};
pub use context::GraphicsContext;
pub use scene::{Scene, SceneState};
pub use software::SoftwareContext;
