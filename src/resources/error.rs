//! Error types for scene and mesh loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading scene containers and mesh files.
#[derive(Error, Debug)]
pub enum SceneError {
    /// The scene container itself could not be opened.
    #[error("Scene file not found: {0}")]
    SceneNotFound(PathBuf),

    /// A referenced mesh file could not be opened (strict validation only).
    #[error("Mesh file not found: {0}")]
    MeshNotFound(PathBuf),

    /// A component other than `MeshRenderer` was declared on an object.
    #[error("Unsupported component `{0}`: only MeshRenderer is known to the scene format")]
    UnsupportedComponent(String),

    /// A blend shape declared a frame count other than one.
    #[error("Blend shape `{shape}` declares {frames} frames, exactly one is supported")]
    BlendShapeFrames { shape: String, frames: i32 },

    /// A triangle index points past the mesh's vertices (strict validation only).
    #[error("Mesh `{mesh}` has index {index} but only {vertex_count} vertices")]
    IndexOutOfRange {
        mesh: String,
        index: u16,
        vertex_count: usize,
    },

    /// Stream ended in the middle of a value (strict validation only).
    #[error("Unexpected end of file at offset {offset}")]
    UnexpectedEof { offset: u64 },

    /// A count is negative or larger than the remaining data (strict validation only).
    #[error("Invalid {what} count {count} at offset {offset}")]
    InvalidCount {
        what: &'static str,
        count: i64,
        offset: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SceneError>;
