//! Local transformation data of scene-graph nodes.
//!
//! The scene container stores row-vector (DirectX-style) transforms where a
//! node's matrix is `Scale * Rotation * Translation` and a child is placed in
//! the world by `child_local * parent_world`. Internally every matrix is a
//! column-vector `cgmath::Matrix4`, which is the transpose of the row-vector
//! form: the same composition reads `parent_world * child_local`, and the
//! row-vector, row-major memory image is exactly `[[f32; 4]; 4]::from(matrix)`.

use cgmath::{Matrix4, One, Quaternion, Vector3};

/// Per-node transformation: position, rotation (as quaternion), and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTransform {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl LocalTransform {
    /// Create a new transform with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Build from the raw file layout. The quaternion is stored as `x, y, z, w`.
    pub fn from_raw(position: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> Self {
        let [x, y, z, w] = rotation;
        Self {
            position: position.into(),
            rotation: Quaternion::new(w, x, y, z),
            scale: scale.into(),
        }
    }

    /// Column-vector form of `Scale * Rotation * Translation`.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Places `local` into the world of its parent: `local * parent_world` in
/// row-vector order.
pub fn to_world(local: &Matrix4<f32>, parent_world: &Matrix4<f32>) -> Matrix4<f32> {
    *parent_world * *local
}

/// Row-major, row-vector memory image: `rows[k][j]` is element `(k, j)` and
/// the translation lives in `rows[3][0..3]`.
pub fn to_row_major(matrix: &Matrix4<f32>) -> [[f32; 4]; 4] {
    (*matrix).into()
}

/// Inverse of [`to_row_major`].
pub fn from_row_major(rows: [[f32; 4]; 4]) -> Matrix4<f32> {
    rows.into()
}
