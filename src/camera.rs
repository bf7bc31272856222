//! Camera, projection and the per-frame scene constants.
//!
//! The camera is a yaw/pitch fly camera. Rays are generated from the inverse
//! of its view-projection matrix, so the software renderer and the ray-query
//! shader produce the same primary rays.

use bytemuck::{Pod, Zeroable};
use cgmath::{Deg, InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3, Vector4, perspective};

use crate::{config::CameraConfig, software::bvh::Aabb, trace::Ray};

/// cgmath targets OpenGL clip space (z in -1..1), wgpu expects z in 0..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const FRAMING_YAW: f32 = -90.0;
const FRAMING_PITCH: f32 = -20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>>, P: Into<Rad<f32>>>(
        position: V,
        yaw: Y,
        pitch: P,
    ) -> Self {
        Self {
            position: position.into(),
            yaw: yaw.into(),
            pitch: pitch.into(),
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.position, Deg(config.yaw), Deg(config.pitch))
    }

    /// Places the camera so a sphere around `bounds` fills the vertical field
    /// of view.
    pub fn framing(bounds: &Aabb, fovy: Rad<f32>) -> Self {
        let mut camera = Self::new((0.0, 0.0, 0.0), Deg(FRAMING_YAW), Deg(FRAMING_PITCH));
        if bounds.is_empty() {
            camera.position = Point3::new(0.0, 0.0, 10.0);
            return camera;
        }
        let center = Point3::from(bounds.centroid());
        let half_diagonal =
            (Point3::from(bounds.max) - Point3::from(bounds.min)).magnitude() * 0.5;
        let distance = half_diagonal.max(0.5) / (fovy.0 * 0.5).sin();
        camera.position = center - camera.forward() * distance;
        camera
    }

    pub fn forward(&self) -> Vector3<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize()
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.position, self.forward(), Vector3::unit_y())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    aspect: f32,
    pub fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// Per-frame constants read by the ray generation.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    /// Inverse view-projection, clip space to world space.
    pub projection_to_world: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub light_position: [f32; 4],
}

impl SceneConstants {
    pub fn new() -> Self {
        Self {
            projection_to_world: Matrix4::identity().into(),
            camera_position: [0.0, 0.0, 0.0, 1.0],
            light_position: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        let view_proj = projection.calc_matrix() * camera.calc_matrix();
        // a degenerate projection leaves the previous matrix in place
        if let Some(inverse) = view_proj.invert() {
            self.projection_to_world = inverse.into();
        }
        self.camera_position = camera.position.to_homogeneous().into();
    }

    pub fn set_light_position(&mut self, position: [f32; 3]) {
        self.light_position = [position[0], position[1], position[2], 1.0];
    }

    /// Ray through the center of pixel `(x, y)` of a `width` x `height` frame.
    pub fn primary_ray(&self, x: u32, y: u32, width: u32, height: u32) -> Ray {
        let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
        let projection_to_world = Matrix4::from(self.projection_to_world);
        let world = projection_to_world * Vector4::new(ndc_x, ndc_y, 0.0, 1.0);
        let target = Point3::from_homogeneous(world);
        let origin = Point3::new(
            self.camera_position[0],
            self.camera_position[1],
            self.camera_position[2],
        );
        Ray::new(origin, target - origin)
    }
}

impl Default for SceneConstants {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_ray_follows_the_view_direction() {
        let camera = Camera::new((0.0, 0.0, 5.0), Deg(-90.0), Deg(0.0));
        let projection = Projection::new(64, 64, Deg(45.0), 0.1, 100.0);
        let mut constants = SceneConstants::new();
        constants.update_view_proj(&camera, &projection);

        let ray = constants.primary_ray(32, 32, 64, 64);
        assert!((ray.origin - Point3::new(0.0, 0.0, 5.0)).magnitude() < 1e-5);
        assert!(ray.direction.z < -0.99);
    }

    #[test]
    fn framing_looks_at_the_bounds() {
        let bounds = Aabb {
            min: [-1.0, -1.0, -1.0],
            max: [1.0, 1.0, 1.0],
        };
        let camera = Camera::framing(&bounds, Deg(45.0).into());
        let to_center = Point3::new(0.0, 0.0, 0.0) - camera.position;
        assert!(to_center.normalize().dot(camera.forward()) > 0.999);
        assert!(to_center.magnitude() > 3.0);
    }
}
