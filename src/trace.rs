//! Rays, hits and the tracer abstraction used by the frame renderer.

use cgmath::{InnerSpace, Point3, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    /// Normalized direction.
    pub direction: Vector3<f32>,
    pub t_min: f32,
    pub t_max: f32,
    /// Instances whose mask shares no bit with this are skipped.
    pub instance_mask: u8,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            t_min: 1e-4,
            t_max: f32::INFINITY,
            instance_mask: 0xFF,
        }
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.instance_mask = mask;
        self
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }
}

/// Closest intersection found along a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub t: f32,
    /// Position of the instance's render object.
    pub instance_id: u32,
    /// Hit-group contribution of the instance, the mesh index.
    pub hit_group_index: u32,
    /// Triangle index inside the bottom-level geometry.
    pub primitive_index: u32,
    /// Weights of the second and third triangle vertex.
    pub barycentrics: [f32; 2],
    /// World-space geometric normal, facing the ray origin.
    pub normal: Vector3<f32>,
}

pub trait Tracer: Sync {
    /// Nearest hit in `(ray.t_min, ray.t_max)`, if any.
    fn trace(&self, ray: &Ray) -> Option<Hit>;
}
