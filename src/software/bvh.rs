//! Bounding volume hierarchy shared by both acceleration-structure levels.
//!
//! Flat node array:
//! - internal node: `left_or_first` = index of the left child, right child follows it, `count` = 0
//! - leaf node: `left_or_first` = first entry in `indices`, `count` > 0

use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3};

const MAX_LEAF_SIZE: usize = 4;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        if dx >= dy && dx >= dz {
            0
        } else if dy >= dz {
            1
        } else {
            2
        }
    }

    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Bounds of this box after `transform`, from its eight corners.
    pub fn transformed(&self, transform: &Matrix4<f32>) -> Aabb {
        let mut out = Aabb::EMPTY;
        if self.is_empty() {
            return out;
        }
        for corner in 0..8 {
            let p = Point3::new(
                if corner & 1 == 0 { self.min[0] } else { self.max[0] },
                if corner & 2 == 0 { self.min[1] } else { self.max[1] },
                if corner & 4 == 0 { self.min[2] } else { self.max[2] },
            );
            out.grow_point(transform.transform_point(p).into());
        }
        out
    }

    /// Slab test. Returns the entry distance when the ray overlaps the box
    /// within `[t_min, t_max]`.
    #[inline]
    pub fn intersect(&self, origin: [f32; 3], inv_dir: [f32; 3], t_min: f32, t_max: f32) -> Option<f32> {
        let mut near = t_min;
        let mut far = t_max;
        for i in 0..3 {
            let t0 = (self.min[i] - origin[i]) * inv_dir[i];
            let t1 = (self.max[i] - origin[i]) * inv_dir[i];
            near = near.max(t0.min(t1));
            far = far.min(t0.max(t1));
        }
        (near <= far).then_some(near)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub left_or_first: u32,
    pub count: u32,
}

impl BvhNode {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Hierarchy over primitives known only by their bounds.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
}

impl Bvh {
    /// Median split on the longest centroid axis.
    pub fn build(bounds: &[Aabb]) -> Self {
        let mut indices: Vec<u32> = (0..bounds.len() as u32).collect();
        let mut nodes = Vec::with_capacity(bounds.len() * 2);
        if bounds.is_empty() {
            return Self { nodes, indices };
        }
        let centroids: Vec<[f32; 3]> = bounds.iter().map(Aabb::centroid).collect();

        nodes.push(BvhNode {
            bounds: Aabb::EMPTY,
            left_or_first: 0,
            count: bounds.len() as u32,
        });
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            let first = nodes[node].left_or_first as usize;
            let count = nodes[node].count as usize;
            let range = &mut indices[first..first + count];

            let mut node_bounds = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for &i in range.iter() {
                node_bounds.grow(&bounds[i as usize]);
                centroid_bounds.grow_point(centroids[i as usize]);
            }
            nodes[node].bounds = node_bounds;

            if count <= MAX_LEAF_SIZE {
                continue;
            }
            let axis = centroid_bounds.longest_axis();
            // coincident centroids cannot be split
            if centroid_bounds.max[axis] <= centroid_bounds.min[axis] {
                continue;
            }
            let mid = count / 2;
            range.select_nth_unstable_by(mid, |a, b| {
                centroids[*a as usize][axis].total_cmp(&centroids[*b as usize][axis])
            });

            let left = nodes.len();
            nodes.push(BvhNode {
                bounds: Aabb::EMPTY,
                left_or_first: first as u32,
                count: mid as u32,
            });
            nodes.push(BvhNode {
                bounds: Aabb::EMPTY,
                left_or_first: (first + mid) as u32,
                count: (count - mid) as u32,
            });
            nodes[node].left_or_first = left as u32;
            nodes[node].count = 0;
            stack.push(left);
            stack.push(left + 1);
        }
        Self { nodes, indices }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::EMPTY, |root| root.bounds)
    }

    /// Closest hit along the ray. `intersect(primitive, t_max)` returns a hit
    /// strictly closer than `t_max` or `None`.
    pub fn closest<H>(
        &self,
        origin: [f32; 3],
        direction: [f32; 3],
        t_min: f32,
        t_max: f32,
        mut intersect: impl FnMut(usize, f32) -> Option<(f32, H)>,
    ) -> Option<(f32, H)> {
        let root = self.nodes.first()?;
        let inv_dir = direction.map(|d| 1.0 / d);
        let mut best: Option<(f32, H)> = None;
        let mut t_max = t_max;

        root.bounds.intersect(origin, inv_dir, t_min, t_max)?;
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node.bounds.intersect(origin, inv_dir, t_min, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &primitive in &self.indices[first..first + node.count as usize] {
                    if let Some((t, hit)) = intersect(primitive as usize, t_max) {
                        t_max = t;
                        best = Some((t, hit));
                    }
                }
            } else {
                let left = node.left_or_first as usize;
                stack.push(left + 1);
                stack.push(left);
            }
        }
        best
    }
}

/// Object-space triangles of one bottom-level structure.
#[derive(Debug, Clone, Default)]
pub struct TriangleBvh {
    pub triangles: Vec<[Vector3<f32>; 3]>,
    pub bvh: Bvh,
}

/// Intersection with one triangle of a [`TriangleBvh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub primitive: u32,
    pub barycentrics: [f32; 2],
    /// Unnormalized object-space geometric normal.
    pub normal: Vector3<f32>,
}

impl TriangleBvh {
    pub fn new(triangles: Vec<[Vector3<f32>; 3]>) -> Self {
        let bounds: Vec<Aabb> = triangles
            .iter()
            .map(|triangle| {
                let mut b = Aabb::EMPTY;
                triangle.iter().for_each(|v| b.grow_point((*v).into()));
                b
            })
            .collect();
        let bvh = Bvh::build(&bounds);
        Self { triangles, bvh }
    }

    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    /// Closest triangle hit. `direction` need not be normalized; distances are
    /// in units of its length.
    pub fn intersect(
        &self,
        origin: Point3<f32>,
        direction: Vector3<f32>,
        t_min: f32,
        t_max: f32,
    ) -> Option<(f32, TriangleHit)> {
        self.bvh.closest(
            origin.into(),
            direction.into(),
            t_min,
            t_max,
            |primitive, t_max| {
                let triangle = &self.triangles[primitive];
                let (t, u, v) = intersect_triangle(origin, direction, triangle, t_min, t_max)?;
                let normal = (triangle[1] - triangle[0]).cross(triangle[2] - triangle[0]);
                Some((
                    t,
                    TriangleHit {
                        primitive: primitive as u32,
                        barycentrics: [u, v],
                        normal,
                    },
                ))
            },
        )
    }
}

/// Möller-Trumbore, two-sided. Returns `(t, u, v)` for `t` in `(t_min, t_max)`.
pub fn intersect_triangle(
    origin: Point3<f32>,
    direction: Vector3<f32>,
    triangle: &[Vector3<f32>; 3],
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    const EPSILON: f32 = 1e-8;
    let edge1 = triangle[1] - triangle[0];
    let edge2 = triangle[2] - triangle[0];
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = Vector3::new(origin.x, origin.y, origin.z) - triangle[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > t_min && t < t_max).then_some((t, u, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_row(count: usize) -> Vec<[Vector3<f32>; 3]> {
        (0..count)
            .map(|i| {
                let x = i as f32 * 2.0;
                [
                    Vector3::new(x, 0.0, 0.0),
                    Vector3::new(x + 1.0, 0.0, 0.0),
                    Vector3::new(x, 1.0, 0.0),
                ]
            })
            .collect()
    }

    #[test]
    fn finds_the_triangle_under_the_ray() {
        let mesh = TriangleBvh::new(quad_row(20));
        assert!(mesh.bvh.node_count() > 1);

        let origin = Point3::new(10.2, 0.2, 5.0);
        let (t, hit) = mesh
            .intersect(origin, Vector3::new(0.0, 0.0, -1.0), 0.0, f32::INFINITY)
            .unwrap();
        assert!((t - 5.0).abs() < 1e-5);
        assert_eq!(hit.primitive, 5);

        // the gap between two triangles
        let miss = Point3::new(11.5, 0.2, 5.0);
        assert!(mesh.intersect(miss, Vector3::new(0.0, 0.0, -1.0), 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn transformed_box_covers_rotated_corners() {
        let b = Aabb {
            min: [-1.0, -1.0, -1.0],
            max: [1.0, 1.0, 1.0],
        };
        let moved = b.transformed(&Matrix4::from_translation(Vector3::new(5.0, 0.0, 0.0)));
        assert_eq!(moved.min, [4.0, -1.0, -1.0]);
        assert_eq!(moved.max, [6.0, 1.0, 1.0]);
        assert!(Aabb::EMPTY.transformed(&Matrix4::from_scale(2.0)).is_empty());
    }
}
