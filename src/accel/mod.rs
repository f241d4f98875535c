//! Bounding volume hierarchy.
//!
//! One flat-array BVH serves both halves of the renderer: CPU integrators
//! traverse it directly for ray queries, and the GPU device packs the same
//! 32-byte nodes into its heap when building an acceleration structure from
//! vertex/index buffers. The builder is primitive-agnostic; it only sees
//! per-primitive bounds.

mod build;

pub use build::build_bvh;

use crate::util::{Vec2, Vec3};
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Inverted box; expands on the first point.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Bounds of a triangle.
    pub fn from_triangle(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self {
            min: v0.min(v1).min(v2),
            max: v0.max(v1).max(v2),
        }
    }

    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Surface area for SAH costs.
    #[inline]
    pub fn area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// GPU-friendly BVH node (32 bytes, mirrored by the WGSL kernels).
///
/// Internal node: `left_or_first` = left child index, `count` = 0.
/// Leaf node: `left_or_first` = first slot in the primitive order,
/// `count` > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    fn slab_test(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (Vec3::from(self.aabb_min) - origin) * inv_dir;
        let t1 = (Vec3::from(self.aabb_max) - origin) * inv_dir;
        let near = t0.min(t1);
        let far = t0.max(t1);
        let t_enter = near.max_element().max(0.0);
        let t_exit = far.min_element().min(t_max);
        (t_enter <= t_exit).then_some(t_enter)
    }
}

/// Flat BVH over externally owned primitives.
pub struct Bvh {
    /// Node array, root at index 0.
    pub nodes: Vec<BvhNode>,
    /// Primitive indices in leaf order; leaves reference slots in here.
    pub order: Vec<u32>,
}

impl Bvh {
    /// Closest-hit walk. `hit(prim, t_max)` intersects one primitive and
    /// returns its distance when it lies closer than `t_max`. Returns the
    /// winning distance and primitive index.
    pub fn intersect<F>(&self, origin: Vec3, dir: Vec3, mut t_max: f32, mut hit: F) -> Option<(f32, u32)>
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        if self.order.is_empty() {
            return None;
        }
        let inv_dir = dir.recip();
        let mut best: Option<(f32, u32)> = None;

        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        stack.push(0);
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if node.slab_test(origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.count > 0 {
                let first = node.left_or_first as usize;
                for slot in first..first + node.count as usize {
                    let prim = self.order[slot];
                    if let Some(t) = hit(prim, t_max) {
                        t_max = t;
                        best = Some((t, prim));
                    }
                }
            } else {
                // Near child on top of the stack so the walk stays roughly
                // front-to-back.
                let left = node.left_or_first;
                let t_left = self.nodes[left as usize].slab_test(origin, inv_dir, t_max);
                let t_right = self.nodes[left as usize + 1].slab_test(origin, inv_dir, t_max);
                match (t_left, t_right) {
                    (Some(a), Some(b)) if a <= b => {
                        stack.push(left + 1);
                        stack.push(left);
                    }
                    (Some(_), Some(_)) => {
                        stack.push(left);
                        stack.push(left + 1);
                    }
                    (Some(_), None) => stack.push(left),
                    (None, Some(_)) => stack.push(left + 1),
                    (None, None) => {}
                }
            }
        }
        best
    }

    /// Any-hit walk for shadow rays; stops at the first primitive closer
    /// than `t_max`.
    pub fn occluded<F>(&self, origin: Vec3, dir: Vec3, t_max: f32, mut hit: F) -> bool
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        if self.order.is_empty() {
            return false;
        }
        let inv_dir = dir.recip();
        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        stack.push(0);
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if node.slab_test(origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.count > 0 {
                let first = node.left_or_first as usize;
                for slot in first..first + node.count as usize {
                    if hit(self.order[slot], t_max).is_some() {
                        return true;
                    }
                }
            } else {
                stack.push(node.left_or_first);
                stack.push(node.left_or_first + 1);
            }
        }
        false
    }
}

/// Watertight-enough Moller-Trumbore. Returns `(t, u, v)` for hits with
/// `t in (epsilon, t_max)`.
pub fn ray_triangle(
    origin: Vec3,
    dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    t_max: f32,
) -> Option<(f32, Vec2)> {
    const EPSILON: f32 = 1e-7;
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > EPSILON && t < t_max).then(|| (t, Vec2::new(u, v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_grow_and_area() {
        let mut b = Aabb::EMPTY;
        b.grow_point(Vec3::ZERO);
        b.grow_point(Vec3::new(2.0, 1.0, 3.0));
        assert_eq!(b.centroid(), Vec3::new(1.0, 0.5, 1.5));
        // 2*(2*1 + 1*3 + 3*2) = 22
        assert!((b.area() - 22.0).abs() < 1e-6);
        assert_eq!(Aabb::EMPTY.area(), 0.0);
    }

    #[test]
    fn test_ray_triangle_hit_and_miss() {
        let v0 = Vec3::new(-1.0, -1.0, 5.0);
        let v1 = Vec3::new(1.0, -1.0, 5.0);
        let v2 = Vec3::new(0.0, 1.0, 5.0);

        let hit = ray_triangle(Vec3::ZERO, Vec3::Z, v0, v1, v2, f32::MAX);
        let (t, _uv) = hit.expect("ray through the triangle center hits");
        assert!((t - 5.0).abs() < 1e-5);

        assert!(ray_triangle(Vec3::ZERO, -Vec3::Z, v0, v1, v2, f32::MAX).is_none());
        assert!(
            ray_triangle(Vec3::ZERO, Vec3::Z, v0, v1, v2, 4.0).is_none(),
            "t_max cuts the hit off"
        );
    }
}
