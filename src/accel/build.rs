//! Binned SAH builder.
//!
//! Produces a flat node array from per-primitive bounds. Splits are chosen
//! with a 12-bin surface area heuristic over the centroid extent; ranges
//! where a leaf is cheaper than the best split stay leaves.

use super::{Aabb, Bvh, BvhNode};
use crate::util::Vec3;

const NUM_BINS: usize = 12;
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;
const MAX_LEAF_SIZE: usize = 4;

const EMPTY_NODE: BvhNode = BvhNode {
    aabb_min: [0.0; 3],
    left_or_first: 0,
    aabb_max: [0.0; 3],
    count: 0,
};

struct Bin {
    bounds: Aabb,
    count: u32,
}

/// Builds a BVH over `bounds`; primitive `i` keeps its index in the output
/// order. Zero primitives yields a single inert node; traversal exits early
/// on an empty order.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[Aabb]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![EMPTY_NODE],
            order: Vec::new(),
        };
    }

    let centroids: Vec<Vec3> = bounds.iter().map(|b| b.centroid()).collect();
    let mut order: Vec<u32> = (0..n as u32).collect();

    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(EMPTY_NODE);

    // Explicit stack instead of recursion; ranges address `order`.
    struct Range {
        node: usize,
        start: usize,
        end: usize,
    }
    let mut stack = vec![Range {
        node: 0,
        start: 0,
        end: n,
    }];

    while let Some(range) = stack.pop() {
        let slice = &order[range.start..range.end];
        let count = slice.len();

        let mut node_bounds = Aabb::EMPTY;
        for &prim in slice {
            node_bounds.grow(&bounds[prim as usize]);
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &prim in slice {
            centroid_bounds.grow_point(centroids[prim as usize]);
        }

        let split = if count <= MAX_LEAF_SIZE {
            None
        } else {
            let candidate = best_split(slice, bounds, &centroids, &centroid_bounds);
            let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();
            candidate.filter(|c| c.cost < leaf_cost)
        };

        let Some(split) = split else {
            nodes[range.node] = BvhNode {
                aabb_min: node_bounds.min.to_array(),
                left_or_first: range.start as u32,
                aabb_max: node_bounds.max.to_array(),
                count: count as u32,
            };
            continue;
        };

        let mid = range.start
            + partition(&mut order[range.start..range.end], |&prim| {
                centroids[prim as usize][split.axis] < split.position
            });
        // All centroids on one side of the plane: fall back to a median cut
        // so the tree keeps making progress.
        let mid = if mid == range.start || mid == range.end {
            (range.start + range.end) / 2
        } else {
            mid
        };

        let left = nodes.len();
        nodes.push(EMPTY_NODE);
        nodes.push(EMPTY_NODE);
        nodes[range.node] = BvhNode {
            aabb_min: node_bounds.min.to_array(),
            left_or_first: left as u32,
            aabb_max: node_bounds.max.to_array(),
            count: 0,
        };

        stack.push(Range {
            node: left + 1,
            start: mid,
            end: range.end,
        });
        stack.push(Range {
            node: left,
            start: range.start,
            end: mid,
        });
    }

    Bvh { nodes, order }
}

struct Split {
    axis: usize,
    position: f32,
    cost: f32,
}

/// Binned SAH sweep across all three axes. `None` when every axis is
/// degenerate.
fn best_split(
    slice: &[u32],
    bounds: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> Option<Split> {
    let mut best: Option<Split> = None;

    for axis in 0..3 {
        let low = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - low;
        if extent < 1e-8 {
            continue;
        }

        let mut bins: [Bin; NUM_BINS] = std::array::from_fn(|_| Bin {
            bounds: Aabb::EMPTY,
            count: 0,
        });
        let scale = NUM_BINS as f32 / extent;
        for &prim in slice {
            let id = (((centroids[prim as usize][axis] - low) * scale) as usize).min(NUM_BINS - 1);
            bins[id].bounds.grow(&bounds[prim as usize]);
            bins[id].count += 1;
        }

        // Prefix sweep from the left, then evaluate every plane while
        // sweeping from the right.
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0u32; NUM_BINS - 1];
        let mut acc = Aabb::EMPTY;
        let mut acc_count = 0;
        for i in 0..NUM_BINS - 1 {
            acc.grow(&bins[i].bounds);
            acc_count += bins[i].count;
            left_area[i] = acc.area();
            left_count[i] = acc_count;
        }

        acc = Aabb::EMPTY;
        acc_count = 0;
        for i in (1..NUM_BINS).rev() {
            acc.grow(&bins[i].bounds);
            acc_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + acc_count as f32 * acc.area());
            if best.as_ref().is_none_or(|b| cost < b.cost) {
                best = Some(Split {
                    axis,
                    position: low + (i as f32 / NUM_BINS as f32) * extent,
                    cost,
                });
            }
        }
    }

    best
}

/// In-place partition; returns the number of elements satisfying `pred`.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::ray_triangle;
    use crate::util::Vec2;

    fn boxes_along_x(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                let c = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
                Aabb {
                    min: c - Vec3::splat(0.5),
                    max: c + Vec3::splat(0.5),
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_build() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.order.is_empty());
        assert!(bvh
            .intersect(Vec3::ZERO, Vec3::Z, f32::MAX, |_, _| Some(1.0))
            .is_none());
    }

    #[test]
    fn test_small_range_stays_leaf() {
        let bvh = build_bvh(&boxes_along_x(3));
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_build_splits_and_keeps_every_primitive() {
        let bvh = build_bvh(&boxes_along_x(100));
        assert!(bvh.nodes.len() > 1, "expected internal nodes");

        let mut seen = bvh.order.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<u32>>());

        let root = &bvh.nodes[0];
        assert!(root.aabb_min[0] <= -0.5);
        assert!(root.aabb_max[0] >= 198.5);
    }

    #[test]
    fn test_traversal_finds_closest_box() {
        let boxes = boxes_along_x(50);
        let bvh = build_bvh(&boxes);

        // Shoot along +x from the left of everything; every box is a
        // candidate, the closest one must win.
        let origin = Vec3::new(-10.0, 0.0, 0.0);
        let hit = bvh.intersect(origin, Vec3::X, f32::MAX, |prim, t_max| {
            let t = boxes[prim as usize].min.x - origin.x;
            (t > 0.0 && t < t_max).then_some(t)
        });
        let (t, prim) = hit.expect("must hit");
        assert_eq!(prim, 0);
        assert!((t - 9.5).abs() < 1e-5);

        assert!(bvh.occluded(origin, Vec3::X, f32::MAX, |prim, t_max| {
            let t = boxes[prim as usize].min.x - origin.x;
            (t > 0.0 && t < t_max).then_some(t)
        }));
        assert!(!bvh.occluded(origin, -Vec3::X, f32::MAX, |_, _| None));
    }

    #[test]
    fn test_traversal_with_triangles() {
        // Two triangles at different depths on the same line of sight.
        let tris = [
            (
                Vec3::new(-1.0, -1.0, 8.0),
                Vec3::new(1.0, -1.0, 8.0),
                Vec3::new(0.0, 1.0, 8.0),
            ),
            (
                Vec3::new(-1.0, -1.0, 3.0),
                Vec3::new(1.0, -1.0, 3.0),
                Vec3::new(0.0, 1.0, 3.0),
            ),
        ];
        let bounds: Vec<Aabb> = tris
            .iter()
            .map(|&(a, b, c)| Aabb::from_triangle(a, b, c))
            .collect();
        let bvh = build_bvh(&bounds);

        let hit = bvh.intersect(Vec3::ZERO, Vec3::Z, f32::MAX, |prim, t_max| {
            let (a, b, c) = tris[prim as usize];
            ray_triangle(Vec3::ZERO, Vec3::Z, a, b, c, t_max).map(|(t, _uv): (f32, Vec2)| t)
        });
        let (t, prim) = hit.expect("must hit the nearer triangle");
        assert_eq!(prim, 1);
        assert!((t - 3.0).abs() < 1e-5);
    }
}
