//! SAH-based BVH over primitive bounds.
//!
//! Produces a flat node array (index 0 = root) plus a reordered primitive
//! index list that leaves reference into.

use rayon::prelude::*;

use crate::util::{AxisAlignedBox, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
pub const MAX_LEAF_SIZE: usize = 4;

/// Internal node: `left_or_first` = left child index, `count` = 0.
/// Leaf node: `left_or_first` = first primitive slot, `count` > 0.
#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    pub bounds: AxisAlignedBox,
    pub left_or_first: u32,
    pub count: u32,
}

impl BvhNode {
    const EMPTY: Self = Self {
        bounds: AxisAlignedBox::INVALID,
        left_or_first: 0,
        count: 0,
    };

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Built hierarchy.
#[derive(Debug, Clone)]
pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    /// Primitive indices in leaf order.
    pub prim_indices: Vec<usize>,
}

struct Bin {
    bounds: AxisAlignedBox,
    count: usize,
}

impl Bin {
    fn new() -> Self {
        Self {
            bounds: AxisAlignedBox::INVALID,
            count: 0,
        }
    }
}

#[inline]
fn area(b: &AxisAlignedBox) -> f32 {
    if !b.is_valid() {
        return 0.0;
    }
    let d = b.max - b.min;
    2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
}

/// Build a BVH from per-primitive bounds.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[AxisAlignedBox]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::EMPTY],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = bounds.par_iter().map(AxisAlignedBox::center).collect();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::EMPTY);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize,
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let Task { node_idx, start, end } = task;
        let count = end - start;

        let mut node_bounds = AxisAlignedBox::INVALID;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&bounds[idx]);
        }

        let leaf = BvhNode {
            bounds: node_bounds,
            left_or_first: start as u32,
            count: count as u32,
        };

        if count <= MAX_LEAF_SIZE {
            nodes[node_idx] = leaf;
            continue;
        }

        let mut centroid_bounds = AxisAlignedBox::INVALID;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx]);
        }

        let split = find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * area(&node_bounds);

        let Some((axis, split_pos, cost)) = split else {
            nodes[node_idx] = leaf;
            continue;
        };
        if cost >= leaf_cost {
            nodes[node_idx] = leaf;
            continue;
        }

        let mid = partition(&mut indices[start..end], |&idx| centroids[idx][axis] < split_pos) + start;
        // Degenerate partition: split in the middle.
        let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };

        let left_idx = nodes.len();
        nodes.push(BvhNode::EMPTY);
        nodes.push(BvhNode::EMPTY);
        nodes[node_idx] = BvhNode {
            bounds: node_bounds,
            left_or_first: left_idx as u32,
            count: 0,
        };

        stack.push(Task {
            node_idx: left_idx + 1,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// Binned SAH split search over all three axes: `(axis, position, cost)`.
fn find_best_split(
    indices: &[usize],
    bounds: &[AxisAlignedBox],
    centroids: &[Vec3],
    centroid_bounds: &AxisAlignedBox,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins: Vec<Bin> = (0..NUM_BINS).map(|_| Bin::new()).collect();
        let inv_extent = NUM_BINS as f32 / extent;
        for &idx in indices {
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&bounds[idx]);
            bin.count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = AxisAlignedBox::INVALID;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = area(&sweep);
            left_count[i] = sweep_count;
        }

        sweep = AxisAlignedBox::INVALID;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * area(&sweep));

            if best.map_or(true, |(_, _, c)| cost < c) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition in place; returns the number of elements matching `pred`.
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

/// Slab test; returns the entry distance when the ray overlaps `b` within `[tmin, tmax]`.
#[inline]
pub fn intersect_box(b: &AxisAlignedBox, origin: Vec3, inv_dir: Vec3, tmin: f32, tmax: f32) -> Option<f32> {
    if !b.is_valid() {
        return None;
    }
    let t0 = (b.min - origin) * inv_dir;
    let t1 = (b.max - origin) * inv_dir;
    let near = t0.min(t1).max_element().max(tmin);
    let far = t0.max(t1).min_element().min(tmax);
    (near <= far).then_some(near)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32) -> AxisAlignedBox {
        AxisAlignedBox::new(Vec3::new(x - 0.5, -0.5, 0.0), Vec3::new(x + 0.5, 0.5, 0.0))
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.prim_indices.is_empty());
    }

    #[test]
    fn test_invalid_box_is_never_hit() {
        let bvh = build_bvh(&[]);
        for dir in [Vec3::X, Vec3::Z, Vec3::new(-1.0, 2.0, 0.5)] {
            let hit = intersect_box(&bvh.nodes[0].bounds, Vec3::ZERO, dir.recip(), 0.0, f32::INFINITY);
            assert_eq!(hit, None);
        }
        let hit = intersect_box(&unit_box(0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::NEG_Z.recip(), 0.0, f32::INFINITY);
        assert_eq!(hit, Some(1.0));
    }

    #[test]
    fn test_small_set_is_one_leaf() {
        let bvh = build_bvh(&[unit_box(0.0), unit_box(1.0), unit_box(2.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_many_prims_build_tree() {
        let boxes: Vec<_> = (0..100).map(|i| unit_box(i as f32 * 2.0)).collect();
        let bvh = build_bvh(&boxes);
        assert!(bvh.nodes.len() > 1);

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = &bvh.nodes[0];
        assert!(root.bounds.min.x < 0.0);
        assert!(root.bounds.max.x > 198.0);
    }

    #[test]
    fn test_box_hit() {
        let b = AxisAlignedBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let origin = Vec3::new(0.0, 0.0, -5.0);
        let dir = Vec3::Z;
        assert_eq!(intersect_box(&b, origin, dir.recip(), 0.0, f32::INFINITY), Some(4.0));
        assert_eq!(intersect_box(&b, origin, dir.recip(), 0.0, 3.0), None);
        assert_eq!(intersect_box(&b, Vec3::new(3.0, 0.0, -5.0), dir.recip(), 0.0, 100.0), None);
    }
}
