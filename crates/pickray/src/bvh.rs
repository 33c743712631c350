//! Bounding Volume Hierarchy over a triangle store.
//!
//! Built top-down with the Surface Area Heuristic (SAH) and stored as a flat
//! node array. Leaves reference a contiguous run of [`Bvh::prim_ids`].

use pickray_math::{Aabb3, Point3};

use crate::config::{BuildQuality, BvhConfig};
use crate::intersect::intersect_triangle;
use crate::ray::SlabRay;
use crate::triangle::{Triangle, TriangleStore};
use crate::Ray;

/// Leaves never hold more primitives than this, whatever the SAH prefers.
const MAX_LEAF_PRIMS: usize = 16;

/// What a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhNodeKind {
    /// Leaf referencing `prim_ids[first..first + count]`.
    Leaf {
        /// Start of this leaf's run in the primitive id array.
        first: u32,
        /// Number of primitives in the run.
        count: u32,
    },
    /// Interior node with two children.
    Internal {
        /// Index of the left child node.
        left: u32,
        /// Index of the right child node.
        right: u32,
    },
}

/// A BVH node. The root is node 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// Box enclosing every primitive below this node.
    pub aabb: Aabb3,
    /// Leaf or interior payload.
    pub kind: BvhNodeKind,
}

/// Bounding Volume Hierarchy for closest-hit ray queries against triangles.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    prim_ids: Vec<u32>,
}

/// Closest primitive found by [`Bvh::intersect_closest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveHit {
    /// Parameter along the ray.
    pub t: f32,
    /// Barycentric weight of `p1`.
    pub u: f32,
    /// Barycentric weight of `p2`.
    pub v: f32,
    /// Index of the triangle in its store.
    pub primitive_id: u32,
}

#[derive(Debug, Clone, Copy)]
struct BuildItem {
    prim: u32,
    aabb: Aabb3,
    center: Point3,
}

impl Bvh {
    /// Build over per-primitive boxes and centroids. Primitive ids are the
    /// slice indices.
    pub fn build(bboxes: &[Aabb3], centers: &[Point3], config: &BvhConfig) -> Self {
        let config = config.sanitized();
        let mut items: Vec<BuildItem> = bboxes
            .iter()
            .zip(centers)
            .enumerate()
            .map(|(i, (aabb, center))| BuildItem {
                prim: i as u32,
                aabb: *aabb,
                center: *center,
            })
            .collect();

        if items.is_empty() {
            return Self::default();
        }

        let mut nodes = Vec::with_capacity(2 * items.len() / config.max_leaf_size + 1);
        build_node(&mut items, 0, &config, &mut nodes);
        let prim_ids = items.iter().map(|item| item.prim).collect();

        Self { nodes, prim_ids }
    }

    /// Build over every triangle of `store`.
    pub fn from_store(store: &TriangleStore, config: &BvhConfig) -> Self {
        Self::build(store.bboxes(), store.centers(), config)
    }

    /// Find the closest triangle with `ray.t_near <= t < ray.t_far`.
    ///
    /// Children are visited nearer box first, and a box is skipped only when
    /// its entry lies strictly beyond the best hit so far. Among candidates
    /// at exactly the same distance the lowest primitive id wins, so the
    /// answer does not depend on the tree's shape.
    pub fn intersect_closest(&self, triangles: &[Triangle], ray: &Ray) -> Option<PrimitiveHit> {
        let root = self.nodes.first()?;
        let slab = SlabRay::new(ray);
        let limit = |best: &Option<PrimitiveHit>| best.map_or(ray.t_far, |b| b.t);

        let (root_entry, _) = slab.intersect_aabb(&root.aabb, ray.t_near, ray.t_far)?;
        let mut best: Option<PrimitiveHit> = None;
        let mut stack: Vec<(u32, f32)> = Vec::with_capacity(64);
        stack.push((0, root_entry));

        while let Some((index, entry)) = stack.pop() {
            if entry > limit(&best) {
                continue;
            }
            match self.nodes[index as usize].kind {
                BvhNodeKind::Leaf { first, count } => {
                    let run = &self.prim_ids[first as usize..(first + count) as usize];
                    for &prim in run {
                        let Some(tri) = triangles.get(prim as usize) else {
                            continue;
                        };
                        let Some(hit) = intersect_triangle(ray, tri) else {
                            continue;
                        };
                        if accepts(&best, ray.t_far, hit.t, prim) {
                            best = Some(PrimitiveHit {
                                t: hit.t,
                                u: hit.u,
                                v: hit.v,
                                primitive_id: prim,
                            });
                        }
                    }
                }
                BvhNodeKind::Internal { left, right } => {
                    let far = limit(&best);
                    let entry_of = |child: u32| {
                        slab.intersect_aabb(&self.nodes[child as usize].aabb, ray.t_near, far)
                            .map(|(t, _)| t)
                    };
                    // Push the farther child first so the nearer one pops next.
                    match (entry_of(left), entry_of(right)) {
                        (Some(lt), Some(rt)) => {
                            if lt <= rt {
                                stack.push((right, rt));
                                stack.push((left, lt));
                            } else {
                                stack.push((left, lt));
                                stack.push((right, rt));
                            }
                        }
                        (Some(lt), None) => stack.push((left, lt)),
                        (None, Some(rt)) => stack.push((right, rt)),
                        (None, None) => {}
                    }
                }
            }
        }

        best
    }

    /// All nodes; the root is at index 0.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Primitive ids in leaf order.
    pub fn prim_ids(&self) -> &[u32] {
        &self.prim_ids
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of levels; 0 for an empty tree, 1 for a single leaf.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0u32, 1usize)];
        while let Some((index, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let BvhNodeKind::Internal { left, right } = self.nodes[index as usize].kind {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        max_depth
    }

    /// Root box, or an empty box for an empty tree.
    pub fn bounds(&self) -> Aabb3 {
        self.nodes.first().map_or_else(Aabb3::empty, |root| root.aabb)
    }

    /// True if the tree holds no primitives.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Closest-hit acceptance with the lowest-id tie-break.
#[inline]
fn accepts(best: &Option<PrimitiveHit>, t_far: f32, t: f32, prim: u32) -> bool {
    match best {
        None => t < t_far,
        Some(b) => t < b.t || (t == b.t && prim < b.primitive_id),
    }
}

/// Build the subtree over `items`, whose first element sits at `offset` in
/// the final primitive order. Returns the new node's index.
fn build_node(
    items: &mut [BuildItem],
    offset: usize,
    config: &BvhConfig,
    nodes: &mut Vec<BvhNode>,
) -> u32 {
    let bounds = items
        .iter()
        .fold(Aabb3::empty(), |acc, item| acc.union(&item.aabb));
    let index = nodes.len() as u32;
    let n = items.len();
    nodes.push(BvhNode {
        aabb: bounds,
        kind: BvhNodeKind::Leaf {
            first: offset as u32,
            count: n as u32,
        },
    });

    if n <= config.max_leaf_size {
        return index;
    }

    let split = match config.quality {
        BuildQuality::Low => find_binned_split(items, config.bucket_count),
        BuildQuality::High => find_sweep_split(items),
    };

    let area = bounds.surface_area();
    let mid = match split {
        Some((mid, cost)) => {
            // Leaf cost is n triangle tests; split cost adds one traversal step.
            let leaf_cost = n as f32 * area;
            if n <= MAX_LEAF_PRIMS && config.traversal_cost * area + cost >= leaf_cost {
                return index;
            }
            mid
        }
        None if n <= MAX_LEAF_PRIMS => return index,
        None => median_split(items),
    };

    let (left_items, right_items) = items.split_at_mut(mid);
    let left = build_node(left_items, offset, config, nodes);
    let right = build_node(right_items, offset + mid, config, nodes);
    nodes[index as usize].kind = BvhNodeKind::Internal { left, right };

    index
}

/// Binned SAH: drop centroids into buckets along each axis, evaluate every
/// bucket boundary, then partition `items` at the best one.
///
/// Returns the partition point and its unnormalized SAH cost, or `None`
/// when all centroids coincide.
fn find_binned_split(items: &mut [BuildItem], bucket_count: usize) -> Option<(usize, f32)> {
    let centroid_bounds = Aabb3::from_points(items.iter().map(|item| &item.center));
    let extent = centroid_bounds.extent();

    let bucket_of = |c: f32, axis: usize| -> usize {
        let b = ((c - centroid_bounds.min[axis]) / extent[axis] * bucket_count as f32) as usize;
        b.min(bucket_count - 1)
    };

    let mut counts = vec![0usize; bucket_count];
    let mut boxes = vec![Aabb3::empty(); bucket_count];
    let mut right_count = vec![0usize; bucket_count];
    let mut right_area = vec![0.0f32; bucket_count];

    let mut best: Option<(usize, usize, f32)> = None;

    for axis in 0..3 {
        if extent[axis] <= 0.0 {
            continue;
        }

        counts.fill(0);
        boxes.fill(Aabb3::empty());
        for item in items.iter() {
            let b = bucket_of(item.center[axis], axis);
            counts[b] += 1;
            boxes[b].include_aabb(&item.aabb);
        }

        let mut acc = Aabb3::empty();
        let mut acc_count = 0;
        for b in (1..bucket_count).rev() {
            acc.include_aabb(&boxes[b]);
            acc_count += counts[b];
            right_area[b] = acc.surface_area();
            right_count[b] = acc_count;
        }

        let mut left = Aabb3::empty();
        let mut left_count = 0;
        for split in 1..bucket_count {
            left.include_aabb(&boxes[split - 1]);
            left_count += counts[split - 1];
            if left_count == 0 || right_count[split] == 0 {
                continue;
            }
            let cost = left.surface_area() * left_count as f32
                + right_area[split] * right_count[split] as f32;
            if best.map_or(true, |(_, _, c)| cost < c) {
                best = Some((axis, split, cost));
            }
        }
    }

    let (axis, split, cost) = best?;

    // Partition by bucket so the result agrees with the counts above.
    let mut left = 0;
    let mut right = items.len();
    while left < right {
        if bucket_of(items[left].center[axis], axis) < split {
            left += 1;
        } else {
            right -= 1;
            items.swap(left, right);
        }
    }

    Some((left, cost))
}

/// Sweep SAH: sort along each axis and evaluate every split position using
/// prefix and suffix bounds. Leaves `items` sorted on the chosen axis.
///
/// Axes where all centroids coincide are skipped, and `None` is returned when
/// that is every axis. Equal costs go to the split closest to the middle.
fn find_sweep_split(items: &mut [BuildItem]) -> Option<(usize, f32)> {
    let n = items.len();
    if n < 2 {
        return None;
    }
    let extent = Aabb3::from_points(items.iter().map(|item| &item.center)).extent();
    let imbalance = |mid: usize| mid.abs_diff(n - mid);

    let mut right_area = vec![0.0f32; n];
    let mut best: Option<(usize, usize, f32)> = None;
    let mut sorted_axis = None;

    for axis in 0..3 {
        if extent[axis] <= 0.0 {
            continue;
        }
        sort_on_axis(items, axis);
        sorted_axis = Some(axis);

        let mut acc = Aabb3::empty();
        for i in (1..n).rev() {
            acc.include_aabb(&items[i].aabb);
            right_area[i] = acc.surface_area();
        }

        let mut left = Aabb3::empty();
        for mid in 1..n {
            left.include_aabb(&items[mid - 1].aabb);
            let cost = left.surface_area() * mid as f32 + right_area[mid] * (n - mid) as f32;
            let better = best.map_or(true, |(_, m, c)| {
                cost < c || (cost == c && imbalance(mid) < imbalance(m))
            });
            if better {
                best = Some((axis, mid, cost));
            }
        }
    }

    let (axis, mid, cost) = best?;
    if sorted_axis != Some(axis) {
        sort_on_axis(items, axis);
    }
    Some((mid, cost))
}

fn sort_on_axis(items: &mut [BuildItem], axis: usize) {
    items.sort_unstable_by(|a, b| {
        a.center[axis]
            .total_cmp(&b.center[axis])
            .then(a.prim.cmp(&b.prim))
    });
}

/// Object median along the widest centroid axis. Always makes progress.
fn median_split(items: &mut [BuildItem]) -> usize {
    let axis = Aabb3::from_points(items.iter().map(|item| &item.center)).largest_axis();
    let mid = items.len() / 2;
    items.select_nth_unstable_by(mid, |a, b| a.center[axis].total_cmp(&b.center[axis]));
    mid
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickray_math::Vec3;

    /// `k` x `k` quads on a bumpy XY grid, two triangles each.
    fn grid(k: usize) -> Vec<Triangle> {
        let height = |i: usize, j: usize| ((i * 7 + j * 3) % 5) as f32 * 0.1;
        let mut tris = Vec::new();
        for i in 0..k {
            for j in 0..k {
                let p = |di: usize, dj: usize| {
                    Point3::new((i + di) as f32, (j + dj) as f32, height(i + di, j + dj))
                };
                tris.push(Triangle::new(p(0, 0), p(1, 0), p(1, 1)));
                tris.push(Triangle::new(p(0, 0), p(1, 1), p(0, 1)));
            }
        }
        tris
    }

    fn brute_force(triangles: &[Triangle], ray: &Ray) -> Option<PrimitiveHit> {
        let mut best = None;
        for (i, tri) in triangles.iter().enumerate() {
            if let Some(hit) = intersect_triangle(ray, tri) {
                if accepts(&best, ray.t_far, hit.t, i as u32) {
                    best = Some(PrimitiveHit {
                        t: hit.t,
                        u: hit.u,
                        v: hit.v,
                        primitive_id: i as u32,
                    });
                }
            }
        }
        best
    }

    /// Deterministic pseudo-random values in `[0, 1)`.
    fn lcg(state: &mut u32) -> f32 {
        *state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (*state >> 8) as f32 / (1u32 << 24) as f32
    }

    fn build(triangles: &[Triangle], quality: BuildQuality) -> Bvh {
        let store = TriangleStore::from_triangles(triangles.to_vec());
        let config = BvhConfig {
            quality,
            ..BvhConfig::default()
        };
        Bvh::from_store(&store, &config)
    }

    #[test]
    fn test_empty_build() {
        let bvh = Bvh::build(&[], &[], &BvhConfig::default());
        assert!(bvh.is_empty());
        assert_eq!(bvh.depth(), 0);
        assert!(bvh.bounds().is_empty());
        let ray = Ray::new(Point3::origin(), Vec3::new(0.0, 0.0, 1.0));
        assert!(bvh.intersect_closest(&[], &ray).is_none());
    }

    #[test]
    fn test_every_primitive_in_exactly_one_leaf() {
        let tris = grid(12);
        for quality in [BuildQuality::Low, BuildQuality::High] {
            let bvh = build(&tris, quality);
            let mut seen = vec![0u32; tris.len()];
            for node in bvh.nodes() {
                if let BvhNodeKind::Leaf { first, count } = node.kind {
                    assert!(count as usize <= MAX_LEAF_PRIMS);
                    for &prim in &bvh.prim_ids()[first as usize..(first + count) as usize] {
                        seen[prim as usize] += 1;
                        assert!(node.aabb.overlaps(&tris[prim as usize].bbox()));
                    }
                }
            }
            assert!(seen.iter().all(|&c| c == 1), "{quality:?}");
            assert!(bvh.depth() > 1);
        }
    }

    #[test]
    fn test_matches_brute_force() {
        let tris = grid(16);
        let mut state = 17u32;
        for quality in [BuildQuality::Low, BuildQuality::High] {
            let bvh = build(&tris, quality);
            for _ in 0..300 {
                let origin = Point3::new(lcg(&mut state) * 16.0, lcg(&mut state) * 16.0, 3.0);
                let direction = Vec3::new(lcg(&mut state) - 0.5, lcg(&mut state) - 0.5, -1.0);
                let ray = Ray::new(origin, direction);
                let expected = brute_force(&tris, &ray);
                let got = bvh.intersect_closest(&tris, &ray);
                assert_eq!(got, expected, "{quality:?} {ray:?}");
            }
        }
    }

    #[test]
    fn test_respects_t_far() {
        let tris = grid(4);
        let bvh = build(&tris, BuildQuality::Low);
        let ray = Ray::new(Point3::new(1.5, 1.5, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = bvh.intersect_closest(&tris, &ray).unwrap();
        let short = ray.with_range(0.0, hit.t);
        assert!(bvh.intersect_closest(&tris, &short).is_none());
    }

    #[test]
    fn test_equal_distance_picks_lowest_id() {
        // Stacked copies force interior nodes over identical triangles.
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        let mut tris = vec![tri; 40];
        // A far-off triangle shifts the centroid bounds.
        tris[0] = Triangle::new(
            Point3::new(10.0, 10.0, 0.0),
            Point3::new(11.0, 10.0, 0.0),
            Point3::new(10.0, 11.0, 0.0),
        );
        let ray = Ray::new(Point3::new(0.2, 0.2, 1.0), Vec3::new(0.0, 0.0, -1.0));
        for quality in [BuildQuality::Low, BuildQuality::High] {
            let bvh = build(&tris, quality);
            assert!(bvh.node_count() > 1);
            let hit = bvh.intersect_closest(&tris, &ray).unwrap();
            assert_eq!(hit.primitive_id, 1, "{quality:?}");
        }
    }

    #[test]
    fn test_coincident_centroids_stay_balanced() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        let tris = vec![tri; 2000];
        for quality in [BuildQuality::Low, BuildQuality::High] {
            let bvh = build(&tris, quality);
            // 2000 / 16 leaves need 7 levels of halving.
            assert!(bvh.depth() <= 12, "{quality:?} depth {}", bvh.depth());
            assert_eq!(bvh.prim_ids().len(), tris.len());

            let ray = Ray::new(Point3::new(0.2, 0.2, 1.0), Vec3::new(0.0, 0.0, -1.0));
            assert_eq!(bvh.intersect_closest(&tris, &ray).unwrap().primitive_id, 0);
        }
    }

    #[test]
    fn test_single_leaf_for_small_input() {
        let tris = grid(1);
        let bvh = build(&tris, BuildQuality::High);
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.depth(), 1);
        assert_eq!(bvh.bounds(), TriangleStore::from_triangles(tris).bounds());
    }
}
