//! # KD-Tree Spatial Index
//!
//! A rebuildable 2D KD-tree supporting radius queries over a dynamic point
//! set. Designed for the per-frame rebuild pattern of the simulator:
//!
//! 1. The node arena and permutation array are pooled; a rebuild resets a
//!    cursor instead of freeing, so steady-state rebuilds allocate nothing.
//! 2. Construction is breadth-first over an explicit work queue, so tree
//!    depth never touches the call stack.
//! 3. Items are never moved; splitting reorders a permutation array of
//!    indices into the item list.
//!
//! Split axis selection is the cheap largest-extent heuristic and the
//! partition is a single-pivot Hoare scheme, so construction is amortized
//! O(n log n) and degrades toward O(n^2) only for near-duplicate coordinate
//! distributions.

use std::collections::VecDeque;

use crate::structs::{Axis, Vector2D};

/// Capability required of any item stored in a [`KdTree`].
pub trait Positioned {
    fn position(&self) -> Vector2D;
}

/// A tree node: an internal split or a leaf range. `start_index` and
/// `end_index` are a half-open range into the permutation array; the bounds
/// are propagated from the parent with only the split axis clipped, a cheap
/// approximation rather than an exact recomputation.
#[derive(Debug, Clone)]
pub struct KdNode {
    pub bound_min: Vector2D,
    pub bound_max: Vector2D,
    pub split_axis: Axis,
    pub split_value: f64,
    pub start_index: usize,
    pub end_index: usize,
    children: Option<(usize, usize)>,
}

impl KdNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn item_count(&self) -> usize {
        self.end_index - self.start_index
    }
}

impl Default for KdNode {
    fn default() -> Self {
        KdNode {
            bound_min: Vector2D::ZERO,
            bound_max: Vector2D::ZERO,
            split_axis: Axis::X,
            split_value: 0.0,
            start_index: 0,
            end_index: 0,
            children: None,
        }
    }
}

/// Rebuildable spatial index over any [`Positioned`] item type.
pub struct KdTree<T> {
    leaf_size_max: usize,
    items: Vec<T>,
    /// Bijection on `[0, items.len())` after a rebuild; grown, never shrunk.
    permutation: Vec<usize>,
    /// Node arena, reused across rebuilds via `cursor`.
    nodes: Vec<KdNode>,
    cursor: usize,
    root: Option<usize>,
    /// Work queue shared by construction and queries.
    queue: VecDeque<usize>,
}

impl<T: Positioned> KdTree<T> {
    pub fn new() -> Self {
        KdTree {
            leaf_size_max: 10,
            items: Vec::new(),
            permutation: Vec::new(),
            nodes: Vec::new(),
            cursor: 0,
            root: None,
            queue: VecDeque::new(),
        }
    }

    /// Appends an item to the managed set. Takes effect on the next rebuild.
    pub fn add(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn add_all<I: IntoIterator<Item = T>>(&mut self, items: I) {
        self.items.extend(items);
    }

    /// Empties the managed set and invalidates the tree. Pooled capacity is
    /// retained.
    pub fn clear(&mut self) {
        self.items.clear();
        self.root = None;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Max items a leaf may hold before it is further split. Clamped to 1.
    pub fn set_leaf_size_max(&mut self, leaf_size_max: usize) {
        self.leaf_size_max = leaf_size_max.max(1);
    }

    /// Rebuilds the tree from the current item set. No-op when empty.
    pub fn rebuild(&mut self) {
        if self.items.is_empty() {
            return;
        }

        let count = self.items.len();
        if self.permutation.len() < count {
            self.permutation.resize(count, 0);
        }
        for (i, slot) in self.permutation.iter_mut().take(count).enumerate() {
            *slot = i;
        }

        self.cursor = 0;
        let (bound_min, bound_max) = self.find_bounds();
        let root = self.alloc_node();
        {
            let node = &mut self.nodes[root];
            node.start_index = 0;
            node.end_index = count;
            node.bound_min = bound_min;
            node.bound_max = bound_max;
        }
        self.root = Some(root);

        self.queue.clear();
        self.queue.push_back(root);
        while let Some(id) = self.queue.pop_front() {
            self.split(id);
        }
    }

    /// Collects every item within `radius` of `center` into `out`, clearing
    /// it first so callers can reuse the same collection across frames.
    /// Output order follows permutation order within leaves, left subtree
    /// before right; it is not sorted by distance. No-op before the first
    /// successful rebuild.
    pub fn query_in_range(&mut self, center: Vector2D, radius: f64, out: &mut Vec<T>)
    where
        T: Clone,
    {
        out.clear();
        if self.items.is_empty() {
            return;
        }
        let Some(root) = self.root else {
            return;
        };

        let radius_sq = radius * radius;
        self.queue.clear();
        self.queue.push_back(root);

        while let Some(id) = self.queue.pop_front() {
            match self.nodes[id].children {
                None => {
                    let start = self.nodes[id].start_index;
                    let end = self.nodes[id].end_index;
                    for i in start..end {
                        let item = &self.items[self.permutation[i]];
                        if (item.position() - center).sqr_magnitude() <= radius_sq {
                            out.push(item.clone());
                        }
                    }
                }
                Some((left, right)) => {
                    if self.min_sqr_distance(left, center) <= radius_sq {
                        self.queue.push_back(left);
                    }
                    if self.min_sqr_distance(right, center) <= radius_sq {
                        self.queue.push_back(right);
                    }
                }
            }
        }
    }

    /// Allocating variant of [`query_in_range`](KdTree::query_in_range).
    pub fn query_in_range_collect(&mut self, center: Vector2D, radius: f64) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        self.query_in_range(center, radius, &mut out);
        out
    }

    /// Pre-order traversal over all nodes, for diagnostics and debug drawing.
    pub fn visit<F: FnMut(&KdNode)>(&self, mut func: F) {
        if let Some(root) = self.root {
            self.visit_node(&mut func, root);
        }
    }

    fn visit_node<F: FnMut(&KdNode)>(&self, func: &mut F, id: usize) {
        let node = &self.nodes[id];
        func(node);
        if let Some((left, right)) = node.children {
            self.visit_node(func, left);
            self.visit_node(func, right);
        }
    }

    fn alloc_node(&mut self) -> usize {
        if self.cursor == self.nodes.len() {
            self.nodes.push(KdNode::default());
        }
        let id = self.cursor;
        self.cursor += 1;
        self.nodes[id].children = None;
        id
    }

    fn find_bounds(&self) -> (Vector2D, Vector2D) {
        let first = self.items[0].position();
        let mut min = first;
        let mut max = first;
        for item in &self.items {
            let position = item.position();
            min = min.min(position);
            max = max.max(position);
        }
        (min, max)
    }

    fn split(&mut self, id: usize) {
        let (start, end, bound_min, bound_max) = {
            let node = &self.nodes[id];
            (
                node.start_index,
                node.end_index,
                node.bound_min,
                node.bound_max,
            )
        };

        if end - start <= self.leaf_size_max {
            return;
        }

        let extent = bound_max - bound_min;
        let axis = if extent.y > extent.x { Axis::Y } else { Axis::X };

        // Single-pivot partition with a degenerate retry: when the pivot
        // lands at the range edge, retry with the next index as pivot while
        // at least 2 elements remain to pivot over. On exhaustion the node
        // stays an oversized leaf.
        let mut offset = 0;
        let split_index = loop {
            let index = self.partition(start + offset, end, axis);
            if index != start && index != end {
                break Some(index);
            }
            if end - (start + offset) <= 2 {
                break None;
            }
            offset += 1;
        };
        let Some(split_index) = split_index else {
            return;
        };

        let split_value = self.items[self.permutation[split_index]]
            .position()
            .component(axis);

        let left = self.alloc_node();
        {
            let mut left_max = bound_max;
            left_max.set_component(axis, split_value);
            let node = &mut self.nodes[left];
            node.bound_min = bound_min;
            node.bound_max = left_max;
            node.start_index = start;
            node.end_index = split_index;
        }

        let right = self.alloc_node();
        {
            let mut right_min = bound_min;
            right_min.set_component(axis, split_value);
            let node = &mut self.nodes[right];
            node.bound_min = right_min;
            node.bound_max = bound_max;
            node.start_index = split_index;
            node.end_index = end;
        }

        {
            let node = &mut self.nodes[id];
            node.split_axis = axis;
            node.split_value = split_value;
            node.children = Some((left, right));
        }

        self.queue.push_back(left);
        self.queue.push_back(right);
    }

    /// Hoare-style partition of the permutation sub-range `[lo, hi)` around
    /// the element at `lo`. Returns the pivot's final position: everything
    /// left of it is <= on `axis`, everything right is >=.
    fn partition(&mut self, lo: usize, hi: usize, axis: Axis) -> usize {
        let mut start = lo;
        let mut end = hi - 1;
        let pivot = self.permutation[start];
        let pivot_coord = self.items[pivot].position().component(axis);

        while start < end {
            while start < end && self.coord(end, axis) >= pivot_coord {
                end -= 1;
            }
            self.permutation[start] = self.permutation[end];
            while start < end && self.coord(start, axis) <= pivot_coord {
                start += 1;
            }
            self.permutation[end] = self.permutation[start];
        }
        self.permutation[start] = pivot;
        start
    }

    fn coord(&self, index: usize, axis: Axis) -> f64 {
        self.items[self.permutation[index]].position().component(axis)
    }

    /// Squared distance from `center` to the nearest point of the node's
    /// bounding box; zero when the center is inside.
    fn min_sqr_distance(&self, id: usize, center: Vector2D) -> f64 {
        let node = &self.nodes[id];
        let dx = (node.bound_min.x - center.x)
            .max(center.x - node.bound_max.x)
            .max(0.0);
        let dy = (node.bound_min.y - center.y)
            .max(center.y - node.bound_max.y)
            .max(0.0);
        dx * dx + dy * dy
    }
}

impl<T: Positioned> Default for KdTree<T> {
    fn default() -> Self {
        KdTree::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Site {
        id: usize,
        position: Vector2D,
    }

    impl Positioned for Site {
        fn position(&self) -> Vector2D {
            self.position
        }
    }

    fn site(id: usize, x: f64, y: f64) -> Site {
        Site {
            id,
            position: Vector2D::new(x, y),
        }
    }

    // Same seeded LCG used across the library's tests, for reproducibility.
    fn lcg_next(state: &mut u64) -> u64 {
        *state = (1664525_u64.wrapping_mul(*state).wrapping_add(1013904223)) % (1 << 32);
        *state
    }

    fn random_sites(count: usize, seed: u64, span: f64) -> Vec<Site> {
        let mut state = seed;
        (0..count)
            .map(|id| {
                let x = (lcg_next(&mut state) % 100_000) as f64 / 100_000.0 * span;
                let y = (lcg_next(&mut state) % 100_000) as f64 / 100_000.0 * span;
                site(id, x, y)
            })
            .collect()
    }

    /// Coordinates snapped to a tiny lattice so duplicates are common.
    fn clustered_sites(count: usize, seed: u64) -> Vec<Site> {
        let mut state = seed;
        (0..count)
            .map(|id| {
                let x = (lcg_next(&mut state) % 8) as f64;
                let y = (lcg_next(&mut state) % 8) as f64;
                site(id, x, y)
            })
            .collect()
    }

    fn brute_force_ids(sites: &[Site], center: Vector2D, radius: f64) -> Vec<usize> {
        let radius_sq = radius * radius;
        let mut ids: Vec<usize> = sites
            .iter()
            .filter(|s| (s.position - center).sqr_magnitude() <= radius_sq)
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn build_tree(sites: &[Site], leaf_size_max: usize) -> KdTree<Site> {
        let mut tree = KdTree::new();
        tree.set_leaf_size_max(leaf_size_max);
        tree.add_all(sites.iter().copied());
        tree.rebuild();
        tree
    }

    // --- Tests for rebuild invariants ---

    #[test]
    fn test_leaf_ranges_partition_the_index_space() {
        for &count in &[1usize, 2, 3, 10, 57, 200] {
            let sites = random_sites(count, 42 + count as u64, 50.0);
            let tree = build_tree(&sites, 5);

            let mut leaf_ranges = Vec::new();
            tree.visit(|node| {
                if node.is_leaf() {
                    leaf_ranges.push((node.start_index, node.end_index));
                }
            });
            leaf_ranges.sort_unstable();

            let mut expected_start = 0;
            for (start, end) in leaf_ranges {
                assert_eq!(
                    start, expected_start,
                    "leaf ranges must tile [0, count) without gaps or overlap"
                );
                assert!(end > start, "leaf range must be non-empty");
                expected_start = end;
            }
            assert_eq!(expected_start, count, "leaf ranges must cover all items");
        }
    }

    #[test]
    fn test_leaf_size_respected_for_distinct_points() {
        let sites = random_sites(300, 7, 100.0);
        let tree = build_tree(&sites, 5);

        tree.visit(|node| {
            if node.is_leaf() {
                assert!(
                    node.item_count() <= 5,
                    "leaf holds {} items, limit is 5",
                    node.item_count()
                );
            }
        });
    }

    #[test]
    fn test_permutation_is_a_bijection_after_rebuild() {
        let sites = clustered_sites(120, 11);
        let tree = build_tree(&sites, 4);

        let mut seen = tree.permutation[..sites.len()].to_vec();
        seen.sort_unstable();
        let expected: Vec<usize> = (0..sites.len()).collect();
        assert_eq!(seen, expected, "permutation must visit every index once");
    }

    #[test]
    fn test_rebuild_twice_is_stable() {
        let sites = random_sites(150, 99, 30.0);
        let mut tree = build_tree(&sites, 6);

        let mut first = Vec::new();
        tree.visit(|node| first.push((node.start_index, node.end_index, node.is_leaf())));

        tree.rebuild();
        let mut second = Vec::new();
        tree.visit(|node| second.push((node.start_index, node.end_index, node.is_leaf())));

        assert_eq!(first, second, "rebuild with unchanged positions must be stable");
    }

    #[test]
    fn test_rebuild_empty_is_noop() {
        let mut tree: KdTree<Site> = KdTree::new();
        tree.rebuild();
        assert!(tree.root.is_none());
    }

    #[test]
    fn test_internal_nodes_have_two_children() {
        let sites = random_sites(80, 3, 10.0);
        let tree = build_tree(&sites, 3);

        let mut internal = 0;
        let mut leaves = 0;
        tree.visit(|node| {
            if node.is_leaf() {
                leaves += 1;
            } else {
                internal += 1;
            }
        });
        // A strictly binary tree: leaves = internal + 1.
        assert_eq!(leaves, internal + 1);
    }

    #[test]
    fn test_oversized_leaf_when_pivot_retries_exhaust() {
        // Two coincident points with leaf size 1: the partition cannot make
        // progress, so the node is accepted as an oversized leaf.
        let sites = vec![site(0, 3.0, 3.0), site(1, 3.0, 3.0)];
        let tree = build_tree(&sites, 1);

        let mut leaves = Vec::new();
        tree.visit(|node| {
            assert!(node.is_leaf());
            leaves.push(node.item_count());
        });
        assert_eq!(leaves, vec![2], "coincident pair must stay one oversized leaf");
    }

    #[test]
    fn test_duplicate_coordinates_still_partition_correctly() {
        let sites: Vec<Site> = (0..9).map(|id| site(id, 1.0, 1.0)).collect();
        let tree = build_tree(&sites, 1);

        let mut covered = 0;
        tree.visit(|node| {
            if node.is_leaf() {
                covered += node.item_count();
                // Give-up leaves are only reachable for 2-element ranges.
                assert!(node.item_count() <= 2);
            }
        });
        assert_eq!(covered, 9);
    }

    #[test]
    fn test_set_leaf_size_max_clamps_to_one() {
        let mut tree: KdTree<Site> = KdTree::new();
        tree.set_leaf_size_max(0);
        assert_eq!(tree.leaf_size_max, 1);
    }

    // --- Tests for query_in_range ---

    #[test]
    fn test_query_matches_brute_force_on_random_sets() {
        for &count in &[1usize, 2, 5, 33, 120, 400] {
            let sites = random_sites(count, 1000 + count as u64, 40.0);
            let mut tree = build_tree(&sites, 10);

            let mut out = Vec::new();
            for &radius in &[0.5, 3.0, 11.0, 80.0] {
                for &(cx, cy) in &[(0.0, 0.0), (20.0, 20.0), (39.0, 5.0), (-4.0, 41.0)] {
                    let center = Vector2D::new(cx, cy);
                    tree.query_in_range(center, radius, &mut out);
                    let mut ids: Vec<usize> = out.iter().map(|s| s.id).collect();
                    ids.sort_unstable();
                    assert_eq!(
                        ids,
                        brute_force_ids(&sites, center, radius),
                        "query mismatch: count={} radius={} center=({}, {})",
                        count,
                        radius,
                        cx,
                        cy
                    );
                }
            }
        }
    }

    #[test]
    fn test_query_matches_brute_force_on_clustered_sets() {
        let sites = clustered_sites(200, 77);
        let mut tree = build_tree(&sites, 4);

        let mut out = Vec::new();
        for &radius in &[0.0, 1.0, 2.5, 10.0] {
            for cell in 0..8 {
                let center = Vector2D::new(cell as f64, (7 - cell) as f64);
                tree.query_in_range(center, radius, &mut out);
                let mut ids: Vec<usize> = out.iter().map(|s| s.id).collect();
                ids.sort_unstable();
                assert_eq!(ids, brute_force_ids(&sites, center, radius));
            }
        }
    }

    #[test]
    fn test_query_radius_zero_returns_exact_matches_only() {
        let sites = vec![
            site(0, 2.0, 2.0),
            site(1, 2.0, 2.0),
            site(2, 2.0, 2.0 + 1e-9),
            site(3, 5.0, 5.0),
        ];
        let mut tree = build_tree(&sites, 2);

        let out = tree.query_in_range_collect(Vector2D::new(2.0, 2.0), 0.0);
        let mut ids: Vec<usize> = out.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1], "radius 0 must only match coincident items");
    }

    #[test]
    fn test_query_before_rebuild_is_noop() {
        let mut tree = KdTree::new();
        tree.add(site(0, 1.0, 1.0));

        let mut out = vec![site(9, 0.0, 0.0)];
        tree.query_in_range(Vector2D::ZERO, 100.0, &mut out);
        assert!(out.is_empty(), "no rebuild yet, output must be cleared and empty");
    }

    #[test]
    fn test_query_after_clear_is_noop() {
        let sites = random_sites(50, 5, 10.0);
        let mut tree = build_tree(&sites, 5);

        tree.clear();
        let out = tree.query_in_range_collect(Vector2D::new(5.0, 5.0), 100.0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_query_reuses_output_collection() {
        let sites = vec![site(0, 0.0, 0.0), site(1, 10.0, 10.0)];
        let mut tree = build_tree(&sites, 10);

        let mut out = Vec::new();
        tree.query_in_range(Vector2D::ZERO, 1.0, &mut out);
        assert_eq!(out.len(), 1);
        tree.query_in_range(Vector2D::new(10.0, 10.0), 1.0, &mut out);
        assert_eq!(out.len(), 1, "previous results must be cleared on reuse");
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn test_query_on_empty_tree() {
        let mut tree: KdTree<Site> = KdTree::new();
        let out = tree.query_in_range_collect(Vector2D::ZERO, 10.0);
        assert!(out.is_empty());
    }

    // --- Tests for visit ---

    #[test]
    fn test_visit_is_preorder_from_root() {
        let sites = random_sites(40, 17, 10.0);
        let tree = build_tree(&sites, 3);

        let mut first = None;
        tree.visit(|node| {
            if first.is_none() {
                first = Some((node.start_index, node.end_index));
            }
        });
        assert_eq!(first, Some((0, 40)), "traversal must start at the root");
    }

    #[test]
    fn test_visit_without_rebuild_does_nothing() {
        let tree: KdTree<Site> = KdTree::new();
        let mut visited = 0;
        tree.visit(|_| visited += 1);
        assert_eq!(visited, 0);
    }
}
