//! L4 — a binary k-d tree over a 3-D point array: range-box and ball
//! queries. Written against spec.md §4.3/§3's ownership and traversal
//! invariants directly (a small owned recursive struct rather than a
//! third-party R-tree crate), since those invariants are themselves part
//! of the tested surface: depth-mod-3 splitting axis, median-of-subslice
//! selection, and "a node owns exactly one index of the point array".

use nalgebra::Vector3;

/// A node in the k-d tree: owns one index into the point array plus its
/// (possibly empty) left and right children. Children are exclusively
/// owned by their parent, so the whole tree is dropped with a single
/// recursive destructor (the default `Drop` for `Box` already gives us
/// this).
#[derive(Debug)]
enum Node {
    Leaf,
    Branch {
        index: usize,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A k-d tree that borrows a point array; it never copies the points.
#[derive(Debug)]
pub struct KdTree<'p> {
    points: &'p [Vector3<f64>],
    root: Node,
}

impl<'p> KdTree<'p> {
    /// Builds a k-d tree over all points in `points`.
    pub fn build(points: &'p [Vector3<f64>]) -> Self {
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let root = build_recursive(points, &mut indices, 0);
        KdTree { points, root }
    }

    /// The number of points indexed by this tree.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the tree indexes no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the indices of all points componentwise within
    /// `[lower, upper]` (inclusive).
    pub fn range_query(&self, lower: Vector3<f64>, upper: Vector3<f64>) -> Vec<usize> {
        let mut out = Vec::new();
        range_query_recursive(self.points, &self.root, 0, lower, upper, &mut out);
        out
    }

    /// Returns the indices of all points within Euclidean distance `r` of
    /// `origin`: a range-box query over `[origin - r, origin + r]`
    /// followed by an exact distance filter, per spec.md §4.3.
    pub fn ball_query(&self, origin: Vector3<f64>, r: f64) -> Vec<usize> {
        let offset = Vector3::new(r, r, r);
        let candidates = self.range_query(origin - offset, origin + offset);
        let r2 = r * r;
        candidates
            .into_iter()
            .filter(|&i| (self.points[i] - origin).norm_squared() <= r2)
            .collect()
    }
}

fn axis_of(depth: usize) -> usize {
    depth % 3
}

fn build_recursive(points: &[Vector3<f64>], indices: &mut [usize], depth: usize) -> Node {
    if indices.is_empty() {
        return Node::Leaf;
    }

    let axis = axis_of(depth);
    indices.sort_by(|&a, &b| {
        points[a][axis]
            .partial_cmp(&points[b][axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let median = indices.len() / 2;
    let index = indices[median];

    let (left_indices, rest) = indices.split_at_mut(median);
    let right_indices = &mut rest[1..];

    let left = build_recursive(points, left_indices, depth + 1);
    let right = build_recursive(points, right_indices, depth + 1);

    Node::Branch {
        index,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn range_query_recursive(
    points: &[Vector3<f64>],
    node: &Node,
    depth: usize,
    lower: Vector3<f64>,
    upper: Vector3<f64>,
    out: &mut Vec<usize>,
) {
    let (index, left, right) = match node {
        Node::Leaf => return,
        Node::Branch { index, left, right } => (*index, left, right),
    };

    let p = points[index];
    if (0..3).all(|i| p[i] >= lower[i] && p[i] <= upper[i]) {
        out.push(index);
    }

    let axis = axis_of(depth);
    // A median split means points equal to the splitting value can live
    // in either subtree (the original C++ puts equal values in the
    // right subtree); query both sides whenever the box could overlap.
    if lower[axis] <= p[axis] {
        range_query_recursive(points, left, depth + 1, lower, upper, out);
    }
    if upper[axis] >= p[axis] {
        range_query_recursive(points, right, depth + 1, lower, upper, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_range(
        points: &[Vector3<f64>],
        lower: Vector3<f64>,
        upper: Vector3<f64>,
    ) -> std::collections::HashSet<usize> {
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| (0..3).all(|i| p[i] >= lower[i] && p[i] <= upper[i]))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn range_query_matches_regression_scenario() {
        // spec.md §8 scenario 3, extended to 3-D with z = 0.
        let points = vec![
            Vector3::new(2.0, 3.0, 0.0),
            Vector3::new(5.0, 4.0, 0.0),
            Vector3::new(9.0, 6.0, 0.0),
            Vector3::new(4.0, 7.0, 0.0),
            Vector3::new(8.0, 1.0, 0.0),
            Vector3::new(7.0, 2.0, 0.0),
        ];
        let tree = KdTree::build(&points);
        let lower = Vector3::new(3.5, 1.0, -1.0);
        let upper = Vector3::new(7.5, 5.0, 1.0);

        let result: std::collections::HashSet<usize> =
            tree.range_query(lower, upper).into_iter().collect();
        let expected: std::collections::HashSet<usize> = [1usize, 5].into_iter().collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn range_query_matches_brute_force_on_random_points() {
        // Deterministic pseudo-random point generation (no RNG
        // dependency): a simple linear congruential sequence.
        let mut seed: u64 = 12345;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 33) as f64 / u32::MAX as f64) * 10.0 - 5.0
        };
        let points: Vec<Vector3<f64>> = (0..200)
            .map(|_| Vector3::new(next(), next(), next()))
            .collect();
        let tree = KdTree::build(&points);

        let lower = Vector3::new(-2.0, -2.0, -2.0);
        let upper = Vector3::new(2.0, 2.0, 2.0);

        let result: std::collections::HashSet<usize> =
            tree.range_query(lower, upper).into_iter().collect();
        let expected = brute_force_range(&points, lower, upper);
        assert_eq!(result, expected);
    }

    #[test]
    fn ball_query_filters_exact_distance() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
        ];
        let tree = KdTree::build(&points);
        let result: std::collections::HashSet<usize> = tree
            .ball_query(Vector3::new(0.0, 0.0, 0.0), 1.5)
            .into_iter()
            .collect();
        let expected: std::collections::HashSet<usize> = [0usize, 1].into_iter().collect();
        assert_eq!(result, expected);
    }
}
