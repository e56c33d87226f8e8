//! Surface sub-domain partitioning (spec.md §4.6.4):
//! `getSurfaceSubdomains(minDistance)` splits the boundary vertex set
//! into groups whose members are pairwise separated by more than
//! `minDistance`, via repeated farthest-point selection.
//!
//! `volumeReconstruction.h` carries no declaration for this operation, so
//! it is built fresh from spec.md's "repeated farthest-point selection on
//! the k-d tree" description, reusing [`crate::kdtree::KdTree::ball_query`]
//! the same way `implicit.rs`/`qef.rs` compose the tree's only proximity
//! primitive into higher-level neighbourhood operations.

use crate::kdtree::KdTree;
use nalgebra::Vector3;

/// Partitions `vertices` into groups such that every pair of vertices
/// within a group is farther apart than `min_distance`. Returns the
/// per-group vertex count and the concatenated vertex indices (group 0's
/// indices first, then group 1's, and so on), matching spec.md §4.6.4.
pub fn get_surface_subdomains(
    vertices: &[Vector3<f64>],
    tree: &KdTree,
    min_distance: f64,
) -> (Vec<usize>, Vec<usize>) {
    let n = vertices.len();
    let mut assigned = vec![false; n];
    let mut group_counts = Vec::new();
    let mut flat_indices = Vec::new();

    loop {
        let Some(seed) = (0..n).find(|&i| !assigned[i]) else {
            break;
        };

        let mut group = Vec::new();
        let mut excluded = vec![false; n];
        let mut pick = Some(seed);

        while let Some(i) = pick {
            group.push(i);
            assigned[i] = true;
            for &j in &tree.ball_query(vertices[i], min_distance) {
                if !assigned[j] {
                    excluded[j] = true;
                }
            }

            pick = (0..n)
                .filter(|&j| !assigned[j] && !excluded[j])
                .max_by(|&a, &b| {
                    let da = min_distance_to_group(vertices, &group, a);
                    let db = min_distance_to_group(vertices, &group, b);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                });
        }

        group_counts.push(group.len());
        flat_indices.extend(group);
    }

    (group_counts, flat_indices)
}

fn min_distance_to_group(vertices: &[Vector3<f64>], group: &[usize], candidate: usize) -> f64 {
    group
        .iter()
        .map(|&g| (vertices[candidate] - vertices[g]).norm())
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_well_separated_clusters_each_collapse_to_one_vertex_per_group() {
        // Two tight clusters far apart: with a min_distance larger than
        // each cluster's internal spacing but smaller than the
        // inter-cluster gap, every cluster contributes exactly one
        // surviving vertex per round, and the two clusters end up in
        // different rounds only if their single representatives are
        // still closer than min_distance to each other -- here they are
        // not, so both representatives land in the same first group.
        let vertices = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.01, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(10.01, 0.0, 0.0),
        ];
        let tree = KdTree::build(&vertices);
        let (counts, indices) = get_surface_subdomains(&vertices, &tree, 1.0);

        assert_eq!(counts.iter().sum::<usize>(), vertices.len());
        assert_eq!(indices.len(), vertices.len());

        // The first group must contain one representative from each
        // cluster, since 10.0 - 0.0 > min_distance, and cannot contain
        // both members of a single cluster, since 0.01 < min_distance.
        let first_group = &indices[0..counts[0]];
        assert!(!first_group.contains(&0) || !first_group.contains(&1));
        assert!(!first_group.contains(&2) || !first_group.contains(&3));
    }

    #[test]
    fn groups_partition_every_vertex_exactly_once() {
        let vertices: Vec<Vector3<f64>> = (0..20)
            .map(|i| Vector3::new(i as f64 * 0.1, 0.0, 0.0))
            .collect();
        let tree = KdTree::build(&vertices);
        let (counts, indices) = get_surface_subdomains(&vertices, &tree, 0.25);

        assert_eq!(indices.len(), vertices.len());
        assert_eq!(counts.iter().sum::<usize>(), vertices.len());

        let mut seen = std::collections::HashSet::new();
        for &idx in &indices {
            assert!(seen.insert(idx), "vertex {idx} appeared in more than one group");
        }
    }

    #[test]
    fn every_group_respects_the_minimum_pairwise_distance() {
        let vertices: Vec<Vector3<f64>> = (0..12)
            .map(|i| Vector3::new(i as f64 * 0.2, 0.0, 0.0))
            .collect();
        let tree = KdTree::build(&vertices);
        let min_distance = 0.5;
        let (counts, indices) = get_surface_subdomains(&vertices, &tree, min_distance);

        let mut offset = 0;
        for &count in &counts {
            let group = &indices[offset..offset + count];
            for &i in group {
                for &j in group {
                    if i != j {
                        let d = (vertices[i] - vertices[j]).norm();
                        assert!(d > min_distance, "vertices {i} and {j} are only {d} apart");
                    }
                }
            }
            offset += count;
        }
    }
}
