//! The background grid `G` of spec.md §3: a regular axis-aligned 3-D
//! grid of Hex8 cells covering a point cloud's bounding box, inflated by
//! a relative exterior margin. Nodes and cells are numbered
//! lexicographically, per spec.md §3.
//!
//! Grounded on `original_source/volumeReconstruction.h`'s
//! `dualContouring::setGridSpacing`/`_gridLocations` (per-axis node
//! coordinate arrays derived from `_domainDiscretization`), adapted to an
//! owned, queryable grid type in this crate's established idiom (compare
//! `mesh::MacroMesh`).

use crate::error::{CoreError, CoreResult};
use crate::hex8;
use nalgebra::Vector3;

/// A regular axis-aligned background grid of Hex8 cells.
#[derive(Debug, Clone)]
pub struct BackgroundGrid {
    lower: Vector3<f64>,
    upper: Vector3<f64>,
    /// Cells per axis.
    counts: [usize; 3],
    /// Node coordinates along each axis (length `counts[a] + 1`).
    axis_coords: [Vec<f64>; 3],
}

impl BackgroundGrid {
    /// Builds a background grid covering `[lower, upper]` with `counts`
    /// cells along each axis. `lower`/`upper` are expected to already
    /// include the exterior margin (spec.md §4.6.2 step 2).
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>, counts: [usize; 3]) -> CoreResult<Self> {
        if counts.iter().any(|&n| n == 0) {
            return Err(CoreError::Configuration(
                "background grid requires at least one cell per axis".to_string(),
            ));
        }
        if (0..3).any(|a| upper[a] <= lower[a]) {
            return Err(CoreError::Configuration(
                "background grid bounding box must have positive extent on every axis"
                    .to_string(),
            ));
        }

        let axis_coords = std::array::from_fn(|a| {
            let n = counts[a];
            let h = (upper[a] - lower[a]) / n as f64;
            (0..=n).map(|i| lower[a] + i as f64 * h).collect()
        });

        Ok(BackgroundGrid {
            lower,
            upper,
            counts,
            axis_coords,
        })
    }

    /// The grid's (inflated) lower bound.
    pub fn lower(&self) -> Vector3<f64> {
        self.lower
    }

    /// The grid's (inflated) upper bound.
    pub fn upper(&self) -> Vector3<f64> {
        self.upper
    }

    /// Cells per axis.
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Nodes per axis (`counts[a] + 1`).
    pub fn node_counts(&self) -> [usize; 3] {
        std::array::from_fn(|a| self.counts[a] + 1)
    }

    /// Total number of grid nodes.
    pub fn node_count(&self) -> usize {
        self.node_counts().iter().product()
    }

    /// Total number of grid cells.
    pub fn cell_count(&self) -> usize {
        self.counts.iter().product()
    }

    /// The uniform spacing along each axis.
    pub fn spacing(&self) -> Vector3<f64> {
        Vector3::new(
            self.axis_coords[0][1] - self.axis_coords[0][0],
            self.axis_coords[1][1] - self.axis_coords[1][0],
            self.axis_coords[2][1] - self.axis_coords[2][0],
        )
    }

    /// The volume of a single (uniform) cell.
    pub fn cell_volume(&self) -> f64 {
        let h = self.spacing();
        h.x * h.y * h.z
    }

    /// Maps a lexicographic node index to its `(i, j, k)` subscripts.
    pub fn node_subscripts(&self, node_id: usize) -> [usize; 3] {
        let [nx, ny, _] = self.node_counts();
        let k = node_id / (nx * ny);
        let rem = node_id % (nx * ny);
        let j = rem / nx;
        let i = rem % nx;
        [i, j, k]
    }

    /// Maps node subscripts to the lexicographic node index (`i` fastest).
    pub fn node_index(&self, ijk: [usize; 3]) -> usize {
        let [nx, ny, _] = self.node_counts();
        ijk[0] + ijk[1] * nx + ijk[2] * nx * ny
    }

    /// The position of grid node `node_id`.
    pub fn node_position(&self, node_id: usize) -> Vector3<f64> {
        let [i, j, k] = self.node_subscripts(node_id);
        Vector3::new(self.axis_coords[0][i], self.axis_coords[1][j], self.axis_coords[2][k])
    }

    /// Maps a lexicographic cell index to its `(i, j, k)` subscripts.
    pub fn cell_subscripts(&self, cell_id: usize) -> [usize; 3] {
        let [nx, ny, _] = self.counts;
        let k = cell_id / (nx * ny);
        let rem = cell_id % (nx * ny);
        let j = rem / nx;
        let i = rem % nx;
        [i, j, k]
    }

    /// Maps cell subscripts to the lexicographic cell index.
    pub fn cell_index(&self, ijk: [usize; 3]) -> usize {
        let [nx, ny, _] = self.counts;
        ijk[0] + ijk[1] * nx + ijk[2] * nx * ny
    }

    /// The eight node ids of cell `cell_id`, in the canonical Hex8
    /// ordering used by [`crate::hex8`].
    pub fn cell_node_ids(&self, cell_id: usize) -> [usize; 8] {
        let [i, j, k] = self.cell_subscripts(cell_id);
        let corner = |di: usize, dj: usize, dk: usize| {
            self.node_index([i + di, j + dj, k + dk])
        };
        [
            corner(0, 0, 0),
            corner(1, 0, 0),
            corner(1, 1, 0),
            corner(0, 1, 0),
            corner(0, 0, 1),
            corner(1, 0, 1),
            corner(1, 1, 1),
            corner(0, 1, 1),
        ]
    }

    /// The eight nodal coordinates of cell `cell_id`.
    pub fn cell_node_coordinates(&self, cell_id: usize) -> [Vector3<f64>; 8] {
        let ids = self.cell_node_ids(cell_id);
        ids.map(|id| self.node_position(id))
    }

    /// The axis-aligned bounding box `(lower, upper)` of cell `cell_id`.
    pub fn cell_bounds(&self, cell_id: usize) -> (Vector3<f64>, Vector3<f64>) {
        let coords = self.cell_node_coordinates(cell_id);
        (coords[0], coords[6])
    }

    /// The centroid of cell `cell_id`.
    pub fn cell_centroid(&self, cell_id: usize) -> Vector3<f64> {
        let (lower, upper) = self.cell_bounds(cell_id);
        (lower + upper) * 0.5
    }

    /// Evaluates `hex8::local_coordinates` for cell `cell_id` at the
    /// global point `x` (used by integration to map quadrature points).
    pub fn cell_local_coordinates(&self, cell_id: usize, x: Vector3<f64>) -> CoreResult<Vector3<f64>> {
        let coords = self.cell_node_coordinates(cell_id);
        hex8::local_coordinates(&coords, x)
    }

    /// The 12 edges of a hex cell as pairs of local node slots (0..8),
    /// grouped by axis direction: x-edges, y-edges, z-edges, matching
    /// spec.md §4.6.2 step 5 "boundary edges along each axis".
    pub const EDGES_X: [(usize, usize); 4] = [(0, 1), (3, 2), (4, 5), (7, 6)];
    /// y-direction edges.
    pub const EDGES_Y: [(usize, usize); 4] = [(0, 3), (1, 2), (4, 7), (5, 6)];
    /// z-direction edges.
    pub const EDGES_Z: [(usize, usize); 4] = [(0, 4), (1, 5), (2, 6), (3, 7)];
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn grid_counts_and_sizes() {
        let grid =
            BackgroundGrid::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 4.0, 6.0), [2, 4, 6])
                .unwrap();
        assert_eq!(grid.node_count(), 3 * 5 * 7);
        assert_eq!(grid.cell_count(), 2 * 4 * 6);
        assert_relative_eq!(grid.cell_volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cell_node_ids_follow_canonical_ordering() {
        let grid =
            BackgroundGrid::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0), [1, 1, 1])
                .unwrap();
        let coords = grid.cell_node_coordinates(0);
        assert_eq!(coords[0], Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(coords[6], Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(coords[1], Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(coords[3], Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn rejects_zero_cell_count() {
        assert!(BackgroundGrid::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0), [0, 1, 1])
            .is_err());
    }

    #[test]
    fn node_and_cell_index_round_trip() {
        let grid =
            BackgroundGrid::new(Vector3::zeros(), Vector3::new(3.0, 3.0, 3.0), [3, 3, 3]).unwrap();
        for cell_id in 0..grid.cell_count() {
            let ijk = grid.cell_subscripts(cell_id);
            assert_eq!(grid.cell_index(ijk), cell_id);
        }
    }
}
