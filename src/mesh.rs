//! Shared mesh/point-cloud value types used by both the projection
//! kernel (L5) and the reconstruction engine (L6).
//!
//! Grounded on `splashsurf_lib::mesh`'s role as a small shared value-type
//! module reused across reconstruction stages; adapted here from
//! triangle surface meshes to hex8 macro meshes and dual-contoured
//! boundary meshes.

use nalgebra::Vector3;

/// An ordered point cloud of micro nodes, indexed 0..N-1. The index is
/// the global micro identifier used throughout this crate (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    points: Vec<Vector3<f64>>,
}

impl PointCloud {
    /// Builds a point cloud from an owned vector of points.
    pub fn new(points: Vec<Vector3<f64>>) -> Self {
        Self { points }
    }

    /// The number of points in the cloud.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the cloud has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Borrows the underlying point slice.
    pub fn as_slice(&self) -> &[Vector3<f64>] {
        &self.points
    }

    /// The axis-aligned bounding box `(lower, upper)` of the cloud.
    pub fn bounding_box(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let mut iter = self.points.iter();
        let first = *iter.next()?;
        let (lower, upper) = iter.fold((first, first), |(lo, hi), &p| (lo.inf(&p), hi.sup(&p)));
        Some((lower, upper))
    }
}

/// A hex8 cell: eight node identifiers in the canonical ordering used by
/// [`crate::hex8`].
pub type Hex8Cell = [usize; 8];

/// The coarse macro mesh: node positions plus hex8 connectivity.
#[derive(Debug, Clone, Default)]
pub struct MacroMesh {
    node_positions: Vec<Vector3<f64>>,
    cells: Vec<Hex8Cell>,
}

impl MacroMesh {
    /// Builds a macro mesh from node positions and hex8 connectivity.
    pub fn new(node_positions: Vec<Vector3<f64>>, cells: Vec<Hex8Cell>) -> Self {
        Self {
            node_positions,
            cells,
        }
    }

    /// The number of macro nodes.
    pub fn node_count(&self) -> usize {
        self.node_positions.len()
    }

    /// The position of macro node `id`.
    pub fn node_position(&self, id: usize) -> Option<Vector3<f64>> {
        self.node_positions.get(id).copied()
    }

    /// The hex8 cells of the mesh.
    pub fn cells(&self) -> &[Hex8Cell] {
        &self.cells
    }

    /// The nodal coordinates of cell `cell_id`, in the canonical Hex8
    /// node ordering, if all node ids are in range.
    pub fn cell_coordinates(&self, cell_id: usize) -> Option<[Vector3<f64>; 8]> {
        let cell = self.cells.get(cell_id)?;
        let mut coords = [Vector3::zeros(); 8];
        for (slot, &node_id) in cell.iter().enumerate() {
            coords[slot] = *self.node_positions.get(node_id)?;
        }
        Some(coords)
    }
}

/// A dual-contoured boundary mesh: one vertex per boundary cell, plus the
/// originating cell ids (spec.md §4.6.2).
#[derive(Debug, Clone, Default)]
pub struct BoundaryMesh {
    /// Boundary cell ids from the background grid, same order as `vertices`.
    pub cell_ids: Vec<usize>,
    /// One 3-D vertex per boundary cell.
    pub vertices: Vec<Vector3<f64>>,
}

impl BoundaryMesh {
    /// The number of boundary vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// True if the mesh has no boundary vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}
