//! L6 — the volume-reconstruction engine (spec.md §4.6): dual-contouring
//! surface extraction from an unstructured point cloud, plus volume,
//! surface, and surface-flux integration over the reconstructed domain.
//!
//! Grounded on `original_source/volumeReconstruction.h`'s
//! `dualContouring` class (the `evaluate()` pipeline: grid spacing ->
//! implicit function -> internal/boundary classification -> boundary
//! point solve -> optional XDMF export) and `splashsurf_lib`'s overall
//! reconstruction shape (bounds -> grid -> density/implicit field ->
//! boundary extraction -> mesh), adapted from marching cubes to
//! per-cell single-vertex dual contouring.

pub mod config;
pub mod grid;
pub mod implicit;
pub mod integrate;
pub mod qef;
pub mod subdomains;

use log::{debug, info};
use nalgebra::Vector3;

use crate::error::{CoreError, CoreResult};
use crate::kdtree::KdTree;
use crate::linalg::SvdMethod;
use crate::mesh::{BoundaryMesh, MacroMesh};

pub use config::{BoundingPlane, ElementType, ReconstructionConfig, ReconstructionType};
pub use integrate::FluxField;
pub use qef::CellClass;

/// The volume-reconstruction engine of spec.md §4.6. Borrows the point
/// cloud `P` (spec.md §3's "the core borrows pointers to P ... that
/// outlive any call") and exclusively owns the grid `G`, the implicit
/// function `f`, the boundary set `B`, and the derived boundary vertices
/// -- all created by [`Self::evaluate`] and released with this engine.
pub struct ReconstructionEngine<'p> {
    config: ReconstructionConfig,
    points: &'p [Vector3<f64>],
    tree: KdTree<'p>,
    function_values: Option<Vec<f64>>,

    grid: Option<grid::BackgroundGrid>,
    f: Option<Vec<f64>>,
    median_neighbor_distance: f64,
    boundary_cell_ids: Vec<usize>,
    boundary_vertices: Vec<Vector3<f64>>,
    boundary_normals: Vec<Vector3<f64>>,
}

impl<'p> ReconstructionEngine<'p> {
    /// Builds a reconstruction engine over a borrowed point cloud and
    /// validates `config` (spec.md §4.6.1). The k-d tree is built once,
    /// here, per spec.md §3 "The tree is built once per point cloud."
    pub fn new(config: ReconstructionConfig, points: &'p [Vector3<f64>]) -> CoreResult<Self> {
        config.validate()?;
        if points.is_empty() {
            return Err(CoreError::shape_mismatch(
                "reconstruction::ReconstructionEngine::new",
                "the point cloud must not be empty",
            ));
        }

        let tree = KdTree::build(points);
        Ok(ReconstructionEngine {
            config,
            points,
            tree,
            function_values: None,
            grid: None,
            f: None,
            median_neighbor_distance: 0.0,
            boundary_cell_ids: Vec::new(),
            boundary_vertices: Vec::new(),
            boundary_normals: Vec::new(),
        })
    }

    /// Loads a per-point scalar function array (spec.md §4.6.2 step 1).
    /// Absent, every point is treated as carrying the value 1.
    pub fn load_function(&mut self, function_values: Vec<f64>) -> CoreResult<()> {
        if function_values.len() != self.points.len() {
            return Err(CoreError::shape_mismatch(
                "reconstruction::ReconstructionEngine::load_function",
                format!(
                    "{} function values for {} points",
                    function_values.len(),
                    self.points.len()
                ),
            ));
        }
        self.function_values = Some(function_values);
        Ok(())
    }

    /// Runs the full dual-contouring pipeline of spec.md §4.6.2: bounds
    /// and spacing, nearest-neighbour statistics, the implicit function,
    /// cell classification, the boundary-vertex QEF solve, and optional
    /// clipping by bounding planes / a local macro element's hull.
    pub fn evaluate(&mut self) -> CoreResult<()> {
        let (min, max) = bounding_box(self.points);
        let extent = max - min;
        let margin = extent * self.config.exterior_relative_delta;
        let lower = min - margin;
        let upper = max + margin;

        debug!(
            "reconstruction bounds computed: lower={:?} upper={:?}",
            lower, upper
        );

        let grid = grid::BackgroundGrid::new(lower, upper, self.config.domain_discretization)?;
        info!(
            "reconstruction grid: {}x{}x{} cells, {} particles",
            self.config.domain_discretization[0],
            self.config.domain_discretization[1],
            self.config.domain_discretization[2],
            self.points.len()
        );

        let stats = implicit::compute_neighborhood_statistics(
            self.points,
            &self.tree,
            self.config.min_approximation_count,
            grid.cell_volume().cbrt(),
        );
        self.median_neighbor_distance = stats.median_neighbor_distance;
        debug!(
            "median neighbour distance: {}",
            self.median_neighbor_distance
        );

        let f = implicit::evaluate_implicit_function(
            &grid,
            self.points,
            &self.tree,
            self.function_values.as_deref(),
            self.median_neighbor_distance,
            self.config.absolute_tolerance,
        );

        let (cell_ids, vertices, normals) = qef::compute_boundary_vertices(
            &grid,
            &f,
            self.config.isosurface_cutoff,
            self.points,
            &self.tree,
            self.config.use_material_points_for_normals,
            self.config.min_approximation_count,
            self.config.absolute_tolerance,
            self.config.absolute_tolerance,
        )?;
        debug!("{} boundary cells found", cell_ids.len());

        self.grid = Some(grid);
        self.f = Some(f);
        self.boundary_cell_ids = cell_ids;
        self.boundary_vertices = vertices;
        self.boundary_normals = normals;

        self.clip_by_bounding_planes();
        Ok(())
    }

    /// Clips boundary vertices outside any configured bounding plane's
    /// half-space by projecting them back onto the plane (spec.md
    /// §4.6.2 step 7: "project ... boundary vertices on the outside of
    /// any plane so the reconstruction ends exactly on that plane").
    fn clip_by_bounding_planes(&mut self) {
        for plane in &self.config.bounding_planes {
            let p = plane.point_vec();
            let n = plane.normal_vec();
            for v in self.boundary_vertices.iter_mut() {
                let signed_distance = n.dot(&(*v - p));
                if signed_distance > 0.0 {
                    *v -= signed_distance * n;
                }
            }
        }
    }

    /// Clips boundary vertices outside a macro element's hull by
    /// projecting them onto the element's boundary: local coordinates
    /// outside `[-1, 1]^3` are clamped and mapped back to the global
    /// frame (spec.md §4.6.2 step 7: "clip to it using the element's
    /// `containsPoint`"). DESIGN.md records this clamp-in-local-space
    /// projection as the chosen approximation of an exact hull clip.
    pub fn clip_by_local_element(&mut self, element_node_coordinates: &[Vector3<f64>; 8]) -> CoreResult<()> {
        for v in self.boundary_vertices.iter_mut() {
            if crate::hex8::bounding_box_contains_point(element_node_coordinates, *v)
                && crate::hex8::contains_point(element_node_coordinates, *v)
            {
                continue;
            }
            let xi = crate::hex8::local_coordinates(element_node_coordinates, *v)
                .map_err(|e| e.chain("failed to clip a boundary vertex against a local element"))?;
            let clamped = Vector3::new(
                xi.x.clamp(-1.0, 1.0),
                xi.y.clamp(-1.0, 1.0),
                xi.z.clamp(-1.0, 1.0),
            );
            *v = crate::hex8::interpolate_vector(element_node_coordinates, clamped);
        }
        Ok(())
    }

    /// Clips against the hull of a macro-mesh cell, looking up its
    /// nodal coordinates by cell id.
    pub fn clip_by_macro_cell(&mut self, mesh: &MacroMesh, cell_id: usize) -> CoreResult<()> {
        let coords = mesh.cell_coordinates(cell_id).ok_or_else(|| {
            CoreError::index_out_of_range(
                "reconstruction::ReconstructionEngine::clip_by_macro_cell",
                format!("macro cell {cell_id} does not exist"),
            )
        })?;
        self.clip_by_local_element(&coords)
    }

    /// The boundary cell ids, in ascending order (spec.md §4.6.2 step 8).
    pub fn boundary_cell_ids(&self) -> &[usize] {
        &self.boundary_cell_ids
    }

    /// The boundary vertex coordinates, same order as
    /// [`Self::boundary_cell_ids`].
    pub fn boundary_vertices(&self) -> &[Vector3<f64>] {
        &self.boundary_vertices
    }

    /// A per-boundary-vertex outward unit normal, used by the flux
    /// integrals.
    pub fn boundary_normals(&self) -> &[Vector3<f64>] {
        &self.boundary_normals
    }

    /// Exposes the dual-contoured surface as a [`BoundaryMesh`] value.
    pub fn boundary_mesh(&self) -> BoundaryMesh {
        BoundaryMesh {
            cell_ids: self.boundary_cell_ids.clone(),
            vertices: self.boundary_vertices.clone(),
        }
    }

    fn grid(&self) -> CoreResult<&grid::BackgroundGrid> {
        self.grid.as_ref().ok_or_else(|| {
            CoreError::Configuration(
                "reconstruction engine has no grid yet; call evaluate() first".to_string(),
            )
        })
    }

    fn quadrature_radius(&self) -> f64 {
        (3.0 * self.median_neighbor_distance).max(self.config.absolute_tolerance)
    }

    /// `integral_Omega g dV` (spec.md §4.6.3). `g` defaults to 1 when
    /// `function_values` is `None`.
    pub fn volume_integral(&self, function_values: Option<&[f64]>) -> CoreResult<f64> {
        let grid = self.grid()?;
        let f = self.f.as_ref().expect("grid implies f is set");
        Ok(integrate::volume_integral(
            grid,
            f,
            self.config.isosurface_cutoff,
            self.points,
            &self.tree,
            function_values,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// `integral_Omega (x - origin) g dV` (spec.md §4.6.3).
    pub fn relative_position_volume_integral(
        &self,
        origin: Vector3<f64>,
        function_values: Option<&[f64]>,
    ) -> CoreResult<Vector3<f64>> {
        let grid = self.grid()?;
        let f = self.f.as_ref().expect("grid implies f is set");
        Ok(integrate::relative_position_volume_integral(
            grid,
            f,
            self.config.isosurface_cutoff,
            origin,
            self.points,
            &self.tree,
            function_values,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// `integral_dOmega g dS` (spec.md §4.6.3).
    pub fn surface_integral(&self, function_values: Option<&[f64]>) -> CoreResult<f64> {
        let grid = self.grid()?;
        Ok(integrate::surface_integral(
            grid,
            &self.boundary_vertices,
            self.points,
            &self.tree,
            function_values,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// `integral_dOmega (x - origin) g dS` (spec.md §4.6.3).
    pub fn relative_position_surface_integral(
        &self,
        origin: Vector3<f64>,
        function_values: Option<&[f64]>,
    ) -> CoreResult<Vector3<f64>> {
        let grid = self.grid()?;
        Ok(integrate::relative_position_surface_integral(
            grid,
            &self.boundary_vertices,
            origin,
            self.points,
            &self.tree,
            function_values,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// `integral_dOmega g . n dS` (spec.md §4.6.3).
    pub fn surface_flux_integral(&self, field: &FluxField<'_>) -> CoreResult<f64> {
        let grid = self.grid()?;
        Ok(integrate::surface_flux_integral(
            grid,
            &self.boundary_vertices,
            &self.boundary_normals,
            self.points,
            &self.tree,
            field,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// `integral_dOmega (x - origin) (g . n) dS` (spec.md §4.6.3).
    pub fn relative_position_surface_flux_integral(
        &self,
        origin: Vector3<f64>,
        field: &FluxField<'_>,
    ) -> CoreResult<Vector3<f64>> {
        let grid = self.grid()?;
        Ok(integrate::relative_position_surface_flux_integral(
            grid,
            &self.boundary_vertices,
            &self.boundary_normals,
            origin,
            self.points,
            &self.tree,
            field,
            self.quadrature_radius(),
            self.config.absolute_tolerance,
        ))
    }

    /// Partitions the boundary vertices by minimum pairwise separation
    /// (spec.md §4.6.4).
    pub fn surface_subdomains(&self, min_distance: f64) -> (Vec<usize>, Vec<usize>) {
        let tree = KdTree::build(&self.boundary_vertices);
        subdomains::get_surface_subdomains(&self.boundary_vertices, &tree, min_distance)
    }

    /// Exports the active configuration to a YAML value (spec.md §6
    /// "Persisted state: ... can `exportConfiguration()`").
    #[cfg(feature = "config")]
    pub fn export_configuration(&self) -> Result<serde_yaml::Value, serde_yaml::Error> {
        self.config.export()
    }

    /// The configured SVD backend used by the QEF and projection
    /// pseudoinverse fallbacks, exposed for callers that want to report
    /// it (e.g. in a diagnostic XDMF attribute).
    pub fn svd_method(&self) -> SvdMethod {
        SvdMethod::default()
    }
}

fn bounding_box(points: &[Vector3<f64>]) -> (Vector3<f64>, Vector3<f64>) {
    let mut lower = points[0];
    let mut upper = points[0];
    for p in &points[1..] {
        lower = lower.inf(p);
        upper = upper.sup(p);
    }
    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice_points(n: usize, spacing: f64) -> Vec<Vector3<f64>> {
        let mut pts = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    pts.push(Vector3::new(
                        i as f64 * spacing,
                        j as f64 * spacing,
                        k as f64 * spacing,
                    ));
                }
            }
        }
        pts
    }

    #[test]
    fn evaluate_produces_boundary_vertices_for_a_dense_cube_lattice() {
        let points = lattice_points(6, 0.2);
        let config = ReconstructionConfig {
            domain_discretization: [6, 6, 6],
            ..Default::default()
        };
        let mut engine = ReconstructionEngine::new(config, &points).unwrap();
        engine.evaluate().unwrap();

        assert!(!engine.boundary_cell_ids().is_empty());
        assert_eq!(engine.boundary_vertices().len(), engine.boundary_cell_ids().len());
        assert_eq!(engine.boundary_normals().len(), engine.boundary_cell_ids().len());
    }

    #[test]
    fn volume_integral_of_dense_cube_lattice_is_within_an_order_of_magnitude_of_its_volume() {
        let points = lattice_points(6, 0.2);
        let config = ReconstructionConfig {
            domain_discretization: [6, 6, 6],
            ..Default::default()
        };
        let mut engine = ReconstructionEngine::new(config, &points).unwrap();
        engine.evaluate().unwrap();

        let volume = engine.volume_integral(None).unwrap();
        // The lattice spans roughly [0, 1]^3; a cell-resolution estimate
        // of its volume should land in the right ballpark.
        assert!(volume > 0.1 && volume < 3.0, "volume was {volume}");
    }

    #[test]
    fn bounding_plane_clip_keeps_every_vertex_on_the_inward_side() {
        let points = lattice_points(6, 0.2);
        let plane = BoundingPlane::new(Vector3::new(0.5, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0));
        let config = ReconstructionConfig {
            domain_discretization: [6, 6, 6],
            bounding_planes: vec![plane],
            ..Default::default()
        };
        let mut engine = ReconstructionEngine::new(config, &points).unwrap();
        engine.evaluate().unwrap();

        for v in engine.boundary_vertices() {
            assert!(v.x <= 0.5 + 1e-9, "vertex {v:?} is outside the clipping plane");
        }
    }

    #[test]
    fn rejects_empty_point_cloud() {
        let points: Vec<Vector3<f64>> = Vec::new();
        assert!(ReconstructionEngine::new(ReconstructionConfig::default(), &points).is_err());
    }

    #[test]
    fn load_function_rejects_mismatched_length() {
        let points = lattice_points(3, 0.3);
        let mut engine =
            ReconstructionEngine::new(ReconstructionConfig::default(), &points).unwrap();
        assert!(engine.load_function(vec![1.0, 2.0]).is_err());
    }
}
