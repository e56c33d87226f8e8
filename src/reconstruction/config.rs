//! Recognized configuration options for the volume-reconstruction engine
//! (spec.md §4.6.1, §6).
//!
//! Grounded on `original_source/volumeReconstruction.h`'s `dualContouring`
//! member defaults (`_exteriorRelativeDelta = 1e-3`, `_absoluteTolerance =
//! 1e-9`, `_minApproximationCount = 5`, `_isosurfaceCutoff = 0.5`,
//! `_elementType = "Hex8"`) and the YAML-driven construction style used by
//! `volumeReconstructionBase( const YAML::Node &config )`. The `config`
//! feature mirrors the pack's `serde`/`serde_yaml` configuration plumbing
//! (EXPANSION-4) without parsing the out-of-scope input-file blocks.

use crate::error::{CoreError, CoreResult};
use nalgebra::Vector3;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

/// The element type used for the background grid. Only [`Hex8`] is
/// implemented, matching spec.md §4.6.1's "only Hex8 is tested".
///
/// [`Hex8`]: ElementType::Hex8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub enum ElementType {
    /// Trilinear eight-node hexahedron (the only supported type).
    Hex8,
}

impl Default for ElementType {
    fn default() -> Self {
        ElementType::Hex8
    }
}

/// The reconstruction algorithm selected by the `type` configuration key.
/// Only `dual_contouring` is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub enum ReconstructionType {
    /// Dual-contouring surface extraction (spec.md §4.6).
    DualContouring,
}

impl Default for ReconstructionType {
    fn default() -> Self {
        ReconstructionType::DualContouring
    }
}

/// A half-space clip: points with `normal . (x - point) > 0` are outside
/// and are projected back onto the plane (spec.md §4.6.2 step 7).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub struct BoundingPlane {
    /// A point lying on the plane.
    pub point: [f64; 3],
    /// The outward-pointing unit normal.
    pub normal: [f64; 3],
}

impl BoundingPlane {
    /// Builds a bounding plane from a point and an (not necessarily
    /// normalized) outward normal.
    pub fn new(point: Vector3<f64>, normal: Vector3<f64>) -> Self {
        BoundingPlane {
            point: point.into(),
            normal: normal.normalize().into(),
        }
    }

    /// The plane's point as a [`Vector3`].
    pub fn point_vec(&self) -> Vector3<f64> {
        Vector3::from(self.point)
    }

    /// The plane's outward unit normal as a [`Vector3`].
    pub fn normal_vec(&self) -> Vector3<f64> {
        Vector3::from(self.normal)
    }
}

/// Configuration recognized by the reconstruction engine, matching the
/// table in spec.md §4.6.1.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
pub struct ReconstructionConfig {
    /// `type`: selects the reconstruction algorithm.
    pub reconstruction_type: ReconstructionType,
    /// `element_type`: background-grid cell type.
    pub element_type: ElementType,
    /// `isosurface_cutoff`: threshold `tau` for the implicit function.
    pub isosurface_cutoff: f64,
    /// `domain_discretization`: cells per axis `[nx, ny, nz]`.
    pub domain_discretization: [usize; 3],
    /// `exterior_relative_delta`: outward inflation of the cloud bounding
    /// box, as a fraction of its extent.
    pub exterior_relative_delta: f64,
    /// `absolute_tolerance`: numeric epsilon used throughout the engine.
    pub absolute_tolerance: f64,
    /// `min_approximation_count`: minimum neighbour count `k` used when
    /// estimating normals / neighbourhood statistics.
    pub min_approximation_count: usize,
    /// `use_material_points_for_normals`: PCA-on-point-cloud normals
    /// instead of finite-difference gradients of `f`.
    pub use_material_points_for_normals: bool,
    /// `bounding_planes`: optional half-space clips.
    pub bounding_planes: Vec<BoundingPlane>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        ReconstructionConfig {
            reconstruction_type: ReconstructionType::default(),
            element_type: ElementType::default(),
            isosurface_cutoff: 0.5,
            domain_discretization: [10, 10, 10],
            exterior_relative_delta: 1e-3,
            absolute_tolerance: 1e-9,
            min_approximation_count: 5,
            use_material_points_for_normals: false,
            bounding_planes: Vec::new(),
        }
    }
}

impl ReconstructionConfig {
    /// Validates the configuration, matching spec.md §9 Open Question
    /// (iii): a zero entry in `domain_discretization` is rejected here
    /// rather than deferred to the grid builder.
    pub fn validate(&self) -> CoreResult<()> {
        if self.reconstruction_type != ReconstructionType::DualContouring {
            return Err(CoreError::Configuration(
                "unknown reconstruction type: only dual_contouring is implemented".to_string(),
            ));
        }
        if self.element_type != ElementType::Hex8 {
            return Err(CoreError::Unsupported(
                "only the Hex8 element type is implemented".to_string(),
            ));
        }
        if self.domain_discretization.iter().any(|&n| n == 0) {
            return Err(CoreError::Configuration(
                "domain_discretization entries must all be nonzero".to_string(),
            ));
        }
        if self.min_approximation_count == 0 {
            return Err(CoreError::Configuration(
                "min_approximation_count must be at least 1".to_string(),
            ));
        }
        if !(self.exterior_relative_delta >= 0.0) {
            return Err(CoreError::Configuration(
                "exterior_relative_delta must be nonnegative".to_string(),
            ));
        }
        Ok(())
    }

    /// Exports the active configuration to a YAML value, mirroring
    /// spec.md §6 "Persisted state: ... can `exportConfiguration()` to a
    /// YAML node". Only available behind the `config` feature.
    #[cfg(feature = "config")]
    pub fn export(&self) -> Result<serde_yaml::Value, serde_yaml::Error> {
        serde_yaml::to_value(self)
    }
}
