//!
//! Core numerical engine for two-scale micromorphic continuum coupling:
//! a DOF-projection kernel between a coarse macro mesh and a fine micro
//! point cloud (L5), and a dual-contouring volume-reconstruction engine
//! that recovers a macro domain's boundary from an unstructured point
//! cloud (L6), built on shared dense/sparse linear algebra (L1), a Hex8
//! reference element (L2), tetrahedral geometry decomposition (L3), and
//! a k-d tree (L4). Entry points are [`projection`] and
//! [`reconstruction::ReconstructionEngine`].
//!

/// Re-export the version of nalgebra used by this crate.
pub use nalgebra;

/// Structured error type shared by every public operation.
pub mod error;
/// L3 -- tetrahedral decomposition of a point-plus-face-ring domain.
pub mod geometry;
/// L2 -- the Hex8 reference element: shape functions and local/global maps.
pub mod hex8;
/// L4 -- a binary k-d tree over a 3-D point array.
pub mod kdtree;
/// L1 -- dense linear solves, inversion, pseudoinverse, sparse assembly.
pub mod linalg;
/// Shared mesh/point-cloud value types used by both L5 and L6.
pub mod mesh;
/// L5 -- the DOF-projection kernel between macro and micro degrees of freedom.
pub mod projection;
/// L6 -- the dual-contouring volume-reconstruction engine.
pub mod reconstruction;

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn crate_root_wires_projection_and_reconstruction_together() {
        // A minimal end-to-end smoke test: a unit-cube point cloud feeds
        // both the DOF-projection accumulation helpers and the
        // reconstruction engine without any type mismatch at the seams.
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        ];

        let masses = vec![1.0; points.len()];
        let domain_micro_node_indices: Vec<usize> = (0..points.len()).collect();
        let flat_positions: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        let weights = vec![1.0; points.len()];
        let (total_mass, cm) = projection::compute_domain_center_of_mass(
            3,
            &domain_micro_node_indices,
            &masses,
            &flat_positions,
            &weights,
        )
        .unwrap();
        assert!((total_mass - points.len() as f64).abs() < 1e-9);
        assert!((Vector3::new(cm[0], cm[1], cm[2]) - Vector3::new(0.5, 0.5, 0.5)).norm() < 1e-9);

        let config = reconstruction::ReconstructionConfig {
            domain_discretization: [2, 2, 2],
            ..Default::default()
        };
        let engine = reconstruction::ReconstructionEngine::new(config, &points);
        assert!(engine.is_ok());
    }
}
