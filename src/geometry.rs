//! L3 — geometry decomposition: splitting a convex polyhedron face into
//! a triangle fan, forming tetrahedra against an apex, tet volume, and
//! the unit-tet-to-arbitrary-tet affine map used to transport quadrature.
//!
//! Grounded on `original_source/geometry_decomposition.{h,cpp}`
//! (`gDecomp::getTets`, `getTetVolume`, `getUnitToTetMap`).

use crate::error::{CoreError, CoreResult};
use nalgebra::{Matrix3, Vector3};

/// A tetrahedron as four ordered vertices.
pub type Tet = [Vector3<f64>; 4];

/// Builds `nodes.len()` tetrahedra fanning an apex `p` around the
/// centroid of an ordered planar polygon `nodes` (size >= 3). Tet `i`
/// is `{p, centroid, nodes[i], nodes[(i + 1) % n]}`.
pub fn get_tets(p: Vector3<f64>, nodes: &[Vector3<f64>]) -> CoreResult<Vec<Tet>> {
    if nodes.len() < 3 {
        return Err(CoreError::shape_mismatch(
            "geometry::get_tets",
            format!("a face needs at least 3 nodes, got {}", nodes.len()),
        ));
    }

    let centroid: Vector3<f64> =
        nodes.iter().fold(Vector3::zeros(), |acc, n| acc + n) / (nodes.len() as f64);

    let n = nodes.len();
    Ok((0..n)
        .map(|i| [p, centroid, nodes[i], nodes[(i + 1) % n]])
        .collect())
}

/// Computes the volume of a tetrahedron as `(1/6) |s1 . (s2 x s3)|` with
/// `s_k = tet[k] - tet[0]`.
pub fn get_tet_volume(tet: &Tet) -> f64 {
    let s1 = tet[1] - tet[0];
    let s2 = tet[2] - tet[0];
    let s3 = tet[3] - tet[0];
    (s1.dot(&s2.cross(&s3))).abs() / 6.0
}

/// Returns the affine map `(A, d)` from the canonical unit tetrahedron
/// `{0, e1, e2, e3}` onto an arbitrary tetrahedron `nodes`: columns of
/// `A` are `nodes[i] - nodes[0]` for `i = 1, 2, 3`, and `d = nodes[0]`.
pub fn get_unit_to_tet_map(nodes: &Tet) -> (Matrix3<f64>, Vector3<f64>) {
    let d = nodes[0];
    let mut a = Matrix3::zeros();
    for i in 1..4 {
        let col = nodes[i] - d;
        a.set_column(i - 1, &col);
    }
    (a, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_tet_volume_is_one_sixth() {
        let tet = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        assert_relative_eq!(get_tet_volume(&tet), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn get_tets_produces_one_tet_per_edge() {
        let p = Vector3::new(0.0, 0.0, 1.0);
        let square = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let tets = get_tets(p, &square).unwrap();
        assert_eq!(tets.len(), 4);
        for tet in &tets {
            assert!(get_tet_volume(tet) > 0.0);
        }
    }

    #[test]
    fn get_tets_rejects_degenerate_face() {
        let p = Vector3::new(0.0, 0.0, 1.0);
        let too_few = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];
        assert!(get_tets(p, &too_few).is_err());
    }

    #[test]
    fn unit_to_tet_map_recovers_vertices() {
        let tet = [
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(3.0, 1.0, 1.0),
            Vector3::new(1.0, 4.0, 1.0),
            Vector3::new(1.0, 1.0, 5.0),
        ];
        let (a, d) = get_unit_to_tet_map(&tet);
        let unit_vertices = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        for (i, uv) in unit_vertices.iter().enumerate() {
            let mapped = a * uv + d;
            assert_relative_eq!(mapped, tet[i], epsilon = 1e-12);
        }
    }
}
