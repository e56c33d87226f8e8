//! L2 — the Hex8 reference element: trilinear shape functions and
//! geometry on the canonical `[-1, 1]^3` hexahedron.
//!
//! Grounded on `original_source/element.{h,cpp}` (`elib::Element`,
//! `elib::Hex8`): node ordering, shape function formula, and the damped
//! Newton + bisection line search used by `local_coordinates` are ported
//! numerically unchanged.

use crate::error::{CoreError, CoreResult};
use nalgebra::{Matrix3, Vector3};

/// Node ordering of the canonical Hex8 element, in `[-1, 1]^3`:
/// `(---, +--, ++-, -+-, --+, +-+, +++, -++)`.
pub const LOCAL_NODE_COORDINATES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

/// Relative tolerance for [`local_coordinates`]'s Newton residual.
pub const DEFAULT_TOL_R: f64 = 1e-9;
/// Absolute tolerance for [`local_coordinates`]'s Newton residual.
pub const DEFAULT_TOL_A: f64 = 1e-9;
/// Maximum Newton iterations for [`local_coordinates`].
pub const DEFAULT_MAX_ITER: usize = 20;
/// Maximum halving steps in the [`local_coordinates`] line search.
pub const DEFAULT_MAX_LINE_SEARCH: usize = 5;

/// Evaluates the eight Hex8 shape functions at the local point `xi`.
pub fn shape(xi: Vector3<f64>) -> [f64; 8] {
    let mut n = [0.0; 8];
    for (i, node) in LOCAL_NODE_COORDINATES.iter().enumerate() {
        n[i] = 0.125 * (1.0 + node[0] * xi[0]) * (1.0 + node[1] * xi[1]) * (1.0 + node[2] * xi[2]);
    }
    n
}

/// Evaluates the local gradient `dN_i/dxi` of the eight shape functions
/// at the local point `xi`. Row `i` is `d N_i / d(xi, eta, zeta)`.
pub fn grad(xi: Vector3<f64>) -> [[f64; 3]; 8] {
    let mut d = [[0.0; 3]; 8];
    for (i, node) in LOCAL_NODE_COORDINATES.iter().enumerate() {
        d[i] = [
            0.125 * node[0] * (1.0 + node[1] * xi[1]) * (1.0 + node[2] * xi[2]),
            0.125 * (1.0 + node[0] * xi[0]) * node[1] * (1.0 + node[2] * xi[2]),
            0.125 * (1.0 + node[0] * xi[0]) * (1.0 + node[1] * xi[1]) * node[2],
        ];
    }
    d
}

/// Interpolates eight scalar nodal values to the local point `xi`.
pub fn interpolate_scalar(values: &[f64; 8], xi: Vector3<f64>) -> f64 {
    let n = shape(xi);
    (0..8).map(|i| n[i] * values[i]).sum()
}

/// Interpolates eight vector-valued (3-component) nodal values to the
/// local point `xi`.
pub fn interpolate_vector(values: &[Vector3<f64>; 8], xi: Vector3<f64>) -> Vector3<f64> {
    let n = shape(xi);
    let mut value = Vector3::zeros();
    for i in 0..8 {
        value += n[i] * values[i];
    }
    value
}

/// Computes `d(value)/d(xi)` for eight scalar nodal values: the local
/// gradient (a 3-vector, since `value` is scalar).
pub fn local_gradient_scalar(values: &[f64; 8], xi: Vector3<f64>) -> Vector3<f64> {
    let d = grad(xi);
    let mut g = Vector3::zeros();
    for i in 0..8 {
        g += values[i] * Vector3::new(d[i][0], d[i][1], d[i][2]);
    }
    g
}

/// Computes `d(value)/d(xi)` for eight vector-valued nodal values: rows
/// are components of `value`, columns are local directions.
pub fn local_gradient_vector(values: &[Vector3<f64>; 8], xi: Vector3<f64>) -> Matrix3<f64> {
    let d = grad(xi);
    let mut g = Matrix3::zeros();
    for i in 0..8 {
        for row in 0..3 {
            for col in 0..3 {
                g[(row, col)] += values[i][row] * d[i][col];
            }
        }
    }
    g
}

/// Computes the Jacobian `J = dx/dxi` from the element's global nodal
/// coordinates.
pub fn jacobian(coords: &[Vector3<f64>; 8], xi: Vector3<f64>) -> Matrix3<f64> {
    local_gradient_vector(coords, xi)
}

/// Computes `d(value)/dx = d(value)/dxi * J^-1` for scalar nodal values,
/// given the element's global nodal coordinates.
pub fn global_gradient_scalar(
    values: &[f64; 8],
    xi: Vector3<f64>,
    coords: &[Vector3<f64>; 8],
) -> CoreResult<Vector3<f64>> {
    let local_grad = local_gradient_scalar(values, xi);
    let j = jacobian(coords, xi);
    let j_inv = j
        .try_inverse()
        .ok_or_else(|| CoreError::numerical("hex8::global_gradient", "Jacobian is singular"))?;
    Ok(j_inv.transpose() * local_grad)
}

/// Computes `d(value)/dx = d(value)/dxi * J^-1` for vector-valued nodal
/// values, given the element's global nodal coordinates.
pub fn global_gradient_vector(
    values: &[Vector3<f64>; 8],
    xi: Vector3<f64>,
    coords: &[Vector3<f64>; 8],
) -> CoreResult<Matrix3<f64>> {
    let local_grad = local_gradient_vector(values, xi);
    let j = jacobian(coords, xi);
    let j_inv = j
        .try_inverse()
        .ok_or_else(|| CoreError::numerical("hex8::global_gradient", "Jacobian is singular"))?;
    Ok(local_grad * j_inv)
}

/// Solves `x = interpolate(coords, xi)` for `xi` by damped Newton
/// iteration with a bisection line search, following
/// `original_source/element.cpp::compute_local_coordinates`.
pub fn local_coordinates(coords: &[Vector3<f64>; 8], x: Vector3<f64>) -> CoreResult<Vector3<f64>> {
    local_coordinates_with_tol(
        coords,
        x,
        DEFAULT_TOL_R,
        DEFAULT_TOL_A,
        DEFAULT_MAX_ITER,
        DEFAULT_MAX_LINE_SEARCH,
    )
}

/// Same as [`local_coordinates`] with explicit tolerances/iteration caps.
pub fn local_coordinates_with_tol(
    coords: &[Vector3<f64>; 8],
    x: Vector3<f64>,
    tol_r: f64,
    tol_a: f64,
    max_iter: usize,
    max_line_search: usize,
) -> CoreResult<Vector3<f64>> {
    let mut xi = Vector3::zeros();
    let eval = |xi: Vector3<f64>| interpolate_vector(coords, xi);

    let mut current = eval(xi);
    let mut residual = x - current;
    let r0 = residual.norm();
    let mut r_norm = r0;
    let mut r_prev = r0;
    let tol = tol_r * r0 + tol_a;

    let mut iter = 0;
    while iter < max_iter && r_norm > tol {
        let j = jacobian(coords, xi);
        let j_inv = j.try_inverse().ok_or_else(|| {
            CoreError::numerical("hex8::local_coordinates", "Jacobian is singular during Newton iteration")
        })?;
        let mut dxi = j_inv * residual;

        xi += dxi;
        current = eval(xi);
        residual = x - current;
        r_norm = residual.norm();

        let mut ls = 0;
        let mut lambda = 1.0;
        while r_norm >= r_prev && ls <= max_line_search {
            lambda *= 0.5;
            xi -= dxi;
            dxi *= lambda;
            xi += dxi;

            current = eval(xi);
            residual = x - current;
            r_norm = residual.norm();
            ls += 1;
        }
        r_prev = r_norm;
        iter += 1;
    }

    if r_norm > tol {
        return Err(CoreError::numerical(
            "hex8::local_coordinates",
            format!("Newton iteration did not converge: residual {r_norm} > tolerance {tol}"),
        ));
    }

    Ok(xi)
}

/// Returns true iff `local_coordinates(coords, x)` converges and lies
/// within `[-1, 1]^3`.
pub fn contains_point(coords: &[Vector3<f64>; 8], x: Vector3<f64>) -> bool {
    match local_coordinates(coords, x) {
        Ok(xi) => xi.iter().all(|c| c.abs() <= 1.0),
        Err(_) => false,
    }
}

/// Axis-aligned bounding box test against the element's nodal coordinates.
pub fn bounding_box_contains_point(coords: &[Vector3<f64>; 8], x: Vector3<f64>) -> bool {
    let mut lower = coords[0];
    let mut upper = coords[0];
    for c in &coords[1..] {
        lower = lower.inf(c);
        upper = upper.sup(c);
    }
    (0..3).all(|i| x[i] >= lower[i] && x[i] <= upper[i])
}
