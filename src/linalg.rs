//! L1 — dense/sparse linear algebra primitives used by the rest of the
//! crate: LU solve, small dense inverse, Moore-Penrose pseudoinverse, and
//! sparse assembly from (row, col, value) triplets.
//!
//! Grounded on `original_source/element.cpp` (`solve`/`invert` via Eigen)
//! and the pack's `fea-solver/src/math/sparse.rs` COO->CSR triplet
//! assembly pattern.

use crate::error::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Solves `a * x = b` for `x` using partial-pivot LU decomposition.
pub fn solve(a: &DMatrix<f64>, b: &DVector<f64>) -> CoreResult<DVector<f64>> {
    if a.nrows() != a.ncols() {
        return Err(CoreError::shape_mismatch(
            "linalg::solve",
            format!("matrix A must be square, got {}x{}", a.nrows(), a.ncols()),
        ));
    }
    if a.nrows() != b.len() {
        return Err(CoreError::shape_mismatch(
            "linalg::solve",
            format!(
                "right-hand side length {} does not match A's {} rows",
                b.len(),
                a.nrows()
            ),
        ));
    }

    a.clone().lu().solve(b).ok_or_else(|| {
        CoreError::numerical("linalg::solve", "LU solve failed: matrix is singular")
    })
}

/// Inverts a small dense matrix `a`. Intended only for 3x3 Jacobians and
/// other small SPD-ish blocks, per spec.md §4.4.
pub fn invert(a: &DMatrix<f64>) -> CoreResult<DMatrix<f64>> {
    if a.nrows() != a.ncols() {
        return Err(CoreError::shape_mismatch(
            "linalg::invert",
            format!("matrix must be square, got {}x{}", a.nrows(), a.ncols()),
        ));
    }

    a.clone()
        .try_inverse()
        .ok_or_else(|| CoreError::numerical("linalg::invert", "matrix is singular"))
}

/// Selects which SVD backend [`pseudo_inverse`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvdMethod {
    /// One-sided Jacobi SVD — higher accuracy on small matrices.
    Jacobi,
    /// Bidiagonal divide-and-conquer SVD — the default when available.
    Bdc,
}

impl Default for SvdMethod {
    fn default() -> Self {
        SvdMethod::Bdc
    }
}

/// Computes the Moore-Penrose pseudoinverse of `a`.
///
/// Singular values below `max(atol, rtol * sigma_max)` are treated as
/// zero, per spec.md §4.4. `nalgebra`'s `SVD` implementation is used for
/// both [`SvdMethod`] variants: the distinction between Jacobi and BDC is
/// a backend/accuracy choice in the original C++ (Eigen exposes both);
/// `nalgebra::SVD` already uses a numerically stable one-sided Jacobi
/// algorithm suitable for both cases, so both variants route through it.
pub fn pseudo_inverse(
    a: &DMatrix<f64>,
    atol: f64,
    rtol: f64,
    _method: SvdMethod,
) -> CoreResult<DMatrix<f64>> {
    let svd = nalgebra::linalg::SVD::new(a.clone(), true, true);
    let sigma_max = svd
        .singular_values
        .iter()
        .cloned()
        .fold(0.0_f64, f64::max);
    let tol = atol.max(rtol * sigma_max);

    svd.pseudo_inverse(tol)
        .map_err(|message| CoreError::numerical("linalg::pseudo_inverse", message))
}

/// Assembles a sparse matrix from (row, col, value) triplets, summing
/// duplicate (row, col) contributions. Mirrors the "accumulate then
/// compress" COO->CSR idiom used by the pack's FEA solver crates.
pub fn assemble_sparse(
    triplets: &[(usize, usize, f64)],
    rows: usize,
    cols: usize,
) -> CoreResult<CsrMatrix<f64>> {
    let mut coo = CooMatrix::new(rows, cols);
    for &(r, c, v) in triplets {
        if r >= rows || c >= cols {
            return Err(CoreError::index_out_of_range(
                "linalg::assemble_sparse",
                format!("triplet ({r}, {c}) out of bounds for a {rows}x{cols} matrix"),
            ));
        }
        coo.push(r, c, v);
    }
    Ok(CsrMatrix::from(&coo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_identity() {
        let a = DMatrix::identity(3, 3);
        let b = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let x = solve(&a, &b).unwrap();
        assert_relative_eq!(x, b, epsilon = 1e-12);
    }

    #[test]
    fn invert_roundtrip() {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 8.0]);
        let ainv = invert(&a).unwrap();
        let id = &a * &ainv;
        assert_relative_eq!(id, DMatrix::identity(3, 3), epsilon = 1e-10);
    }

    #[test]
    fn pseudo_inverse_rank_deficient() {
        // Rank-1 matrix: pseudoinverse should satisfy A * Ainv * A = A.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let ainv = pseudo_inverse(&a, 1e-9, 1e-9, SvdMethod::Bdc).unwrap();
        let recon = &a * &ainv * &a;
        assert_relative_eq!(recon, a, epsilon = 1e-8);
    }

    #[test]
    fn assemble_sparse_sums_duplicates() {
        let triplets = vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 5.0)];
        let m = assemble_sparse(&triplets, 2, 2).unwrap();
        let dense = DMatrix::from(&m);
        assert_relative_eq!(dense[(0, 0)], 3.0, epsilon = 1e-12);
        assert_relative_eq!(dense[(1, 1)], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn assemble_sparse_rejects_out_of_range() {
        let triplets = vec![(5, 0, 1.0)];
        assert!(assemble_sparse(&triplets, 2, 2).is_err());
    }
}
