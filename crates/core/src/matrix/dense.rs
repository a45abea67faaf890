use crate::error::{PccaError, Result};
use crate::types::DenseMatrix;

/// Compute the Cholesky factorization of a symmetric positive-definite matrix.
/// Returns the lower-triangular factor L such that A = L * L^T, or None if
/// the matrix is not SPD.
pub fn cholesky_lower(a: &DenseMatrix) -> Option<DenseMatrix> {
    let chol = a.clone().cholesky()?;
    Some(chol.l())
}

/// Compute the inverse of an SPD matrix via Cholesky. Fails with
/// [`PccaError::NumericalInstability`] if the factorization breaks down,
/// naming `context` so the caller can tell which covariance went bad.
pub fn inverse_spd(a: &DenseMatrix, context: &str) -> Result<DenseMatrix> {
    let chol = a
        .clone()
        .cholesky()
        .ok_or_else(|| PccaError::NumericalInstability {
            context: context.to_string(),
        })?;
    Ok(chol.inverse())
}

/// Compute the log-determinant of an SPD matrix via Cholesky:
/// log|A| = 2 * sum(log(diag(L))).
pub fn log_determinant_spd(a: &DenseMatrix, context: &str) -> Result<f64> {
    let l = cholesky_lower(a).ok_or_else(|| PccaError::NumericalInstability {
        context: context.to_string(),
    })?;
    Ok(2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>())
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue_sym(a: &DenseMatrix) -> f64 {
    a.symmetric_eigenvalues()
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}
