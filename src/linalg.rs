use crate::filter::FilterError;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, Dim, Matrix2, OMatrix, Vector2};

/// Largest acceptable ratio between the determinant and the squared magnitude of
/// a 2x2 matrix before it is declared singular.
const SINGULARITY_TOL: f64 = 1.0e-12;

/// Restores the symmetry of a square matrix which round-off has corrupted:
/// `M <- (M + M^T) / 2`.
pub fn symmetrize<D: Dim>(m: &mut OMatrix<f64, D, D>)
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    let mt = m.transpose();
    *m += mt;
    *m *= 0.5;
}

/// Approximates the condition number of a square matrix as the product of its
/// norm with the norm of its inverse. Returns infinity if the matrix cannot be
/// inverted, which callers treat as "fails any threshold test".
pub fn condition_number<D: Dim>(m: &OMatrix<f64, D, D>) -> f64
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    match m.clone().try_inverse() {
        Some(inv) => m.norm() * inv.norm(),
        None => f64::INFINITY,
    }
}

/// Inverts a matrix, signaling singularity instead of returning garbage.
pub fn try_invert<D: Dim>(m: &OMatrix<f64, D, D>) -> Result<OMatrix<f64, D, D>, FilterError>
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    m.clone().try_inverse().ok_or(FilterError::SingularMatrix)
}

/// Closed-form inverse of a 2x2 matrix with an explicit singularity guard.
pub fn invert_2x2(m: &Matrix2<f64>) -> Result<Matrix2<f64>, FilterError> {
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    let scale = m.amax();
    if !det.is_finite() || det.abs() <= SINGULARITY_TOL * scale * scale {
        return Err(FilterError::SingularMatrix);
    }
    Ok(Matrix2::new(
        m[(1, 1)] / det,
        -m[(0, 1)] / det,
        -m[(1, 0)] / det,
        m[(0, 0)] / det,
    ))
}

/// Lower-triangular Cholesky factor of a 2x2 innovation covariance, or None
/// when the matrix is not positive definite.
pub fn cholesky_lower_2x2(s: &Matrix2<f64>) -> Option<Matrix2<f64>> {
    if !(s[(0, 0)] > 0.0) {
        return None;
    }
    let c00 = s[(0, 0)].sqrt();
    let c10 = s[(1, 0)] / c00;
    let discrm = s[(1, 1)] - c10 * c10;
    if !(discrm > 0.0) {
        return None;
    }
    Some(Matrix2::new(c00, 0.0, c10, discrm.sqrt()))
}

/// Maps a correlated innovation to a pair of independent standard normals by
/// applying the inverse of the lower Cholesky factor of its covariance.
pub fn whiten_2x2(s: &Matrix2<f64>, delz: &Vector2<f64>) -> Option<Vector2<f64>> {
    let c = cholesky_lower_2x2(s)?;
    let x1 = delz[0] / c[(0, 0)];
    let x2 = -c[(1, 0)] * delz[0] / (c[(0, 0)] * c[(1, 1)]) + delz[1] / c[(1, 1)];
    Some(Vector2::new(x1, x2))
}
