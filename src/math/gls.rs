//! Covariance-aware chi-squared.
//!
//! With correlated noise the TOA covariance is
//!
//! ```text
//! C = N + U Φ Uᵀ
//! ```
//!
//! where `N = diag(σ²)` holds the (noise-scaled) white uncertainties, `U` is the
//! n×k correlated-noise basis and `Φ = diag(φ)` its prior variances. The score
//! is `χ² = rᵀ C⁻¹ r`; no timing parameters are adjusted.
//!
//! Two solve strategies:
//! - `full_cov = true`: Cholesky of the dense n×n `C`.
//! - `full_cov = false`: Woodbury identity, which only factors the k×k matrix
//!   `Σ = Φ⁻¹ + Uᵀ N⁻¹ U`:
//!
//! ```text
//! χ² = rᵀ N⁻¹ r − dᵀ Σ⁻¹ d,   d = Uᵀ N⁻¹ r
//! ```
//!
//! Both report a failed factorization as `ResidualError::Degenerate`.

use nalgebra::{DMatrix, DVector};

use crate::data::ObservationSet;
use crate::error::{ResidualError, ResidualResult};
use crate::models::TimingModel;

/// Scores residuals against a correlated-noise covariance.
pub trait CorrelatedChi2: Send + Sync {
    /// `time_resids` are in seconds, one per TOA.
    fn chi2(
        &self,
        toas: &ObservationSet,
        model: &dyn TimingModel,
        time_resids: &[f64],
        full_cov: bool,
    ) -> ResidualResult<f64>;
}

/// Default evaluator: builds the covariance from the model's noise components.
#[derive(Debug, Clone, Copy, Default)]
pub struct CholeskyGls;

impl CorrelatedChi2 for CholeskyGls {
    fn chi2(
        &self,
        toas: &ObservationSet,
        model: &dyn TimingModel,
        time_resids: &[f64],
        full_cov: bool,
    ) -> ResidualResult<f64> {
        if time_resids.len() != toas.len() {
            return Err(ResidualError::data_quality(format!(
                "{} residuals for {} TOAs",
                time_resids.len(),
                toas.len()
            )));
        }
        let sigma = model.scaled_toa_uncertainty(toas);
        let (basis, phi) = match model.noise_basis_weight(toas) {
            Some(pair) => pair,
            None => (DMatrix::zeros(toas.len(), 0), DVector::zeros(0)),
        };
        gls_chi2(time_resids, &sigma, &basis, &phi, full_cov)
    }
}

/// `rᵀ (N + U Φ Uᵀ)⁻¹ r` for explicit inputs (all in seconds / seconds²).
pub fn gls_chi2(
    resids: &[f64],
    sigma: &[f64],
    basis: &DMatrix<f64>,
    phi: &DVector<f64>,
    full_cov: bool,
) -> ResidualResult<f64> {
    let n = resids.len();
    if sigma.len() != n || basis.nrows() != n || basis.ncols() != phi.len() {
        return Err(ResidualError::degenerate(format!(
            "shape mismatch: r={n}, sigma={}, U={}x{}, phi={}",
            sigma.len(),
            basis.nrows(),
            basis.ncols(),
            phi.len()
        )));
    }
    let r = DVector::from_column_slice(resids);

    let chi2 = if full_cov {
        full_covariance_chi2(&r, sigma, basis, phi)?
    } else {
        woodbury_chi2(&r, sigma, basis, phi)?
    };

    if !chi2.is_finite() {
        return Err(ResidualError::degenerate(format!("non-finite chi-squared ({chi2})")));
    }
    Ok(chi2)
}

fn full_covariance_chi2(
    r: &DVector<f64>,
    sigma: &[f64],
    basis: &DMatrix<f64>,
    phi: &DVector<f64>,
) -> ResidualResult<f64> {
    let white = DVector::from_iterator(sigma.len(), sigma.iter().map(|s| s * s));
    let mut cov = DMatrix::from_diagonal(&white);
    if basis.ncols() > 0 {
        let scaled = basis * DMatrix::from_diagonal(phi);
        cov += scaled * basis.transpose();
    }

    let chol = cov
        .cholesky()
        .ok_or_else(|| ResidualError::degenerate("covariance matrix is not positive definite"))?;
    let solved = chol.solve(r);
    Ok(r.dot(&solved))
}

fn woodbury_chi2(
    r: &DVector<f64>,
    sigma: &[f64],
    basis: &DMatrix<f64>,
    phi: &DVector<f64>,
) -> ResidualResult<f64> {
    if sigma.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(ResidualError::degenerate(
            "white-noise covariance is singular (non-positive uncertainty)",
        ));
    }
    let n_inv = DVector::from_iterator(sigma.len(), sigma.iter().map(|s| 1.0 / (s * s)));
    let nr = r.component_mul(&n_inv);
    let white_term = r.dot(&nr);

    // Columns with zero prior variance add nothing to C.
    let active: Vec<usize> = (0..phi.len()).filter(|&j| phi[j] != 0.0).collect();
    if active.is_empty() {
        return Ok(white_term);
    }
    if active.iter().any(|&j| !phi[j].is_finite() || phi[j] < 0.0) {
        return Err(ResidualError::degenerate("negative or non-finite noise prior"));
    }

    let u = basis.select_columns(active.iter());
    let weighted_u = DMatrix::from_fn(u.nrows(), u.ncols(), |i, j| u[(i, j)] * n_inv[i]);
    let mut sigma_mat = u.transpose() * weighted_u;
    for (k, &j) in active.iter().enumerate() {
        sigma_mat[(k, k)] += 1.0 / phi[j];
    }
    let d = u.transpose() * nr;

    let chol = sigma_mat
        .cholesky()
        .ok_or_else(|| ResidualError::degenerate("Woodbury kernel is not positive definite"))?;
    let solved = chol.solve(&d);
    Ok(white_term - d.dot(&solved))
}
