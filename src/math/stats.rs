//! Weighted statistics shared by all residual kinds.
//!
//! Weights are usually `1/σ²`. Both helpers reject empty inputs, mismatched
//! lengths, and weights that are negative, non-finite or sum to zero.

use crate::error::{ResidualError, ResidualResult};

/// Weighted mean and its formal error `sqrt(1/Σw)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedMean {
    pub mean: f64,
    pub error: f64,
}

/// Weighted mean plus the weighted standard deviation about it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSpread {
    pub mean: f64,
    pub error: f64,
    pub sdev: f64,
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> ResidualResult<WeightedMean> {
    let total = check_weights(values, weights)?;
    let mean = values
        .iter()
        .zip(weights)
        .map(|(x, w)| x * w)
        .sum::<f64>()
        / total;
    Ok(WeightedMean {
        mean,
        error: (1.0 / total).sqrt(),
    })
}

/// Weighted mean with `sdev = sqrt(Σ w (x - mean)² / Σ w)`.
pub fn weighted_mean_sdev(values: &[f64], weights: &[f64]) -> ResidualResult<WeightedSpread> {
    let WeightedMean { mean, error } = weighted_mean(values, weights)?;
    let total: f64 = weights.iter().sum();
    let var = values
        .iter()
        .zip(weights)
        .map(|(x, w)| w * (x - mean) * (x - mean))
        .sum::<f64>()
        / total;
    Ok(WeightedSpread {
        mean,
        error,
        sdev: var.sqrt(),
    })
}

/// Inverse-variance weights. Any zero uncertainty is a data-quality error.
pub fn inverse_variance_weights(errors: &[f64], what: &str) -> ResidualResult<Vec<f64>> {
    if errors.iter().any(|&e| e == 0.0) {
        return Err(ResidualError::data_quality(format!(
            "some {what} errors are zero; cannot compute weighted statistics"
        )));
    }
    Ok(errors.iter().map(|e| 1.0 / (e * e)).collect())
}

pub fn mean(values: &[f64]) -> ResidualResult<f64> {
    if values.is_empty() {
        return Err(ResidualError::data_quality("mean of an empty sequence"));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

fn check_weights(values: &[f64], weights: &[f64]) -> ResidualResult<f64> {
    if values.is_empty() {
        return Err(ResidualError::data_quality("weighted mean of an empty sequence"));
    }
    if values.len() != weights.len() {
        return Err(ResidualError::data_quality(format!(
            "weighted mean: {} values but {} weights",
            values.len(),
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ResidualError::data_quality(
            "weighted mean: weights must be finite and non-negative",
        ));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(ResidualError::data_quality("weighted mean: weights sum to zero"));
    }
    Ok(total)
}
