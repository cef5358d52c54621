//! Joint view over several residual sources (e.g. TOA + wideband DM).

use crate::domain::{ResidualKind, ResidualUnit};
use crate::error::ResidualResult;
use crate::math::{inverse_variance_weights, weighted_mean_sdev};
use crate::residuals::ResidualSource;

/// Read-only concatenation of residual sources, in insertion order.
pub struct CombinedResiduals<'a> {
    residual_objs: Vec<&'a dyn ResidualSource>,
}

impl<'a> CombinedResiduals<'a> {
    pub fn new(residual_objs: Vec<&'a dyn ResidualSource>) -> Self {
        Self { residual_objs }
    }

    pub fn sources(&self) -> &[&'a dyn ResidualSource] {
        &self.residual_objs
    }

    /// Total number of residual values.
    pub fn len(&self) -> usize {
        self.residual_objs
            .iter()
            .map(|r| r.resids_value().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All residual values, each in its source's unit.
    pub fn resids(&self) -> Vec<f64> {
        self.residual_objs
            .iter()
            .flat_map(|r| r.resids_value())
            .collect()
    }

    pub fn units(&self) -> Vec<ResidualUnit> {
        self.residual_objs.iter().map(|r| r.unit()).collect()
    }

    /// Uncertainties concatenated in the same order as `resids()`.
    pub fn data_error(&self) -> Vec<f64> {
        self.residual_objs
            .iter()
            .flat_map(|r| r.data_error())
            .collect()
    }

    /// Uncertainties per source, tagged with the residual kind.
    pub fn get_data_error(&self) -> Vec<(ResidualKind, Vec<f64>)> {
        self.residual_objs
            .iter()
            .map(|r| (r.kind(), r.data_error()))
            .collect()
    }

    /// Sum of the sources' chi-squared values.
    pub fn chi2(&self) -> ResidualResult<f64> {
        self.residual_objs.iter().map(|r| r.chi2()).sum()
    }

    /// Weighted RMS over all values. Only meaningful when the sources share a unit.
    pub fn rms_weighted(&self) -> ResidualResult<f64> {
        let weights = inverse_variance_weights(&self.data_error(), "combined")?;
        Ok(weighted_mean_sdev(&self.resids(), &weights)?.sdev)
    }
}
