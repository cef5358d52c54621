//! Wideband DM residuals.
//!
//! Wideband TOAs carry a per-observation DM measurement in the `pp_dm` flag
//! and its uncertainty in `pp_dme`. Residuals are `measured − model` at the
//! flagged TOAs, in pc cm⁻³. No phase tracking or F0 scaling applies.

use std::sync::Arc;

use tracing::debug;

use crate::data::ObservationSet;
use crate::domain::{ResidualConfig, ResidualKind, ResidualUnit};
use crate::error::{ResidualError, ResidualResult};
use crate::math::{inverse_variance_weights, weighted_mean_sdev};
use crate::models::TimingModel;
use crate::residuals::memo::GenerationMemo;
use crate::residuals::{ResidualSource, independent_chi2, subtract_mean};

/// Flag carrying the measured DM (pc cm⁻³).
pub const DM_FLAG: &str = "pp_dm";

/// Flag carrying the DM uncertainty (pc cm⁻³).
pub const DM_ERROR_FLAG: &str = "pp_dme";

pub struct WidebandDmResiduals {
    toas: Arc<ObservationSet>,
    model: Arc<dyn TimingModel>,
    config: ResidualConfig,
    unit: ResidualUnit,
    dm_data: Vec<f64>,
    dm_error: Vec<f64>,
    /// TOAs carrying a DM measurement.
    indices: Vec<usize>,
    resids: Vec<f64>,
    chi2: GenerationMemo,
}

impl std::fmt::Debug for WidebandDmResiduals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidebandDmResiduals")
            .field("n_dm", &self.dm_data.len())
            .field("unit", &self.unit)
            .field("generation", &self.chi2.generation())
            .finish()
    }
}

impl WidebandDmResiduals {
    /// Extract DM measurements from `toas` and compute residuals against `model`.
    ///
    /// Fails immediately when the measurement flags are missing or inconsistent.
    pub fn new(
        toas: Arc<ObservationSet>,
        model: Arc<dyn TimingModel>,
        config: ResidualConfig,
    ) -> ResidualResult<Self> {
        let unit = config.resolve_unit(ResidualKind::Dm)?;
        let (dm_data, dm_error, indices) = extract_dm(&toas)?;
        let mut residuals = Self {
            toas,
            model,
            config,
            unit,
            dm_data,
            dm_error,
            indices,
            resids: Vec::new(),
            chi2: GenerationMemo::new(),
        };
        residuals.update()?;
        Ok(residuals)
    }

    pub fn update(&mut self) -> ResidualResult<()> {
        let model_dm = self.model.dm_value(&self.toas)?;
        if model_dm.len() != self.toas.len() {
            return Err(ResidualError::data_quality(format!(
                "model predicted {} DM values for {} TOAs",
                model_dm.len(),
                self.toas.len()
            )));
        }
        let mut resids: Vec<f64> = self
            .indices
            .iter()
            .zip(&self.dm_data)
            .map(|(&i, measured)| measured - model_dm[i])
            .collect();
        if self.config.subtract_mean {
            subtract_mean(
                &mut resids,
                &self.dm_error,
                self.config.use_weighted_mean,
                "DM",
            )?;
        }
        self.resids = resids;
        self.chi2.bump();
        debug!(
            n_dm = self.resids.len(),
            generation = self.chi2.generation(),
            "recomputed wideband DM residuals"
        );
        Ok(())
    }

    /// Swap the timing model and recompute.
    ///
    /// If the recomputation fails the previous model is restored.
    pub fn set_model(&mut self, model: Arc<dyn TimingModel>) -> ResidualResult<()> {
        let previous = std::mem::replace(&mut self.model, model);
        if let Err(e) = self.update() {
            self.model = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Attach new TOAs, re-extract their DM measurements and recompute.
    ///
    /// On any failure the previous TOAs and measurements are kept.
    pub fn set_toas(&mut self, toas: Arc<ObservationSet>) -> ResidualResult<()> {
        let (dm_data, dm_error, indices) = extract_dm(&toas)?;
        let previous = (
            std::mem::replace(&mut self.toas, toas),
            std::mem::replace(&mut self.dm_data, dm_data),
            std::mem::replace(&mut self.dm_error, dm_error),
            std::mem::replace(&mut self.indices, indices),
        );
        if let Err(e) = self.update() {
            (self.toas, self.dm_data, self.dm_error, self.indices) = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn toas(&self) -> &ObservationSet {
        &self.toas
    }

    pub fn model(&self) -> &dyn TimingModel {
        self.model.as_ref()
    }

    pub fn unit(&self) -> ResidualUnit {
        self.unit
    }

    pub fn generation(&self) -> u64 {
        self.chi2.generation()
    }

    /// DM residuals (pc cm⁻³).
    pub fn resids(&self) -> &[f64] {
        &self.resids
    }

    pub fn resids_value(&self) -> Vec<f64> {
        let scale = self.unit.scale_from_base();
        self.resids.iter().map(|r| r * scale).collect()
    }

    /// Measured DM values.
    pub fn dm_data(&self) -> &[f64] {
        &self.dm_data
    }

    /// Measured DM uncertainties.
    pub fn dm_error(&self) -> &[f64] {
        &self.dm_error
    }

    pub fn data_error(&self) -> Vec<f64> {
        let scale = self.unit.scale_from_base();
        self.dm_error.iter().map(|e| e * scale).collect()
    }

    /// TOA index of each DM measurement.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn chi2(&self) -> ResidualResult<f64> {
        self.chi2
            .get_or_try_compute(|| Ok(independent_chi2(&self.resids, &self.dm_error)))
    }

    pub fn rms_weighted(&self) -> ResidualResult<f64> {
        let weights = inverse_variance_weights(&self.dm_error, "DM")?;
        let spread = weighted_mean_sdev(&self.resids, &weights)?;
        Ok(spread.sdev * self.unit.scale_from_base())
    }
}

impl ResidualSource for WidebandDmResiduals {
    fn kind(&self) -> ResidualKind {
        ResidualKind::Dm
    }

    fn unit(&self) -> ResidualUnit {
        self.unit
    }

    fn resids_value(&self) -> Vec<f64> {
        WidebandDmResiduals::resids_value(self)
    }

    fn data_error(&self) -> Vec<f64> {
        WidebandDmResiduals::data_error(self)
    }

    fn chi2(&self) -> ResidualResult<f64> {
        WidebandDmResiduals::chi2(self)
    }
}

fn extract_dm(toas: &ObservationSet) -> ResidualResult<(Vec<f64>, Vec<f64>, Vec<usize>)> {
    let data = toas.get_flag_value(DM_FLAG)?;
    let errors = toas.get_flag_value(DM_ERROR_FLAG)?;
    if data.is_empty() {
        return Err(ResidualError::data_quality(format!(
            "no TOA carries a '{DM_FLAG}' measurement"
        )));
    }
    if errors.is_empty() {
        return Err(ResidualError::data_quality(format!(
            "no TOA carries a '{DM_ERROR_FLAG}' uncertainty"
        )));
    }
    if data.indices != errors.indices {
        return Err(ResidualError::data_quality(format!(
            "{} '{DM_FLAG}' values but {} '{DM_ERROR_FLAG}' values on different TOAs",
            data.len(),
            errors.len()
        )));
    }
    Ok((data.values, errors.values, data.indices))
}
