//! Timing-model interface consumed by the residual engine.
//!
//! The engine relies on a small set of primitives:
//! - predict rotational phase per TOA (relative or absolute)
//! - predict dispersion measure per TOA (wideband residuals)
//! - enumerate parameters with their free/frozen status
//! - enumerate noise components (white scaling, ECORR) by category
//!
//! Everything else (`scaled_toa_uncertainty`, `has_correlated_errors`, the
//! stacked noise basis) has a default implementation built on those.

use nalgebra::{DMatrix, DVector};

use crate::data::ObservationSet;
use crate::domain::Parameter;
use crate::error::{ResidualError, ResidualResult};
use crate::math::Phase;

/// Parameter names accepted as the pulsar spin frequency.
pub const SPIN_FREQUENCY_NAMES: [&str; 2] = ["F0", "nu"];

/// Parameter holding the pulse-tracking override.
pub const TRACK_PARAM: &str = "TRACK";

/// `TRACK` value that forces tracking on TOA pulse numbers.
pub const TRACK_USE_PULSE_NUMBERS: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseCategory {
    /// Rescales white uncertainties (EFAC / EQUAD).
    WhiteScaling,
    /// Epoch-correlated white noise.
    Ecorr,
}

pub trait NoiseComponent: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> NoiseCategory;

    /// Whether this component adds off-diagonal covariance.
    fn introduces_correlated_errors(&self) -> bool {
        false
    }

    /// Basis `U` (n×k) and per-column prior variance `φ` (s²).
    fn basis_weight_pair(&self, toas: &ObservationSet) -> Option<(DMatrix<f64>, DVector<f64>)> {
        let _ = toas;
        None
    }

    /// Rescale white uncertainties (seconds) in place.
    fn scale_uncertainties(&self, toas: &ObservationSet, sigma_s: &mut [f64]) {
        let _ = (toas, sigma_s);
    }
}

pub trait TimingModel: Send + Sync {
    /// Model phase at each TOA. With `abs_phase` the phase is referenced to the
    /// model's zero-phase TOA so that integer parts are pulse numbers.
    fn phase(&self, toas: &ObservationSet, abs_phase: bool) -> ResidualResult<Vec<Phase>>;

    /// Predicted dispersion measure (pc cm^-3) at each TOA.
    fn dm_value(&self, toas: &ObservationSet) -> ResidualResult<Vec<f64>>;

    fn params(&self) -> &[Parameter];

    fn noise_components(&self) -> Vec<&dyn NoiseComponent>;

    fn param(&self, name: &str) -> Option<&Parameter> {
        self.params().iter().find(|p| p.name == name)
    }

    fn free_param_count(&self) -> usize {
        self.params().iter().filter(|p| !p.frozen).count()
    }

    fn components_by_category(&self, category: NoiseCategory) -> Vec<&dyn NoiseComponent> {
        self.noise_components()
            .into_iter()
            .filter(|c| c.category() == category)
            .collect()
    }

    fn has_correlated_errors(&self) -> bool {
        self.noise_components()
            .iter()
            .any(|c| c.introduces_correlated_errors())
    }

    /// TOA uncertainties (seconds) after all white-noise scaling components.
    fn scaled_toa_uncertainty(&self, toas: &ObservationSet) -> Vec<f64> {
        let mut sigma = toas.get_errors_s();
        for component in self.components_by_category(NoiseCategory::WhiteScaling) {
            component.scale_uncertainties(toas, &mut sigma);
        }
        sigma
    }

    /// All correlated-noise bases stacked column-wise, with their weights.
    fn noise_basis_weight(&self, toas: &ObservationSet) -> Option<(DMatrix<f64>, DVector<f64>)> {
        let pairs: Vec<(DMatrix<f64>, DVector<f64>)> = self
            .noise_components()
            .iter()
            .filter_map(|c| c.basis_weight_pair(toas))
            .collect();
        if pairs.is_empty() {
            return None;
        }

        let ncols: usize = pairs.iter().map(|(u, _)| u.ncols()).sum();
        let mut basis = DMatrix::zeros(toas.len(), ncols);
        let mut weights = DVector::zeros(ncols);
        let mut offset = 0;
        for (u, phi) in &pairs {
            basis.columns_mut(offset, u.ncols()).copy_from(u);
            weights.rows_mut(offset, phi.len()).copy_from(phi);
            offset += u.ncols();
        }
        Some((basis, weights))
    }
}

/// Resolve the spin frequency (Hz).
///
/// Exactly one of `SPIN_FREQUENCY_NAMES` must be present, in `Hz`.
pub fn spin_frequency(model: &dyn TimingModel) -> ResidualResult<f64> {
    let found: Vec<&Parameter> = SPIN_FREQUENCY_NAMES
        .iter()
        .filter_map(|name| model.param(name))
        .collect();

    match found.as_slice() {
        [] => Err(ResidualError::config(format!(
            "no spin frequency parameter found; valid names are {SPIN_FREQUENCY_NAMES:?}"
        ))),
        [param] => {
            if param.unit != "Hz" {
                return Err(ResidualError::config(format!(
                    "{} must be in Hz, found '{}'",
                    param.name, param.unit
                )));
            }
            Ok(param.value)
        }
        _ => Err(ResidualError::config(format!(
            "more than one spin frequency parameter found; use only one of {SPIN_FREQUENCY_NAMES:?}"
        ))),
    }
}

/// Whether the model asks for pulse-number tracking regardless of caller options.
pub fn forces_pulse_number_tracking(model: &dyn TimingModel) -> bool {
    model
        .param(TRACK_PARAM)
        .is_some_and(|p| p.value == TRACK_USE_PULSE_NUMBERS)
}

/// Nearest-integer absolute pulse number for every TOA (phase jumps included).
pub fn compute_pulse_numbers(
    model: &dyn TimingModel,
    toas: &ObservationSet,
) -> ResidualResult<Vec<f64>> {
    let phases = model.phase(toas, true)?;
    Ok(phases
        .iter()
        .zip(toas.get_delta_pulse_numbers())
        .map(|(&phase, delta)| {
            let p = phase + Phase::from_cycles(delta);
            p.int + p.frac.round()
        })
        .collect())
}
