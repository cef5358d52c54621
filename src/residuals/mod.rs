//! Residual computation and scoring.
//!
//! Responsibilities:
//!
//! - phase / time residuals for TOAs (`Residuals`)
//! - epoch-averaged residuals under ECORR (`Residuals::ecorr_average`)
//! - wideband DM residuals (`WidebandDmResiduals`)
//! - joint scoring across residual kinds (`CombinedResiduals`)
//!
//! `AnyResiduals` is the factory over the closed set of residual kinds.

pub mod combined;
pub mod epoch;
pub mod memo;
pub mod toa;
pub mod wideband;

use std::sync::Arc;

pub use combined::*;
pub use epoch::*;
pub use memo::*;
pub use toa::*;
pub use wideband::*;

use crate::data::ObservationSet;
use crate::domain::{ResidualConfig, ResidualKind, ResidualUnit};
use crate::error::ResidualResult;
use crate::math::{inverse_variance_weights, mean, weighted_mean};
use crate::models::TimingModel;

/// What the combined aggregator needs from a residual entity.
///
/// `resids_value` and `data_error` share the entity's output unit.
pub trait ResidualSource {
    fn kind(&self) -> ResidualKind;

    fn unit(&self) -> ResidualUnit;

    fn resids_value(&self) -> Vec<f64>;

    fn data_error(&self) -> Vec<f64>;

    fn chi2(&self) -> ResidualResult<f64>;
}

/// A residual entity of any supported kind.
pub enum AnyResiduals {
    Toa(Residuals),
    Dm(WidebandDmResiduals),
}

impl AnyResiduals {
    pub fn build(
        kind: ResidualKind,
        toas: Arc<ObservationSet>,
        model: Arc<dyn TimingModel>,
        config: ResidualConfig,
    ) -> ResidualResult<Self> {
        match kind {
            ResidualKind::Toa => Ok(AnyResiduals::Toa(Residuals::new(toas, model, config)?)),
            ResidualKind::Dm => Ok(AnyResiduals::Dm(WidebandDmResiduals::new(
                toas, model, config,
            )?)),
        }
    }

    /// Build from a residual type name (`"toa"`, `"dm"`).
    ///
    /// The name is resolved before any residual is computed.
    pub fn from_type_name(
        name: &str,
        toas: Arc<ObservationSet>,
        model: Arc<dyn TimingModel>,
        config: ResidualConfig,
    ) -> ResidualResult<Self> {
        let kind: ResidualKind = name.parse()?;
        Self::build(kind, toas, model, config)
    }

    pub fn as_toa(&self) -> Option<&Residuals> {
        match self {
            AnyResiduals::Toa(r) => Some(r),
            AnyResiduals::Dm(_) => None,
        }
    }

    pub fn as_dm(&self) -> Option<&WidebandDmResiduals> {
        match self {
            AnyResiduals::Dm(r) => Some(r),
            AnyResiduals::Toa(_) => None,
        }
    }

    fn source(&self) -> &dyn ResidualSource {
        match self {
            AnyResiduals::Toa(r) => r,
            AnyResiduals::Dm(r) => r,
        }
    }

    pub fn rms_weighted(&self) -> ResidualResult<f64> {
        match self {
            AnyResiduals::Toa(r) => r.rms_weighted(),
            AnyResiduals::Dm(r) => r.rms_weighted(),
        }
    }

    pub fn update(&mut self) -> ResidualResult<()> {
        match self {
            AnyResiduals::Toa(r) => r.update(),
            AnyResiduals::Dm(r) => r.update(),
        }
    }
}

impl ResidualSource for AnyResiduals {
    fn kind(&self) -> ResidualKind {
        self.source().kind()
    }

    fn unit(&self) -> ResidualUnit {
        self.source().unit()
    }

    fn resids_value(&self) -> Vec<f64> {
        self.source().resids_value()
    }

    fn data_error(&self) -> Vec<f64> {
        self.source().data_error()
    }

    fn chi2(&self) -> ResidualResult<f64> {
        self.source().chi2()
    }
}

/// `Σ (r/σ)²`, saturating to `+∞` when any σ is exactly zero.
pub(crate) fn independent_chi2(resids: &[f64], errors: &[f64]) -> f64 {
    if errors.iter().any(|&e| e == 0.0) {
        return f64::INFINITY;
    }
    resids
        .iter()
        .zip(errors)
        .map(|(r, e)| (r / e) * (r / e))
        .sum()
}

/// Remove the plain or `1/σ²`-weighted mean in place.
pub(crate) fn subtract_mean(
    values: &mut [f64],
    errors: &[f64],
    weighted: bool,
    what: &str,
) -> ResidualResult<()> {
    if values.is_empty() {
        return Ok(());
    }
    let offset = if weighted {
        let weights = inverse_variance_weights(errors, what)?;
        weighted_mean(values, &weights)?.mean
    } else {
        mean(values)?
    };
    for v in values.iter_mut() {
        *v -= offset;
    }
    Ok(())
}
