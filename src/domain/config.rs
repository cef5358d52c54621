//! Residual computation options.
//!
//! `ResidualConfig` is constructed in code (`Default` plus struct update) or
//! loaded from the environment. `from_env` reads a `.env` file first, the same
//! way the data clients pick up their settings.

use serde::{Deserialize, Serialize};

use crate::domain::{ResidualKind, ResidualUnit, TrackMode};
use crate::error::{ResidualError, ResidualResult};

const ENV_UNIT: &str = "PSR_RESID_UNIT";
const ENV_SUBTRACT_MEAN: &str = "PSR_RESID_SUBTRACT_MEAN";
const ENV_WEIGHTED_MEAN: &str = "PSR_RESID_WEIGHTED_MEAN";
const ENV_TRACK_MODE: &str = "PSR_RESID_TRACK_MODE";
const ENV_SCALED_BY_F0: &str = "PSR_RESID_SCALED_BY_F0";

/// Options shared by every residual kind.
///
/// Wideband DM residuals ignore `track_mode` and `scaled_by_f0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualConfig {
    /// Output unit. `None` selects the residual kind's default.
    pub unit: Option<ResidualUnit>,
    pub subtract_mean: bool,
    /// Weight the subtracted mean by `1/σ²`.
    pub use_weighted_mean: bool,
    pub track_mode: TrackMode,
    /// Report time residuals (`true`) or phase residuals in cycles (`false`).
    pub scaled_by_f0: bool,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            unit: None,
            subtract_mean: true,
            use_weighted_mean: true,
            track_mode: TrackMode::Nearest,
            scaled_by_f0: true,
        }
    }
}

impl ResidualConfig {
    /// Load overrides from the process environment (and `.env`, if present).
    pub fn from_env() -> ResidualResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> ResidualResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_UNIT) {
            config.unit = Some(v.parse()?);
        }
        if let Some(v) = lookup(ENV_SUBTRACT_MEAN) {
            config.subtract_mean = parse_bool(ENV_SUBTRACT_MEAN, &v)?;
        }
        if let Some(v) = lookup(ENV_WEIGHTED_MEAN) {
            config.use_weighted_mean = parse_bool(ENV_WEIGHTED_MEAN, &v)?;
        }
        if let Some(v) = lookup(ENV_TRACK_MODE) {
            config.track_mode = v.parse()?;
        }
        if let Some(v) = lookup(ENV_SCALED_BY_F0) {
            config.scaled_by_f0 = parse_bool(ENV_SCALED_BY_F0, &v)?;
        }
        Ok(config)
    }

    /// Resolve the output unit for `kind`, rejecting units of the wrong dimension.
    pub fn resolve_unit(&self, kind: ResidualKind) -> ResidualResult<ResidualUnit> {
        let unit = self.unit.unwrap_or_else(|| kind.default_unit());
        if unit.dimension() != kind.dimension() {
            return Err(ResidualError::config(format!(
                "unit '{unit}' cannot express {kind} residuals"
            )));
        }
        Ok(unit)
    }
}

fn parse_bool(key: &str, raw: &str) -> ResidualResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ResidualError::config(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}
