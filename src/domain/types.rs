//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - passed around by value during residual computation
//! - embedded in configuration files or reports
//! - compared in tests without any numeric machinery

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResidualError;

/// Which observable a residual entity scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidualKind {
    /// Pulse times of arrival (phase / time residuals).
    Toa,
    /// Wideband dispersion-measure measurements.
    Dm,
}

impl ResidualKind {
    pub const ALL: [ResidualKind; 2] = [ResidualKind::Toa, ResidualKind::Dm];

    /// Type tag used in configuration and combined-residual reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ResidualKind::Toa => "toa",
            ResidualKind::Dm => "dm",
        }
    }

    /// Output unit used when the caller does not ask for one.
    pub fn default_unit(self) -> ResidualUnit {
        match self {
            ResidualKind::Toa => ResidualUnit::Seconds,
            ResidualKind::Dm => ResidualUnit::PcPerCm3,
        }
    }

    pub fn dimension(self) -> UnitDimension {
        self.default_unit().dimension()
    }
}

impl fmt::Display for ResidualKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResidualKind {
    type Err = ResidualError;

    /// Case-insensitive lookup of a residual type name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ResidualKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ResidualError::UnsupportedKind {
                requested: s.to_string(),
                supported: ResidualKind::ALL.iter().map(|k| k.as_str()).collect(),
            })
    }
}

/// How each TOA is assigned to a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    /// Assign each TOA to the nearest integer pulse.
    #[default]
    Nearest,
    /// Use the pulse-number label carried by every TOA.
    UsePulseNumbers,
}

impl FromStr for TrackMode {
    type Err = ResidualError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(TrackMode::Nearest),
            "use_pulse_numbers" | "use-pulse-numbers" => Ok(TrackMode::UsePulseNumbers),
            other => Err(ResidualError::config(format!(
                "unknown track mode '{other}' (expected nearest or use_pulse_numbers)"
            ))),
        }
    }
}

/// Physical dimension of a residual unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitDimension {
    Time,
    DispersionMeasure,
}

/// Output unit for residual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "us")]
    Microseconds,
    #[serde(rename = "ns")]
    Nanoseconds,
    #[serde(rename = "pc/cm3")]
    PcPerCm3,
}

impl ResidualUnit {
    pub fn dimension(self) -> UnitDimension {
        match self {
            ResidualUnit::Seconds
            | ResidualUnit::Milliseconds
            | ResidualUnit::Microseconds
            | ResidualUnit::Nanoseconds => UnitDimension::Time,
            ResidualUnit::PcPerCm3 => UnitDimension::DispersionMeasure,
        }
    }

    /// Multiplier taking a value in the dimension's base unit (seconds, or
    /// pc cm^-3) into this unit.
    pub fn scale_from_base(self) -> f64 {
        match self {
            ResidualUnit::Seconds => 1.0,
            ResidualUnit::Milliseconds => 1e3,
            ResidualUnit::Microseconds => 1e6,
            ResidualUnit::Nanoseconds => 1e9,
            ResidualUnit::PcPerCm3 => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResidualUnit::Seconds => "s",
            ResidualUnit::Milliseconds => "ms",
            ResidualUnit::Microseconds => "us",
            ResidualUnit::Nanoseconds => "ns",
            ResidualUnit::PcPerCm3 => "pc/cm3",
        }
    }
}

impl fmt::Display for ResidualUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ResidualUnit {
    type Err = ResidualError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "s" => Ok(ResidualUnit::Seconds),
            "ms" => Ok(ResidualUnit::Milliseconds),
            "us" | "µs" => Ok(ResidualUnit::Microseconds),
            "ns" => Ok(ResidualUnit::Nanoseconds),
            "pc/cm3" | "pc cm^-3" => Ok(ResidualUnit::PcPerCm3),
            other => Err(ResidualError::config(format!("unknown residual unit '{other}'"))),
        }
    }
}

/// A single timing-model parameter as seen by the residual engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// Physical unit label (e.g. `Hz`, `Hz/s`, `pc/cm3`).
    pub unit: String,
    /// Frozen parameters are not adjusted by a fitter and do not consume a DOF.
    pub frozen: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            frozen: true,
        }
    }

    pub fn free(mut self) -> Self {
        self.frozen = false;
        self
    }
}
