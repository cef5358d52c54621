//! Observation set: an ordered list of pulse times of arrival (TOAs).
//!
//! Every `Toa` carries its phase-jump correction (`delta_pulse_number`), zero
//! unless a caller sets it, so residual code never has to add the column.
//! Parsing tim files is not handled here; callers build `Toa`s directly.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{ResidualError, ResidualResult};

/// Seconds per day, for MJD arithmetic.
pub const SECS_PER_DAY: f64 = 86_400.0;

/// Microseconds to seconds.
const US_TO_S: f64 = 1e-6;

/// A single time of arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toa {
    /// Arrival time (MJD, UTC at the observatory).
    pub mjd: f64,
    /// Observing frequency (MHz). `f64::INFINITY` means infinite frequency.
    pub freq_mhz: f64,
    /// Measurement uncertainty (μs).
    pub error_us: f64,
    /// Free-form annotations (e.g. `pp_dm`, `pp_dme`, backend selectors).
    pub flags: BTreeMap<String, String>,
    /// Absolute pulse number, when known.
    pub pulse_number: Option<f64>,
    /// Phase-jump correction in cycles (PHASE statements, user phase wraps).
    pub delta_pulse_number: f64,
}

impl Toa {
    pub fn new(mjd: f64, freq_mhz: f64, error_us: f64) -> Self {
        Self {
            mjd,
            freq_mhz,
            error_us,
            flags: BTreeMap::new(),
            pulse_number: None,
            delta_pulse_number: 0.0,
        }
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    pub fn with_pulse_number(mut self, pulse_number: f64) -> Self {
        self.pulse_number = Some(pulse_number);
        self
    }
}

/// Values of a numeric flag, for the TOAs that carry it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlagColumn {
    pub values: Vec<f64>,
    /// Index (into the observation set) of each entry in `values`.
    pub indices: Vec<usize>,
}

impl FlagColumn {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservationSet {
    toas: Vec<Toa>,
}

impl ObservationSet {
    pub fn new(toas: Vec<Toa>) -> Self {
        Self { toas }
    }

    pub fn len(&self) -> usize {
        self.toas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toas.is_empty()
    }

    pub fn toas(&self) -> &[Toa] {
        &self.toas
    }

    pub fn get_mjds(&self) -> Vec<f64> {
        self.toas.iter().map(|t| t.mjd).collect()
    }

    pub fn get_freqs(&self) -> Vec<f64> {
        self.toas.iter().map(|t| t.freq_mhz).collect()
    }

    /// Uncertainties in μs.
    pub fn get_errors(&self) -> Vec<f64> {
        self.toas.iter().map(|t| t.error_us).collect()
    }

    /// Uncertainties in seconds.
    pub fn get_errors_s(&self) -> Vec<f64> {
        self.toas.iter().map(|t| t.error_us * US_TO_S).collect()
    }

    /// Parse flag `name` as a number on every TOA that carries it.
    pub fn get_flag_value(&self, name: &str) -> ResidualResult<FlagColumn> {
        let mut column = FlagColumn::default();
        for (idx, toa) in self.toas.iter().enumerate() {
            let Some(raw) = toa.flags.get(name) else {
                continue;
            };
            let value: f64 = raw.trim().parse().map_err(|_| {
                ResidualError::data_quality(format!(
                    "TOA {idx}: flag '{name}' has non-numeric value '{raw}'"
                ))
            })?;
            column.values.push(value);
            column.indices.push(idx);
        }
        Ok(column)
    }

    pub fn set_flag(
        &mut self,
        index: usize,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> ResidualResult<()> {
        let len = self.toas.len();
        let toa = self.toas.get_mut(index).ok_or_else(|| {
            ResidualError::data_quality(format!("TOA index {index} out of range ({len} TOAs)"))
        })?;
        toa.flags.insert(name.into(), value.into());
        Ok(())
    }

    /// Pulse numbers for every TOA, or `None` if any TOA lacks one.
    pub fn get_pulse_numbers(&self) -> Option<Vec<f64>> {
        self.toas.iter().map(|t| t.pulse_number).collect()
    }

    pub fn set_pulse_numbers(&mut self, pulse_numbers: &[f64]) -> ResidualResult<()> {
        self.check_len(pulse_numbers.len(), "pulse numbers")?;
        for (toa, &pn) in self.toas.iter_mut().zip(pulse_numbers) {
            toa.pulse_number = Some(pn);
        }
        Ok(())
    }

    pub fn get_delta_pulse_numbers(&self) -> Vec<f64> {
        self.toas.iter().map(|t| t.delta_pulse_number).collect()
    }

    pub fn set_delta_pulse_numbers(&mut self, deltas: &[f64]) -> ResidualResult<()> {
        self.check_len(deltas.len(), "delta pulse numbers")?;
        for (toa, &d) in self.toas.iter_mut().zip(deltas) {
            toa.delta_pulse_number = d;
        }
        Ok(())
    }

    fn check_len(&self, got: usize, what: &str) -> ResidualResult<()> {
        if got != self.toas.len() {
            return Err(ResidualError::data_quality(format!(
                "{got} {what} supplied for {} TOAs",
                self.toas.len()
            )));
        }
        Ok(())
    }
}

impl FromIterator<Toa> for ObservationSet {
    fn from_iter<I: IntoIterator<Item = Toa>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Convert an MJD to a UTC timestamp (millisecond resolution).
pub fn mjd_to_datetime(mjd: f64) -> Option<NaiveDateTime> {
    if !mjd.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1858, 11, 17)?.and_hms_opt(0, 0, 0)?;
    let millis = (mjd * SECS_PER_DAY * 1e3).round() as i64;
    epoch.checked_add_signed(Duration::try_milliseconds(millis)?)
}
