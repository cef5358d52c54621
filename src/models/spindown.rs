//! Reference spin-down timing model.
//!
//! Phase is a Taylor series in emission time:
//!
//! ```text
//! φ(t) = F0 Δt + F1 Δt² / 2,   Δt = (t − PEPOCH) − D(DM, f)
//! ```
//!
//! with the cold-plasma dispersion delay `D = DM / (K f²)`, `K = 2.41e-4`
//! (MHz⁻² pc cm⁻³ s⁻¹). DM evolves linearly: `DM(t) = DM + DM1 (t − PEPOCH)/yr`.
//! Absolute phase is referenced to a zero-phase TOA at `TZRMJD`, infinite frequency.

use crate::data::{ObservationSet, SECS_PER_DAY};
use crate::domain::Parameter;
use crate::error::{ResidualError, ResidualResult};
use crate::math::Phase;
use crate::models::model::{
    spin_frequency, NoiseComponent, TimingModel, TRACK_PARAM, TRACK_USE_PULSE_NUMBERS,
};

/// Dispersion constant (MHz⁻² pc cm⁻³ s⁻¹).
pub const DM_CONST: f64 = 2.41e-4;

const DAYS_PER_YEAR: f64 = 365.25;

pub struct SpinDownModel {
    params: Vec<Parameter>,
    noise: Vec<Box<dyn NoiseComponent>>,
}

impl std::fmt::Debug for SpinDownModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinDownModel")
            .field("params", &self.params)
            .field(
                "noise",
                &self.noise.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SpinDownModel {
    /// A model with spin frequency `f0` (Hz) referenced at `pepoch` (MJD).
    ///
    /// All parameters start frozen; `TZRMJD` defaults to `pepoch`.
    pub fn new(f0: f64, pepoch: f64) -> Self {
        Self {
            params: vec![
                Parameter::new("PEPOCH", pepoch, "d"),
                Parameter::new("TZRMJD", pepoch, "d"),
                Parameter::new("F0", f0, "Hz"),
                Parameter::new("F1", 0.0, "Hz/s"),
                Parameter::new("DM", 0.0, "pc/cm3"),
                Parameter::new("DM1", 0.0, "pc/cm3/yr"),
            ],
            noise: Vec::new(),
        }
    }

    pub fn with_f1(mut self, f1: f64) -> Self {
        self.put("F1", f1, "Hz/s");
        self
    }

    pub fn with_dm(mut self, dm: f64, dm1: f64) -> Self {
        self.put("DM", dm, "pc/cm3");
        self.put("DM1", dm1, "pc/cm3/yr");
        self
    }

    pub fn with_tzr_mjd(mut self, mjd: f64) -> Self {
        self.put("TZRMJD", mjd, "d");
        self
    }

    /// Force pulse-number tracking (`TRACK -2`).
    pub fn with_pulse_number_tracking(mut self) -> Self {
        self.put(TRACK_PARAM, TRACK_USE_PULSE_NUMBERS, "");
        self
    }

    pub fn with_noise(mut self, component: impl NoiseComponent + 'static) -> Self {
        self.noise.push(Box::new(component));
        self
    }

    /// Add a parameter, replacing any existing one of the same name.
    pub fn with_param(mut self, param: Parameter) -> Self {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        self
    }

    pub fn without_param(mut self, name: &str) -> Self {
        self.params.retain(|p| p.name != name);
        self
    }

    /// Mark the named parameters as free.
    pub fn with_free(mut self, names: &[&str]) -> ResidualResult<Self> {
        for name in names {
            self.param_mut(name)?.frozen = false;
        }
        Ok(self)
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> ResidualResult<()> {
        self.param_mut(name)?.value = value;
        Ok(())
    }

    fn param_mut(&mut self, name: &str) -> ResidualResult<&mut Parameter> {
        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ResidualError::config(format!("model has no parameter '{name}'")))
    }

    fn put(&mut self, name: &str, value: f64, unit: &str) {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(p) => p.value = value,
            None => self.params.push(Parameter::new(name, value, unit)),
        }
    }

    fn value(&self, name: &str) -> f64 {
        self.param(name).map_or(0.0, |p| p.value)
    }

    fn dm_at(&self, mjd: f64) -> f64 {
        self.value("DM") + self.value("DM1") * (mjd - self.value("PEPOCH")) / DAYS_PER_YEAR
    }

    fn spin_phase(&self, f0: f64, mjd: f64, freq_mhz: f64) -> Phase {
        let delay = if freq_mhz.is_finite() && freq_mhz > 0.0 {
            self.dm_at(mjd) / (DM_CONST * freq_mhz * freq_mhz)
        } else {
            0.0
        };
        // Elapsed seconds as hi + lo so neither product drops low-order bits.
        let days = mjd - self.value("PEPOCH");
        let dt_hi = days * SECS_PER_DAY;
        let dt_lo = days.mul_add(SECS_PER_DAY, -dt_hi) - delay;
        let dt = dt_hi + dt_lo;

        Phase::from_product(f0, dt_hi)
            + Phase::from_cycles(f0 * dt_lo)
            + Phase::from_cycles(0.5 * self.value("F1") * dt * dt)
    }
}

impl TimingModel for SpinDownModel {
    fn phase(&self, toas: &ObservationSet, abs_phase: bool) -> ResidualResult<Vec<Phase>> {
        let f0 = spin_frequency(self)?;
        let reference = if abs_phase {
            self.spin_phase(f0, self.value("TZRMJD"), f64::INFINITY)
        } else {
            Phase::default()
        };
        Ok(toas
            .toas()
            .iter()
            .map(|toa| self.spin_phase(f0, toa.mjd, toa.freq_mhz) - reference)
            .collect())
    }

    fn dm_value(&self, toas: &ObservationSet) -> ResidualResult<Vec<f64>> {
        Ok(toas.toas().iter().map(|toa| self.dm_at(toa.mjd)).collect())
    }

    fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn noise_components(&self) -> Vec<&dyn NoiseComponent> {
        self.noise
            .iter()
            .map(|c| &**c as &dyn NoiseComponent)
            .collect()
    }
}
