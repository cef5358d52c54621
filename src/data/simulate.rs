//! Synthetic TOA generation from a timing model.
//!
//! TOAs are laid out in observing epochs (several frequencies a few
//! milliseconds apart), nudged onto integer model phase, and optionally
//! perturbed with Gaussian noise of the stated uncertainty. Wideband DM
//! measurements can be attached as `pp_dm` / `pp_dme` flags.
//!
//! Generation is deterministic for a given seed.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::data::toas::{ObservationSet, SECS_PER_DAY, Toa};
use crate::error::{ResidualError, ResidualResult};
use crate::models::{TimingModel, spin_frequency};

/// Seconds between consecutive TOAs within one epoch.
const INTRA_EPOCH_SPACING_S: f64 = 0.01;

/// Phase-snapping passes; each removes the residual left by the last.
const SNAP_ITERATIONS: usize = 3;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub n_epochs: usize,
    pub mjd_start: f64,
    pub mjd_end: f64,
    /// One TOA per frequency at every epoch.
    pub freqs_mhz: Vec<f64>,
    pub error_us: f64,
    pub add_noise: bool,
    /// Attach wideband DM measurements with this uncertainty.
    pub dm_error: Option<f64>,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_epochs: 10,
            mjd_start: 55000.0,
            mjd_end: 56000.0,
            freqs_mhz: vec![1400.0],
            error_us: 1.0,
            add_noise: false,
            dm_error: None,
            seed: 42,
        }
    }
}

/// Generate TOAs consistent with `model`.
pub fn simulate_toas(
    model: &dyn TimingModel,
    config: &SimulationConfig,
) -> ResidualResult<ObservationSet> {
    if config.n_epochs == 0 || config.freqs_mhz.is_empty() {
        return Err(ResidualError::config("simulation needs at least one epoch and one frequency"));
    }
    if !(config.mjd_end >= config.mjd_start) {
        return Err(ResidualError::config(format!(
            "invalid MJD range {}..{}",
            config.mjd_start, config.mjd_end
        )));
    }
    if !(config.error_us.is_finite() && config.error_us >= 0.0) {
        return Err(ResidualError::config("TOA uncertainty must be finite and non-negative"));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ResidualError::config(format!("noise distribution error: {e}")))?;

    let step = if config.n_epochs > 1 {
        (config.mjd_end - config.mjd_start) / (config.n_epochs as f64 - 1.0)
    } else {
        0.0
    };

    let mut toas = Vec::with_capacity(config.n_epochs * config.freqs_mhz.len());
    for epoch in 0..config.n_epochs {
        let epoch_mjd = config.mjd_start + step * epoch as f64;
        for (k, &freq) in config.freqs_mhz.iter().enumerate() {
            let offset_days = k as f64 * INTRA_EPOCH_SPACING_S / SECS_PER_DAY;
            toas.push(Toa::new(epoch_mjd + offset_days, freq, config.error_us));
        }
    }
    let mut set = ObservationSet::new(toas);

    snap_to_integer_phase(model, &mut set)?;

    let mut toas = set.toas().to_vec();
    if config.add_noise {
        let error_days = config.error_us * 1e-6 / SECS_PER_DAY;
        for toa in &mut toas {
            toa.mjd += error_days * normal.sample(&mut rng);
        }
    }

    if let Some(dm_error) = config.dm_error {
        let dm = model.dm_value(&set)?;
        for (toa, dm) in toas.iter_mut().zip(dm) {
            let measured = if config.add_noise {
                dm + dm_error * normal.sample(&mut rng)
            } else {
                dm
            };
            toa.flags.insert("pp_dm".to_string(), format!("{measured}"));
            toa.flags.insert("pp_dme".to_string(), format!("{dm_error}"));
        }
    }

    Ok(ObservationSet::new(toas))
}

/// Shift every TOA so the model's absolute phase is (nearly) integral.
fn snap_to_integer_phase(model: &dyn TimingModel, set: &mut ObservationSet) -> ResidualResult<()> {
    let f0 = spin_frequency(model)?;
    if !(f0.is_finite() && f0 > 0.0) {
        return Err(ResidualError::config(format!("cannot simulate with spin frequency {f0}")));
    }

    for _ in 0..SNAP_ITERATIONS {
        let phases = model.phase(set, true)?;
        let shifted: Vec<Toa> = set
            .toas()
            .iter()
            .zip(&phases)
            .map(|(toa, phase)| {
                let mut toa = toa.clone();
                toa.mjd -= phase.frac / f0 / SECS_PER_DAY;
                toa
            })
            .collect();
        *set = ObservationSet::new(shifted);
    }
    Ok(())
}
