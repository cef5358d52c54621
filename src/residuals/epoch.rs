//! Epoch-averaged residuals under an ECORR noise model.
//!
//! Each ECORR quantisation bucket (one observing epoch) collapses to a single
//! point. With `w = 1/σ²` and the 0/1 basis `U`:
//!
//! ```text
//! a   = Uᵀ w
//! avg = Uᵀ (w · x) / a
//! err = sqrt(1/a + φ)
//! ```
//!
//! `φ` is the ECORR variance of the bucket, or zero when the noise model is
//! ignored.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::data::mjd_to_datetime;
use crate::error::{ResidualError, ResidualResult};
use crate::math::inverse_variance_weights;
use crate::models::NoiseCategory;
use crate::residuals::toa::Residuals;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochAverages {
    pub mjds: Vec<f64>,
    pub freqs: Vec<f64>,
    /// Seconds.
    pub time_resids: Vec<f64>,
    pub noise_resids: BTreeMap<String, Vec<f64>>,
    /// Seconds.
    pub errors: Vec<f64>,
    /// TOA indices averaged into each epoch.
    pub indices: Vec<Vec<usize>>,
}

impl EpochAverages {
    pub fn len(&self) -> usize {
        self.mjds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mjds.is_empty()
    }

    /// Averaged epochs as UTC timestamps.
    pub fn dates(&self) -> Vec<Option<NaiveDateTime>> {
        self.mjds.iter().map(|&mjd| mjd_to_datetime(mjd)).collect()
    }
}

struct EpochColumn {
    mjd: f64,
    freq: f64,
    time_resid: f64,
    noise: Vec<f64>,
    error: f64,
    indices: Vec<usize>,
}

impl Residuals {
    /// Average residuals within ECORR epochs.
    ///
    /// With `use_noise_model` the model's scaled uncertainties are used and
    /// the ECORR variance is added to each epoch error; otherwise raw TOA
    /// uncertainties and no ECORR contribution.
    pub fn ecorr_average(&self, use_noise_model: bool) -> ResidualResult<EpochAverages> {
        let (toas, model) = self.inputs()?;

        let ecorr = model
            .components_by_category(NoiseCategory::Ecorr)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResidualError::config("ECORR averaging requires an ECORR noise component")
            })?;
        let (basis, mut phi) = ecorr.basis_weight_pair(&toas).ok_or_else(|| {
            ResidualError::config(format!("{} provides no quantisation basis", ecorr.name()))
        })?;
        if !use_noise_model {
            phi.fill(0.0);
        }

        let sigma = if use_noise_model {
            model.scaled_toa_uncertainty(&toas)
        } else {
            toas.get_errors_s()
        };
        let weights = inverse_variance_weights(&sigma, "TOA")?;

        let mjds = toas.get_mjds();
        let freqs = toas.get_freqs();
        let noise_names: Vec<&String> = self.noise_resids().keys().collect();
        let noise_values: Vec<&[f64]> = self.noise_resids().values().map(Vec::as_slice).collect();
        let time_resids = self.time_resids();
        if time_resids.len() != toas.len() {
            return Err(ResidualError::data_quality(format!(
                "{} residuals for {} TOAs",
                time_resids.len(),
                toas.len()
            )));
        }
        for (name, series) in noise_names.iter().zip(&noise_values) {
            if series.len() != toas.len() {
                return Err(ResidualError::data_quality(format!(
                    "noise residuals '{name}' have {} entries for {} TOAs",
                    series.len(),
                    toas.len()
                )));
            }
        }

        let columns: Vec<EpochColumn> = (0..basis.ncols())
            .into_par_iter()
            .map(|j| {
                average_column(
                    &basis,
                    &phi,
                    j,
                    &weights,
                    &mjds,
                    &freqs,
                    time_resids,
                    &noise_values,
                )
            })
            .collect::<ResidualResult<_>>()?;

        let mut averages = EpochAverages {
            mjds: Vec::with_capacity(columns.len()),
            freqs: Vec::with_capacity(columns.len()),
            time_resids: Vec::with_capacity(columns.len()),
            noise_resids: noise_names
                .iter()
                .map(|name| ((*name).clone(), Vec::with_capacity(columns.len())))
                .collect(),
            errors: Vec::with_capacity(columns.len()),
            indices: Vec::with_capacity(columns.len()),
        };
        for column in columns {
            averages.mjds.push(column.mjd);
            averages.freqs.push(column.freq);
            averages.time_resids.push(column.time_resid);
            averages.errors.push(column.error);
            averages.indices.push(column.indices);
            for (name, value) in noise_names.iter().zip(column.noise) {
                if let Some(series) = averages.noise_resids.get_mut(*name) {
                    series.push(value);
                }
            }
        }

        debug!(
            n_toas = toas.len(),
            n_epochs = averages.len(),
            use_noise_model,
            "averaged residuals over ECORR epochs"
        );
        Ok(averages)
    }
}

#[allow(clippy::too_many_arguments)]
fn average_column(
    basis: &DMatrix<f64>,
    phi: &DVector<f64>,
    j: usize,
    weights: &[f64],
    mjds: &[f64],
    freqs: &[f64],
    time_resids: &[f64],
    noise: &[&[f64]],
) -> ResidualResult<EpochColumn> {
    let column = basis.column(j);
    let indices: Vec<usize> = column
        .iter()
        .enumerate()
        .filter(|(_, u)| **u != 0.0)
        .map(|(i, _)| i)
        .collect();

    let norm: f64 = indices.iter().map(|&i| column[i] * weights[i]).sum();
    if !(norm > 0.0 && norm.is_finite()) {
        return Err(ResidualError::data_quality(format!(
            "epoch {j} has zero total weight"
        )));
    }
    let avg = |x: &[f64]| -> f64 {
        indices
            .iter()
            .map(|&i| column[i] * weights[i] * x[i])
            .sum::<f64>()
            / norm
    };

    Ok(EpochColumn {
        mjd: avg(mjds),
        freq: avg(freqs),
        time_resid: avg(time_resids),
        noise: noise.iter().map(|&series| avg(series)).collect(),
        error: (1.0 / norm + phi[j]).sqrt(),
        indices,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::{ObservationSet, SECS_PER_DAY, SimulationConfig, Toa, simulate_toas};
    use crate::domain::ResidualConfig;
    use crate::models::{EcorrNoise, SpinDownModel, WhiteNoise};

    const F0: f64 = 61.5;

    /// Four epochs of two TOAs each with distinct uncertainties.
    fn epochs(model: &SpinDownModel) -> ObservationSet {
        let config = SimulationConfig {
            n_epochs: 4,
            freqs_mhz: vec![1400.0, 820.0],
            ..SimulationConfig::default()
        };
        let base = simulate_toas(model, &config).unwrap();
        base.toas()
            .iter()
            .enumerate()
            .map(|(i, toa)| {
                let mut toa = toa.clone();
                toa.error_us = 1.0 + i as f64;
                toa
            })
            .collect()
    }

    fn residuals(model: SpinDownModel) -> Residuals {
        let toas = epochs(&model);
        Residuals::new(Arc::new(toas), Arc::new(model), ResidualConfig::default()).unwrap()
    }

    #[test]
    fn weights_are_conserved_without_ecorr_contribution() {
        let res = residuals(SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(3.0)));
        let avg = res.ecorr_average(false).unwrap();
        assert_eq!(avg.len(), 4);

        let toa_weight: f64 = res
            .toas()
            .unwrap()
            .get_errors_s()
            .iter()
            .map(|e| 1.0 / (e * e))
            .sum();
        let epoch_weight: f64 = avg.errors.iter().map(|e| 1.0 / (e * e)).sum();
        assert!((toa_weight - epoch_weight).abs() < 1e-9 * toa_weight);
    }

    #[test]
    fn ecorr_variance_widens_epoch_errors() {
        let res = residuals(SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(3.0)));
        let plain = res.ecorr_average(false).unwrap();
        let noisy = res.ecorr_average(true).unwrap();
        for (p, n) in plain.errors.iter().zip(&noisy.errors) {
            let expected = (p * p + 9e-12).sqrt();
            assert!((n - expected).abs() < 1e-12, "{n} vs {expected}");
        }
    }

    #[test]
    fn noise_model_uses_scaled_uncertainties() {
        let model = SpinDownModel::new(F0, 55500.0)
            .with_noise(WhiteNoise::new(2.0, 0.0))
            .with_noise(EcorrNoise::uniform(0.0));
        let res = residuals(model);
        let raw = res.ecorr_average(false).unwrap();
        let scaled = res.ecorr_average(true).unwrap();
        for (r, s) in raw.errors.iter().zip(&scaled.errors) {
            assert!((s - 2.0 * r).abs() < 1e-15, "{s} vs {r}");
        }
    }

    #[test]
    fn averages_are_inverse_variance_weighted() {
        let model = SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(1.0));
        let toas = ObservationSet::new(vec![
            Toa::new(55000.0, 1400.0, 1.0),
            Toa::new(55000.0 + 0.1 / SECS_PER_DAY, 700.0, 2.0),
        ]);
        let mut res =
            Residuals::new(Arc::new(toas), Arc::new(model), ResidualConfig::default()).unwrap();
        res.set_noise_resids("red", vec![4.0, -1.0]).unwrap();

        let avg = res.ecorr_average(false).unwrap();
        assert_eq!(avg.indices, vec![vec![0, 1]]);
        // Weights 1 and 1/4.
        assert!((avg.freqs[0] - (1400.0 + 700.0 / 4.0) / 1.25).abs() < 1e-9);
        assert!((avg.noise_resids["red"][0] - (4.0 - 0.25) / 1.25).abs() < 1e-12);

        let tr = res.time_resids();
        let expected = (tr[0] + tr[1] / 4.0) / 1.25;
        assert!((avg.time_resids[0] - expected).abs() < 1e-15);
    }

    #[test]
    fn noise_series_follow_the_attached_toas() {
        let model = || SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(1.0));
        let pair = ObservationSet::new(vec![
            Toa::new(55000.0, 1400.0, 1.0),
            Toa::new(55000.0 + 0.1 / SECS_PER_DAY, 700.0, 2.0),
        ]);
        let mut res =
            Residuals::new(Arc::new(pair.clone()), Arc::new(model()), ResidualConfig::default())
                .unwrap();
        res.set_noise_resids("red", vec![4.0, -1.0]).unwrap();

        // Same TOA count: the series still lines up.
        res.set_toas(Arc::new(pair)).unwrap();
        assert_eq!(res.noise_resids()["red"], vec![4.0, -1.0]);

        res.set_toas(Arc::new(epochs(&model()))).unwrap();
        assert!(res.noise_resids().is_empty());
        let avg = res.ecorr_average(false).unwrap();
        assert_eq!(avg.len(), 4);
        assert!(avg.noise_resids.is_empty());
    }

    #[test]
    fn lone_toas_are_not_averaged() {
        let model = SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(1.0));
        let toas = ObservationSet::new(vec![
            Toa::new(55000.0, 1400.0, 1.0),
            Toa::new(55000.0 + 0.1 / SECS_PER_DAY, 1400.0, 1.0),
            Toa::new(55100.0, 1400.0, 1.0),
        ]);
        let res =
            Residuals::new(Arc::new(toas), Arc::new(model), ResidualConfig::default()).unwrap();
        let avg = res.ecorr_average(false).unwrap();
        assert_eq!(avg.len(), 1);
        assert_eq!(avg.indices[0], vec![0, 1]);
    }

    #[test]
    fn averaging_requires_ecorr() {
        let res = residuals(SpinDownModel::new(F0, 55500.0));
        let err = res.ecorr_average(true).unwrap_err();
        assert!(matches!(err, ResidualError::Config(_)));
    }

    #[test]
    fn dates_follow_mjds() {
        let res = residuals(SpinDownModel::new(F0, 55500.0).with_noise(EcorrNoise::uniform(1.0)));
        let avg = res.ecorr_average(false).unwrap();
        let dates = avg.dates();
        assert_eq!(dates.len(), avg.len());
        let first = dates[0].unwrap();
        assert_eq!(first.date(), chrono::NaiveDate::from_ymd_opt(2009, 6, 18).unwrap());
    }
}
