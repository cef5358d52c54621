//! TOA residuals: phase residuals, time residuals and chi-squared.
//!
//! Pipeline on every `update()`:
//!
//! 1. model phase (+ per-TOA phase jumps) under the tracking policy
//! 2. optional mean subtraction (plain or `1/σ²`-weighted)
//! 3. scale to time by the spin frequency
//! 4. recount degrees of freedom and invalidate the chi-squared memo
//!
//! Chi-squared is computed on first access. Models with correlated noise are
//! scored by a `CorrelatedChi2` evaluator; a degenerate covariance scores `+∞`
//! so optimizers treat the point as merely bad.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::ObservationSet;
use crate::domain::{ResidualConfig, ResidualKind, ResidualUnit, TrackMode};
use crate::error::{ResidualError, ResidualResult};
use crate::math::{CholeskyGls, CorrelatedChi2, Phase, inverse_variance_weights, weighted_mean_sdev};
use crate::models::{TimingModel, forces_pulse_number_tracking, spin_frequency};
use crate::residuals::memo::GenerationMemo;
use crate::residuals::{ResidualSource, independent_chi2};

pub struct Residuals {
    toas: Option<Arc<ObservationSet>>,
    model: Option<Arc<dyn TimingModel>>,
    config: ResidualConfig,
    /// Tracking mode in effect (the model may override the requested one).
    track_mode: TrackMode,
    unit: ResidualUnit,
    spin_freq: f64,
    phase_resids: Vec<f64>,
    /// Seconds.
    time_resids: Vec<f64>,
    dof: i64,
    noise_resids: BTreeMap<String, Vec<f64>>,
    evaluator: Box<dyn CorrelatedChi2>,
    chi2: GenerationMemo,
}

impl std::fmt::Debug for Residuals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Residuals")
            .field("n_toas", &self.time_resids.len())
            .field("track_mode", &self.track_mode)
            .field("unit", &self.unit)
            .field("dof", &self.dof)
            .field("generation", &self.chi2.generation())
            .finish()
    }
}

impl Residuals {
    /// Compute residuals of `toas` against `model`.
    pub fn new(
        toas: Arc<ObservationSet>,
        model: Arc<dyn TimingModel>,
        config: ResidualConfig,
    ) -> ResidualResult<Self> {
        let mut residuals = Self::detached(config)?;
        residuals.toas = Some(toas);
        residuals.model = Some(model);
        residuals.update()?;
        Ok(residuals)
    }

    /// A residual entity with no inputs attached yet.
    pub fn detached(config: ResidualConfig) -> ResidualResult<Self> {
        let unit = config.resolve_unit(ResidualKind::Toa)?;
        Ok(Self {
            toas: None,
            model: None,
            track_mode: config.track_mode,
            config,
            unit,
            spin_freq: f64::NAN,
            phase_resids: Vec::new(),
            time_resids: Vec::new(),
            dof: 0,
            noise_resids: BTreeMap::new(),
            evaluator: Box::new(CholeskyGls),
            chi2: GenerationMemo::new(),
        })
    }

    /// Replace the correlated-noise chi-squared evaluator.
    pub fn with_evaluator(mut self, evaluator: impl CorrelatedChi2 + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self.chi2.bump();
        self
    }

    /// Recompute every derived quantity from the attached TOAs and model.
    pub fn update(&mut self) -> ResidualResult<()> {
        let (toas, model) = self.inputs()?;

        let track_mode = if forces_pulse_number_tracking(model.as_ref()) {
            TrackMode::UsePulseNumbers
        } else {
            self.config.track_mode
        };
        let phase_resids = calc_phase_resids(
            &toas,
            model.as_ref(),
            track_mode,
            self.config.subtract_mean,
            self.config.use_weighted_mean,
        )?;
        let spin_freq = spin_frequency(model.as_ref())?;
        let time_resids = phase_resids.iter().map(|p| p / spin_freq).collect();
        let dof = dof_for(&toas, model.as_ref());

        self.track_mode = track_mode;
        self.spin_freq = spin_freq;
        self.phase_resids = phase_resids;
        self.time_resids = time_resids;
        self.dof = dof;
        // Per-TOA contributions from a different observation set are meaningless.
        self.noise_resids.retain(|_, series| series.len() == toas.len());
        self.chi2.bump();

        debug!(
            n_toas = toas.len(),
            dof,
            ?track_mode,
            generation = self.chi2.generation(),
            "recomputed TOA residuals"
        );
        Ok(())
    }

    /// Attach new TOAs; recomputes when a model is attached too.
    ///
    /// If the recomputation fails the previous TOAs are restored, leaving the
    /// entity exactly as it was.
    pub fn set_toas(&mut self, toas: Arc<ObservationSet>) -> ResidualResult<()> {
        let previous = self.toas.replace(toas);
        if let Err(e) = self.refresh_if_attached() {
            self.toas = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Attach a new model; recomputes when TOAs are attached too.
    ///
    /// If the recomputation fails the previous model is restored.
    pub fn set_model(&mut self, model: Arc<dyn TimingModel>) -> ResidualResult<()> {
        let previous = self.model.replace(model);
        if let Err(e) = self.refresh_if_attached() {
            self.model = previous;
            return Err(e);
        }
        Ok(())
    }

    fn refresh_if_attached(&mut self) -> ResidualResult<()> {
        if self.toas.is_some() && self.model.is_some() {
            return self.update();
        }
        self.phase_resids.clear();
        self.time_resids.clear();
        self.chi2.bump();
        Ok(())
    }

    pub(crate) fn inputs(&self) -> ResidualResult<(Arc<ObservationSet>, Arc<dyn TimingModel>)> {
        let toas = self
            .toas
            .clone()
            .ok_or_else(|| ResidualError::config("no TOAs attached to residuals"))?;
        let model = self
            .model
            .clone()
            .ok_or_else(|| ResidualError::config("no timing model attached to residuals"))?;
        Ok((toas, model))
    }

    pub fn toas(&self) -> Option<&ObservationSet> {
        self.toas.as_deref()
    }

    pub fn model(&self) -> Option<&dyn TimingModel> {
        self.model.as_deref()
    }

    pub fn config(&self) -> &ResidualConfig {
        &self.config
    }

    pub fn track_mode(&self) -> TrackMode {
        self.track_mode
    }

    pub fn unit(&self) -> ResidualUnit {
        self.unit
    }

    /// Generation of the derived state; bumps on every recomputation.
    pub fn generation(&self) -> u64 {
        self.chi2.generation()
    }

    /// Phase residuals (cycles).
    pub fn phase_resids(&self) -> &[f64] {
        &self.phase_resids
    }

    /// Time residuals (seconds).
    pub fn time_resids(&self) -> &[f64] {
        &self.time_resids
    }

    /// Time residuals when `scaled_by_f0`, phase residuals otherwise.
    pub fn resids(&self) -> &[f64] {
        if self.config.scaled_by_f0 {
            &self.time_resids
        } else {
            &self.phase_resids
        }
    }

    /// `resids()` expressed in the output unit.
    ///
    /// Phase residuals get the same multiplier as time residuals, so the two
    /// modes differ by exactly one factor of F0.
    pub fn resids_value(&self) -> Vec<f64> {
        let scale = self.unit.scale_from_base();
        self.resids().iter().map(|r| r * scale).collect()
    }

    /// TOA uncertainties in the same unit as `resids_value()`.
    pub fn data_error(&self) -> Vec<f64> {
        let Some(toas) = self.toas.as_deref() else {
            return Vec::new();
        };
        let mut scale = self.unit.scale_from_base();
        if !self.config.scaled_by_f0 {
            scale *= self.spin_freq;
        }
        toas.get_errors_s().iter().map(|e| e * scale).collect()
    }

    /// Spin frequency of the attached model (Hz).
    pub fn get_psr_freq(&self) -> ResidualResult<f64> {
        let (_, model) = self.inputs()?;
        spin_frequency(model.as_ref())
    }

    pub fn dof(&self) -> i64 {
        self.dof
    }

    /// Degrees of freedom for the attached inputs: `n − n_free − 1`.
    pub fn get_dof(&self) -> ResidualResult<i64> {
        let (toas, model) = self.inputs()?;
        Ok(dof_for(&toas, model.as_ref()))
    }

    /// Memoized chi-squared (diagonal-solve path for correlated noise).
    pub fn chi2(&self) -> ResidualResult<f64> {
        self.chi2.get_or_try_compute(|| self.calc_chi2(false))
    }

    pub fn chi2_reduced(&self) -> ResidualResult<f64> {
        Ok(self.chi2()? / self.dof as f64)
    }

    /// Reduced chi-squared computed afresh, bypassing the memo.
    pub fn get_reduced_chi2(&self) -> ResidualResult<f64> {
        Ok(self.calc_chi2(false)? / self.get_dof()? as f64)
    }

    /// Chi-squared of the current time residuals.
    ///
    /// `full_cov` asks the correlated-noise evaluator for a dense covariance
    /// solve instead of the Woodbury form. Independent noise ignores it.
    pub fn calc_chi2(&self, full_cov: bool) -> ResidualResult<f64> {
        let (toas, model) = self.inputs()?;
        if !model.has_correlated_errors() {
            return Ok(independent_chi2(&self.time_resids, &toas.get_errors_s()));
        }

        match self
            .evaluator
            .chi2(&toas, model.as_ref(), &self.time_resids, full_cov)
        {
            Ok(chi2) => Ok(chi2),
            Err(ResidualError::Degenerate(reason)) => {
                warn!(%reason, "degenerate conditions encountered when computing chi-squared");
                Ok(f64::INFINITY)
            }
            Err(e) => Err(e),
        }
    }

    /// Weighted RMS of the time residuals, in the output unit.
    pub fn rms_weighted(&self) -> ResidualResult<f64> {
        let (toas, _) = self.inputs()?;
        let weights = inverse_variance_weights(&toas.get_errors_s(), "TOA")?;
        let spread = weighted_mean_sdev(&self.time_resids, &weights)?;
        Ok(spread.sdev * self.unit.scale_from_base())
    }

    pub fn calc_phase_resids(&self) -> ResidualResult<Vec<f64>> {
        let (toas, model) = self.inputs()?;
        calc_phase_resids(
            &toas,
            model.as_ref(),
            self.track_mode,
            self.config.subtract_mean,
            self.config.use_weighted_mean,
        )
    }

    /// Time residuals (s) from freshly computed phase residuals.
    pub fn calc_time_resids(&self) -> ResidualResult<Vec<f64>> {
        let f0 = self.get_psr_freq()?;
        Ok(self
            .calc_phase_resids()?
            .into_iter()
            .map(|p| p / f0)
            .collect())
    }

    /// Per-noise-component residual contributions (seconds), keyed by component.
    pub fn noise_resids(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.noise_resids
    }

    /// Record a noise component's residual contribution (written by fitters).
    pub fn set_noise_resids(
        &mut self,
        component: impl Into<String>,
        resids: Vec<f64>,
    ) -> ResidualResult<()> {
        if resids.len() != self.time_resids.len() {
            return Err(ResidualError::data_quality(format!(
                "noise residuals have {} entries for {} TOAs",
                resids.len(),
                self.time_resids.len()
            )));
        }
        self.noise_resids.insert(component.into(), resids);
        Ok(())
    }
}

impl ResidualSource for Residuals {
    fn kind(&self) -> ResidualKind {
        ResidualKind::Toa
    }

    fn unit(&self) -> ResidualUnit {
        self.unit
    }

    fn resids_value(&self) -> Vec<f64> {
        Residuals::resids_value(self)
    }

    fn data_error(&self) -> Vec<f64> {
        Residuals::data_error(self)
    }

    fn chi2(&self) -> ResidualResult<f64> {
        Residuals::chi2(self)
    }
}

fn dof_for(toas: &ObservationSet, model: &dyn TimingModel) -> i64 {
    // The trailing 1 is the implicit global phase offset.
    toas.len() as i64 - model.free_param_count() as i64 - 1
}

/// Phase residuals (cycles) of `toas` against `model`.
pub fn calc_phase_resids(
    toas: &ObservationSet,
    model: &dyn TimingModel,
    track_mode: TrackMode,
    subtract_mean: bool,
    use_weighted_mean: bool,
) -> ResidualResult<Vec<f64>> {
    let deltas = toas.get_delta_pulse_numbers();

    let mut full: Vec<f64> = match track_mode {
        TrackMode::UsePulseNumbers => {
            let pulse_numbers = toas.get_pulse_numbers().ok_or_else(|| {
                ResidualError::data_quality(
                    "pulse numbers missing from TOAs but track mode requires them",
                )
            })?;
            let model_phase = model.phase(toas, true)?;
            model_phase
                .iter()
                .zip(&deltas)
                .zip(&pulse_numbers)
                .map(|((&phase, &delta), &pn)| {
                    let resid =
                        phase + Phase::from_cycles(delta) - Phase::from_pulse_number(pn);
                    resid.value()
                })
                .collect()
        }
        TrackMode::Nearest => {
            let mut model_phase: Vec<Phase> = model
                .phase(toas, false)?
                .iter()
                .zip(&deltas)
                .map(|(&phase, &delta)| phase + Phase::from_cycles(delta))
                .collect();
            // The first TOA becomes the zero reference, but only when the mean
            // is subtracted afterwards.
            if subtract_mean {
                if let Some(&reference) = model_phase.first() {
                    for phase in &mut model_phase {
                        *phase = *phase - reference;
                    }
                }
            }
            model_phase.iter().map(|phase| phase.frac).collect()
        }
    };

    if subtract_mean {
        super::subtract_mean(&mut full, &toas.get_errors(), use_weighted_mean, "TOA")?;
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SECS_PER_DAY, SimulationConfig, Toa, simulate_toas};
    use crate::models::{EcorrNoise, SpinDownModel, compute_pulse_numbers};

    const F0: f64 = 173.7;

    fn model() -> SpinDownModel {
        SpinDownModel::new(F0, 55500.0)
    }

    /// TOAs at integer phase, then offset by known amounts of time (seconds).
    fn toas_with_offsets(model: &SpinDownModel, offsets_s: &[f64], error_us: f64) -> ObservationSet {
        let config = SimulationConfig {
            n_epochs: offsets_s.len(),
            error_us,
            ..SimulationConfig::default()
        };
        let base = simulate_toas(model, &config).unwrap();
        base.toas()
            .iter()
            .zip(offsets_s)
            .map(|(toa, dt)| {
                let mut toa = toa.clone();
                toa.mjd += dt / SECS_PER_DAY;
                toa
            })
            .collect()
    }

    fn build(toas: ObservationSet, model: SpinDownModel, config: ResidualConfig) -> Residuals {
        Residuals::new(Arc::new(toas), Arc::new(model), config).unwrap()
    }

    #[test]
    fn chi2_matches_sum_of_squares_for_white_noise() {
        let m = model();
        let toas = toas_with_offsets(&m, &[3e-5, -1e-5, 2e-5, 0.0, -4e-5], 10.0);
        let res = build(toas, m, ResidualConfig::default());

        let errors = res.toas().unwrap().get_errors_s();
        let expected: f64 = res
            .time_resids()
            .iter()
            .zip(&errors)
            .map(|(r, e)| (r / e).powi(2))
            .sum();
        let chi2 = res.chi2().unwrap();
        assert!((chi2 - expected).abs() <= 1e-12 * expected.max(1.0));
        assert!(chi2 > 1.0, "offsets of tens of µs over 10 µs errors: {chi2}");
    }

    #[test]
    fn offsets_are_recovered_as_time_residuals() {
        let m = model();
        let offsets = [2e-5, -2e-5, 1e-5, -1e-5];
        let toas = toas_with_offsets(&m, &offsets, 1.0);
        let config = ResidualConfig {
            subtract_mean: false,
            ..ResidualConfig::default()
        };
        let res = build(toas, m, config);
        for (got, want) in res.time_resids().iter().zip(offsets) {
            assert!((got - want).abs() < 3e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn update_is_idempotent() {
        let m = model();
        let toas = toas_with_offsets(&m, &[1e-5, 2e-5, -3e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        let before = res.time_resids().to_vec();
        let chi2_before = res.chi2().unwrap();
        let generation = res.generation();

        res.update().unwrap();
        assert_eq!(res.time_resids(), before.as_slice());
        assert_eq!(res.chi2().unwrap(), chi2_before);
        assert!(res.generation() > generation);
    }

    #[test]
    fn scaled_and_unscaled_values_differ_by_f0() {
        let m = model();
        let toas = toas_with_offsets(&m, &[1e-5, 2e-5, -3e-5, 4e-6], 1.0);
        let toas = Arc::new(toas);
        let m: Arc<dyn TimingModel> = Arc::new(m);
        let unit = Some(ResidualUnit::Microseconds);

        let scaled = Residuals::new(
            toas.clone(),
            m.clone(),
            ResidualConfig { unit, ..ResidualConfig::default() },
        )
        .unwrap();
        let unscaled = Residuals::new(
            toas,
            m,
            ResidualConfig {
                unit,
                scaled_by_f0: false,
                ..ResidualConfig::default()
            },
        )
        .unwrap();

        for (t, p) in scaled.resids_value().iter().zip(unscaled.resids_value()) {
            assert!((t * F0 - p).abs() < 1e-9 * p.abs().max(1.0), "{t} * F0 vs {p}");
        }
        for (t, p) in scaled.data_error().iter().zip(unscaled.data_error()) {
            assert!((t * F0 - p).abs() < 1e-9 * p.abs().max(1.0));
        }
    }

    #[test]
    fn dof_counts_free_parameters_and_offset() {
        let m = model().with_free(&["F0", "F1"]).unwrap();
        let toas = toas_with_offsets(&m, &[0.0; 10], 1.0);
        let res = build(toas.clone(), m, ResidualConfig::default());
        assert_eq!(res.dof(), 7);
        assert_eq!(res.get_dof().unwrap(), 7);

        let m3 = model().with_free(&["F0", "F1", "DM"]).unwrap();
        let res3 = build(toas, m3, ResidualConfig::default());
        assert_eq!(res3.dof(), 6);
    }

    #[test]
    fn reduced_chi2_divides_by_dof() {
        let m = model().with_free(&["F0"]).unwrap();
        let toas = toas_with_offsets(&m, &[1e-5, -1e-5, 2e-5, -2e-5], 1.0);
        let res = build(toas, m, ResidualConfig::default());
        let expected = res.chi2().unwrap() / 2.0;
        assert!((res.chi2_reduced().unwrap() - expected).abs() < 1e-12 * expected.max(1.0));
        assert!((res.get_reduced_chi2().unwrap() - expected).abs() < 1e-12 * expected.max(1.0));
    }

    #[test]
    fn zero_uncertainty_saturates_chi2_but_fails_weighted_paths() {
        let m = model();
        let mut toas = toas_with_offsets(&m, &[1e-5, -1e-5, 0.0], 1.0);
        let mut list = toas.toas().to_vec();
        list[1].error_us = 0.0;
        toas = ObservationSet::new(list);

        let plain = ResidualConfig {
            use_weighted_mean: false,
            ..ResidualConfig::default()
        };
        let res = build(toas.clone(), m, plain);
        assert_eq!(res.chi2().unwrap(), f64::INFINITY);
        assert!(matches!(res.rms_weighted(), Err(ResidualError::DataQuality(_))));

        let err = Residuals::new(Arc::new(toas), Arc::new(model()), ResidualConfig::default())
            .unwrap_err();
        assert!(matches!(err, ResidualError::DataQuality(_)));
    }

    #[test]
    fn weighted_mean_is_removed() {
        let m = model();
        let toas = toas_with_offsets(&m, &[1e-5, 3e-5, -2e-5, 0.0], 1.0);
        let res = build(toas, m, ResidualConfig::default());
        let errors = res.toas().unwrap().get_errors();
        let weights: Vec<f64> = errors.iter().map(|e| 1.0 / (e * e)).collect();
        let wmean = crate::math::weighted_mean(res.phase_resids(), &weights).unwrap();
        assert!(wmean.mean.abs() < 1e-12);
    }

    #[test]
    fn nearest_tracking_wraps_large_offsets() {
        let m = model();
        // 1.25 turns late: nearest-pulse tracking sees only the quarter turn.
        let offset = 1.25 / F0;
        let toas = toas_with_offsets(&m, &[0.0, offset], 1.0);
        let config = ResidualConfig {
            subtract_mean: false,
            ..ResidualConfig::default()
        };
        let res = build(toas, m, config);
        assert!((res.phase_resids()[1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn pulse_number_tracking_keeps_whole_turns() {
        let m = model();
        let base = simulate_toas(&m, &SimulationConfig { n_epochs: 3, ..SimulationConfig::default() })
            .unwrap();
        let pulse_numbers = compute_pulse_numbers(&m, &base).unwrap();

        let mut list = base.toas().to_vec();
        list[2].mjd += 2.0 / F0 / SECS_PER_DAY;
        let mut toas = ObservationSet::new(list);
        toas.set_pulse_numbers(&pulse_numbers).unwrap();

        let config = ResidualConfig {
            subtract_mean: false,
            track_mode: TrackMode::UsePulseNumbers,
            ..ResidualConfig::default()
        };
        let res = build(toas, m, config);
        assert!((res.phase_resids()[2] - 2.0).abs() < 1e-3);
        assert!(res.phase_resids()[0].abs() < 1e-3);
    }

    #[test]
    fn track_parameter_forces_pulse_numbers() {
        let m = model().with_pulse_number_tracking();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5], 1.0);
        let err = Residuals::new(Arc::new(toas.clone()), Arc::new(m), ResidualConfig::default())
            .unwrap_err();
        assert!(matches!(err, ResidualError::DataQuality(_)));

        let m = model().with_pulse_number_tracking();
        let mut toas = toas;
        let pn = compute_pulse_numbers(&m, &toas).unwrap();
        toas.set_pulse_numbers(&pn).unwrap();
        let res = build(toas, m, ResidualConfig::default());
        assert_eq!(res.track_mode(), TrackMode::UsePulseNumbers);
    }

    #[test]
    fn phase_jumps_shift_residuals() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 0.0, 0.0], 1.0);
        let mut jumped = toas.clone();
        jumped.set_delta_pulse_numbers(&[0.0, 0.1, 0.0]).unwrap();
        let config = ResidualConfig {
            subtract_mean: false,
            ..ResidualConfig::default()
        };
        let plain = build(toas, model(), config.clone());
        let shifted = build(jumped, m, config);
        let diff = shifted.phase_resids()[1] - plain.phase_resids()[1];
        assert!((diff - 0.1).abs() < 1e-6);
    }

    #[test]
    fn first_toa_reference_applies_only_with_mean_subtraction() {
        let m = model();
        // Straddle the half-turn boundary: 0.45 and 0.55 turns late.
        let toas = toas_with_offsets(&m, &[0.45 / F0, 0.55 / F0], 1.0);

        let raw = build(
            toas.clone(),
            model(),
            ResidualConfig { subtract_mean: false, ..ResidualConfig::default() },
        );
        assert!((raw.phase_resids()[0] - 0.45).abs() < 1e-3);
        assert!((raw.phase_resids()[1] + 0.45).abs() < 1e-3);

        // Referenced to the first TOA the two sit 0.1 turns apart.
        let referenced = build(toas, m, ResidualConfig::default());
        assert!((referenced.phase_resids()[0] + 0.05).abs() < 1e-3);
        assert!((referenced.phase_resids()[1] - 0.05).abs() < 1e-3);
    }

    #[test]
    fn spin_frequency_must_be_unique() {
        let toas = Arc::new(toas_with_offsets(&model(), &[0.0, 0.0], 1.0));

        let missing = model().without_param("F0");
        let err = Residuals::new(toas.clone(), Arc::new(missing), ResidualConfig::default())
            .unwrap_err();
        assert!(matches!(err, ResidualError::Config(_)));

        let doubled = model().with_param(crate::domain::Parameter::new("nu", F0, "Hz"));
        let err = Residuals::new(toas, Arc::new(doubled), ResidualConfig::default()).unwrap_err();
        assert!(matches!(err, ResidualError::Config(_)));
    }

    #[test]
    fn detached_residuals_refuse_to_update() {
        let mut res = Residuals::detached(ResidualConfig::default()).unwrap();
        assert!(matches!(res.update(), Err(ResidualError::Config(_))));
        assert!(matches!(res.chi2(), Err(ResidualError::Config(_))));

        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5], 1.0);
        res.set_model(Arc::new(m)).unwrap();
        assert!(res.time_resids().is_empty());
        res.set_toas(Arc::new(toas)).unwrap();
        assert_eq!(res.time_resids().len(), 2);
    }

    #[test]
    fn set_model_invalidates_chi2() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5, -1e-5, 2e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        let chi2 = res.chi2().unwrap();

        let mut perturbed = model();
        perturbed.set_value("F0", F0 + 1e-9).unwrap();
        res.set_model(Arc::new(perturbed)).unwrap();
        assert_ne!(res.chi2().unwrap(), chi2);
    }

    /// Evaluator that always reports a singular covariance.
    struct Singular;

    impl CorrelatedChi2 for Singular {
        fn chi2(
            &self,
            _: &ObservationSet,
            _: &dyn TimingModel,
            _: &[f64],
            _: bool,
        ) -> ResidualResult<f64> {
            Err(ResidualError::degenerate("singular"))
        }
    }

    #[test]
    fn degenerate_correlated_noise_scores_infinity() {
        let m = model().with_noise(EcorrNoise::uniform(1.0));
        let toas = toas_with_offsets(&m, &[0.0, 1e-5, -1e-5], 1.0);
        let res = Residuals::new(Arc::new(toas), Arc::new(m), ResidualConfig::default())
            .unwrap()
            .with_evaluator(Singular);
        assert_eq!(res.chi2().unwrap(), f64::INFINITY);
    }

    #[test]
    fn correlated_noise_uses_gls_path() {
        let m = model().with_noise(EcorrNoise::uniform(5.0));
        let config = SimulationConfig {
            n_epochs: 4,
            freqs_mhz: vec![1400.0, 1400.0],
            ..SimulationConfig::default()
        };
        let mut list = simulate_toas(&m, &config).unwrap().toas().to_vec();
        for (i, toa) in list.iter_mut().enumerate() {
            // Common offset per epoch.
            let epoch = (i / 2) as f64;
            toa.mjd += (epoch - 1.5) * 4e-6 / SECS_PER_DAY;
        }
        let toas = ObservationSet::new(list);
        let res = build(toas.clone(), m, ResidualConfig::default());
        let white = independent_chi2(res.time_resids(), &toas.get_errors_s());
        let gls = res.chi2().unwrap();
        assert!(gls.is_finite());
        assert!(gls < white, "{gls} vs {white}");

        let dense = res.calc_chi2(true).unwrap();
        assert!((dense - gls).abs() < 1e-6 * gls.max(1.0));
    }

    #[test]
    fn noise_resids_must_match_toa_count() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        assert!(res.set_noise_resids("ecorr", vec![0.0]).is_err());
        res.set_noise_resids("ecorr", vec![0.0, 1e-6]).unwrap();
        assert_eq!(res.noise_resids()["ecorr"].len(), 2);
    }

    #[test]
    fn set_toas_with_a_new_count_refreshes_everything() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5, -1e-5, 2e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        let dof = res.dof();
        let generation = res.generation();
        res.set_noise_resids("red", vec![0.0; 4]).unwrap();

        let more = toas_with_offsets(&model(), &[0.0, 1e-5, -1e-5, 2e-5, 3e-5, -3e-5], 1.0);
        res.set_toas(Arc::new(more)).unwrap();
        assert!(res.generation() > generation);
        assert_eq!(res.toas().unwrap().len(), 6);
        assert_eq!(res.phase_resids().len(), 6);
        assert_eq!(res.time_resids().len(), 6);
        assert_eq!(res.resids_value().len(), res.data_error().len());
        assert_eq!(res.dof(), dof + 2);
        assert!(res.noise_resids().is_empty());
        let chi2 = res.chi2().unwrap();
        assert!((chi2 - res.calc_chi2(false).unwrap()).abs() < 1e-12 * chi2.max(1.0));
    }

    #[test]
    fn failed_set_toas_keeps_previous_state() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5, -1e-5, 2e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        let time_resids = res.time_resids().to_vec();
        let dof = res.dof();
        let chi2 = res.chi2().unwrap();
        let generation = res.generation();

        let mut list = toas_with_offsets(&model(), &[0.0, 1e-5, -1e-5, 2e-5, 3e-5, -3e-5], 1.0)
            .toas()
            .to_vec();
        list[2].error_us = 0.0;
        let err = res.set_toas(Arc::new(ObservationSet::new(list))).unwrap_err();
        assert!(matches!(err, ResidualError::DataQuality(_)));

        assert_eq!(res.generation(), generation);
        assert_eq!(res.toas().unwrap().len(), 4);
        assert_eq!(res.time_resids(), time_resids.as_slice());
        assert_eq!(res.dof(), dof);
        assert_eq!(res.chi2().unwrap(), chi2);
        assert!((res.calc_chi2(false).unwrap() - chi2).abs() < 1e-12 * chi2.max(1.0));
        assert_eq!(res.resids_value().len(), res.data_error().len());
    }

    #[test]
    fn failed_set_model_keeps_previous_model() {
        let m = model();
        let toas = toas_with_offsets(&m, &[0.0, 1e-5, -1e-5], 1.0);
        let mut res = build(toas, m, ResidualConfig::default());
        let time_resids = res.time_resids().to_vec();
        let chi2 = res.chi2().unwrap();

        let err = res
            .set_model(Arc::new(model().without_param("F0")))
            .unwrap_err();
        assert!(matches!(err, ResidualError::Config(_)));
        assert!((res.get_psr_freq().unwrap() - F0).abs() < 1e-12);
        assert_eq!(res.time_resids(), time_resids.as_slice());
        assert_eq!(res.chi2().unwrap(), chi2);
        res.update().unwrap();
        assert_eq!(res.time_resids(), time_resids.as_slice());
    }

    #[test]
    fn rms_weighted_reports_in_output_unit() {
        let m = model();
        let toas = toas_with_offsets(&m, &[1e-5, -1e-5], 1.0);
        let config = ResidualConfig {
            unit: Some(ResidualUnit::Microseconds),
            ..ResidualConfig::default()
        };
        let res = build(toas, m, config);
        let rms = res.rms_weighted().unwrap();
        assert!((rms - 10.0).abs() < 0.5, "{rms}");
    }

    #[test]
    fn single_toa_epoch_inputs_are_accepted() {
        let m = model();
        let toas = ObservationSet::new(vec![Toa::new(55500.0, f64::INFINITY, 1.0)]);
        let res = build(toas, m, ResidualConfig::default());
        assert_eq!(res.time_resids().len(), 1);
        assert_eq!(res.dof(), 0);
    }
}
