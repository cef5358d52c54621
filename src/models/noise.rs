//! Reference noise components.
//!
//! - `WhiteNoise`: EFAC/EQUAD rescaling, `σ' = efac * sqrt(σ² + equad²)`
//! - `EcorrNoise`: epoch-correlated noise. TOAs closer together than a time
//!   window share one basis column; the column's prior variance is `ecorr²`.

use nalgebra::{DMatrix, DVector};

use crate::data::{ObservationSet, SECS_PER_DAY};
use crate::models::model::{NoiseCategory, NoiseComponent};

const US_TO_S: f64 = 1e-6;

/// Optional `flag == value` TOA selector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlagSelector {
    pub flag: Option<(String, String)>,
}

impl FlagSelector {
    pub fn all() -> Self {
        Self { flag: None }
    }

    pub fn flag(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            flag: Some((key.into(), value.into())),
        }
    }

    pub fn indices(&self, toas: &ObservationSet) -> Vec<usize> {
        toas.toas()
            .iter()
            .enumerate()
            .filter(|(_, toa)| match &self.flag {
                None => true,
                Some((key, value)) => toa.flags.get(key) == Some(value),
            })
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhiteNoise {
    pub selector: FlagSelector,
    pub efac: f64,
    pub equad_us: f64,
}

impl WhiteNoise {
    pub fn new(efac: f64, equad_us: f64) -> Self {
        Self {
            selector: FlagSelector::all(),
            efac,
            equad_us,
        }
    }
}

impl NoiseComponent for WhiteNoise {
    fn name(&self) -> &str {
        "ScaleToaError"
    }

    fn category(&self) -> NoiseCategory {
        NoiseCategory::WhiteScaling
    }

    fn scale_uncertainties(&self, toas: &ObservationSet, sigma_s: &mut [f64]) {
        let equad_s = self.equad_us * US_TO_S;
        for i in self.selector.indices(toas) {
            let s = sigma_s[i];
            sigma_s[i] = self.efac * (s * s + equad_s * equad_s).sqrt();
        }
    }
}

/// One ECORR amplitude applied to a subset of TOAs.
#[derive(Debug, Clone, PartialEq)]
pub struct EcorrGroup {
    pub selector: FlagSelector,
    pub ecorr_us: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcorrNoise {
    pub groups: Vec<EcorrGroup>,
    /// TOAs closer than this (seconds) to the first TOA of a bucket join it.
    pub window_s: f64,
    /// Buckets with fewer TOAs are dropped from the basis.
    pub min_toas: usize,
}

impl EcorrNoise {
    pub const DEFAULT_WINDOW_S: f64 = 1.0;
    pub const DEFAULT_MIN_TOAS: usize = 2;

    /// A single ECORR amplitude applied to every TOA.
    pub fn uniform(ecorr_us: f64) -> Self {
        Self {
            groups: vec![EcorrGroup {
                selector: FlagSelector::all(),
                ecorr_us,
            }],
            window_s: Self::DEFAULT_WINDOW_S,
            min_toas: Self::DEFAULT_MIN_TOAS,
        }
    }

    pub fn with_window(mut self, window_s: f64, min_toas: usize) -> Self {
        self.window_s = window_s;
        self.min_toas = min_toas;
        self
    }
}

impl NoiseComponent for EcorrNoise {
    fn name(&self) -> &str {
        "EcorrNoise"
    }

    fn category(&self) -> NoiseCategory {
        NoiseCategory::Ecorr
    }

    fn introduces_correlated_errors(&self) -> bool {
        true
    }

    fn basis_weight_pair(&self, toas: &ObservationSet) -> Option<(DMatrix<f64>, DVector<f64>)> {
        let times_s: Vec<f64> = toas.get_mjds().iter().map(|m| m * SECS_PER_DAY).collect();

        let mut columns: Vec<(Vec<usize>, f64)> = Vec::new();
        for group in &self.groups {
            let selected = group.selector.indices(toas);
            let ecorr_s = group.ecorr_us * US_TO_S;
            for bucket in quantize(&times_s, &selected, self.window_s, self.min_toas) {
                columns.push((bucket, ecorr_s * ecorr_s));
            }
        }

        let mut basis = DMatrix::zeros(toas.len(), columns.len());
        let mut weights = DVector::zeros(columns.len());
        for (j, (bucket, weight)) in columns.iter().enumerate() {
            for &i in bucket {
                basis[(i, j)] = 1.0;
            }
            weights[j] = *weight;
        }
        Some((basis, weights))
    }
}

/// Group `selected` TOA indices into time buckets.
///
/// TOAs are visited in time order; a TOA joins the current bucket when it lies
/// within `window_s` of the bucket's first TOA, otherwise it starts a new one.
/// Buckets smaller than `min_toas` are discarded.
pub fn quantize(times_s: &[f64], selected: &[usize], window_s: f64, min_toas: usize) -> Vec<Vec<usize>> {
    let mut order = selected.to_vec();
    order.sort_by(|&a, &b| {
        times_s[a]
            .partial_cmp(&times_s[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut bucket_ref = f64::NEG_INFINITY;
    for i in order {
        let joins_current = !buckets.is_empty() && times_s[i] - bucket_ref < window_s;
        if joins_current {
            if let Some(bucket) = buckets.last_mut() {
                bucket.push(i);
            }
        } else {
            bucket_ref = times_s[i];
            buckets.push(vec![i]);
        }
    }

    buckets.retain(|b| b.len() >= min_toas.max(1));
    for bucket in &mut buckets {
        bucket.sort_unstable();
    }
    buckets
}
