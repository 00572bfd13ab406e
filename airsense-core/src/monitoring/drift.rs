//! Per-feature distribution drift between the reference and current data.
//!
//! Each feature gets a two-sample Kolmogorov-Smirnov test. The dataset score
//! is the share of features whose p-value falls below the threshold.

use serde::Serialize;

use crate::models::{FEATURE_COLUMNS, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub statistic: f64,
    pub p_value: f64,
    pub drift_detected: bool,
    pub reference_mean: f64,
    pub current_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftSummary {
    pub features: Vec<FeatureDrift>,
    /// Share of drifted features, in [0, 1].
    pub drift_score: f64,
    pub dataset_drift: bool,
    pub reference_rows: usize,
    pub current_rows: usize,
    pub p_value_threshold: f64,
    pub drift_share: f64,
}

impl DriftSummary {
    pub fn drifted_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.drift_detected)
            .map(|f| f.feature.as_str())
            .collect()
    }
}

/// Compare every feature column of `reference` against `current`.
pub fn detect_drift(
    reference: &[[f64; FEATURE_COUNT]],
    current: &[[f64; FEATURE_COUNT]],
    p_value_threshold: f64,
    drift_share: f64,
) -> DriftSummary {
    let features: Vec<FeatureDrift> = FEATURE_COLUMNS
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let baseline = column(reference, idx);
            let observed = column(current, idx);
            let (statistic, p_value) = ks_test(&baseline, &observed);
            FeatureDrift {
                feature: name.to_string(),
                statistic,
                p_value,
                drift_detected: p_value < p_value_threshold,
                reference_mean: mean(&baseline),
                current_mean: mean(&observed),
            }
        })
        .collect();

    let drifted = features.iter().filter(|f| f.drift_detected).count();
    let drift_score = drifted as f64 / FEATURE_COUNT as f64;

    DriftSummary {
        features,
        drift_score,
        dataset_drift: drift_score >= drift_share,
        reference_rows: reference.len(),
        current_rows: current.len(),
        p_value_threshold,
        drift_share,
    }
}

fn column(rows: &[[f64; FEATURE_COUNT]], idx: usize) -> Vec<f64> {
    rows.iter().map(|r| r[idx]).filter(|v| v.is_finite()).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Two-sample KS statistic and its asymptotic p-value.
///
/// An empty sample yields `(0.0, 1.0)`.
pub fn ks_test(baseline: &[f64], current: &[f64]) -> (f64, f64) {
    if baseline.is_empty() || current.is_empty() {
        return (0.0, 1.0);
    }

    let mut a = baseline.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut d_max = 0.0f64;

    // Step both ECDFs past every copy of the next smallest value so ties
    // move together.
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d_max = d_max.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let n_eff = (n1 * n2) / (n1 + n2);
    let lambda = (n_eff.sqrt() + 0.12 + 0.11 / n_eff.sqrt()) * d_max;
    (d_max, ks_p_value(lambda))
}

/// Kolmogorov distribution tail: P(K > lambda).
fn ks_p_value(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut p = 0.0;
    for k in 1..=100 {
        let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
        let term = sign * (-2.0 * f64::from(k).powi(2) * lambda.powi(2)).exp();
        p += term;
        if term.abs() < 1e-10 {
            break;
        }
    }
    (2.0 * p).clamp(0.0, 1.0)
}
