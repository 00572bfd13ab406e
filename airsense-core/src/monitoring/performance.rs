use serde::Serialize;

use crate::models::VentilationDecision;

/// 2x2 confusion matrix with "activate ventilation" as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
    pub confusion: ConfusionMatrix,
}

/// Score `(target, prediction)` label pairs.
///
/// Label 0 (activate) is the positive class; any other label counts as
/// negative. Undefined ratios are reported as 0.
pub fn classification_metrics(
    pairs: impl IntoIterator<Item = (i64, i64)>,
) -> ClassificationMetrics {
    let positive = i64::from(VentilationDecision::Activate.label());
    let mut cm = ConfusionMatrix::default();

    for (target, prediction) in pairs {
        match (target == positive, prediction == positive) {
            (true, true) => cm.true_positive += 1,
            (false, true) => cm.false_positive += 1,
            (false, false) => cm.true_negative += 1,
            (true, false) => cm.false_negative += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(cm.true_positive, cm.true_positive + cm.false_positive);
    let recall = ratio(cm.true_positive, cm.true_positive + cm.false_negative);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    ClassificationMetrics {
        accuracy: ratio(cm.true_positive + cm.true_negative, cm.total()),
        precision,
        recall,
        f1,
        support: cm.total(),
        confusion: cm,
    }
}
