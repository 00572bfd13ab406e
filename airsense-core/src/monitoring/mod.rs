//! Monitoring and reporting over the prediction and feedback logs
//!
//! The reporting pipeline compares logged predictions against the reference
//! dataset (drift), joins them to ground truth (performance), writes both
//! HTML reports and pushes the results into telemetry. Metrics updated before
//! a failure are left in place.

pub mod drift;
pub mod performance;
pub mod reference;
pub mod report;
pub mod snapshot;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AirsenseConfig, MonitoringConfig, PathsConfig};
use crate::error::MonitoringError;
use crate::feedback::FeedbackService;
use crate::models::{PredictionRecord, FEATURE_COUNT};
use crate::prediction_log::PredictionLogger;
use crate::telemetry::Telemetry;

pub use drift::{detect_drift, DriftSummary, FeatureDrift};
pub use performance::{classification_metrics, ClassificationMetrics, ConfusionMatrix};
pub use reference::{load_reference, prepare_reference_data, PrepareOutcome, ReferenceData};
pub use snapshot::{FeatureStats, SnapshotMetrics, SnapshotStatus};

/// Why the performance half of a report run was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoGroundTruth,
    NoMatchingFeedback,
}

impl SkipReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::NoGroundTruth => "no ground truth available, performance report skipped",
            Self::NoMatchingFeedback => {
                "no feedback matches the logged predictions, performance report skipped"
            }
        }
    }
}

/// Result of a successful `update_reports` run.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The prediction log exists but has no rows.
    NoData,
    /// The drift report was written, the performance report was not.
    PerformanceSkipped {
        drift: DriftSummary,
        reason: SkipReason,
    },
    Complete {
        drift: DriftSummary,
        performance: ClassificationMetrics,
        reference_performance: Option<ClassificationMetrics>,
    },
}

impl ReportOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::PerformanceSkipped { .. } => "partial",
            Self::Complete { .. } => "success",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NoData => "prediction log is empty, no report generated".to_string(),
            Self::PerformanceSkipped { reason, .. } => {
                format!("drift report generated; {}", reason.message())
            }
            Self::Complete { .. } => "drift and classification reports generated".to_string(),
        }
    }

    pub fn drift(&self) -> Option<&DriftSummary> {
        match self {
            Self::NoData => None,
            Self::PerformanceSkipped { drift, .. } | Self::Complete { drift, .. } => Some(drift),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftCheckStatus {
    Ok,
    NoData,
    Error,
}

/// Lightweight drift check served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftStatus {
    pub status: DriftCheckStatus,
    pub drift_detected: bool,
    pub drift_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drifted_features: Vec<String>,
}

impl DriftStatus {
    fn empty(status: DriftCheckStatus, last_check: Option<DateTime<Utc>>) -> Self {
        Self {
            status,
            drift_detected: false,
            drift_score: 0.0,
            last_check,
            drifted_features: Vec::new(),
        }
    }
}

pub struct MonitoringService {
    paths: PathsConfig,
    settings: MonitoringConfig,
    predictions: Arc<PredictionLogger>,
    feedback: Arc<FeedbackService>,
    telemetry: Telemetry,
    report_lock: Mutex<()>,
}

impl std::fmt::Debug for MonitoringService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringService")
            .field("reports_dir", &self.paths.reports_dir)
            .finish_non_exhaustive()
    }
}

impl MonitoringService {
    pub fn new(
        config: &AirsenseConfig,
        predictions: Arc<PredictionLogger>,
        feedback: Arc<FeedbackService>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            paths: config.paths.clone(),
            settings: config.monitoring.clone(),
            predictions,
            feedback,
            telemetry,
            report_lock: Mutex::new(()),
        }
    }

    /// Aggregate the prediction log and refresh the on-disk cache.
    ///
    /// A missing or empty log yields a `no_data` snapshot.
    pub fn compute_snapshot_metrics(&self) -> SnapshotMetrics {
        let snapshot = SnapshotMetrics::from_records(&self.predictions.read_all());
        if let Err(e) = snapshot.write_cache(&self.paths.metrics_cache_path) {
            tracing::error!(error = %e, "Failed to write metrics cache");
        }
        snapshot
    }

    pub fn read_cached_metrics(&self) -> Option<SnapshotMetrics> {
        SnapshotMetrics::read_cache(&self.paths.metrics_cache_path)
    }

    /// Drift between the reference data and everything logged so far.
    ///
    /// No HTML is written; drift telemetry is updated.
    pub fn current_drift(&self) -> DriftStatus {
        if !self.paths.reference_data_path.exists() {
            tracing::warn!(
                path = %self.paths.reference_data_path.display(),
                "Reference data missing, drift unavailable"
            );
            return DriftStatus::empty(DriftCheckStatus::NoData, None);
        }
        let records = self.predictions.read_all();
        if records.is_empty() {
            return DriftStatus::empty(DriftCheckStatus::NoData, None);
        }

        let now = Utc::now();
        let summary = load_reference(&self.paths.reference_data_path)
            .map(|reference| self.compute_drift(&reference, &records));
        match summary {
            Ok(summary) => DriftStatus {
                status: DriftCheckStatus::Ok,
                drift_detected: summary.dataset_drift,
                drift_score: summary.drift_score,
                last_check: Some(now),
                drifted_features: summary
                    .drifted_features()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
            Err(e) => {
                tracing::error!(error = %e, "Drift check failed");
                DriftStatus::empty(DriftCheckStatus::Error, Some(now))
            }
        }
    }

    fn compute_drift(&self, reference: &ReferenceData, records: &[PredictionRecord]) -> DriftSummary {
        let current: Vec<[f64; FEATURE_COUNT]> =
            records.iter().map(|r| r.reading().features()).collect();

        let summary = detect_drift(
            &reference.features,
            &current,
            self.settings.drift_p_value,
            self.settings.drift_share,
        );
        self.telemetry
            .update_drift(summary.drift_score, summary.drifted_features());
        summary
    }

    /// Run the full reporting pipeline.
    ///
    /// The reference file is checked before the prediction log; either being
    /// absent is `MissingInput`. Runs are serialised within the process.
    pub fn update_reports(&self, model_version: &str) -> Result<ReportOutcome, MonitoringError> {
        let _guard = self.report_lock.lock().unwrap_or_else(|e| e.into_inner());

        for path in [&self.paths.reference_data_path, &self.paths.prediction_log_path] {
            require(path)?;
        }

        let records = self.predictions.read_all();
        if records.is_empty() {
            tracing::warn!("Prediction log is empty, skipping reports");
            return Ok(ReportOutcome::NoData);
        }

        let reference = load_reference(&self.paths.reference_data_path)?;
        let drift = self.compute_drift(&reference, &records);
        let now = Utc::now();
        report::write_report(
            &self.paths.reports_dir,
            report::DRIFT_REPORT_FILE,
            &report::render_drift_report(&drift, now),
        )?;

        let ground_truth = self.feedback.latest_by_prediction();
        if ground_truth.is_empty() {
            tracing::warn!("No ground truth available, performance report skipped");
            return Ok(ReportOutcome::PerformanceSkipped {
                drift,
                reason: SkipReason::NoGroundTruth,
            });
        }

        let pairs = join_feedback(&records, &ground_truth);
        if pairs.is_empty() {
            tracing::warn!(
                feedback = ground_truth.len(),
                "No feedback matches a logged prediction, performance report skipped"
            );
            return Ok(ReportOutcome::PerformanceSkipped {
                drift,
                reason: SkipReason::NoMatchingFeedback,
            });
        }

        let performance = classification_metrics(pairs);
        let reference_performance = reference.labelled_pairs().map(classification_metrics);
        report::write_report(
            &self.paths.reports_dir,
            report::CLASSIFICATION_REPORT_FILE,
            &report::render_classification_report(
                &performance,
                reference_performance.as_ref(),
                model_version,
                now,
            ),
        )?;
        self.telemetry
            .update_performance(model_version, performance.accuracy, performance.f1);

        tracing::info!(
            rows = performance.support,
            accuracy = performance.accuracy,
            f1 = performance.f1,
            drift_score = drift.drift_score,
            "Reports updated"
        );
        Ok(ReportOutcome::Complete {
            drift,
            performance,
            reference_performance,
        })
    }
}

fn require(path: &Path) -> Result<(), MonitoringError> {
    if path.exists() {
        Ok(())
    } else {
        Err(MonitoringError::MissingInput {
            path: path.to_path_buf(),
        })
    }
}

/// Inner join on exact prediction id, yielding `(target, prediction)`.
fn join_feedback(
    records: &[PredictionRecord],
    ground_truth: &HashMap<String, i64>,
) -> Vec<(i64, i64)> {
    records
        .iter()
        .filter_map(|r| {
            ground_truth
                .get(&r.prediction_id)
                .map(|&target| (target, i64::from(r.prediction)))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
