use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::{sanitize, PredictionRecord, VentilationDecision, FEATURE_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Ok,
    NoData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Aggregate view of the prediction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub status: SnapshotStatus,
    pub predictions_count: usize,
    pub predictions_activate: usize,
    pub predictions_deactivate: usize,
    pub features: BTreeMap<String, FeatureStats>,
    pub generated_at: DateTime<Utc>,
}

impl SnapshotMetrics {
    pub fn no_data() -> Self {
        Self {
            status: SnapshotStatus::NoData,
            predictions_count: 0,
            predictions_activate: 0,
            predictions_deactivate: 0,
            features: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn from_records(records: &[PredictionRecord]) -> Self {
        if records.is_empty() {
            return Self::no_data();
        }

        let count_action = |decision: VentilationDecision| {
            records
                .iter()
                .filter(|r| r.action == decision.action())
                .count()
        };

        let features = FEATURE_COLUMNS
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<f64> = records.iter().map(|r| r.reading().features()[idx]).collect();
                (name.to_string(), FeatureStats::of(&values))
            })
            .collect();

        Self {
            status: SnapshotStatus::Ok,
            predictions_count: records.len(),
            predictions_activate: count_action(VentilationDecision::Activate),
            predictions_deactivate: count_action(VentilationDecision::Deactivate),
            features,
            generated_at: Utc::now(),
        }
    }

    pub fn write_cache(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, body).map_err(|e| StorageError::io(path, e))
    }

    /// The last cached snapshot, if any could be read.
    pub fn read_cache(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable metrics cache");
                None
            }
        }
    }
}

impl FeatureStats {
    /// Mean, sample standard deviation, min and max. Undefined values are 0.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() < 2 {
            0.0
        } else {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        Self {
            mean: sanitize(mean),
            std: sanitize(std),
            min: sanitize(values.iter().copied().fold(f64::INFINITY, f64::min)),
            max: sanitize(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        }
    }
}
