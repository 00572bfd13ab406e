use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::StorageError;
use crate::models::{FeedbackRecord, FEEDBACK_LOG_COLUMNS};
use crate::prediction_log::{append_row, ensure_header, read_rows};

/// Collects ground-truth labels for earlier predictions.
#[derive(Debug)]
pub struct FeedbackService {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_log_exists(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        ensure_header(&self.path, &FEEDBACK_LOG_COLUMNS)
    }

    /// Append one label. The id is not checked against the prediction log.
    pub fn submit(&self, prediction_id: &str, target: i64) -> Result<FeedbackRecord, StorageError> {
        let record = FeedbackRecord {
            prediction_id: prediction_id.to_string(),
            target,
            timestamp: Utc::now(),
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        ensure_header(&self.path, &FEEDBACK_LOG_COLUMNS)?;
        append_row(&self.path, &record)?;

        tracing::info!(prediction_id, target, "Feedback recorded");
        Ok(record)
    }

    pub fn read_all(&self) -> Vec<FeedbackRecord> {
        read_rows(&self.path)
    }

    /// Ground truth keyed by prediction id. Later rows override earlier ones.
    pub fn latest_by_prediction(&self) -> HashMap<String, i64> {
        self.read_all()
            .into_iter()
            .map(|r| (r.prediction_id, r.target))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_creates_log_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let service = FeedbackService::new(dir.path().join("reports/ground_truth.csv"));

        service.submit("abc", 1).unwrap();

        let content = std::fs::read_to_string(service.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("prediction_id,target,timestamp"));
        assert!(lines.next().unwrap().starts_with("abc,1,"));
    }

    #[test]
    fn test_orphan_feedback_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let service = FeedbackService::new(dir.path().join("gt.csv"));
        assert!(service.submit("does-not-exist", 0).is_ok());
        assert_eq!(service.read_all().len(), 1);
    }

    #[test]
    fn test_duplicate_feedback_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let service = FeedbackService::new(dir.path().join("gt.csv"));
        service.submit("p1", 0).unwrap();
        service.submit("p2", 1).unwrap();
        service.submit("p1", 1).unwrap();

        let latest = service.latest_by_prediction();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["p1"], 1);
        assert_eq!(latest["p2"], 1);
    }

    #[test]
    fn test_ensure_log_exists_twice() {
        let dir = tempfile::tempdir().unwrap();
        let service = FeedbackService::new(dir.path().join("gt.csv"));
        service.ensure_log_exists().unwrap();
        service.ensure_log_exists().unwrap();
        assert_eq!(
            std::fs::read_to_string(service.path()).unwrap().trim(),
            "prediction_id,target,timestamp"
        );
        assert!(service.read_all().is_empty());
    }

    #[test]
    fn test_naive_timestamps_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.csv");
        std::fs::write(
            &path,
            "prediction_id,target,timestamp\nold,0,2024-03-02T08:15:00\n",
        )
        .unwrap();

        let service = FeedbackService::new(&path);
        assert_eq!(service.latest_by_prediction()["old"], 0);
    }
}
