//! Append-only CSV log of every prediction served.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::StorageError;
use crate::models::{PredictionOutcome, PredictionRecord, SensorReading, PREDICTION_LOG_COLUMNS};

/// Writes and reads the prediction log.
///
/// Appends are serialised within the process; separate processes writing the
/// same file are not coordinated.
#[derive(Debug)]
pub struct PredictionLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PredictionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its header if it is missing or empty. Idempotent.
    pub fn initialize(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.initialize_locked()
    }

    fn initialize_locked(&self) -> Result<(), StorageError> {
        ensure_header(&self.path, &PREDICTION_LOG_COLUMNS)
    }

    /// Append one row and return what was written.
    pub fn log(
        &self,
        prediction_id: &str,
        reading: &SensorReading,
        outcome: &PredictionOutcome,
    ) -> Result<PredictionRecord, StorageError> {
        let record = PredictionRecord::new(prediction_id, reading, outcome, Utc::now());

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.initialize_locked()?;
        append_row(&self.path, &record)?;

        tracing::debug!(prediction_id = %record.prediction_id, "Prediction logged");
        Ok(record)
    }

    /// Every readable row, oldest first. Missing or unreadable logs read as empty.
    pub fn read_all(&self) -> Vec<PredictionRecord> {
        read_rows(&self.path)
    }

    /// The last `n` rows, oldest first.
    pub fn read_recent(&self, n: usize) -> Vec<PredictionRecord> {
        let mut rows = self.read_all();
        let skip = rows.len().saturating_sub(n);
        rows.drain(..skip);
        rows
    }

    pub fn count(&self) -> usize {
        self.read_all().len()
    }
}

/// Write `columns` as the header of `path` unless the file already has content.
pub(crate) fn ensure_header(path: &Path, columns: &[&str]) -> Result<(), StorageError> {
    let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if has_content {
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let file = File::create(path).map_err(|e| StorageError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(columns)
        .map_err(|e| StorageError::csv(path, e))?;
    writer.flush().map_err(|e| StorageError::io(path, e))?;

    tracing::info!(path = %path.display(), "Created log file");
    Ok(())
}

/// Append one serialised row without a header.
pub(crate) fn append_row<T: serde::Serialize>(path: &Path, row: &T) -> Result<(), StorageError> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .serialize(row)
        .map_err(|e| StorageError::csv(path, e))?;
    writer.flush().map_err(|e| StorageError::io(path, e))
}

/// Deserialise every well-formed row of `path`, skipping the rest.
pub(crate) fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(r) => r,
        Err(e) => {
            if path.exists() {
                tracing::warn!(path = %path.display(), error = %e, "Log unreadable, treating as empty");
            }
            return Vec::new();
        }
    };

    reader
        .deserialize()
        .enumerate()
        .filter_map(|(i, row)| match row {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(path = %path.display(), row = i + 1, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
