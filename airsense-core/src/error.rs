use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or appending the CSV logs.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Invalid value '{value}' for column '{column}' in {path}")]
    InvalidValue {
        path: PathBuf,
        column: String,
        value: String,
    },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the reporting pipeline.
#[derive(Error, Debug)]
pub enum MonitoringError {
    /// A required input file is absent. Distinct from "present but empty".
    #[error("Missing input file: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
