//! Classifier backends for the ventilation model
//!
//! Provides a `Classifier` trait with implementations for:
//! - **Linear**: logistic-regression weights exported to JSON (`.json`)
//! - **ONNX**: any probabilistic classifier exported to ONNX (`.onnx`)
//!
//! The artifact's file extension picks the backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{FEATURE_COLUMNS, FEATURE_COUNT};

// ============================================================================
// Classifier trait
// ============================================================================

/// Abstraction over a trained, probabilistic classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Class probabilities for one feature row, aligned with `classes()`.
    async fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Result<Vec<f64>, ModelError>;

    /// Native class labels, in output order.
    fn classes(&self) -> &[String];

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model artifact not found at {path}")]
    NotFound { path: String },

    #[error("Unsupported model artifact '{path}' (expected .json or .onnx)")]
    UnsupportedFormat { path: String },

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("IO error reading model: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Model returned {actual} probabilities for {expected} classes")]
    ClassMismatch { expected: usize, actual: usize },
}

/// Load the classifier stored at `path`.
pub fn create_classifier(path: &Path) -> Result<Box<dyn Classifier>, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound {
            path: path.display().to_string(),
        });
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Box::new(LinearClassifier::from_file(path)?)),
        Some("onnx") => Ok(Box::new(crate::onnx_classifier::OnnxClassifier::new(
            path.to_path_buf(),
        )?)),
        _ => Err(ModelError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

/// Index and value of the largest probability. Ties keep the first class.
pub fn argmax(probabilities: &[f64]) -> Option<(usize, f64)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

// ============================================================================
// LinearClassifier
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Serialized logistic-regression weights.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub classes: Vec<String>,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    /// One row per class, or a single row for a binary model.
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

/// Logistic-regression classifier evaluated in-process.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    model: LinearModel,
}

impl LinearClassifier {
    pub fn new(model: LinearModel) -> Result<Self, ModelError> {
        if model.feature_names != FEATURE_COLUMNS {
            return Err(ModelError::InvalidArtifact(format!(
                "feature_names must be {:?}, got {:?}",
                FEATURE_COLUMNS, model.feature_names
            )));
        }
        if model.classes.len() < 2 {
            return Err(ModelError::InvalidArtifact(
                "at least two classes are required".to_string(),
            ));
        }

        let binary = model.classes.len() == 2 && model.coefficients.len() == 1;
        if !binary && model.coefficients.len() != model.classes.len() {
            return Err(ModelError::InvalidArtifact(format!(
                "{} coefficient rows for {} classes",
                model.coefficients.len(),
                model.classes.len()
            )));
        }
        if model.intercepts.len() != model.coefficients.len() {
            return Err(ModelError::InvalidArtifact(format!(
                "{} intercepts for {} coefficient rows",
                model.intercepts.len(),
                model.coefficients.len()
            )));
        }
        if let Some(row) = model.coefficients.iter().find(|r| r.len() != FEATURE_COUNT) {
            return Err(ModelError::InvalidArtifact(format!(
                "coefficient row has {} weights, expected {}",
                row.len(),
                FEATURE_COUNT
            )));
        }
        if let Some(scaler) = &model.scaler {
            if scaler.mean.len() != FEATURE_COUNT || scaler.scale.len() != FEATURE_COUNT {
                return Err(ModelError::InvalidArtifact(
                    "scaler mean/scale must have one entry per feature".to_string(),
                ));
            }
        }

        Ok(Self { model })
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        let model: LinearModel = serde_json::from_str(&raw)?;
        Self::new(model)
    }

    fn scaled(&self, features: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut x = *features;
        if let Some(scaler) = &self.model.scaler {
            for (i, v) in x.iter_mut().enumerate() {
                let scale = if scaler.scale[i] == 0.0 { 1.0 } else { scaler.scale[i] };
                *v = (*v - scaler.mean[i]) / scale;
            }
        }
        x
    }

    fn decision(&self, x: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        self.model
            .coefficients
            .iter()
            .zip(&self.model.intercepts)
            .map(|(w, b)| w.iter().zip(x).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }
}

#[async_trait]
impl Classifier for LinearClassifier {
    async fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Result<Vec<f64>, ModelError> {
        let x = self.scaled(features);
        let scores = self.decision(&x);

        if scores.len() == 1 {
            let p = 1.0 / (1.0 + (-scores[0]).exp());
            return Ok(vec![1.0 - p, p]);
        }

        // Shift by the max before exponentiating to keep softmax finite
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        Ok(exps.into_iter().map(|e| e / total).collect())
    }

    fn classes(&self) -> &[String] {
        &self.model.classes
    }

    fn name(&self) -> &str {
        "linear"
    }
}

/// Sidecar file holding the class labels of an ONNX model.
pub fn classes_sidecar_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    model_path.with_file_name(format!("{stem}-classes.json"))
}

// ============================================================================
// TESTS
// ============================================================================
