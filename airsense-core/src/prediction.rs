use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::classifier::{argmax, create_classifier, Classifier, ModelError};
use crate::config::PathsConfig;
use crate::models::{PredictionOutcome, SensorReading, VentilationDecision};

/// Version reported when the version file is absent.
pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

/// Trimmed contents of the version file, or the default.
pub fn read_model_version(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
        Ok(_) => DEFAULT_MODEL_VERSION.to_string(),
        Err(e) => {
            tracing::debug!(
                path = %path.display(),
                error = %e,
                "No model version file, using default"
            );
            DEFAULT_MODEL_VERSION.to_string()
        }
    }
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model not loaded")]
    NotLoaded,

    #[error("Prediction failed: {0}")]
    Inference(#[from] ModelError),
}

#[derive(Clone)]
struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    version: String,
}

/// Owns the classifier and turns readings into ventilation decisions.
///
/// The loaded model is shared read-only across request handlers.
pub struct PredictionService {
    model_path: PathBuf,
    version_path: PathBuf,
    loaded: RwLock<Option<LoadedModel>>,
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("model_path", &self.model_path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl PredictionService {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            model_path: paths.model_path.clone(),
            version_path: paths.model_version_path.clone(),
            loaded: RwLock::new(None),
        }
    }

    /// A service that is already loaded with `classifier`.
    pub fn with_classifier(classifier: Arc<dyn Classifier>, version: impl Into<String>) -> Self {
        Self {
            model_path: PathBuf::new(),
            version_path: PathBuf::new(),
            loaded: RwLock::new(Some(LoadedModel {
                classifier,
                version: version.into(),
            })),
        }
    }

    /// Load the artifact and its version string.
    ///
    /// Returns false (and stays unloaded) if the artifact is missing or broken.
    pub fn load(&self) -> bool {
        let classifier = match create_classifier(&self.model_path) {
            Ok(c) => c,
            Err(ModelError::NotFound { path }) => {
                tracing::warn!(path = %path, "Model artifact not found, predictions disabled");
                return false;
            }
            Err(e) => {
                tracing::error!(path = %self.model_path.display(), error = %e, "Failed to load model");
                return false;
            }
        };

        let version = read_model_version(&self.version_path);
        tracing::info!(
            path = %self.model_path.display(),
            backend = classifier.name(),
            version = %version,
            "Model loaded"
        );

        let model = LoadedModel {
            classifier: Arc::from(classifier),
            version,
        };
        match self.loaded.write() {
            Ok(mut slot) => {
                *slot = Some(model);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Model slot lock poisoned");
                false
            }
        }
    }

    fn current(&self) -> Option<LoadedModel> {
        self.loaded.read().ok().and_then(|slot| slot.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Version of the loaded model, or the default when nothing is loaded.
    pub fn version(&self) -> String {
        self.current()
            .map(|m| m.version)
            .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string())
    }

    /// Classify one reading.
    ///
    /// Confidence is the largest class probability; the winning native label
    /// is mapped to a binary decision.
    pub async fn predict_with_confidence(
        &self,
        reading: &SensorReading,
    ) -> Result<PredictionOutcome, PredictionError> {
        let model = self.current().ok_or(PredictionError::NotLoaded)?;
        let classifier = model.classifier;

        let probabilities = classifier.predict_proba(&reading.features()).await?;
        let classes = classifier.classes();
        if probabilities.len() != classes.len() {
            return Err(ModelError::ClassMismatch {
                expected: classes.len(),
                actual: probabilities.len(),
            }
            .into());
        }

        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| ModelError::InvalidArtifact("empty probability vector".to_string()))?;
        if !confidence.is_finite() {
            return Err(ModelError::InvalidArtifact(format!(
                "non-finite probability {confidence} for class {}",
                classes[index]
            ))
            .into());
        }

        Ok(PredictionOutcome {
            decision: VentilationDecision::from_class_label(&classes[index]),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
