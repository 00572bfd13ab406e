//! ONNX classifier backend: local inference via ONNX Runtime
//!
//! Expects a probabilistic classifier exported with dense outputs
//! (`[label, probabilities]`, probabilities shaped `[1, n_classes]`), and a
//! `<stem>-classes.json` sidecar listing the class labels in output order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;

use crate::classifier::{classes_sidecar_path, Classifier, ModelError};
use crate::models::FEATURE_COUNT;

/// Local ONNX classifier.
pub struct OnnxClassifier {
    session: Arc<Mutex<Session>>,
    classes: Vec<String>,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

impl OnnxClassifier {
    /// Load the model and its class sidecar.
    ///
    /// Returns `ModelError::NotFound` if either file is missing.
    pub fn new(model_path: PathBuf) -> Result<Self, ModelError> {
        let classes_path = classes_sidecar_path(&model_path);
        for path in [&model_path, &classes_path] {
            if !path.exists() {
                return Err(ModelError::NotFound {
                    path: path.display().to_string(),
                });
            }
        }

        let classes: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&classes_path)?)?;
        if classes.len() < 2 {
            return Err(ModelError::InvalidArtifact(format!(
                "{} must list at least two classes",
                classes_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            classes,
        })
    }
}

#[async_trait]
impl Classifier for OnnxClassifier {
    async fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Result<Vec<f64>, ModelError> {
        // ONNX inference is CPU-bound, run on the blocking thread pool.
        let session = Arc::clone(&self.session);
        let n_classes = self.classes.len();
        let row: Vec<f32> = features.iter().map(|&v| v as f32).collect();

        tokio::task::spawn_blocking(move || {
            let mut session_guard = session
                .lock()
                .map_err(|e| ModelError::OnnxInference(format!("session lock poisoned: {e}")))?;
            predict_sync(&mut session_guard, row, n_classes)
        })
        .await
        .map_err(|e| ModelError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Run ONNX inference synchronously on a single row.
fn predict_sync(
    session: &mut Session,
    row: Vec<f32>,
    n_classes: usize,
) -> Result<Vec<f64>, ModelError> {
    let shape = vec![1i64, FEATURE_COUNT as i64];
    let input = Tensor::from_array((shape, row))
        .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

    if outputs.len() < 2 {
        return Err(ModelError::OnnxInference(format!(
            "Expected label and probability outputs, got {}",
            outputs.len()
        )));
    }

    // try_extract_tensor returns (&Shape, &[f32])
    let (_shape, probabilities) = outputs[1]
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

    if probabilities.len() != n_classes {
        return Err(ModelError::ClassMismatch {
            expected: n_classes,
            actual: probabilities.len(),
        });
    }

    Ok(probabilities.iter().map(|&p| f64::from(p)).collect())
}
