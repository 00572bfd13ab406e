pub mod classifier;
pub mod config;
pub mod error;
pub mod feedback;
pub mod models;
pub mod monitoring;
pub mod onnx_classifier;
pub mod prediction;
pub mod prediction_log;
pub mod telemetry;

pub use classifier::{create_classifier, Classifier, LinearClassifier, ModelError};
pub use config::AirsenseConfig;
pub use error::{MonitoringError, StorageError};
pub use feedback::FeedbackService;
pub use monitoring::{MonitoringService, ReportOutcome};
pub use onnx_classifier::OnnxClassifier;
pub use prediction::{PredictionError, PredictionService};
pub use prediction_log::PredictionLogger;
pub use telemetry::{MetricsError, MetricsSink, NoopSink, PrometheusSink, RecordingSink, Telemetry};
