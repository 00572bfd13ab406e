//! One-shot modes of the server binary: health check, report generation and
//! reference-data preparation.

use std::sync::Arc;

use airsense_core::monitoring::{prepare_reference_data, PrepareOutcome};
use airsense_core::prediction::read_model_version;
use airsense_core::{
    AirsenseConfig, FeedbackService, MonitoringService, PredictionLogger, PredictionService,
    ReportOutcome, Telemetry,
};
use anyhow::{Context, Result};

/// Print the state of every input the server depends on.
///
/// Returns false when the model cannot be loaded.
pub fn health_check(config: &AirsenseConfig) -> bool {
    let paths = &config.paths;
    let predictor = PredictionService::new(paths);
    let model_ok = predictor.load();

    if model_ok {
        println!(
            "✅ Model loaded: {} (version {})",
            paths.model_path.display(),
            predictor.version()
        );
    } else {
        println!("❌ Model not loadable: {}", paths.model_path.display());
    }

    for (label, path) in [
        ("Reference data", &paths.reference_data_path),
        ("Prediction log", &paths.prediction_log_path),
        ("Ground truth log", &paths.ground_truth_log_path),
    ] {
        if path.exists() {
            println!("✅ {label}: {}", path.display());
        } else {
            println!("⚠️  {label} missing: {}", path.display());
        }
    }

    model_ok
}

/// Run the reporting pipeline once, outside the HTTP server.
pub fn update_reports(config: &AirsenseConfig, telemetry: Telemetry) -> Result<ReportOutcome> {
    let logger = Arc::new(PredictionLogger::new(&config.paths.prediction_log_path));
    let feedback = Arc::new(FeedbackService::new(&config.paths.ground_truth_log_path));
    let monitoring = MonitoringService::new(config, logger, feedback, telemetry);

    let model_version = read_model_version(&config.paths.model_version_path);
    let outcome = monitoring
        .update_reports(&model_version)
        .context("report generation failed")?;
    Ok(outcome)
}

pub fn prepare_reference(config: &AirsenseConfig, force: bool) -> Result<PrepareOutcome> {
    prepare_reference_data(config, force).with_context(|| {
        format!(
            "failed to prepare reference data from {}",
            config.paths.full_dataset_path.display()
        )
    })
}
