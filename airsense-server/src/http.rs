//! Airsense HTTP REST API
//!
//! Axum-based HTTP server that exposes prediction, feedback and monitoring.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /                               : welcome message and model state
//! - GET  /health                         : readiness with model version
//! - POST /predict, /api/predict          : classify one sensor reading
//! - POST /feedback                       : record ground truth for a prediction
//! - GET  /predictions/recent             : tail of the prediction log
//! - GET  /metrics                        : Prometheus text exposition
//! - GET  /metrics/evidently              : aggregate prediction statistics
//! - GET  /metrics/evidently/cached       : last cached statistics
//! - GET  /metrics/evidently/drift        : current drift score
//! - POST /metrics/evidently/update-reports: run the reporting pipeline

use std::sync::Arc;
use std::time::Instant;

use airsense_core::models::{new_prediction_id, SensorReading};
use airsense_core::{
    AirsenseConfig, FeedbackService, MonitoringError, MonitoringService, PredictionError,
    PredictionLogger, PredictionService, ReportOutcome, Telemetry,
};
use anyhow::Result;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const DEFAULT_RECENT_LIMIT: usize = 100;
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state for all HTTP handlers
pub struct AppState {
    pub config: AirsenseConfig,
    pub predictor: Arc<PredictionService>,
    pub logger: Arc<PredictionLogger>,
    pub feedback: Arc<FeedbackService>,
    pub monitoring: Arc<MonitoringService>,
    pub telemetry: Telemetry,
}

impl AppState {
    /// Wire services around an existing predictor. Nothing touches the disk.
    pub fn new(
        config: AirsenseConfig,
        predictor: Arc<PredictionService>,
        telemetry: Telemetry,
    ) -> Self {
        let logger = Arc::new(PredictionLogger::new(&config.paths.prediction_log_path));
        let feedback = Arc::new(FeedbackService::new(&config.paths.ground_truth_log_path));
        let monitoring = Arc::new(MonitoringService::new(
            &config,
            logger.clone(),
            feedback.clone(),
            telemetry.clone(),
        ));
        Self {
            config,
            predictor,
            logger,
            feedback,
            monitoring,
            telemetry,
        }
    }

    /// Load the model and create both log files. The server still starts if
    /// the model is missing; predictions then answer 503.
    pub fn from_config(config: AirsenseConfig, telemetry: Telemetry) -> Self {
        let predictor = Arc::new(PredictionService::new(&config.paths));
        if !predictor.load() {
            tracing::warn!("Starting without a model, /predict will return 503");
        }
        let state = Self::new(config, predictor, telemetry);
        state.prepare_logs();
        state
    }

    pub fn prepare_logs(&self) {
        if let Err(e) = self.logger.initialize() {
            tracing::error!(error = %e, "Failed to initialise prediction log");
        }
        if let Err(e) = self.feedback.ensure_log_exists() {
            tracing::error!(error = %e, "Failed to initialise ground truth log");
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/api/predict", post(predict_handler))
        .route("/feedback", post(feedback_handler))
        .route("/predictions/recent", get(recent_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/evidently", get(snapshot_handler))
        .route("/metrics/evidently/cached", get(cached_snapshot_handler))
        .route("/metrics/evidently/drift", get(drift_handler))
        .route("/metrics/evidently/update-reports", post(update_reports_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_http_metrics))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = state.config.bind_addr();
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Airsense HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub prediction_id: String,
    pub target: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct RecentQuery {
    pub n: Option<usize>,
}

/// Log the error type, count it, and build the error body.
fn api_error(
    telemetry: &Telemetry,
    status: StatusCode,
    error_type: &str,
    message: impl Into<String>,
) -> (StatusCode, serde_json::Value) {
    telemetry.record_api_error(error_type);
    (
        status,
        json!({
            "error": message.into(),
            "status": "error",
        }),
    )
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn root_inner(state: &AppState) -> serde_json::Value {
    json!({
        "message": "Airsense indoor air quality API",
        "model_loaded": state.predictor.is_loaded(),
    })
}

pub fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let loaded = state.predictor.is_loaded();
    (
        StatusCode::OK,
        json!({
            "status": if loaded { "healthy" } else { "degraded" },
            "model_loaded": loaded,
            "model_version": state.predictor.version(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Inner predict: validates the reading, classifies it, logs it and
/// updates prediction telemetry.
pub async fn predict_inner(
    state: &AppState,
    payload: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let telemetry = &state.telemetry;

    if !state.predictor.is_loaded() {
        return api_error(
            telemetry,
            StatusCode::SERVICE_UNAVAILABLE,
            "model_not_loaded",
            "Model not loaded",
        );
    }

    let reading: SensorReading = match serde_json::from_value(payload) {
        Ok(r) => r,
        Err(e) => {
            return api_error(
                telemetry,
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                format!("invalid sensor reading: {e}"),
            );
        }
    };
    if let Err(e) = reading.validate() {
        telemetry.record_api_error("validation_error");
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": e.to_string(),
                "status": "error",
                "fields": e.fields,
            }),
        );
    }

    let start = Instant::now();
    let outcome = match state.predictor.predict_with_confidence(&reading).await {
        Ok(o) => o,
        Err(PredictionError::NotLoaded) => {
            return api_error(
                telemetry,
                StatusCode::SERVICE_UNAVAILABLE,
                "model_not_loaded",
                "Model not loaded",
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Prediction failed");
            return api_error(
                telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "prediction_error",
                "Internal error during prediction",
            );
        }
    };
    let latency = start.elapsed().as_secs_f64();

    let prediction_id = new_prediction_id();
    let logger = state.logger.clone();
    let id = prediction_id.clone();
    let logged =
        tokio::task::spawn_blocking(move || logger.log(&id, &reading, &outcome)).await;
    let timestamp = match logged {
        Ok(Ok(record)) => record.timestamp,
        Ok(Err(e)) => {
            // Best effort: the caller still gets the prediction.
            tracing::error!(prediction_id = %prediction_id, error = %e, "Prediction not persisted");
            telemetry.record_api_error("prediction_logging");
            Utc::now()
        }
        Err(e) => {
            tracing::error!(prediction_id = %prediction_id, error = %e, "Prediction log task failed");
            telemetry.record_api_error("prediction_logging");
            Utc::now()
        }
    };

    let model_version = state.predictor.version();
    telemetry.record_sensor_data(&reading);
    telemetry.record_prediction(&model_version, outcome.decision, outcome.confidence, latency);
    telemetry.record_ventilation(outcome.decision);

    (
        StatusCode::OK,
        json!({
            "prediction_id": prediction_id,
            "prediction": outcome.decision.label(),
            "confidence": outcome.confidence,
            "action": outcome.decision.action(),
            "model_version": model_version,
            "timestamp": timestamp,
        }),
    )
}

/// Inner feedback: appends ground truth; unknown ids are accepted.
pub async fn feedback_inner(
    state: &AppState,
    req: FeedbackRequest,
) -> (StatusCode, serde_json::Value) {
    let telemetry = &state.telemetry;

    if req.prediction_id.trim().is_empty() {
        return api_error(
            telemetry,
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "prediction_id must not be empty",
        );
    }
    if !matches!(req.target, 0 | 1) {
        return api_error(
            telemetry,
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "target must be 0 (activate) or 1 (deactivate)",
        );
    }

    let feedback = state.feedback.clone();
    let (id, target) = (req.prediction_id.clone(), req.target);
    let submitted = tokio::task::spawn_blocking(move || feedback.submit(&id, target)).await;

    match submitted {
        Ok(Ok(record)) => (
            StatusCode::CREATED,
            json!({
                "status": "success",
                "prediction_id": record.prediction_id,
                "target": record.target,
                "timestamp": record.timestamp,
            }),
        ),
        Ok(Err(e)) => {
            tracing::error!(prediction_id = %req.prediction_id, error = %e, "Feedback not persisted");
            api_error(
                telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "feedback_error",
                "Internal error while saving feedback",
            )
        }
        Err(e) => {
            tracing::error!(prediction_id = %req.prediction_id, error = %e, "Feedback task failed");
            api_error(
                telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "feedback_error",
                "Internal error while saving feedback",
            )
        }
    }
}

pub fn recent_inner(state: &AppState, query: RecentQuery) -> serde_json::Value {
    let rows = state
        .logger
        .read_recent(query.n.unwrap_or(DEFAULT_RECENT_LIMIT));
    json!({
        "count": rows.len(),
        "predictions": rows,
    })
}

pub fn snapshot_inner(state: &AppState) -> serde_json::Value {
    json!(state.monitoring.compute_snapshot_metrics())
}

pub fn cached_snapshot_inner(state: &AppState) -> serde_json::Value {
    match state.monitoring.read_cached_metrics() {
        Some(snapshot) => json!(snapshot),
        None => json!({
            "status": "no_data",
            "message": "no cached metrics yet",
        }),
    }
}

pub async fn drift_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let monitoring = state.monitoring.clone();
    match tokio::task::spawn_blocking(move || monitoring.current_drift()).await {
        Ok(status) => (StatusCode::OK, json!(status)),
        Err(e) => {
            tracing::error!(error = %e, "Drift task failed");
            api_error(
                &state.telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "drift_check",
                "Internal error during drift check",
            )
        }
    }
}

/// Inner update-reports: runs the reporting pipeline on the blocking pool.
pub async fn update_reports_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let monitoring = state.monitoring.clone();
    let model_version = state.predictor.version();

    let result =
        tokio::task::spawn_blocking(move || monitoring.update_reports(&model_version)).await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, outcome_to_json(&outcome)),
        Ok(Err(MonitoringError::MissingInput { path })) => api_error(
            &state.telemetry,
            StatusCode::NOT_FOUND,
            "missing_input",
            format!("Missing input file: {}", path.display()),
        ),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Report generation failed");
            api_error(
                &state.telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "report_generation",
                "Internal error during report generation",
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Report task failed");
            api_error(
                &state.telemetry,
                StatusCode::INTERNAL_SERVER_ERROR,
                "report_generation",
                "Internal error during report generation",
            )
        }
    }
}

/// JSON body for a finished report run.
pub fn outcome_to_json(outcome: &ReportOutcome) -> serde_json::Value {
    let mut body = json!({
        "status": outcome.status(),
        "message": outcome.message(),
    });
    if let Some(drift) = outcome.drift() {
        body["drift"] = json!({
            "drift_score": drift.drift_score,
            "dataset_drift": drift.dataset_drift,
            "drifted_features": drift.drifted_features(),
        });
    }
    match outcome {
        ReportOutcome::PerformanceSkipped { reason, .. } => {
            body["performance_skipped"] = json!(reason);
        }
        ReportOutcome::Complete {
            performance,
            reference_performance,
            ..
        } => {
            body["performance"] = json!(performance);
            body["reference_performance"] = json!(reference_performance);
        }
        ReportOutcome::NoData => {}
    }
    body
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner(&state)))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn predict_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(payload)) => predict_inner(&state, payload).await,
        Err(rejection) => api_error(
            &state.telemetry,
            rejection.status(),
            "invalid_body",
            rejection.body_text(),
        ),
    };
    (status, Json(body))
}

pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => feedback_inner(&state, req).await,
        Err(rejection) => api_error(
            &state.telemetry,
            rejection.status(),
            "invalid_body",
            rejection.body_text(),
        ),
    };
    (status, Json(body))
}

pub async fn recent_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(recent_inner(&state, query)))
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.telemetry.render(),
    )
}

pub async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(snapshot_inner(&state)))
}

pub async fn cached_snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(cached_snapshot_inner(&state)))
}

pub async fn drift_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = drift_inner(&state).await;
    (status, Json(body))
}

pub async fn update_reports_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = update_reports_inner(&state).await;
    (status, Json(body))
}

// ============================================================================
// Middleware
// ============================================================================

/// Count every request and time it, labelled by route template.
async fn track_http_metrics(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let handler = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    state.telemetry.record_http(
        &method,
        &handler,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Unit Tests (inner functions called directly)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use airsense_core::telemetry::API_ERRORS_TOTAL;
    use airsense_core::RecordingSink;

    fn unloaded_state(dir: &std::path::Path) -> (Arc<RecordingSink>, AppState) {
        let config = AirsenseConfig::with_base_dir(dir);
        let sink = Arc::new(RecordingSink::new());
        let predictor = Arc::new(PredictionService::new(&config.paths));
        (sink.clone(), AppState::new(config, predictor, Telemetry::new(sink)))
    }

    #[test]
    fn test_root_reports_model_state() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        let body = root_inner(&state);
        assert_eq!(body["model_loaded"], false);
        assert!(body["message"].is_string());
    }

    #[test]
    fn test_health_degraded_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        let (status, body) = health_inner(&state);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["model_version"], "1.0.0");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_predict_without_model_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, state) = unloaded_state(dir.path());
        let (status, body) = predict_inner(
            &state,
            json!({"temperature": 20, "humidity": 40, "co2": 500, "pm25": 5,
                   "pm10": 9, "tvoc": 30, "occupancy": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert_eq!(
            sink.counter_with_label(API_ERRORS_TOTAL, "error_type", "model_not_loaded"),
            1
        );
    }

    fn loaded_state(dir: &std::path::Path) -> (Arc<RecordingSink>, AppState) {
        use airsense_core::classifier::LinearModel;
        use airsense_core::models::FEATURE_COLUMNS;

        let model = LinearModel {
            classes: vec!["Poor".to_string(), "Good".to_string()],
            feature_names: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            scaler: None,
            coefficients: vec![vec![0.0, 0.0, -0.01, 0.0, 0.0, 0.0, 0.0]],
            intercepts: vec![5.0],
        };
        let classifier = Arc::new(airsense_core::LinearClassifier::new(model).unwrap());
        let config = AirsenseConfig::with_base_dir(dir);
        let sink = Arc::new(RecordingSink::new());
        let predictor = Arc::new(PredictionService::with_classifier(classifier, "2.0.0"));
        (sink.clone(), AppState::new(config, predictor, Telemetry::new(sink)))
    }

    #[tokio::test]
    async fn test_predict_logs_row_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = loaded_state(dir.path());
        let (status, body) = predict_inner(
            &state,
            json!({"temperature": 22, "humidity": 45, "co2": 1200, "pm25": 9,
                   "pm10": 14, "tvoc": 60, "occupancy": 4}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let rows = state.logger.read_all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].prediction_id, body["prediction_id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_predict_survives_unwritable_log() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, state) = loaded_state(dir.path());
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir_all(state.logger.path()).unwrap();

        let (status, body) = predict_inner(
            &state,
            json!({"temperature": 22, "humidity": 45, "co2": 400, "pm25": 9,
                   "pm10": 14, "tvoc": 60, "occupancy": 0}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["timestamp"].is_string());
        assert_eq!(
            sink.counter_with_label(API_ERRORS_TOTAL, "error_type", "prediction_logging"),
            1
        );
    }

    #[tokio::test]
    async fn test_feedback_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        let (status, _) = feedback_inner(
            &state,
            FeedbackRequest {
                prediction_id: "  ".to_string(),
                target: 0,
            },
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_feedback_rejects_non_binary_target() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        let (status, body) = feedback_inner(
            &state,
            FeedbackRequest {
                prediction_id: "abc".to_string(),
                target: 3,
            },
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("target"));
    }

    #[tokio::test]
    async fn test_feedback_orphan_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        let (status, body) = feedback_inner(
            &state,
            FeedbackRequest {
                prediction_id: "never-predicted".to_string(),
                target: 1,
            },
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["prediction_id"], "never-predicted");
    }

    #[test]
    fn test_cached_snapshot_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (_, state) = unloaded_state(dir.path());
        assert_eq!(cached_snapshot_inner(&state)["status"], "no_data");
    }

    #[test]
    fn test_outcome_to_json_no_data() {
        let body = outcome_to_json(&ReportOutcome::NoData);
        assert_eq!(body["status"], "no_data");
        assert!(body.get("drift").is_none());
    }
}
