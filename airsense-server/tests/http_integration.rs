//! HTTP integration tests for the Airsense REST API
//!
//! Every test builds its own workspace in a temp dir (model artifact,
//! reference data, empty reports dir). They use both the inner function
//! approach and the Axum `oneshot` approach for full handler dispatch.

use std::path::Path;
use std::sync::Arc;

use airsense_core::models::FEATURE_COLUMNS;
use airsense_core::{AirsenseConfig, PrometheusSink, RecordingSink, Telemetry};
use airsense_server::http::{
    build_router, feedback_inner, predict_inner, update_reports_inner, AppState, FeedbackRequest,
};
use axum::http::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

// For oneshot testing
use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

/// The four readings the simulation driver sends, with their ground truth.
fn sample_readings() -> Vec<(Value, i64)> {
    vec![
        (
            json!({"temperature": 28.0, "humidity": 70.0, "co2": 1800, "pm25": 80.0,
                   "pm10": 120.0, "tvoc": 400, "occupancy": 50}),
            0,
        ),
        (
            json!({"temperature": 30.0, "humidity": 50.0, "co2": 500, "pm25": 10.0,
                   "pm10": 15.0, "tvoc": 50, "occupancy": 5}),
            0,
        ),
        (
            json!({"temperature": 22.0, "humidity": 45.0, "co2": 400, "pm25": 8.0,
                   "pm10": 12.0, "tvoc": 30, "occupancy": 0}),
            1,
        ),
        (
            json!({"temperature": 24.0, "humidity": 55.0, "co2": 1200, "pm25": 40.0,
                   "pm10": 60.0, "tvoc": 250, "occupancy": 30}),
            0,
        ),
    ]
}

fn write_model(config: &AirsenseConfig) {
    let model = json!({
        "classes": ["Good", "Moderate", "Poor"],
        "feature_names": FEATURE_COLUMNS,
        "coefficients": [
            [0.0, 0.0, -0.004, -0.05, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.004, 0.05, 0.0, 0.0, 0.0]
        ],
        "intercepts": [3.0, 0.0, -3.0]
    });
    let path = &config.paths.model_path;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, model.to_string()).unwrap();
    std::fs::write(&config.paths.model_version_path, "1.4.2\n").unwrap();
}

fn write_reference(config: &AirsenseConfig) {
    let mut body = FEATURE_COLUMNS.join(",");
    body.push_str(",target\n");
    for i in 0..120usize {
        let occupancy = (i * 7) % 45;
        body.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            19 + i % 10,
            35 + i % 40,
            380 + (i * 41) % 1500,
            4 + i % 70,
            8 + i % 110,
            20 + (i * 17) % 450,
            occupancy,
            if occupancy > 0 { 0 } else { 1 }
        ));
    }
    std::fs::write(&config.paths.reference_data_path, body).unwrap();
}

struct TestApp {
    _dir: TempDir,
    state: Arc<AppState>,
}

impl TestApp {
    fn reports_dir(&self) -> &Path {
        &self.state.config.paths.reports_dir
    }
}

fn make_app(with_model: bool, with_reference: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = AirsenseConfig::with_base_dir(dir.path());
    std::fs::create_dir_all(config.paths.model_path.parent().unwrap()).unwrap();
    if with_model {
        write_model(&config);
    }
    if with_reference {
        write_reference(&config);
    }
    let telemetry = Telemetry::new(Arc::new(PrometheusSink::new().unwrap()));
    let state = Arc::new(AppState::from_config(config, telemetry));
    TestApp { _dir: dir, state }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let router = build_router(app.state.clone());
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ===========================================================================
// Liveness
// ===========================================================================

#[tokio::test]
async fn test_health_reports_loaded_model() {
    let app = make_app(true, false);
    let (status, body) = send_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["model_version"], "1.4.2");
}

#[tokio::test]
async fn test_root_endpoint() {
    let app = make_app(false, false);
    let (status, body) = send_json(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_loaded"], false);
}

// ===========================================================================
// Prediction
// ===========================================================================

#[tokio::test]
async fn test_predict_returns_decision() {
    let app = make_app(true, false);
    let (reading, _) = sample_readings().remove(0);
    let (status, body) = send_json(&app, "POST", "/predict", Some(reading)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["prediction_id"].is_string());
    assert_eq!(body["prediction"], 0);
    assert_eq!(body["action"], "activate_ventilation");
    assert_eq!(body["model_version"], "1.4.2");
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
}

#[tokio::test]
async fn test_api_predict_alias_and_clean_air() {
    let app = make_app(true, false);
    let (reading, _) = sample_readings().remove(2);
    let (status, body) = send_json(&app, "POST", "/api/predict", Some(reading)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["action"], "deactivate_ventilation");
}

#[tokio::test]
async fn test_predict_without_model_is_503() {
    let app = make_app(false, false);
    let (reading, _) = sample_readings().remove(0);
    let (status, body) = send_json(&app, "POST", "/predict", Some(reading)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_predict_rejects_negative_values() {
    let app = make_app(true, false);
    let reading = json!({"temperature": 21.0, "humidity": 40.0, "co2": -5, "pm25": 5.0,
                         "pm10": 9.0, "tvoc": 20, "occupancy": 0});
    let (status, body) = send_json(&app, "POST", "/predict", Some(reading)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"][0]["field"], "co2");
}

#[tokio::test]
async fn test_predict_rejects_missing_field() {
    let app = make_app(true, false);
    let (status, _) = send_json(&app, "POST", "/predict", Some(json!({"temperature": 20}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_logged_prediction_matches_response() {
    let app = make_app(true, false);
    let (reading, _) = sample_readings().remove(3);
    let (_, body) = send_json(&app, "POST", "/predict", Some(reading)).await;

    let (status, recent) = send_json(&app, "GET", "/predictions/recent?n=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recent["count"], 1);
    let row = &recent["predictions"][0];
    assert_eq!(row["prediction_id"], body["prediction_id"]);
    assert_eq!(row["co2"], 1200.0);
    assert_eq!(row["prediction"], body["prediction"]);
}

// ===========================================================================
// Feedback
// ===========================================================================

#[tokio::test]
async fn test_feedback_created() {
    let app = make_app(false, false);
    let (status, body) = send_json(
        &app,
        "POST",
        "/feedback",
        Some(json!({"prediction_id": "abc", "target": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
}

// ===========================================================================
// Monitoring
// ===========================================================================

#[tokio::test]
async fn test_snapshot_no_data() {
    let app = make_app(true, false);
    let (status, body) = send_json(&app, "GET", "/metrics/evidently", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_data");
    assert_eq!(body["predictions_count"], 0);
}

#[tokio::test]
async fn test_drift_no_data_without_reference() {
    let app = make_app(true, false);
    let (status, body) = send_json(&app, "GET", "/metrics/evidently/drift", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_data");
    assert_eq!(body["drift_detected"], false);
    assert_eq!(body["drift_score"], 0.0);
}

#[tokio::test]
async fn test_update_reports_missing_reference_is_404() {
    let app = make_app(true, false);
    let (status, body) = update_reports_inner(&app.state).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("reference_data.csv"));
}

#[tokio::test]
async fn test_update_reports_empty_log_is_no_data() {
    let app = make_app(true, true);
    let (status, body) = send_json(&app, "POST", "/metrics/evidently/update-reports", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_data");
}

#[tokio::test]
async fn test_update_reports_disjoint_feedback_is_partial() {
    let app = make_app(true, true);
    let (reading, _) = sample_readings().remove(0);
    let (status, _) = predict_inner(&app.state, reading).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = feedback_inner(
        &app.state,
        FeedbackRequest {
            prediction_id: "unknown-id".to_string(),
            target: 0,
        },
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = update_reports_inner(&app.state).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["performance_skipped"], "no_matching_feedback");
    assert!(app.reports_dir().join("data_drift_report.html").exists());
    assert!(!app.reports_dir().join("classification_report.html").exists());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prediction_families() {
    let app = make_app(true, false);
    let (reading, _) = sample_readings().remove(0);
    send_json(&app, "POST", "/predict", Some(reading)).await;
    send(&app, "GET", "/this-does-not-exist", None).await;

    let (status, bytes) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("ml_predictions_total"));
    assert!(text.contains("ventilation_activations_total"));
    assert!(text.contains("air_co2_ppm"));
    assert!(text.contains("handler=\"/predict\""));
    assert!(text.contains("status_code=\"404\""));
}

// ===========================================================================
// End-to-end: predict, feedback, reports
// ===========================================================================

#[tokio::test]
async fn test_end_to_end_reports() {
    let app = make_app(true, true);

    let mut ids = Vec::new();
    for (reading, _) in sample_readings() {
        let (status, body) = send_json(&app, "POST", "/predict", Some(reading)).await;
        assert_eq!(status, StatusCode::OK);
        ids.push(body["prediction_id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids.len(), 4);

    for (id, (_, target)) in ids.iter().zip(sample_readings()) {
        let (status, _) = send_json(
            &app,
            "POST",
            "/feedback",
            Some(json!({"prediction_id": id, "target": target})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send_json(&app, "POST", "/metrics/evidently/update-reports", None).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["performance"]["support"], 4);
    assert!(app.reports_dir().join("data_drift_report.html").exists());
    assert!(app.reports_dir().join("classification_report.html").exists());

    let (_, snapshot) = send_json(&app, "GET", "/metrics/evidently", None).await;
    assert_eq!(snapshot["predictions_count"], 4);
    let (_, cached) = send_json(&app, "GET", "/metrics/evidently/cached", None).await;
    assert_eq!(cached["predictions_count"], 4);
}

#[tokio::test]
async fn test_recording_sink_counts_api_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = AirsenseConfig::with_base_dir(dir.path());
    let sink = Arc::new(RecordingSink::new());
    let state = AppState::from_config(config, Telemetry::new(sink.clone()));

    let (reading, _) = sample_readings().remove(0);
    let (status, _) = predict_inner(&state, reading).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(sink.counter_total("api_errors_total"), 1);
}
