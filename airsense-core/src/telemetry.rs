//! Metrics sink abstraction and the domain-level telemetry facade
//!
//! Services never talk to a recorder directly. They hold a [`Telemetry`],
//! which forwards to an injected [`MetricsSink`] and swallows any failure:
//! recording a metric must never fail the request that triggered it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metrics::Label;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusRecorder};
use thiserror::Error;

use crate::models::{SensorReading, VentilationDecision};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUESTS_LATENCY_SECONDS: &str = "http_requests_latency_seconds";
pub const API_ERRORS_TOTAL: &str = "api_errors_total";
pub const ML_PREDICTIONS_TOTAL: &str = "ml_predictions_total";
pub const ML_PREDICTION_LATENCY_SECONDS: &str = "ml_prediction_latency_seconds";
pub const ML_PREDICTION_CONFIDENCE: &str = "ml_prediction_confidence";
pub const ML_PREDICTION_CONFIDENCE_DISTRIBUTION: &str = "ml_prediction_confidence_distribution";
pub const ML_DATA_DRIFT_SCORE: &str = "ml_data_drift_score";
pub const ML_FEATURE_DRIFT_DETECTED_TOTAL: &str = "ml_feature_drift_detected_total";
pub const ML_MODEL_ACCURACY: &str = "ml_model_accuracy";
pub const ML_MODEL_F1: &str = "ml_model_f1";
pub const VENTILATION_STATUS: &str = "ventilation_status";
pub const VENTILATION_ACTIVATIONS_TOTAL: &str = "ventilation_activations_total";

/// Gauge name per sensor feature, in `FEATURE_COLUMNS` order.
pub const SENSOR_GAUGES: [&str; 7] = [
    "air_temperature_celsius",
    "air_humidity_percent",
    "air_co2_ppm",
    "air_pm25_micrograms_per_m3",
    "air_pm10_micrograms_per_m3",
    "air_tvoc_ppb",
    "room_occupancy_status",
];

const HTTP_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.5, 5.0, 10.0];
const PREDICTION_LATENCY_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5];
const CONFIDENCE_BUCKETS: [f64; 10] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

pub type Labels<'a> = &'a [(&'a str, &'a str)];

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Invalid metric name '{0}'")]
    InvalidName(String),

    #[error("Non-finite value {value} for metric '{name}'")]
    NonFinite { name: String, value: f64 },

    #[error("Metrics recorder error: {0}")]
    Recorder(String),
}

/// Capability set every metrics backend provides.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, labels: Labels<'_>, value: u64)
        -> Result<(), MetricsError>;

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) -> Result<(), MetricsError>;

    fn observe_histogram(&self, name: &str, labels: Labels<'_>, value: f64)
        -> Result<(), MetricsError>;

    /// Text exposition of everything recorded so far.
    fn render(&self) -> Result<String, MetricsError>;
}

fn check_name(name: &str) -> Result<(), MetricsError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
        Ok(())
    } else {
        Err(MetricsError::InvalidName(name.to_string()))
    }
}

fn check_value(name: &str, value: f64) -> Result<(), MetricsError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MetricsError::NonFinite {
            name: name.to_string(),
            value,
        })
    }
}

// ============================================================================
// PrometheusSink
// ============================================================================

/// Prometheus-backed sink with its own (non-global) recorder.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink").finish_non_exhaustive()
    }
}

impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUESTS_LATENCY_SECONDS.to_string()),
                &HTTP_LATENCY_BUCKETS,
            )
            .and_then(|b| {
                b.set_buckets_for_metric(
                    Matcher::Full(ML_PREDICTION_LATENCY_SECONDS.to_string()),
                    &PREDICTION_LATENCY_BUCKETS,
                )
            })
            .and_then(|b| {
                b.set_buckets_for_metric(
                    Matcher::Full(ML_PREDICTION_CONFIDENCE_DISTRIBUTION.to_string()),
                    &CONFIDENCE_BUCKETS,
                )
            })
            .map_err(|e| MetricsError::Recorder(e.to_string()))?
            .build_recorder();

        Ok(Self { recorder })
    }
}

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
        .collect()
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(
        &self,
        name: &str,
        labels: Labels<'_>,
        value: u64,
    ) -> Result<(), MetricsError> {
        check_name(name)?;
        let labels = to_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!(name.to_string(), labels).increment(value);
        });
        Ok(())
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) -> Result<(), MetricsError> {
        check_name(name)?;
        check_value(name, value)?;
        let labels = to_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::gauge!(name.to_string(), labels).set(value);
        });
        Ok(())
    }

    fn observe_histogram(
        &self,
        name: &str,
        labels: Labels<'_>,
        value: f64,
    ) -> Result<(), MetricsError> {
        check_name(name)?;
        check_value(name, value)?;
        let labels = to_labels(labels);
        metrics::with_local_recorder(&self.recorder, || {
            metrics::histogram!(name.to_string(), labels).record(value);
        });
        Ok(())
    }

    fn render(&self) -> Result<String, MetricsError> {
        Ok(self.recorder.handle().render())
    }
}

// ============================================================================
// NoopSink / RecordingSink
// ============================================================================

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment_counter(&self, _: &str, _: Labels<'_>, _: u64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn set_gauge(&self, _: &str, _: Labels<'_>, _: f64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn observe_histogram(&self, _: &str, _: Labels<'_>, _: f64) -> Result<(), MetricsError> {
        Ok(())
    }

    fn render(&self) -> Result<String, MetricsError> {
        Ok(String::new())
    }
}

/// One call captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Counter {
        name: String,
        labels: Vec<(String, String)>,
        value: u64,
    },
    Gauge {
        name: String,
        labels: Vec<(String, String)>,
        value: f64,
    },
    Histogram {
        name: String,
        labels: Vec<(String, String)>,
        value: f64,
    },
}

impl MetricEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Counter { name, .. } | Self::Gauge { name, .. } | Self::Histogram { name, .. } => {
                name
            }
        }
    }

    pub fn labels(&self) -> &[(String, String)] {
        match self {
            Self::Counter { labels, .. }
            | Self::Gauge { labels, .. }
            | Self::Histogram { labels, .. } => labels,
        }
    }

    fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels().iter().any(|(k, v)| k == key && v == value)
    }
}

/// Keeps every call in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Sum of every increment of counter `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.events()
            .iter()
            .filter_map(|e| match e {
                MetricEvent::Counter { name: n, value, .. } if n == name => Some(*value),
                _ => None,
            })
            .sum()
    }

    /// Sum of increments of counter `name` carrying label `key=value`.
    pub fn counter_with_label(&self, name: &str, key: &str, value: &str) -> u64 {
        self.events()
            .iter()
            .filter(|e| e.name() == name && e.has_label(key, value))
            .filter_map(|e| match e {
                MetricEvent::Counter { value, .. } => Some(*value),
                _ => None,
            })
            .sum()
    }

    /// Most recent value of gauge `name`, regardless of labels.
    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.events().iter().rev().find_map(|e| match e {
            MetricEvent::Gauge { name: n, value, .. } if n == name => Some(*value),
            _ => None,
        })
    }

    fn push(&self, event: MetricEvent) -> Result<(), MetricsError> {
        self.events
            .lock()
            .map_err(|e| MetricsError::Recorder(e.to_string()))?
            .push(event);
        Ok(())
    }
}

fn owned(labels: Labels<'_>) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetricsSink for RecordingSink {
    fn increment_counter(
        &self,
        name: &str,
        labels: Labels<'_>,
        value: u64,
    ) -> Result<(), MetricsError> {
        check_name(name)?;
        self.push(MetricEvent::Counter {
            name: name.to_string(),
            labels: owned(labels),
            value,
        })
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) -> Result<(), MetricsError> {
        check_name(name)?;
        check_value(name, value)?;
        self.push(MetricEvent::Gauge {
            name: name.to_string(),
            labels: owned(labels),
            value,
        })
    }

    fn observe_histogram(
        &self,
        name: &str,
        labels: Labels<'_>,
        value: f64,
    ) -> Result<(), MetricsError> {
        check_name(name)?;
        check_value(name, value)?;
        self.push(MetricEvent::Histogram {
            name: name.to_string(),
            labels: owned(labels),
            value,
        })
    }

    fn render(&self) -> Result<String, MetricsError> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for event in self.events() {
            let (name, value) = match event {
                MetricEvent::Counter { name, value, .. } => (name, value as f64),
                MetricEvent::Gauge { name, value, .. } => (name, value),
                MetricEvent::Histogram { name, value, .. } => (name, value),
            };
            *totals.entry(name).or_default() += value;
        }
        let mut lines: Vec<String> = totals.into_iter().map(|(n, v)| format!("{n} {v}")).collect();
        lines.sort();
        Ok(lines.join("\n"))
    }
}

// ============================================================================
// Telemetry facade
// ============================================================================

/// Domain-level metric updates over an injected sink.
///
/// Every method is fire-and-forget.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::noop()
    }
}

impl Telemetry {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    pub fn render(&self) -> String {
        match self.sink.render() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render metrics");
                String::new()
            }
        }
    }

    fn counter(&self, name: &str, labels: Labels<'_>, value: u64) {
        if let Err(e) = self.sink.increment_counter(name, labels, value) {
            tracing::error!(metric = name, error = %e, "Failed to record counter");
        }
    }

    fn gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        if let Err(e) = self.sink.set_gauge(name, labels, value) {
            tracing::error!(metric = name, error = %e, "Failed to record gauge");
        }
    }

    fn histogram(&self, name: &str, labels: Labels<'_>, value: f64) {
        if let Err(e) = self.sink.observe_histogram(name, labels, value) {
            tracing::error!(metric = name, error = %e, "Failed to record histogram");
        }
    }

    pub fn record_http(&self, method: &str, handler: &str, status_code: u16, latency_secs: f64) {
        let status = status_code.to_string();
        self.counter(
            HTTP_REQUESTS_TOTAL,
            &[("method", method), ("handler", handler), ("status_code", status.as_str())],
            1,
        );
        self.histogram(HTTP_REQUESTS_LATENCY_SECONDS, &[("handler", handler)], latency_secs);
    }

    pub fn record_api_error(&self, error_type: &str) {
        tracing::warn!(error_type, "API error recorded");
        self.counter(API_ERRORS_TOTAL, &[("error_type", error_type)], 1);
    }

    pub fn record_prediction(
        &self,
        model_version: &str,
        decision: VentilationDecision,
        confidence: f64,
        latency_secs: f64,
    ) {
        let class = decision.label().to_string();
        let version = [("model_version", model_version)];
        let by_class = [("model_version", model_version), ("prediction_class", class.as_str())];

        self.counter(ML_PREDICTIONS_TOTAL, &by_class, 1);
        self.histogram(ML_PREDICTION_LATENCY_SECONDS, &version, latency_secs);
        self.gauge(ML_PREDICTION_CONFIDENCE, &by_class, confidence);
        self.histogram(ML_PREDICTION_CONFIDENCE_DISTRIBUTION, &version, confidence);

        tracing::info!(
            model_version,
            prediction_class = %class,
            confidence,
            latency_secs,
            "Prediction recorded"
        );
    }

    pub fn record_sensor_data(&self, reading: &SensorReading) {
        for (gauge, value) in SENSOR_GAUGES.iter().zip(reading.features()) {
            self.gauge(gauge, &[], value);
        }
    }

    /// `ventilation_status` follows the decision; activations are counted.
    pub fn record_ventilation(&self, decision: VentilationDecision) {
        match decision {
            VentilationDecision::Activate => {
                self.gauge(VENTILATION_STATUS, &[], 1.0);
                self.counter(VENTILATION_ACTIVATIONS_TOTAL, &[], 1);
            }
            VentilationDecision::Deactivate => self.gauge(VENTILATION_STATUS, &[], 0.0),
        }
    }

    pub fn update_drift<'a>(&self, score: f64, drifted_features: impl IntoIterator<Item = &'a str>) {
        self.gauge(ML_DATA_DRIFT_SCORE, &[], score);
        for feature in drifted_features {
            self.counter(ML_FEATURE_DRIFT_DETECTED_TOTAL, &[("feature_name", feature)], 1);
        }
        tracing::info!(drift_score = score, "Drift metrics updated");
    }

    pub fn update_performance(&self, model_version: &str, accuracy: f64, f1: f64) {
        let version = [("model_version", model_version)];
        self.gauge(ML_MODEL_ACCURACY, &version, accuracy);
        self.gauge(ML_MODEL_F1, &version, f1);
        tracing::info!(model_version, accuracy, f1, "Performance metrics updated");
    }
}

// ============================================================================
// TESTS
// ============================================================================
