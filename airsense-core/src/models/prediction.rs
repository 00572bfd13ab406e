use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reading::{sanitize, SensorReading};

/// Column order of the prediction log. Appends must never deviate from it.
pub const PREDICTION_LOG_COLUMNS: [&str; 12] = [
    "timestamp",
    "prediction_id",
    "temperature",
    "humidity",
    "co2",
    "pm25",
    "pm10",
    "tvoc",
    "occupancy",
    "prediction",
    "confidence",
    "action",
];

/// Fresh opaque identifier for a prediction.
pub fn new_prediction_id() -> String {
    Uuid::new_v4().to_string()
}

/// Binary ventilation decision.
///
/// Label 0 means the air needs ventilating (Moderate / Poor quality),
/// label 1 means it does not (Good quality).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VentilationDecision {
    Activate,
    Deactivate,
}

impl VentilationDecision {
    pub fn label(self) -> u8 {
        match self {
            Self::Activate => 0,
            Self::Deactivate => 1,
        }
    }

    pub fn from_label(label: i64) -> Option<Self> {
        match label {
            0 => Some(Self::Activate),
            1 => Some(Self::Deactivate),
            _ => None,
        }
    }

    /// Human-readable action written to the log and returned to callers.
    pub fn action(self) -> &'static str {
        match self {
            Self::Activate => "activate_ventilation",
            Self::Deactivate => "deactivate_ventilation",
        }
    }

    /// Map a classifier's native class label onto the binary convention.
    ///
    /// Unknown labels fall back to `Activate`.
    pub fn from_class_label(class: &str) -> Self {
        match class.trim() {
            "Good" | "1" => Self::Deactivate,
            "Moderate" | "Poor" | "0" => Self::Activate,
            other => {
                tracing::debug!(class = other, "Unknown class label, defaulting to activate");
                Self::Activate
            }
        }
    }
}

/// The outcome of one classifier call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionOutcome {
    pub decision: VentilationDecision,
    pub confidence: f64,
}

/// One row of the append-only prediction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub prediction_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub tvoc: f64,
    pub occupancy: f64,
    pub prediction: u8,
    pub confidence: f64,
    pub action: String,
}

impl PredictionRecord {
    /// Build a sanitized log row.
    pub fn new(
        prediction_id: impl Into<String>,
        reading: &SensorReading,
        outcome: &PredictionOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let r = reading.sanitized();
        Self {
            timestamp,
            prediction_id: prediction_id.into(),
            temperature: r.temperature,
            humidity: r.humidity,
            co2: r.co2,
            pm25: r.pm25,
            pm10: r.pm10,
            tvoc: r.tvoc,
            occupancy: r.occupancy,
            prediction: outcome.decision.label(),
            confidence: sanitize(outcome.confidence),
            action: outcome.decision.action().to_string(),
        }
    }

    pub fn reading(&self) -> SensorReading {
        SensorReading {
            temperature: self.temperature,
            humidity: self.humidity,
            co2: self.co2,
            pm25: self.pm25,
            pm10: self.pm10,
            tvoc: self.tvoc,
            occupancy: self.occupancy,
        }
    }

    pub fn decision(&self) -> Option<VentilationDecision> {
        VentilationDecision::from_label(i64::from(self.prediction))
    }
}
