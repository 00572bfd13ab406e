use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of model input features.
pub const FEATURE_COUNT: usize = 7;

/// Canonical feature order shared by the model, the logs and the reports.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "temperature",
    "humidity",
    "co2",
    "pm25",
    "pm10",
    "tvoc",
    "occupancy",
];

/// One indoor air-quality measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
    pub pm25: f64,
    pub pm10: f64,
    pub tvoc: f64,
    pub occupancy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// A reading that was rejected at the boundary.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid sensor reading: {}", format_fields(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SensorReading {
    /// Values in `FEATURE_COLUMNS` order.
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.temperature,
            self.humidity,
            self.co2,
            self.pm25,
            self.pm10,
            self.tvoc,
            self.occupancy,
        ]
    }

    pub fn from_features(values: [f64; FEATURE_COUNT]) -> Self {
        let [temperature, humidity, co2, pm25, pm10, tvoc, occupancy] = values;
        Self {
            temperature,
            humidity,
            co2,
            pm25,
            pm10,
            tvoc,
            occupancy,
        }
    }

    /// Every field must be finite and non-negative.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields: Vec<FieldError> = FEATURE_COLUMNS
            .iter()
            .zip(self.features())
            .filter_map(|(&field, value)| {
                let message = if !value.is_finite() {
                    "must be a finite number"
                } else if value < 0.0 {
                    "must be greater than or equal to 0"
                } else {
                    return None;
                };
                Some(FieldError {
                    field,
                    message: message.to_string(),
                })
            })
            .collect();

        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields })
        }
    }

    /// Copy with NaN / infinite values replaced by zero.
    pub fn sanitized(&self) -> Self {
        Self::from_features(self.features().map(sanitize))
    }
}

/// Replace NaN / infinite values with zero so rows stay CSV and JSON safe.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> SensorReading {
        SensorReading {
            temperature: 28.0,
            humidity: 70.0,
            co2: 1800.0,
            pm25: 80.0,
            pm10: 120.0,
            tvoc: 400.0,
            occupancy: 50.0,
        }
    }

    #[test]
    fn test_features_follow_column_order() {
        let r = reading();
        assert_eq!(r.features(), [28.0, 70.0, 1800.0, 80.0, 120.0, 400.0, 50.0]);
        assert_eq!(SensorReading::from_features(r.features()), r);
    }

    #[test]
    fn test_validate_accepts_zeroes() {
        let r = SensorReading::from_features([0.0; FEATURE_COUNT]);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_bad_field() {
        let mut r = reading();
        r.co2 = -1.0;
        r.tvoc = f64::NAN;
        let err = r.validate().unwrap_err();
        let fields: Vec<_> = err.fields.iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["co2", "tvoc"]);
        assert!(err.to_string().contains("co2 must be greater than or equal to 0"));
    }

    #[test]
    fn test_validation_error_message_lists_fields() {
        let mut r = reading();
        r.pm25 = -3.0;
        let err: Box<dyn std::error::Error> = Box::new(r.validate().unwrap_err());
        assert_eq!(
            err.to_string(),
            "invalid sensor reading: pm25 must be greater than or equal to 0"
        );
    }

    #[test]
    fn test_sanitized_replaces_non_finite() {
        let mut r = reading();
        r.humidity = f64::INFINITY;
        r.pm10 = f64::NAN;
        let clean = r.sanitized();
        assert_eq!(clean.humidity, 0.0);
        assert_eq!(clean.pm10, 0.0);
        assert_eq!(clean.co2, 1800.0);
    }

    #[test]
    fn test_deserialize_rejects_missing_field() {
        let body = serde_json::json!({"temperature": 20.0, "humidity": 40.0});
        assert!(serde_json::from_value::<SensorReading>(body).is_err());
    }
}
