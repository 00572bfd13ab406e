pub mod feedback;
pub mod prediction;
pub mod reading;
pub mod timestamp;

pub use feedback::{FeedbackRecord, FEEDBACK_LOG_COLUMNS};
pub use prediction::{
    new_prediction_id, PredictionOutcome, PredictionRecord, VentilationDecision, PREDICTION_LOG_COLUMNS,
};
pub use reading::{
    sanitize, FieldError, SensorReading, ValidationError, FEATURE_COLUMNS, FEATURE_COUNT,
};
