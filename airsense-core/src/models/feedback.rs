use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FEEDBACK_LOG_COLUMNS: [&str; 3] = ["prediction_id", "target", "timestamp"];

/// Ground truth for a prediction, supplied after the fact.
///
/// `prediction_id` is not checked against the prediction log when written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub prediction_id: String,
    pub target: i64,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}
