use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::types::Detection;

/// Outcome of one detection pass that found something worth reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    #[serde(skip)]
    pub capture_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub image_name: String,
    #[serde(rename = "inference_results")]
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(image_name: impl Into<String>, detections: Vec<Detection>) -> Self {
        Self {
            capture_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            image_name: image_name.into(),
            detections,
        }
    }

    /// The JSON document sent to the results topic.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
