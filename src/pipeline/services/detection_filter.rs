use crate::pipeline::types::Detection;

/// Keeps detections strictly above the score threshold, optionally of a
/// single class only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionFilter {
    pub score_threshold: f32,
    pub class_label: Option<u32>,
}

impl DetectionFilter {
    pub fn new(score_threshold: f32) -> Self {
        Self {
            score_threshold,
            class_label: None,
        }
    }

    pub fn with_class_label(mut self, class_label: Option<u32>) -> Self {
        self.class_label = class_label;
        self
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| self.class_label.is_none_or(|label| d.class_id == label))
            .filter(|d| d.confidence > self.score_threshold)
            .collect()
    }
}
