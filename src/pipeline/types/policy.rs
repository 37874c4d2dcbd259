use serde::Deserialize;

/// When the source image of a run is archived for human labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelingPolicy {
    /// Archive only runs that produced detections above the threshold.
    #[default]
    OnDetection,
    /// Archive every run regardless of outcome.
    Always,
    /// Archive only runs where the detector found nothing.
    OnMiss,
}

impl LabelingPolicy {
    pub fn archives(&self, has_detections: bool) -> bool {
        match self {
            LabelingPolicy::OnDetection => has_detections,
            LabelingPolicy::Always => true,
            LabelingPolicy::OnMiss => !has_detections,
        }
    }
}

/// How the next image is picked from the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Uniform random choice, images may repeat between runs.
    #[default]
    Random,
    /// Cycle through the images in file name order.
    RoundRobin,
}
