pub mod annotation;
pub mod detection_filter;
pub mod detector;
pub mod inference_service;
pub mod result_sink;

pub use detection_filter::DetectionFilter;
pub use detector::{CommandDetector, Detector};
pub use inference_service::{InferenceRequest, InferenceService, RunOptions, RunOutcome};
pub use result_sink::{BlobUploader, QualityOfService, ResultPublisher};
