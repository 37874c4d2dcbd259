mod detection;
mod detection_result;
mod inference_config;
mod policy;
mod working_set;

pub use detection::{BoundingBox, Detection};
pub use detection_result::DetectionResult;
pub use inference_config::{
    ActiveConfiguration, ConfigurationDefaults, ConfigurationDocument, InferenceConfig,
};
pub use policy::{LabelingPolicy, SelectionPolicy};
pub use working_set::{ImageWorkingSet, WorkingImage, is_supported_image};
