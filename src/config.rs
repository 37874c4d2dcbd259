use crate::error::AppError;
use crate::pipeline::types::{LabelingPolicy, SelectionPolicy};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PREDICTION_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STREAM_NAME: &str = "S3UploadStream";
pub const DEFAULT_DETECTOR_COMMAND: &str = "yolo-detect";

/// Settings supplied by the process environment.
///
/// Variable names are matched case-insensitively. The first four are
/// required, a missing one is a fatal startup error.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSettings {
    #[serde(rename = "default_smem_od_image_dir")]
    pub image_dir: PathBuf,
    #[serde(rename = "smem_od_model_dir")]
    pub model_dir: PathBuf,
    #[serde(rename = "inference_image_upload_bucket")]
    pub upload_bucket: String,
    #[serde(rename = "upload_data_dir")]
    pub upload_data_dir: PathBuf,

    #[serde(rename = "inference_configuration_document", default)]
    pub configuration_document: Option<PathBuf>,
    #[serde(rename = "inference_config_poll_secs", default = "default_poll_secs")]
    pub config_poll_secs: u64,
    #[serde(
        rename = "inference_config_fetch_attempts",
        default = "default_fetch_attempts"
    )]
    pub config_fetch_attempts: u32,
    #[serde(
        rename = "inference_detector_command",
        default = "default_detector_command"
    )]
    pub detector_command: String,
    #[serde(
        rename = "inference_score_threshold",
        default = "default_score_threshold"
    )]
    pub score_threshold: f32,
    #[serde(rename = "inference_class_label", default)]
    pub class_label: Option<u32>,
    #[serde(
        rename = "inference_request_timeout_secs",
        default = "default_request_timeout_secs"
    )]
    pub request_timeout_secs: u64,
    #[serde(rename = "inference_selection_policy", default)]
    pub selection_policy: SelectionPolicy,
    #[serde(rename = "inference_labeling_policy", default)]
    pub labeling_policy: LabelingPolicy,
    #[serde(rename = "inference_annotate_detections", default = "default_true")]
    pub annotate_detections: bool,
    #[serde(
        rename = "inference_upload_stream_name",
        default = "default_stream_name"
    )]
    pub stream_name: String,
}

fn default_poll_secs() -> u64 {
    5
}

fn default_fetch_attempts() -> u32 {
    1
}

fn default_detector_command() -> String {
    DEFAULT_DETECTOR_COMMAND.to_string()
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_stream_name() -> String {
    DEFAULT_STREAM_NAME.to_string()
}

impl EdgeSettings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_source(None)
    }

    /// Reads the settings from an explicit variable map instead of the
    /// process environment.
    pub fn from_source(source: Option<config::Map<String, String>>) -> Result<Self, AppError> {
        let settings: EdgeSettings = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .source(source),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(AppError::Settings(format!(
                "Score threshold must be between 0.0 and 1.0, got {}",
                self.score_threshold
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(AppError::Settings(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.config_fetch_attempts == 0 {
            return Err(AppError::Settings(
                "Configuration fetch attempts must be greater than 0".to_string(),
            ));
        }

        if self.upload_bucket.trim().is_empty() {
            return Err(AppError::Settings(
                "Upload bucket name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_secs(self.config_poll_secs.max(1))
    }
}
