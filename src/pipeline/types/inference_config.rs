use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_PREDICTION_INTERVAL_SECS, EdgeSettings};
use crate::error::AppError;
use crate::pipeline::types::ImageWorkingSet;

/// Desired run parameters as delivered by the configuration service.
/// Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigurationDocument {
    #[serde(default)]
    pub image_directory: Option<PathBuf>,
    #[serde(default, deserialize_with = "seconds")]
    pub inference_interval: Option<u64>,
    #[serde(default)]
    pub publish_results_on_topic: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

// Accepts both 60 and "60".
fn seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(secs)) => Ok(Some(secs)),
        Some(Seconds::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl ConfigurationDocument {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Compiled-in values used for every key the document leaves out.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationDefaults {
    pub image_dir: PathBuf,
    pub prediction_interval_secs: u64,
    pub score_threshold: f32,
}

impl ConfigurationDefaults {
    pub fn from_settings(settings: &EdgeSettings) -> Self {
        Self {
            image_dir: settings.image_dir.clone(),
            prediction_interval_secs: DEFAULT_PREDICTION_INTERVAL_SECS,
            score_threshold: settings.score_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    pub image_dir: PathBuf,
    pub prediction_interval: Duration,
    pub publish_topic: Option<String>,
    pub score_threshold: f32,
}

impl InferenceConfig {
    /// Merges `document` over `defaults`, key by key.
    pub fn resolve(
        document: &ConfigurationDocument,
        defaults: &ConfigurationDefaults,
    ) -> Result<Self, AppError> {
        let image_dir = match &document.image_directory {
            Some(dir) => dir.clone(),
            None => {
                tracing::info!("Using default image directory: {:?}", defaults.image_dir);
                defaults.image_dir.clone()
            }
        };

        let interval_secs = match document.inference_interval {
            Some(secs) => {
                tracing::info!("Setting inference interval: {}", secs);
                secs
            }
            None => {
                tracing::info!(
                    "Using default inference interval: {}",
                    defaults.prediction_interval_secs
                );
                defaults.prediction_interval_secs
            }
        };
        if interval_secs == 0 {
            return Err(AppError::Configuration(
                "Inference interval must be greater than 0".to_string(),
            ));
        }

        let publish_topic = document
            .publish_results_on_topic
            .as_deref()
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string);
        if publish_topic.is_none() {
            tracing::info!("Topic to publish inference results is empty.");
        }

        if !(0.0..=1.0).contains(&defaults.score_threshold) {
            return Err(AppError::Configuration(format!(
                "Score threshold must be between 0.0 and 1.0, got {}",
                defaults.score_threshold
            )));
        }

        Ok(Self {
            image_dir,
            prediction_interval: Duration::from_secs(interval_secs),
            publish_topic,
            score_threshold: defaults.score_threshold,
        })
    }
}

/// A resolved configuration together with the images it loaded.
#[derive(Debug)]
pub struct ActiveConfiguration {
    pub config: InferenceConfig,
    pub images: ImageWorkingSet,
}

impl ActiveConfiguration {
    pub fn new(config: InferenceConfig, images: ImageWorkingSet) -> Self {
        Self { config, images }
    }
}
