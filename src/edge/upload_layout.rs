use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Local staging directories and the matching bucket prefixes, partitioned
/// by the time the process started.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadLayout {
    pub stamp: String,
    pub labeling_dir: PathBuf,
    pub labeling_prefix: String,
    pub inference_dir: PathBuf,
    pub inference_prefix: String,
}

impl UploadLayout {
    pub fn new(data_dir: &Path, started_at: DateTime<Utc>) -> Self {
        let stamp = started_at.format("%Y-%m-%d-%H-%M-%S").to_string();
        Self {
            labeling_dir: data_dir.join("labeling").join(&stamp),
            labeling_prefix: format!("pipeline/labeling/images/{}/", stamp),
            inference_dir: data_dir.join("inference").join(&stamp),
            inference_prefix: format!("inference/{}/", stamp),
            stamp,
        }
    }

    pub async fn create_dirs(&self) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.labeling_dir).await?;
        tokio::fs::create_dir_all(&self.inference_dir).await?;
        Ok(())
    }

    pub fn labeling_path(&self, image_name: &str) -> PathBuf {
        self.labeling_dir.join(image_name)
    }

    pub fn inference_path(&self, image_name: &str) -> PathBuf {
        self.inference_dir.join(image_name)
    }
}
