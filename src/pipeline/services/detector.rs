use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::AppError;
use crate::pipeline::types::{Detection, WorkingImage};

/// Object detection capability invoked once per run.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Returns the raw detections for `image`. `score_threshold` is a hint,
    /// results are filtered again by the caller.
    async fn predict(
        &self,
        image: &WorkingImage,
        score_threshold: f32,
    ) -> Result<Vec<Detection>, AppError>;

    fn name(&self) -> &'static str;
}

/// Runs an external model runner per image:
/// `<command> <model dir> <image path> <score threshold>`.
/// The runner prints a JSON array of detections on stdout.
pub struct CommandDetector {
    command: String,
    model_dir: PathBuf,
}

impl CommandDetector {
    pub fn new(command: impl Into<String>, model_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            model_dir,
        }
    }
}

#[async_trait]
impl Detector for CommandDetector {
    async fn predict(
        &self,
        image: &WorkingImage,
        score_threshold: f32,
    ) -> Result<Vec<Detection>, AppError> {
        debug!("Running {} on {:?}", self.command, image.path());
        let output = Command::new(&self.command)
            .arg(&self.model_dir)
            .arg(image.path())
            .arg(score_threshold.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Detector(format!("failed to start {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(AppError::Detector(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_detections(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

pub fn parse_detections(raw: &[u8]) -> Result<Vec<Detection>, AppError> {
    serde_json::from_slice(raw)
        .map_err(|e| AppError::Detector(format!("malformed detector output: {}", e)))
}
