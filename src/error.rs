use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Settings error: {0}")]
    Settings(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unsupported image type {0:?}, only jpg and jpeg images are supported")]
    UnsupportedImage(PathBuf),
    #[error("Failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Image directory {0:?} contains no images")]
    EmptyImageDirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Detector error: {0}")]
    Detector(String),
    #[error("Publish error: {0}")]
    Publish(String),
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error("Task error: {0}")]
    Task(String),
}

impl AppError {
    /// Fatal errors end the process; everything else is absorbed by the run loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Settings(_)
                | AppError::Configuration(_)
                | AppError::UnsupportedImage(_)
                | AppError::ImageLoad { .. }
                | AppError::Task(_)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Settings(error.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::Task(error.to_string())
    }
}
