use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
}

/// Pub/sub side of the result sink.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        qos: QualityOfService,
        payload: &serde_json::Value,
    ) -> Result<(), AppError>;
}

/// Blob storage side of the result sink. The object key is
/// `destination_prefix` followed by the file name of `local_path`.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    async fn upload(&self, local_path: &Path, destination_prefix: &str) -> Result<(), AppError>;
}
