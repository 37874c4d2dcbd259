use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::services::BlobUploader;

/// One file to copy into the bucket, as consumed by the export agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTask {
    pub input_url: String,
    pub bucket: String,
    pub key: String,
}

impl ExportTask {
    pub fn new(local_path: &Path, bucket: &str, destination_prefix: &str) -> Result<Self, AppError> {
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Upload(format!("{:?} has no file name", local_path)))?;
        Ok(Self {
            input_url: format!("file://{}", local_path.display()),
            bucket: bucket.to_string(),
            key: format!("{}{}", destination_prefix, file_name),
        })
    }
}

/// Appends export tasks to a JSON lines stream file that an export agent
/// on the device drains into the bucket.
pub struct StagedExportUploader {
    bucket: String,
    stream_path: PathBuf,
    sequence: Mutex<u64>,
}

impl StagedExportUploader {
    pub async fn create(
        data_dir: &Path,
        stream_name: &str,
        bucket: impl Into<String>,
    ) -> Result<Self, AppError> {
        let exports_dir = data_dir.join("exports");
        tokio::fs::create_dir_all(&exports_dir).await?;
        Ok(Self {
            bucket: bucket.into(),
            stream_path: exports_dir.join(format!("{}.jsonl", stream_name)),
            sequence: Mutex::new(0),
        })
    }

    pub fn stream_path(&self) -> &Path {
        &self.stream_path
    }
}

#[async_trait]
impl BlobUploader for StagedExportUploader {
    async fn upload(&self, local_path: &Path, destination_prefix: &str) -> Result<(), AppError> {
        let task = ExportTask::new(local_path, &self.bucket, destination_prefix)?;
        let mut line = serde_json::to_vec(&task)?;
        line.push(b'\n');

        // Held across the write so lines never interleave.
        let mut sequence = self.sequence.lock().await;
        let mut stream = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.stream_path)
            .await
            .map_err(|e| AppError::Upload(format!("failed to open {:?}: {}", self.stream_path, e)))?;
        stream
            .write_all(&line)
            .await
            .map_err(|e| AppError::Upload(e.to_string()))?;
        stream.flush().await.map_err(|e| AppError::Upload(e.to_string()))?;
        *sequence += 1;

        info!(
            "Successfully appended S3 export task to stream with sequence number {}: s3://{}/{}",
            *sequence, task.bucket, task.key
        );
        Ok(())
    }
}
