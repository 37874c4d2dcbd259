use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::services::{QualityOfService, ResultPublisher};

#[derive(Serialize)]
struct OutboxMessage<'a> {
    topic: &'a str,
    qos: QualityOfService,
    payload: &'a serde_json::Value,
}

/// Publishes by appending to a local outbox that the device's cloud
/// connector forwards to the broker.
pub struct OutboxPublisher {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutboxPublisher {
    pub async fn create(data_dir: &Path) -> Result<Self, AppError> {
        let outbox_dir = data_dir.join("outbox");
        tokio::fs::create_dir_all(&outbox_dir).await?;
        Ok(Self {
            path: outbox_dir.join("messages.jsonl"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultPublisher for OutboxPublisher {
    async fn publish(
        &self,
        topic: &str,
        qos: QualityOfService,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        let mut line = serde_json::to_vec(&OutboxMessage {
            topic,
            qos,
            payload,
        })?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut outbox = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::Publish(format!("failed to open {:?}: {}", self.path, e)))?;
        outbox
            .write_all(&line)
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?;
        outbox.flush().await.map_err(|e| AppError::Publish(e.to_string()))?;

        info!("Publishing results to {}", topic);
        Ok(())
    }
}
