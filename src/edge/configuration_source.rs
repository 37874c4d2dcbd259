use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::pipeline::types::ConfigurationDocument;

/// Where the authoritative configuration document comes from.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn fetch(&self) -> Result<ConfigurationDocument, AppError>;
}

/// Fetches the document, retrying with exponential backoff. With a single
/// attempt the first failure is returned as is.
pub async fn fetch_with_retry(
    source: &dyn ConfigurationSource,
    attempts: u32,
    backoff: Duration,
) -> Result<ConfigurationDocument, AppError> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match source.fetch().await {
            Ok(document) => return Ok(document),
            Err(e) if attempt < attempts => {
                warn!(
                    "Fetching the configuration failed (attempt {}/{}): {}",
                    attempt, attempts, e
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => {
                error!("Exception occurred during fetching the configuration: {}", e);
                return Err(e);
            }
        }
    }
}

/// Creates the single-slot channel configuration updates travel through.
/// Notifications that arrive before the receiver looks are conflated.
pub fn config_update_channel() -> (ConfigUpdateNotifier, ConfigUpdates) {
    let (tx, rx) = watch::channel(0u64);
    (
        ConfigUpdateNotifier { tx: Arc::new(tx) },
        ConfigUpdates { rx },
    )
}

#[derive(Debug, Clone)]
pub struct ConfigUpdateNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl ConfigUpdateNotifier {
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation += 1);
        debug!("Configuration update notification #{}", *self.tx.borrow());
    }
}

#[derive(Debug)]
pub struct ConfigUpdates {
    rx: watch::Receiver<u64>,
}

impl ConfigUpdates {
    /// Waits for at least one notification since the last call. Returns
    /// `false` once every notifier is gone.
    pub async fn changed(&mut self) -> bool {
        match self.rx.changed().await {
            Ok(()) => {
                let generation = *self.rx.borrow_and_update();
                debug!("Picked up configuration update #{}", generation);
                true
            }
            Err(_) => false,
        }
    }
}

/// A fixed document, used when no configuration document is deployed.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigurationSource {
    document: ConfigurationDocument,
}

impl StaticConfigurationSource {
    pub fn new(document: ConfigurationDocument) -> Self {
        Self { document }
    }
}

#[async_trait]
impl ConfigurationSource for StaticConfigurationSource {
    async fn fetch(&self) -> Result<ConfigurationDocument, AppError> {
        Ok(self.document.clone())
    }
}

/// Reads the document from a JSON file on the device.
#[derive(Debug, Clone)]
pub struct FileConfigurationSource {
    path: PathBuf,
}

type FileStamp = (Option<SystemTime>, u64);

impl FileConfigurationSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn stamp(&self) -> Option<FileStamp> {
        let metadata = tokio::fs::metadata(&self.path).await.ok()?;
        Some((metadata.modified().ok(), metadata.len()))
    }

    /// Polls the file and notifies whenever its modification time or size
    /// changes, until `cancel` fires.
    pub async fn watch(
        &self,
        notifier: ConfigUpdateNotifier,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(
            "Watching {:?} for configuration updates every {:?}",
            self.path, poll_interval
        );
        let mut last = self.stamp().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Stopped watching {:?}", self.path);
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    let current = self.stamp().await;
                    if current != last {
                        info!("Configuration document {:?} changed", self.path);
                        last = current;
                        notifier.notify();
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn fetch(&self) -> Result<ConfigurationDocument, AppError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::Configuration(format!("failed to read {:?}: {}", self.path, e))
        })?;
        ConfigurationDocument::from_json(&raw).map_err(|e| {
            AppError::Configuration(format!("failed to parse {:?}: {}", self.path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScratchDir, TestSource};

    #[tokio::test]
    async fn notifications_conflate_until_observed() {
        let (notifier, mut updates) = config_update_channel();
        let idle = tokio::time::timeout(Duration::from_millis(50), updates.changed()).await;
        assert!(idle.is_err(), "no notification was sent yet");

        notifier.notify();
        notifier.clone().notify();

        assert!(updates.changed().await);

        let second = tokio::time::timeout(Duration::from_millis(50), updates.changed()).await;
        assert!(second.is_err(), "two notifications must wake the receiver once");
    }

    #[tokio::test]
    async fn dropped_notifier_ends_the_stream() {
        let (notifier, mut updates) = config_update_channel();
        drop(notifier);

        assert!(!updates.changed().await);
    }

    #[tokio::test]
    async fn reads_the_document_from_a_file() {
        let scratch = ScratchDir::new();
        let path = scratch.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"InferenceInterval": 5, "PublishResultsOnTopic": "topic/results"}"#,
        )
        .unwrap();

        let document = FileConfigurationSource::new(path).fetch().await.unwrap();
        assert_eq!(document.inference_interval, Some(5));
        assert_eq!(document.publish_results_on_topic.as_deref(), Some("topic/results"));
    }

    #[tokio::test]
    async fn unreadable_document_is_a_configuration_error() {
        let scratch = ScratchDir::new();
        let source = FileConfigurationSource::new(scratch.path().join("missing.json"));

        let error = source.fetch().await.unwrap_err();
        assert!(matches!(error, AppError::Configuration(_)));
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn watcher_notifies_on_change() {
        let scratch = ScratchDir::new();
        let path = scratch.path().join("config.json");
        std::fs::write(&path, r#"{"InferenceInterval": 5}"#).unwrap();

        let source = Arc::new(FileConfigurationSource::new(path.clone()));
        let (notifier, mut updates) = config_update_channel();
        let cancel = CancellationToken::new();
        let watcher = {
            let source = source.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                source
                    .watch(notifier, Duration::from_millis(20), cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&path, r#"{"InferenceInterval": 3600, "ImageDirectory": "/x"}"#).unwrap();

        let woke = tokio::time::timeout(Duration::from_secs(2), updates.changed()).await;
        assert_eq!(woke.ok(), Some(true));

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let source = TestSource::new(ConfigurationDocument::default());
        source.fail_next(2);

        let document = fetch_with_retry(&source, 3, Duration::from_secs(1)).await.unwrap();
        assert_eq!(document, ConfigurationDocument::default());
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn single_attempt_fails_fast() {
        let source = TestSource::new(ConfigurationDocument::default());
        source.fail_next(1);

        assert!(fetch_with_retry(&source, 1, Duration::from_secs(1)).await.is_err());
        assert_eq!(source.fetches(), 1);
    }
}
