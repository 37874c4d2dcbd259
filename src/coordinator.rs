use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::EdgeSettings;
use crate::edge::{
    ConfigUpdateNotifier, ConfigurationSource, FileConfigurationSource, OutboxPublisher,
    StagedExportUploader, StaticConfigurationSource, UploadLayout, config_update_channel,
};
use crate::error::AppError;
use crate::pipeline::scheduler::{ConfigurationSlot, InferenceScheduler, SchedulerStatus};
use crate::pipeline::services::{
    BlobUploader, CommandDetector, Detector, InferenceService, ResultPublisher, RunOptions,
};
use crate::pipeline::types::{ConfigurationDefaults, ConfigurationDocument};

/// Owns the scheduler task and the configuration watcher for the lifetime
/// of the process.
pub struct Coordinator {
    scheduler_task: JoinHandle<Result<(), AppError>>,
    watcher_task: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    notifier: ConfigUpdateNotifier,
    status: watch::Receiver<SchedulerStatus>,
    slot: Arc<ConfigurationSlot>,
}

impl Coordinator {
    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    pub fn slot(&self) -> Arc<ConfigurationSlot> {
        self.slot.clone()
    }

    /// Triggers a configuration reload, as the configuration service would.
    pub fn notifier(&self) -> ConfigUpdateNotifier {
        self.notifier.clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Runs until the scheduler fails or `shutdown` completes.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            joined = &mut self.scheduler_task => joined,
            _ = shutdown => {
                info!("Shutdown requested");
                self.cancel_token.cancel();
                (&mut self.scheduler_task).await
            }
        };
        self.cancel_token.cancel();

        if let Some(watcher) = self.watcher_task.take() {
            if let Err(e) = watcher.await {
                error!("Configuration watcher failed: {}", e);
            }
        }

        result?
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    settings: EdgeSettings,
    started_at: DateTime<Utc>,
    detector: Option<Arc<dyn Detector>>,
    publisher: Option<Arc<dyn ResultPublisher>>,
    uploader: Option<Arc<dyn BlobUploader>>,
    source: Option<Arc<dyn ConfigurationSource>>,
}

impl CoordinatorBuilder {
    pub fn new(settings: EdgeSettings) -> Self {
        Self {
            settings,
            started_at: Utc::now(),
            detector: None,
            publisher: None,
            uploader: None,
            source: None,
        }
    }

    // Replaces the command detector built from the settings.
    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    // Replaces the outbox publisher built from the settings.
    pub fn publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    // Replaces the staged export uploader built from the settings.
    pub fn uploader(mut self, uploader: Arc<dyn BlobUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    // Replaces the file or static configuration source. No watcher is
    // started for a custom source; use `Coordinator::notifier` instead.
    pub fn configuration_source(mut self, source: Arc<dyn ConfigurationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Creates the staging directories, wires the collaborators and starts
    /// the scheduler and configuration watcher tasks.
    pub async fn build(self) -> Result<Coordinator, AppError> {
        let settings = self.settings;
        settings.validate()?;

        let layout = UploadLayout::new(&settings.upload_data_dir, self.started_at);
        layout.create_dirs().await?;
        info!(
            "Staging uploads under {:?} and {:?}",
            layout.labeling_dir, layout.inference_dir
        );

        let detector = match self.detector {
            Some(detector) => detector,
            None => Arc::new(CommandDetector::new(
                settings.detector_command.clone(),
                settings.model_dir.clone(),
            )),
        };
        let publisher = match self.publisher {
            Some(publisher) => publisher,
            None => Arc::new(OutboxPublisher::create(&settings.upload_data_dir).await?),
        };
        let uploader = match self.uploader {
            Some(uploader) => uploader,
            None => Arc::new(
                StagedExportUploader::create(
                    &settings.upload_data_dir,
                    &settings.stream_name,
                    settings.upload_bucket.clone(),
                )
                .await?,
            ),
        };
        info!("Using the {} detector", detector.name());

        let cancel_token = CancellationToken::new();
        let (notifier, updates) = config_update_channel();
        let (source, watcher_task): (Arc<dyn ConfigurationSource>, _) =
            match (self.source, settings.configuration_document.clone()) {
                (Some(source), _) => (source, None),
                (None, Some(path)) => {
                    let file_source = Arc::new(FileConfigurationSource::new(path));
                    let watcher = {
                        let file_source = file_source.clone();
                        let notifier = notifier.clone();
                        let cancel_token = cancel_token.clone();
                        let poll_interval = settings.config_poll_interval();
                        tokio::spawn(async move {
                            file_source
                                .watch(notifier, poll_interval, cancel_token)
                                .await
                        })
                    };
                    (file_source as Arc<dyn ConfigurationSource>, Some(watcher))
                }
                (None, None) => {
                    info!("No configuration document deployed, using the defaults");
                    (
                        Arc::new(StaticConfigurationSource::new(ConfigurationDocument::default())),
                        None,
                    )
                }
            };

        let service = InferenceService::new(
            detector,
            publisher,
            uploader,
            layout,
            RunOptions::from_settings(&settings),
        );
        let scheduler = InferenceScheduler::new(
            source,
            updates,
            service,
            ConfigurationDefaults::from_settings(&settings),
        )
        .selection_policy(settings.selection_policy)
        .fetch_attempts(settings.config_fetch_attempts);

        let status = scheduler.status();
        let slot = scheduler.slot();
        let scheduler_task = tokio::spawn(scheduler.run(cancel_token.clone()));

        Ok(Coordinator {
            scheduler_task,
            watcher_task,
            cancel_token,
            notifier,
            status,
            slot,
        })
    }
}
