use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::edge::{ConfigUpdates, ConfigurationSource, fetch_with_retry};
use crate::error::AppError;
use crate::pipeline::scheduler::{ConfigurationSlot, ScheduledRun};
use crate::pipeline::services::{InferenceRequest, InferenceService, RunOutcome};
use crate::pipeline::types::{
    ActiveConfiguration, ConfigurationDefaults, ConfigurationDocument, ImageWorkingSet,
    InferenceConfig, SelectionPolicy,
};

const FETCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Waiting,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Delay of the armed run while `Waiting`.
    pub next_run_in: Option<Duration>,
    pub runs: u64,
    pub failed_runs: u64,
    pub reloads: u64,
}

type PendingRun = ScheduledRun<Arc<ActiveConfiguration>>;

enum Wake {
    Timer(Arc<ActiveConfiguration>),
    Reload,
    Shutdown,
}

/// Runs detection passes on an interval and restarts the schedule whenever
/// the configuration changes.
pub struct InferenceScheduler {
    source: Arc<dyn ConfigurationSource>,
    updates: Option<ConfigUpdates>,
    service: InferenceService,
    defaults: ConfigurationDefaults,
    selection_policy: SelectionPolicy,
    fetch_attempts: u32,
    slot: Arc<ConfigurationSlot>,
    status: watch::Sender<SchedulerStatus>,
}

impl InferenceScheduler {
    pub fn new(
        source: Arc<dyn ConfigurationSource>,
        updates: ConfigUpdates,
        service: InferenceService,
        defaults: ConfigurationDefaults,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::default());
        Self {
            source,
            updates: Some(updates),
            service,
            defaults,
            selection_policy: SelectionPolicy::default(),
            fetch_attempts: 1,
            slot: Arc::new(ConfigurationSlot::new()),
            status,
        }
    }

    pub fn selection_policy(mut self, selection_policy: SelectionPolicy) -> Self {
        self.selection_policy = selection_policy;
        self
    }

    pub fn fetch_attempts(mut self, fetch_attempts: u32) -> Self {
        self.fetch_attempts = fetch_attempts.max(1);
        self
    }

    pub fn slot(&self) -> Arc<ConfigurationSlot> {
        self.slot.clone()
    }

    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Loads the initial configuration and runs until `shutdown` fires.
    /// Returns an error only for failures that must end the process.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!("Starting inference scheduler");
        let document = self.fetch_document().await?;
        let mut active = self.apply_configuration(document).await?;
        let mut config_changed = true;

        loop {
            self.run_once(&active, config_changed).await;
            config_changed = false;
            let pending = self.schedule_next(active.clone());

            match self.wait_for_wake(&pending, &shutdown).await {
                Wake::Timer(captured) => active = captured,
                Wake::Reload => {
                    cancel_pending(&pending);
                    self.status.send_modify(|status| {
                        status.state = SchedulerState::Running;
                        status.next_run_in = None;
                    });
                    let document = self.fetch_document().await?;
                    active = self.apply_configuration(document).await?;
                    config_changed = true;
                    self.status.send_modify(|status| status.reloads += 1);
                }
                Wake::Shutdown => {
                    cancel_pending(&pending);
                    self.status.send_modify(|status| {
                        status.state = SchedulerState::Idle;
                        status.next_run_in = None;
                    });
                    info!("Inference scheduler stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn fetch_document(&self) -> Result<ConfigurationDocument, AppError> {
        fetch_with_retry(self.source.as_ref(), self.fetch_attempts, FETCH_BACKOFF).await
    }

    /// Resolves `document` against the defaults, loads its images and makes
    /// it the active configuration. The caller cancels any pending run
    /// before reloading.
    pub async fn apply_configuration(
        &mut self,
        document: ConfigurationDocument,
    ) -> Result<Arc<ActiveConfiguration>, AppError> {
        let config = InferenceConfig::resolve(&document, &self.defaults)?;
        let image_dir = config.image_dir.clone();
        let policy = self.selection_policy;
        let images =
            tokio::task::spawn_blocking(move || ImageWorkingSet::load(&image_dir, policy)).await??;

        if images.is_empty() {
            warn!(
                "No images in {:?}, runs will fail until images are deployed",
                config.image_dir
            );
        }
        let active = Arc::new(ActiveConfiguration::new(config, images));
        match self.slot.replace(active.clone()) {
            Some(previous) => info!(
                "Configuration changed: interval {:?} -> {:?}, topic {:?} -> {:?}",
                previous.config.prediction_interval,
                active.config.prediction_interval,
                previous.config.publish_topic,
                active.config.publish_topic
            ),
            None => info!(
                "Configuration loaded: interval {:?}, topic {:?}, {} images",
                active.config.prediction_interval,
                active.config.publish_topic,
                active.images.len()
            ),
        }
        Ok(active)
    }

    /// One detection pass with the configuration captured by the caller.
    /// Failures are logged and never stop the schedule.
    pub async fn run_once(&mut self, active: &Arc<ActiveConfiguration>, config_changed: bool) {
        self.status.send_modify(|status| {
            status.state = SchedulerState::Running;
            status.next_run_in = None;
        });

        let request = InferenceRequest {
            active: active.clone(),
            config_changed,
        };
        let failed = match self.service.clone().oneshot(request).await {
            Ok(RunOutcome::Detected {
                image_name,
                detections,
                published,
                archived,
                ..
            }) => {
                info!(
                    "Run on {} found {} detections (published: {}, archived: {})",
                    image_name, detections, published, archived
                );
                false
            }
            Ok(RunOutcome::NoDetections {
                image_name,
                archived,
            }) => {
                debug!("Run on {} found nothing (archived: {})", image_name, archived);
                false
            }
            Err(e) if e.is_fatal() => {
                error!("Error running the inference: {}", e);
                true
            }
            Err(e) => {
                warn!("Inference run failed: {}", e);
                true
            }
        };

        self.status.send_modify(|status| {
            status.runs += 1;
            if failed {
                status.failed_runs += 1;
            }
        });
    }

    fn schedule_next(&self, active: Arc<ActiveConfiguration>) -> PendingRun {
        let interval = active.config.prediction_interval;
        info!("Scheduling inference with interval: {:?}", interval);
        self.status.send_modify(|status| {
            status.state = SchedulerState::Waiting;
            status.next_run_in = Some(interval);
        });
        ScheduledRun::after(interval, active)
    }

    // Only this loop cancels `pending`, so it is still armed here.
    async fn wait_for_wake(&mut self, pending: &PendingRun, shutdown: &CancellationToken) -> Wake {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Wake::Shutdown,
                delivered = next_update(&mut self.updates) => {
                    if delivered {
                        return Wake::Reload;
                    }
                }
                Some(captured) = pending.fired() => return Wake::Timer(captured),
            }
            warn!("Configuration update stream closed, continuing on the current schedule");
            self.updates = None;
        }
    }
}

fn cancel_pending(pending: &PendingRun) {
    if pending.cancel() {
        debug!("Cancelled the run scheduled in {:?}", pending.delay());
    }
}

async fn next_update(updates: &mut Option<ConfigUpdates>) -> bool {
    match updates {
        Some(updates) => updates.changed().await,
        None => std::future::pending().await,
    }
}
