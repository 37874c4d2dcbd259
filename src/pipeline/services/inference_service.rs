use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use tracing::{error, info, warn};

use crate::config::EdgeSettings;
use crate::edge::UploadLayout;
use crate::error::AppError;
use crate::pipeline::services::annotation::write_annotated;
use crate::pipeline::services::{
    BlobUploader, DetectionFilter, Detector, QualityOfService, ResultPublisher,
};
use crate::pipeline::types::{ActiveConfiguration, DetectionResult, LabelingPolicy, WorkingImage};

/// Per-run behavior that does not change with the configuration document.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub class_label: Option<u32>,
    pub labeling_policy: LabelingPolicy,
    pub annotate_detections: bool,
    pub request_timeout: Duration,
    pub qos: QualityOfService,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            class_label: None,
            labeling_policy: LabelingPolicy::default(),
            annotate_detections: true,
            request_timeout: Duration::from_secs(crate::config::DEFAULT_REQUEST_TIMEOUT_SECS),
            qos: QualityOfService::AtLeastOnce,
        }
    }
}

impl RunOptions {
    pub fn from_settings(settings: &EdgeSettings) -> Self {
        Self {
            class_label: settings.class_label,
            labeling_policy: settings.labeling_policy,
            annotate_detections: settings.annotate_detections,
            request_timeout: settings.request_timeout(),
            qos: QualityOfService::AtLeastOnce,
        }
    }
}

pub struct InferenceRequest {
    pub active: Arc<ActiveConfiguration>,
    pub config_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Detected {
        image_name: String,
        detections: usize,
        published: bool,
        annotated: bool,
        archived: bool,
    },
    NoDetections {
        image_name: String,
        archived: bool,
    },
}

struct Collaborators {
    detector: Arc<dyn Detector>,
    publisher: Arc<dyn ResultPublisher>,
    uploader: Arc<dyn BlobUploader>,
    layout: UploadLayout,
    options: RunOptions,
}

/// One detection pass: pick an image, detect, report.
///
/// Publish and upload failures are logged and reflected in the outcome.
/// Only a failed detection (or an empty working set) is returned as an
/// error.
#[derive(Clone)]
pub struct InferenceService {
    inner: Arc<Collaborators>,
}

impl InferenceService {
    pub fn new(
        detector: Arc<dyn Detector>,
        publisher: Arc<dyn ResultPublisher>,
        uploader: Arc<dyn BlobUploader>,
        layout: UploadLayout,
        options: RunOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Collaborators {
                detector,
                publisher,
                uploader,
                layout,
                options,
            }),
        }
    }
}

impl Service<InferenceRequest> for InferenceService {
    type Response = RunOutcome;
    type Error = AppError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: InferenceRequest) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { inner.run(request).await })
    }
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, future: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AppError::Timeout(operation, limit))?
}

impl Collaborators {
    async fn run(&self, request: InferenceRequest) -> Result<RunOutcome, AppError> {
        let active = request.active;
        let config = &active.config;
        if request.config_changed {
            info!(
                "Running inference with new configuration (interval {:?})",
                config.prediction_interval
            );
        }

        let image = active
            .images
            .select()
            .cloned()
            .ok_or_else(|| AppError::EmptyImageDirectory(config.image_dir.clone()))?;
        info!("Predicting from image {:?}", image.path());

        let raw = bounded(
            "detector",
            self.options.request_timeout,
            self.detector.predict(&image, config.score_threshold),
        )
        .await?;
        let filter =
            DetectionFilter::new(config.score_threshold).with_class_label(self.options.class_label);
        let detections = filter.apply(raw);

        if detections.is_empty() {
            warn!("No detections higher than {}.", config.score_threshold);
            let archived = self.archive_for_labeling(&image, false).await;
            return Ok(RunOutcome::NoDetections {
                image_name: image.name().to_string(),
                archived,
            });
        }

        let result = DetectionResult::new(image.name(), detections);
        info!(
            "Capture {}: {} detections on {}",
            result.capture_id,
            result.detections.len(),
            result.image_name
        );

        let published = match config.publish_topic.as_deref() {
            Some(topic) => self.publish(topic, &result).await,
            None => {
                warn!("No topic set to publish the inference results to the cloud.");
                false
            }
        };
        let annotated = self.options.annotate_detections && self.annotate(&image, &result).await;
        let archived = self.archive_for_labeling(&image, true).await;

        Ok(RunOutcome::Detected {
            image_name: result.image_name,
            detections: result.detections.len(),
            published,
            annotated,
            archived,
        })
    }

    async fn publish(&self, topic: &str, result: &DetectionResult) -> bool {
        let outcome: Result<(), AppError> = async {
            let payload = result.payload()?;
            bounded(
                "publish",
                self.options.request_timeout,
                self.publisher.publish(topic, self.options.qos, &payload),
            )
            .await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!("Published results of {} to {}", result.capture_id, topic);
                true
            }
            Err(e) => {
                error!("Exception occurred during publish: {}", e);
                false
            }
        }
    }

    async fn archive_for_labeling(&self, image: &WorkingImage, has_detections: bool) -> bool {
        if !self.options.labeling_policy.archives(has_detections) {
            return false;
        }

        let staged = self.layout.labeling_path(image.name());
        info!("Saving image {} for upload and labeling", image.name());
        let outcome: Result<(), AppError> = async {
            tokio::fs::copy(image.path(), &staged).await?;
            bounded(
                "upload",
                self.options.request_timeout,
                self.uploader.upload(&staged, &self.layout.labeling_prefix),
            )
            .await
        }
        .await;

        match outcome {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to archive {} for labeling: {}", image.name(), e);
                false
            }
        }
    }

    async fn annotate(&self, image: &WorkingImage, result: &DetectionResult) -> bool {
        let destination = self.layout.inference_path(image.name());
        info!("Generating bounding box image {}", image.name());
        let outcome: Result<(), AppError> = async {
            let source = image.clone();
            let detections = result.detections.clone();
            let target = destination.clone();
            tokio::task::spawn_blocking(move || {
                write_annotated(source.image(), &detections, &target)
            })
            .await??;
            bounded(
                "upload",
                self.options.request_timeout,
                self.uploader.upload(&destination, &self.layout.inference_prefix),
            )
            .await
        }
        .await;

        match outcome {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to upload annotated {}: {}", image.name(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{
        BoundingBox, Detection, ImageWorkingSet, InferenceConfig, SelectionPolicy,
    };
    use crate::testing::{RecordingPublisher, RecordingUploader, ScratchDir, StubDetector};
    use tower::ServiceExt;

    struct Fixture {
        scratch: ScratchDir,
        detector: Arc<StubDetector>,
        publisher: Arc<RecordingPublisher>,
        uploader: Arc<RecordingUploader>,
        service: InferenceService,
    }

    async fn fixture(detections: Vec<Detection>, options: RunOptions) -> Fixture {
        let scratch = ScratchDir::new();
        scratch.write_image("images/a.jpg");
        let layout = UploadLayout::new(&scratch.path().join("upload"), chrono::Utc::now());
        layout.create_dirs().await.unwrap();

        let detector = Arc::new(StubDetector::returning(detections));
        let publisher = Arc::new(RecordingPublisher::default());
        let uploader = Arc::new(RecordingUploader::default());
        let service = InferenceService::new(
            detector.clone(),
            publisher.clone(),
            uploader.clone(),
            layout,
            options,
        );
        Fixture {
            scratch,
            detector,
            publisher,
            uploader,
            service,
        }
    }

    fn request(fixture: &Fixture, topic: Option<&str>) -> InferenceRequest {
        let image_dir = fixture.scratch.path().join("images");
        let images = ImageWorkingSet::load(&image_dir, SelectionPolicy::Random).unwrap();
        let config = InferenceConfig {
            image_dir,
            prediction_interval: Duration::from_secs(5),
            publish_topic: topic.map(str::to_string),
            score_threshold: 0.3,
        };
        InferenceRequest {
            active: Arc::new(ActiveConfiguration::new(config, images)),
            config_changed: true,
        }
    }

    fn hit() -> Detection {
        Detection::new(0, 0.9, BoundingBox::new(1.0, 1.0, 4.0, 4.0))
    }

    #[tokio::test]
    async fn detection_without_topic_archives_but_does_not_publish() {
        let fixture = fixture(vec![hit()], RunOptions::default()).await;
        let outcome = fixture
            .service
            .clone()
            .oneshot(request(&fixture, None))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Detected {
                image_name: "a.jpg".to_string(),
                detections: 1,
                published: false,
                annotated: true,
                archived: true,
            }
        );
        assert!(fixture.publisher.calls().is_empty());
        let labeling_prefix = fixture.service.inner.layout.labeling_prefix.clone();
        assert_eq!(fixture.uploader.calls_to(&labeling_prefix).len(), 1);
        assert!(fixture.service.inner.layout.labeling_path("a.jpg").exists());
        assert!(fixture.service.inner.layout.inference_path("a.jpg").exists());
    }

    #[tokio::test]
    async fn detection_with_topic_publishes_once() {
        let fixture = fixture(vec![hit()], RunOptions::default()).await;
        fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap();

        let calls = fixture.publisher.calls();
        assert_eq!(calls.len(), 1);
        let (topic, qos, payload) = &calls[0];
        assert_eq!(topic, "topic/results");
        assert_eq!(*qos, QualityOfService::AtLeastOnce);
        assert!(payload.get("timestamp").is_some());
        assert_eq!(payload["image_name"], "a.jpg");
        assert_eq!(payload["inference_results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn below_threshold_is_dropped_under_the_default_policy() {
        let weak = Detection::new(0, 0.2, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let fixture = fixture(vec![weak], RunOptions::default()).await;
        let outcome = fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::NoDetections {
                image_name: "a.jpg".to_string(),
                archived: false,
            }
        );
        assert!(fixture.publisher.calls().is_empty());
        assert!(fixture.uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn on_miss_policy_archives_only_empty_runs() {
        let options = RunOptions {
            labeling_policy: LabelingPolicy::OnMiss,
            annotate_detections: false,
            ..RunOptions::default()
        };
        let fixture = fixture(vec![], options).await;
        let outcome = fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::NoDetections { archived: true, .. }));
        assert!(fixture.publisher.calls().is_empty());
        assert_eq!(fixture.uploader.calls().len(), 1);

        let options = RunOptions {
            labeling_policy: LabelingPolicy::OnMiss,
            annotate_detections: false,
            ..RunOptions::default()
        };
        let fixture = fixture_with_hit(options).await;
        fixture
            .service
            .clone()
            .oneshot(request(&fixture, None))
            .await
            .unwrap();
        assert!(fixture.uploader.calls().is_empty());
    }

    async fn fixture_with_hit(options: RunOptions) -> Fixture {
        fixture(vec![hit()], options).await
    }

    #[tokio::test]
    async fn always_policy_archives_both_outcomes() {
        let options = RunOptions {
            labeling_policy: LabelingPolicy::Always,
            annotate_detections: false,
            ..RunOptions::default()
        };
        let fixture = fixture(vec![], options.clone()).await;
        fixture
            .service
            .clone()
            .oneshot(request(&fixture, None))
            .await
            .unwrap();
        assert_eq!(fixture.uploader.calls().len(), 1);

        let fixture = fixture_with_hit(options).await;
        fixture
            .service
            .clone()
            .oneshot(request(&fixture, None))
            .await
            .unwrap();
        assert_eq!(fixture.uploader.calls().len(), 1);
    }

    #[tokio::test]
    async fn detector_failure_is_returned_and_nothing_is_reported() {
        let fixture = fixture(vec![hit()], RunOptions::default()).await;
        fixture.detector.fail_with("model not loaded");

        let error = fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap_err();

        assert!(matches!(error, AppError::Detector(_)));
        assert!(fixture.publisher.calls().is_empty());
        assert!(fixture.uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_the_archive() {
        let fixture = fixture(vec![hit()], RunOptions::default()).await;
        fixture.publisher.fail_with("ipc connection lost");

        let outcome = fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Detected {
                published: false,
                archived: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn class_label_filter_applies() {
        let options = RunOptions {
            class_label: Some(1),
            ..RunOptions::default()
        };
        let fixture = fixture(vec![hit()], options).await;
        let outcome = fixture
            .service
            .clone()
            .oneshot(request(&fixture, Some("topic/results")))
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::NoDetections { .. }));
        assert_eq!(fixture.detector.calls(), 1);
    }
}
