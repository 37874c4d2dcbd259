//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::edge::ConfigurationSource;
use crate::error::AppError;
use crate::pipeline::services::{BlobUploader, Detector, QualityOfService, ResultPublisher};
use crate::pipeline::types::{ConfigurationDocument, Detection, WorkingImage};

/// A directory under the system temp dir, removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("qi-edge-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a small JPEG at `relative`, creating parent directories.
    pub fn write_image(&self, relative: &str) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();
        path
    }

    pub fn working_image(&self, relative: &str) -> WorkingImage {
        let path = self.write_image(relative);
        let decoded = image::open(&path).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        WorkingImage::new(name, path, decoded)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub struct StubDetector {
    response: Mutex<Result<Vec<Detection>, String>>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn returning(detections: Vec<Detection>) -> Self {
        Self {
            response: Mutex::new(Ok(detections)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.response.lock().unwrap() = Err(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn predict(
        &self,
        _image: &WorkingImage,
        _score_threshold: f32,
    ) -> Result<Vec<Detection>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(AppError::Detector)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    calls: Mutex<Vec<(String, QualityOfService, serde_json::Value)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingPublisher {
    pub fn calls(&self) -> Vec<(String, QualityOfService, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        qos: QualityOfService,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AppError::Publish(message));
        }
        self.calls
            .lock()
            .unwrap()
            .push((topic.to_string(), qos, payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUploader {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingUploader {
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, prefix: &str) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter(|(_, destination)| destination == prefix)
            .map(|(path, _)| path)
            .collect()
    }
}

#[async_trait]
impl BlobUploader for RecordingUploader {
    async fn upload(&self, local_path: &Path, destination_prefix: &str) -> Result<(), AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), destination_prefix.to_string()));
        Ok(())
    }
}

pub struct TestSource {
    document: Mutex<ConfigurationDocument>,
    fetches: AtomicUsize,
    failures: AtomicUsize,
}

impl TestSource {
    pub fn new(document: ConfigurationDocument) -> Self {
        Self {
            document: Mutex::new(document),
            fetches: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, document: ConfigurationDocument) {
        *self.document.lock().unwrap() = document;
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationSource for TestSource {
    async fn fetch(&self) -> Result<ConfigurationDocument, AppError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Configuration(
                "configuration service unavailable".to_string(),
            ));
        }
        Ok(self.document.lock().unwrap().clone())
    }
}
