use image::DynamicImage;
use rand::seq::IndexedRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::error::AppError;
use crate::pipeline::types::SelectionPolicy;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// A decoded image from the working set.
#[derive(Clone)]
pub struct WorkingImage {
    name: String,
    path: PathBuf,
    image: Arc<DynamicImage>,
}

impl WorkingImage {
    pub fn new(name: impl Into<String>, path: PathBuf, image: DynamicImage) -> Self {
        Self {
            name: name.into(),
            path,
            image: Arc::new(image),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

impl std::fmt::Debug for WorkingImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingImage")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// The images a configuration runs inference over.
#[derive(Debug)]
pub struct ImageWorkingSet {
    images: Vec<WorkingImage>,
    policy: SelectionPolicy,
    cursor: AtomicUsize,
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

// Format comes from the file content, extensions are already checked.
fn decode(path: &Path) -> Result<DynamicImage, image::ImageError> {
    Ok(image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?)
}

impl ImageWorkingSet {
    pub fn new(images: Vec<WorkingImage>, policy: SelectionPolicy) -> Self {
        Self {
            images,
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Loads every image of `dir`. Any entry that is not a jpg/jpeg image
    /// fails the whole load. An empty directory loads as an empty set.
    /// Blocking, call from a blocking context.
    pub fn load(dir: &Path, policy: SelectionPolicy) -> Result<Self, AppError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !is_supported_image(&path) {
                return Err(AppError::UnsupportedImage(path));
            }
            paths.push(path);
        }
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let decoded = decode(&path).map_err(|source| AppError::ImageLoad {
                path: path.clone(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!("Loaded image {} ({}x{})", name, decoded.width(), decoded.height());
            images.push(WorkingImage::new(name, path, decoded));
        }

        info!("Loaded {} images from {:?}", images.len(), dir);
        Ok(Self::new(images, policy))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.images.iter().map(|image| image.name()).collect()
    }

    pub fn select(&self) -> Option<&WorkingImage> {
        match self.policy {
            SelectionPolicy::Random => self.images.choose(&mut rand::rng()),
            SelectionPolicy::RoundRobin => {
                if self.images.is_empty() {
                    return None;
                }
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.images.len();
                self.images.get(index)
            }
        }
    }
}
