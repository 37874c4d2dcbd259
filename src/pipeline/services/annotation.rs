use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;

use crate::error::AppError;
use crate::pipeline::types::{BoundingBox, Detection};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// Returns a copy of `image` with an outline drawn around every detection.
pub fn annotate(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    for detection in detections {
        draw_box(&mut canvas, &detection.bbox);
    }
    canvas
}

/// Renders the annotated image to `destination`. Blocking.
pub fn write_annotated(
    image: &DynamicImage,
    detections: &[Detection],
    destination: &Path,
) -> Result<(), AppError> {
    annotate(image, detections)
        .save(destination)
        .map_err(|e| AppError::Upload(format!("failed to write {:?}: {}", destination, e)))
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp = |value: f32, max: u32| value.round().clamp(0.0, (max - 1) as f32) as u32;
    let x0 = clamp(bbox.x, width);
    let y0 = clamp(bbox.y, height);
    let x1 = clamp(bbox.x + bbox.width, width);
    let y1 = clamp(bbox.y + bbox.height, height);

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            put(canvas, x, y0.saturating_add(t));
            put(canvas, x, y1.saturating_sub(t));
        }
        for y in y0..=y1 {
            put(canvas, x0.saturating_add(t), y);
            put(canvas, x1.saturating_sub(t), y);
        }
    }
}

fn put(canvas: &mut RgbImage, x: u32, y: u32) {
    if x < canvas.width() && y < canvas.height() {
        canvas.put_pixel(x, y, BOX_COLOR);
    }
}
