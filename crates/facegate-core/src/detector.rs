//! Face location via the SeetaFace cascade (`rustface`).
//!
//! The login and enrollment loops only depend on the [`FaceLocator`]
//! trait; [`RustfaceLocator`] is the production implementation.

use crate::types::FaceRegion;
use image::GrayImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

const DEFAULT_MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load detector model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
}

/// Finds candidate face rectangles in a normalized grayscale image.
///
/// Implementations must be deterministic for a given input and return
/// regions in a stable order; the login loop tries them in that order.
pub trait FaceLocator {
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceRegion>;
}

/// SeetaFace frontal detector.
///
/// Not `Send`: construct it on the thread that runs the capture loop.
pub struct RustfaceLocator {
    detector: Box<dyn rustface::Detector>,
}

impl RustfaceLocator {
    /// Load the SeetaFace model (e.g. `seeta_fd_frontal_v1.0.bin`).
    pub fn load(model_path: &str) -> Result<Self, LocatorError> {
        Self::load_with_min_face(model_path, DEFAULT_MIN_FACE_SIZE)
    }

    pub fn load_with_min_face(model_path: &str, min_face_size: u32) -> Result<Self, LocatorError> {
        if !Path::new(model_path).exists() {
            return Err(LocatorError::ModelNotFound(model_path.to_string()));
        }

        let file = File::open(model_path).map_err(|e| LocatorError::ModelLoad {
            path: model_path.to_string(),
            reason: e.to_string(),
        })?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|e| LocatorError::ModelLoad {
            path: model_path.to_string(),
            reason: e.to_string(),
        })?;

        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(min_face_size);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        tracing::info!(path = model_path, min_face_size, "loaded SeetaFace detector");

        Ok(Self { detector })
    }
}

impl FaceLocator for RustfaceLocator {
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceRegion> {
        let (width, height) = gray.dimensions();
        // rustface panics on empty input
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let image = rustface::ImageData::new(gray.as_raw(), width, height);
        let faces = self.detector.detect(&image);

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                to_region(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect()
    }
}

/// Convert a possibly off-image detector box into a clamped region.
fn to_region(x: i32, y: i32, w: u32, h: u32, img_w: u32, img_h: u32) -> Option<FaceRegion> {
    let x0 = x.max(0) as i64;
    let y0 = y.max(0) as i64;
    let x1 = (x as i64 + w as i64).min(img_w as i64);
    let y1 = (y as i64 + h as i64).min(img_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(FaceRegion::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}
