use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// A captured color frame (8-bit RGB). Superseded every loop iteration.
pub type Frame = RgbImage;

/// Axis-aligned face rectangle within the frame it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `width` × `height` image. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion::new(self.x, self.y, w, h))
    }

    /// Copy this region out of a grayscale image.
    pub fn crop(&self, image: &GrayImage) -> Option<GrayImage> {
        let r = self.clamp_to(image.width(), image.height())?;
        Some(image::imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image())
    }
}

/// Result of matching a live face against the enrolled references.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Minimum norm-difference score over all references (lower = more similar).
    /// `None` when there was nothing to compare against.
    pub best_score: Option<f64>,
    /// Normalized correlation of the reference that produced `best_score`.
    /// Diagnostic only; never part of the verdict.
    pub correlation: Option<f64>,
    /// Position of the winning reference in the gallery.
    pub reference_index: Option<usize>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            best_score: None,
            correlation: None,
            reference_index: None,
        }
    }
}

/// Strategy for comparing a live face crop against a gallery of stored references.
pub trait Matcher {
    fn compare(&self, probe: &GrayImage, gallery: &[GrayImage], threshold: f64) -> MatchResult;
}

/// Terminal outcome of a login session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    Success { score: f64, frames: u64 },
    TimeoutFailure { frames: u64 },
    Cancelled,
}

/// Terminal outcome of an enrollment capture session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled { dir: std::path::PathBuf },
    Failed { reason: String },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_clamp_inside() {
        let r = FaceRegion::new(2, 3, 4, 5);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_overhanging() {
        let r = FaceRegion::new(8, 8, 10, 10);
        assert_eq!(r.clamp_to(12, 10), Some(FaceRegion::new(8, 8, 4, 2)));
    }

    #[test]
    fn test_clamp_outside() {
        assert_eq!(FaceRegion::new(20, 0, 5, 5).clamp_to(10, 10), None);
        assert_eq!(FaceRegion::new(0, 0, 0, 5).clamp_to(10, 10), None);
    }

    #[test]
    fn test_crop_copies_pixels() {
        let img = GrayImage::from_fn(6, 6, |x, y| Luma([(y * 6 + x) as u8]));
        let crop = FaceRegion::new(1, 2, 2, 2).crop(&img).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.get_pixel(0, 0)[0], 13);
        assert_eq!(crop.get_pixel(1, 1)[0], 20);
    }
}
