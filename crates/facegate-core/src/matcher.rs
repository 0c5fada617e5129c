//! Pixel-domain face matching.
//!
//! A live face crop is compared against every enrolled reference after
//! resizing the reference to the crop's dimensions. The verdict uses only
//! the minimum L2 norm difference; the normalized correlation is computed
//! alongside it for diagnostics.

use crate::preprocess::resize_to;
use crate::types::{MatchResult, Matcher};
use image::GrayImage;

/// Default acceptance threshold for the norm-difference score.
///
/// Raw pixel-intensity units, so it only makes sense for face crops of
/// roughly webcam resolution.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 8000.0;

/// L2 norm of the pixel difference between two equal-size grayscale images.
pub fn norm_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    a.as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Zero-mean normalized cross-correlation of two equal-size images.
///
/// Returns a value in [-1, 1]. Higher = more similar. Flat images have no
/// variance to correlate and yield 0.
pub fn correlation_coefficient(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let n = a.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let mean = |img: &GrayImage| img.as_raw().iter().map(|&p| p as f64).sum::<f64>() / n as f64;
    let (mean_a, mean_b) = (mean(a), mean(b));

    let mut cross = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&x, &y) in a.as_raw().iter().zip(b.as_raw().iter()) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        cross += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        cross / denom
    } else {
        0.0
    }
}

/// Minimum-norm matcher. Visits every reference; the smallest
/// norm difference wins and must be strictly below the threshold.
pub struct NormMatcher;

impl Matcher for NormMatcher {
    fn compare(&self, probe: &GrayImage, gallery: &[GrayImage], threshold: f64) -> MatchResult {
        let (width, height) = probe.dimensions();
        if width == 0 || height == 0 {
            return MatchResult::no_match();
        }

        let mut best: Option<(usize, f64, f64)> = None;

        for (i, reference) in gallery.iter().enumerate() {
            if reference.width() == 0 || reference.height() == 0 {
                tracing::debug!(reference = i, "skipping empty reference image");
                continue;
            }
            let resized = resize_to(reference, width, height);
            let score = norm_difference(probe, &resized);
            let correlation = correlation_coefficient(probe, &resized);

            tracing::debug!(reference = i, correlation, score, "compared reference");

            if best.map_or(true, |(_, s, _)| score < s) {
                best = Some((i, score, correlation));
            }
        }

        match best {
            Some((idx, score, correlation)) => MatchResult {
                matched: score < threshold,
                best_score: Some(score),
                correlation: Some(correlation),
                reference_index: Some(idx),
            },
            None => MatchResult::no_match(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 13 + y * 7) % 256) as u8]))
    }

    #[test]
    fn test_norm_difference_identical() {
        let a = gradient(20, 20);
        assert_eq!(norm_difference(&a, &a), 0.0);
    }

    #[test]
    fn test_norm_difference_known_value() {
        let a = GrayImage::from_pixel(2, 2, Luma([10]));
        let b = GrayImage::from_pixel(2, 2, Luma([13]));
        // sqrt(4 * 3^2) = 6
        assert!((norm_difference(&a, &b) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_identical_and_inverted() {
        let a = gradient(16, 16);
        let inverted = GrayImage::from_fn(16, 16, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));
        assert!((correlation_coefficient(&a, &a) - 1.0).abs() < 1e-9);
        assert!((correlation_coefficient(&a, &inverted) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_flat_image() {
        let flat = GrayImage::from_pixel(8, 8, Luma([50]));
        assert_eq!(correlation_coefficient(&flat, &gradient(8, 8)), 0.0);
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let probe = gradient(24, 24);
        let result = NormMatcher.compare(&probe, &[], f64::MAX);
        assert!(!result.matched);
        assert_eq!(result.best_score, None);
    }

    #[test]
    fn test_identical_reference_scores_zero() {
        let probe = gradient(24, 24);
        let result = NormMatcher.compare(&probe, &[probe.clone()], 1.0);
        assert!(result.matched);
        assert_eq!(result.best_score, Some(0.0));
        assert_eq!(result.reference_index, Some(0));
    }

    #[test]
    fn test_best_reference_is_minimum() {
        let probe = GrayImage::from_pixel(10, 10, Luma([100]));
        let gallery = vec![
            GrayImage::from_pixel(10, 10, Luma([0])),
            GrayImage::from_pixel(10, 10, Luma([98])),
            GrayImage::from_pixel(10, 10, Luma([200])),
        ];
        let result = NormMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.reference_index, Some(1));
        // sqrt(100 * 2^2) = 20
        assert!((result.best_score.unwrap() - 20.0).abs() < 1e-9);
        assert!(result.matched);
    }

    #[test]
    fn test_threshold_is_strict() {
        let probe = GrayImage::from_pixel(10, 10, Luma([100]));
        let gallery = vec![GrayImage::from_pixel(10, 10, Luma([98]))];
        assert!(!NormMatcher.compare(&probe, &gallery, 20.0).matched);
        assert!(NormMatcher.compare(&probe, &gallery, 20.001).matched);
    }

    #[test]
    fn test_reference_resized_to_probe() {
        let probe = GrayImage::from_pixel(12, 12, Luma([60]));
        let gallery = vec![GrayImage::from_pixel(40, 30, Luma([60]))];
        let result = NormMatcher.compare(&probe, &gallery, 1.0);
        assert_eq!(result.best_score, Some(0.0));
        assert!(result.matched);
    }

    #[test]
    fn test_distant_reference_rejected() {
        let probe = GrayImage::from_pixel(100, 100, Luma([0]));
        let gallery = vec![GrayImage::from_pixel(100, 100, Luma([255]))];
        let result = NormMatcher.compare(&probe, &gallery, DEFAULT_MATCH_THRESHOLD);
        // sqrt(10000 * 255^2) = 25500
        assert!(!result.matched);
        assert!((result.best_score.unwrap() - 25500.0).abs() < 1e-6);
    }
}
