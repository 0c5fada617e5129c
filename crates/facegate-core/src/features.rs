//! Keypoints and binary descriptors for the category classifier.
//!
//! FAST-9 corners pick the keypoints; each keypoint gets a 256-bit BRIEF
//! descriptor built from a fixed set of pixel-pair intensity tests inside
//! a 31×31 patch. Descriptors are compared by Hamming distance.

use image::GrayImage;
use imageproc::corners::corners_fast9;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

// --- Named constants ---
const FAST_THRESHOLD: u8 = 20;
const MAX_FEATURES: usize = 500;
const PATCH_RADIUS: i32 = 15;
const DESCRIPTOR_BYTES: usize = 32;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;
const PATTERN_SEED: u64 = 0x5eed_b12f;

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A keypoint with its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    pub x: u32,
    pub y: u32,
    pub score: f32,
    pub descriptor: Descriptor,
}

/// One nearest-neighbor pairing between two descriptor sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Turns a normalized grayscale image into local features.
pub trait FeatureExtractor {
    fn extract(&self, image: &GrayImage) -> Vec<Feature>;
}

/// FAST corners + BRIEF descriptors.
#[derive(Debug, Clone)]
pub struct FastBrief {
    pub threshold: u8,
    pub max_features: usize,
}

impl Default for FastBrief {
    fn default() -> Self {
        Self {
            threshold: FAST_THRESHOLD,
            max_features: MAX_FEATURES,
        }
    }
}

type TestPair = ((i32, i32), (i32, i32));

static PATTERN: OnceLock<Vec<TestPair>> = OnceLock::new();

/// Fixed sampling pattern, identical for every image and every run.
fn pattern() -> &'static [TestPair] {
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut offset = || {
            (
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
            )
        };
        (0..DESCRIPTOR_BITS).map(|_| (offset(), offset())).collect()
    })
}

impl FeatureExtractor for FastBrief {
    fn extract(&self, image: &GrayImage) -> Vec<Feature> {
        let (width, height) = image.dimensions();
        let margin = PATCH_RADIUS as u32;
        if width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }

        let mut corners: Vec<_> = corners_fast9(image, self.threshold)
            .into_iter()
            .filter(|c| {
                c.x >= margin && c.y >= margin && c.x < width - margin && c.y < height - margin
            })
            .collect();

        // Strongest first; position breaks ties so the order is reproducible
        corners.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        corners.truncate(self.max_features);

        corners
            .into_iter()
            .map(|c| Feature {
                x: c.x,
                y: c.y,
                score: c.score,
                descriptor: describe(image, c.x as i32, c.y as i32),
            })
            .collect()
    }
}

/// BRIEF descriptor centred on (cx, cy). Caller guarantees the patch fits.
fn describe(image: &GrayImage, cx: i32, cy: i32) -> Descriptor {
    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    let px = |(dx, dy): (i32, i32)| image.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0];
    for (bit, &(a, b)) in pattern().iter().enumerate() {
        if px(a) < px(b) {
            bytes[bit / 8] |= 1 << (bit % 8);
        }
    }
    Descriptor(bytes)
}

/// Brute-force matching: every query descriptor is paired with its
/// nearest train descriptor. Train descriptors may be reused; there is no
/// cross-check or ratio test. Ties go to the lowest train index.
pub fn match_descriptors(query: &[Feature], train: &[Feature]) -> Vec<DescriptorMatch> {
    if train.is_empty() {
        return Vec::new();
    }
    query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            train
                .iter()
                .enumerate()
                .map(|(ti, t)| DescriptorMatch {
                    query: qi,
                    train: ti,
                    distance: q.descriptor.hamming(&t.descriptor),
                })
                .min_by_key(|m| (m.distance, m.train))
        })
        .collect()
}
