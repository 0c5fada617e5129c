//! Multi-reference keypoint classifier.
//!
//! An unknown image is compared with every reference image of every
//! category. Each pairwise score is `1 - sum(distance) / (matches * 100)`,
//! a heuristic rather than a probability: it goes negative whenever the
//! mean Hamming distance exceeds 100. Raw pairwise scores are averaged per
//! category; the mean, as a percentage, is clamped to [0, 100].

use crate::features::{match_descriptors, FastBrief, Feature, FeatureExtractor};
use crate::preprocess::{preprocess_image, resize_to};
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Normalizing constant of the pairwise similarity formula.
const DISTANCE_SCALE: f64 = 100.0;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no category has a loadable reference image")]
    NoReferences,
    #[error("unknown image not available: {0}")]
    UnknownImage(String),
    #[error("unknown image is empty")]
    EmptyImage,
}

/// A category and its normalized reference images, in taxonomy order.
#[derive(Debug, Clone)]
pub struct CategoryModel {
    pub name: String,
    pub references: Vec<GrayImage>,
}

impl CategoryModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
        }
    }

    /// Normalize and append a reference image.
    pub fn add_reference(&mut self, image: &DynamicImage) {
        self.references.push(preprocess_image(image));
    }
}

/// Similarity of the unknown image to one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub name: String,
    /// Percentage in [0, 100].
    pub percent: f64,
    /// Number of references that contributed.
    pub references: usize,
}

/// Per-category percentages plus the best category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityReport {
    /// In taxonomy order.
    pub scores: Vec<CategoryScore>,
    pub best: String,
    pub best_percent: f64,
}

impl SimilarityReport {
    pub fn percent(&self, name: &str) -> Option<f64> {
        self.scores.iter().find(|s| s.name == name).map(|s| s.percent)
    }
}

impl fmt::Display for SimilarityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Most likely: {} ({:.2}%)", self.best, self.best_percent)?;
        writeln!(f)?;
        for s in &self.scores {
            writeln!(f, "{}: {:.2}%", s.name, s.percent)?;
        }
        Ok(())
    }
}

/// Pairwise similarity of two normalized images.
///
/// The reference is resized to the unknown image's dimensions first.
/// Returns 0 when either side has no descriptors. The result is unclamped.
pub fn pairwise_similarity<E: FeatureExtractor>(
    extractor: &E,
    unknown: &GrayImage,
    reference: &GrayImage,
) -> f64 {
    if unknown.width() == 0 || unknown.height() == 0 {
        return 0.0;
    }
    let query = extractor.extract(unknown);
    similarity_to_reference(extractor, &query, unknown.dimensions(), reference)
}

/// Pairwise similarity against descriptors already extracted from an
/// unknown image of the given dimensions.
fn similarity_to_reference<E: FeatureExtractor>(
    extractor: &E,
    query: &[Feature],
    (width, height): (u32, u32),
    reference: &GrayImage,
) -> f64 {
    if query.is_empty() || reference.width() == 0 || reference.height() == 0 {
        return 0.0;
    }
    let reference = resize_to(reference, width, height);
    let train = extractor.extract(&reference);
    if train.is_empty() {
        return 0.0;
    }
    score_matches(query, &train)
}

/// `1 - sum(distance) / (matches * 100)` over nearest-neighbor matches.
fn score_matches(query: &[Feature], train: &[Feature]) -> f64 {
    let matches = match_descriptors(query, train);
    if matches.is_empty() {
        return 0.0;
    }
    let total: f64 = matches.iter().map(|m| m.distance as f64).sum();
    1.0 - total / (matches.len() as f64 * DISTANCE_SCALE)
}

/// Classifier over a fixed, ordered set of categories.
pub struct CategoryClassifier<E = FastBrief> {
    categories: Vec<CategoryModel>,
    extractor: E,
}

impl CategoryClassifier<FastBrief> {
    pub fn new(categories: Vec<CategoryModel>) -> Self {
        Self::with_extractor(categories, FastBrief::default())
    }
}

impl<E: FeatureExtractor> CategoryClassifier<E> {
    pub fn with_extractor(categories: Vec<CategoryModel>, extractor: E) -> Self {
        Self {
            categories,
            extractor,
        }
    }

    pub fn categories(&self) -> &[CategoryModel] {
        &self.categories
    }

    /// Load the unknown image from disk and classify it.
    pub fn classify_path(&self, path: &Path) -> Result<SimilarityReport, ClassifierError> {
        let image = image::open(path)
            .map_err(|e| ClassifierError::UnknownImage(format!("{}: {e}", path.display())))?;
        self.classify(&image)
    }

    /// Score `unknown` against every category and rank them.
    ///
    /// Ties keep the category listed first. Categories without references
    /// report 0% and are never chosen.
    pub fn classify(&self, unknown: &DynamicImage) -> Result<SimilarityReport, ClassifierError> {
        if self.categories.iter().all(|c| c.references.is_empty()) {
            return Err(ClassifierError::NoReferences);
        }
        if unknown.width() == 0 || unknown.height() == 0 {
            return Err(ClassifierError::EmptyImage);
        }

        let unknown = preprocess_image(unknown);
        let query = self.extractor.extract(&unknown);
        if query.is_empty() {
            tracing::debug!("unknown image has no descriptors");
        }

        let mut scores = Vec::with_capacity(self.categories.len());
        let mut best: Option<(usize, f64)> = None;

        for (idx, category) in self.categories.iter().enumerate() {
            let percent = self.category_percent(&unknown, &query, category);
            tracing::debug!(category = %category.name, percent, "category scored");

            if !category.references.is_empty() && best.map_or(true, |(_, p)| percent > p) {
                best = Some((idx, percent));
            }
            scores.push(CategoryScore {
                name: category.name.clone(),
                percent,
                references: category.references.len(),
            });
        }

        let (best_idx, best_percent) = best.ok_or(ClassifierError::NoReferences)?;
        let report = SimilarityReport {
            best: scores[best_idx].name.clone(),
            best_percent,
            scores,
        };
        tracing::info!(best = %report.best, percent = report.best_percent, "classification complete");
        Ok(report)
    }

    fn category_percent(
        &self,
        unknown: &GrayImage,
        query: &[Feature],
        category: &CategoryModel,
    ) -> f64 {
        if category.references.is_empty() {
            return 0.0;
        }
        let dims = unknown.dimensions();
        // Raw pairwise values; negatives only get clamped after averaging
        let sum: f64 = category
            .references
            .iter()
            .map(|reference| similarity_to_reference(&self.extractor, query, dims, reference))
            .sum();
        let mean = sum / category.references.len() as f64;
        (mean * 100.0).clamp(0.0, 100.0)
    }
}
