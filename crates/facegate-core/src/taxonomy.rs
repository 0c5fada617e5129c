//! Category taxonomy configuration.
//!
//! An ordered list of categories, each with the image files that serve as
//! its references. Loaded from TOML:
//!
//! ```toml
//! [[category]]
//! name = "dog"
//! references = ["Modelimages/dog_1.jpg", "Modelimages/dog_2.jpg"]
//! ```
//!
//! Order in the file is the ranking tie-break order.

use crate::classifier::{ClassifierError, CategoryModel};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Built-in taxonomy: seven animals, three references each.
const DEFAULT_TAXONOMY: &str = r#"
[[category]]
name = "dog"
references = ["Modelimages/dog_1.jpg", "Modelimages/dog_2.jpg", "Modelimages/dog_3.jpg"]

[[category]]
name = "cat"
references = ["Modelimages/cat_1.jpg", "Modelimages/cat_2.jpg", "Modelimages/cat_3.jpg"]

[[category]]
name = "bird"
references = ["Modelimages/bird_1.jpg", "Modelimages/bird_2.jpg", "Modelimages/bird_3.jpg"]

[[category]]
name = "rabbit"
references = ["Modelimages/rabbit_1.jpg", "Modelimages/rabbit_2.jpg", "Modelimages/rabbit_3.jpg"]

[[category]]
name = "fish"
references = ["Modelimages/fish_1.jpg", "Modelimages/fish_2.jpg", "Modelimages/fish_3.jpg"]

[[category]]
name = "horse"
references = ["Modelimages/horse_1.jpg", "Modelimages/horse_2.jpg", "Modelimages/horse_3.jpg"]

[[category]]
name = "snake"
references = ["Modelimages/snake_1.jpg", "Modelimages/snake_2.jpg", "Modelimages/snake_3.jpg"]
"#;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("cannot read taxonomy {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("taxonomy parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("taxonomy has no categories")]
    Empty,
    #[error("category name must not be empty")]
    EmptyName,
    #[error("duplicate category: {0}")]
    Duplicate(String),
}

/// One `[[category]]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Taxonomy {
    #[serde(rename = "category", default)]
    pub categories: Vec<CategorySpec>,
    /// Directory relative reference paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Taxonomy {
    pub fn from_toml_str(src: &str) -> Result<Self, TaxonomyError> {
        let taxonomy: Taxonomy = toml::from_str(src)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Parse a taxonomy file; relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let src = std::fs::read_to_string(path).map_err(|source| TaxonomyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut taxonomy = Self::from_toml_str(&src)?;
        taxonomy.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            categories = taxonomy.categories.len(),
            "loaded taxonomy"
        );
        Ok(taxonomy)
    }

    /// The built-in animal taxonomy, resolved against the working directory.
    pub fn builtin() -> Result<Self, TaxonomyError> {
        Self::from_toml_str(DEFAULT_TAXONOMY)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        if self.categories.is_empty() {
            return Err(TaxonomyError::Empty);
        }
        let mut seen = HashSet::new();
        for c in &self.categories {
            if c.name.trim().is_empty() {
                return Err(TaxonomyError::EmptyName);
            }
            if !seen.insert(c.name.as_str()) {
                return Err(TaxonomyError::Duplicate(c.name.clone()));
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Load every reference image, in taxonomy order.
    ///
    /// A missing or unreadable image is logged and skipped. Fails only when
    /// no image at all could be loaded.
    pub fn load_models(&self) -> Result<Vec<CategoryModel>, ClassifierError> {
        let mut models = Vec::with_capacity(self.categories.len());
        let mut loaded = 0usize;

        for spec in &self.categories {
            let mut model = CategoryModel::new(spec.name.clone());
            for reference in &spec.references {
                let path = self.resolve(reference);
                match image::open(&path) {
                    Ok(img) => {
                        model.add_reference(&img);
                        loaded += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            category = %spec.name,
                            path = %path.display(),
                            error = %err,
                            "failed to load reference image"
                        );
                    }
                }
            }
            tracing::debug!(category = %spec.name, references = model.references.len(), "category loaded");
            models.push(model);
        }

        if loaded == 0 {
            return Err(ClassifierError::NoReferences);
        }
        Ok(models)
    }
}
