//! Single-identity enrollment store.
//!
//! One captured face is expanded into four fixed variants (original,
//! mirror, brightness boost, blur) and written as `user_face_1.png` ..
//! `user_face_4.png`. Variants are staged as hidden temporary files and
//! renamed into place while holding the store-wide write lock, so readers
//! never observe a half-written set.

use crate::preprocess::{blur, boost_brightness};
use image::imageops::flip_horizontal;
use image::{GrayImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Number of reference variants derived from one sample.
pub const VARIANT_COUNT: usize = 4;

const FILE_PREFIX: &str = "user_face_";
const FILE_EXT: &str = "png";

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("empty face sample")]
    EmptySample,
    #[error("cannot create enrollment directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to commit {path}: {source}")]
    Commit {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Derive the four stored variants, in file order.
pub fn augment(sample: &GrayImage) -> [GrayImage; VARIANT_COUNT] {
    [
        sample.clone(),
        flip_horizontal(sample),
        boost_brightness(sample),
        blur(sample),
    ]
}

/// Handle to the on-disk reference set of the single enrolled identity.
///
/// Writes are serialized against reads only among clones of one store,
/// which share its lock. Two stores created separately with `new` for the
/// same directory do not exclude each other; hand out clones instead.
#[derive(Clone, Debug)]
pub struct EnrollmentStore {
    dir: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl EnrollmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the variant at 1-based `index`.
    pub fn variant_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{index}.{FILE_EXT}"))
    }

    fn staging_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!(".{FILE_PREFIX}{index}.{FILE_EXT}.tmp"))
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!(".{FILE_PREFIX}{index}.{FILE_EXT}.bak"))
    }

    /// Write the four variants of `sample`, replacing any previous set.
    ///
    /// Creates the directory if needed. On failure nothing is committed
    /// and staged files are removed.
    pub fn enroll(&self, sample: &GrayImage) -> Result<PathBuf, EnrollmentError> {
        if sample.width() == 0 || sample.height() == 0 {
            return Err(EnrollmentError::EmptySample);
        }
        let variants = augment(sample);

        let _guard = self.lock.write().unwrap_or_else(|e| e.into_inner());

        std::fs::create_dir_all(&self.dir).map_err(|source| EnrollmentError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        for (i, variant) in variants.iter().enumerate() {
            let staged = self.staging_path(i + 1);
            if let Err(source) = variant.save_with_format(&staged, ImageFormat::Png) {
                self.discard_staged();
                return Err(EnrollmentError::Write { path: staged, source });
            }
        }

        self.commit_staged()?;

        tracing::info!(
            dir = %self.dir.display(),
            width = sample.width(),
            height = sample.height(),
            "enrolled face variants"
        );
        Ok(self.dir.clone())
    }

    fn discard_staged(&self) {
        for i in 1..=VARIANT_COUNT {
            let _ = std::fs::remove_file(self.staging_path(i));
        }
    }

    /// Swap the staged variants in for the current set, all or nothing.
    ///
    /// The current files are moved aside first. If any rename fails, the
    /// variants committed so far are removed and the previous set is put
    /// back. Caller holds the write lock.
    fn commit_staged(&self) -> Result<(), EnrollmentError> {
        let mut backed_up = Vec::with_capacity(VARIANT_COUNT);
        for i in 1..=VARIANT_COUNT {
            let target = self.variant_path(i);
            if std::fs::symlink_metadata(&target).is_err() {
                continue;
            }
            if let Err(source) = std::fs::rename(&target, self.backup_path(i)) {
                self.restore(&backed_up, 0);
                self.discard_staged();
                return Err(EnrollmentError::Commit { path: target, source });
            }
            backed_up.push(i);
        }

        for i in 1..=VARIANT_COUNT {
            let target = self.variant_path(i);
            if let Err(source) = std::fs::rename(self.staging_path(i), &target) {
                self.restore(&backed_up, i - 1);
                self.discard_staged();
                return Err(EnrollmentError::Commit { path: target, source });
            }
        }

        for &i in &backed_up {
            remove_path(&self.backup_path(i));
        }
        Ok(())
    }

    /// Undo a partial commit: drop the first `committed` new variants and
    /// move the backed-up files back into place.
    fn restore(&self, backed_up: &[usize], committed: usize) {
        for i in 1..=committed {
            let _ = std::fs::remove_file(self.variant_path(i));
        }
        for &i in backed_up {
            if let Err(err) = std::fs::rename(self.backup_path(i), self.variant_path(i)) {
                tracing::warn!(index = i, error = %err, "failed to restore previous reference");
            }
        }
    }

    /// Paths of the variant files currently present.
    pub fn reference_paths(&self) -> Vec<PathBuf> {
        (1..=VARIANT_COUNT)
            .map(|i| self.variant_path(i))
            .filter(|p| p.is_file())
            .collect()
    }

    /// True if at least one variant file exists.
    pub fn is_enrolled(&self) -> bool {
        !self.reference_paths().is_empty()
    }

    /// Load a snapshot of the stored references as grayscale images.
    ///
    /// Unreadable files are logged and skipped. An absent directory yields
    /// an empty set.
    pub fn load_references(&self) -> Vec<GrayImage> {
        let _guard = self.lock.read().unwrap_or_else(|e| e.into_inner());

        let mut references = Vec::with_capacity(VARIANT_COUNT);
        for path in self.reference_paths() {
            match image::open(&path) {
                Ok(img) => references.push(img.to_luma8()),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to load reference face");
                }
            }
        }
        references
    }
}

fn remove_path(path: &Path) {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(err) = removed {
        tracing::debug!(path = %path.display(), error = %err, "failed to remove previous reference");
    }
}
