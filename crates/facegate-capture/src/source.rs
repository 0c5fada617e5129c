//! Replay a directory of still images as a frame stream.

use facegate_core::session::{FrameSource, FrameSourceError};
use facegate_core::types::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame directory not found: {0}")]
    SourceNotFound(String),
    #[error("cannot list {path}: {source}")]
    List {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no frames in {0}")]
    NoFrames(String),
}

/// Frames read one at a time from image files in a directory.
///
/// Files are ordered by name. A file that fails to decode ends the stream
/// with an error; running past the last file is end of stream.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    released: bool,
}

impl ImageDirSource {
    /// Open a frame directory. Fails if it is missing or holds no images.
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        if !dir.is_dir() {
            return Err(CaptureError::SourceNotFound(dir.display().to_string()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| CaptureError::List {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::NoFrames(dir.display().to_string()));
        }

        tracing::info!(dir = %dir.display(), frames = files.len(), "frame source opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
            released: false,
        })
    }

    /// Frames not yet delivered.
    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.next)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.released {
            return Ok(None);
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let img = image::open(path)
            .map_err(|e| FrameSourceError::Read(format!("{}: {e}", path.display())))?;
        tracing::trace!(path = %path.display(), "frame read");
        Ok(Some(img.to_rgb8()))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            tracing::debug!(
                dir = %self.dir.display(),
                delivered = self.next,
                remaining = self.remaining(),
                "frame source released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frame(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(6, 4, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_missing_directory() {
        let err = ImageDirSource::open(Path::new("/nonexistent/frames"));
        assert!(matches!(err, Err(CaptureError::SourceNotFound(_))));
    }

    #[test]
    fn test_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not a frame").unwrap();
        let err = ImageDirSource::open(tmp.path());
        assert!(matches!(err, Err(CaptureError::NoFrames(_))));
    }

    #[test]
    fn test_frames_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_frame(tmp.path(), "frame_002.png", 20);
        write_frame(tmp.path(), "frame_001.png", 10);
        write_frame(tmp.path(), "frame_003.PNG", 30);

        let mut source = ImageDirSource::open(tmp.path()).unwrap();
        assert_eq!(source.remaining(), 3);

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (6, 4));
            seen.push(frame.get_pixel(0, 0)[0]);
        }
        assert_eq!(seen, vec![10, 20, 30]);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_corrupt_frame_is_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_frame(tmp.path(), "a.png", 10);
        std::fs::write(tmp.path().join("b.png"), b"garbage").unwrap();

        let mut source = ImageDirSource::open(tmp.path()).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(source.next_frame(), Err(FrameSourceError::Read(_))));
    }

    #[test]
    fn test_released_source_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        write_frame(tmp.path(), "a.png", 10);
        let mut source = ImageDirSource::open(tmp.path()).unwrap();
        source.release();
        source.release();
        assert!(source.next_frame().unwrap().is_none());
    }
}
