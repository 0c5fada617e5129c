//! facegate-capture: Frame sources for the login and enrollment loops.
//!
//! Provides an image-directory source that replays stored frames in
//! lexical filename order through the `FrameSource` interface.

pub mod source;

pub use source::{CaptureError, ImageDirSource};
