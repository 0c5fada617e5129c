//! facegate-core: Classical face login and keypoint category classification.
//!
//! Face path: grayscale normalization, a four-variant enrollment store and
//! a minimum-norm pixel matcher driven by a capture-loop state machine.
//! Classification path: FAST/BRIEF keypoint matching against per-category
//! reference images.

pub mod classifier;
pub mod detector;
pub mod enrollment;
pub mod features;
pub mod matcher;
pub mod preprocess;
pub mod session;
pub mod signals;
pub mod taxonomy;
pub mod types;

pub use classifier::{CategoryClassifier, CategoryModel, ClassifierError, SimilarityReport};
pub use detector::{FaceLocator, RustfaceLocator};
pub use enrollment::{EnrollmentError, EnrollmentStore};
pub use matcher::NormMatcher;
pub use session::{run_enrollment, FrameSource, FrameSourceError, LoginConfig, LoginSession};
pub use signals::{FrameSlot, SessionSignals};
pub use taxonomy::Taxonomy;
pub use types::{EnrollOutcome, FaceRegion, Frame, LoginOutcome, MatchResult, Matcher};
