//! Capture-loop state machines for login and enrollment.
//!
//! Both loops pull frames from a [`FrameSource`], normalize them, locate
//! faces and act on the result. The frame pull is the only blocking point
//! per iteration; everything else is synchronous CPU work. Cancellation is
//! checked at the top of every iteration.

use crate::detector::FaceLocator;
use crate::enrollment::EnrollmentStore;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::preprocess::preprocess_frame;
use crate::signals::{FrameSlot, SessionSignals};
use crate::types::{EnrollOutcome, FaceRegion, Frame, LoginOutcome, Matcher};
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use thiserror::Error;

/// Consecutive face-less frames tolerated before a login times out.
pub const DEFAULT_MAX_MISSES: u32 = 100;

const PREVIEW_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("frame read failed: {0}")]
    Read(String),
}

/// Producer of raw color frames. `Ok(None)` marks end of stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
    /// Release the underlying device. Called once on every exit path.
    fn release(&mut self);
}

/// Tunables for the login loop.
///
/// Both values depend on capture resolution and frame rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoginConfig {
    /// Norm-difference score a face must stay strictly below.
    pub match_threshold: f64,
    /// Consecutive frames without any face before giving up.
    pub max_misses: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_misses: DEFAULT_MAX_MISSES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingFrame,
    Detecting,
    NoFace,
    FaceFound,
    Matching,
    Success,
    TimeoutFailure,
    Cancelled,
}

impl LoginState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoginState::Success | LoginState::TimeoutFailure | LoginState::Cancelled
        )
    }
}

/// One login attempt. Consumed by [`LoginSession::run`].
#[derive(Debug)]
pub struct LoginSession {
    config: LoginConfig,
    state: LoginState,
    misses: u32,
    frames: u64,
}

impl LoginSession {
    pub fn new(config: LoginConfig) -> Self {
        Self {
            config,
            state: LoginState::AwaitingFrame,
            misses: 0,
            frames: 0,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Current run of consecutive face-less frames.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn enter(&mut self, next: LoginState) {
        tracing::trace!(from = ?self.state, to = ?next, "login transition");
        self.state = next;
    }

    /// Record a frame with no detected face.
    ///
    /// Returns the timeout outcome once the miss cap is reached.
    pub fn on_no_face(&mut self) -> Option<LoginOutcome> {
        self.enter(LoginState::NoFace);
        self.misses += 1;
        tracing::debug!(misses = self.misses, "no face detected");
        if self.misses >= self.config.max_misses {
            self.enter(LoginState::TimeoutFailure);
            return Some(LoginOutcome::TimeoutFailure { frames: self.frames });
        }
        None
    }

    /// Record a frame with at least one face, matched or not.
    pub fn on_faces(&mut self, count: usize) {
        self.enter(LoginState::FaceFound);
        self.misses = 0;
        tracing::debug!(faces = count, "face detected");
    }

    fn finish<S: FrameSource>(&mut self, source: &mut S, outcome: LoginOutcome) -> LoginOutcome {
        source.release();
        match &outcome {
            LoginOutcome::Success { score, frames } => {
                self.enter(LoginState::Success);
                tracing::info!(score, frames, "login succeeded");
            }
            LoginOutcome::TimeoutFailure { frames } => {
                self.enter(LoginState::TimeoutFailure);
                tracing::info!(frames, misses = self.misses, "login failed: no face within attempt budget");
            }
            LoginOutcome::Cancelled => {
                self.enter(LoginState::Cancelled);
                tracing::info!(frames = self.frames, "login cancelled");
            }
        }
        outcome
    }

    /// Drive the capture → detect → match loop until a terminal outcome.
    pub fn run<S, L, M>(
        mut self,
        source: &mut S,
        locator: &mut L,
        store: &EnrollmentStore,
        matcher: &M,
        signals: &SessionSignals,
        preview: Option<&FrameSlot>,
    ) -> LoginOutcome
    where
        S: FrameSource,
        L: FaceLocator,
        M: Matcher,
    {
        loop {
            if signals.is_cancelled() {
                return self.finish(source, LoginOutcome::Cancelled);
            }

            self.enter(LoginState::AwaitingFrame);
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("frame source exhausted");
                    return self.finish(source, LoginOutcome::Cancelled);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "frame source failed");
                    return self.finish(source, LoginOutcome::Cancelled);
                }
            };
            self.frames += 1;

            self.enter(LoginState::Detecting);
            let gray = preprocess_frame(&frame);
            let faces = locator.detect(&gray);
            publish_preview(preview, frame, &faces);

            if faces.is_empty() {
                if let Some(outcome) = self.on_no_face() {
                    return self.finish(source, outcome);
                }
                continue;
            }
            self.on_faces(faces.len());

            let references = store.load_references();
            if references.is_empty() {
                tracing::debug!(dir = %store.dir().display(), "no enrolled references");
            }

            self.enter(LoginState::Matching);
            for region in &faces {
                let Some(crop) = region.crop(&gray) else {
                    continue;
                };
                let result = matcher.compare(&crop, &references, self.config.match_threshold);
                if result.matched {
                    let score = result.best_score.unwrap_or(0.0);
                    let frames = self.frames;
                    return self.finish(source, LoginOutcome::Success { score, frames });
                }
                tracing::debug!(score = ?result.best_score, "face did not match");
            }
        }
    }
}

/// Enrollment capture loop: previews frames and, once a capture has been
/// requested, enrolls the first face of the next frame that has one.
///
/// The capture request stays pending across face-less frames.
pub fn run_enrollment<S, L>(
    source: &mut S,
    locator: &mut L,
    store: &EnrollmentStore,
    signals: &SessionSignals,
    preview: Option<&FrameSlot>,
) -> EnrollOutcome
where
    S: FrameSource,
    L: FaceLocator,
{
    let outcome = loop {
        if signals.is_cancelled() {
            tracing::info!("enrollment cancelled");
            break EnrollOutcome::Cancelled;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("frame source exhausted before capture");
                break EnrollOutcome::Cancelled;
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame source failed");
                break EnrollOutcome::Cancelled;
            }
        };

        let gray = preprocess_frame(&frame);
        let faces = locator.detect(&gray);
        publish_preview(preview, frame, &faces);

        if !signals.capture_requested() {
            continue;
        }
        let Some(face) = faces.iter().find_map(|r| r.crop(&gray)) else {
            continue;
        };
        signals.consume_capture();

        break match store.enroll(&face) {
            Ok(dir) => EnrollOutcome::Enrolled { dir },
            Err(err) => {
                tracing::warn!(error = %err, "enrollment failed");
                EnrollOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
    };

    source.release();
    outcome
}

fn publish_preview(preview: Option<&FrameSlot>, mut frame: Frame, faces: &[FaceRegion]) {
    let Some(slot) = preview else {
        return;
    };
    for r in faces {
        draw_hollow_rect_mut(
            &mut frame,
            Rect::at(r.x as i32, r.y as i32).of_size(r.width.max(1), r.height.max(1)),
            PREVIEW_BOX_COLOR,
        );
    }
    slot.publish(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::NormMatcher;
    use crate::preprocess::preprocess_frame;
    use image::{GrayImage, RgbImage};
    use std::collections::VecDeque;

    struct ScriptedSource {
        frames: VecDeque<Frame>,
        served: usize,
        released: usize,
        fail_at_end: bool,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Frame>) -> Self {
            Self {
                frames: frames.into(),
                served: 0,
                released: 0,
                fail_at_end: false,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            match self.frames.pop_front() {
                Some(f) => {
                    self.served += 1;
                    Ok(Some(f))
                }
                None if self.fail_at_end => Err(FrameSourceError::Read("unplugged".into())),
                None => Ok(None),
            }
        }

        fn release(&mut self) {
            self.released += 1;
        }
    }

    /// Returns the scripted detections frame by frame, then nothing.
    struct ScriptedLocator {
        script: VecDeque<Vec<FaceRegion>>,
    }

    impl ScriptedLocator {
        fn new(script: Vec<Vec<FaceRegion>>) -> Self {
            Self { script: script.into() }
        }
    }

    impl FaceLocator for ScriptedLocator {
        fn detect(&mut self, _gray: &GrayImage) -> Vec<FaceRegion> {
            self.script.pop_front().unwrap_or_default()
        }
    }

    fn textured_frame(seed: u32) -> Frame {
        RgbImage::from_fn(48, 48, |x, y| {
            let v = ((x / 4) * 53 + (y / 4) * 97 + seed * 31) % 256;
            image::Rgb([v as u8, (v / 2) as u8, 255 - v as u8])
        })
    }

    const FACE: FaceRegion = FaceRegion { x: 8, y: 8, width: 32, height: 32 };

    fn strict_config(max_misses: u32) -> LoginConfig {
        LoginConfig {
            match_threshold: 1.0,
            max_misses,
        }
    }

    fn enrolled_store(dir: &std::path::Path, frame: &Frame) -> EnrollmentStore {
        let store = EnrollmentStore::new(dir);
        let crop = FACE.crop(&preprocess_frame(frame)).unwrap();
        store.enroll(&crop).unwrap();
        store
    }

    #[test]
    fn test_timeout_after_exact_miss_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let mut source = ScriptedSource::new(vec![textured_frame(0); 150]);
        let mut locator = ScriptedLocator::new(vec![]);

        let outcome = LoginSession::new(strict_config(100)).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );

        assert_eq!(outcome, LoginOutcome::TimeoutFailure { frames: 100 });
        assert_eq!(source.served, 100);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_unmatched_face_resets_miss_counter() {
        let tmp = tempfile::tempdir().unwrap();
        let store = enrolled_store(tmp.path(), &textured_frame(1));

        // 99 misses, one non-matching face, then 100 more misses
        let mut script = vec![vec![]; 99];
        script.push(vec![FACE]);
        let mut source = ScriptedSource::new(vec![textured_frame(7); 250]);
        let mut locator = ScriptedLocator::new(script);

        let outcome = LoginSession::new(strict_config(100)).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );

        assert_eq!(outcome, LoginOutcome::TimeoutFailure { frames: 200 });
    }

    #[test]
    fn test_match_stops_frame_consumption() {
        let tmp = tempfile::tempdir().unwrap();
        let frame = textured_frame(3);
        let store = enrolled_store(tmp.path(), &frame);

        let mut source = ScriptedSource::new(vec![frame; 10]);
        let mut locator = ScriptedLocator::new(vec![vec![], vec![], vec![FACE]]);

        let outcome = LoginSession::new(strict_config(100)).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );

        assert_eq!(outcome, LoginOutcome::Success { score: 0.0, frames: 3 });
        assert_eq!(source.served, 3);
        assert_eq!(source.frames.len(), 7);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_first_matching_region_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let frame = textured_frame(5);
        let store = enrolled_store(tmp.path(), &frame);

        let decoy = FaceRegion::new(0, 0, 16, 16);
        let mut source = ScriptedSource::new(vec![frame]);
        let mut locator = ScriptedLocator::new(vec![vec![decoy, FACE]]);

        let outcome = LoginSession::new(strict_config(100)).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );
        assert!(matches!(outcome, LoginOutcome::Success { frames: 1, .. }));
    }

    #[test]
    fn test_empty_store_never_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path().join("empty"));
        let mut source = ScriptedSource::new(vec![textured_frame(2); 5]);
        let mut locator = ScriptedLocator::new(vec![vec![FACE]; 5]);

        let outcome = LoginSession::new(LoginConfig::default()).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );
        // Source runs dry without a match
        assert_eq!(outcome, LoginOutcome::Cancelled);
        assert_eq!(source.served, 5);
    }

    #[test]
    fn test_cancel_checked_before_first_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let signals = SessionSignals::new();
        signals.cancel();
        let mut source = ScriptedSource::new(vec![textured_frame(0); 3]);
        let mut locator = ScriptedLocator::new(vec![]);

        let outcome = LoginSession::new(LoginConfig::default()).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &signals,
            None,
        );
        assert_eq!(outcome, LoginOutcome::Cancelled);
        assert_eq!(source.served, 0);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_source_failure_cancels() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let mut source = ScriptedSource::new(vec![textured_frame(0)]);
        source.fail_at_end = true;
        let mut locator = ScriptedLocator::new(vec![]);

        let outcome = LoginSession::new(LoginConfig::default()).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );
        assert_eq!(outcome, LoginOutcome::Cancelled);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_session_counters() {
        let mut session = LoginSession::new(strict_config(3));
        assert_eq!(session.state(), LoginState::AwaitingFrame);
        assert!(session.on_no_face().is_none());
        assert!(session.on_no_face().is_none());
        assert_eq!(session.misses(), 2);
        session.on_faces(1);
        assert_eq!(session.misses(), 0);
        assert_eq!(session.state(), LoginState::FaceFound);
        assert!(session.on_no_face().is_none());
        assert!(session.on_no_face().is_none());
        assert!(session.on_no_face().is_some());
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_preview_receives_annotated_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let slot = FrameSlot::new();
        let mut source = ScriptedSource::new(vec![RgbImage::new(48, 48)]);
        let mut locator = ScriptedLocator::new(vec![vec![FACE]]);

        LoginSession::new(LoginConfig::default()).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            Some(&slot),
        );

        let latest = slot.latest().unwrap();
        assert_eq!(*latest.get_pixel(FACE.x, FACE.y), PREVIEW_BOX_COLOR);
    }

    #[test]
    fn test_enrollment_waits_for_capture_request() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path().join("face_data"));
        let signals = SessionSignals::new();
        let mut source = ScriptedSource::new(vec![textured_frame(4); 5]);
        let mut locator = ScriptedLocator::new(vec![vec![FACE]; 5]);

        let outcome = run_enrollment(&mut source, &mut locator, &store, &signals, None);
        assert_eq!(outcome, EnrollOutcome::Cancelled);
        assert!(!store.is_enrolled());
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_enrollment_captures_first_face() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path().join("face_data"));
        let signals = SessionSignals::new();
        signals.request_capture();

        let frame = textured_frame(6);
        let mut source = ScriptedSource::new(vec![frame.clone(); 4]);
        // Capture stays pending until a frame has a face
        let mut locator = ScriptedLocator::new(vec![vec![], vec![FACE]]);

        let outcome = run_enrollment(&mut source, &mut locator, &store, &signals, None);
        assert_eq!(
            outcome,
            EnrollOutcome::Enrolled {
                dir: tmp.path().join("face_data")
            }
        );
        assert_eq!(source.served, 2);
        assert!(!signals.capture_requested());

        let stored = image::open(store.variant_path(1)).unwrap().to_luma8();
        assert_eq!(stored, FACE.crop(&preprocess_frame(&frame)).unwrap());
    }

    #[test]
    fn test_enrolled_face_logs_in() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(tmp.path());
        let signals = SessionSignals::new();
        signals.request_capture();
        let frame = textured_frame(9);

        let mut source = ScriptedSource::new(vec![frame.clone()]);
        let mut locator = ScriptedLocator::new(vec![vec![FACE]]);
        run_enrollment(&mut source, &mut locator, &store, &signals, None);

        let mut source = ScriptedSource::new(vec![frame]);
        let mut locator = ScriptedLocator::new(vec![vec![FACE]]);
        let outcome = LoginSession::new(LoginConfig::default()).run(
            &mut source,
            &mut locator,
            &store,
            &NormMatcher,
            &SessionSignals::new(),
            None,
        );
        assert_eq!(outcome, LoginOutcome::Success { score: 0.0, frames: 1 });
    }
}
