use facegate_core::detector::{FaceLocator, LocatorError};
use facegate_core::session::{run_enrollment, FrameSource, LoginConfig, LoginSession};
use facegate_core::{
    EnrollOutcome, EnrollmentStore, FrameSlot, LoginOutcome, NormMatcher, SessionSignals,
};
use facegate_capture::CaptureError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Locator(#[from] LocatorError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Owner side of one running capture session.
///
/// The worker polls the shared signals between frames; the final outcome
/// arrives once on `outcome()`.
pub struct SessionHandle<T> {
    signals: Arc<SessionSignals>,
    preview: Arc<FrameSlot>,
    reply: oneshot::Receiver<Result<T, EngineError>>,
}

impl<T> SessionHandle<T> {
    pub fn signals(&self) -> Arc<SessionSignals> {
        Arc::clone(&self.signals)
    }

    pub fn request_capture(&self) {
        self.signals.request_capture();
    }

    /// Slot holding the most recent annotated frame.
    pub fn preview(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.preview)
    }

    /// Wait for the worker's terminal outcome.
    pub async fn outcome(self) -> Result<T, EngineError> {
        self.reply.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Start a login session on a dedicated OS thread.
///
/// `open` runs on that thread and builds the frame source and face
/// locator; a failure there is reported through `outcome()` before any
/// frame is read.
pub fn spawn_login<S, L, F>(
    open: F,
    store: EnrollmentStore,
    config: LoginConfig,
) -> Result<SessionHandle<LoginOutcome>, EngineError>
where
    S: FrameSource,
    L: FaceLocator,
    F: FnOnce() -> Result<(S, L), EngineError> + Send + 'static,
{
    spawn_worker("facegate-login", open, move |source, locator, signals, preview| {
        LoginSession::new(config).run(source, locator, &store, &NormMatcher, signals, Some(preview))
    })
}

/// Start an enrollment session on a dedicated OS thread.
pub fn spawn_enrollment<S, L, F>(
    open: F,
    store: EnrollmentStore,
) -> Result<SessionHandle<EnrollOutcome>, EngineError>
where
    S: FrameSource,
    L: FaceLocator,
    F: FnOnce() -> Result<(S, L), EngineError> + Send + 'static,
{
    spawn_worker("facegate-enroll", open, move |source, locator, signals, preview| {
        run_enrollment(source, locator, &store, signals, Some(preview))
    })
}

fn spawn_worker<T, S, L, F, W>(
    name: &str,
    open: F,
    work: W,
) -> Result<SessionHandle<T>, EngineError>
where
    T: Send + 'static,
    S: FrameSource,
    L: FaceLocator,
    F: FnOnce() -> Result<(S, L), EngineError> + Send + 'static,
    W: FnOnce(&mut S, &mut L, &SessionSignals, &FrameSlot) -> T + Send + 'static,
{
    let signals = Arc::new(SessionSignals::new());
    let preview = Arc::new(FrameSlot::new());
    let (reply_tx, reply_rx) = oneshot::channel();

    let worker_signals = Arc::clone(&signals);
    let worker_preview = Arc::clone(&preview);

    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = open().map(|(mut source, mut locator)| {
                work(&mut source, &mut locator, &worker_signals, &worker_preview)
            });
            if let Err(err) = &result {
                tracing::error!(error = %err, "session startup failed");
            }
            let _ = reply_tx.send(result);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(SessionHandle {
        signals,
        preview,
        reply: reply_rx,
    })
}
