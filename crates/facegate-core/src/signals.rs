//! Cross-thread signals between a capture worker and its owner.
//!
//! The only two inbound signals are "cancel" and "capture now", both plain
//! atomic flags. The only outbound data is the latest processed frame.

use crate::types::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct SessionSignals {
    cancel: AtomicBool,
    capture: AtomicBool,
}

impl SessionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop at the top of its next iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Ask an enrollment worker to capture the next detected face.
    pub fn request_capture(&self) {
        self.capture.store(true, Ordering::SeqCst);
    }

    pub fn capture_requested(&self) -> bool {
        self.capture.load(Ordering::SeqCst)
    }

    /// Clear the capture request once it has been served.
    pub fn consume_capture(&self) -> bool {
        self.capture.swap(false, Ordering::SeqCst)
    }
}

/// Single-slot handoff of the most recent successfully processed frame.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let mut slot = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(frame));
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
