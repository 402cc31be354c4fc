//! Callback trait for capture-flow events.
//!
//! Inject an [`Arc<dyn CaptureObserver>`] via
//! [`crate::flow::CaptureFlow::with_observer`] to mirror the flow into a UI:
//! the status indicator, transient notifications, step changes and the camera
//! modal. All methods default to no-ops, so hosts only override what they
//! render.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docscan::{CaptureObserver, FlowStatus, Notification};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct Toasts(Mutex<Vec<String>>);
//!
//! impl CaptureObserver for Toasts {
//!     fn on_notification(&self, n: &Notification) {
//!         self.0.lock().unwrap().push(n.message.clone());
//!     }
//! }
//!
//! let toasts = Toasts::default();
//! toasts.on_status(FlowStatus::Submitting);
//! toasts.on_notification(&Notification::new("Copied!"));
//! assert_eq!(toasts.0.lock().unwrap().len(), 1);
//! ```

use crate::config::DEFAULT_NOTIFICATION_TTL;
use crate::machine::CaptureStep;
use crate::pipeline::camera::SessionStatus;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The flow-wide status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Ready,
    ProcessingImage,
    Submitting,
    Success,
    Error,
}

impl FlowStatus {
    /// Text shown in the indicator.
    pub fn label(self) -> &'static str {
        match self {
            FlowStatus::Ready => "Ready",
            FlowStatus::ProcessingImage => "Processing Image...",
            FlowStatus::Submitting => "Submitting...",
            FlowStatus::Success => "Success",
            FlowStatus::Error => "Error",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A transient message that dismisses itself after `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub ttl: Duration,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Receives capture-flow events.
///
/// Called from whichever task drives the flow, never while the flow holds a
/// lock, so implementations may call back into read-only flow accessors.
pub trait CaptureObserver: Send + Sync {
    /// The status indicator changed.
    fn on_status(&self, status: FlowStatus) {
        let _ = status;
    }

    /// A notification should be shown for `notification.ttl`.
    fn on_notification(&self, notification: &Notification) {
        let _ = notification;
    }

    /// The capture step moved.
    fn on_step_changed(&self, from: CaptureStep, to: CaptureStep) {
        let _ = (from, to);
    }

    /// A camera session changed state. `message` is set in `Error`.
    fn on_camera_status(&self, status: SessionStatus, message: Option<&str>) {
        let _ = (status, message);
    }
}

/// Default observer: ignores everything.
pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}

/// Shared observer handle as stored by the flow.
pub type SharedObserver = Arc<dyn CaptureObserver>;
