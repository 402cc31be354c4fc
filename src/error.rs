//! Error types for the edgequake-docscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocScanError`] — **Surfaced**: an operation on the capture flow did not
//!   complete (unreadable image, camera blocked, endpoint down). Every variant
//!   is recoverable: the flow stays on an interactive step and the previously
//!   committed durable snapshot is left untouched.
//!
//! * [`AcquireError`] — **Swallowed**: a single camera-acquisition tier was
//!   refused. The acquirer logs it and falls through to the next tier; the
//!   caller only ever sees [`DocScanError::CameraUnavailable`] once every tier
//!   has been exhausted.

use crate::machine::{CaptureSide, CaptureStep};
use thiserror::Error;

/// Shown when live camera access is refused because the host is not a
/// secure (HTTPS) context.
pub const INSECURE_CONTEXT_MESSAGE: &str = "In-app camera requires a secure (HTTPS) connection. \
Your browser blocks camera access on HTTP sites for security.";

/// Shown when every acquisition tier failed.
pub const CAMERA_UNAVAILABLE_MESSAGE: &str = "Unable to access camera. This could be due to \
permission settings or another app using the camera.";

/// All errors surfaced by the edgequake-docscan library.
#[derive(Debug, Error)]
pub enum DocScanError {
    // ── Image errors ──────────────────────────────────────────────────────
    /// The source bytes could not be decoded as an image.
    #[error("Failed to decode image: {detail}")]
    Decode { detail: String },

    /// The decoded image could not be re-encoded.
    #[error("Failed to encode image: {detail}")]
    Encode { detail: String },

    /// The camera delivered a frame with no pixels (stream not yet playing).
    #[error("Camera frame is empty ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    // ── Camera errors ─────────────────────────────────────────────────────
    /// Live camera access requires a secure execution context.
    #[error("{}", INSECURE_CONTEXT_MESSAGE)]
    InsecureContext,

    /// Every acquisition tier failed.
    #[error("{}\nLast failure: {detail}", CAMERA_UNAVAILABLE_MESSAGE)]
    CameraUnavailable { detail: String },

    /// The session was closed before the operation could complete.
    #[error("Camera session was closed")]
    SessionClosed,

    /// The session is not streaming (still opening, or in error).
    #[error("Camera session is not active (status: {status})")]
    SessionNotActive { status: String },

    /// No camera provider was configured on the flow.
    #[error("No camera provider configured; use file upload instead")]
    NoCamera,

    /// The host offers no native camera capture affordance.
    #[error("Native camera capture is not available on this host")]
    NativeCaptureUnavailable,

    // ── Flow errors ───────────────────────────────────────────────────────
    /// An image was produced while no slot is waiting for one.
    #[error("No capture slot is open in step '{step}'\nDelete an image or start a new scan.")]
    NoOpenSlot { step: CaptureStep },

    /// Submission requires both sides to be captured.
    #[error("The {side} image has not been captured yet")]
    MissingImage { side: CaptureSide },

    /// Submission was requested after results were already produced.
    #[error("Results are already available; reset to start a new scan")]
    AlreadySubmitted,

    /// The operation is already in flight.
    #[error("Another {operation} is already in progress")]
    Busy { operation: &'static str },

    // ── Submission errors ─────────────────────────────────────────────────
    /// The endpoint was unreachable or answered with a non-success status.
    #[error("Submission to '{endpoint}' failed: {reason}")]
    Network {
        endpoint: String,
        status: Option<u16>,
        reason: String,
    },

    /// The endpoint answered, but not with a structured result.
    #[error("Extraction response could not be parsed: {detail}")]
    Parse { detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The durable store rejected a read or write.
    #[error("Capture storage error: {detail}")]
    Storage { detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// A clipboard or print sink could not take the content.
    #[error("Failed to write to {target}: {detail}")]
    Sink { target: &'static str, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocScanError {
    /// Whether retrying the same action without changing anything may succeed.
    ///
    /// Hosts use this to decide between "try again" and "change something".
    pub fn is_transient(&self) -> bool {
        match self {
            DocScanError::Network { status, .. } => match status {
                Some(code) => *code >= 500 || *code == 408 || *code == 429,
                None => true,
            },
            DocScanError::Busy { .. }
            | DocScanError::EmptyFrame { .. }
            | DocScanError::CameraUnavailable { .. }
            | DocScanError::Storage { .. } => true,
            _ => false,
        }
    }
}

/// A non-fatal failure of one camera-acquisition tier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The user or platform denied camera permission.
    #[error("camera permission denied")]
    PermissionDenied,

    /// The device is held by another application.
    #[error("camera is busy")]
    DeviceBusy,

    /// The constraint set cannot be satisfied by any device.
    #[error("constraints not satisfiable: {0}")]
    Overconstrained(String),

    /// No camera device is present.
    #[error("no camera device found")]
    NotFound,

    /// Any other host failure.
    #[error("{0}")]
    Other(String),
}
