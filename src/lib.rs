//! # edgequake-docscan
//!
//! Capture both sides of an identity document, compress them, keep progress
//! across restarts, and submit the pair to a field-extraction service.
//!
//! ## Why this crate?
//!
//! Capture flows on phones fail in boring ways: the camera is refused or
//! busy, a 12 MP photo is too big to post, the tab reloads halfway through.
//! This crate handles each of them once: tiered camera negotiation with a
//! native-camera fallback, a 1200 px JPEG cap on everything that leaves the
//! device, and write-through persistence so a reload resumes at the right
//! step.
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera / file
//!  │
//!  ├─ 1. Acquire    tiered camera negotiation, or a picked file
//!  ├─ 2. Transcode  decode, cap longer edge at 1200 px, JPEG (spawn_blocking)
//!  ├─ 3. Record     front → back → ready, written through to durable storage
//!  ├─ 4. Submit     POST {front_image, back_image} to the extraction endpoint
//!  └─ 5. Present    field labels, copy text, print job
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docscan::{CaptureConfig, CaptureFlow, FileStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CaptureConfig::builder()
//!         .endpoint("https://extract.example.com/passport")
//!         .build()?;
//!     let store = Arc::new(FileStore::open(".docscan/state.json")?);
//!     let flow = CaptureFlow::new(config, store)?;
//!
//!     flow.process_upload(std::fs::read("front.jpg")?).await?;
//!     flow.process_upload(std::fs::read("back.jpg")?).await?;
//!     let result = flow.submit().await?;
//!     print!("{}", edgequake_docscan::present::copy_all_text(&result));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docscan` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod flow;
pub mod machine;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod present;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CaptureConfig, CaptureConfigBuilder};
pub use error::{AcquireError, DocScanError};
pub use flow::{CaptureFlow, FlowSnapshot};
pub use machine::{CaptureSide, CaptureStateMachine, CaptureStep, PersistedCaptureState};
pub use observer::{CaptureObserver, FlowStatus, NoopObserver, Notification};
pub use output::{ExtractionResult, ImageOrigin, InlineImage, RawImage, TranscodedImage};
pub use pipeline::camera::{
    CameraAcquirer, CameraProvider, CameraSession, CaptureTier, MediaStream, NativeCapture,
    SessionStatus, StillCamera,
};
pub use pipeline::submit::SubmissionClient;
pub use pipeline::transcode::transcode;
pub use present::{ClipboardSink, PrintJob, PrintSink};
pub use store::{DurableStore, FileStore, MemoryStore};
