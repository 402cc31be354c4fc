//! The capture flow: one object a host drives from its UI events.
//!
//! [`CaptureFlow`] owns the [`CaptureStateMachine`] and the collaborators
//! around it (transcoder, camera, submission client) and keeps the
//! user-facing state in step with them: the status indicator, transient
//! notifications and the camera modal, all reported through a
//! [`CaptureObserver`].
//!
//! ## Re-entrancy
//!
//! At most one image is processed and at most one submission is in flight at
//! a time. A second request while one is running fails fast with
//! [`DocScanError::Busy`]. The guards are released on drop, so a caller that
//! abandons the future (e.g. a `select!` timeout) never leaves the flow
//! stuck.
//!
//! No lock is held across an `.await`: the machine is read, the slow work
//! runs unlocked, then the machine is locked again to commit.

use crate::config::CaptureConfig;
use crate::error::DocScanError;
use crate::machine::{CaptureSide, CaptureStateMachine, CaptureStep};
use crate::observer::{FlowStatus, NoopObserver, Notification, SharedObserver};
use crate::output::{ExtractionResult, InlineImage, RawImage};
use crate::pipeline::camera::{CameraAcquirer, CameraProvider, CameraSession, SessionStatus};
use crate::pipeline::submit::SubmissionClient;
use crate::pipeline::transcode;
use crate::present::{self, ClipboardSink, PrintJob, PrintSink};
use crate::store::DurableStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const PROCESSING_FAILED_MESSAGE: &str = "Failed to process image. Please try again.";
pub const SUBMITTED_MESSAGE: &str = "Data Extracted Successfully!";
pub const SUBMISSION_FAILED_MESSAGE: &str = "Submission failed. Please try again.";
pub const COPIED_MESSAGE: &str = "Copied!";

/// Sets a flag for its lifetime; fails if the flag was already set.
struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, operation: &'static str) -> Result<Self, DocScanError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DocScanError::Busy { operation })?;
        Ok(Self { flag })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Point-in-time view of the flow, for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub step: CaptureStep,
    pub status: FlowStatus,
    pub front_image: Option<InlineImage>,
    pub back_image: Option<InlineImage>,
    pub results: Option<ExtractionResult>,
    pub processing: bool,
    pub submitting: bool,
}

/// Orchestrates capture, persistence and submission for one document.
pub struct CaptureFlow {
    config: CaptureConfig,
    machine: Mutex<CaptureStateMachine>,
    client: SubmissionClient,
    camera: Option<CameraAcquirer>,
    observer: SharedObserver,
    status: Mutex<FlowStatus>,
    processing: AtomicBool,
    submitting: AtomicBool,
}

impl CaptureFlow {
    /// Create a flow, resuming whatever `store` holds.
    pub fn new(config: CaptureConfig, store: Arc<dyn DurableStore>) -> Result<Self, DocScanError> {
        let machine = CaptureStateMachine::restore(store)?;
        let client = SubmissionClient::new(&config)?;
        info!(
            "Capture flow ready at step '{}' (endpoint {})",
            machine.step(),
            client.endpoint()
        );
        Ok(Self {
            config,
            machine: Mutex::new(machine),
            client,
            camera: None,
            observer: Arc::new(NoopObserver),
            status: Mutex::new(FlowStatus::Ready),
            processing: AtomicBool::new(false),
            submitting: AtomicBool::new(false),
        })
    }

    /// Enable live capture from `provider`, using the configured tiers and
    /// capture quality.
    pub fn with_camera(self, provider: Arc<dyn CameraProvider>) -> Self {
        let acquirer = CameraAcquirer::new(provider)
            .with_tiers(self.config.camera_tiers.clone())
            .with_capture_quality(self.config.capture_quality);
        self.with_acquirer(acquirer)
    }

    /// Enable live capture with a fully configured acquirer.
    pub fn with_acquirer(mut self, acquirer: CameraAcquirer) -> Self {
        self.camera = Some(acquirer);
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn status(&self) -> FlowStatus {
        *lock(&self.status)
    }

    pub fn step(&self) -> CaptureStep {
        lock(&self.machine).step()
    }

    pub fn results(&self) -> Option<ExtractionResult> {
        lock(&self.machine).results().cloned()
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let machine = lock(&self.machine);
        FlowSnapshot {
            step: machine.step(),
            status: self.status(),
            front_image: machine.front_image().cloned(),
            back_image: machine.back_image().cloned(),
            results: machine.results().cloned(),
            processing: self.processing.load(Ordering::Acquire),
            submitting: self.submitting.load(Ordering::Acquire),
        }
    }

    // ── Images ───────────────────────────────────────────────────────────

    /// Transcode a user-picked file into the open slot.
    pub async fn process_upload(&self, bytes: Vec<u8>) -> Result<CaptureSide, DocScanError> {
        self.accept(RawImage::upload(bytes)).await
    }

    /// Transcode `raw` into the open slot and advance the step.
    pub async fn accept(&self, raw: RawImage) -> Result<CaptureSide, DocScanError> {
        let _guard = InFlight::acquire(&self.processing, "image processing")?;
        self.open_slot()?;

        self.set_status(FlowStatus::ProcessingImage);
        let outcome = async {
            let transcoded = transcode::transcode(raw, &self.config).await?;
            self.transition(|m| m.record_image(transcoded.image))
        }
        .await;

        match outcome {
            Ok(side) => {
                info!("Captured {} side", side);
                self.set_status(FlowStatus::Ready);
                Ok(side)
            }
            Err(e) => {
                warn!("Image processing failed: {}", e);
                self.set_status(FlowStatus::Error);
                self.notify(PROCESSING_FAILED_MESSAGE);
                Err(e)
            }
        }
    }

    pub fn delete_image(&self, side: CaptureSide) -> Result<CaptureStep, DocScanError> {
        let step = self.transition(|m| m.delete_image(side))?;
        debug!("Deleted {} image", side);
        Ok(step)
    }

    /// Discard both images and any result; back to `front` and `Ready`.
    pub fn reset(&self) -> Result<(), DocScanError> {
        self.transition(|m| m.reset())?;
        self.set_status(FlowStatus::Ready);
        info!("Capture flow reset");
        Ok(())
    }

    // ── Camera ───────────────────────────────────────────────────────────

    /// Open the camera modal.
    ///
    /// The session is returned even when negotiation failed, so the host can
    /// show its error message next to the native-camera fallback.
    pub async fn open_camera(&self) -> Result<CameraSession, DocScanError> {
        let acquirer = self.acquirer()?;
        let session = acquirer.start_session();
        self.observer.on_camera_status(SessionStatus::Opening, None);

        match acquirer.negotiate(&session).await {
            Ok(_) => self.observer.on_camera_status(SessionStatus::Active, None),
            Err(DocScanError::SessionClosed) => debug!("Camera closed while opening"),
            Err(e) => {
                warn!("Camera unavailable: {}", e);
                let message = session.error_message();
                self.observer
                    .on_camera_status(SessionStatus::Error, message.as_deref());
            }
        }
        Ok(session)
    }

    /// Take the picture and process it. The session is closed afterwards,
    /// including when the capture is refused.
    pub async fn capture(&self, session: &CameraSession) -> Result<CaptureSide, DocScanError> {
        // Checked before grabbing so a frame is never taken only to be dropped.
        let ready = self.acquirer().and_then(|acquirer| {
            if self.processing.load(Ordering::Acquire) {
                return Err(DocScanError::Busy {
                    operation: "image processing",
                });
            }
            self.open_slot()?;
            Ok(acquirer)
        });
        let acquirer = match ready {
            Ok(acquirer) => acquirer,
            Err(e) => {
                debug!("Capture refused, closing camera session {}: {}", session.id(), e);
                session.close();
                return Err(e);
            }
        };
        let raw = acquirer.capture(session).await?;
        self.accept(raw).await
    }

    /// Close the session and use the host's own camera instead.
    ///
    /// `Ok(None)` when the user dismissed the native camera.
    pub async fn use_native_camera(
        &self,
        session: &CameraSession,
    ) -> Result<Option<CaptureSide>, DocScanError> {
        let acquirer = self.acquirer()?;
        match acquirer.fallback_to_native(session).await? {
            Some(raw) => self.accept(raw).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn close_camera(&self, session: &CameraSession) {
        session.close();
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Submit both images. On success the flow enters `results` and the
    /// durable record is cleared; on failure nothing changes but the status.
    pub async fn submit(&self) -> Result<ExtractionResult, DocScanError> {
        let _guard = InFlight::acquire(&self.submitting, "submission")?;
        let (front, back) = {
            let machine = lock(&self.machine);
            if machine.step() == CaptureStep::Results {
                return Err(DocScanError::AlreadySubmitted);
            }
            match machine.image_pair() {
                Some((front, back)) => (front.clone(), back.clone()),
                None => {
                    return Err(DocScanError::MissingImage {
                        side: machine.missing_side().unwrap_or(CaptureSide::Front),
                    })
                }
            }
        };

        self.set_status(FlowStatus::Submitting);
        let outcome = match self.client.submit(&front, &back).await {
            Ok(result) => self
                .transition(|m| m.complete_submission(result.clone()))
                .map(|_| result),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                info!("Extraction succeeded with {} fields", result.len());
                self.set_status(FlowStatus::Success);
                self.notify(SUBMITTED_MESSAGE);
                Ok(result)
            }
            Err(e) => {
                warn!("Submission failed: {}", e);
                self.set_status(FlowStatus::Error);
                self.notify(SUBMISSION_FAILED_MESSAGE);
                Err(e)
            }
        }
    }

    // ── Result actions ───────────────────────────────────────────────────

    /// Copy one field's display value. `Ok(false)` when there is no such field.
    pub fn copy_field(&self, key: &str, sink: &dyn ClipboardSink) -> Result<bool, DocScanError> {
        let text = {
            let machine = lock(&self.machine);
            match machine.results().and_then(|r| r.get(key)) {
                Some(value) => present::display_value(value).into_owned(),
                None => return Ok(false),
            }
        };
        self.copy_text(&text, sink)?;
        Ok(true)
    }

    /// Copy every field as `label: value` lines. `Ok(false)` without a result.
    pub fn copy_all(&self, sink: &dyn ClipboardSink) -> Result<bool, DocScanError> {
        let text = match lock(&self.machine).results() {
            Some(result) => present::copy_all_text(result),
            None => return Ok(false),
        };
        self.copy_text(&text, sink)?;
        Ok(true)
    }

    /// Hand whatever is captured (and the result, if any) to the print sink.
    pub fn print(&self, sink: &dyn PrintSink) -> Result<(), DocScanError> {
        let job = {
            let machine = lock(&self.machine);
            PrintJob {
                front: machine.front_image().cloned(),
                back: machine.back_image().cloned(),
                result: machine.results().cloned(),
            }
        };
        sink.print(&job)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn acquirer(&self) -> Result<&CameraAcquirer, DocScanError> {
        self.camera.as_ref().ok_or(DocScanError::NoCamera)
    }

    fn open_slot(&self) -> Result<CaptureSide, DocScanError> {
        let step = self.step();
        step.open_slot().ok_or(DocScanError::NoOpenSlot { step })
    }

    /// Run a machine transition and report a step change once unlocked.
    fn transition<T>(
        &self,
        f: impl FnOnce(&mut CaptureStateMachine) -> Result<T, DocScanError>,
    ) -> Result<T, DocScanError> {
        let (from, to, out) = {
            let mut machine = lock(&self.machine);
            let from = machine.step();
            let out = f(&mut machine)?;
            (from, machine.step(), out)
        };
        if from != to {
            self.observer.on_step_changed(from, to);
        }
        Ok(out)
    }

    fn copy_text(&self, text: &str, sink: &dyn ClipboardSink) -> Result<(), DocScanError> {
        sink.write_text(text)?;
        self.notify(COPIED_MESSAGE);
        Ok(())
    }

    fn set_status(&self, status: FlowStatus) {
        *lock(&self.status) = status;
        self.observer.on_status(status);
    }

    fn notify(&self, message: &str) {
        let notification = Notification::new(message).with_ttl(self.config.notification_ttl);
        self.observer.on_notification(&notification);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for CaptureFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureFlow")
            .field("step", &self.step())
            .field("status", &self.status())
            .field("camera", &self.camera)
            .field("endpoint", &self.client.endpoint())
            .finish()
    }
}
