//! Live camera acquisition: tiered negotiation, session lifecycle, capture.
//!
//! ## Why tiers?
//!
//! Devices and hosts disagree on which constraints they honour. Asking for a
//! rear camera at 1280×720 is ideal for documents, but some hosts reject any
//! resolution hint and others have no rear camera at all. The acquirer walks
//! from "best" to "any camera", swallowing each refusal, so callers never
//! need to enumerate devices:
//!
//! | Tier | Facing | Resolution |
//! |------|--------|------------|
//! | [`CaptureTier::PreferredRear`] | rear, soft | 1280×720 ideal |
//! | [`CaptureTier::RequiredRear`]  | rear, hard | — |
//! | [`CaptureTier::AnyCamera`]     | any | — |
//!
//! ## Sessions and cancellation
//!
//! A [`CameraSession`] is a cheap cloneable handle. Closing any clone closes
//! the session: the stream is stopped and a negotiation still in flight is
//! abandoned. A stream that arrives after the close is stopped on arrival and
//! never attached.

use crate::error::{AcquireError, DocScanError, CAMERA_UNAVAILABLE_MESSAGE, INSECURE_CONTEXT_MESSAGE};
use crate::output::RawImage;
use crate::pipeline::transcode;
use futures::future::BoxFuture;
use image::{DynamicImage, RgbaImage};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ── Constraints ──────────────────────────────────────────────────────────

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// A soft (`ideal`) or hard (`exact`) constraint value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintValue<T> {
    Ideal(T),
    Exact(T),
}

/// Constraints on the video track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<ConstraintValue<FacingMode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<ConstraintValue<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<ConstraintValue<u32>>,
}

/// Video request: any camera, or a constrained one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VideoRequest {
    Any(bool),
    Constrained(VideoConstraints),
}

/// A full media request, serialisable to the host's constraint JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaConstraints {
    pub video: VideoRequest,
    pub audio: bool,
}

/// One ordered attempt in the acquisition fallback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTier {
    /// Rear camera preferred, 1280×720 preferred.
    PreferredRear,
    /// Rear camera required, no resolution hint.
    RequiredRear,
    /// Any camera.
    AnyCamera,
}

impl CaptureTier {
    /// All tiers, in the order they are tried.
    pub const ALL: [CaptureTier; 3] = [
        CaptureTier::PreferredRear,
        CaptureTier::RequiredRear,
        CaptureTier::AnyCamera,
    ];

    pub fn constraints(self) -> MediaConstraints {
        let video = match self {
            CaptureTier::PreferredRear => VideoRequest::Constrained(VideoConstraints {
                facing_mode: Some(ConstraintValue::Ideal(FacingMode::Environment)),
                width: Some(ConstraintValue::Ideal(1280)),
                height: Some(ConstraintValue::Ideal(720)),
            }),
            CaptureTier::RequiredRear => VideoRequest::Constrained(VideoConstraints {
                facing_mode: Some(ConstraintValue::Exact(FacingMode::Environment)),
                ..Default::default()
            }),
            CaptureTier::AnyCamera => VideoRequest::Any(true),
        };
        MediaConstraints {
            video,
            audio: false,
        }
    }
}

// ── Host capabilities ────────────────────────────────────────────────────

/// A live media stream owned by exactly one session.
pub trait MediaStream: Send {
    /// Grab the current video frame at its native resolution.
    fn grab_frame(&mut self) -> Result<RgbaImage, AcquireError>;

    /// Stop every track. Called at most once per stream.
    fn stop(&mut self);
}

/// Host camera capability.
pub trait CameraProvider: Send + Sync {
    /// Camera access is only granted in a secure (e.g. HTTPS) context.
    fn is_secure_context(&self) -> bool {
        true
    }

    /// Request a stream satisfying `constraints`.
    fn acquire<'a>(
        &'a self,
        constraints: &'a MediaConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn MediaStream>, AcquireError>>;
}

/// The host's own camera affordance (e.g. a file input with `capture`).
///
/// Returns `Ok(None)` when the user dismissed it without taking a photo.
pub trait NativeCapture: Send + Sync {
    fn capture(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, DocScanError>>;
}

// ── Session ──────────────────────────────────────────────────────────────

/// Observable state of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Opening,
    Active,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Opening => "opening",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
        })
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionState {
    status: SessionStatus,
    error_message: Option<String>,
    tier: Option<CaptureTier>,
    stream: Option<Box<dyn MediaStream>>,
}

struct SessionInner {
    id: u64,
    state: Mutex<SessionState>,
    closed: watch::Sender<bool>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut stream) = state.stream.take() {
            debug!("Camera session {}: dropped while streaming, stopping", self.id);
            stream.stop();
        }
    }
}

/// Handle to one camera session.
#[derive(Clone)]
pub struct CameraSession {
    inner: Arc<SessionInner>,
}

impl CameraSession {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(SessionState {
                    status: SessionStatus::Opening,
                    error_message: None,
                    tier: None,
                    stream: None,
                }),
                closed,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    /// User-facing message when `status() == Error`.
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error_message.clone()
    }

    /// The tier that produced the active stream.
    pub fn tier(&self) -> Option<CaptureTier> {
        self.inner.lock().tier
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Whether a stream is currently held.
    pub fn has_stream(&self) -> bool {
        self.inner.lock().stream.is_some()
    }

    /// Stop every track and release the stream. Idempotent.
    pub fn close(&self) {
        let already = self.inner.closed.send_replace(true);
        if already {
            return;
        }
        let stream = self.inner.lock().stream.take();
        if let Some(mut stream) = stream {
            stream.stop();
        }
        debug!("Camera session {}: closed", self.inner.id);
    }

    /// Resolves once the session is closed.
    async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // The sender lives inside `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Attach a freshly acquired stream. A stream arriving after close is
    /// stopped and rejected.
    fn attach(&self, mut stream: Box<dyn MediaStream>, tier: CaptureTier) -> Result<(), DocScanError> {
        let mut state = self.inner.lock();
        if self.is_closed() {
            drop(state);
            stream.stop();
            return Err(DocScanError::SessionClosed);
        }
        state.stream = Some(stream);
        state.tier = Some(tier);
        state.status = SessionStatus::Active;
        state.error_message = None;
        Ok(())
    }

    fn fail(&self, message: &str) {
        let mut state = self.inner.lock();
        state.status = SessionStatus::Error;
        state.error_message = Some(message.to_string());
    }

    fn grab_frame(&self) -> Result<RgbaImage, DocScanError> {
        let mut state = self.inner.lock();
        if self.is_closed() {
            return Err(DocScanError::SessionClosed);
        }
        let status = state.status;
        match state.stream.as_mut() {
            Some(stream) if status == SessionStatus::Active => {
                stream.grab_frame().map_err(|e| DocScanError::CameraUnavailable {
                    detail: e.to_string(),
                })
            }
            _ => Err(DocScanError::SessionNotActive {
                status: status.to_string(),
            }),
        }
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CameraSession")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("tier", &state.tier)
            .field("streaming", &state.stream.is_some())
            .field("closed", &*self.inner.closed.borrow())
            .finish()
    }
}

// ── Acquirer ─────────────────────────────────────────────────────────────

/// Negotiates camera sessions against a [`CameraProvider`].
#[derive(Clone)]
pub struct CameraAcquirer {
    provider: Arc<dyn CameraProvider>,
    native: Option<Arc<dyn NativeCapture>>,
    tiers: Vec<CaptureTier>,
    capture_quality: u8,
}

impl CameraAcquirer {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            native: None,
            tiers: CaptureTier::ALL.to_vec(),
            capture_quality: crate::config::DEFAULT_CAPTURE_QUALITY,
        }
    }

    pub fn with_native_capture(mut self, native: Arc<dyn NativeCapture>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<CaptureTier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_capture_quality(mut self, quality: u8) -> Self {
        self.capture_quality = quality;
        self
    }

    pub fn has_native_capture(&self) -> bool {
        self.native.is_some()
    }

    /// Create a session in the `opening` state without negotiating yet.
    pub fn start_session(&self) -> CameraSession {
        CameraSession::new()
    }

    /// Open a session: start it and negotiate. The session is closed on error.
    pub async fn open(&self) -> Result<CameraSession, DocScanError> {
        let session = self.start_session();
        match self.negotiate(&session).await {
            Ok(_) => Ok(session),
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    /// Walk the tiers until one yields a stream.
    ///
    /// On failure the session is left in `error` with a user-facing message so
    /// the host can offer the native fallback; it is not closed.
    pub async fn negotiate(&self, session: &CameraSession) -> Result<CaptureTier, DocScanError> {
        if !self.provider.is_secure_context() {
            warn!("Camera session {}: insecure context, not acquiring", session.id());
            session.fail(INSECURE_CONTEXT_MESSAGE);
            return Err(DocScanError::InsecureContext);
        }

        let mut last_error: Option<AcquireError> = None;

        for &tier in &self.tiers {
            if session.is_closed() {
                return Err(DocScanError::SessionClosed);
            }
            let constraints = tier.constraints();
            debug!("Camera session {}: trying {:?}", session.id(), tier);

            let outcome = tokio::select! {
                biased;
                _ = session.closed() => {
                    debug!("Camera session {}: closed during {:?}", session.id(), tier);
                    return Err(DocScanError::SessionClosed);
                }
                res = self.provider.acquire(&constraints) => res,
            };

            match outcome {
                Ok(stream) => {
                    session.attach(stream, tier)?;
                    info!("Camera session {}: active via {:?}", session.id(), tier);
                    return Ok(tier);
                }
                Err(e) => {
                    debug!("Camera session {}: {:?} refused: {}", session.id(), tier, e);
                    last_error = Some(e);
                }
            }
        }

        if session.is_closed() {
            return Err(DocScanError::SessionClosed);
        }
        warn!("Camera session {}: all tiers exhausted", session.id());
        session.fail(CAMERA_UNAVAILABLE_MESSAGE);
        Err(DocScanError::CameraUnavailable {
            detail: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no tiers configured".to_string()),
        })
    }

    /// Grab one frame and encode it. The session is closed afterwards,
    /// whether or not the capture succeeded.
    ///
    /// Only the grab happens under the session lock. The stream is stopped
    /// before the JPEG encode, which runs on the blocking pool.
    pub async fn capture(&self, session: &CameraSession) -> Result<RawImage, DocScanError> {
        let grabbed = session.grab_frame();
        session.close();
        let frame = grabbed?;

        let quality = self.capture_quality;
        let bytes = tokio::task::spawn_blocking(move || transcode::encode_frame(&frame, quality))
            .await
            .map_err(|e| DocScanError::Internal(format!("Frame encode task panicked: {}", e)))??;
        debug!("Camera session {}: captured {} bytes", session.id(), bytes.len());
        Ok(RawImage::capture(bytes))
    }

    /// Stop the session's stream. Idempotent.
    pub fn close(&self, session: &CameraSession) {
        session.close();
    }

    /// Close the session and hand over to the host's native camera.
    ///
    /// The photo is treated as an upload, since it arrives as an arbitrary
    /// file from the host.
    pub async fn fallback_to_native(
        &self,
        session: &CameraSession,
    ) -> Result<Option<RawImage>, DocScanError> {
        session.close();
        let native = self
            .native
            .as_ref()
            .ok_or(DocScanError::NativeCaptureUnavailable)?;
        Ok(native.capture().await?.map(RawImage::upload))
    }
}

impl fmt::Debug for CameraAcquirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraAcquirer")
            .field("tiers", &self.tiers)
            .field("native", &self.native.is_some())
            .field("capture_quality", &self.capture_quality)
            .finish()
    }
}

// ── Still camera ─────────────────────────────────────────────────────────

/// A camera that always shows the same picture.
///
/// Lets hosts without a video device (the CLI, tests) drive the full
/// live-capture path from an image file.
pub struct StillCamera {
    frame: RgbaImage,
}

impl StillCamera {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            frame: image.into_rgba8(),
        }
    }

    /// Decode an image file to use as the camera picture.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocScanError> {
        let image = image::load_from_memory(bytes).map_err(|e| DocScanError::Decode {
            detail: e.to_string(),
        })?;
        Ok(Self::new(image))
    }
}

struct StillStream {
    frame: RgbaImage,
    live: bool,
}

impl MediaStream for StillStream {
    fn grab_frame(&mut self) -> Result<RgbaImage, AcquireError> {
        if !self.live {
            return Err(AcquireError::Other("stream stopped".into()));
        }
        Ok(self.frame.clone())
    }

    fn stop(&mut self) {
        self.live = false;
    }
}

impl CameraProvider for StillCamera {
    fn acquire<'a>(
        &'a self,
        _constraints: &'a MediaConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn MediaStream>, AcquireError>> {
        let stream: Box<dyn MediaStream> = Box::new(StillStream {
            frame: self.frame.clone(),
            live: true,
        });
        Box::pin(async move { Ok(stream) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready};

    /// Counts stops across every stream it hands out.
    #[derive(Clone, Default)]
    struct Tracker {
        created: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    struct TrackedStream {
        tracker: Tracker,
        frame: RgbaImage,
        stopped: bool,
    }

    impl MediaStream for TrackedStream {
        fn grab_frame(&mut self) -> Result<RgbaImage, AcquireError> {
            Ok(self.frame.clone())
        }

        fn stop(&mut self) {
            assert!(!self.stopped, "stream stopped twice");
            self.stopped = true;
            self.tracker.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Tracker {
        fn stream(&self, width: u32, height: u32) -> Box<dyn MediaStream> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(TrackedStream {
                tracker: self.clone(),
                frame: RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255])),
                stopped: false,
            })
        }
    }

    /// Succeeds only on the listed tiers; records every request.
    struct ScriptedCamera {
        secure: bool,
        succeed_on: Vec<CaptureTier>,
        requests: Mutex<Vec<MediaConstraints>>,
        tracker: Tracker,
        frame_size: (u32, u32),
    }

    impl ScriptedCamera {
        fn new(succeed_on: Vec<CaptureTier>) -> Self {
            Self {
                secure: true,
                succeed_on,
                requests: Mutex::new(Vec::new()),
                tracker: Tracker::default(),
                frame_size: (1280, 720),
            }
        }

        fn requests(&self) -> Vec<MediaConstraints> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CameraProvider for ScriptedCamera {
        fn is_secure_context(&self) -> bool {
            self.secure
        }

        fn acquire<'a>(
            &'a self,
            constraints: &'a MediaConstraints,
        ) -> BoxFuture<'a, Result<Box<dyn MediaStream>, AcquireError>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(constraints.clone());
                let ok = self
                    .succeed_on
                    .iter()
                    .any(|t| &t.constraints() == constraints);
                if ok {
                    let (w, h) = self.frame_size;
                    Ok(self.tracker.stream(w, h))
                } else {
                    Err(AcquireError::Overconstrained("facingMode".into()))
                }
            })
        }
    }

    /// Blocks every acquisition until the gate is opened, then succeeds.
    struct GatedCamera {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        tracker: Tracker,
    }

    impl CameraProvider for GatedCamera {
        fn acquire<'a>(
            &'a self,
            _constraints: &'a MediaConstraints,
        ) -> BoxFuture<'a, Result<Box<dyn MediaStream>, AcquireError>> {
            let gate = self.gate.lock().unwrap().take();
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok(self.tracker.stream(640, 480))
            })
        }
    }

    struct FakeNative {
        called: AtomicBool,
        bytes: Option<Vec<u8>>,
    }

    impl NativeCapture for FakeNative {
        fn capture(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, DocScanError>> {
            self.called.store(true, Ordering::SeqCst);
            let bytes = self.bytes.clone();
            Box::pin(async move { Ok(bytes) })
        }
    }

    #[test]
    fn tier_constraints_serialize_to_media_request_shape() {
        let t1 = serde_json::to_value(CaptureTier::PreferredRear.constraints()).unwrap();
        assert_eq!(
            t1,
            serde_json::json!({
                "video": {
                    "facingMode": {"ideal": "environment"},
                    "width": {"ideal": 1280},
                    "height": {"ideal": 720}
                },
                "audio": false
            })
        );
        let t2 = serde_json::to_value(CaptureTier::RequiredRear.constraints()).unwrap();
        assert_eq!(
            t2,
            serde_json::json!({"video": {"facingMode": {"exact": "environment"}}, "audio": false})
        );
        let t3 = serde_json::to_value(CaptureTier::AnyCamera.constraints()).unwrap();
        assert_eq!(t3, serde_json::json!({"video": true, "audio": false}));
    }

    #[tokio::test]
    async fn first_tier_success_stops_negotiation() {
        let camera = Arc::new(ScriptedCamera::new(CaptureTier::ALL.to_vec()));
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.open().await.expect("open");
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.tier(), Some(CaptureTier::PreferredRear));
        assert_eq!(camera.requests().len(), 1);
    }

    #[tokio::test]
    async fn falls_through_to_any_camera() {
        let camera = Arc::new(ScriptedCamera::new(vec![CaptureTier::AnyCamera]));
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.open().await.expect("open");

        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.tier(), Some(CaptureTier::AnyCamera));
        let requests = camera.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2], CaptureTier::AnyCamera.constraints());
        // Only the tier-3 stream was ever opened, and it is still live.
        assert_eq!(camera.tracker.created.load(Ordering::SeqCst), 1);
        assert_eq!(camera.tracker.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_leaves_session_in_error() {
        let camera = Arc::new(ScriptedCamera::new(vec![]));
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.start_session();
        let err = acquirer.negotiate(&session).await.unwrap_err();

        assert!(matches!(err, DocScanError::CameraUnavailable { .. }));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(
            session.error_message().as_deref(),
            Some(CAMERA_UNAVAILABLE_MESSAGE)
        );
        assert!(!session.is_closed());
        assert_eq!(camera.requests().len(), 3);
    }

    #[tokio::test]
    async fn insecure_context_fails_without_acquiring() {
        let mut camera = ScriptedCamera::new(CaptureTier::ALL.to_vec());
        camera.secure = false;
        let camera = Arc::new(camera);
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.start_session();
        let err = acquirer.negotiate(&session).await.unwrap_err();

        assert!(matches!(err, DocScanError::InsecureContext));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.error_message().unwrap().contains("HTTPS"));
        assert!(camera.requests().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let camera = Arc::new(ScriptedCamera::new(CaptureTier::ALL.to_vec()));
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.open().await.expect("open");

        acquirer.close(&session);
        let after_first = (session.status(), session.is_closed(), session.has_stream());
        acquirer.close(&session);
        let after_second = (session.status(), session.is_closed(), session.has_stream());

        assert_eq!(after_first, after_second);
        assert!(session.is_closed());
        assert!(!session.has_stream());
        assert_eq!(camera.tracker.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capture_encodes_frame_and_ends_session() {
        let camera = Arc::new(ScriptedCamera::new(CaptureTier::ALL.to_vec()));
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.open().await.expect("open");

        let raw = acquirer.capture(&session).await.expect("capture");
        assert_eq!(raw.origin, crate::output::ImageOrigin::Capture);
        let decoded = image::load_from_memory(&raw.bytes).expect("jpeg");
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
        assert!(session.is_closed());
        assert_eq!(camera.tracker.stopped.load(Ordering::SeqCst), 1);

        // No second shot from the same session.
        assert!(matches!(
            acquirer.capture(&session).await,
            Err(DocScanError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn capture_of_empty_frame_still_closes_session() {
        let mut camera = ScriptedCamera::new(CaptureTier::ALL.to_vec());
        camera.frame_size = (0, 0);
        let camera = Arc::new(camera);
        let acquirer = CameraAcquirer::new(camera.clone());
        let session = acquirer.open().await.expect("open");

        let err = acquirer.capture(&session).await.unwrap_err();
        assert!(matches!(err, DocScanError::EmptyFrame { .. }));
        assert!(session.is_closed());
        assert_eq!(camera.tracker.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_during_opening_abandons_attempt() {
        let (tx, rx) = oneshot::channel();
        let tracker = Tracker::default();
        let camera = Arc::new(GatedCamera {
            gate: Mutex::new(Some(rx)),
            tracker: tracker.clone(),
        });
        let acquirer = CameraAcquirer::new(camera);
        let session = acquirer.start_session();

        let mut negotiation = tokio_test::task::spawn(acquirer.negotiate(&session));
        assert_pending!(negotiation.poll());
        assert_eq!(session.status(), SessionStatus::Opening);

        session.close();
        let _ = tx.send(());
        let outcome = assert_ready!(negotiation.poll());

        assert!(matches!(outcome, Err(DocScanError::SessionClosed)));
        assert_ne!(session.status(), SessionStatus::Active);
        assert!(!session.has_stream());
        // Any stream that did get created has been stopped.
        assert_eq!(
            tracker.created.load(Ordering::SeqCst),
            tracker.stopped.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn stream_arriving_after_close_is_stopped() {
        let tracker = Tracker::default();
        let session = CameraSession::new();
        session.close();

        let err = session
            .attach(tracker.stream(10, 10), CaptureTier::AnyCamera)
            .unwrap_err();
        assert!(matches!(err, DocScanError::SessionClosed));
        assert_eq!(tracker.stopped.load(Ordering::SeqCst), 1);
        assert!(!session.has_stream());
    }

    #[test]
    fn dropping_last_handle_stops_stream() {
        let tracker = Tracker::default();
        let session = CameraSession::new();
        session
            .attach(tracker.stream(10, 10), CaptureTier::AnyCamera)
            .expect("attach");
        drop(session);
        assert_eq!(tracker.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn native_fallback_closes_session_and_returns_upload() {
        let native = Arc::new(FakeNative {
            called: AtomicBool::new(false),
            bytes: Some(vec![1, 2, 3]),
        });
        let acquirer = CameraAcquirer::new(Arc::new(ScriptedCamera::new(vec![])))
            .with_native_capture(native.clone());
        let session = acquirer.start_session();
        let _ = acquirer.negotiate(&session).await;

        let raw = acquirer
            .fallback_to_native(&session)
            .await
            .expect("fallback")
            .expect("photo taken");
        assert_eq!(raw.origin, crate::output::ImageOrigin::Upload);
        assert_eq!(raw.bytes, vec![1, 2, 3]);
        assert!(session.is_closed());
        assert!(native.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn native_fallback_without_hook_errors() {
        let acquirer = CameraAcquirer::new(Arc::new(ScriptedCamera::new(vec![])));
        let session = acquirer.start_session();
        let err = acquirer.fallback_to_native(&session).await.unwrap_err();
        assert!(matches!(err, DocScanError::NativeCaptureUnavailable));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn still_camera_serves_its_picture() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(320, 240, Rgba([9, 9, 9, 255])));
        let acquirer = CameraAcquirer::new(Arc::new(StillCamera::new(img)));
        let session = acquirer.open().await.expect("open");
        let raw = acquirer.capture(&session).await.expect("capture");
        let decoded = image::load_from_memory(&raw.bytes).expect("jpeg");
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }
}
