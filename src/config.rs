//! Configuration types for the capture-and-submit flow.
//!
//! All tunable behaviour is controlled through [`CaptureConfig`], built via
//! its [`CaptureConfigBuilder`]. The extraction endpoint is the only value
//! without a default: the service is external and deployment-specific.

use crate::error::DocScanError;
use crate::pipeline::camera::CaptureTier;
use std::fmt;
use std::time::Duration;

/// Longest edge, in pixels, of every transcoded image.
pub const DEFAULT_MAX_DIMENSION: u32 = 1200;

/// JPEG quality for user-supplied files.
pub const DEFAULT_UPLOAD_QUALITY: u8 = 70;

/// JPEG quality for live camera captures. Higher than uploads because the
/// source is already camera resolution rather than an arbitrary file.
pub const DEFAULT_CAPTURE_QUALITY: u8 = 85;

/// How long a notification stays visible before it dismisses itself.
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(3);

/// Configuration for a capture flow.
///
/// # Example
/// ```rust
/// use edgequake_docscan::CaptureConfig;
///
/// let config = CaptureConfig::builder()
///     .endpoint("https://extract.example.com/passport")
///     .upload_quality(75)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_dimension, 1200);
/// ```
#[derive(Clone)]
pub struct CaptureConfig {
    /// Extraction endpoint receiving the `{front_image, back_image}` POST.
    pub endpoint: String,

    /// Maximum width or height of a transcoded image. Default: 1200.
    ///
    /// Both sides travel inline in a single JSON body and sit in durable
    /// storage between reloads, so the cap bounds request size and storage
    /// footprint at the same time.
    pub max_dimension: u32,

    /// JPEG quality (1–100) for uploaded files. Default: 70.
    pub upload_quality: u8,

    /// JPEG quality (1–100) for live captures. Default: 85.
    pub capture_quality: u8,

    /// Optional timeout for the submission request. Default: none.
    ///
    /// Without it the request relies on the transport's own eventual
    /// success or failure.
    pub request_timeout: Option<Duration>,

    /// Ordered camera acquisition tiers. Default: [`CaptureTier::ALL`].
    pub camera_tiers: Vec<CaptureTier>,

    /// Lifetime of transient notifications. Default: 3 s.
    pub notification_ttl: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            upload_quality: DEFAULT_UPLOAD_QUALITY,
            capture_quality: DEFAULT_CAPTURE_QUALITY,
            request_timeout: None,
            camera_tiers: CaptureTier::ALL.to_vec(),
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("endpoint", &self.endpoint)
            .field("max_dimension", &self.max_dimension)
            .field("upload_quality", &self.upload_quality)
            .field("capture_quality", &self.capture_quality)
            .field("request_timeout", &self.request_timeout)
            .field("camera_tiers", &self.camera_tiers)
            .field("notification_ttl", &self.notification_ttl)
            .finish()
    }
}

impl CaptureConfig {
    /// Create a new builder for `CaptureConfig`.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Debug)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn upload_quality(mut self, q: u8) -> Self {
        self.config.upload_quality = q;
        self
    }

    pub fn capture_quality(mut self, q: u8) -> Self {
        self.config.capture_quality = q;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn camera_tiers(mut self, tiers: Vec<CaptureTier>) -> Self {
        self.config.camera_tiers = tiers;
        self
    }

    pub fn notification_ttl(mut self, ttl: Duration) -> Self {
        self.config.notification_ttl = ttl;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptureConfig, DocScanError> {
        let c = &self.config;
        if c.endpoint.trim().is_empty() {
            return Err(DocScanError::InvalidConfig(
                "An extraction endpoint URL is required".into(),
            ));
        }
        match reqwest::Url::parse(&c.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(DocScanError::InvalidConfig(format!(
                    "Endpoint must be http or https, got '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(DocScanError::InvalidConfig(format!(
                    "Endpoint '{}' is not a valid URL: {}",
                    c.endpoint, e
                )))
            }
        }
        if c.max_dimension == 0 {
            return Err(DocScanError::InvalidConfig(
                "max_dimension must be ≥ 1".into(),
            ));
        }
        for (name, q) in [
            ("upload_quality", c.upload_quality),
            ("capture_quality", c.capture_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(DocScanError::InvalidConfig(format!(
                    "{name} must be 1–100, got {q}"
                )));
            }
        }
        if c.camera_tiers.is_empty() {
            return Err(DocScanError::InvalidConfig(
                "At least one camera tier is required".into(),
            ));
        }
        Ok(self.config)
    }
}
