//! Data types passed between pipeline stages.
//!
//! Images travel as [`InlineImage`] data URLs from the moment they leave the
//! transcoder: the same string is shown in previews, written to durable
//! storage and embedded in the submission body, so no stage ever needs a
//! file reference that could dangle after a reload.

use crate::error::DocScanError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field map returned by the extraction service, in the order received.
pub type ExtractionResult = serde_json::Map<String, serde_json::Value>;

/// A self-contained `data:<mime>;base64,<payload>` image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InlineImage(String);

impl InlineImage {
    /// Wrap already-encoded bytes of the given MIME type.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes)))
    }

    /// Validate and wrap a data URL (e.g. one read back from storage).
    pub fn parse(s: impl Into<String>) -> Result<Self, DocScanError> {
        let s = s.into();
        let (header, payload) = split_data_url(&s).ok_or_else(|| DocScanError::Decode {
            detail: "not a base64 data URL".into(),
        })?;
        if !header.starts_with("image/") {
            return Err(DocScanError::Decode {
                detail: format!("data URL is '{header}', not an image"),
            });
        }
        if payload.is_empty() {
            return Err(DocScanError::Decode {
                detail: "data URL has an empty payload".into(),
            });
        }
        Ok(Self(s))
    }

    /// MIME type from the data URL header, e.g. `image/jpeg`.
    pub fn mime_type(&self) -> &str {
        split_data_url(&self.0).map(|(m, _)| m).unwrap_or_default()
    }

    /// Decode the base64 payload back to the encoded image bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, DocScanError> {
        let (_, payload) = split_data_url(&self.0).ok_or_else(|| DocScanError::Decode {
            detail: "not a base64 data URL".into(),
        })?;
        STANDARD.decode(payload).map_err(|e| DocScanError::Decode {
            detail: format!("invalid base64 payload: {e}"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the data URL in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn split_data_url(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

impl TryFrom<String> for InlineImage {
    type Error = DocScanError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<InlineImage> for String {
    fn from(img: InlineImage) -> Self {
        img.0
    }
}

// Payloads run to hundreds of kilobytes; keep logs readable.
impl fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InlineImage({}, {} bytes)", self.mime_type(), self.0.len())
    }
}

/// Where a raw image came from. Selects the re-encode quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    /// A file picked by the user, or the host's native camera app.
    Upload,
    /// A frame grabbed from a live camera session.
    Capture,
}

/// Undecoded image bytes awaiting transcoding.
#[derive(Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub origin: ImageOrigin,
}

impl RawImage {
    pub fn upload(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            origin: ImageOrigin::Upload,
        }
    }

    pub fn capture(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            origin: ImageOrigin::Capture,
        }
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImage")
            .field("origin", &self.origin)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Output of the transcoder.
#[derive(Debug, Clone)]
pub struct TranscodedImage {
    pub image: InlineImage,
    pub source_width: u32,
    pub source_height: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_builds_data_url() {
        let img = InlineImage::from_bytes("image/jpeg", &[0xFF, 0xD8, 0xFF]);
        assert!(img.as_str().starts_with("data:image/jpeg;base64,"));
        assert_eq!(img.mime_type(), "image/jpeg");
        assert_eq!(img.decode_bytes().unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn parse_rejects_non_image_and_plain_strings() {
        assert!(InlineImage::parse("hello").is_err());
        assert!(InlineImage::parse("data:text/plain;base64,aGk=").is_err());
        assert!(InlineImage::parse("data:image/png;base64,").is_err());
        assert!(InlineImage::parse("data:image/png,raw").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let img = InlineImage::from_bytes("image/png", b"x");
        let json = serde_json::to_value(&img).unwrap();
        assert_eq!(json, serde_json::Value::String(img.as_str().to_string()));
        let bad: Result<InlineImage, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn debug_does_not_dump_payload() {
        let img = InlineImage::from_bytes("image/jpeg", &[7u8; 4096]);
        let dbg = format!("{img:?}");
        assert!(dbg.len() < 64, "got: {dbg}");
    }
}
