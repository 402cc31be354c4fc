//! Submission: POST both images to the extraction endpoint.
//!
//! ## Response normalisation
//!
//! Workflow-style backends often wrap a single record in an array
//! (`[{"full_name": …}]`). An array is unwrapped to its first element, an
//! empty array becomes an empty result, and an object is used as-is. Field
//! order is preserved so the result reads the way the service laid it out.
//!
//! Submissions are never retried automatically: the user decides when to
//! resubmit, and the captured images stay in durable storage until then.

use crate::config::CaptureConfig;
use crate::error::DocScanError;
use crate::output::{ExtractionResult, InlineImage};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Request body sent to the extraction endpoint.
#[derive(Debug, Serialize)]
pub struct SubmissionRequest<'a> {
    pub front_image: &'a InlineImage,
    pub back_image: &'a InlineImage,
}

/// HTTP client for the extraction endpoint.
#[derive(Debug, Clone)]
pub struct SubmissionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SubmissionClient {
    pub fn new(config: &CaptureConfig) -> Result<Self, DocScanError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| DocScanError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send both images and return the normalised result map.
    pub async fn submit(
        &self,
        front: &InlineImage,
        back: &InlineImage,
    ) -> Result<ExtractionResult, DocScanError> {
        let start = Instant::now();
        info!(
            "Submitting to {} ({} + {} bytes)",
            self.endpoint,
            front.len(),
            back.len()
        );

        let body = SubmissionRequest {
            front_image: front,
            back_image: back,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.network_error(None, transport_reason(&e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Extraction endpoint answered {}", status);
            return Err(self.network_error(Some(status.as_u16()), format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.network_error(Some(status.as_u16()), transport_reason(&e)))?;

        let value: Value = serde_json::from_slice(&bytes).map_err(|e| DocScanError::Parse {
            detail: format!("response is not JSON: {}", e),
        })?;
        let result = normalize_response(value)?;

        debug!(
            "Extraction returned {} fields in {}ms",
            result.len(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn network_error(&self, status: Option<u16>, reason: String) -> DocScanError {
        DocScanError::Network {
            endpoint: self.endpoint.clone(),
            status,
            reason,
        }
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("endpoint unreachable: {}", e)
    } else {
        e.to_string()
    }
}

/// Unwrap an array response to its first element and require an object.
pub fn normalize_response(value: Value) -> Result<ExtractionResult, DocScanError> {
    let record = match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(ExtractionResult::new()),
        },
        other => other,
    };
    match record {
        Value::Object(map) => Ok(map),
        other => Err(DocScanError::Parse {
            detail: format!("expected a JSON object of fields, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
