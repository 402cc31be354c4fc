//! Presentation helpers for the extraction result.
//!
//! The service decides which fields come back; nothing here assumes a field
//! set. Keys are shown with underscores turned into spaces, values are shown
//! verbatim when they are strings and as JSON text otherwise.

use crate::error::DocScanError;
use crate::output::{ExtractionResult, InlineImage};
use serde_json::Value;
use std::borrow::Cow;

/// Human label for a result key: `passport_no` → `passport no`.
pub fn field_label(key: &str) -> String {
    key.replace('_', " ")
}

/// Display text for a result value.
pub fn display_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// One `label: value` line per field, in result order.
pub fn copy_all_text(result: &ExtractionResult) -> String {
    result
        .iter()
        .map(|(k, v)| format!("{}: {}\n", field_label(k), display_value(v)))
        .collect()
}

/// Rows for a result grid, in result order.
pub fn rows(result: &ExtractionResult) -> Vec<(String, String)> {
    result
        .iter()
        .map(|(k, v)| (field_label(k), display_value(v).into_owned()))
        .collect()
}

/// Destination for copied text.
pub trait ClipboardSink: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), DocScanError>;
}

/// What gets printed: whichever images are present, plus the result if any.
#[derive(Debug, Clone, Default)]
pub struct PrintJob {
    pub front: Option<InlineImage>,
    pub back: Option<InlineImage>,
    pub result: Option<ExtractionResult>,
}

impl PrintJob {
    /// Images in print order (front first).
    pub fn images(&self) -> impl Iterator<Item = (&'static str, &InlineImage)> {
        [("front", self.front.as_ref()), ("back", self.back.as_ref())]
            .into_iter()
            .filter_map(|(name, img)| img.map(|i| (name, i)))
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_none() && self.back.is_none() && self.result.is_none()
    }
}

/// Host print facility.
pub trait PrintSink: Send + Sync {
    fn print(&self, job: &PrintJob) -> Result<(), DocScanError>;
}
