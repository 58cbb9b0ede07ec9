//! Display formatting for values reported in a [`ValueChange`](super::ValueChange).
//!
//! Formatting is presentation only; equality checks always work on the
//! canonical JSON text of the values.

use serde_json::Value;

/// Default maximum length (in characters) of a reported string value.
pub const DEFAULT_MAX_VALUE_LENGTH: usize = 100;

/// Replaces sensitive values that are present on either side of a change.
pub const MASK_TOKEN: &str = "********";

/// Reported for the present side when one side of a comparison is absent.
pub const CONFIGURED_MARKER: &str = "(configured)";

/// Reported on both sides when a sub-tree could not be compared.
pub const MODIFIED_MARKER: &str = "(modified)";

/// Format a JSON value for display. Null renders as `None`.
pub fn format_value(value: &Value, max_length: usize) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(truncate_value(s, max_length)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(format_array_len(items.len())),
        Value::Object(_) => Some("(object)".to_string()),
    }
}

/// Truncate a string to `max_length` characters, annotating the original length.
pub fn truncate_value(value: &str, max_length: usize) -> String {
    let length = value.chars().count();
    if length <= max_length {
        return value.to_string();
    }

    let prefix: String = value.chars().take(max_length).collect();
    format!("{}... ({} chars)", prefix, length)
}

pub(crate) fn format_array_len(len: usize) -> String {
    format!("[{} items]", len)
}
