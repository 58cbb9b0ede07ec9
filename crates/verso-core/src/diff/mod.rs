//! Structural diff engine for free-form JSON data.
//!
//! Compares two JSON value trees and reports an ordered list of field-level
//! [`ValueChange`]s keyed by dotted paths. Adapters use it for the parts of an
//! entity that have no fixed schema (provider settings, resource data, ...).
//!
//! Arrays are compared as opaque blocks: a changed array produces a single
//! `"[N items]" -> "[M items]"` entry rather than per-element changes.

mod format;

pub use format::{
    format_value, truncate_value, CONFIGURED_MARKER, DEFAULT_MAX_VALUE_LENGTH, MASK_TOKEN,
    MODIFIED_MARKER,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::VersoResult;
use format::format_array_len;

/// A single atomic difference between two versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    /// Dot/bracket-notated locator, e.g. `Resources[Docs].Data.url`.
    pub path: String,
    /// Value before the change (`None` when absent).
    pub old_value: Option<String>,
    /// Value after the change (`None` when absent).
    pub new_value: Option<String>,
}

impl ValueChange {
    /// Create a new change entry.
    pub fn new(
        path: impl Into<String>,
        old_value: Option<impl Into<String>>,
        new_value: Option<impl Into<String>>,
    ) -> Self {
        Self {
            path: path.into(),
            old_value: old_value.map(Into::into),
            new_value: new_value.map(Into::into),
        }
    }

    /// Create a change where both sides are present.
    pub fn modified(
        path: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            old_value: Some(old_value.into()),
            new_value: Some(new_value.into()),
        }
    }
}

/// Predicate deciding whether the value at a path must be masked.
pub type SensitivePath<'a> = &'a dyn Fn(&str) -> bool;

/// Configurable JSON tree comparer.
#[derive(Debug, Clone, Copy)]
pub struct JsonDiff {
    max_value_length: usize,
}

impl Default for JsonDiff {
    fn default() -> Self {
        Self {
            max_value_length: DEFAULT_MAX_VALUE_LENGTH,
        }
    }
}

impl JsonDiff {
    /// Create a comparer with the default display limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display limit for reported string values.
    pub fn with_max_value_length(mut self, max_value_length: usize) -> Self {
        self.max_value_length = max_value_length.max(1);
        self
    }

    /// Maximum number of characters reported per string value.
    pub fn max_value_length(&self) -> usize {
        self.max_value_length
    }

    /// Compare two JSON values rooted at `base_path`.
    ///
    /// A missing value and an explicit JSON `null` are treated alike at the
    /// root. When exactly one side is present, a single presence change is
    /// reported at `base_path`.
    pub fn diff(
        &self,
        from: Option<&Value>,
        to: Option<&Value>,
        base_path: &str,
        is_sensitive: Option<SensitivePath<'_>>,
    ) -> Vec<ValueChange> {
        let from = from.filter(|v| !v.is_null());
        let to = to.filter(|v| !v.is_null());

        let mut changes = Vec::new();
        match (from, to) {
            (None, None) => {}
            (None, Some(_)) => {
                changes.push(ValueChange::new(base_path, None::<String>, Some(CONFIGURED_MARKER)));
            }
            (Some(_), None) => {
                changes.push(ValueChange::new(base_path, Some(CONFIGURED_MARKER), None::<String>));
            }
            (Some(from), Some(to)) => {
                if canonical(from) != canonical(to) {
                    let walker = Walker {
                        max_value_length: self.max_value_length,
                        is_sensitive,
                    };
                    walker.compare_elements(from, to, base_path, &mut changes);
                }
            }
        }
        changes
    }

    /// Serialize two values and compare the resulting trees.
    ///
    /// Fails only when a value cannot be represented as JSON.
    pub fn diff_serializable<T: Serialize + ?Sized>(
        &self,
        from: Option<&T>,
        to: Option<&T>,
        base_path: &str,
        is_sensitive: Option<SensitivePath<'_>>,
    ) -> VersoResult<Vec<ValueChange>> {
        let from = from.map(serde_json::to_value).transpose()?;
        let to = to.map(serde_json::to_value).transpose()?;
        Ok(self.diff(from.as_ref(), to.as_ref(), base_path, is_sensitive))
    }

    /// Like [`diff_serializable`](Self::diff_serializable), but degrades to a
    /// single `(modified)` entry when the comparison cannot complete.
    pub fn diff_or_modified<T: Serialize + ?Sized>(
        &self,
        from: Option<&T>,
        to: Option<&T>,
        base_path: &str,
        is_sensitive: Option<SensitivePath<'_>>,
    ) -> Vec<ValueChange> {
        match self.diff_serializable(from, to, base_path, is_sensitive) {
            Ok(changes) => changes,
            Err(e) => {
                warn!(path = %base_path, error = %e, "Structural comparison failed");
                vec![ValueChange::modified(base_path, MODIFIED_MARKER, MODIFIED_MARKER)]
            }
        }
    }
}

/// Compare two JSON values with the default display limit.
pub fn diff_values(
    from: Option<&Value>,
    to: Option<&Value>,
    base_path: &str,
    is_sensitive: Option<SensitivePath<'_>>,
) -> Vec<ValueChange> {
    JsonDiff::default().diff(from, to, base_path, is_sensitive)
}

/// Join a child key onto a path.
pub fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

fn canonical(value: &Value) -> String {
    value.to_string()
}

#[derive(PartialEq, Eq)]
enum Kind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

fn kind(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Array(_) => Kind::Array,
        Value::Object(_) => Kind::Object,
    }
}

struct Walker<'a> {
    max_value_length: usize,
    is_sensitive: Option<SensitivePath<'a>>,
}

impl Walker<'_> {
    fn compare_elements(&self, from: &Value, to: &Value, path: &str, changes: &mut Vec<ValueChange>) {
        if kind(from) != kind(to) {
            self.add_change(path, Some(from), Some(to), changes);
            return;
        }

        match (from, to) {
            (Value::Object(from_map), Value::Object(to_map)) => {
                self.compare_objects(from_map, to_map, path, changes);
            }
            (Value::Array(from_items), Value::Array(to_items)) => {
                if from_items.len() != to_items.len() || canonical(from) != canonical(to) {
                    changes.push(ValueChange::modified(
                        path,
                        format_array_len(from_items.len()),
                        format_array_len(to_items.len()),
                    ));
                }
            }
            _ => {
                if canonical(from) != canonical(to) {
                    self.add_change(path, Some(from), Some(to), changes);
                }
            }
        }
    }

    fn compare_objects(
        &self,
        from: &Map<String, Value>,
        to: &Map<String, Value>,
        path: &str,
        changes: &mut Vec<ValueChange>,
    ) {
        for (name, to_value) in to {
            let prop_path = join_path(path, name);
            match from.get(name) {
                None => self.add_change(&prop_path, None, Some(to_value), changes),
                Some(from_value) => self.compare_elements(from_value, to_value, &prop_path, changes),
            }
        }

        for (name, from_value) in from {
            if !to.contains_key(name) {
                let prop_path = join_path(path, name);
                self.add_change(&prop_path, Some(from_value), None, changes);
            }
        }
    }

    fn add_change(
        &self,
        path: &str,
        from: Option<&Value>,
        to: Option<&Value>,
        changes: &mut Vec<ValueChange>,
    ) {
        let sensitive = self.is_sensitive.map(|f| f(path)).unwrap_or(false);

        let render = |value: Option<&Value>| -> Option<String> {
            let value = value?;
            if sensitive {
                (!value.is_null()).then(|| MASK_TOKEN.to_string())
            } else {
                format_value(value, self.max_value_length)
            }
        };

        changes.push(ValueChange {
            path: path.to_string(),
            old_value: render(from),
            new_value: render(to),
        });
    }
}
