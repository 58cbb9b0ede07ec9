//! Provider settings schemas and secret protection for connection snapshots.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use verso_core::diff::join_path;
use verso_core::{VersoError, VersoResult};

/// Prefix marking a protected value inside a snapshot.
pub const PROTECTED_PREFIX: &str = "ENC:";

/// One field of a provider's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsField {
    /// Key as it appears in the settings document
    pub key: String,
    /// Alternative name the field is known by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default)]
    pub is_sensitive: bool,
}

impl SettingsField {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            property_name: None,
            is_sensitive: false,
        }
    }

    /// Builder: mark the field as holding a secret
    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    /// Builder: set the alternative property name
    pub fn with_property_name(mut self, name: impl Into<String>) -> Self {
        self.property_name = Some(name.into());
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name)
            || self
                .property_name
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(name))
    }
}

/// Settings layout published by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSchema {
    pub fields: Vec<SettingsField>,
}

impl SettingsSchema {
    pub fn new(fields: Vec<SettingsField>) -> Self {
        Self { fields }
    }

    /// Whether the value at a dotted path holds a secret.
    ///
    /// Only the last path segment is considered and names match ignoring case.
    pub fn is_sensitive_path(&self, path: &str) -> bool {
        let name = path.rsplit('.').next().unwrap_or(path);
        self.fields.iter().any(|f| f.is_sensitive && f.matches(name))
    }
}

/// Known providers and their settings schemas.
///
/// Serialized as a map from provider id to schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCatalog {
    providers: HashMap<String, SettingsSchema>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> VersoResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            VersoError::Configuration(format!("Invalid provider catalog {}: {}", path.display(), e))
        })
    }

    /// Builder: add a provider
    pub fn with_provider(mut self, provider_id: impl Into<String>, schema: SettingsSchema) -> Self {
        self.providers.insert(provider_id.into(), schema);
        self
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    pub fn schema(&self, provider_id: &str) -> Option<&SettingsSchema> {
        self.providers.get(provider_id)
    }

    /// Provider ids, sorted.
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Protects secret setting values written into snapshots.
pub trait SecretProtector: Send + Sync {
    fn protect(&self, plaintext: &str) -> VersoResult<String>;

    /// `None` when the value cannot be recovered.
    fn unprotect(&self, protected: &str) -> Option<String>;
}

/// Protector that stores secrets as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextProtector;

impl SecretProtector for PlaintextProtector {
    fn protect(&self, plaintext: &str) -> VersoResult<String> {
        Ok(plaintext.to_string())
    }

    fn unprotect(&self, protected: &str) -> Option<String> {
        Some(protected.to_string())
    }
}

/// Protect every sensitive string value in a settings document.
pub fn protect_settings(
    settings: &Value,
    schema: Option<&SettingsSchema>,
    protector: &dyn SecretProtector,
) -> VersoResult<Value> {
    match schema {
        Some(schema) => protect_at(settings, "", schema, protector),
        None => Ok(settings.clone()),
    }
}

fn protect_at(
    value: &Value,
    path: &str,
    schema: &SettingsSchema,
    protector: &dyn SecretProtector,
) -> VersoResult<Value> {
    match value {
        Value::Object(map) => {
            let mut protected = Map::with_capacity(map.len());
            for (key, child) in map {
                let child_path = join_path(path, key);
                protected.insert(key.clone(), protect_at(child, &child_path, schema, protector)?);
            }
            Ok(Value::Object(protected))
        }
        // elements share the path of their array
        Value::Array(items) => items
            .iter()
            .map(|item| protect_at(item, path, schema, protector))
            .collect::<VersoResult<Vec<_>>>()
            .map(Value::Array),
        Value::String(s) if schema.is_sensitive_path(path) => {
            Ok(Value::String(format!("{}{}", PROTECTED_PREFIX, protector.protect(s)?)))
        }
        other => Ok(other.clone()),
    }
}

/// Recover the protected values in a settings document.
///
/// Mirrors [`protect_settings`]: only strings at sensitive paths that carry
/// [`PROTECTED_PREFIX`] are unprotected, everything else is returned as is.
/// `None` when any protected value cannot be recovered.
pub fn unprotect_settings(
    settings: &Value,
    schema: Option<&SettingsSchema>,
    protector: &dyn SecretProtector,
) -> Option<Value> {
    match schema {
        Some(schema) => unprotect_at(settings, "", schema, protector),
        None => Some(settings.clone()),
    }
}

fn unprotect_at(
    value: &Value,
    path: &str,
    schema: &SettingsSchema,
    protector: &dyn SecretProtector,
) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let mut plain = Map::with_capacity(map.len());
            for (key, child) in map {
                let child_path = join_path(path, key);
                plain.insert(key.clone(), unprotect_at(child, &child_path, schema, protector)?);
            }
            Some(Value::Object(plain))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| unprotect_at(item, path, schema, protector))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::String(s) if schema.is_sensitive_path(path) => match s.strip_prefix(PROTECTED_PREFIX) {
            Some(protected) => protector.unprotect(protected).map(Value::String),
            None => Some(value.clone()),
        },
        other => Some(other.clone()),
    }
}
