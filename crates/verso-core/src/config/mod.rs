//! Configuration system for verso.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::diff::DEFAULT_MAX_VALUE_LENGTH;
use crate::error::{VersoError, VersoResult};
use crate::versioning::{CleanupPolicy, CleanupSchedulerConfig};

/// Main versioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Retention policy applied by cleanup runs.
    pub cleanup: CleanupPolicy,
    /// Cleanup scheduling.
    pub scheduler: CleanupSchedulerConfig,
    /// Path to the version database.
    pub database_path: PathBuf,
    /// Display limit for values reported in comparisons.
    pub max_value_length: usize,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        let verso_dir = dirs::home_dir()
            .map(|h| h.join(".verso"))
            .unwrap_or_else(|| PathBuf::from(".verso"));

        Self {
            cleanup: CleanupPolicy::default(),
            scheduler: CleanupSchedulerConfig::default(),
            database_path: verso_dir.join("versions.db"),
            max_value_length: DEFAULT_MAX_VALUE_LENGTH,
        }
    }
}

impl VersioningConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> VersoResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| VersoError::Configuration(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| VersoError::Configuration(e.to_string()))
            }
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| VersoError::Configuration(e.to_string()))
            }
            _ => Err(VersoError::Configuration(
                "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load configuration from `VERSO_*` environment variables over the defaults.
    pub fn from_env() -> VersoResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VersoResult<Self> {
        let mut config = Self::default();

        // Cleanup policy
        if let Some(enabled) = lookup("VERSO_CLEANUP_ENABLED") {
            config.cleanup.enabled = parse_bool("VERSO_CLEANUP_ENABLED", &enabled)?;
        }
        if let Some(max) = lookup("VERSO_MAX_VERSIONS_PER_ENTITY") {
            config.cleanup.max_versions_per_entity = parse_number("VERSO_MAX_VERSIONS_PER_ENTITY", &max)?;
        }
        if let Some(days) = lookup("VERSO_RETENTION_DAYS") {
            config.cleanup.retention_days = parse_number("VERSO_RETENTION_DAYS", &days)?;
        }

        // Scheduler
        if let Some(minutes) = lookup("VERSO_CLEANUP_INTERVAL_MINUTES") {
            let minutes: u64 = parse_number("VERSO_CLEANUP_INTERVAL_MINUTES", &minutes)?;
            config.scheduler.interval_minutes = minutes.max(1);
        }
        if let Some(run) = lookup("VERSO_CLEANUP_RUN_ON_START") {
            config.scheduler.run_on_start = parse_bool("VERSO_CLEANUP_RUN_ON_START", &run)?;
        }
        if let Some(delay) = lookup("VERSO_CLEANUP_STARTUP_DELAY_SECS") {
            config.scheduler.startup_delay_secs = parse_number("VERSO_CLEANUP_STARTUP_DELAY_SECS", &delay)?;
        }

        // Storage and presentation
        if let Some(path) = lookup("VERSO_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(length) = lookup("VERSO_MAX_VALUE_LENGTH") {
            let length: usize = parse_number("VERSO_MAX_VALUE_LENGTH", &length)?;
            config.max_value_length = length.max(1);
        }

        Ok(config)
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> VersioningConfigBuilder {
        VersioningConfigBuilder::default()
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> VersoResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VersoError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> VersoResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(VersoError::Configuration(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

/// Builder for VersioningConfig.
#[derive(Default)]
pub struct VersioningConfigBuilder {
    config: VersioningConfig,
}

impl VersioningConfigBuilder {
    /// Set the cleanup policy.
    pub fn cleanup(mut self, policy: CleanupPolicy) -> Self {
        self.config.cleanup = policy;
        self
    }

    /// Set scheduler configuration.
    pub fn scheduler(mut self, config: CleanupSchedulerConfig) -> Self {
        self.config.scheduler = config;
        self
    }

    /// Set version database path.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Set the display limit for compared values.
    pub fn max_value_length(mut self, length: usize) -> Self {
        self.config.max_value_length = length.max(1);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> VersioningConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = VersioningConfig::default();
        assert!(config.cleanup.enabled);
        assert_eq!(config.cleanup.max_versions_per_entity, 50);
        assert_eq!(config.cleanup.retention_days, 0);
        assert_eq!(config.max_value_length, 100);
        assert!(config.database_path.ends_with(".verso/versions.db"));
    }

    #[test]
    fn test_from_lookup() {
        let config = VersioningConfig::from_lookup(lookup_from(&[
            ("VERSO_CLEANUP_ENABLED", "false"),
            ("VERSO_MAX_VERSIONS_PER_ENTITY", "5"),
            ("VERSO_RETENTION_DAYS", "30"),
            ("VERSO_CLEANUP_INTERVAL_MINUTES", "0"),
            ("VERSO_CLEANUP_RUN_ON_START", "yes"),
            ("VERSO_CLEANUP_STARTUP_DELAY_SECS", "10"),
            ("VERSO_DB_PATH", "/tmp/verso.db"),
            ("VERSO_MAX_VALUE_LENGTH", "20"),
        ]))
        .unwrap();

        assert!(!config.cleanup.enabled);
        assert_eq!(config.cleanup.max_versions_per_entity, 5);
        assert_eq!(config.cleanup.retention_days, 30);
        assert_eq!(config.scheduler.interval_minutes, 1);
        assert!(config.scheduler.run_on_start);
        assert_eq!(config.scheduler.startup_delay_secs, 10);
        assert_eq!(config.database_path, PathBuf::from("/tmp/verso.db"));
        assert_eq!(config.max_value_length, 20);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = VersioningConfig::from_lookup(lookup_from(&[("VERSO_RETENTION_DAYS", "-3")]))
            .unwrap_err();
        assert!(matches!(err, VersoError::Configuration(ref m) if m.contains("VERSO_RETENTION_DAYS")));

        let err = VersioningConfig::from_lookup(lookup_from(&[("VERSO_CLEANUP_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, VersoError::Configuration(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
database_path = "/var/lib/verso/versions.db"

[cleanup]
retention_days = 90

[scheduler]
interval_minutes = 30
"#
        )
        .unwrap();

        let config = VersioningConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cleanup.retention_days, 90);
        // unspecified fields keep their defaults
        assert_eq!(config.cleanup.max_versions_per_entity, 50);
        assert_eq!(config.scheduler.interval_minutes, 30);
        assert_eq!(config.scheduler.startup_delay_secs, 300);
        assert_eq!(config.database_path, PathBuf::from("/var/lib/verso/versions.db"));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "cleanup:\n  enabled: false\nmax_value_length: 40").unwrap();

        let config = VersioningConfig::from_file(file.path()).unwrap();
        assert!(!config.cleanup.enabled);
        assert_eq!(config.max_value_length, 40);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            VersioningConfig::from_file(file.path()),
            Err(VersoError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = VersioningConfig::builder()
            .cleanup(CleanupPolicy::default().with_retention_days(7))
            .scheduler(CleanupSchedulerConfig::with_interval(15))
            .database_path("/data/versions.db")
            .max_value_length(0)
            .build();

        assert_eq!(config.cleanup.retention_days, 7);
        assert_eq!(config.scheduler.interval_minutes, 15);
        assert_eq!(config.database_path, PathBuf::from("/data/versions.db"));
        assert_eq!(config.max_value_length, 1);
    }
}
