//! Error types for verso operations.
//!
//! This module provides the error hierarchy shared by the versioning engine,
//! its storage backends and the entity adapters, with structured error codes
//! and suggestions for resolution.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for verso operations.
pub type VersoResult<T> = Result<T, VersoError>;

/// Main error type for all verso operations.
#[derive(Error, Debug)]
pub enum VersoError {
    /// No adapter is registered for the requested entity type.
    #[error("Unknown entity type: {entity_type}. Supported types: {}", .supported.join(", "))]
    UnknownEntityType {
        entity_type: String,
        supported: Vec<String>,
    },

    /// Entity not found.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        entity_id: Option<Uuid>,
    },

    /// A version exists in name only: it is missing or its snapshot can no longer be restored.
    #[error("Version {version} of {entity_type} '{entity_id}' is unavailable")]
    VersionUnavailable {
        entity_id: Uuid,
        entity_type: String,
        version: u32,
    },

    /// A uniqueness constraint was violated.
    #[error("Conflict: {message}")]
    Conflict { message: String, code: ErrorCode },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Background scheduler error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// The operation observed a cancellation request and stopped.
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValUnknownEntityType,
    ValDuplicateAlias,

    // Versions (VER_xxx)
    VerUnavailable,
    VerConflict,

    // Entities (ENT_xxx)
    EntNotFound,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,

    // Runtime (RUN_xxx)
    RunCancelled,
    RunSchedulerFailed,

    // Configuration
    Configuration,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValUnknownEntityType => "VAL_002",
            ErrorCode::ValDuplicateAlias => "VAL_003",
            ErrorCode::VerUnavailable => "VER_002",
            ErrorCode::VerConflict => "VER_003",
            ErrorCode::EntNotFound => "ENT_001",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::RunCancelled => "RUN_001",
            ErrorCode::RunSchedulerFailed => "RUN_002",
            ErrorCode::Configuration => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl VersoError {
    /// Create an unknown entity type error listing the supported names.
    pub fn unknown_entity_type(entity_type: impl Into<String>, supported: Vec<String>) -> Self {
        Self::UnknownEntityType {
            entity_type: entity_type.into(),
            supported,
        }
    }

    /// Create a not found error for an entity.
    pub fn entity_not_found(entity_type: &str, entity_id: Uuid) -> Self {
        Self::NotFound {
            message: format!("{} with ID '{}' not found", entity_type, entity_id),
            code: ErrorCode::EntNotFound,
            entity_id: Some(entity_id),
        }
    }

    /// Create a version unavailable error.
    pub fn version_unavailable(entity_id: Uuid, entity_type: impl Into<String>, version: u32) -> Self {
        Self::VersionUnavailable {
            entity_id,
            entity_type: entity_type.into(),
            version,
        }
    }

    /// Create a conflict error for a version key collision.
    pub fn version_conflict(entity_id: Uuid, entity_type: &str, version: u32) -> Self {
        Self::Conflict {
            message: format!(
                "version {} of {} '{}' has already been recorded",
                version, entity_type, entity_id
            ),
            code: ErrorCode::VerConflict,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error for an alias that is already taken.
    pub fn duplicate_alias(entity_type: &str, alias: &str) -> Self {
        Self::Validation {
            message: format!("A {} with alias '{}' already exists", entity_type.to_lowercase(), alias),
            code: ErrorCode::ValDuplicateAlias,
            suggestion: Some("Choose a different alias".to_string()),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownEntityType { .. } => ErrorCode::ValUnknownEntityType,
            Self::NotFound { code, .. } => *code,
            Self::VersionUnavailable { .. } => ErrorCode::VerUnavailable,
            Self::Conflict { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Configuration(_) => ErrorCode::Configuration,
            Self::Scheduler(_) => ErrorCode::RunSchedulerFailed,
            Self::Cancelled { .. } => ErrorCode::RunCancelled,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UnknownEntityType { .. } => Some("Use one of the supported entity type names"),
            Self::VersionUnavailable { .. } => {
                Some("The version may have been removed by cleanup or recorded in an unreadable format")
            }
            Self::Conflict { .. } => Some("Reload the entity and retry the save"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::Cancelled { .. } => Some("Re-run the operation; it is safe to repeat"),
            _ => None,
        }
    }

    /// Whether this error reports a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<rusqlite::Error> for VersoError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return Self::Conflict {
                    message: err.to_string(),
                    code: ErrorCode::VerConflict,
                };
            }
        }
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for VersoError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_entity_type_lists_supported() {
        let err = VersoError::unknown_entity_type(
            "Widget",
            vec!["Connection".to_string(), "Context".to_string()],
        );
        assert_eq!(err.code(), ErrorCode::ValUnknownEntityType);
        let message = err.to_string();
        assert!(message.contains("Widget"));
        assert!(message.contains("Connection, Context"));
    }

    #[test]
    fn test_version_conflict() {
        let err = VersoError::version_conflict(Uuid::nil(), "Context", 3);
        assert!(err.is_conflict());
        assert_eq!(err.code().as_str(), "VER_003");
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ValInvalidInput.as_str(), "VAL_001");
        assert_eq!(ErrorCode::VerUnavailable.as_str(), "VER_002");
        assert_eq!(ErrorCode::RunCancelled.as_str(), "RUN_001");
    }
}
