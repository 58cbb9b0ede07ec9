//! verso-core - Core library for verso.
//!
//! This crate provides uniform version history for heterogeneous domain
//! entities: snapshot-on-save, structural comparison between any two
//! versions, rollback and retention-based cleanup. Entity types plug in
//! through [`VersionableEntityAdapter`] implementations registered with an
//! [`AdapterRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use verso_core::{AdapterRegistry, EntityVersionService, InMemoryVersionRepository};
//!
//! let registry = Arc::new(AdapterRegistry::new());
//! let service = Arc::new(EntityVersionService::new(
//!     Arc::new(InMemoryVersionRepository::new()),
//!     registry.clone(),
//! ));
//! registry.register(MyEntityAdapter::new(/* owning service */));
//!
//! // Before overwriting an existing entity
//! service.save_version(&previous, Some(user_id), Some("Renamed")).await?;
//!
//! // Compare two versions
//! let diff = service.compare_versions(id, "MyEntity", 1, 2).await?;
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod runtime;
pub mod versioning;

// Re-export commonly used types
pub use config::{VersioningConfig, VersioningConfigBuilder};
pub use diff::{JsonDiff, ValueChange};
pub use error::{ErrorCode, VersoError, VersoResult};
pub use runtime::CleanupRuntime;
pub use versioning::{
    AdapterRegistry, CleanupPolicy, CleanupResult, EntityVersion, EntityVersionRepository,
    EntityVersionService, InMemoryVersionRepository, LiveEntity, SqliteVersionRepository,
    VersionComparison, VersionRecord, VersionableEntity, VersionableEntityAdapter,
};
