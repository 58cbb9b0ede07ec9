//! Background runtime for version cleanup.
//!
//! Wires the version repository, adapter registry, versioning service and
//! cleanup scheduler together from a [`VersioningConfig`], providing unified
//! startup and graceful shutdown.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::VersioningConfig;
use crate::diff::JsonDiff;
use crate::error::VersoResult;
use crate::versioning::{
    AdapterRegistry, CleanupGate, EntityVersionRepository, EntityVersionService,
    SqliteVersionRepository, VersionCleanupScheduler,
};

/// Background runtime owning the versioning service and its cleanup scheduler.
///
/// # Example
///
/// ```ignore
/// use verso_core::{CleanupRuntime, VersioningConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut runtime = CleanupRuntime::new(VersioningConfig::from_env()?).await?;
///
///     // Register adapters, then start background cleanup
///     runtime.start().await?;
///
///     // ... application runs ...
///
///     runtime.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct CleanupRuntime {
    repository: Arc<dyn EntityVersionRepository>,
    registry: Arc<AdapterRegistry>,
    service: Arc<EntityVersionService>,
    scheduler: VersionCleanupScheduler,
    config: VersioningConfig,
}

impl CleanupRuntime {
    /// Create a runtime backed by the SQLite database at `config.database_path`.
    ///
    /// This creates the scheduler but does not start it.
    pub async fn new(config: VersioningConfig) -> VersoResult<Self> {
        debug!(path = %config.database_path.display(), "Creating file-backed version repository");
        let repository = Arc::new(SqliteVersionRepository::new(&config.database_path)?);
        Self::with_repository(config, repository).await
    }

    /// Create a runtime over an existing repository.
    pub async fn with_repository(
        config: VersioningConfig,
        repository: Arc<dyn EntityVersionRepository>,
    ) -> VersoResult<Self> {
        debug!(
            cleanup_enabled = config.cleanup.enabled,
            max_versions_per_entity = config.cleanup.max_versions_per_entity,
            retention_days = config.cleanup.retention_days,
            interval_minutes = config.scheduler.interval_minutes,
            "Creating CleanupRuntime"
        );

        let registry = Arc::new(AdapterRegistry::new());
        let service = Arc::new(
            EntityVersionService::new(repository.clone(), registry.clone())
                .with_cleanup_policy(config.cleanup),
        );
        let scheduler = VersionCleanupScheduler::new(service.clone(), config.scheduler.clone()).await?;

        Ok(Self {
            repository,
            registry,
            service,
            scheduler,
            config,
        })
    }

    /// Builder: set the gate consulted before every scheduled run
    pub fn with_gate(mut self, gate: Arc<dyn CleanupGate>) -> Self {
        self.scheduler = self.scheduler.with_gate(gate);
        self
    }

    /// Start the cleanup scheduler.
    pub async fn start(&self) -> VersoResult<()> {
        self.scheduler.start().await?;
        info!(
            adapters = self.registry.len(),
            "Versioning runtime started"
        );
        Ok(())
    }

    /// Shutdown the cleanup scheduler gracefully.
    pub async fn shutdown(&mut self) -> VersoResult<()> {
        self.scheduler.shutdown().await?;
        info!("Versioning runtime stopped");
        Ok(())
    }

    pub fn service(&self) -> Arc<EntityVersionService> {
        self.service.clone()
    }

    pub fn registry(&self) -> Arc<AdapterRegistry> {
        self.registry.clone()
    }

    pub fn repository(&self) -> Arc<dyn EntityVersionRepository> {
        self.repository.clone()
    }

    pub fn scheduler(&self) -> &VersionCleanupScheduler {
        &self.scheduler
    }

    /// Diff engine configured with the display limit from config.
    pub fn json_diff(&self) -> JsonDiff {
        JsonDiff::new().with_max_value_length(self.config.max_value_length)
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::{CleanupPolicy, EntityVersion, InMemoryVersionRepository};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_runtime_applies_config() {
        let config = VersioningConfig::builder()
            .cleanup(CleanupPolicy::default().with_retention_days(14))
            .max_value_length(12)
            .build();
        let runtime = CleanupRuntime::with_repository(config, Arc::new(InMemoryVersionRepository::new()))
            .await
            .unwrap();

        assert_eq!(runtime.service().cleanup_policy().retention_days, 14);
        assert_eq!(runtime.json_diff().max_value_length(), 12);
        assert!(runtime.registry().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_opens_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.db");
        let config = VersioningConfig::builder().database_path(&path).build();

        let runtime = CleanupRuntime::new(config).await.unwrap();
        runtime
            .repository()
            .save_version(&EntityVersion::new(Uuid::new_v4(), "Context", 1, "{}"))
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(runtime.repository().count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let mut runtime = CleanupRuntime::with_repository(
            VersioningConfig::default(),
            Arc::new(InMemoryVersionRepository::new()),
        )
        .await
        .unwrap();

        // Start should succeed
        runtime.start().await.unwrap();

        // Shutdown should succeed and cancel further runs
        runtime.shutdown().await.unwrap();
        assert!(runtime.scheduler().run_now().await.unwrap().is_none());
    }
}
