//! Entity version service.
//!
//! Orchestrates snapshot-on-save, history reads, comparisons, rollback and
//! retention cleanup across every registered entity type. The live state of
//! an entity is treated as its newest version even though it is only written
//! to the repository once it is superseded.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::adapter::{AnyEntity, EntityAdapter, LiveEntity, VersionableEntity};
use super::cleanup::{CleanupPlan, CleanupPolicy, CleanupResult};
use super::registry::AdapterRegistry;
use super::store::EntityVersionRepository;
use super::version::{
    EntityVersion, LiveVersion, VersionComparison, VersionHistoryPage, VersionRecord,
};
use crate::error::{VersoError, VersoResult};

/// One side of a comparison.
enum Endpoint<'a> {
    Restored(AnyEntity),
    Live(&'a LiveEntity),
}

impl Endpoint<'_> {
    fn entity(&self) -> &(dyn Any + Send + Sync) {
        match self {
            Self::Restored(entity) => entity.as_ref(),
            Self::Live(live) => live.entity(),
        }
    }
}

/// Version history orchestrator.
pub struct EntityVersionService {
    repository: Arc<dyn EntityVersionRepository>,
    registry: Arc<AdapterRegistry>,
    policy: RwLock<CleanupPolicy>,
}

impl EntityVersionService {
    pub fn new(repository: Arc<dyn EntityVersionRepository>, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            repository,
            registry,
            policy: RwLock::new(CleanupPolicy::default()),
        }
    }

    /// Builder: set the initial cleanup policy
    pub fn with_cleanup_policy(self, policy: CleanupPolicy) -> Self {
        self.set_cleanup_policy(policy);
        self
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn EntityVersionRepository> {
        &self.repository
    }

    /// Get a page of stored versions, newest first.
    pub async fn get_version_history(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        skip: usize,
        take: usize,
    ) -> VersoResult<VersionHistoryPage> {
        let adapter = self.registry.require_by_name(entity_type)?;
        let entity_type = adapter.entity_type();

        let items = self
            .repository
            .get_version_history(entity_id, entity_type, skip, take)
            .await?;
        let total = self.repository.count_versions(entity_id, entity_type).await?;

        Ok(VersionHistoryPage { items, total })
    }

    /// Get one version, falling back to the live entity when it is the requested version.
    pub async fn get_version(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
    ) -> VersoResult<Option<VersionRecord>> {
        let adapter = self.registry.require_by_name(entity_type)?;
        let entity_type = adapter.entity_type();

        if let Some(stored) = self
            .repository
            .get_version(entity_id, entity_type, version)
            .await?
        {
            return Ok(Some(VersionRecord::Stored(stored)));
        }

        match adapter.get_live(entity_id).await? {
            Some(live) if live.version == version => {
                debug!(%entity_id, entity_type, version, "Synthesizing version from live entity");
                let snapshot = adapter.snapshot_any(live.entity())?;
                Ok(Some(VersionRecord::Live(LiveVersion {
                    entity_id,
                    entity_type: entity_type.to_string(),
                    version,
                    snapshot,
                    date_created: live.date_modified,
                    created_by_user_id: live.modified_by_user_id,
                })))
            }
            _ => Ok(None),
        }
    }

    /// Get a version restored as a typed entity.
    ///
    /// Returns `None` when the version does not exist or its snapshot cannot be restored.
    pub async fn get_version_snapshot<T: VersionableEntity>(
        &self,
        entity_id: Uuid,
        version: u32,
    ) -> VersoResult<Option<T>> {
        let adapter = self.registry.require_by_type::<T>()?;
        let entity_type = adapter.entity_type();

        if let Some(stored) = self
            .repository
            .get_version(entity_id, entity_type, version)
            .await?
        {
            let restored = adapter
                .restore_any(&stored.snapshot)
                .and_then(|entity| entity.downcast::<T>().ok())
                .map(|entity| *entity);
            if restored.is_none() {
                warn!(%entity_id, entity_type, version, "Stored snapshot could not be restored");
            }
            return Ok(restored);
        }

        Ok(adapter
            .get_live(entity_id)
            .await?
            .filter(|live| live.version == version)
            .and_then(LiveEntity::downcast::<T>))
    }

    /// Record the current state of `entity` at its current version number.
    ///
    /// Owning services call this with the pre-update entity right before
    /// persisting new values.
    pub async fn save_version<T: VersionableEntity>(
        &self,
        entity: &T,
        user_id: Option<Uuid>,
        change_description: Option<&str>,
    ) -> VersoResult<EntityVersion> {
        let adapter = self.registry.require_by_type::<T>()?;
        let snapshot = adapter.snapshot_any(entity)?;
        self.persist(
            entity.id(),
            adapter.entity_type(),
            entity.version(),
            snapshot,
            user_id,
            change_description,
        )
        .await
    }

    /// Record a pre-built snapshot.
    pub async fn save_version_raw(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
        snapshot: impl Into<String>,
        user_id: Option<Uuid>,
        change_description: Option<&str>,
    ) -> VersoResult<EntityVersion> {
        let adapter = self.registry.require_by_name(entity_type)?;
        self.persist(
            entity_id,
            adapter.entity_type(),
            version,
            snapshot.into(),
            user_id,
            change_description,
        )
        .await
    }

    async fn persist(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
        snapshot: String,
        user_id: Option<Uuid>,
        change_description: Option<&str>,
    ) -> VersoResult<EntityVersion> {
        if version == 0 {
            return Err(VersoError::validation("version numbers start at 1"));
        }

        let mut record = EntityVersion::new(entity_id, entity_type, version, snapshot);
        record.created_by_user_id = user_id;
        record.change_description = change_description.map(str::to_string);

        self.repository.save_version(&record).await?;
        debug!(%entity_id, entity_type, version, "Saved entity version");
        Ok(record)
    }

    /// Delete every stored version of an entity.
    pub async fn delete_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize> {
        let adapter = self.registry.require_by_name(entity_type)?;
        let deleted = self
            .repository
            .delete_versions(entity_id, adapter.entity_type())
            .await?;
        debug!(%entity_id, entity_type = adapter.entity_type(), deleted, "Deleted entity versions");
        Ok(deleted)
    }

    /// Compare two versions of an entity.
    ///
    /// Returns `None` when either version is missing or cannot be restored,
    /// which is distinct from an empty comparison.
    pub async fn compare_versions(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        from_version: u32,
        to_version: u32,
    ) -> VersoResult<Option<VersionComparison>> {
        let adapter = self.registry.require_by_name(entity_type)?;
        let entity_type = adapter.entity_type();

        let from_stored = self
            .repository
            .get_version(entity_id, entity_type, from_version)
            .await?;
        let to_stored = self
            .repository
            .get_version(entity_id, entity_type, to_version)
            .await?;

        let live = if from_stored.is_none() || to_stored.is_none() {
            adapter.get_live(entity_id).await?
        } else {
            None
        };

        let Some(from) = resolve_endpoint(adapter.as_ref(), from_stored, from_version, live.as_ref()) else {
            debug!(%entity_id, entity_type, version = from_version, "Comparison endpoint unavailable");
            return Ok(None);
        };
        let Some(to) = resolve_endpoint(adapter.as_ref(), to_stored, to_version, live.as_ref()) else {
            debug!(%entity_id, entity_type, version = to_version, "Comparison endpoint unavailable");
            return Ok(None);
        };

        let changes = adapter
            .compare_any(from.entity(), to.entity())
            .ok_or_else(|| VersoError::Internal(format!("{} adapter rejected its own entities", entity_type)))?;

        Ok(Some(VersionComparison {
            entity_id,
            entity_type: entity_type.to_string(),
            from_version,
            to_version,
            changes,
        }))
    }

    /// Roll an entity back to `version`; the owning service records a new version.
    pub async fn rollback(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
        user_id: Option<Uuid>,
    ) -> VersoResult<()> {
        let adapter = self.registry.require_by_name(entity_type)?;
        info!(%entity_id, entity_type = adapter.entity_type(), version, "Rolling back entity");
        adapter.rollback_to(entity_id, version, user_id).await
    }

    /// Snapshot a typed entity with its registered adapter.
    pub fn create_snapshot<T: VersionableEntity>(&self, entity: &T) -> VersoResult<String> {
        self.registry.require_by_type::<T>()?.snapshot_any(entity)
    }

    /// Restore a typed entity with its registered adapter.
    pub fn restore_from_snapshot<T: VersionableEntity>(&self, snapshot: &str) -> VersoResult<Option<T>> {
        Ok(self
            .registry
            .require_by_type::<T>()?
            .restore_any(snapshot)
            .and_then(|entity| entity.downcast::<T>().ok())
            .map(|entity| *entity))
    }

    /// The policy the next cleanup run will apply.
    pub fn cleanup_policy(&self) -> CleanupPolicy {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_cleanup_policy(&self, policy: CleanupPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Apply the active cleanup policy.
    ///
    /// Age-based deletion runs first and count-based deletion sees what it
    /// left. `cancel` is checked before each pass; a cancelled run stops with
    /// [`VersoError::Cancelled`] and can simply be run again.
    pub async fn cleanup_versions(&self, cancel: &CancellationToken) -> VersoResult<CleanupResult> {
        let now = Utc::now();
        let policy = self.cleanup_policy();
        let mut result = CleanupResult::started(now);

        let (age_threshold, max_versions_per_entity) = match CleanupPlan::from_policy(&policy, now) {
            CleanupPlan::Skip(reason) => {
                let remaining = self.repository.count_all().await?;
                info!(reason = %reason, remaining, "Version cleanup skipped");
                return Ok(result.skipped(reason, remaining));
            }
            CleanupPlan::Run {
                age_threshold,
                max_versions_per_entity,
            } => (age_threshold, max_versions_per_entity),
        };

        if let Some(threshold) = age_threshold {
            ensure_not_cancelled(cancel, "version cleanup (age pass)")?;
            result.deleted_by_age = self.repository.delete_versions_older_than(threshold).await?;
            debug!(deleted = result.deleted_by_age, %threshold, "Deleted versions past retention");
        }

        if let Some(max) = max_versions_per_entity {
            if cancel.is_cancelled() {
                warn!(
                    deleted_by_age = result.deleted_by_age,
                    "Version cleanup cancelled before count pass"
                );
                return Err(VersoError::cancelled("version cleanup (count pass)"));
            }
            result.deleted_by_count = self.repository.delete_excess_versions(max).await?;
            debug!(deleted = result.deleted_by_count, max, "Deleted excess versions");
        }

        let remaining = self.repository.count_all().await?;
        let result = result.complete(remaining);
        info!(
            deleted_by_age = result.deleted_by_age,
            deleted_by_count = result.deleted_by_count,
            remaining = result.remaining_versions,
            duration_ms = result.duration_ms().unwrap_or_default(),
            "Version cleanup completed"
        );
        Ok(result)
    }
}

fn resolve_endpoint<'a>(
    adapter: &dyn EntityAdapter,
    stored: Option<EntityVersion>,
    version: u32,
    live: Option<&'a LiveEntity>,
) -> Option<Endpoint<'a>> {
    match stored {
        Some(stored) => {
            let restored = adapter.restore_any(&stored.snapshot);
            if restored.is_none() {
                warn!(
                    entity_id = %stored.entity_id,
                    entity_type = %stored.entity_type,
                    version,
                    "Stored snapshot could not be restored"
                );
            }
            restored.map(Endpoint::Restored)
        }
        None => live.filter(|l| l.version == version).map(Endpoint::Live),
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, operation: &str) -> VersoResult<()> {
    if cancel.is_cancelled() {
        return Err(VersoError::cancelled(operation));
    }
    Ok(())
}
