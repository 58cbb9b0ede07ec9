//! In-process version repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::cleanup::CleanupPlan;
use super::store::EntityVersionRepository;
use super::version::{EntityVersion, VersionKey};
use crate::error::{VersoError, VersoResult};

/// Version repository held entirely in memory.
///
/// Records are ordered by key, so one entity's versions are contiguous and
/// ascending.
#[derive(Default)]
pub struct InMemoryVersionRepository {
    versions: RwLock<BTreeMap<VersionKey, EntityVersion>>,
}

impl InMemoryVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entity_range<'a>(
        map: &'a BTreeMap<VersionKey, EntityVersion>,
        entity_id: Uuid,
        entity_type: &str,
    ) -> impl DoubleEndedIterator<Item = &'a EntityVersion> {
        let start = VersionKey {
            entity_id,
            entity_type: entity_type.to_string(),
            version: 0,
        };
        let end = VersionKey {
            entity_id,
            entity_type: entity_type.to_string(),
            version: u32::MAX,
        };
        map.range(start..=end).map(|(_, v)| v)
    }
}

#[async_trait]
impl EntityVersionRepository for InMemoryVersionRepository {
    async fn get_version(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
    ) -> VersoResult<Option<EntityVersion>> {
        let key = VersionKey {
            entity_id,
            entity_type: entity_type.to_string(),
            version,
        };
        Ok(self.versions.read().await.get(&key).cloned())
    }

    async fn get_version_history(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        skip: usize,
        take: usize,
    ) -> VersoResult<Vec<EntityVersion>> {
        let versions = self.versions.read().await;
        Ok(Self::entity_range(&versions, entity_id, entity_type)
            .rev()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }

    async fn count_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize> {
        let versions = self.versions.read().await;
        Ok(Self::entity_range(&versions, entity_id, entity_type).count())
    }

    async fn save_version(&self, version: &EntityVersion) -> VersoResult<()> {
        let mut versions = self.versions.write().await;
        let key = version.key();
        if versions.contains_key(&key) {
            return Err(VersoError::version_conflict(
                version.entity_id,
                &version.entity_type,
                version.version,
            ));
        }
        versions.insert(key, version.clone());
        Ok(())
    }

    async fn delete_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize> {
        let mut versions = self.versions.write().await;
        let before = versions.len();
        versions.retain(|key, _| !(key.entity_id == entity_id && key.entity_type == entity_type));
        Ok(before - versions.len())
    }

    async fn delete_versions_older_than(&self, threshold: DateTime<Utc>) -> VersoResult<usize> {
        let mut versions = self.versions.write().await;
        let plan = CleanupPlan::Run {
            age_threshold: Some(threshold),
            max_versions_per_entity: None,
        };
        let doomed = plan.select(versions.values()).by_age;
        for key in &doomed {
            versions.remove(key);
        }
        Ok(doomed.len())
    }

    async fn delete_excess_versions(&self, max_per_entity: u32) -> VersoResult<usize> {
        let mut versions = self.versions.write().await;
        let plan = CleanupPlan::Run {
            age_threshold: None,
            max_versions_per_entity: Some(max_per_entity),
        };
        let doomed = plan.select(versions.values()).by_count;
        for key in &doomed {
            versions.remove(key);
        }
        Ok(doomed.len())
    }

    async fn count_all(&self) -> VersoResult<usize> {
        Ok(self.versions.read().await.len())
    }
}
