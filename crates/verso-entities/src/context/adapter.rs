//! Versioning adapter for contexts.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use verso_core::diff::{JsonDiff, ValueChange};
use verso_core::{VersionableEntityAdapter, VersoError, VersoResult};

use super::{Context, ContextResource, ContextService, InjectionMode, CONTEXT_ENTITY_TYPE};
use crate::snapshot::{embedded_json, encoded_json, from_snapshot, lenient_user_id, to_snapshot};

const EMPTY_DESCRIPTION: &str = "(empty)";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextSnapshot {
    id: Uuid,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    name: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    date_created: DateTime<Utc>,
    #[serde(default)]
    date_modified: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_user_id")]
    created_by_user_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient_user_id")]
    modified_by_user_id: Option<Uuid>,
    #[serde(default)]
    resources: Vec<ResourceSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSnapshot {
    id: Uuid,
    #[serde(default)]
    resource_type_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sort_order: i32,
    #[serde(default, serialize_with = "encoded_json", deserialize_with = "embedded_json")]
    data: Option<Value>,
    #[serde(default)]
    injection_mode: InjectionMode,
}

fn default_version() -> u32 {
    1
}

impl From<&ContextResource> for ResourceSnapshot {
    fn from(resource: &ContextResource) -> Self {
        Self {
            id: resource.id,
            resource_type_id: resource.resource_type_id.clone(),
            name: resource.name.clone(),
            description: resource.description.clone(),
            sort_order: resource.sort_order,
            data: resource.data.clone(),
            injection_mode: resource.injection_mode,
        }
    }
}

impl From<ResourceSnapshot> for ContextResource {
    fn from(snapshot: ResourceSnapshot) -> Self {
        Self {
            id: snapshot.id,
            resource_type_id: snapshot.resource_type_id,
            name: snapshot.name,
            description: snapshot.description,
            sort_order: snapshot.sort_order,
            data: snapshot.data,
            injection_mode: snapshot.injection_mode,
        }
    }
}

/// Adapter between contexts and the versioning service.
pub struct ContextAdapter {
    service: Weak<ContextService>,
    diff: JsonDiff,
}

impl ContextAdapter {
    pub fn new(service: &Arc<ContextService>, diff: JsonDiff) -> Self {
        Self {
            service: Arc::downgrade(service),
            diff,
        }
    }

    fn service(&self) -> VersoResult<Arc<ContextService>> {
        self.service
            .upgrade()
            .ok_or_else(|| VersoError::Internal("context service is no longer available".to_string()))
    }

    fn compare_resources(&self, from: &ContextResource, to: &ContextResource, changes: &mut Vec<ValueChange>) {
        let prefix = format!("Resources[{}]", from.label());

        if from.name != to.name {
            changes.push(ValueChange::new(
                format!("{}.Name", prefix),
                from.name.clone(),
                to.name.clone(),
            ));
        }
        if from.description != to.description {
            changes.push(ValueChange::modified(
                format!("{}.Description", prefix),
                from.description.as_deref().unwrap_or(EMPTY_DESCRIPTION),
                to.description.as_deref().unwrap_or(EMPTY_DESCRIPTION),
            ));
        }
        if from.resource_type_id != to.resource_type_id {
            changes.push(ValueChange::modified(
                format!("{}.ResourceTypeId", prefix),
                &from.resource_type_id,
                &to.resource_type_id,
            ));
        }
        if from.sort_order != to.sort_order {
            changes.push(ValueChange::modified(
                format!("{}.SortOrder", prefix),
                from.sort_order.to_string(),
                to.sort_order.to_string(),
            ));
        }
        if from.injection_mode != to.injection_mode {
            changes.push(ValueChange::modified(
                format!("{}.InjectionMode", prefix),
                from.injection_mode.to_string(),
                to.injection_mode.to_string(),
            ));
        }

        changes.extend(self.diff.diff_or_modified(
            from.data.as_ref(),
            to.data.as_ref(),
            &format!("{}.Data", prefix),
            None,
        ));
    }
}

#[async_trait]
impl VersionableEntityAdapter for ContextAdapter {
    type Entity = Context;

    fn entity_type_name(&self) -> &'static str {
        CONTEXT_ENTITY_TYPE
    }

    fn create_snapshot(&self, entity: &Context) -> VersoResult<String> {
        to_snapshot(&ContextSnapshot {
            id: entity.id,
            alias: entity.alias.clone(),
            name: entity.name.clone(),
            version: entity.version,
            date_created: entity.date_created,
            date_modified: entity.date_modified,
            created_by_user_id: entity.created_by_user_id,
            modified_by_user_id: entity.modified_by_user_id,
            resources: entity.resources.iter().map(ResourceSnapshot::from).collect(),
        })
    }

    fn restore_from_snapshot(&self, snapshot: &str) -> Option<Context> {
        let snapshot: ContextSnapshot = from_snapshot(CONTEXT_ENTITY_TYPE, snapshot)?;

        Some(Context {
            id: snapshot.id,
            alias: snapshot.alias,
            name: snapshot.name,
            resources: snapshot.resources.into_iter().map(ContextResource::from).collect(),
            version: snapshot.version,
            date_created: snapshot.date_created,
            date_modified: snapshot.date_modified,
            created_by_user_id: snapshot.created_by_user_id,
            modified_by_user_id: snapshot.modified_by_user_id,
        })
    }

    fn compare_versions(&self, from: &Context, to: &Context) -> Vec<ValueChange> {
        let mut changes = Vec::new();

        if from.alias != to.alias {
            changes.push(ValueChange::modified("Alias", &from.alias, &to.alias));
        }
        if from.name != to.name {
            changes.push(ValueChange::modified("Name", &from.name, &to.name));
        }
        if from.resources.len() != to.resources.len() {
            changes.push(ValueChange::modified(
                "Resources.Count",
                from.resources.len().to_string(),
                to.resources.len().to_string(),
            ));
        }

        let from_ids: HashSet<Uuid> = from.resources.iter().map(|r| r.id).collect();
        let to_ids: HashSet<Uuid> = to.resources.iter().map(|r| r.id).collect();

        for added in to.resources.iter().filter(|r| !from_ids.contains(&r.id)) {
            changes.push(ValueChange::new(
                format!("Resources[{}]", added.label()),
                None::<String>,
                Some("Added"),
            ));
        }
        for removed in from.resources.iter().filter(|r| !to_ids.contains(&r.id)) {
            changes.push(ValueChange::new(
                format!("Resources[{}]", removed.label()),
                Some("Removed"),
                None::<String>,
            ));
        }

        for from_resource in &from.resources {
            if let Some(to_resource) = to.resources.iter().find(|r| r.id == from_resource.id) {
                self.compare_resources(from_resource, to_resource, &mut changes);
            }
        }

        changes
    }

    async fn rollback(&self, entity_id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<()> {
        self.service()?.rollback_context(entity_id, version, user_id).await?;
        Ok(())
    }

    async fn get_entity(&self, entity_id: Uuid) -> VersoResult<Option<Context>> {
        Ok(self.service()?.get_context(entity_id).await)
    }
}
