//! Versioning adapter for connections.
//!
//! Sensitive settings are protected in snapshots and masked in comparisons.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use verso_core::diff::{JsonDiff, ValueChange};
use verso_core::{VersionableEntityAdapter, VersoError, VersoResult};

use super::settings::{protect_settings, unprotect_settings, ProviderCatalog, SecretProtector};
use super::{Connection, ConnectionService, CONNECTION_ENTITY_TYPE};
use crate::snapshot::{embedded_json, encoded_json, from_snapshot, lenient_user_id, to_snapshot};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionSnapshot {
    id: Uuid,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    provider_id: String,
    #[serde(default, serialize_with = "encoded_json", deserialize_with = "embedded_json")]
    settings: Option<Value>,
    #[serde(default = "default_active")]
    is_active: bool,
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
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

/// Adapter between connections and the versioning service.
///
/// The provider catalog is shared with the service; snapshots and comparisons
/// do not need the service itself.
pub struct ConnectionAdapter {
    service: Weak<ConnectionService>,
    catalog: Arc<ProviderCatalog>,
    protector: Arc<dyn SecretProtector>,
    diff: JsonDiff,
}

impl ConnectionAdapter {
    pub fn new(service: &Arc<ConnectionService>, protector: Arc<dyn SecretProtector>, diff: JsonDiff) -> Self {
        Self {
            service: Arc::downgrade(service),
            catalog: service.catalog().clone(),
            protector,
            diff,
        }
    }

    fn service(&self) -> VersoResult<Arc<ConnectionService>> {
        self.service
            .upgrade()
            .ok_or_else(|| VersoError::Internal("connection service is no longer available".to_string()))
    }
}

#[async_trait]
impl VersionableEntityAdapter for ConnectionAdapter {
    type Entity = Connection;

    fn entity_type_name(&self) -> &'static str {
        CONNECTION_ENTITY_TYPE
    }

    fn create_snapshot(&self, entity: &Connection) -> VersoResult<String> {
        let schema = self.catalog.schema(&entity.provider_id);
        let settings = entity
            .settings
            .as_ref()
            .map(|s| protect_settings(s, schema, self.protector.as_ref()))
            .transpose()?;

        to_snapshot(&ConnectionSnapshot {
            id: entity.id,
            alias: entity.alias.clone(),
            name: entity.name.clone(),
            provider_id: entity.provider_id.clone(),
            settings,
            is_active: entity.is_active,
            version: entity.version,
            date_created: entity.date_created,
            date_modified: entity.date_modified,
            created_by_user_id: entity.created_by_user_id,
            modified_by_user_id: entity.modified_by_user_id,
        })
    }

    fn restore_from_snapshot(&self, snapshot: &str) -> Option<Connection> {
        let snapshot: ConnectionSnapshot = from_snapshot(CONNECTION_ENTITY_TYPE, snapshot)?;

        let schema = self.catalog.schema(&snapshot.provider_id);
        let settings = match snapshot.settings {
            Some(settings) => match unprotect_settings(&settings, schema, self.protector.as_ref()) {
                Some(plain) => Some(plain),
                None => {
                    warn!(id = %snapshot.id, "Connection snapshot holds settings that cannot be unprotected");
                    return None;
                }
            },
            None => None,
        };

        Some(Connection {
            id: snapshot.id,
            alias: snapshot.alias,
            name: snapshot.name,
            provider_id: snapshot.provider_id,
            settings,
            is_active: snapshot.is_active,
            version: snapshot.version,
            date_created: snapshot.date_created,
            date_modified: snapshot.date_modified,
            created_by_user_id: snapshot.created_by_user_id,
            modified_by_user_id: snapshot.modified_by_user_id,
        })
    }

    fn compare_versions(&self, from: &Connection, to: &Connection) -> Vec<ValueChange> {
        let mut changes = Vec::new();

        if from.alias != to.alias {
            changes.push(ValueChange::modified("Alias", &from.alias, &to.alias));
        }
        if from.name != to.name {
            changes.push(ValueChange::modified("Name", &from.name, &to.name));
        }
        if from.provider_id != to.provider_id {
            changes.push(ValueChange::modified("ProviderId", &from.provider_id, &to.provider_id));
        }
        if from.is_active != to.is_active {
            changes.push(ValueChange::modified(
                "IsActive",
                from.is_active.to_string(),
                to.is_active.to_string(),
            ));
        }

        // Sensitivity follows the schema of the provider the settings were written for
        let schema = self.catalog.schema(&from.provider_id);
        let is_sensitive: &dyn Fn(&str) -> bool =
            &|path: &str| schema.is_some_and(|s| s.is_sensitive_path(path));

        changes.extend(self.diff.diff_or_modified(
            from.settings.as_ref(),
            to.settings.as_ref(),
            "Settings",
            Some(is_sensitive),
        ));

        changes
    }

    async fn rollback(&self, entity_id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<()> {
        self.service()?
            .rollback_connection(entity_id, version, user_id)
            .await?;
        Ok(())
    }

    async fn get_entity(&self, entity_id: Uuid) -> VersoResult<Option<Connection>> {
        Ok(self.service()?.get_connection(entity_id).await)
    }
}
