//! Provider connections.
//!
//! A connection binds a provider to a set of free-form settings, some of
//! which are secrets. [`ConnectionService`] is the owning service: it records
//! a version before every update and hands rollbacks back through its own
//! save path.

mod adapter;
mod settings;

pub use adapter::ConnectionAdapter;
pub use settings::{
    protect_settings, unprotect_settings, PlaintextProtector, ProviderCatalog, SecretProtector,
    SettingsField, SettingsSchema, PROTECTED_PREFIX,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use verso_core::diff::JsonDiff;
use verso_core::versioning::VersionHistoryPage;
use verso_core::{EntityVersionService, VersionableEntity, VersoError, VersoResult};

/// Type name connections are versioned under.
pub const CONNECTION_ENTITY_TYPE: &str = "Connection";

/// A configured provider connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub alias: String,
    pub name: String,
    pub provider_id: String,
    pub settings: Option<Value>,
    pub is_active: bool,
    pub version: u32,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    pub modified_by_user_id: Option<Uuid>,
}

impl Connection {
    /// Create an unsaved, active connection.
    pub fn new(alias: impl Into<String>, name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::nil(),
            alias: alias.into(),
            name: name.into(),
            provider_id: provider_id.into(),
            settings: None,
            is_active: true,
            version: 1,
            date_created: now,
            date_modified: now,
            created_by_user_id: None,
            modified_by_user_id: None,
        }
    }

    /// Builder: set provider settings
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl VersionableEntity for Connection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    fn date_modified(&self) -> DateTime<Utc> {
        self.date_modified
    }

    fn created_by_user_id(&self) -> Option<Uuid> {
        self.created_by_user_id
    }

    fn modified_by_user_id(&self) -> Option<Uuid> {
        self.modified_by_user_id
    }
}

/// In-process owning service for connections.
pub struct ConnectionService {
    connections: RwLock<HashMap<Uuid, Connection>>,
    versions: Arc<EntityVersionService>,
    catalog: Arc<ProviderCatalog>,
}

impl ConnectionService {
    pub fn new(versions: Arc<EntityVersionService>, catalog: Arc<ProviderCatalog>) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            versions,
            catalog,
        })
    }

    /// Create the service and register its adapter with the versioning service.
    pub fn register(
        versions: Arc<EntityVersionService>,
        catalog: Arc<ProviderCatalog>,
        protector: Arc<dyn SecretProtector>,
        diff: JsonDiff,
    ) -> Arc<Self> {
        let service = Self::new(versions, catalog);
        service
            .versions
            .registry()
            .register(ConnectionAdapter::new(&service, protector, diff));
        service
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    pub async fn get_connection(&self, id: Uuid) -> Option<Connection> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn get_connection_by_alias(&self, alias: &str) -> Option<Connection> {
        self.connections
            .read()
            .await
            .values()
            .find(|c| c.alias.eq_ignore_ascii_case(alias))
            .cloned()
    }

    /// All connections, ordered by name.
    pub async fn get_connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self.connections.read().await.values().cloned().collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        connections
    }

    /// Create or update a connection.
    ///
    /// Updating records the stored state as a version first and bumps the
    /// version number.
    pub async fn save_connection(&self, mut connection: Connection, user_id: Option<Uuid>) -> VersoResult<Connection> {
        if connection.id.is_nil() {
            connection.id = Uuid::new_v4();
        }

        if !self.catalog.contains(&connection.provider_id) {
            return Err(VersoError::validation(format!(
                "Provider '{}' not found",
                connection.provider_id
            )));
        }

        if let Some(other) = self.get_connection_by_alias(&connection.alias).await {
            if other.id != connection.id {
                return Err(VersoError::duplicate_alias(CONNECTION_ENTITY_TYPE, &connection.alias));
            }
        }

        let now = Utc::now();
        match self.get_connection(connection.id).await {
            Some(existing) => {
                self.versions.save_version(&existing, user_id, None).await?;
                connection.version = existing.version + 1;
                connection.date_created = existing.date_created;
                connection.created_by_user_id = existing.created_by_user_id;
            }
            None => {
                connection.version = 1;
                connection.date_created = now;
                connection.created_by_user_id = user_id;
            }
        }
        connection.date_modified = now;
        connection.modified_by_user_id = user_id;

        self.connections
            .write()
            .await
            .insert(connection.id, connection.clone());
        debug!(id = %connection.id, version = connection.version, "Saved connection");
        Ok(connection)
    }

    /// Delete a connection and its version history.
    pub async fn delete_connection(&self, id: Uuid) -> VersoResult<bool> {
        self.versions.delete_versions(id, CONNECTION_ENTITY_TYPE).await?;
        Ok(self.connections.write().await.remove(&id).is_some())
    }

    pub async fn get_connection_version_history(
        &self,
        id: Uuid,
        skip: usize,
        take: usize,
    ) -> VersoResult<VersionHistoryPage> {
        self.versions
            .get_version_history(id, CONNECTION_ENTITY_TYPE, skip, take)
            .await
    }

    pub async fn get_connection_version_snapshot(&self, id: Uuid, version: u32) -> VersoResult<Option<Connection>> {
        self.versions.get_version_snapshot::<Connection>(id, version).await
    }

    /// Restore `version` as a new version of the connection.
    pub async fn rollback_connection(
        &self,
        id: Uuid,
        version: u32,
        user_id: Option<Uuid>,
    ) -> VersoResult<Connection> {
        let current = self
            .get_connection(id)
            .await
            .ok_or_else(|| VersoError::entity_not_found(CONNECTION_ENTITY_TYPE, id))?;

        let snapshot = self
            .get_connection_version_snapshot(id, version)
            .await?
            .ok_or_else(|| VersoError::version_unavailable(id, CONNECTION_ENTITY_TYPE, version))?;

        info!(%id, from = current.version, to = version, "Rolling back connection");
        let restored = Connection {
            id,
            alias: snapshot.alias,
            name: snapshot.name,
            provider_id: snapshot.provider_id,
            settings: snapshot.settings,
            is_active: snapshot.is_active,
            ..current
        };
        self.save_connection(restored, user_id).await
    }
}
