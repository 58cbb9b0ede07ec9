//! Contexts: named, ordered sets of resources injected into prompts.
//!
//! [`ContextService`] owns contexts in memory and records a version before
//! every update.

mod adapter;

pub use adapter::ContextAdapter;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use verso_core::diff::JsonDiff;
use verso_core::versioning::VersionHistoryPage;
use verso_core::{EntityVersionService, VersionableEntity, VersoError, VersoResult};

/// Type name contexts are versioned under.
pub const CONTEXT_ENTITY_TYPE: &str = "Context";

/// When a resource's content is made available.
///
/// Serialized by name; the numeric codes `0` and `1` are accepted when reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum InjectionMode {
    /// Injected into every request
    #[default]
    Always,
    /// Fetched only when asked for
    OnDemand,
}

impl InjectionMode {
    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Always),
            1 => Some(Self::OnDemand),
            _ => None,
        }
    }
}

impl Serialize for InjectionMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InjectionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModeVisitor;

        impl de::Visitor<'_> for ModeVisitor {
            type Value = InjectionMode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an injection mode name or code")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<InjectionMode, E> {
                InjectionMode::from_str(v).map_err(|_| E::unknown_variant(v, &["Always", "OnDemand"]))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<InjectionMode, E> {
                InjectionMode::from_code(v).ok_or_else(|| E::custom(format!("unknown injection mode code {}", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<InjectionMode, E> {
                let code = i64::try_from(v).map_err(|_| E::custom("injection mode code out of range"))?;
                self.visit_i64(code)
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

/// One resource inside a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResource {
    pub id: Uuid,
    pub resource_type_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort_order: i32,
    pub data: Option<Value>,
    pub injection_mode: InjectionMode,
}

impl ContextResource {
    pub fn new(resource_type_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            resource_type_id: resource_type_id.into(),
            name: None,
            description: None,
            sort_order: 0,
            data: None,
            injection_mode: InjectionMode::default(),
        }
    }

    /// Builder: set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set the sort order
    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Builder: set the resource data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builder: set the injection mode
    pub fn with_injection_mode(mut self, mode: InjectionMode) -> Self {
        self.injection_mode = mode;
        self
    }

    /// Label used when reporting changes to this resource.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.resource_type_id)
    }
}

/// A named set of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: Uuid,
    pub alias: String,
    pub name: String,
    pub resources: Vec<ContextResource>,
    pub version: u32,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    pub modified_by_user_id: Option<Uuid>,
}

impl Context {
    /// Create an unsaved context without resources.
    pub fn new(alias: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::nil(),
            alias: alias.into(),
            name: name.into(),
            resources: Vec::new(),
            version: 1,
            date_created: now,
            date_modified: now,
            created_by_user_id: None,
            modified_by_user_id: None,
        }
    }

    /// Builder: append a resource
    pub fn with_resource(mut self, resource: ContextResource) -> Self {
        self.resources.push(resource);
        self
    }
}

impl VersionableEntity for Context {
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

/// In-process owning service for contexts.
pub struct ContextService {
    contexts: RwLock<HashMap<Uuid, Context>>,
    versions: Arc<EntityVersionService>,
}

impl ContextService {
    pub fn new(versions: Arc<EntityVersionService>) -> Arc<Self> {
        Arc::new(Self {
            contexts: RwLock::new(HashMap::new()),
            versions,
        })
    }

    /// Create the service and register its adapter with the versioning service.
    pub fn register(versions: Arc<EntityVersionService>, diff: JsonDiff) -> Arc<Self> {
        let service = Self::new(versions);
        service
            .versions
            .registry()
            .register(ContextAdapter::new(&service, diff));
        service
    }

    pub async fn get_context(&self, id: Uuid) -> Option<Context> {
        self.contexts.read().await.get(&id).cloned()
    }

    pub async fn get_context_by_alias(&self, alias: &str) -> Option<Context> {
        self.contexts
            .read()
            .await
            .values()
            .find(|c| c.alias.eq_ignore_ascii_case(alias))
            .cloned()
    }

    /// All contexts, ordered by name.
    pub async fn get_contexts(&self) -> Vec<Context> {
        let mut contexts: Vec<Context> = self.contexts.read().await.values().cloned().collect();
        contexts.sort_by(|a, b| a.name.cmp(&b.name));
        contexts
    }

    /// Create or update a context.
    ///
    /// Resources without an id get one and are kept in sort order.
    pub async fn save_context(&self, mut context: Context, user_id: Option<Uuid>) -> VersoResult<Context> {
        if context.id.is_nil() {
            context.id = Uuid::new_v4();
        }

        if context.alias.trim().is_empty() {
            return Err(VersoError::validation("Context alias is required"));
        }

        if let Some(other) = self.get_context_by_alias(&context.alias).await {
            if other.id != context.id {
                return Err(VersoError::duplicate_alias(CONTEXT_ENTITY_TYPE, &context.alias));
            }
        }

        for resource in &mut context.resources {
            if resource.id.is_nil() {
                resource.id = Uuid::new_v4();
            }
        }
        context.resources.sort_by_key(|r| r.sort_order);

        let now = Utc::now();
        match self.get_context(context.id).await {
            Some(existing) => {
                self.versions.save_version(&existing, user_id, None).await?;
                context.version = existing.version + 1;
                context.date_created = existing.date_created;
                context.created_by_user_id = existing.created_by_user_id;
            }
            None => {
                context.version = 1;
                context.date_created = now;
                context.created_by_user_id = user_id;
            }
        }
        context.date_modified = now;
        context.modified_by_user_id = user_id;

        self.contexts.write().await.insert(context.id, context.clone());
        debug!(id = %context.id, version = context.version, "Saved context");
        Ok(context)
    }

    /// Delete a context and its version history.
    pub async fn delete_context(&self, id: Uuid) -> VersoResult<bool> {
        self.versions.delete_versions(id, CONTEXT_ENTITY_TYPE).await?;
        Ok(self.contexts.write().await.remove(&id).is_some())
    }

    pub async fn get_context_version_history(
        &self,
        id: Uuid,
        skip: usize,
        take: usize,
    ) -> VersoResult<VersionHistoryPage> {
        self.versions
            .get_version_history(id, CONTEXT_ENTITY_TYPE, skip, take)
            .await
    }

    pub async fn get_context_version_snapshot(&self, id: Uuid, version: u32) -> VersoResult<Option<Context>> {
        self.versions.get_version_snapshot::<Context>(id, version).await
    }

    /// Restore `version` as a new version of the context.
    pub async fn rollback_context(&self, id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<Context> {
        let current = self
            .get_context(id)
            .await
            .ok_or_else(|| VersoError::entity_not_found(CONTEXT_ENTITY_TYPE, id))?;

        let snapshot = self
            .get_context_version_snapshot(id, version)
            .await?
            .ok_or_else(|| VersoError::version_unavailable(id, CONTEXT_ENTITY_TYPE, version))?;

        info!(%id, from = current.version, to = version, "Rolling back context");
        let restored = Context {
            id,
            alias: snapshot.alias,
            name: snapshot.name,
            resources: snapshot.resources,
            ..current
        };
        self.save_context(restored, user_id).await
    }
}
