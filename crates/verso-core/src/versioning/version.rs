//! Version record types.
//!
//! A stored [`EntityVersion`] captures the state an entity had just before it
//! was overwritten. The live entity is itself a version that has not been
//! historized yet; read APIs surface it as [`VersionRecord::Live`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::ValueChange;

/// Identity of a version: unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub entity_id: Uuid,
    pub entity_type: String,
    pub version: u32,
}

/// A persisted snapshot of an entity at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    /// Unique record identifier
    pub id: Uuid,
    /// Entity this version belongs to
    pub entity_id: Uuid,
    /// Stable entity type discriminator (e.g. "Connection")
    pub entity_type: String,
    /// Version number the entity had when this snapshot was taken
    pub version: u32,
    /// Serialized entity state, produced by the entity's adapter
    pub snapshot: String,
    /// When this version was recorded
    pub date_created: DateTime<Utc>,
    /// User who made the change (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<Uuid>,
    /// Optional description of the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
}

impl EntityVersion {
    /// Create a new version record stamped with the current time.
    pub fn new(
        entity_id: Uuid,
        entity_type: impl Into<String>,
        version: u32,
        snapshot: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            entity_type: entity_type.into(),
            version,
            snapshot: snapshot.into(),
            date_created: Utc::now(),
            created_by_user_id: None,
            change_description: None,
        }
    }

    /// Builder: set change description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.change_description = Some(desc.into());
        self
    }

    /// Builder: set the user who created this version
    pub fn created_by(mut self, user_id: Uuid) -> Self {
        self.created_by_user_id = Some(user_id);
        self
    }

    /// Builder: set the creation time
    pub fn created_at(mut self, date_created: DateTime<Utc>) -> Self {
        self.date_created = date_created;
        self
    }

    /// Key of this record.
    pub fn key(&self) -> VersionKey {
        VersionKey {
            entity_id: self.entity_id,
            entity_type: self.entity_type.clone(),
            version: self.version,
        }
    }
}

/// A version synthesized from the live entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveVersion {
    pub entity_id: Uuid,
    pub entity_type: String,
    pub version: u32,
    pub snapshot: String,
    /// The entity's last-modified timestamp
    pub date_created: DateTime<Utc>,
    /// The entity's last modifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_user_id: Option<Uuid>,
}

/// Either a persisted version or the not-yet-historized live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VersionRecord {
    Stored(EntityVersion),
    Live(LiveVersion),
}

impl VersionRecord {
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Stored(v) => v.entity_id,
            Self::Live(v) => v.entity_id,
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            Self::Stored(v) => &v.entity_type,
            Self::Live(v) => &v.entity_type,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Self::Stored(v) => v.version,
            Self::Live(v) => v.version,
        }
    }

    pub fn snapshot(&self) -> &str {
        match self {
            Self::Stored(v) => &v.snapshot,
            Self::Live(v) => &v.snapshot,
        }
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        match self {
            Self::Stored(v) => v.date_created,
            Self::Live(v) => v.date_created,
        }
    }

    pub fn created_by_user_id(&self) -> Option<Uuid> {
        match self {
            Self::Stored(v) => v.created_by_user_id,
            Self::Live(v) => v.created_by_user_id,
        }
    }

    /// Whether this record was synthesized from live state.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// Field-level comparison between two versions of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub entity_id: Uuid,
    pub entity_type: String,
    pub from_version: u32,
    pub to_version: u32,
    pub changes: Vec<ValueChange>,
}

impl VersionComparison {
    /// True when both versions hold the same logical state.
    pub fn is_identical(&self) -> bool {
        self.changes.is_empty()
    }
}

/// One page of version history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistoryPage {
    pub items: Vec<EntityVersion>,
    /// Total number of stored versions for the entity
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_version() {
        let id = Uuid::new_v4();
        let v = EntityVersion::new(id, "Context", 1, "{}");

        assert_eq!(v.entity_id, id);
        assert_eq!(v.entity_type, "Context");
        assert_eq!(v.version, 1);
        assert!(v.created_by_user_id.is_none());
        assert!(v.change_description.is_none());
        assert_ne!(v.id, Uuid::nil());
    }

    #[test]
    fn test_builder_methods() {
        let user = Uuid::new_v4();
        let at = Utc::now() - chrono::Duration::days(3);
        let v = EntityVersion::new(Uuid::new_v4(), "Connection", 2, "{}")
            .with_description("Rotated key")
            .created_by(user)
            .created_at(at);

        assert_eq!(v.change_description, Some("Rotated key".to_string()));
        assert_eq!(v.created_by_user_id, Some(user));
        assert_eq!(v.date_created, at);
    }

    #[test]
    fn test_record_accessors() {
        let id = Uuid::new_v4();
        let stored = VersionRecord::Stored(EntityVersion::new(id, "Context", 1, "{\"a\":1}"));
        let live = VersionRecord::Live(LiveVersion {
            entity_id: id,
            entity_type: "Context".to_string(),
            version: 2,
            snapshot: "{\"a\":2}".to_string(),
            date_created: Utc::now(),
            created_by_user_id: None,
        });

        assert!(!stored.is_live());
        assert!(live.is_live());
        assert_eq!(stored.version(), 1);
        assert_eq!(live.version(), 2);
        assert_eq!(live.snapshot(), "{\"a\":2}");
        assert_eq!(stored.entity_id(), live.entity_id());
    }

    #[test]
    fn test_record_serializes_source_tag() {
        let stored = VersionRecord::Stored(EntityVersion::new(Uuid::new_v4(), "Context", 1, "{}"));
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["source"], "stored");
    }
}
