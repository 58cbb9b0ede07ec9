//! Entity adapter contract.
//!
//! Each versioned entity type provides a [`VersionableEntityAdapter`] that knows
//! how to snapshot, restore and compare that type and how to push a restored
//! state back through the owning service. The versioning service only sees the
//! type-erased [`EntityAdapter`], implemented for every typed adapter.

use std::any::{Any, TypeId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::diff::ValueChange;
use crate::error::{VersoError, VersoResult};

/// Boxed entity of some registered type.
pub type AnyEntity = Box<dyn Any + Send + Sync>;

/// Contract implemented by every versioned domain type.
pub trait VersionableEntity: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Starts at 1 and grows by exactly one per saved update.
    fn version(&self) -> u32;

    fn date_created(&self) -> DateTime<Utc>;

    fn date_modified(&self) -> DateTime<Utc>;

    fn created_by_user_id(&self) -> Option<Uuid>;

    fn modified_by_user_id(&self) -> Option<Uuid>;
}

/// Per-type strategy for snapshotting, restoring, diffing and rolling back.
#[async_trait]
pub trait VersionableEntityAdapter: Send + Sync + 'static {
    type Entity: VersionableEntity;

    /// Stable type discriminator stored with every version, e.g. `"Context"`.
    fn entity_type_name(&self) -> &'static str;

    /// Serialize the versionable state of an entity.
    ///
    /// Re-snapshotting a restored entity must reproduce the same document.
    fn create_snapshot(&self, entity: &Self::Entity) -> VersoResult<String>;

    /// Rebuild an entity from a snapshot.
    ///
    /// Malformed or unreadable snapshots yield `None`; missing fields take defaults.
    fn restore_from_snapshot(&self, snapshot: &str) -> Option<Self::Entity>;

    /// Field-level differences between two states of the same entity.
    fn compare_versions(&self, from: &Self::Entity, to: &Self::Entity) -> Vec<ValueChange>;

    /// Restore `version` and save it through the owning service, producing a new version.
    async fn rollback(&self, entity_id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<()>;

    /// Current live state of an entity.
    async fn get_entity(&self, entity_id: Uuid) -> VersoResult<Option<Self::Entity>>;
}

/// A live entity together with its version header.
pub struct LiveEntity {
    pub entity_id: Uuid,
    pub version: u32,
    pub date_modified: DateTime<Utc>,
    pub modified_by_user_id: Option<Uuid>,
    entity: AnyEntity,
}

impl LiveEntity {
    pub fn from_entity<E: VersionableEntity>(entity: E) -> Self {
        Self {
            entity_id: entity.id(),
            version: entity.version(),
            date_modified: entity.date_modified(),
            modified_by_user_id: entity.modified_by_user_id(),
            entity: Box::new(entity),
        }
    }

    /// Borrow the erased entity.
    pub fn entity(&self) -> &(dyn Any + Send + Sync) {
        self.entity.as_ref()
    }

    /// Recover the typed entity.
    pub fn downcast<E: 'static>(self) -> Option<E> {
        self.entity.downcast::<E>().ok().map(|boxed| *boxed)
    }
}

impl std::fmt::Debug for LiveEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEntity")
            .field("entity_id", &self.entity_id)
            .field("version", &self.version)
            .field("date_modified", &self.date_modified)
            .finish_non_exhaustive()
    }
}

/// Object-safe view of a [`VersionableEntityAdapter`].
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    fn entity_type(&self) -> &'static str;

    fn entity_type_id(&self) -> TypeId;

    fn snapshot_any(&self, entity: &(dyn Any + Send + Sync)) -> VersoResult<String>;

    fn restore_any(&self, snapshot: &str) -> Option<AnyEntity>;

    /// `None` when either side is not this adapter's entity type.
    fn compare_any(
        &self,
        from: &(dyn Any + Send + Sync),
        to: &(dyn Any + Send + Sync),
    ) -> Option<Vec<ValueChange>>;

    async fn get_live(&self, entity_id: Uuid) -> VersoResult<Option<LiveEntity>>;

    async fn rollback_to(&self, entity_id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<()>;
}

#[async_trait]
impl<A> EntityAdapter for A
where
    A: VersionableEntityAdapter,
{
    fn entity_type(&self) -> &'static str {
        self.entity_type_name()
    }

    fn entity_type_id(&self) -> TypeId {
        TypeId::of::<A::Entity>()
    }

    fn snapshot_any(&self, entity: &(dyn Any + Send + Sync)) -> VersoResult<String> {
        let entity = entity.downcast_ref::<A::Entity>().ok_or_else(|| {
            VersoError::Internal(format!(
                "{} adapter received an entity of another type",
                self.entity_type_name()
            ))
        })?;
        self.create_snapshot(entity)
    }

    fn restore_any(&self, snapshot: &str) -> Option<AnyEntity> {
        self.restore_from_snapshot(snapshot)
            .map(|entity| Box::new(entity) as AnyEntity)
    }

    fn compare_any(
        &self,
        from: &(dyn Any + Send + Sync),
        to: &(dyn Any + Send + Sync),
    ) -> Option<Vec<ValueChange>> {
        let from = from.downcast_ref::<A::Entity>()?;
        let to = to.downcast_ref::<A::Entity>()?;
        Some(self.compare_versions(from, to))
    }

    async fn get_live(&self, entity_id: Uuid) -> VersoResult<Option<LiveEntity>> {
        Ok(self.get_entity(entity_id).await?.map(LiveEntity::from_entity))
    }

    async fn rollback_to(&self, entity_id: Uuid, version: u32, user_id: Option<Uuid>) -> VersoResult<()> {
        self.rollback(entity_id, version, user_id).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A minimal entity and adapter used by the versioning unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Note {
        pub id: Uuid,
        pub version: u32,
        pub title: String,
        pub body: String,
        pub date_modified: DateTime<Utc>,
    }

    impl Note {
        pub fn new(title: &str) -> Self {
            Self {
                id: Uuid::new_v4(),
                version: 1,
                title: title.to_string(),
                body: String::new(),
                date_modified: Utc::now(),
            }
        }
    }

    impl VersionableEntity for Note {
        fn id(&self) -> Uuid {
            self.id
        }
        fn version(&self) -> u32 {
            self.version
        }
        fn date_created(&self) -> DateTime<Utc> {
            self.date_modified
        }
        fn date_modified(&self) -> DateTime<Utc> {
            self.date_modified
        }
        fn created_by_user_id(&self) -> Option<Uuid> {
            None
        }
        fn modified_by_user_id(&self) -> Option<Uuid> {
            None
        }
    }

    /// Adapter over a shared map standing in for the owning service.
    #[derive(Default)]
    pub struct NoteAdapter {
        pub live: Mutex<HashMap<Uuid, Note>>,
        pub rollbacks: Mutex<Vec<(Uuid, u32)>>,
    }

    impl NoteAdapter {
        pub fn put(&self, note: Note) {
            self.live.lock().unwrap().insert(note.id, note);
        }
    }

    #[async_trait]
    impl VersionableEntityAdapter for NoteAdapter {
        type Entity = Note;

        fn entity_type_name(&self) -> &'static str {
            "Note"
        }

        fn create_snapshot(&self, entity: &Note) -> VersoResult<String> {
            Ok(serde_json::to_string(entity)?)
        }

        fn restore_from_snapshot(&self, snapshot: &str) -> Option<Note> {
            serde_json::from_str(snapshot).ok()
        }

        fn compare_versions(&self, from: &Note, to: &Note) -> Vec<ValueChange> {
            let mut changes = Vec::new();
            if from.title != to.title {
                changes.push(ValueChange::modified("Title", &from.title, &to.title));
            }
            if from.body != to.body {
                changes.push(ValueChange::modified("Body", &from.body, &to.body));
            }
            changes
        }

        async fn rollback(&self, entity_id: Uuid, version: u32, _user_id: Option<Uuid>) -> VersoResult<()> {
            self.rollbacks.lock().unwrap().push((entity_id, version));
            Ok(())
        }

        async fn get_entity(&self, entity_id: Uuid) -> VersoResult<Option<Note>> {
            Ok(self.live.lock().unwrap().get(&entity_id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{Note, NoteAdapter};
    use super::*;

    #[test]
    fn test_erased_snapshot_round_trip() {
        let adapter = NoteAdapter::default();
        let note = Note::new("hello");

        let snapshot = adapter.snapshot_any(&note).unwrap();
        let restored = adapter.restore_any(&snapshot).unwrap();
        let restored = restored.downcast_ref::<Note>().unwrap();
        assert_eq!(restored, &note);
    }

    #[test]
    fn test_erased_calls_reject_foreign_types() {
        let adapter = NoteAdapter::default();
        let note = Note::new("hello");

        assert!(adapter.snapshot_any(&42u32).is_err());
        assert!(adapter.compare_any(&note, &"text").is_none());
        assert_eq!(adapter.entity_type_id(), TypeId::of::<Note>());
    }

    #[test]
    fn test_restore_any_malformed() {
        let adapter = NoteAdapter::default();
        assert!(adapter.restore_any("{not json").is_none());
    }

    #[tokio::test]
    async fn test_get_live_carries_header() {
        let adapter = NoteAdapter::default();
        let mut note = Note::new("hello");
        note.version = 4;
        adapter.put(note.clone());

        let live = adapter.get_live(note.id).await.unwrap().unwrap();
        assert_eq!(live.entity_id, note.id);
        assert_eq!(live.version, 4);
        assert_eq!(live.downcast::<Note>(), Some(note));

        assert!(adapter.get_live(Uuid::new_v4()).await.unwrap().is_none());
    }
}
