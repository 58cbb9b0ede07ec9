//! Integration tests for entity versioning through the owning services.
//!
//! Each test wires the real connection and context services to an
//! `EntityVersionService` and drives versioning through the public API.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use verso_core::diff::{JsonDiff, MASK_TOKEN};
use verso_core::{
    AdapterRegistry, CleanupPolicy, EntityVersion, EntityVersionRepository, EntityVersionService,
    InMemoryVersionRepository, SqliteVersionRepository, ValueChange, VersionRecord, VersoError,
    VersoResult,
};
use verso_entities::{
    register_all, Connection, Context, ContextResource, EntityServices, InjectionMode,
    ProviderCatalog, SecretProtector, SettingsField, SettingsSchema,
};

/// Reversible protector so tests can tell protected text from plaintext.
struct Hex;

impl SecretProtector for Hex {
    fn protect(&self, plaintext: &str) -> VersoResult<String> {
        Ok(plaintext.bytes().map(|b| format!("{:02x}", b)).collect())
    }

    fn unprotect(&self, protected: &str) -> Option<String> {
        let bytes = (0..protected.len())
            .step_by(2)
            .map(|i| protected.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
            .collect::<Option<Vec<u8>>>()?;
        String::from_utf8(bytes).ok()
    }
}

fn catalog() -> Arc<ProviderCatalog> {
    Arc::new(ProviderCatalog::new().with_provider(
        "openai",
        SettingsSchema::new(vec![
            SettingsField::new("endpoint"),
            SettingsField::new("apiKey").sensitive(),
        ]),
    ))
}

fn setup_with(repository: Arc<dyn EntityVersionRepository>) -> (Arc<EntityVersionService>, EntityServices) {
    let versions = Arc::new(EntityVersionService::new(repository, Arc::new(AdapterRegistry::new())));
    let services = register_all(&versions, catalog(), Arc::new(Hex), JsonDiff::new());
    (versions, services)
}

fn setup() -> (Arc<EntityVersionService>, EntityServices) {
    setup_with(Arc::new(InMemoryVersionRepository::new()))
}

fn brand_context() -> Context {
    Context::new("ctx", "Ctx")
        .with_resource(
            ContextResource::new("text")
                .with_name("Tone")
                .with_data(json!({"content": "Be concise"})),
        )
        .with_resource(
            ContextResource::new("document")
                .with_name("Glossary")
                .with_sort_order(1)
                .with_injection_mode(InjectionMode::OnDemand),
        )
}

async fn rename(services: &EntityServices, id: Uuid, name: &str) -> Context {
    let mut context = services.contexts.get_context(id).await.unwrap();
    context.name = name.to_string();
    services.contexts.save_context(context, None).await.unwrap()
}

#[tokio::test]
async fn test_each_update_records_one_version() {
    let (versions, services) = setup();
    let created = services.contexts.save_context(brand_context(), None).await.unwrap();
    assert_eq!(created.version, 1);

    for n in 2..=5 {
        let saved = rename(&services, created.id, &format!("Ctx {}", n)).await;
        assert_eq!(saved.version, n);
    }

    let history = versions.get_version_history(created.id, "Context", 0, 100).await.unwrap();
    assert_eq!(history.total, 4);
    let numbers: Vec<u32> = history.items.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![4, 3, 2, 1]);
}

#[tokio::test]
async fn test_live_version_is_synthesized_until_superseded() {
    let (versions, services) = setup();
    let user = Uuid::new_v4();
    let id = services.contexts.save_context(brand_context(), Some(user)).await.unwrap().id;
    rename(&services, id, "Ctx 2").await;
    rename(&services, id, "Ctx 3").await;

    let record = versions.get_version(id, "context", 3).await.unwrap().unwrap();
    assert!(record.is_live());
    assert_eq!(record.version(), 3);
    assert_eq!(record.entity_type(), "Context");
    assert!(matches!(record, VersionRecord::Live(_)));

    assert!(versions.get_version(id, "Context", 4).await.unwrap().is_none());

    rename(&services, id, "Ctx 4").await;
    let record = versions.get_version(id, "Context", 3).await.unwrap().unwrap();
    assert!(!record.is_live());

    let restored = versions.get_version_snapshot::<Context>(id, 3).await.unwrap().unwrap();
    assert_eq!(restored.name, "Ctx 3");
    assert_eq!(restored.created_by_user_id, Some(user));
}

#[tokio::test]
async fn test_single_field_change_yields_one_change() {
    let (versions, services) = setup();
    let id = services.contexts.save_context(brand_context(), None).await.unwrap().id;
    rename(&services, id, "Renamed").await;

    let comparison = versions.compare_versions(id, "Context", 1, 2).await.unwrap().unwrap();
    assert_eq!(comparison.changes, vec![ValueChange::modified("Name", "Ctx", "Renamed")]);

    let same = versions.compare_versions(id, "Context", 2, 2).await.unwrap().unwrap();
    assert!(same.is_identical());

    assert!(versions.compare_versions(id, "Context", 1, 9).await.unwrap().is_none());
}

#[tokio::test]
async fn test_snapshot_round_trip_through_service() {
    let (versions, services) = setup();
    let saved = services.contexts.save_context(brand_context(), None).await.unwrap();

    let snapshot = versions.create_snapshot(&saved).unwrap();
    let restored: Context = versions.restore_from_snapshot(&snapshot).unwrap().unwrap();
    assert_eq!(restored, saved);
    assert_eq!(versions.create_snapshot(&restored).unwrap(), snapshot);
}

#[tokio::test]
async fn test_rollback_creates_new_version() {
    let (versions, services) = setup();
    let id = services.contexts.save_context(brand_context(), None).await.unwrap().id;
    rename(&services, id, "Ctx 2").await;
    rename(&services, id, "Ctx 3").await;

    versions.rollback(id, "Context", 1, Some(Uuid::new_v4())).await.unwrap();

    let current = services.contexts.get_context(id).await.unwrap();
    assert_eq!(current.version, 4);
    assert_eq!(current.name, "Ctx");
    assert_eq!(current.resources.len(), 2);

    let history = services.contexts.get_context_version_history(id, 0, 10).await.unwrap();
    assert_eq!(history.total, 3);
}

#[tokio::test]
async fn test_rollback_to_missing_version() {
    let (_versions, services) = setup();
    let id = services.contexts.save_context(brand_context(), None).await.unwrap().id;

    let err = services.contexts.rollback_context(id, 7, None).await.unwrap_err();
    assert!(matches!(err, VersoError::VersionUnavailable { .. }));

    let err = services.contexts.rollback_context(Uuid::new_v4(), 1, None).await.unwrap_err();
    assert!(matches!(err, VersoError::NotFound { .. }));
}

#[tokio::test]
async fn test_unknown_entity_type_lists_supported() {
    let (versions, _services) = setup();

    let err = versions
        .get_version_history(Uuid::new_v4(), "Agent", 0, 10)
        .await
        .unwrap_err();
    match err {
        VersoError::UnknownEntityType { entity_type, supported } => {
            assert_eq!(entity_type, "Agent");
            assert_eq!(supported, vec!["Connection".to_string(), "Context".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_duplicate_version_is_rejected() {
    let (versions, services) = setup();
    let saved = services.contexts.save_context(brand_context(), None).await.unwrap();

    versions.save_version(&saved, None, Some("first")).await.unwrap();
    let err = versions.save_version(&saved, None, Some("second")).await.unwrap_err();
    assert!(err.is_conflict());

    let stored = versions.get_version(saved.id, "Context", 1).await.unwrap().unwrap();
    match stored {
        VersionRecord::Stored(v) => assert_eq!(v.change_description.as_deref(), Some("first")),
        VersionRecord::Live(_) => panic!("expected stored version"),
    }
}

#[tokio::test]
async fn test_connection_secrets_are_protected_and_masked() {
    let (versions, services) = setup();
    let connection = Connection::new("main", "Main", "openai")
        .with_settings(json!({"endpoint": "https://api.example.com", "apiKey": "sk-1"}));
    let id = services.connections.save_connection(connection, None).await.unwrap().id;

    let mut updated = services.connections.get_connection(id).await.unwrap();
    updated.settings = Some(json!({"endpoint": "https://api.example.com", "apiKey": "sk-2"}));
    services.connections.save_connection(updated, None).await.unwrap();

    let stored = versions
        .repository()
        .get_version(id, "Connection", 1)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.snapshot.contains("sk-1"));
    assert!(stored.snapshot.contains("ENC:"));

    let comparison = versions.compare_versions(id, "Connection", 1, 2).await.unwrap().unwrap();
    assert_eq!(
        comparison.changes,
        vec![ValueChange::modified("Settings.apiKey", MASK_TOKEN, MASK_TOKEN)]
    );

    let restored = services
        .connections
        .get_connection_version_snapshot(id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.settings.unwrap()["apiKey"], "sk-1");
}

#[tokio::test]
async fn test_connection_validation() {
    let (_versions, services) = setup();
    services
        .connections
        .save_connection(Connection::new("main", "Main", "openai"), None)
        .await
        .unwrap();

    let err = services
        .connections
        .save_connection(Connection::new("MAIN", "Other", "openai"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VersoError::Validation { .. }));

    let err = services
        .connections
        .save_connection(Connection::new("other", "Other", "missing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VersoError::Validation { .. }));
}

#[tokio::test]
async fn test_delete_removes_history() {
    let (versions, services) = setup();
    let id = services.contexts.save_context(brand_context(), None).await.unwrap().id;
    rename(&services, id, "Ctx 2").await;

    assert!(services.contexts.delete_context(id).await.unwrap());
    let history = versions.get_version_history(id, "Context", 0, 10).await.unwrap();
    assert_eq!(history.total, 0);
    assert!(versions.get_version(id, "Context", 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cleanup_keeps_newest_versions() {
    let (versions, _services) = setup();
    let id = Uuid::new_v4();
    for version in 1..=8 {
        versions
            .save_version_raw(id, "Context", version, "{}", None, None)
            .await
            .unwrap();
    }

    versions.set_cleanup_policy(CleanupPolicy::default().with_max_versions_per_entity(5));
    let result = versions.cleanup_versions(&CancellationToken::new()).await.unwrap();
    assert!(!result.was_skipped);
    assert_eq!(result.deleted_by_age, 0);
    assert_eq!(result.deleted_by_count, 3);
    assert_eq!(result.remaining_versions, 5);

    let history = versions.get_version_history(id, "Context", 0, 10).await.unwrap();
    let numbers: Vec<u32> = history.items.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![8, 7, 6, 5, 4]);
}

#[tokio::test]
async fn test_cleanup_by_age() {
    let (versions, _services) = setup();
    let id = Uuid::new_v4();
    let repository = versions.repository();
    repository
        .save_version(&EntityVersion::new(id, "Context", 1, "{}").created_at(Utc::now() - Duration::days(40)))
        .await
        .unwrap();
    repository
        .save_version(&EntityVersion::new(id, "Context", 2, "{}"))
        .await
        .unwrap();

    versions.set_cleanup_policy(
        CleanupPolicy::default()
            .with_max_versions_per_entity(0)
            .with_retention_days(30),
    );
    let result = versions.cleanup_versions(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.deleted_by_age, 1);
    assert_eq!(result.deleted_by_count, 0);
    assert_eq!(result.remaining_versions, 1);
}

#[tokio::test]
async fn test_sqlite_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.db");

    let id = {
        let repository = Arc::new(SqliteVersionRepository::new(&path).unwrap());
        let (_versions, services) = setup_with(repository);
        let id = services.contexts.save_context(brand_context(), None).await.unwrap().id;
        rename(&services, id, "Ctx 2").await;
        rename(&services, id, "Ctx 3").await;
        id
    };

    let repository = SqliteVersionRepository::new(&path).unwrap();
    assert_eq!(repository.count_versions(id, "Context").await.unwrap(), 2);
    let first = repository.get_version(id, "Context", 1).await.unwrap().unwrap();
    assert!(first.snapshot.contains("\"name\":\"Ctx\""));
}
