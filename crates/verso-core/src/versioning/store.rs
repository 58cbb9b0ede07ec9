//! Version storage layer.
//!
//! Defines the repository contract the versioning service persists through and
//! provides the SQLite-backed implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorCode, VersoError, VersoResult};
use crate::versioning::EntityVersion;

/// Persistence contract for version records keyed by `(entity_id, entity_type, version)`.
///
/// Implementations must enforce key uniqueness themselves: a second insert of
/// an existing key fails with [`VersoError::Conflict`] and never replaces the
/// stored snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityVersionRepository: Send + Sync {
    /// Get a specific version by number
    async fn get_version(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
    ) -> VersoResult<Option<EntityVersion>>;

    /// Get a page of versions for an entity, highest version first
    async fn get_version_history(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        skip: usize,
        take: usize,
    ) -> VersoResult<Vec<EntityVersion>>;

    /// Count stored versions of one entity
    async fn count_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize>;

    /// Insert a new version; fails with a conflict if the key already exists
    async fn save_version(&self, version: &EntityVersion) -> VersoResult<()>;

    /// Delete all versions for an entity
    async fn delete_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize>;

    /// Delete all versions recorded strictly before `threshold`
    async fn delete_versions_older_than(&self, threshold: DateTime<Utc>) -> VersoResult<usize>;

    /// Keep only the `max_per_entity` highest versions of every entity
    async fn delete_excess_versions(&self, max_per_entity: u32) -> VersoResult<usize>;

    /// Count total versions in store
    async fn count_all(&self) -> VersoResult<usize>;
}

/// SQLite-backed version repository.
pub struct SqliteVersionRepository {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "SELECT id, entity_id, entity_type, version, snapshot, date_created, \
                              created_by_user_id, change_description FROM entity_versions";

impl SqliteVersionRepository {
    /// Open (or create) a repository at the given path. `":memory:"` opens an in-memory database.
    pub fn new(path: impl AsRef<Path>) -> VersoResult<Self> {
        let path = path.as_ref();
        let conn = if path.to_str() == Some(":memory:") {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)
        }
        .map_err(|e| VersoError::Database {
            message: format!("failed to open version database: {}", e),
            code: ErrorCode::DbConnectionFailed,
            source: Some(Box::new(e)),
        })?;

        debug!(path = %path.display(), "Opened version repository");
        let repository = Self {
            conn: Mutex::new(conn),
        };
        repository.init_schema()?;
        Ok(repository)
    }

    /// Create an in-memory repository (for testing)
    pub fn in_memory() -> VersoResult<Self> {
        Self::new(":memory:")
    }

    fn conn(&self) -> VersoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VersoError::database("version database lock poisoned"))
    }

    fn init_schema(&self) -> VersoResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entity_versions (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                version INTEGER NOT NULL,
                snapshot TEXT NOT NULL,
                date_created TEXT NOT NULL,
                created_by_user_id TEXT,
                change_description TEXT,
                UNIQUE(entity_id, entity_type, version)
            );

            -- Index for history paging
            CREATE INDEX IF NOT EXISTS idx_entity_versions_entity
                ON entity_versions(entity_id, entity_type, version DESC);

            -- Index for age-based cleanup
            CREATE INDEX IF NOT EXISTS idx_entity_versions_created
                ON entity_versions(date_created);
        "#,
        )?;
        Ok(())
    }

    /// Timestamps are stored in a fixed-width UTC form so text order matches time order.
    fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_uuid(value: &str) -> VersoResult<Uuid> {
        Uuid::parse_str(value).map_err(|e| VersoError::database(format!("invalid uuid '{}': {}", value, e)))
    }

    fn row_to_version(row: &rusqlite::Row<'_>) -> VersoResult<EntityVersion> {
        let id: String = row.get(0)?;
        let entity_id: String = row.get(1)?;
        let entity_type: String = row.get(2)?;
        let version: u32 = row.get(3)?;
        let snapshot: String = row.get(4)?;
        let date_created: String = row.get(5)?;
        let created_by_user_id: Option<String> = row.get(6)?;
        let change_description: Option<String> = row.get(7)?;

        Ok(EntityVersion {
            id: Self::parse_uuid(&id)?,
            entity_id: Self::parse_uuid(&entity_id)?,
            entity_type,
            version,
            snapshot,
            date_created: DateTime::parse_from_rfc3339(&date_created)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| VersoError::database(e.to_string()))?,
            created_by_user_id: created_by_user_id
                .as_deref()
                .map(Self::parse_uuid)
                .transpose()?,
            change_description,
        })
    }
}

#[async_trait]
impl EntityVersionRepository for SqliteVersionRepository {
    async fn get_version(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        version: u32,
    ) -> VersoResult<Option<EntityVersion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE entity_id = ?1 AND entity_type = ?2 AND version = ?3",
            SELECT_COLUMNS
        ))?;

        let version = stmt
            .query_row(params![entity_id.to_string(), entity_type, version], |row| {
                Ok(Self::row_to_version(row))
            })
            .optional()?
            .transpose()?;
        Ok(version)
    }

    async fn get_version_history(
        &self,
        entity_id: Uuid,
        entity_type: &str,
        skip: usize,
        take: usize,
    ) -> VersoResult<Vec<EntityVersion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE entity_id = ?1 AND entity_type = ?2 ORDER BY version DESC LIMIT ?3 OFFSET ?4",
            SELECT_COLUMNS
        ))?;

        let results = stmt.query_map(
            params![entity_id.to_string(), entity_type, take as i64, skip as i64],
            |row| Ok(Self::row_to_version(row)),
        )?;

        let versions = results
            .map(|r| r.map_err(VersoError::from).and_then(|inner| inner))
            .collect::<VersoResult<Vec<_>>>()?;
        Ok(versions)
    }

    async fn count_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_versions WHERE entity_id = ?1 AND entity_type = ?2",
            params![entity_id.to_string(), entity_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn save_version(&self, version: &EntityVersion) -> VersoResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO entity_versions
               (id, entity_id, entity_type, version, snapshot, date_created,
                created_by_user_id, change_description)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                version.id.to_string(),
                version.entity_id.to_string(),
                version.entity_type,
                version.version,
                version.snapshot,
                Self::format_timestamp(&version.date_created),
                version.created_by_user_id.map(|u| u.to_string()),
                version.change_description,
            ],
        )
        .map_err(|e| match VersoError::from(e) {
            VersoError::Conflict { .. } => {
                VersoError::version_conflict(version.entity_id, &version.entity_type, version.version)
            }
            other => other,
        })?;
        Ok(())
    }

    async fn delete_versions(&self, entity_id: Uuid, entity_type: &str) -> VersoResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM entity_versions WHERE entity_id = ?1 AND entity_type = ?2",
            params![entity_id.to_string(), entity_type],
        )?;
        Ok(count)
    }

    async fn delete_versions_older_than(&self, threshold: DateTime<Utc>) -> VersoResult<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM entity_versions WHERE date_created < ?1",
            params![Self::format_timestamp(&threshold)],
        )?;
        Ok(count)
    }

    async fn delete_excess_versions(&self, max_per_entity: u32) -> VersoResult<usize> {
        let conn = self.conn()?;

        // Rank versions per entity, newest first, and drop everything past the limit
        let count = conn.execute(
            r#"DELETE FROM entity_versions
               WHERE id IN (
                   SELECT id FROM (
                       SELECT id,
                              ROW_NUMBER() OVER (
                                  PARTITION BY entity_id, entity_type
                                  ORDER BY version DESC
                              ) AS row_num
                       FROM entity_versions
                   )
                   WHERE row_num > ?1
               )"#,
            params![max_per_entity],
        )?;
        Ok(count)
    }

    async fn count_all(&self) -> VersoResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entity_versions", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}
