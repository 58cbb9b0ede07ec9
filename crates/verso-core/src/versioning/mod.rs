//! Entity versioning: snapshot-on-save history, comparison, rollback and retention cleanup
//!
//! Owning services record the state an entity is about to lose by calling
//! [`EntityVersionService::save_version`] before persisting an update. All
//! read paths treat the live entity as the newest version.

mod adapter;
mod cleanup;
mod memory;
mod registry;
mod scheduler;
mod service;
mod store;
mod version;

pub use adapter::{AnyEntity, EntityAdapter, LiveEntity, VersionableEntity, VersionableEntityAdapter};
pub use cleanup::{
    select_excess, select_older_than, CleanupPlan, CleanupPolicy, CleanupResult, CleanupSelection,
    SkipReason,
};
pub use memory::InMemoryVersionRepository;
pub use registry::AdapterRegistry;
pub use scheduler::{AlwaysRun, CleanupGate, CleanupRunner, CleanupSchedulerConfig, VersionCleanupScheduler};
pub use service::EntityVersionService;
pub use store::{EntityVersionRepository, SqliteVersionRepository};
pub use version::{
    EntityVersion, LiveVersion, VersionComparison, VersionHistoryPage, VersionKey, VersionRecord,
};
