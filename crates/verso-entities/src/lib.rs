//! verso-entities - Versioned entity types for verso.
//!
//! Two entity families with in-process owning services and the adapters that
//! plug them into [`verso_core::EntityVersionService`]:
//!
//! - [`Connection`]: provider connections whose secret settings are protected
//!   in snapshots and masked in comparisons
//! - [`Context`]: named sets of prompt resources
//!
//! Use [`register_all`] to wire both into a versioning service.

pub mod connection;
pub mod context;
mod snapshot;

use std::sync::Arc;

use verso_core::diff::JsonDiff;
use verso_core::EntityVersionService;

pub use connection::{
    Connection, ConnectionAdapter, ConnectionService, PlaintextProtector, ProviderCatalog,
    SecretProtector, SettingsField, SettingsSchema, CONNECTION_ENTITY_TYPE,
};
pub use context::{
    Context, ContextAdapter, ContextResource, ContextService, InjectionMode, CONTEXT_ENTITY_TYPE,
};

/// Owning services created by [`register_all`].
pub struct EntityServices {
    pub connections: Arc<ConnectionService>,
    pub contexts: Arc<ContextService>,
}

/// Create the connection and context services and register their adapters.
pub fn register_all(
    versions: &Arc<EntityVersionService>,
    catalog: Arc<ProviderCatalog>,
    protector: Arc<dyn SecretProtector>,
    diff: JsonDiff,
) -> EntityServices {
    EntityServices {
        connections: ConnectionService::register(versions.clone(), catalog, protector, diff),
        contexts: ContextService::register(versions.clone(), diff),
    }
}
