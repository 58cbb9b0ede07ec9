//! Adapter registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::adapter::{EntityAdapter, VersionableEntityAdapter};
use crate::error::{VersoError, VersoResult};

#[derive(Default)]
struct Adapters {
    by_type: HashMap<TypeId, Arc<dyn EntityAdapter>>,
    by_name: HashMap<String, Arc<dyn EntityAdapter>>,
}

/// Lookup of entity adapters by entity type and by type name.
///
/// Adapters can be registered after the registry has been shared, which lets
/// owning services and their adapters be wired up after the versioning
/// service exists.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<Adapters>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its entity type and type name.
    ///
    /// A later registration for the same name replaces the earlier one.
    pub fn register<A: VersionableEntityAdapter>(&self, adapter: A) {
        self.register_shared(Arc::new(adapter));
    }

    /// Register an adapter that is already shared.
    pub fn register_shared(&self, adapter: Arc<dyn EntityAdapter>) {
        let name = adapter.entity_type();
        let key = name.to_lowercase();
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = adapters.by_name.remove(&key) {
            warn!(entity_type = %name, "Replacing registered adapter");
            adapters.by_type.remove(&previous.entity_type_id());
        }

        adapters.by_type.insert(adapter.entity_type_id(), Arc::clone(&adapter));
        adapters.by_name.insert(key, adapter);
        debug!(entity_type = %name, "Registered entity adapter");
    }

    /// Adapter for a type name, ignoring case.
    pub fn get_by_name(&self, entity_type: &str) -> Option<Arc<dyn EntityAdapter>> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        adapters.by_name.get(&entity_type.to_lowercase()).cloned()
    }

    /// Adapter registered for entity type `T`.
    pub fn get_by_type<T: 'static>(&self) -> Option<Arc<dyn EntityAdapter>> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        adapters.by_type.get(&TypeId::of::<T>()).cloned()
    }

    pub fn require_by_name(&self, entity_type: &str) -> VersoResult<Arc<dyn EntityAdapter>> {
        self.get_by_name(entity_type)
            .ok_or_else(|| VersoError::unknown_entity_type(entity_type, self.supported_entity_types()))
    }

    pub fn require_by_type<T: 'static>(&self) -> VersoResult<Arc<dyn EntityAdapter>> {
        self.get_by_type::<T>().ok_or_else(|| {
            VersoError::unknown_entity_type(std::any::type_name::<T>(), self.supported_entity_types())
        })
    }

    /// Registered type names, sorted.
    pub fn supported_entity_types(&self) -> Vec<String> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = adapters
            .by_name
            .values()
            .map(|a| a.entity_type().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
