//! Type-keyed service lookup.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable registry of shared services, keyed by type.
///
/// Built once while the server is configured (see [`ServicesBuilder`]) and
/// then shared read-only by every connection, message and handler. There is
/// no runtime registration, so lookups need no locking.
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Services {
    /// Returns an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    /// Looks up a service by type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = Arc::clone(self.entries.get(&TypeId::of::<T>())?);
        entry.downcast::<T>().ok()
    }

    /// Returns true if a service of this type is registered.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Mutable builder for [`Services`].
#[derive(Default)]
pub struct ServicesBuilder {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServicesBuilder {
    /// Registers a service, replacing any previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: T) -> &mut Self {
        self.entries.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    /// Registers an already shared service.
    pub fn insert_arc<T: Any + Send + Sync>(&mut self, service: Arc<T>) -> &mut Self {
        self.entries.insert(TypeId::of::<T>(), service);
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> Services {
        Services {
            entries: Arc::new(self.entries),
        }
    }
}

impl std::fmt::Debug for ServicesBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicesBuilder")
            .field("count", &self.entries.len())
            .finish()
    }
}
