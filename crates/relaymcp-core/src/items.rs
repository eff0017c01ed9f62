//! Per-message key/value side channel.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Open-ended key/value storage that travels with one inbound message.
///
/// Filters use it to hand data down the chain (an authenticated principal, a
/// start timestamp) and the router passes the same storage on to the matched
/// handler. Values are arbitrary `Send + Sync` types looked up by key and type.
///
/// Clones share the same underlying map. A fresh `Items` is created for every
/// message, so nothing leaks between messages.
///
/// # Example
///
/// ```ignore
/// ctx.items().insert("principal", Principal::new("alice"));
/// let who: Option<Arc<Principal>> = ctx.items().get("principal");
/// ```
#[derive(Clone, Default)]
pub struct Items {
    inner: Arc<Mutex<ItemMap>>,
}

type ItemMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

impl Items {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, ItemMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value, replacing any previous value under the same key.
    ///
    /// Returns `true` if a previous value was replaced.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> bool {
        self.map().insert(key.into(), Arc::new(value)).is_some()
    }

    /// Gets a value by key.
    ///
    /// Returns `None` if the key is missing or holds a different type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.map().get(key)?);
        value.downcast::<T>().ok()
    }

    /// Removes a value, returning whether the key was present.
    pub fn remove(&self, key: &str) -> bool {
        self.map().remove(key).is_some()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.map().contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Items {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.map().keys().cloned().collect();
        f.debug_struct("Items").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_typed_value() {
        let items = Items::new();
        assert!(!items.insert("count", 42u32));

        assert_eq!(items.get::<u32>("count").as_deref(), Some(&42));
        assert!(items.get::<String>("count").is_none());
        assert!(items.get::<u32>("missing").is_none());
    }

    #[test]
    fn clones_share_storage() {
        let items = Items::new();
        let other = items.clone();
        other.insert("name", String::from("alice"));

        assert!(items.contains("name"));
        assert_eq!(items.len(), 1);
        assert!(items.remove("name"));
        assert!(other.is_empty());
    }

    #[test]
    fn items_survive_a_panic_while_locked() {
        let items = Items::new();
        items.insert("principal", String::from("alice"));

        let poisoner = items.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("filter panicked mid-update");
        })
        .join();
        assert!(result.is_err());
        assert!(items.inner.is_poisoned());

        assert_eq!(items.get::<String>("principal").as_deref().map(String::as_str), Some("alice"));
        assert!(!items.insert("count", 1u8));
        assert_eq!(items.len(), 2);
        assert!(items.remove("count"));
    }

    #[test]
    fn insert_replaces_existing() {
        let items = Items::new();
        items.insert("k", 1i64);
        assert!(items.insert("k", 2i64));
        assert_eq!(items.get::<i64>("k").as_deref(), Some(&2));
    }
}
