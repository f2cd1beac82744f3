//! Persisted reader state on top of a host key-value store.
//!
//! The core only knows key names and the JSON encoding of the values; where
//! the strings end up is up to the [`KeyValueStore`] the host provides.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Preferences;
use crate::error::StoreError;
use crate::navigation::ReadingPosition;

/// Key holding the user preferences.
pub const PREFERENCES_KEY: &str = "folio.preferences";

const POSITION_PREFIX: &str = "folio.position.";

/// Key holding the last reading position of a book.
pub fn position_key(book_identity: &str) -> String {
    format!("{POSITION_PREFIX}{book_identity}")
}

/// String key-value storage provided by the host.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// Typed access to reading positions and preferences.
#[derive(Clone)]
pub struct PositionStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStore").finish_non_exhaustive()
    }
}

impl PositionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn load_position(&self, book_identity: &str) -> Result<Option<ReadingPosition>, StoreError> {
        self.load(&position_key(book_identity))
    }

    pub fn save_position(&self, book_identity: &str, position: &ReadingPosition) -> Result<(), StoreError> {
        self.save(&position_key(book_identity), position)
    }

    pub fn clear_position(&self, book_identity: &str) {
        self.store.remove(&position_key(book_identity));
    }

    pub fn load_preferences(&self) -> Result<Option<Preferences>, StoreError> {
        Ok(self.load::<Preferences>(PREFERENCES_KEY)?.map(Preferences::normalized))
    }

    pub fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.save(PREFERENCES_KEY, preferences)
    }

    /// Store first-run preferences unless some are already present.
    pub fn register_defaults(&self) -> Result<Preferences, StoreError> {
        if let Some(existing) = self.load_preferences()? {
            return Ok(existing);
        }
        let defaults = Preferences::first_run();
        self.save_preferences(&defaults)?;
        Ok(defaults)
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key) else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        debug!(key, "persisting reader state");
        self.store.set(key, raw);
        Ok(())
    }
}
