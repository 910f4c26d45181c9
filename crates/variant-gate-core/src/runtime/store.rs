// crates/variant-gate-core/src/runtime/store.rs
// ============================================================================
// Module: Variant Gate In-Memory Store
// Description: In-memory key-value store and shared store wrapper.
// Purpose: Provide session storage and a deterministic store for tests.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryKeyValueStore`] backs session-scoped identifiers and tests. An
//! optional quota makes it reject oversized writes the way browser storage
//! does, which exercises the degraded-persistence path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::interfaces::KeyValueStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    /// Entries protected by a mutex.
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    /// Optional maximum total bytes (keys plus values).
    quota_bytes: Option<usize>,
}

impl InMemoryKeyValueStore {
    /// Creates an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store that rejects writes beyond `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Returns the number of stored keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the mutex is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    /// Returns true when the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the mutex is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    /// Locks the entry map.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Store("key-value store mutex poisoned".to_string()))
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = guard
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| existing.len() + stored.len())
                .sum();
            let total = others + key.len() + value.len();
            if total > quota {
                return Err(StoreError::QuotaExceeded(format!(
                    "write of {total} bytes exceeds quota of {quota} bytes"
                )));
            }
        }
        guard.insert(key.to_string(), value.to_string());
        drop(guard);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ============================================================================
// SECTION: Shared Store Wrapper
// ============================================================================

/// Shared key-value store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedKeyValueStore {
    /// Inner store implementation.
    inner: Arc<dyn KeyValueStore + Send + Sync>,
}

impl SharedKeyValueStore {
    /// Wraps a store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl KeyValueStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn KeyValueStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl KeyValueStore for SharedKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}
