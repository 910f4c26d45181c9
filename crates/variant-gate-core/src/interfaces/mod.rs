// crates/variant-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Variant Gate Interfaces
// Description: Backend-agnostic interfaces for storage and time.
// Purpose: Define the contract surfaces used by the Variant Gate runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how Variant Gate reaches external collaborators: a
//! string key-value store (browser local storage, `SQLite`, memory) and a
//! clock. Store failures are reported as [`StoreError`] and treated as
//! non-fatal by the runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Key-Value Store
// ============================================================================

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("key-value store io error: {0}")]
    Io(String),
    /// Store is not available (disabled storage, closed handle).
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    /// Store rejected the write because of a size or quota limit.
    #[error("key-value store quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("key-value store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("key-value store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("key-value store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("key-value store error: {0}")]
    Store(String),
}

/// String key-value store modeled on browser local storage.
///
/// Implementations are single-writer per user; concurrent writers follow
/// last-writer-wins semantics.
pub trait KeyValueStore {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the removal fails.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of timestamps for assignments and activity windows.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}
