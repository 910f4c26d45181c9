// crates/variant-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Variant Gate SQLite Store
// Description: SQLite-backed durable key-value store for Variant Gate.
// Purpose: Provide a durable KeyValueStore implementation.
// Dependencies: variant-gate-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This crate provides a `SQLite`-backed [`variant_gate_core::KeyValueStore`]
//! with integrity hashes on every stored value.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_VALUE_BYTES;
pub use store::SqliteKeyValueStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
