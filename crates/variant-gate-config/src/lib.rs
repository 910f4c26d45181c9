// crates/variant-gate-config/src/lib.rs
// ============================================================================
// Module: Variant Gate Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for variant-gate.toml semantics.
// Dependencies: variant-gate-core, variant-gate-store-sqlite, serde, toml, time
// ============================================================================

//! ## Overview
//! `variant-gate-config` defines the configuration model for Variant Gate:
//! the durable store backend, the event sink, and the experiment
//! definitions. Validation is strict and fail-closed; a configuration that
//! loads successfully always yields a valid [`variant_gate_core::TestRegistry`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
