// crates/variant-gate-core/src/lib.rs
// ============================================================================
// Module: Variant Gate Core Library
// Description: Public API surface for the Variant Gate core.
// Purpose: Expose experiment types, store interfaces, and the assignment service.
// Dependencies: crate::{audit, core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Variant Gate core assigns users to weighted experiment variants using a
//! deterministic string hash, persists the resulting assignments through an
//! injected key-value store, and exposes lookup and override operations. The
//! crate is backend-agnostic: browsers, servers, and tests supply their own
//! stores, clocks, and event sinks.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use audit::AssignmentEvent;
pub use audit::ConversionEvent;
pub use audit::ExperimentEventSink;
pub use audit::FileEventSink;
pub use audit::MemoryEventSink;
pub use audit::NoopEventSink;
pub use audit::StderrEventSink;
pub use audit::WarningEvent;
pub use interfaces::Clock;
pub use interfaces::KeyValueStore;
pub use interfaces::StoreError;
pub use runtime::FixedClock;
pub use runtime::ForceOutcome;
pub use runtime::InMemoryKeyValueStore;
pub use runtime::Persistence;
pub use runtime::Resolution;
pub use runtime::SharedKeyValueStore;
pub use runtime::SystemClock;
pub use runtime::TestRegistry;
pub use runtime::UserIdentity;
pub use runtime::VariantResolution;
pub use runtime::VariantService;
pub use runtime::VariantServiceConfig;
