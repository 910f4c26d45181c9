// crates/variant-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Variant Gate Runtime
// Description: Bucketing, registry, identity, and the assignment service.
// Purpose: Execute deterministic variant assignment against injected stores.
// Dependencies: crate::{audit, core, interfaces}, rand, serde_json
// ============================================================================

//! ## Overview
//! Runtime modules implement variant selection and the stateful
//! [`VariantService`] context object. Every public surface (library callers,
//! the CLI) goes through the same selection functions so previews and real
//! assignments never disagree.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod bucket;
pub mod clock;
pub mod identity;
pub mod registry;
pub mod service;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bucket::is_included;
pub use bucket::preview_variant;
pub use bucket::select_variant;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use identity::ASSIGNMENTS_KEY;
pub use identity::IdentityResolution;
pub use identity::SESSION_ID_KEY;
pub use identity::USER_ID_KEY;
pub use identity::UserIdentity;
pub use registry::TestRegistry;
pub use service::ForceOutcome;
pub use service::Persistence;
pub use service::Resolution;
pub use service::VariantResolution;
pub use service::VariantService;
pub use service::VariantServiceConfig;
pub use store::InMemoryKeyValueStore;
pub use store::SharedKeyValueStore;
