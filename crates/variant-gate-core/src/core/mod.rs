// crates/variant-gate-core/src/core/mod.rs
// ============================================================================
// Module: Variant Gate Core Types
// Description: Canonical experiment definitions and assignment records.
// Purpose: Provide stable, serializable types shared by every store and surface.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types define test configurations, variants, assignments, and the
//! hashing helpers used to bucket users. These types are the canonical source
//! of truth for the persisted assignment list and the TOML configuration.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod assignment;
pub mod hashing;
pub mod identifiers;
pub mod experiment;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use assignment::Assignment;
pub use hashing::BUCKET_COUNT;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::bucket_for;
pub use hashing::string_hash;
pub use identifiers::SessionId;
pub use identifiers::TestId;
pub use identifiers::UserId;
pub use identifiers::VariantId;
pub use experiment::MAX_PERCENT;
pub use experiment::ExperimentError;
pub use experiment::TestConfig;
pub use experiment::Variant;
pub use experiment::VariantPayload;
pub use time::Timestamp;
