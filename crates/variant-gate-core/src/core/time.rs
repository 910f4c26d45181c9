// crates/variant-gate-core/src/core/time.rs
// ============================================================================
// Module: Variant Gate Time Model
// Description: Canonical timestamp representation for assignments and tests.
// Purpose: Keep assignment timestamps explicit and replayable.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Variant Gate stores timestamps as unix epoch milliseconds so the persisted
//! assignment list is a plain number field. Core types never read wall-clock
//! time directly; the service obtains timestamps from an injected
//! [`crate::interfaces::Clock`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers or clocks.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Unix epoch origin.
    pub const EPOCH: Self = Self(0);

    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
