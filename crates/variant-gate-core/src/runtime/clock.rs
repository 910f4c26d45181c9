// crates/variant-gate-core/src/runtime/clock.rs
// ============================================================================
// Module: Variant Gate Clocks
// Description: Wall-clock and fixed clock implementations.
// Purpose: Supply assignment timestamps without hard-wiring system time.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`SystemClock`] is the production clock. [`FixedClock`] is shared between
//! clones so tests can move time under a running service.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::time::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Clock reading the host wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp::from_unix_millis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
    }
}

/// Manually driven clock; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    /// Current unix milliseconds.
    millis: Arc<AtomicI64>,
}

impl FixedClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(now.as_unix_millis())),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: Timestamp) {
        self.millis.store(now.as_unix_millis(), Ordering::SeqCst);
    }

    /// Advances the clock by `millis`.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}
