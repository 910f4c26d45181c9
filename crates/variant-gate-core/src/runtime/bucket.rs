// crates/variant-gate-core/src/runtime/bucket.rs
// ============================================================================
// Module: Variant Gate Bucket Selection
// Description: Traffic-allocation gate and cumulative-weight variant walk.
// Purpose: Deterministically map a bucket to a variant.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Selection is a pure function of the bucket and the configuration:
//!
//! 1. A user is included when `bucket <= traffic_allocation`.
//! 2. Variants are walked in order, accumulating weights; the first variant
//!    whose cumulative weight exceeds the bucket wins.
//! 3. If the walk finds nothing (weights short of 100), the last variant is
//!    the catch-all. An empty list selects nothing.
//!
//! Note the gate is inclusive: an allocation of 30 admits buckets 0..=30.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::experiment::TestConfig;
use crate::core::experiment::Variant;
use crate::core::hashing::bucket_for;
use crate::core::identifiers::UserId;

// ============================================================================
// SECTION: Selection
// ============================================================================

/// Returns true when `bucket` passes the traffic-allocation gate.
#[must_use]
pub const fn is_included(bucket: u8, traffic_allocation: u8) -> bool {
    bucket <= traffic_allocation
}

/// Selects the variant for `bucket` by walking cumulative weights.
#[must_use]
pub fn select_variant(variants: &[Variant], bucket: u8) -> Option<&Variant> {
    let bucket = u32::from(bucket);
    let mut cumulative: u32 = 0;
    for variant in variants {
        cumulative += u32::from(variant.weight);
        if bucket < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}

/// Computes the variant a user would receive, without touching any store.
///
/// Returns `None` when the user is outside the traffic allocation. Activity
/// flags and windows are not consulted.
#[must_use]
pub fn preview_variant<'a>(config: &'a TestConfig, user_id: &UserId) -> Option<&'a Variant> {
    let bucket = bucket_for(user_id.as_str());
    if !is_included(bucket, config.traffic_allocation) {
        return None;
    }
    select_variant(&config.variants, bucket)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
