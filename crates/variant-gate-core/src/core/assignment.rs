// crates/variant-gate-core/src/core/assignment.rs
// ============================================================================
// Module: Variant Gate Assignments
// Description: Durable records binding a user to a variant for one test.
// Purpose: Define the persisted assignment record and its wire form.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Assignments serialize as flat camelCase records so the persisted list is a
//! plain JSON array readable by browser clients:
//!
//! ```json
//! [{"userId":"user_1","testId":"hero","variantId":"a","assignedAt":1700000000000,"sessionId":"session_1"}]
//! ```
//!
//! The list carries no version field.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::SessionId;
use crate::core::identifiers::TestId;
use crate::core::identifiers::UserId;
use crate::core::identifiers::VariantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Assignment Record
// ============================================================================

/// Binding of a user to a variant for a single test.
///
/// # Invariants
/// - One record per (user, test); replaced only by an explicit override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// User the assignment belongs to.
    pub user_id: UserId,
    /// Test identifier.
    pub test_id: TestId,
    /// Assigned variant identifier.
    pub variant_id: VariantId,
    /// Time the assignment was created.
    pub assigned_at: Timestamp,
    /// Session that created the assignment.
    pub session_id: SessionId,
}
