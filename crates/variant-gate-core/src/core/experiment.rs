// crates/variant-gate-core/src/core/experiment.rs
// ============================================================================
// Module: Variant Gate Experiment Definitions
// Description: Test configurations, weighted variants, and validation.
// Purpose: Define canonical experiment definitions that fail fast when malformed.
// Dependencies: crate::core::{hashing, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`TestConfig`] is a named experiment: an ordered list of weighted
//! [`Variant`]s, a traffic allocation percentage, an activity window, and the
//! metric names that count as success. Configurations are validated when they
//! are registered so a malformed weight table never produces a silently
//! skewed distribution at assignment time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::identifiers::TestId;
use crate::core::identifiers::VariantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound for weights and traffic allocation percentages.
pub const MAX_PERCENT: u8 = 100;

/// Opaque behavior flags handed to callers for an assigned variant.
pub type VariantPayload = Map<String, Value>;

// ============================================================================
// SECTION: Test Configuration
// ============================================================================

/// Canonical experiment definition.
///
/// # Invariants
/// - After [`TestConfig::validate`] succeeds: at least one variant, unique
///   non-blank variant ids, weights summing to [`MAX_PERCENT`], and
///   `traffic_allocation <= 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Test identifier.
    pub test_id: TestId,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Variants in bucket-walk order.
    pub variants: Vec<Variant>,
    /// Percentage of buckets eligible for the test.
    pub traffic_allocation: u8,
    /// Whether the test is switched on.
    pub active: bool,
    /// Start of the activity window.
    pub starts_at: Timestamp,
    /// Optional end of the activity window (exclusive).
    #[serde(default)]
    pub ends_at: Option<Timestamp>,
    /// Metric names accepted by conversion tracking.
    #[serde(default)]
    pub success_metrics: Vec<String>,
}

impl TestConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the configuration violates an invariant.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.test_id.is_blank() {
            return Err(ExperimentError::MissingTestId);
        }
        if self.variants.is_empty() {
            return Err(ExperimentError::MissingVariants(self.test_id.to_string()));
        }
        if self.traffic_allocation > MAX_PERCENT {
            return Err(ExperimentError::TrafficAllocationOutOfRange {
                test_id: self.test_id.to_string(),
                allocation: self.traffic_allocation,
            });
        }
        if let Some(ends_at) = self.ends_at
            && ends_at < self.starts_at
        {
            return Err(ExperimentError::InvalidWindow(self.test_id.to_string()));
        }
        ensure_unique_variant_ids(&self.test_id, &self.variants)?;
        ensure_weights_sum(&self.test_id, &self.variants)?;
        Ok(())
    }

    /// Returns true when the test is switched on and `now` is inside its window.
    #[must_use]
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        if !self.active || now < self.starts_at {
            return false;
        }
        self.ends_at.is_none_or(|ends_at| now < ends_at)
    }

    /// Looks up a variant by identifier.
    #[must_use]
    pub fn variant(&self, variant_id: &VariantId) -> Option<&Variant> {
        self.variants.iter().find(|variant| &variant.variant_id == variant_id)
    }

    /// Returns true when `metric` is one of the configured success metrics.
    #[must_use]
    pub fn tracks_metric(&self, metric: &str) -> bool {
        self.success_metrics.iter().any(|name| name == metric)
    }

    /// Computes the canonical hash of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn canonical_hash(&self) -> Result<HashDigest, HashError> {
        crate::core::hashing::hash_canonical_json(DEFAULT_HASH_ALGORITHM, self)
    }
}

// ============================================================================
// SECTION: Variants
// ============================================================================

/// One arm of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Share of buckets, in percent.
    pub weight: u8,
    /// Behavior flags for callers.
    #[serde(default)]
    pub config: VariantPayload,
}

impl Variant {
    /// Returns a payload flag when present.
    #[must_use]
    pub fn flag(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Test configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExperimentError {
    /// Test identifier is blank.
    #[error("test config must define a non-empty test id")]
    MissingTestId,
    /// Test defines no variants.
    #[error("test {0} must define at least one variant")]
    MissingVariants(String),
    /// Variant identifier is blank.
    #[error("test {0} has a variant with an empty id")]
    BlankVariantId(String),
    /// Duplicate variant identifiers detected.
    #[error("test {test_id} has duplicate variant id: {variant_id}")]
    DuplicateVariantId {
        /// Test identifier.
        test_id: String,
        /// Duplicated variant identifier.
        variant_id: String,
    },
    /// A single weight exceeds 100.
    #[error("test {test_id} variant {variant_id} weight {weight} exceeds 100")]
    WeightOutOfRange {
        /// Test identifier.
        test_id: String,
        /// Variant identifier.
        variant_id: String,
        /// Offending weight.
        weight: u8,
    },
    /// Weights do not add up to 100.
    #[error("test {test_id} variant weights sum to {total}, expected 100")]
    WeightSumMismatch {
        /// Test identifier.
        test_id: String,
        /// Observed weight total.
        total: u32,
    },
    /// Traffic allocation exceeds 100.
    #[error("test {test_id} traffic allocation {allocation} exceeds 100")]
    TrafficAllocationOutOfRange {
        /// Test identifier.
        test_id: String,
        /// Offending allocation.
        allocation: u8,
    },
    /// Activity window ends before it starts.
    #[error("test {0} ends before it starts")]
    InvalidWindow(String),
    /// Test identifier already registered.
    #[error("test {0} is already registered")]
    DuplicateTestId(String),
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Ensures variant identifiers are present and unique within the test.
fn ensure_unique_variant_ids(test_id: &TestId, variants: &[Variant]) -> Result<(), ExperimentError> {
    for (index, variant) in variants.iter().enumerate() {
        if variant.variant_id.is_blank() {
            return Err(ExperimentError::BlankVariantId(test_id.to_string()));
        }
        if variants.iter().skip(index + 1).any(|other| other.variant_id == variant.variant_id) {
            return Err(ExperimentError::DuplicateVariantId {
                test_id: test_id.to_string(),
                variant_id: variant.variant_id.to_string(),
            });
        }
    }
    Ok(())
}

/// Ensures each weight is a percentage and the weights add up to 100.
fn ensure_weights_sum(test_id: &TestId, variants: &[Variant]) -> Result<(), ExperimentError> {
    let mut total: u32 = 0;
    for variant in variants {
        if variant.weight > MAX_PERCENT {
            return Err(ExperimentError::WeightOutOfRange {
                test_id: test_id.to_string(),
                variant_id: variant.variant_id.to_string(),
                weight: variant.weight,
            });
        }
        total += u32::from(variant.weight);
    }
    if total != u32::from(MAX_PERCENT) {
        return Err(ExperimentError::WeightSumMismatch {
            test_id: test_id.to_string(),
            total,
        });
    }
    Ok(())
}
