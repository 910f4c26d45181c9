// crates/variant-gate-core/src/runtime/service.rs
// ============================================================================
// Module: Variant Gate Assignment Service
// Description: Stateful context object for variant lookup, override, and tracking.
// Purpose: Assign the current user to variants and persist the assignments.
// Dependencies: crate::{audit, core, interfaces, runtime}, serde_json
// ============================================================================

//! ## Overview
//! [`VariantService`] is constructed once per user session and passed to the
//! code that needs variant lookups. It owns the test registry, the user's
//! identity, and an in-memory copy of the user's assignments, and mirrors
//! every change into the durable key-value store.
//!
//! Store failures never surface as errors. Malformed stored data starts the
//! cache empty and emits a warning. A failed read also starts empty, but the
//! service then never writes the assignment list for its lifetime, so data it
//! could not see is never overwritten. Writes that fail keep the assignment
//! in memory and report [`Persistence::Ephemeral`].
//!
//! The stored list may hold records for other users sharing the same key.
//! Those records are carried through every rewrite untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::audit::AssignmentEvent;
use crate::audit::ConversionEvent;
use crate::audit::ExperimentEventSink;
use crate::audit::WarningEvent;
use crate::core::assignment::Assignment;
use crate::core::experiment::Variant;
use crate::core::hashing::bucket_for;
use crate::core::identifiers::TestId;
use crate::core::identifiers::VariantId;
use crate::core::time::Timestamp;
use crate::interfaces::Clock;
use crate::interfaces::KeyValueStore;
use crate::interfaces::StoreError;
use crate::runtime::bucket::is_included;
use crate::runtime::bucket::select_variant;
use crate::runtime::identity::ASSIGNMENTS_KEY;
use crate::runtime::identity::UserIdentity;
use crate::runtime::registry::TestRegistry;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the variant service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantServiceConfig {
    /// Durable store key holding the serialized assignment list.
    pub assignments_key: String,
}

impl Default for VariantServiceConfig {
    fn default() -> Self {
        Self {
            assignments_key: ASSIGNMENTS_KEY.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Outcome of mirroring state into a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// Nothing needed to be written.
    Skipped,
    /// The write reached the store.
    Persisted,
    /// The write failed; state lives only in memory for this process.
    Ephemeral {
        /// Store error that caused the degradation.
        error: StoreError,
    },
}

impl Persistence {
    /// Returns the label used in events.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Persisted => "persisted",
            Self::Ephemeral {
                ..
            } => "ephemeral",
        }
    }

    /// Returns true when state was kept in memory only.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Ephemeral { .. })
    }

    /// Combines two outcomes, keeping the most degraded one.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (degraded @ Self::Ephemeral { .. }, _) | (_, degraded @ Self::Ephemeral { .. }) => {
                degraded
            }
            (Self::Persisted, _) | (_, Self::Persisted) => Self::Persisted,
            (Self::Skipped, Self::Skipped) => Self::Skipped,
        }
    }
}

/// How a variant lookup was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Test id is not registered.
    UnknownTest,
    /// Test is switched off or outside its activity window.
    InactiveTest,
    /// User bucket is above the traffic allocation.
    Excluded,
    /// An assignment already existed and was reused.
    Existing,
    /// A new assignment was created.
    Assigned,
}

impl Resolution {
    /// Returns the snake-case label used in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UnknownTest => "unknown_test",
            Self::InactiveTest => "inactive_test",
            Self::Excluded => "excluded",
            Self::Existing => "existing",
            Self::Assigned => "assigned",
        }
    }
}

/// Result of [`VariantService::resolve_variant`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariantResolution {
    /// Selected variant, if any.
    pub variant: Option<Variant>,
    /// How the decision was reached.
    pub resolution: Resolution,
    /// Outcome of persisting a new assignment.
    pub persistence: Persistence,
}

impl VariantResolution {
    /// Builds a resolution that selected nothing and wrote nothing.
    const fn empty(resolution: Resolution) -> Self {
        Self {
            variant: None,
            resolution,
            persistence: Persistence::Skipped,
        }
    }
}

/// Result of [`VariantService::force_variant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceOutcome {
    /// The override was recorded.
    Applied {
        /// Outcome of persisting the override.
        persistence: Persistence,
    },
    /// Test or variant id is unknown; nothing changed.
    Ignored,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Variant assignment context for one user session.
pub struct VariantService<S, C, E> {
    /// Registered test configurations.
    registry: TestRegistry,
    /// Identity of the current user.
    identity: UserIdentity,
    /// Bucket derived from the user id.
    bucket: u8,
    /// Durable store mirroring assignments.
    store: S,
    /// Clock for assignment timestamps and activity windows.
    clock: C,
    /// Event sink.
    events: E,
    /// Service configuration.
    config: VariantServiceConfig,
    /// Assignments held for the current user, keyed by test id.
    assignments: BTreeMap<TestId, Assignment>,
    /// Stored records belonging to other users, written back unchanged.
    foreign: Vec<Assignment>,
    /// Read error that put the service in memory-only mode.
    read_failure: Option<StoreError>,
}

impl<S, C, E> VariantService<S, C, E>
where
    S: KeyValueStore,
    C: Clock,
    E: ExperimentEventSink,
{
    /// Creates the service and loads persisted assignments for the user.
    pub fn new(
        registry: TestRegistry,
        identity: UserIdentity,
        store: S,
        clock: C,
        events: E,
        config: VariantServiceConfig,
    ) -> Self {
        let bucket = bucket_for(identity.user_id().as_str());
        let mut service = Self {
            registry,
            identity,
            bucket,
            store,
            clock,
            events,
            config,
            assignments: BTreeMap::new(),
            foreign: Vec::new(),
            read_failure: None,
        };
        service.load_assignments();
        service
    }

    /// Returns the assigned variant for a test, assigning one on first call.
    ///
    /// Returns `None` for unknown or inactive tests and for users outside the
    /// traffic allocation.
    pub fn get_variant(&mut self, test_id: &TestId) -> Option<Variant> {
        self.resolve_variant(test_id).variant
    }

    /// Resolves a variant and reports how the decision was reached.
    pub fn resolve_variant(&mut self, test_id: &TestId) -> VariantResolution {
        let now = self.clock.now();
        let Some(config) = self.registry.get(test_id).cloned() else {
            return VariantResolution::empty(Resolution::UnknownTest);
        };
        if !config.is_live_at(now) {
            return VariantResolution::empty(Resolution::InactiveTest);
        }

        if let Some(existing) = self.assignments.get(test_id) {
            if let Some(variant) = config.variant(&existing.variant_id) {
                return VariantResolution {
                    variant: Some(variant.clone()),
                    resolution: Resolution::Existing,
                    persistence: Persistence::Skipped,
                };
            }
            let message = format!(
                "assigned variant {} no longer exists; reassigning",
                existing.variant_id
            );
            self.warn("stale_assignment_replaced", Some(test_id), message);
        }

        if !is_included(self.bucket, config.traffic_allocation) {
            let persistence = match self.assignments.remove(test_id) {
                Some(_) => self.persist(),
                None => Persistence::Skipped,
            };
            self.emit_assignment("variant_excluded", test_id, None, &persistence);
            return VariantResolution {
                variant: None,
                resolution: Resolution::Excluded,
                persistence,
            };
        }
        let Some(variant) = select_variant(&config.variants, self.bucket).cloned() else {
            return VariantResolution::empty(Resolution::Excluded);
        };

        self.insert_assignment(test_id, &variant.variant_id, now);
        let persistence = self.persist();
        self.emit_assignment(
            "variant_assigned",
            test_id,
            Some(&variant.variant_id),
            &persistence,
        );
        VariantResolution {
            variant: Some(variant),
            resolution: Resolution::Assigned,
            persistence,
        }
    }

    /// Overrides the assignment for a test, bypassing the allocation gate.
    ///
    /// Unknown test or variant ids leave state untouched and return
    /// [`ForceOutcome::Ignored`].
    pub fn force_variant(&mut self, test_id: &TestId, variant_id: &VariantId) -> ForceOutcome {
        let known = self
            .registry
            .get(test_id)
            .is_some_and(|config| config.variant(variant_id).is_some());
        if !known {
            let message = format!("unknown test or variant: {test_id}/{variant_id}");
            self.warn("force_variant_ignored", Some(test_id), message);
            return ForceOutcome::Ignored;
        }
        let now = self.clock.now();
        self.insert_assignment(test_id, variant_id, now);
        let persistence = self.persist();
        self.emit_assignment("variant_forced", test_id, Some(variant_id), &persistence);
        ForceOutcome::Applied {
            persistence,
        }
    }

    /// Returns true when an assignment record exists for the test.
    #[must_use]
    pub fn is_in_test(&self, test_id: &TestId) -> bool {
        self.assignments.contains_key(test_id)
    }

    /// Returns the assignment record for a test.
    #[must_use]
    pub fn assignment(&self, test_id: &TestId) -> Option<&Assignment> {
        self.assignments.get(test_id)
    }

    /// Returns a snapshot of all assignments, ordered by test id.
    #[must_use]
    pub fn assignments(&self) -> Vec<Assignment> {
        self.assignments.values().cloned().collect()
    }

    /// Drops the user's assignments from memory and from the durable store.
    ///
    /// Records of other users sharing the key are kept.
    pub fn clear_assignments(&mut self) -> Persistence {
        self.assignments.clear();
        if let Some(error) = &self.read_failure {
            return Persistence::Ephemeral {
                error: error.clone(),
            };
        }
        if self.foreign.is_empty() {
            let result = self.store.remove(&self.config.assignments_key);
            return self.write_outcome(result);
        }
        self.persist()
    }

    /// Records a conversion for a success metric of a test the user is in.
    ///
    /// Returns false when the user holds no assignment for the test or the
    /// metric is not one of the test's success metrics.
    pub fn track_conversion(&self, test_id: &TestId, metric: &str, value: Option<f64>) -> bool {
        let Some(assignment) = self.assignments.get(test_id) else {
            return false;
        };
        let tracked = self.registry.get(test_id).is_some_and(|config| config.tracks_metric(metric));
        if !tracked {
            return false;
        }
        self.events.record_conversion(&ConversionEvent {
            event: "conversion",
            timestamp_ms: self.clock.now().as_unix_millis(),
            user_id: self.identity.user_id().to_string(),
            session_id: self.identity.session_id().to_string(),
            test_id: test_id.to_string(),
            variant_id: assignment.variant_id.to_string(),
            metric: metric.to_string(),
            value,
        });
        true
    }

    /// Returns the identity the service assigns for.
    #[must_use]
    pub const fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Returns the user bucket in `[0, 99]`.
    #[must_use]
    pub const fn bucket(&self) -> u8 {
        self.bucket
    }

    /// Returns the test registry.
    #[must_use]
    pub const fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Returns the test registry for in-place configuration changes.
    ///
    /// Existing assignments stay sticky across weight changes.
    pub const fn registry_mut(&mut self) -> &mut TestRegistry {
        &mut self.registry
    }

    /// Loads the user's assignments from the durable store.
    fn load_assignments(&mut self) {
        let raw = match self.store.get(&self.config.assignments_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(error) => {
                self.warn("assignment_store_degraded", None, error.to_string());
                self.read_failure = Some(error);
                return;
            }
        };
        let records: Vec<Assignment> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(error) => {
                self.warn("assignments_malformed", None, error.to_string());
                return;
            }
        };
        let user_id = self.identity.user_id().clone();
        for record in records {
            if record.user_id == user_id {
                self.assignments.insert(record.test_id.clone(), record);
            } else {
                self.foreign.push(record);
            }
        }
    }

    /// Inserts or replaces the assignment for a test.
    fn insert_assignment(&mut self, test_id: &TestId, variant_id: &VariantId, now: Timestamp) {
        self.assignments.insert(test_id.clone(), Assignment {
            user_id: self.identity.user_id().clone(),
            test_id: test_id.clone(),
            variant_id: variant_id.clone(),
            assigned_at: now,
            session_id: self.identity.session_id().clone(),
        });
    }

    /// Writes the full assignment list to the durable store.
    ///
    /// Skips the write once a read has failed, since the stored list is unknown.
    fn persist(&self) -> Persistence {
        if let Some(error) = &self.read_failure {
            return Persistence::Ephemeral {
                error: error.clone(),
            };
        }
        let records: Vec<&Assignment> =
            self.foreign.iter().chain(self.assignments.values()).collect();
        let result = serde_json::to_string(&records)
            .map_err(|err| StoreError::Invalid(err.to_string()))
            .and_then(|payload| self.store.set(&self.config.assignments_key, &payload));
        self.write_outcome(result)
    }

    /// Maps a store write result to a persistence outcome.
    fn write_outcome(&self, result: Result<(), StoreError>) -> Persistence {
        match result {
            Ok(()) => Persistence::Persisted,
            Err(error) => {
                self.warn("assignment_store_degraded", None, error.to_string());
                Persistence::Ephemeral {
                    error,
                }
            }
        }
    }

    /// Emits an assignment decision event.
    fn emit_assignment(
        &self,
        event: &'static str,
        test_id: &TestId,
        variant_id: Option<&VariantId>,
        persistence: &Persistence,
    ) {
        self.events.record(&AssignmentEvent {
            event,
            timestamp_ms: self.clock.now().as_unix_millis(),
            user_id: self.identity.user_id().to_string(),
            session_id: self.identity.session_id().to_string(),
            test_id: test_id.to_string(),
            variant_id: variant_id.map(ToString::to_string),
            bucket: self.bucket,
            persistence: persistence.label(),
            config_fingerprint: self
                .registry
                .get(test_id)
                .and_then(|config| config.canonical_hash().ok())
                .map(|digest| digest.value),
        });
    }

    /// Emits an operator-facing warning.
    fn warn(&self, kind: &'static str, test_id: Option<&TestId>, message: String) {
        self.events.record_warning(&WarningEvent {
            event: "warning",
            timestamp_ms: self.clock.now().as_unix_millis(),
            kind,
            test_id: test_id.map(ToString::to_string),
            message,
        });
    }
}
