// crates/variant-gate-core/tests/service.rs
// ============================================================================
// Module: Variant Service Tests
// Description: Tests for assignment, stickiness, overrides, and degraded stores.
// ============================================================================
//! ## Overview
//! Drives [`VariantService`] end to end against in-memory stores and a fixed
//! clock, checking both the returned variants and the persisted assignment list.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use variant_gate_core::FixedClock;
use variant_gate_core::ForceOutcome;
use variant_gate_core::InMemoryKeyValueStore;
use variant_gate_core::KeyValueStore;
use variant_gate_core::MemoryEventSink;
use variant_gate_core::Persistence;
use variant_gate_core::Resolution;
use variant_gate_core::SessionId;
use variant_gate_core::StoreError;
use variant_gate_core::TestConfig;
use variant_gate_core::TestId;
use variant_gate_core::TestRegistry;
use variant_gate_core::Timestamp;
use variant_gate_core::UserId;
use variant_gate_core::UserIdentity;
use variant_gate_core::Variant;
use variant_gate_core::VariantId;
use variant_gate_core::VariantService;
use variant_gate_core::VariantServiceConfig;
use variant_gate_core::runtime::ASSIGNMENTS_KEY;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const NOW_MS: i64 = 1_700_000_000_000;

type TestService<S> = VariantService<S, FixedClock, MemoryEventSink>;

fn variant(id: &str, weight: u8) -> Variant {
    Variant {
        variant_id: VariantId::new(id),
        name: id.to_string(),
        description: String::new(),
        weight,
        config: Map::new(),
    }
}

fn experiment(id: &str, allocation: u8, weights: &[(&str, u8)]) -> TestConfig {
    TestConfig {
        test_id: TestId::new(id),
        name: id.to_string(),
        description: String::new(),
        variants: weights.iter().map(|(variant_id, weight)| variant(variant_id, *weight)).collect(),
        traffic_allocation: allocation,
        active: true,
        starts_at: Timestamp::EPOCH,
        ends_at: None,
        success_metrics: vec!["purchase".to_string()],
    }
}

fn checkout() -> TestConfig {
    experiment("checkout", 100, &[("control", 50), ("treatment", 50)])
}

fn identity(user: &str) -> UserIdentity {
    UserIdentity::new(UserId::new(user), SessionId::new(format!("session_{user}")))
}

struct Harness<S> {
    service: TestService<S>,
    clock: FixedClock,
    events: MemoryEventSink,
}

fn harness<S: KeyValueStore>(user: &str, configs: Vec<TestConfig>, store: S) -> Harness<S> {
    let clock = FixedClock::new(Timestamp::from_unix_millis(NOW_MS));
    let events = MemoryEventSink::new();
    let registry = TestRegistry::from_configs(configs).unwrap();
    let service = VariantService::new(
        registry,
        identity(user),
        store,
        clock.clone(),
        events.clone(),
        VariantServiceConfig::default(),
    );
    Harness {
        service,
        clock,
        events,
    }
}

fn stored_records(store: &InMemoryKeyValueStore) -> Vec<Value> {
    let raw = store.get(ASSIGNMENTS_KEY).unwrap().unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Store that fails every operation.
struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }
}

/// Store whose first read fails, as a locked database would.
struct LockedOnFirstRead {
    inner: InMemoryKeyValueStore,
    failed: AtomicBool,
}

impl LockedOnFirstRead {
    fn new(inner: InMemoryKeyValueStore) -> Self {
        Self {
            inner,
            failed: AtomicBool::new(false),
        }
    }
}

impl KeyValueStore for LockedOnFirstRead {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Store("database is locked".to_string()));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

// ============================================================================
// SECTION: Assignment
// ============================================================================

#[test]
fn first_lookup_assigns_and_persists() {
    let store = InMemoryKeyValueStore::new();
    let mut h = harness("alice", vec![checkout()], store.clone());
    let resolution = h.service.resolve_variant(&TestId::new("checkout"));

    assert_eq!(resolution.resolution, Resolution::Assigned);
    assert_eq!(resolution.persistence, Persistence::Persisted);
    assert_eq!(resolution.variant.unwrap().variant_id.as_str(), "control");
    assert!(h.service.is_in_test(&TestId::new("checkout")));

    let records = stored_records(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0],
        json!({
            "userId": "alice",
            "testId": "checkout",
            "variantId": "control",
            "assignedAt": NOW_MS,
            "sessionId": "session_alice",
        })
    );

    let events = h.events.assignments();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "variant_assigned");
    assert_eq!(events[0].bucket, 40);
    assert_eq!(events[0].persistence, "persisted");
}

#[test]
fn repeated_lookups_reuse_the_assignment() {
    let store = InMemoryKeyValueStore::new();
    let mut h = harness("alice", vec![checkout()], store);
    let test_id = TestId::new("checkout");
    let first = h.service.get_variant(&test_id).unwrap();
    h.clock.advance(60_000);
    let second = h.service.resolve_variant(&test_id);

    assert_eq!(second.resolution, Resolution::Existing);
    assert_eq!(second.resolution.label(), "existing");
    assert_eq!(second.persistence, Persistence::Skipped);
    assert_eq!(second.variant.unwrap(), first);
    assert_eq!(h.service.assignment(&test_id).unwrap().assigned_at.as_unix_millis(), NOW_MS);
    assert_eq!(h.events.assignments().len(), 1);
}

#[test]
fn same_user_gets_same_variant_across_stores() {
    for user in ["alice", "bob", "carol", "frank", "user_a", "user_0"] {
        let mut first = harness(user, vec![checkout()], InMemoryKeyValueStore::new());
        let mut second = harness(user, vec![checkout()], InMemoryKeyValueStore::new());
        let test_id = TestId::new("checkout");
        assert_eq!(first.service.get_variant(&test_id), second.service.get_variant(&test_id));
    }
}

#[test]
fn distribution_tracks_weights_within_five_points() {
    let configs = vec![experiment("layout", 100, &[("a", 20), ("b", 30), ("c", 50)])];
    let test_id = TestId::new("layout");
    let total = 10_000_u32;
    let mut counts = [0_u32; 3];
    for index in 0 .. total {
        let mut h = harness(&format!("user_{index}"), configs.clone(), InMemoryKeyValueStore::new());
        let variant = h.service.get_variant(&test_id).unwrap();
        match variant.variant_id.as_str() {
            "a" => counts[0] += 1,
            "b" => counts[1] += 1,
            _ => counts[2] += 1,
        }
    }
    for (count, expected) in counts.iter().zip([20_u32, 30, 50]) {
        let percent = count * 100 / total;
        assert!(percent.abs_diff(expected) <= 5, "share {percent}% vs weight {expected}%");
    }
}

#[test]
fn even_split_stays_within_five_points() {
    let configs = vec![checkout()];
    let test_id = TestId::new("checkout");
    let total = 10_000_u32;
    let mut control = 0_u32;
    for index in 0 .. total {
        let mut h = harness(&format!("user_{index}"), configs.clone(), InMemoryKeyValueStore::new());
        if h.service.get_variant(&test_id).unwrap().variant_id.as_str() == "control" {
            control += 1;
        }
    }
    let percent = control * 100 / total;
    assert!(percent.abs_diff(50) <= 5, "control share {percent}%");
}

#[test]
fn assignment_events_carry_config_fingerprint() {
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], InMemoryKeyValueStore::new());
    h.service.get_variant(&test_id);

    let expected = checkout().canonical_hash().unwrap().value;
    let reweighted = experiment("checkout", 100, &[("control", 10), ("treatment", 90)]);
    h.service.registry_mut().replace(reweighted.clone()).unwrap();
    h.service.force_variant(&test_id, &VariantId::new("treatment"));

    let events = h.events.assignments();
    assert_eq!(events.len(), 2);
    let first = events[0].config_fingerprint.clone().unwrap();
    assert_eq!(first, expected);
    assert_eq!(first.len(), 64);
    let second = events[1].config_fingerprint.clone().unwrap();
    assert_eq!(second, reweighted.canonical_hash().unwrap().value);
    assert_ne!(first, second);
}

// ============================================================================
// SECTION: Traffic Allocation
// ============================================================================

#[test]
fn users_above_allocation_are_excluded_without_a_record() {
    let store = InMemoryKeyValueStore::new();
    let configs = vec![experiment("checkout", 30, &[("control", 50), ("treatment", 50)])];
    let mut h = harness("user_0", configs, store.clone());
    let test_id = TestId::new("checkout");

    let resolution = h.service.resolve_variant(&test_id);
    assert_eq!(resolution.resolution, Resolution::Excluded);
    assert!(resolution.variant.is_none());
    assert!(!h.service.is_in_test(&test_id));
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);

    // Excluded users are re-evaluated on every call.
    assert!(h.service.get_variant(&test_id).is_none());
    let excluded: Vec<_> =
        h.events.assignments().into_iter().filter(|event| event.event == "variant_excluded").collect();
    assert_eq!(excluded.len(), 2);
}

#[test]
fn exclusion_rate_matches_allocation() {
    let configs = vec![experiment("checkout", 30, &[("control", 50), ("treatment", 50)])];
    let test_id = TestId::new("checkout");
    let total = 10_000_u32;
    let mut included = 0_u32;
    for index in 0 .. total {
        let mut h = harness(&format!("user_{index}"), configs.clone(), InMemoryKeyValueStore::new());
        if h.service.get_variant(&test_id).is_some() {
            included += 1;
        }
    }
    let percent = included * 100 / total;
    assert!((26 ..= 36).contains(&percent), "included share {percent}%");
}

#[test]
fn allocation_gate_is_inclusive() {
    // bob hashes to bucket 17.
    let configs = vec![experiment("checkout", 17, &[("control", 100)])];
    let mut h = harness("bob", configs, InMemoryKeyValueStore::new());
    assert_eq!(h.service.bucket(), 17);
    assert!(h.service.get_variant(&TestId::new("checkout")).is_some());
}

// ============================================================================
// SECTION: Stickiness
// ============================================================================

#[test]
fn assignments_survive_weight_changes() {
    let store = InMemoryKeyValueStore::new();
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], store.clone());
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "control");

    let reweighted = experiment("checkout", 100, &[("control", 10), ("treatment", 90)]);
    h.service.registry_mut().replace(reweighted.clone()).unwrap();
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "control");

    let mut reloaded = harness("alice", vec![reweighted], store);
    let resolution = reloaded.service.resolve_variant(&test_id);
    assert_eq!(resolution.resolution, Resolution::Existing);
    assert_eq!(resolution.variant.unwrap().variant_id.as_str(), "control");
}

#[test]
fn removed_variant_is_reassigned_with_warning() {
    let store = InMemoryKeyValueStore::new();
    let records = json!([{
        "userId": "alice",
        "testId": "checkout",
        "variantId": "legacy",
        "assignedAt": 1,
        "sessionId": "session_old",
    }]);
    store.set(ASSIGNMENTS_KEY, &records.to_string()).unwrap();

    let mut h = harness("alice", vec![checkout()], store.clone());
    let resolution = h.service.resolve_variant(&TestId::new("checkout"));
    assert_eq!(resolution.resolution, Resolution::Assigned);
    assert_eq!(resolution.variant.unwrap().variant_id.as_str(), "control");
    assert_eq!(stored_records(&store)[0]["variantId"], json!("control"));

    let warnings = h.events.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, "stale_assignment_replaced");
}

#[test]
fn records_for_other_users_are_ignored() {
    let store = InMemoryKeyValueStore::new();
    let records = json!([
        {"userId": "mallory", "testId": "checkout", "variantId": "treatment", "assignedAt": 1, "sessionId": "s"},
        {"userId": "alice", "testId": "search", "variantId": "on", "assignedAt": 2, "sessionId": "s"},
    ]);
    store.set(ASSIGNMENTS_KEY, &records.to_string()).unwrap();

    let search = experiment("search", 100, &[("on", 50), ("off", 50)]);
    let h = harness("alice", vec![checkout(), search], store);
    assert!(!h.service.is_in_test(&TestId::new("checkout")));
    assert_eq!(h.service.assignment(&TestId::new("search")).unwrap().variant_id.as_str(), "on");
    assert_eq!(h.service.assignments().len(), 1);
}

#[test]
fn records_for_other_users_survive_rewrites() {
    let store = InMemoryKeyValueStore::new();
    let records = json!([
        {"userId": "mallory", "testId": "checkout", "variantId": "treatment", "assignedAt": 1, "sessionId": "s"},
    ]);
    store.set(ASSIGNMENTS_KEY, &records.to_string()).unwrap();

    let mut h = harness("alice", vec![checkout()], store.clone());
    assert_eq!(h.service.get_variant(&TestId::new("checkout")).unwrap().variant_id.as_str(), "control");
    let stored = stored_records(&store);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0], records[0]);
    assert_eq!(stored[1]["userId"], json!("alice"));

    assert_eq!(h.service.clear_assignments(), Persistence::Persisted);
    assert_eq!(stored_records(&store), vec![records[0].clone()]);

    let mallory = harness("mallory", vec![checkout()], store);
    assert_eq!(
        mallory.service.assignment(&TestId::new("checkout")).unwrap().variant_id.as_str(),
        "treatment"
    );
}

// ============================================================================
// SECTION: Overrides
// ============================================================================

#[test]
fn forced_variant_wins_over_bucket() {
    let store = InMemoryKeyValueStore::new();
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], store.clone());
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "control");

    let outcome = h.service.force_variant(&test_id, &VariantId::new("treatment"));
    assert_eq!(
        outcome,
        ForceOutcome::Applied {
            persistence: Persistence::Persisted
        }
    );
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "treatment");
    assert_eq!(stored_records(&store)[0]["variantId"], json!("treatment"));
    assert!(h.events.assignments().iter().any(|event| event.event == "variant_forced"));
}

#[test]
fn forced_variant_bypasses_traffic_allocation() {
    let configs = vec![experiment("checkout", 10, &[("control", 50), ("treatment", 50)])];
    let test_id = TestId::new("checkout");
    let mut h = harness("user_0", configs, InMemoryKeyValueStore::new());
    assert!(h.service.get_variant(&test_id).is_none());

    h.service.force_variant(&test_id, &VariantId::new("control"));
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "control");
}

#[test]
fn forcing_unknown_ids_changes_nothing() {
    let store = InMemoryKeyValueStore::new();
    let mut h = harness("alice", vec![checkout()], store.clone());
    assert_eq!(
        h.service.force_variant(&TestId::new("missing"), &VariantId::new("control")),
        ForceOutcome::Ignored
    );
    assert_eq!(
        h.service.force_variant(&TestId::new("checkout"), &VariantId::new("missing")),
        ForceOutcome::Ignored
    );
    assert!(h.service.assignments().is_empty());
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);
    assert_eq!(h.events.warnings().len(), 2);
    assert_eq!(h.events.warnings()[0].kind, "force_variant_ignored");
}

// ============================================================================
// SECTION: Activity
// ============================================================================

#[test]
fn unknown_and_inactive_tests_return_none() {
    let mut inactive = experiment("paused", 100, &[("control", 100)]);
    inactive.active = false;
    let store = InMemoryKeyValueStore::new();
    let mut h = harness("alice", vec![inactive], store.clone());

    assert_eq!(h.service.resolve_variant(&TestId::new("nope")).resolution, Resolution::UnknownTest);
    assert_eq!(
        h.service.resolve_variant(&TestId::new("paused")).resolution,
        Resolution::InactiveTest
    );
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);
    assert!(h.events.assignments().is_empty());
}

#[test]
fn window_controls_lookups_but_keeps_records() {
    let mut windowed = checkout();
    windowed.starts_at = Timestamp::from_unix_millis(NOW_MS + 1_000);
    windowed.ends_at = Some(Timestamp::from_unix_millis(NOW_MS + 2_000));
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![windowed], InMemoryKeyValueStore::new());

    assert!(h.service.get_variant(&test_id).is_none());
    h.clock.advance(1_000);
    assert!(h.service.get_variant(&test_id).is_some());
    h.clock.advance(1_000);
    assert!(h.service.get_variant(&test_id).is_none());
    assert!(h.service.is_in_test(&test_id));
}

// ============================================================================
// SECTION: Degraded Persistence
// ============================================================================

#[test]
fn malformed_stored_data_starts_empty() {
    let store = InMemoryKeyValueStore::new();
    store.set(ASSIGNMENTS_KEY, "{not json").unwrap();
    let mut h = harness("alice", vec![checkout()], store.clone());

    assert!(h.service.assignments().is_empty());
    assert_eq!(h.events.warnings()[0].kind, "assignments_malformed");
    assert!(h.service.get_variant(&TestId::new("checkout")).is_some());
    assert_eq!(stored_records(&store).len(), 1);
}

#[test]
fn quota_failure_keeps_assignment_in_memory() {
    let store = InMemoryKeyValueStore::with_quota(16);
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], store.clone());

    let resolution = h.service.resolve_variant(&test_id);
    assert_eq!(resolution.resolution, Resolution::Assigned);
    assert!(resolution.persistence.is_degraded());
    assert!(matches!(
        resolution.persistence,
        Persistence::Ephemeral {
            error: StoreError::QuotaExceeded(_)
        }
    ));
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);
    assert_eq!(h.events.assignments()[0].persistence, "ephemeral");
    assert_eq!(h.events.warnings()[0].kind, "assignment_store_degraded");

    let again = h.service.resolve_variant(&test_id);
    assert_eq!(again.resolution, Resolution::Existing);
    assert_eq!(again.variant, resolution.variant);
}

#[test]
fn unavailable_store_never_blocks_lookups() {
    let mut h = harness("alice", vec![checkout()], UnavailableStore);
    assert_eq!(h.events.warnings().len(), 1);

    let test_id = TestId::new("checkout");
    assert!(h.service.get_variant(&test_id).is_some());
    let outcome = h.service.force_variant(&test_id, &VariantId::new("treatment"));
    assert!(matches!(outcome, ForceOutcome::Applied { persistence } if persistence.is_degraded()));
    assert_eq!(h.service.get_variant(&test_id).unwrap().variant_id.as_str(), "treatment");
    assert!(h.service.clear_assignments().is_degraded());
}

#[test]
fn failed_read_never_overwrites_stored_assignments() {
    let inner = InMemoryKeyValueStore::new();
    let checkout_id = TestId::new("checkout");
    let mut setup = harness("alice", vec![checkout()], inner.clone());
    setup.service.force_variant(&checkout_id, &VariantId::new("treatment"));
    let before = inner.get(ASSIGNMENTS_KEY).unwrap();

    let search = experiment("search", 100, &[("on", 50), ("off", 50)]);
    let store = LockedOnFirstRead::new(inner.clone());
    let mut h = harness("alice", vec![checkout(), search.clone()], store);
    assert_eq!(h.events.warnings()[0].kind, "assignment_store_degraded");

    let resolution = h.service.resolve_variant(&TestId::new("search"));
    assert!(resolution.variant.is_some());
    assert!(matches!(
        resolution.persistence,
        Persistence::Ephemeral {
            error: StoreError::Store(_)
        }
    ));
    let outcome = h.service.force_variant(&checkout_id, &VariantId::new("control"));
    assert!(matches!(outcome, ForceOutcome::Applied { persistence } if persistence.is_degraded()));
    assert!(h.service.clear_assignments().is_degraded());
    assert_eq!(inner.get(ASSIGNMENTS_KEY).unwrap(), before);

    let mut fresh = harness("alice", vec![checkout(), search], inner);
    assert_eq!(fresh.service.get_variant(&checkout_id).unwrap().variant_id.as_str(), "treatment");
}

// ============================================================================
// SECTION: Conversions and Clearing
// ============================================================================

#[test]
fn conversions_require_assignment_and_tracked_metric() {
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], InMemoryKeyValueStore::new());
    assert!(!h.service.track_conversion(&test_id, "purchase", Some(19.99)));

    h.service.get_variant(&test_id);
    assert!(!h.service.track_conversion(&test_id, "signup", None));
    assert!(h.service.track_conversion(&test_id, "purchase", Some(19.99)));

    let conversions = h.events.conversions();
    assert_eq!(conversions.len(), 1);
    assert_eq!(conversions[0].variant_id, "control");
    assert_eq!(conversions[0].metric, "purchase");
    assert_eq!(conversions[0].value, Some(19.99));
}

#[test]
fn clear_assignments_removes_stored_list() {
    let store = InMemoryKeyValueStore::new();
    let test_id = TestId::new("checkout");
    let mut h = harness("alice", vec![checkout()], store.clone());
    h.service.get_variant(&test_id);

    assert_eq!(h.service.clear_assignments(), Persistence::Persisted);
    assert!(!h.service.is_in_test(&test_id));
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);
}

#[test]
fn custom_assignments_key_is_honored() {
    let store = InMemoryKeyValueStore::new();
    let registry = TestRegistry::from_configs([checkout()]).unwrap();
    let mut service = VariantService::new(
        registry,
        identity("alice"),
        store.clone(),
        FixedClock::new(Timestamp::from_unix_millis(NOW_MS)),
        MemoryEventSink::new(),
        VariantServiceConfig {
            assignments_key: "tenant_a.assignments".to_string(),
        },
    );
    service.get_variant(&TestId::new("checkout"));
    assert!(store.get("tenant_a.assignments").unwrap().is_some());
    assert_eq!(store.get(ASSIGNMENTS_KEY).unwrap(), None);
}
