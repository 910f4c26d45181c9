//! Experiment definition validation tests for variant-gate-config.
// crates/variant-gate-config/tests/test_validation.rs
// =============================================================================
// Module: Test Entry Validation Tests
// Description: Validate experiment entries convert into registry configs.
// Purpose: Ensure malformed experiments fail at load time.
// =============================================================================

mod common;

use common::BASE_TESTS;
use common::TestResult;
use common::assert_invalid;
use common::parse;
use serde_json::json;
use variant_gate_core::TestId;
use variant_gate_core::VariantId;

#[test]
fn base_tests_build_a_registry() -> TestResult {
    let config = parse(BASE_TESTS).map_err(|err| err.to_string())?;
    let registry = config.registry().map_err(|err| err.to_string())?;
    let test = registry
        .get(&TestId::new("search_pricing"))
        .ok_or_else(|| "search_pricing missing".to_string())?;
    if test.starts_at.as_unix_millis() != 1_704_067_200_000 {
        return Err(format!("unexpected starts_at {}", test.starts_at));
    }
    if !test.active || test.ends_at.is_some() {
        return Err("expected active test without end".to_string());
    }
    let enhanced = test
        .variant(&VariantId::new("enhanced"))
        .ok_or_else(|| "enhanced missing".to_string())?;
    if enhanced.flag("result_limit") != Some(&json!(50)) {
        return Err("unexpected enhanced payload".to_string());
    }
    Ok(())
}

#[test]
fn weights_not_summing_to_one_hundred_are_rejected() -> TestResult {
    let content = BASE_TESTS.replace(
        "weight = 50\nconfig = { show_upsell = false }",
        "weight = 40\nconfig = { show_upsell = false }",
    );
    assert_invalid(parse(&content), "tests[0]: test search_pricing variant weights sum to 90")?;
    Ok(())
}

#[test]
fn missing_variants_are_rejected() -> TestResult {
    let content = r#"
[[tests]]
test_id = "empty"
name = "Empty"
starts_at = "2024-01-01T00:00:00Z"
"#;
    assert_invalid(parse(content), "must define at least one variant")?;
    Ok(())
}

#[test]
fn invalid_timestamps_are_rejected() -> TestResult {
    let content = BASE_TESTS.replace("2024-01-01T00:00:00Z", "yesterday");
    assert_invalid(parse(&content), "starts_at is not rfc3339")?;
    Ok(())
}

#[test]
fn window_ending_before_start_is_rejected() -> TestResult {
    let content = BASE_TESTS.replace(
        "starts_at = \"2024-01-01T00:00:00Z\"",
        "starts_at = \"2024-01-01T00:00:00Z\"\nends_at = \"2023-12-31T00:00:00Z\"",
    );
    assert_invalid(parse(&content), "ends before it starts")?;
    Ok(())
}

#[test]
fn duplicate_test_ids_are_rejected() -> TestResult {
    let content = format!("{BASE_TESTS}\n{BASE_TESTS}");
    assert_invalid(parse(&content), "tests[1]: test search_pricing is already registered")?;
    Ok(())
}

#[test]
fn traffic_allocation_above_one_hundred_is_rejected() -> TestResult {
    let content = BASE_TESTS.replace("traffic_allocation = 100", "traffic_allocation = 120");
    assert_invalid(parse(&content), "traffic allocation 120 exceeds 100")?;
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() -> TestResult {
    let content =
        BASE_TESTS.replace("traffic_allocation = 100", "traffic_allocation = 100\nweighting = 3");
    assert_invalid(parse(&content), "config parse error")?;
    Ok(())
}

#[test]
fn defaults_apply_to_optional_fields() -> TestResult {
    let content = r#"
[[tests]]
test_id = "minimal"
name = "Minimal"
starts_at = "2024-06-01T12:00:00+02:00"

[[tests.variants]]
variant_id = "only"
name = "Only"
weight = 100
"#;
    let config = parse(content).map_err(|err| err.to_string())?;
    let entry = &config.tests[0];
    if !entry.active || entry.traffic_allocation != 100 || !entry.success_metrics.is_empty() {
        return Err("defaults not applied".to_string());
    }
    Ok(())
}
