// crates/variant-gate-config/tests/common/mod.rs
// ============================================================================
// Module: Common Config Test Fixtures
// Description: Shared TOML fixtures and assertion helpers for config tests.
// Purpose: Keep config validation tests small and consistent.
// ============================================================================

//! ## Overview
//! Provides a baseline valid configuration and helpers that assert a config
//! fails with a specific message.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

use variant_gate_config::ConfigError;
use variant_gate_config::VariantGateConfig;

/// Result type used by config tests.
pub type TestResult = Result<(), String>;

/// Baseline experiment definition with two variants.
pub const BASE_TESTS: &str = r#"
[[tests]]
test_id = "search_pricing"
name = "Search pricing"
traffic_allocation = 100
starts_at = "2024-01-01T00:00:00Z"
success_metrics = ["upgrade"]

[[tests.variants]]
variant_id = "search_free"
name = "Free search"
weight = 50
config = { show_upsell = false }

[[tests.variants]]
variant_id = "enhanced"
name = "Enhanced search"
weight = 50
config = { show_upsell = true, result_limit = 50 }
"#;

/// Parses TOML text into a validated config.
pub fn parse(content: &str) -> Result<VariantGateConfig, ConfigError> {
    VariantGateConfig::from_toml_str(content)
}

/// Asserts that `result` is an error whose message contains `needle`.
pub fn assert_invalid(result: Result<VariantGateConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}
