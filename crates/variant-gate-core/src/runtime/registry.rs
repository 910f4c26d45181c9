// crates/variant-gate-core/src/runtime/registry.rs
// ============================================================================
// Module: Variant Gate Test Registry
// Description: In-process table of validated test configurations.
// Purpose: Reject malformed experiments before any user is bucketed.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The registry is the configuration store feeding the assignment service.
//! Every insertion runs [`TestConfig::validate`]; a registry therefore only
//! ever holds configurations whose weights sum to 100.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::experiment::ExperimentError;
use crate::core::experiment::TestConfig;
use crate::core::identifiers::TestId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Validated test configurations keyed by test id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestRegistry {
    /// Registered configurations.
    tests: BTreeMap<TestId, TestConfig>,
}

impl TestRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configurations, failing on the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when a configuration is invalid or duplicated.
    pub fn from_configs(configs: impl IntoIterator<Item = TestConfig>) -> Result<Self, ExperimentError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Registers a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the configuration is invalid or its id is
    /// already registered.
    pub fn register(&mut self, config: TestConfig) -> Result<(), ExperimentError> {
        config.validate()?;
        if self.tests.contains_key(&config.test_id) {
            return Err(ExperimentError::DuplicateTestId(config.test_id.to_string()));
        }
        self.tests.insert(config.test_id.clone(), config);
        Ok(())
    }

    /// Inserts or replaces a configuration, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the configuration is invalid.
    pub fn replace(&mut self, config: TestConfig) -> Result<Option<TestConfig>, ExperimentError> {
        config.validate()?;
        Ok(self.tests.insert(config.test_id.clone(), config))
    }

    /// Removes a configuration.
    pub fn remove(&mut self, test_id: &TestId) -> Option<TestConfig> {
        self.tests.remove(test_id)
    }

    /// Looks up a configuration.
    #[must_use]
    pub fn get(&self, test_id: &TestId) -> Option<&TestConfig> {
        self.tests.get(test_id)
    }

    /// Returns all configurations ordered by test id.
    pub fn iter(&self) -> impl Iterator<Item = &TestConfig> {
        self.tests.values()
    }

    /// Returns configurations that are live at `now`.
    #[must_use]
    pub fn active_tests(&self, now: Timestamp) -> Vec<&TestConfig> {
        self.tests.values().filter(|config| config.is_live_at(now)).collect()
    }

    /// Returns the number of registered configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true when no configurations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
