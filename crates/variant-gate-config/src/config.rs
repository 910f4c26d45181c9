// crates/variant-gate-config/src/config.rs
// ============================================================================
// Module: Variant Gate Configuration
// Description: Configuration loading and validation for Variant Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: variant-gate-core, variant-gate-store-sqlite, serde, toml, time
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Experiment windows are written as RFC 3339 strings and converted to unix
//! milliseconds. Missing or invalid configuration fails closed.
//!
//! ```toml
//! [store]
//! type = "sqlite"
//! path = "var/variant-gate.db"
//!
//! [events]
//! sink = "file"
//! path = "var/events.jsonl"
//!
//! [[tests]]
//! test_id = "search_pricing"
//! name = "Search pricing"
//! traffic_allocation = 100
//! starts_at = "2024-01-01T00:00:00Z"
//!
//! [[tests.variants]]
//! variant_id = "search_free"
//! name = "Free search"
//! weight = 50
//! config = { show_upsell = false }
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use variant_gate_core::TestConfig;
use variant_gate_core::TestId;
use variant_gate_core::TestRegistry;
use variant_gate_core::Timestamp;
use variant_gate_core::Variant;
use variant_gate_core::VariantId;
use variant_gate_core::VariantPayload;
use variant_gate_store_sqlite::SqliteStoreConfig;
use variant_gate_store_sqlite::SqliteStoreMode;
use variant_gate_store_sqlite::SqliteSyncMode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "variant-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "VARIANT_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured tests.
pub const MAX_TESTS: usize = 256;
/// Maximum number of variants per test.
pub const MAX_VARIANTS_PER_TEST: usize = 32;
/// Default busy timeout for sqlite stores (ms).
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root Variant Gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantGateConfig {
    /// Durable store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Event sink configuration.
    #[serde(default)]
    pub events: EventsConfig,
    /// Experiment definitions.
    #[serde(default)]
    pub tests: Vec<TestEntry>,
}

impl VariantGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.events.validate()?;
        if self.tests.len() > MAX_TESTS {
            return Err(ConfigError::Invalid(format!(
                "too many tests: {} (max {MAX_TESTS})",
                self.tests.len()
            )));
        }
        self.registry()?;
        Ok(())
    }

    /// Builds a validated test registry from the configured tests.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a test entry is malformed.
    pub fn registry(&self) -> Result<TestRegistry, ConfigError> {
        let mut registry = TestRegistry::new();
        for (index, entry) in self.tests.iter().enumerate() {
            let config = entry.to_test_config().map_err(|err| prefix_error(index, err))?;
            registry
                .register(config)
                .map_err(|err| ConfigError::Invalid(format!("tests[{index}]: {err}")))?;
        }
        Ok(registry)
    }
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional maximum stored value size in bytes.
    #[serde(default)]
    pub max_value_bytes: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_value_bytes: None,
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let Some(sqlite) = self.sqlite_config() else {
                    return Err(ConfigError::Invalid("sqlite store requires path".to_string()));
                };
                sqlite.validate().map_err(|err| ConfigError::Invalid(format!("store: {err}")))
            }
        }
    }

    /// Returns the `SQLite` store configuration when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        if self.store_type != StoreType::Sqlite {
            return None;
        }
        let path = self.path.clone()?;
        Some(SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            max_value_bytes: self.max_value_bytes,
        })
    }
}

/// Durable store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store (nothing survives the process).
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

// ============================================================================
// SECTION: Events Config
// ============================================================================

/// Event sink configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: EventSinkType,
    /// Output path for file sinks.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl EventsConfig {
    /// Validates event sink configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (EventSinkType::File, None) => {
                Err(ConfigError::Invalid("file event sink requires path".to_string()))
            }
            (EventSinkType::File, Some(path)) => {
                validate_path_string("events.path", &path.to_string_lossy())
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("events.path is only valid for file sinks".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

/// Event sink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

// ============================================================================
// SECTION: Test Entries
// ============================================================================

/// Experiment definition as written in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestEntry {
    /// Test identifier.
    pub test_id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Whether the test is switched on.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Percentage of buckets eligible for the test.
    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: u8,
    /// RFC 3339 start of the activity window.
    pub starts_at: String,
    /// Optional RFC 3339 end of the activity window.
    #[serde(default)]
    pub ends_at: Option<String>,
    /// Metric names accepted by conversion tracking.
    #[serde(default)]
    pub success_metrics: Vec<String>,
    /// Variants in bucket-walk order.
    #[serde(default)]
    pub variants: Vec<VariantEntry>,
}

impl TestEntry {
    /// Converts the entry into a validated [`TestConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when timestamps fail to parse or the
    /// resulting configuration is invalid.
    pub fn to_test_config(&self) -> Result<TestConfig, ConfigError> {
        if self.variants.len() > MAX_VARIANTS_PER_TEST {
            return Err(ConfigError::Invalid(format!(
                "too many variants: {} (max {MAX_VARIANTS_PER_TEST})",
                self.variants.len()
            )));
        }
        let config = TestConfig {
            test_id: TestId::new(self.test_id.trim()),
            name: self.name.clone(),
            description: self.description.clone(),
            variants: self.variants.iter().map(VariantEntry::to_variant).collect(),
            traffic_allocation: self.traffic_allocation,
            active: self.active,
            starts_at: parse_rfc3339("starts_at", &self.starts_at)?,
            ends_at: self
                .ends_at
                .as_deref()
                .map(|value| parse_rfc3339("ends_at", value))
                .transpose()?,
            success_metrics: self.success_metrics.clone(),
        };
        config.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(config)
    }
}

/// Variant definition as written in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantEntry {
    /// Variant identifier.
    pub variant_id: String,
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

impl VariantEntry {
    /// Converts the entry into a core [`Variant`].
    fn to_variant(&self) -> Variant {
        Variant {
            variant_id: VariantId::new(self.variant_id.trim()),
            name: self.name.clone(),
            description: self.description.clone(),
            weight: self.weight,
            config: self.config.clone(),
        }
    }
}

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Parses an RFC 3339 string into a unix-millisecond timestamp.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the value is not valid RFC 3339.
pub fn parse_rfc3339(field: &str, value: &str) -> Result<Timestamp, ConfigError> {
    let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339)
        .map_err(|err| ConfigError::Invalid(format!("{field} is not rfc3339: {err}")))?;
    let millis = i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000)
        .map_err(|_| ConfigError::Invalid(format!("{field} is out of range")))?;
    Ok(Timestamp::from_unix_millis(millis))
}

/// Formats a timestamp as an RFC 3339 UTC string.
#[must_use]
pub fn format_rfc3339(timestamp: Timestamp) -> Option<String> {
    let nanos = i128::from(timestamp.as_unix_millis()) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?.format(&Rfc3339).ok()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default busy timeout for sqlite stores.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Tests are active unless switched off.
const fn default_active() -> bool {
    true
}

/// Tests admit all traffic unless limited.
const fn default_traffic_allocation() -> u8 {
    100
}

/// Prefixes a test-entry error with its index.
fn prefix_error(index: usize, error: ConfigError) -> ConfigError {
    match error {
        ConfigError::Invalid(message) => ConfigError::Invalid(format!("tests[{index}]: {message}")),
        other => other,
    }
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
