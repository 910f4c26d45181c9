// crates/variant-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Key-Value Store
// Description: Durable KeyValueStore backed by SQLite WAL.
// Purpose: Persist identities and assignment lists across processes.
// Dependencies: variant-gate-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`KeyValueStore`] using `SQLite`. Each
//! value is stored with a SHA-256 hash of its bytes; reads verify the hash and
//! fail closed on mismatch. Database contents are treated as untrusted: size
//! limits apply on both write and read paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use variant_gate_core::KeyValueStore;
use variant_gate_core::StoreError;
use variant_gate_core::hashing::DEFAULT_HASH_ALGORITHM;
use variant_gate_core::hashing::HashAlgorithm;
use variant_gate_core::hashing::hash_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum stored value size accepted by the store.
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;
/// Maximum key length in bytes.
const MAX_KEY_BYTES: usize = 512;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` key-value store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `max_value_bytes`, when set, must be greater than zero and no more than
///   [`MAX_VALUE_BYTES`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional maximum value size in bytes.
    #[serde(default)]
    pub max_value_bytes: Option<usize>,
}

impl SqliteStoreConfig {
    /// Creates a configuration with default settings for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_value_bytes: None,
        }
    }

    /// Returns the effective value size limit.
    #[must_use]
    pub const fn value_limit(&self) -> usize {
        match self.max_value_bytes {
            Some(limit) => limit,
            None => MAX_VALUE_BYTES,
        }
    }

    /// Validates the configuration without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a limit or path is out of range.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        validate_store_path(&self.path)?;
        if let Some(max_bytes) = self.max_value_bytes
            && (max_bytes == 0 || max_bytes > MAX_VALUE_BYTES)
        {
            return Err(SqliteStoreError::Invalid(format!(
                "max_value_bytes out of range: {max_bytes} (max {MAX_VALUE_BYTES})"
            )));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw stored values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store payload exceeded configured size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::QuotaExceeded(format!(
                "value exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed key-value store with WAL support.
///
/// # Invariants
/// - Loads verify stored hashes before returning values.
/// - `SQLite` connection access is serialized through a mutex.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

/// Raw stored row for a key.
#[derive(Debug)]
struct StoredValue {
    /// Stored value bytes.
    bytes: Vec<u8>,
    /// Stored hash value for the bytes.
    hash_value: String,
    /// Stored hash algorithm label.
    hash_algorithm: String,
}

impl SqliteKeyValueStore {
    /// Opens an `SQLite`-backed key-value store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Verifies the store can execute a simple SQL statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the mutex is poisoned or the query fails.
    pub fn readiness(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row("SELECT 1", params![], |row| row.get::<_, i64>(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Lists stored keys in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the query fails.
    pub fn keys(&self) -> Result<Vec<String>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT key FROM kv_entries ORDER BY key")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![], |row| row.get::<_, String>(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|err| SqliteStoreError::Db(err.to_string()))?);
        }
        Ok(keys)
    }

    /// Loads and verifies the value stored under `key`.
    fn load_value(&self, key: &str) -> Result<Option<String>, SqliteStoreError> {
        validate_key(key)?;
        let Some(stored) = self.fetch_value(key)? else {
            return Ok(None);
        };
        let algorithm = parse_hash_algorithm(&stored.hash_algorithm)?;
        let expected = hash_bytes(algorithm, &stored.bytes);
        if expected.value != stored.hash_value {
            return Err(SqliteStoreError::Corrupt(format!("hash mismatch for key {key}")));
        }
        let value = String::from_utf8(stored.bytes)
            .map_err(|_| SqliteStoreError::Invalid(format!("value for key {key} is not utf-8")))?;
        Ok(Some(value))
    }

    /// Fetches the raw row for `key`, enforcing the size limit before reading bytes.
    fn fetch_value(&self, key: &str) -> Result<Option<StoredValue>, SqliteStoreError> {
        let limit = self.config.value_limit();
        let guard = self.lock()?;
        let metadata = guard
            .query_row(
                "SELECT length(value), value_hash, hash_algorithm FROM kv_entries WHERE key = ?1",
                params![key],
                |row| {
                    let length: i64 = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let algorithm: String = row.get(2)?;
                    Ok((length, hash, algorithm))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((length, hash_value, hash_algorithm)) = metadata else {
            return Ok(None);
        };
        let length = usize::try_from(length).map_err(|_| {
            SqliteStoreError::Invalid(format!("negative value length for key {key}"))
        })?;
        if length > limit {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: limit,
                actual_bytes: length,
            });
        }
        let bytes: Vec<u8> = guard
            .query_row("SELECT value FROM kv_entries WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(Some(StoredValue {
            bytes,
            hash_value,
            hash_algorithm,
        }))
    }

    /// Writes `value` under `key` with a fresh integrity hash.
    fn save_value(&self, key: &str, value: &str) -> Result<(), SqliteStoreError> {
        validate_key(key)?;
        let limit = self.config.value_limit();
        if value.len() > limit {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: limit,
                actual_bytes: value.len(),
            });
        }
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, value.as_bytes());
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO kv_entries (key, value, value_hash, hash_algorithm, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    value_hash = excluded.value_hash,
                    hash_algorithm = excluded.hash_algorithm,
                    saved_at = excluded.saved_at",
                params![key, value.as_bytes(), digest.value, digest.algorithm.label(), unix_millis()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Deletes the row for `key`.
    fn delete_value(&self, key: &str) -> Result<(), SqliteStoreError> {
        validate_key(key)?;
        let guard = self.lock()?;
        guard
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);
        Ok(())
    }

    /// Locks the connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.load_value(key).map_err(StoreError::from)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.save_value(key, value).map_err(StoreError::from)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.delete_value(key).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Validates key length.
fn validate_key(key: &str) -> Result<(), SqliteStoreError> {
    if key.is_empty() {
        return Err(SqliteStoreError::Invalid("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(SqliteStoreError::Invalid(format!(
            "key exceeds length limit: {} bytes (max {MAX_KEY_BYTES})",
            key.len()
        )));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL,
                    value_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

/// Parses a hash algorithm label.
fn parse_hash_algorithm(label: &str) -> Result<HashAlgorithm, SqliteStoreError> {
    HashAlgorithm::from_label(label)
        .ok_or_else(|| SqliteStoreError::Invalid(format!("unsupported hash algorithm: {label}")))
}
