// crates/variant-gate-core/src/audit.rs
// ============================================================================
// Module: Variant Gate Event Logging
// Description: Structured experiment events and JSON-line sinks.
// Purpose: Emit assignment, warning, and conversion events without hard dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The service reports every assignment decision, degraded store, and
//! conversion as a structured event. Sinks are deliberately small so hosts
//! can route events to their own logging or analytics pipeline. Events carry
//! timestamps from the service clock, not from the sink.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Assignment decision event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentEvent {
    /// Event identifier (`variant_assigned`, `variant_forced`, `variant_excluded`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// User identifier.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Test identifier.
    pub test_id: String,
    /// Variant identifier when one was selected.
    pub variant_id: Option<String>,
    /// User bucket in `[0, 99]`.
    pub bucket: u8,
    /// Persistence outcome label.
    pub persistence: &'static str,
    /// Canonical SHA-256 fingerprint of the test configuration in force.
    pub config_fingerprint: Option<String>,
}

/// Operator-facing warning event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningEvent {
    /// Event identifier (always `warning`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Warning kind label.
    pub kind: &'static str,
    /// Test identifier when the warning concerns one test.
    pub test_id: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

/// Conversion event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionEvent {
    /// Event identifier (always `conversion`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// User identifier.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Test identifier.
    pub test_id: String,
    /// Variant the user was assigned.
    pub variant_id: String,
    /// Success metric name.
    pub metric: String,
    /// Optional metric value.
    pub value: Option<f64>,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Sink for experiment events.
pub trait ExperimentEventSink: Send + Sync {
    /// Record an assignment decision.
    fn record(&self, event: &AssignmentEvent);

    /// Record an operator-facing warning.
    fn record_warning(&self, _event: &WarningEvent) {}

    /// Record a conversion.
    fn record_conversion(&self, _event: &ConversionEvent) {}
}

impl<T: ExperimentEventSink + ?Sized> ExperimentEventSink for Arc<T> {
    fn record(&self, event: &AssignmentEvent) {
        (**self).record(event);
    }

    fn record_warning(&self, event: &WarningEvent) {
        (**self).record_warning(event);
    }

    fn record_conversion(&self, event: &ConversionEvent) {
        (**self).record_conversion(event);
    }
}

/// Event sink that logs JSON lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrEventSink;

impl ExperimentEventSink for StderrEventSink {
    fn record(&self, event: &AssignmentEvent) {
        write_stderr_json(event);
    }

    fn record_warning(&self, event: &WarningEvent) {
        write_stderr_json(event);
    }

    fn record_conversion(&self, event: &ConversionEvent) {
        write_stderr_json(event);
    }
}

/// Event sink that appends JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one serialized event.
    fn append<T: Serialize>(&self, event: &T) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl ExperimentEventSink for FileEventSink {
    fn record(&self, event: &AssignmentEvent) {
        self.append(event);
    }

    fn record_warning(&self, event: &WarningEvent) {
        self.append(event);
    }

    fn record_conversion(&self, event: &ConversionEvent) {
        self.append(event);
    }
}

/// No-op event sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl ExperimentEventSink for NoopEventSink {
    fn record(&self, _event: &AssignmentEvent) {}
}

/// Event sink that keeps events in memory; clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    /// Recorded assignment events.
    assignments: Arc<Mutex<Vec<AssignmentEvent>>>,
    /// Recorded warnings.
    warnings: Arc<Mutex<Vec<WarningEvent>>>,
    /// Recorded conversions.
    conversions: Arc<Mutex<Vec<ConversionEvent>>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns recorded assignment events.
    #[must_use]
    pub fn assignments(&self) -> Vec<AssignmentEvent> {
        self.assignments.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<WarningEvent> {
        self.warnings.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded conversions.
    #[must_use]
    pub fn conversions(&self) -> Vec<ConversionEvent> {
        self.conversions.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl ExperimentEventSink for MemoryEventSink {
    fn record(&self, event: &AssignmentEvent) {
        if let Ok(mut events) = self.assignments.lock() {
            events.push(event.clone());
        }
    }

    fn record_warning(&self, event: &WarningEvent) {
        if let Ok(mut events) = self.warnings.lock() {
            events.push(event.clone());
        }
    }

    fn record_conversion(&self, event: &ConversionEvent) {
        if let Ok(mut events) = self.conversions.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Writes one serialized event to stderr.
fn write_stderr_json<T: Serialize>(event: &T) {
    if let Ok(payload) = serde_json::to_string(event) {
        let _ = writeln!(std::io::stderr(), "{payload}");
    }
}
