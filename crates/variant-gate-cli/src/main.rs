// crates/variant-gate-cli/src/main.rs
// ============================================================================
// Module: Variant Gate CLI Entry Point
// Description: Command dispatcher for inspecting and driving variant assignment.
// Purpose: Give QA and operators a scriptable view of buckets and assignments.
// Dependencies: clap, variant-gate-config, variant-gate-core, variant-gate-store-sqlite
// ============================================================================

//! ## Overview
//! The Variant Gate CLI loads `variant-gate.toml`, builds the configured store
//! and event sink, and runs one assignment operation per invocation. Every
//! command prints a JSON document on stdout; failures print a message on
//! stderr and exit non-zero.
//!
//! Commands that take `--user` keep that user's assignments under their own
//! store key so several users can share one `SQLite` file. Without `--user`
//! the CLI behaves like a single embedded client: the user id is read from
//! (or created in) the durable store.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use thiserror::Error;
use variant_gate_config::EventSinkType;
use variant_gate_config::StoreType;
use variant_gate_config::VariantGateConfig;
use variant_gate_config::format_rfc3339;
use variant_gate_core::Assignment;
use variant_gate_core::Clock;
use variant_gate_core::ExperimentEventSink;
use variant_gate_core::FileEventSink;
use variant_gate_core::ForceOutcome;
use variant_gate_core::InMemoryKeyValueStore;
use variant_gate_core::NoopEventSink;
use variant_gate_core::Persistence;
use variant_gate_core::SharedKeyValueStore;
use variant_gate_core::StderrEventSink;
use variant_gate_core::SystemClock;
use variant_gate_core::TestConfig;
use variant_gate_core::TestId;
use variant_gate_core::TestRegistry;
use variant_gate_core::UserId;
use variant_gate_core::UserIdentity;
use variant_gate_core::VariantId;
use variant_gate_core::VariantPayload;
use variant_gate_core::VariantService;
use variant_gate_core::VariantServiceConfig;
use variant_gate_core::bucket_for;
use variant_gate_core::runtime::ASSIGNMENTS_KEY;
use variant_gate_core::runtime::identity::generate_session_id;
use variant_gate_core::runtime::is_included;
use variant_gate_core::runtime::preview_variant;
use variant_gate_core::string_hash;
use variant_gate_store_sqlite::SqliteKeyValueStore;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "variant-gate", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Experiment listing utilities.
    Tests {
        /// Selected tests subcommand.
        #[command(subcommand)]
        command: TestsCommand,
    },
    /// Resolve (and persist) the variant for a user.
    Assign(AssignCommand),
    /// Force a user into a specific variant.
    Force(ForceCommand),
    /// List stored assignments for a user.
    Assignments(UserCommand),
    /// Drop every stored assignment for a user.
    Clear(UserCommand),
    /// Record a conversion for an assigned user.
    Convert(ConvertCommand),
    /// Show the hash and bucket for a user id.
    Bucket(BucketCommand),
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a Variant Gate configuration file.
    Validate(ConfigArgs),
}

/// Tests subcommands.
#[derive(Subcommand, Debug)]
enum TestsCommand {
    /// List configured experiments.
    List(ConfigArgs),
}

/// Shared config path argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Optional config file path (defaults to variant-gate.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments selecting the user and config.
#[derive(Args, Debug)]
struct UserCommand {
    /// User id (defaults to the id kept in the configured store).
    #[arg(long, value_name = "ID")]
    user: Option<String>,
    /// Config arguments.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for variant assignment.
#[derive(Args, Debug)]
struct AssignCommand {
    /// Test identifier.
    #[arg(long, value_name = "ID")]
    test: String,
    /// User and config arguments.
    #[command(flatten)]
    target: UserCommand,
}

/// Arguments for forced assignment.
#[derive(Args, Debug)]
struct ForceCommand {
    /// Test identifier.
    #[arg(long, value_name = "ID")]
    test: String,
    /// Variant identifier.
    #[arg(long, value_name = "ID")]
    variant: String,
    /// User and config arguments.
    #[command(flatten)]
    target: UserCommand,
}

/// Arguments for conversion tracking.
#[derive(Args, Debug)]
struct ConvertCommand {
    /// Test identifier.
    #[arg(long, value_name = "ID")]
    test: String,
    /// Success metric name.
    #[arg(long, value_name = "NAME")]
    metric: String,
    /// Optional metric value.
    #[arg(long, value_name = "NUMBER")]
    value: Option<f64>,
    /// User and config arguments.
    #[command(flatten)]
    target: UserCommand,
}

/// Arguments for bucket inspection.
#[derive(Args, Debug)]
struct BucketCommand {
    /// User id to hash.
    #[arg(long, value_name = "ID")]
    user: String,
    /// Optional test to preview the variant for.
    #[arg(long, value_name = "ID")]
    test: Option<String>,
    /// Config arguments (used with `--test`).
    #[command(flatten)]
    config: ConfigArgs,
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Output of `config validate`.
#[derive(Debug, Serialize)]
struct ValidateReport {
    /// Validation status.
    status: &'static str,
    /// Number of configured tests.
    tests: usize,
}

/// One entry of `tests list`.
#[derive(Debug, Serialize)]
struct TestSummary<'a> {
    /// Test identifier.
    test_id: &'a TestId,
    /// Human-readable name.
    name: &'a str,
    /// Whether the test is switched on.
    active: bool,
    /// Whether the test is switched on and inside its window right now.
    live: bool,
    /// Traffic allocation percentage.
    traffic_allocation: u8,
    /// Window start (RFC 3339).
    starts_at: Option<String>,
    /// Window end (RFC 3339).
    ends_at: Option<String>,
    /// Accepted success metrics.
    success_metrics: &'a [String],
    /// Variants in bucket-walk order.
    variants: Vec<VariantSummary<'a>>,
    /// Canonical SHA-256 fingerprint of the configuration.
    fingerprint: Option<String>,
}

/// Variant entry of a [`TestSummary`].
#[derive(Debug, Serialize)]
struct VariantSummary<'a> {
    /// Variant identifier.
    variant_id: &'a VariantId,
    /// Human-readable name.
    name: &'a str,
    /// Weight in percent.
    weight: u8,
}

/// Output of `assign`.
#[derive(Debug, Serialize)]
struct AssignReport {
    /// User identifier.
    user_id: String,
    /// Session identifier.
    session_id: String,
    /// Test identifier.
    test_id: String,
    /// User bucket.
    bucket: u8,
    /// Resolution label.
    resolution: &'static str,
    /// Persistence label.
    persistence: &'static str,
    /// Store error when persistence degraded.
    persistence_error: Option<String>,
    /// Selected variant.
    variant_id: Option<String>,
    /// Selected variant payload.
    config: Option<VariantPayload>,
}

/// Output of `force`.
#[derive(Debug, Serialize)]
struct ForceReport {
    /// User identifier.
    user_id: String,
    /// Test identifier.
    test_id: String,
    /// Forced variant identifier.
    variant_id: String,
    /// Persistence label.
    persistence: &'static str,
    /// Store error when persistence degraded.
    persistence_error: Option<String>,
}

/// Output of `assignments`.
#[derive(Debug, Serialize)]
struct AssignmentsReport {
    /// User identifier.
    user_id: String,
    /// Stored assignments.
    assignments: Vec<Assignment>,
}

/// Output of `clear`.
#[derive(Debug, Serialize)]
struct ClearReport {
    /// User identifier.
    user_id: String,
    /// Persistence label.
    persistence: &'static str,
    /// Store error when persistence degraded.
    persistence_error: Option<String>,
}

/// Output of `convert`.
#[derive(Debug, Serialize)]
struct ConvertReport {
    /// User identifier.
    user_id: String,
    /// Test identifier.
    test_id: String,
    /// Metric name.
    metric: String,
    /// Whether a conversion event was emitted.
    recorded: bool,
}

/// Output of `bucket`.
#[derive(Debug, Serialize)]
struct BucketReport {
    /// User identifier.
    user_id: String,
    /// UTF-16 string hash of the user id.
    hash: i32,
    /// Bucket in `[0, 99]`.
    bucket: u8,
    /// Preview for the requested test.
    preview: Option<BucketPreview>,
}

/// Variant preview for one test.
#[derive(Debug, Serialize)]
struct BucketPreview {
    /// Test identifier.
    test_id: String,
    /// Traffic allocation percentage.
    traffic_allocation: u8,
    /// Whether the bucket passes the allocation gate.
    included: bool,
    /// Variant the bucket maps to.
    variant_id: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&format!("variant-gate {version}"))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        show_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Tests {
            command,
        } => command_tests(command),
        Commands::Assign(command) => command_assign(&command),
        Commands::Force(command) => command_force(&command),
        Commands::Assignments(command) => command_assignments(&command),
        Commands::Clear(command) => command_clear(&command),
        Commands::Convert(command) => command_convert(&command),
        Commands::Bucket(command) => command_bucket(&command),
    }
}

/// Prints the top-level help text.
fn show_help() -> CliResult<()> {
    let mut command = Cli::command();
    command.print_help().map_err(|err| CliError::new(output_error("stdout", &err)))?;
    write_stdout_line("").map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(())
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => command_config_validate(&command),
    }
}

/// Executes the config validation command.
fn command_config_validate(command: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    write_json(&ValidateReport {
        status: "ok",
        tests: config.tests.len(),
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Dispatches tests subcommands.
fn command_tests(command: TestsCommand) -> CliResult<ExitCode> {
    match command {
        TestsCommand::List(command) => command_tests_list(&command),
    }
}

/// Lists configured experiments with their current liveness.
fn command_tests_list(command: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    let registry = build_registry(&config)?;
    let now = SystemClock.now();
    let summaries: Vec<TestSummary<'_>> =
        registry.iter().map(|test| summarize_test(test, test.is_live_at(now))).collect();
    write_json(&summaries)?;
    Ok(ExitCode::SUCCESS)
}

/// Builds the listing entry for one test.
fn summarize_test(test: &TestConfig, live: bool) -> TestSummary<'_> {
    TestSummary {
        test_id: &test.test_id,
        name: &test.name,
        active: test.active,
        live,
        traffic_allocation: test.traffic_allocation,
        starts_at: format_rfc3339(test.starts_at),
        ends_at: test.ends_at.and_then(format_rfc3339),
        success_metrics: &test.success_metrics,
        variants: test
            .variants
            .iter()
            .map(|variant| VariantSummary {
                variant_id: &variant.variant_id,
                name: &variant.name,
                weight: variant.weight,
            })
            .collect(),
        fingerprint: test.canonical_hash().ok().map(|digest| digest.value),
    }
}

// ============================================================================
// SECTION: Assignment Commands
// ============================================================================

/// Resolves the variant for a user and test.
fn command_assign(command: &AssignCommand) -> CliResult<ExitCode> {
    let mut service = open_service(&command.target)?;
    let resolution = service.resolve_variant(&TestId::new(command.test.as_str()));
    let identity = service.identity();
    let (variant_id, config) = match resolution.variant {
        Some(variant) => (Some(variant.variant_id.to_string()), Some(variant.config)),
        None => (None, None),
    };
    write_json(&AssignReport {
        user_id: identity.user_id().to_string(),
        session_id: identity.session_id().to_string(),
        test_id: command.test.clone(),
        bucket: service.bucket(),
        resolution: resolution.resolution.label(),
        persistence: resolution.persistence.label(),
        persistence_error: persistence_error(&resolution.persistence),
        variant_id,
        config,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Forces a user into a variant.
fn command_force(command: &ForceCommand) -> CliResult<ExitCode> {
    let mut service = open_service(&command.target)?;
    let outcome = service
        .force_variant(&TestId::new(command.test.as_str()), &VariantId::new(command.variant.as_str()));
    let ForceOutcome::Applied {
        persistence,
    } = outcome
    else {
        return Err(CliError::new(format!(
            "force ignored: test {} has no variant {}",
            command.test, command.variant
        )));
    };
    write_json(&ForceReport {
        user_id: service.identity().user_id().to_string(),
        test_id: command.test.clone(),
        variant_id: command.variant.clone(),
        persistence: persistence.label(),
        persistence_error: persistence_error(&persistence),
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Lists stored assignments for a user.
fn command_assignments(command: &UserCommand) -> CliResult<ExitCode> {
    let service = open_service(command)?;
    write_json(&AssignmentsReport {
        user_id: service.identity().user_id().to_string(),
        assignments: service.assignments(),
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Drops stored assignments for a user.
fn command_clear(command: &UserCommand) -> CliResult<ExitCode> {
    let mut service = open_service(command)?;
    let persistence = service.clear_assignments();
    write_json(&ClearReport {
        user_id: service.identity().user_id().to_string(),
        persistence: persistence.label(),
        persistence_error: persistence_error(&persistence),
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Records a conversion for a user.
fn command_convert(command: &ConvertCommand) -> CliResult<ExitCode> {
    let service = open_service(&command.target)?;
    let recorded = service.track_conversion(
        &TestId::new(command.test.as_str()),
        &command.metric,
        command.value,
    );
    write_json(&ConvertReport {
        user_id: service.identity().user_id().to_string(),
        test_id: command.test.clone(),
        metric: command.metric.clone(),
        recorded,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Prints the hash and bucket for a user id.
fn command_bucket(command: &BucketCommand) -> CliResult<ExitCode> {
    let preview = match &command.test {
        Some(test) => {
            let config = load_config(command.config.config.as_deref())?;
            let registry = build_registry(&config)?;
            let test_id = TestId::new(test.as_str());
            let test_config = registry
                .get(&test_id)
                .ok_or_else(|| CliError::new(format!("unknown test: {test}")))?;
            Some(preview_for(test_config, &UserId::new(command.user.as_str())))
        }
        None => None,
    };
    write_json(&BucketReport {
        user_id: command.user.clone(),
        hash: string_hash(&command.user),
        bucket: bucket_for(&command.user),
        preview,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Computes the variant preview for a user without touching any store.
fn preview_for(config: &TestConfig, user_id: &UserId) -> BucketPreview {
    BucketPreview {
        test_id: config.test_id.to_string(),
        traffic_allocation: config.traffic_allocation,
        included: is_included(bucket_for(user_id.as_str()), config.traffic_allocation),
        variant_id: preview_variant(config, user_id).map(|variant| variant.variant_id.to_string()),
    }
}

// ============================================================================
// SECTION: Runtime Wiring
// ============================================================================

/// Service type driven by the CLI.
type CliService = VariantService<SharedKeyValueStore, SystemClock, Arc<dyn ExperimentEventSink>>;

/// Loads config and builds the service for the selected user.
fn open_service(command: &UserCommand) -> CliResult<CliService> {
    let config = load_config(command.config.config.as_deref())?;
    let registry = build_registry(&config)?;
    let store = build_store(&config)?;
    let events = build_event_sink(&config)?;
    let (identity, service_config) =
        resolve_identity(&store, command.user.as_deref(), &SystemClock)?;
    Ok(VariantService::new(registry, identity, store, SystemClock, events, service_config))
}

/// Loads and validates the configuration file.
fn load_config(path: Option<&Path>) -> CliResult<VariantGateConfig> {
    VariantGateConfig::load(path)
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Builds the test registry from configuration.
fn build_registry(config: &VariantGateConfig) -> CliResult<TestRegistry> {
    config.registry().map_err(|err| CliError::new(format!("failed to load tests: {err}")))
}

/// Opens the configured durable store.
fn build_store(config: &VariantGateConfig) -> CliResult<SharedKeyValueStore> {
    match config.store.store_type {
        StoreType::Memory => Ok(SharedKeyValueStore::from_store(InMemoryKeyValueStore::new())),
        StoreType::Sqlite => {
            let sqlite = config
                .store
                .sqlite_config()
                .ok_or_else(|| CliError::new("sqlite store requires path".to_string()))?;
            let store = SqliteKeyValueStore::new(sqlite)
                .map_err(|err| CliError::new(format!("failed to open sqlite store: {err}")))?;
            Ok(SharedKeyValueStore::from_store(store))
        }
    }
}

/// Builds the configured event sink.
fn build_event_sink(config: &VariantGateConfig) -> CliResult<Arc<dyn ExperimentEventSink>> {
    match config.events.sink {
        EventSinkType::Stderr => Ok(Arc::new(StderrEventSink)),
        EventSinkType::None => Ok(Arc::new(NoopEventSink)),
        EventSinkType::File => {
            let path = config
                .events
                .path
                .as_deref()
                .ok_or_else(|| CliError::new("file event sink requires path".to_string()))?;
            let sink = FileEventSink::new(path).map_err(|err| {
                CliError::new(format!("failed to open event log {}: {err}", path.display()))
            })?;
            Ok(Arc::new(sink))
        }
    }
}

/// Resolves the identity and assignments key for the selected user.
fn resolve_identity(
    store: &SharedKeyValueStore,
    user: Option<&str>,
    clock: &impl Clock,
) -> CliResult<(UserIdentity, VariantServiceConfig)> {
    let Some(user) = user else {
        let resolution = UserIdentity::resolve(store, &InMemoryKeyValueStore::new(), clock);
        if let Some(error) = persistence_error(&resolution.persistence) {
            write_stderr_line(&format!("warning: user id kept in memory only: {error}"))
                .map_err(|err| CliError::new(output_error("stderr", &err)))?;
        }
        return Ok((resolution.identity, VariantServiceConfig::default()));
    };
    let user = user.trim();
    if user.is_empty() {
        return Err(CliError::new("--user must not be blank".to_string()));
    }
    let session_id = generate_session_id(&mut rand::thread_rng(), clock.now());
    let identity = UserIdentity::new(UserId::new(user), session_id);
    let config = VariantServiceConfig {
        assignments_key: assignments_key_for(user),
    };
    Ok((identity, config))
}

/// Returns the durable key holding assignments for an explicit user.
fn assignments_key_for(user: &str) -> String {
    format!("{ASSIGNMENTS_KEY}.{user}")
}

/// Returns the store error message for degraded persistence.
fn persistence_error(persistence: &Persistence) -> Option<String> {
    match persistence {
        Persistence::Ephemeral {
            error,
        } => Some(error.to_string()),
        Persistence::Skipped | Persistence::Persisted => None,
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a value as pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
