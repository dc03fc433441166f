// crates/ledger-cli/src/main.rs
// ============================================================================
// Module: Ledger CLI Entry Point
// Description: Command dispatcher for the ledgergate artifact ledger.
// Purpose: Expose PlanManager, Ledger, and ContentStore operations as a thin
//          administrative CLI over a vault's `.irrev` directory.
// Dependencies: clap, ledger-core, serde, serde_json, thiserror, time, toml
// ============================================================================

//! ## Overview
//! `ledgergate` drives the propose -> validate -> approve -> execute
//! lifecycle directly against [`ledger_core::PlanManager`], and inspects the
//! resulting ledger through [`ledger_core::Ledger`]'s query and
//! derived-summary methods. It does not run a handler: `execute` takes the
//! result content from a file on disk, since domain-specific handler bodies
//! are supplied by embedders of `ledger-core`, not by this binary.

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use ledger_core::ArtifactId;
use ledger_core::Config;
use ledger_core::ContentStore;
use ledger_core::ContentStoreError;
use ledger_core::ExecutionId;
use ledger_core::Ledger;
use ledger_core::LedgerGateError;
use ledger_core::PlanManager;
use ledger_core::RiskClass;
use ledger_core::TypePackRegistry;
use ledger_core::config::ConfigOverrides;
use ledger_core::events::ArtifactType;
use ledger_core::events::Event;
use ledger_core::events::EventType;
use ledger_core::events::ExecutionPhase;
use ledger_core::events::InputRef;
use ledger_core::hashing::StoredContent;
use ledger_core::ledger::ExecutionSummary;
use ledger_core::ledger::Query;
use ledger_core::ledger::QueryOrder;
use ledger_core::plan_manager::ApprovalPolicy;
use ledger_core::plan_manager::ExecutionOutcome;
use ledger_core::ruleset::Ruleset;
use ledger_core::snapshot::ArtifactSnapshot;
use ledger_core::snapshot::ArtifactStatus;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: CLI types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "ledgergate", disable_help_subcommand = true)]
struct Cli {
    /// Optional `ledgergate.toml` config file (layered under env and flag overrides).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Vault root directory. Defaults to the current directory.
    #[arg(long, global = true, value_name = "DIR")]
    vault_root: Option<PathBuf>,
    /// `.irrev` directory, relative to the vault root unless absolute.
    #[arg(long, global = true, value_name = "DIR")]
    irrev_dir: Option<PathBuf>,
    /// Actor recorded on events this invocation appends, when the subcommand
    /// does not take its own actor argument.
    #[arg(long, global = true, value_name = "ACTOR")]
    actor: Option<String>,
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Creates the vault's `.irrev` directory and its content store, if absent.
    Init,
    /// Proposes a new artifact, storing its content and appending `artifact.created`.
    Propose(ProposeArgs),
    /// Validates a created artifact against its type pack.
    Validate(ValidateArgs),
    /// Grants approval to a validated artifact.
    Approve(ApproveArgs),
    /// Executes an approved artifact using a handler result read from a file.
    Execute(ExecuteArgs),
    /// Prints an artifact's current snapshot as JSON.
    Show(ShowArgs),
    /// Prints every event recorded for an artifact, in append order.
    Events(ShowArgs),
    /// Runs an ad-hoc query against the ledger.
    Query(QueryArgs),
    /// Lists known artifacts, optionally filtered by status or type.
    List(ListArgs),
    /// Lists validated artifacts with no outstanding validation errors.
    PendingApprovals,
    /// Prints an artifact's full audit trail.
    AuditTrail(ShowArgs),
    /// Execution-timeline inspection.
    Execution {
        /// Selected execution subcommand.
        #[command(subcommand)]
        command: ExecutionCommand,
    },
    /// Constraint and invariant audit-data inspection.
    Constraints {
        /// Selected constraints subcommand.
        #[command(subcommand)]
        command: ConstraintsCommand,
    },
    /// Bundle inspection.
    Bundle {
        /// Selected bundle subcommand.
        #[command(subcommand)]
        command: BundleCommand,
    },
    /// Content-addressed store inspection.
    Content {
        /// Selected content subcommand.
        #[command(subcommand)]
        command: ContentCommand,
    },
}

/// Arguments for `propose`.
#[derive(Args, Debug)]
struct ProposeArgs {
    /// Operation name, e.g. `"vault.rename_note"`.
    operation: String,
    /// Path to a JSON file holding the operation's payload. Defaults to `{}`.
    #[arg(long, value_name = "PATH")]
    payload_file: Option<PathBuf>,
    /// Artifact type to record, as its wire string (`"plan"`, `"approval"`, ...).
    #[arg(long, default_value = "plan")]
    artifact_type: String,
    /// Handler this plan should be routed to, if declared.
    #[arg(long)]
    delegate_to: Option<String>,
    /// Originating surface recorded on the artifact. Defaults to the
    /// resolved config's default surface.
    #[arg(long)]
    surface: Option<String>,
    /// Actor proposing this artifact. Defaults to the resolved config's
    /// default actor.
    #[arg(long)]
    actor: Option<String>,
    /// Input reference in `artifact_id:content_id` form. Repeatable.
    #[arg(long = "input", value_name = "ARTIFACT_ID:CONTENT_ID")]
    inputs: Vec<String>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
struct ValidateArgs {
    /// Artifact to validate.
    artifact_id: String,
    /// Validator identity recorded on the event.
    #[arg(long, default_value = "cli")]
    validator: String,
}

/// Arguments for `approve`.
#[derive(Args, Debug)]
struct ApproveArgs {
    /// Artifact to approve.
    artifact_id: String,
    /// Approver identity recorded on the event.
    approver: String,
    /// Scope recorded with the approval. Defaults to the target's operation.
    #[arg(long)]
    scope: Option<String>,
    /// Explicitly acknowledges destructive risk. Required when the
    /// artifact's risk class demands it.
    #[arg(long)]
    force_ack: bool,
}

/// Arguments for `execute`.
#[derive(Args, Debug)]
struct ExecuteArgs {
    /// Artifact to execute.
    artifact_id: String,
    /// Executor identity recorded on the event.
    #[arg(long, default_value = "cli")]
    executor: String,
    /// Path to a JSON file holding the result content to store.
    #[arg(long, value_name = "PATH")]
    result_file: PathBuf,
    /// Artifact type to record for the result artifact.
    #[arg(long, default_value = "result")]
    result_artifact_type: String,
    /// Notes erased, for the erasure-cost report.
    #[arg(long, default_value_t = 0)]
    erased_notes: u64,
    /// Graph edges erased, for the erasure-cost report.
    #[arg(long, default_value_t = 0)]
    erased_edges: u64,
    /// Files erased, for the erasure-cost report.
    #[arg(long, default_value_t = 0)]
    erased_files: u64,
    /// Bytes erased, for the erasure-cost report.
    #[arg(long, default_value_t = 0)]
    erased_bytes: u64,
    /// Notes created, for the creation-summary report.
    #[arg(long, default_value_t = 0)]
    created_notes: u64,
    /// Graph edges created, for the creation-summary report.
    #[arg(long, default_value_t = 0)]
    created_edges: u64,
    /// Files created, for the creation-summary report.
    #[arg(long, default_value_t = 0)]
    created_files: u64,
    /// Bytes written, for the creation-summary report.
    #[arg(long, default_value_t = 0)]
    created_bytes: u64,
}

/// Arguments shared by `show`, `events`, and `audit-trail`.
#[derive(Args, Debug)]
struct ShowArgs {
    /// Artifact to inspect.
    artifact_id: String,
}

/// Arguments for `query`.
#[derive(Args, Debug)]
struct QueryArgs {
    /// Restrict to this artifact.
    #[arg(long)]
    artifact_id: Option<String>,
    /// Restrict to this execution.
    #[arg(long)]
    execution_id: Option<String>,
    /// Restrict to this event type's wire string.
    #[arg(long)]
    event_type: Option<String>,
    /// Restrict to this actor.
    #[arg(long)]
    actor: Option<String>,
    /// Restrict to events at or after this RFC 3339 timestamp.
    #[arg(long)]
    since: Option<String>,
    /// Restrict to events at or before this RFC 3339 timestamp.
    #[arg(long)]
    until: Option<String>,
    /// Cap the number of results returned.
    #[arg(long)]
    limit: Option<usize>,
    /// Sort order of the returned events.
    #[arg(long, value_enum, default_value_t = OrderArg::Ascending)]
    order: OrderArg,
}

/// CLI-facing mirror of [`QueryOrder`], needed because clap's `ValueEnum`
/// cannot be derived on a foreign type.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum OrderArg {
    /// Chronological append order.
    Ascending,
    /// Reverse chronological order.
    Descending,
}

impl From<OrderArg> for QueryOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Ascending => Self::Ascending,
            OrderArg::Descending => Self::Descending,
        }
    }
}

/// Arguments for `list`.
#[derive(Args, Debug)]
struct ListArgs {
    /// Restrict to artifacts in this lifecycle status.
    #[arg(long)]
    status: Option<String>,
    /// Restrict to artifacts of this wire-string artifact type.
    #[arg(long)]
    artifact_type: Option<String>,
}

/// Execution subcommands.
#[derive(Subcommand, Debug)]
enum ExecutionCommand {
    /// Prints the derived summary for an execution id.
    Summary {
        /// Execution to summarize.
        execution_id: String,
    },
    /// Prints the full phase timeline for an execution id.
    Timeline {
        /// Execution to inspect.
        execution_id: String,
    },
    /// Prints the most recent execution id recorded for an artifact.
    Latest {
        /// Artifact to inspect.
        artifact_id: String,
    },
}

/// Constraints subcommands.
#[derive(Subcommand, Debug)]
enum ConstraintsCommand {
    /// Parses a ruleset TOML file and prints its structural summary, without
    /// evaluating it against any vault data.
    Lint {
        /// Path to a ruleset TOML file.
        path: PathBuf,
    },
    /// Prints the derived constraint-evaluation rollup for an artifact.
    Summary {
        /// Artifact to inspect.
        artifact_id: String,
    },
    /// Prints the derived invariant rollup for an artifact.
    Invariants {
        /// Artifact to inspect.
        artifact_id: String,
    },
}

/// Bundle subcommands.
#[derive(Subcommand, Debug)]
enum BundleCommand {
    /// Prints a bundle artifact's stored content.
    Show {
        /// The bundle artifact to inspect.
        artifact_id: String,
    },
    /// Lists every known bundle artifact id.
    List,
}

/// Content-store subcommands.
#[derive(Subcommand, Debug)]
enum ContentCommand {
    /// Prints stored content by its content id.
    Get {
        /// Content id to fetch.
        content_id: String,
    },
    /// Re-hashes stored content and confirms it matches its own id.
    Verify {
        /// Content id to verify.
        content_id: String,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper aggregating core failures and this binary's own I/O and
/// parsing concerns.
#[derive(Debug, Error)]
enum CliError {
    /// A `ledger-core` operation failed.
    #[error(transparent)]
    Core(#[from] LedgerGateError),
    /// Reading a file given on the command line failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A file given on the command line was not valid JSON.
    #[error("failed to parse JSON from {path}: {source}")]
    Json {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A ruleset file was not valid TOML or did not match the ruleset shape.
    #[error("failed to parse ruleset {path}: {source}")]
    Toml {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// An argument the caller gave could not be parsed into the expected shape.
    #[error("{0}")]
    BadArgument(String),
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments, resolves configuration, and dispatches to the selected
/// subcommand.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        vault_root: cli.vault_root.clone(),
        irrev_dir: cli.irrev_dir.clone(),
        default_actor: cli.actor.clone(),
        default_surface: None,
    };
    let config = Config::load(cli.config.as_deref(), overrides).map_err(LedgerGateError::from)?;
    config.validate().map_err(LedgerGateError::from)?;

    match cli.command {
        Commands::Init => command_init(&config),
        Commands::Propose(args) => command_propose(&config, args),
        Commands::Validate(args) => command_validate(&config, args),
        Commands::Approve(args) => command_approve(&config, args),
        Commands::Execute(args) => command_execute(&config, args),
        Commands::Show(args) => command_show(&config, args),
        Commands::Events(args) => command_events(&config, args),
        Commands::Query(args) => command_query(&config, args),
        Commands::List(args) => command_list(&config, args),
        Commands::PendingApprovals => command_pending_approvals(&config),
        Commands::AuditTrail(args) => command_audit_trail(&config, args),
        Commands::Execution { command } => command_execution(&config, command),
        Commands::Constraints { command } => command_constraints(&config, command),
        Commands::Bundle { command } => command_bundle(&config, command),
        Commands::Content { command } => command_content(&config, command),
    }
}

// ============================================================================
// SECTION: Component wiring
// ============================================================================

/// Opens the ledger and content store rooted at the configured `.irrev` path.
fn open_components(config: &Config) -> CliResult<(Ledger, ContentStore, TypePackRegistry)> {
    let irrev_path = config.irrev_path();
    let ledger = Ledger::open(&irrev_path).map_err(LedgerGateError::from)?;
    let content_store = ContentStore::open(&irrev_path).map_err(LedgerGateError::from)?;
    Ok((ledger, content_store, TypePackRegistry::new()))
}

fn parse_artifact_id(raw: &str) -> CliResult<ArtifactId> {
    ArtifactId::parse(raw).map_err(|err| CliError::BadArgument(format!("invalid artifact id '{raw}': {err}")))
}

fn parse_execution_id(raw: &str) -> ExecutionId {
    ExecutionId::from(raw)
}

fn parse_timestamp(raw: &str) -> CliResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| CliError::BadArgument(format!("invalid RFC 3339 timestamp '{raw}': {err}")))
}

fn parse_input_ref(raw: &str) -> CliResult<InputRef> {
    let (artifact_id, content_id) = raw
        .split_once(':')
        .ok_or_else(|| CliError::BadArgument(format!("input '{raw}' must be of the form artifact_id:content_id")))?;
    Ok(InputRef { artifact_id: parse_artifact_id(artifact_id)?, content_id: content_id.into() })
}

fn read_json_file(path: &Path) -> CliResult<Value> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&raw).map_err(|source| CliError::Json { path: path.to_path_buf(), source })
}

fn read_ruleset_file(path: &Path) -> CliResult<Ruleset> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| CliError::Toml { path: path.to_path_buf(), source: Box::new(source) })
}

// ============================================================================
// SECTION: Init
// ============================================================================

fn command_init(config: &Config) -> CliResult<ExitCode> {
    let (_, _, _) = open_components(config)?;
    write_json_value(&json!({
        "vault_root": config.vault_root,
        "irrev_path": config.irrev_path(),
    }))
}

// ============================================================================
// SECTION: Plan protocol
// ============================================================================

fn command_propose(config: &Config, args: ProposeArgs) -> CliResult<ExitCode> {
    let (ledger, content_store, type_packs) = open_components(config)?;
    let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());

    let payload = match &args.payload_file {
        Some(path) => read_json_file(path)?,
        None => json!({}),
    };
    let inputs = args.inputs.iter().map(|raw| parse_input_ref(raw)).collect::<CliResult<Vec<_>>>()?;
    let actor = args.actor.unwrap_or_else(|| config.default_actor.clone());
    let surface = Some(args.surface.unwrap_or_else(|| config.default_surface.clone()));
    let artifact_type = ArtifactType::from_wire_str(&args.artifact_type);

    let artifact_id = manager
        .propose(&args.operation, payload, &actor, args.delegate_to, inputs, surface, artifact_type)
        .map_err(LedgerGateError::from)?;
    write_json_value(&json!({"artifact_id": artifact_id.to_string()}))
}

fn command_validate(config: &Config, args: ValidateArgs) -> CliResult<ExitCode> {
    let (ledger, content_store, type_packs) = open_components(config)?;
    let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let passed = manager.validate(&artifact_id, &args.validator, None).map_err(LedgerGateError::from)?;
    write_json_value(&json!({"artifact_id": artifact_id.to_string(), "passed": passed}))?;
    if passed { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::FAILURE) }
}

fn command_approve(config: &Config, args: ApproveArgs) -> CliResult<ExitCode> {
    let (ledger, content_store, type_packs) = open_components(config)?;
    let policy = ApprovalPolicy { require_force_ack_for: config.require_force_ack_for.clone() };
    let manager = PlanManager::new(&ledger, &content_store, &type_packs, policy);
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let approval_artifact_id = manager
        .approve(&artifact_id, &args.approver, args.scope, args.force_ack)
        .map_err(LedgerGateError::from)?;
    write_json_value(&json!({
        "artifact_id": artifact_id.to_string(),
        "approval_artifact_id": approval_artifact_id.to_string(),
    }))
}

fn command_execute(config: &Config, args: ExecuteArgs) -> CliResult<ExitCode> {
    let (ledger, content_store, type_packs) = open_components(config)?;
    let policy = ApprovalPolicy { require_force_ack_for: config.require_force_ack_for.clone() };
    let manager = PlanManager::new(&ledger, &content_store, &type_packs, policy);
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let result_content = read_json_file(&args.result_file)?;
    let result_artifact_type = ArtifactType::from_wire_str(&args.result_artifact_type);

    let erasure_cost = ledger_core::events::ErasureCost {
        notes: args.erased_notes,
        edges: args.erased_edges,
        files: args.erased_files,
        bytes: args.erased_bytes,
    };
    let creation_summary = ledger_core::events::CreationSummary {
        notes: args.created_notes,
        edges: args.created_edges,
        files: args.created_files,
        bytes: args.created_bytes,
    };

    let result_artifact_id = manager
        .execute(&artifact_id, &args.executor, |_plan_content| {
            Ok(ExecutionOutcome { result_content, erasure_cost, creation_summary, result_artifact_type })
        })
        .map_err(LedgerGateError::from)?;
    write_json_value(&json!({
        "artifact_id": artifact_id.to_string(),
        "result_artifact_id": result_artifact_id.to_string(),
    }))
}

// ============================================================================
// SECTION: Inspection
// ============================================================================

fn command_show(config: &Config, args: ShowArgs) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let snapshot = ledger.snapshot(&artifact_id).map_err(LedgerGateError::from)?;
    write_json_value(&snapshot_to_json(&snapshot))
}

fn command_events(config: &Config, args: ShowArgs) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let events = ledger.events_for(&artifact_id).map_err(LedgerGateError::from)?;
    write_events(&events)
}

fn command_query(config: &Config, args: QueryArgs) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;

    let artifact_id = args.artifact_id.as_deref().map(parse_artifact_id).transpose()?;
    let execution_id = args.execution_id.as_deref().map(parse_execution_id);
    let event_type = args.event_type.as_deref().map(parse_event_type).transpose()?;
    let since = args.since.as_deref().map(parse_timestamp).transpose()?;
    let until = args.until.as_deref().map(parse_timestamp).transpose()?;

    let query = Query {
        artifact_id,
        execution_id,
        event_type,
        since,
        until,
        actor: args.actor.as_deref(),
        predicate: None,
        limit: args.limit,
        order: args.order.into(),
        after_event_id: None,
    };
    let events = ledger.query(&query).map_err(LedgerGateError::from)?;
    write_events(&events)
}

fn command_list(config: &Config, args: ListArgs) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;

    if let Some(status) = &args.status {
        let status = ArtifactStatus::from_wire_str(status)
            .ok_or_else(|| CliError::BadArgument(format!("unknown artifact status '{status}'")))?;
        let snapshots = ledger.list_by_status(status).map_err(LedgerGateError::from)?;
        let values: Vec<Value> = snapshots.iter().map(snapshot_to_json).collect();
        return write_json_value(&Value::Array(values));
    }
    if let Some(artifact_type) = &args.artifact_type {
        let artifact_type = ArtifactType::from_wire_str(artifact_type);
        let ids = ledger.list_by_type(&artifact_type).map_err(LedgerGateError::from)?;
        let values: Vec<Value> = ids.iter().map(|id| json!(id.to_string())).collect();
        return write_json_value(&Value::Array(values));
    }

    let ids = ledger.known_artifact_ids().map_err(LedgerGateError::from)?;
    let values: Vec<Value> = ids.iter().map(|id| json!(id.to_string())).collect();
    write_json_value(&Value::Array(values))
}

fn command_pending_approvals(config: &Config) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;
    let snapshots = ledger.pending_approvals().map_err(LedgerGateError::from)?;
    let values: Vec<Value> = snapshots.iter().map(snapshot_to_json).collect();
    write_json_value(&Value::Array(values))
}

fn command_audit_trail(config: &Config, args: ShowArgs) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;
    let artifact_id = parse_artifact_id(&args.artifact_id)?;
    let events = ledger.audit_trail(&artifact_id).map_err(LedgerGateError::from)?;
    write_events(&events)
}

fn command_execution(config: &Config, command: ExecutionCommand) -> CliResult<ExitCode> {
    let (ledger, _content_store, _type_packs) = open_components(config)?;
    match command {
        ExecutionCommand::Summary { execution_id } => {
            let execution_id = parse_execution_id(&execution_id);
            let summary = ledger.execution_summary(&execution_id).map_err(LedgerGateError::from)?;
            match summary {
                Some(summary) => write_json_value(&execution_summary_to_json(&summary)),
                None => write_json_value(&Value::Null),
            }
        }
        ExecutionCommand::Timeline { execution_id } => {
            let execution_id = parse_execution_id(&execution_id);
            let timeline = ledger.execution_timeline(&execution_id).map_err(LedgerGateError::from)?;
            let events: Vec<Event> = timeline.into_iter().map(|(event, _payload)| event).collect();
            write_events(&events)
        }
        ExecutionCommand::Latest { artifact_id } => {
            let artifact_id = parse_artifact_id(&artifact_id)?;
            let latest = ledger.latest_execution_id(&artifact_id).map_err(LedgerGateError::from)?;
            write_json_value(&json!({"execution_id": latest.map(|id| id.as_str().to_owned())}))
        }
    }
}

fn command_constraints(config: &Config, command: ConstraintsCommand) -> CliResult<ExitCode> {
    match command {
        ConstraintsCommand::Lint { path } => {
            let ruleset = read_ruleset_file(&path)?;
            write_json_value(&json!({
                "id": ruleset.id,
                "version": ruleset.version,
                "rule_count": ruleset.rules.len(),
                "referenced_invariants": ruleset.referenced_invariants(),
            }))
        }
        ConstraintsCommand::Summary { artifact_id } => {
            let (ledger, _content_store, _type_packs) = open_components(config)?;
            let artifact_id = parse_artifact_id(&artifact_id)?;
            let summary = ledger.constraint_summary(&artifact_id).map_err(LedgerGateError::from)?;
            write_json_value(&json!({
                "constraint_data_status": summary.constraint_data_status.as_wire_str(),
                "pass_count": summary.pass_count,
                "fail_count": summary.fail_count,
                "warning_count": summary.warning_count,
                "rulesets": summary.rulesets,
                "violated_invariants": summary.violated_invariants,
            }))
        }
        ConstraintsCommand::Invariants { artifact_id } => {
            let (ledger, _content_store, _type_packs) = open_components(config)?;
            let artifact_id = parse_artifact_id(&artifact_id)?;
            let summary = ledger.invariant_summary(&artifact_id).map_err(LedgerGateError::from)?;
            write_json_value(&json!({
                "overall_status": invariant_status_wire(summary.overall_status),
                "affected_by_invariant": summary.affected_by_invariant,
            }))
        }
    }
}

fn command_bundle(config: &Config, command: BundleCommand) -> CliResult<ExitCode> {
    let (ledger, content_store, _type_packs) = open_components(config)?;
    match command {
        BundleCommand::Show { artifact_id } => {
            let artifact_id = parse_artifact_id(&artifact_id)?;
            let snapshot = ledger.snapshot(&artifact_id).map_err(LedgerGateError::from)?;
            if snapshot.artifact_type != ArtifactType::Bundle {
                return Err(CliError::BadArgument(format!("artifact {artifact_id} is not a bundle")));
            }
            let content = content_store.require(&snapshot.content_id).map_err(LedgerGateError::from)?;
            write_json_value(&stored_content_to_json(&content))
        }
        BundleCommand::List => {
            let ids = ledger.list_by_type(&ArtifactType::Bundle).map_err(LedgerGateError::from)?;
            let values: Vec<Value> = ids.iter().map(|id| json!(id.to_string())).collect();
            write_json_value(&Value::Array(values))
        }
    }
}

fn command_content(config: &Config, command: ContentCommand) -> CliResult<ExitCode> {
    let (_ledger, content_store, _type_packs) = open_components(config)?;
    match command {
        ContentCommand::Get { content_id } => {
            let content_id = content_id.as_str().into();
            let content = content_store.require(&content_id).map_err(LedgerGateError::from)?;
            write_json_value(&stored_content_to_json(&content))
        }
        ContentCommand::Verify { content_id } => {
            let content_id = content_id.as_str().into();
            match content_store.verify(&content_id) {
                Ok(()) => write_json_value(&json!({"verified": true})),
                Err(ContentStoreError::VerificationFailed(_)) => {
                    write_json_value(&json!({"verified": false}))?;
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => Err(CliError::Core(LedgerGateError::from(err))),
            }
        }
    }
}

// ============================================================================
// SECTION: JSON rendering
// ============================================================================

fn parse_event_type(raw: &str) -> CliResult<EventType> {
    match raw {
        "artifact.created" => Ok(EventType::ArtifactCreated),
        "artifact.validated" => Ok(EventType::ArtifactValidated),
        "artifact.approved" => Ok(EventType::ArtifactApproved),
        "artifact.executed" => Ok(EventType::ArtifactExecuted),
        "artifact.rejected" => Ok(EventType::ArtifactRejected),
        "artifact.superseded" => Ok(EventType::ArtifactSuperseded),
        "constraint.evaluated" => Ok(EventType::ConstraintEvaluated),
        "invariant.checked" => Ok(EventType::InvariantChecked),
        "execution.logged" => Ok(EventType::ExecutionLogged),
        other => Err(CliError::BadArgument(format!("unknown event type '{other}'"))),
    }
}

fn invariant_status_wire(status: ledger_core::events::InvariantStatus) -> &'static str {
    match status {
        ledger_core::events::InvariantStatus::Pass => "pass",
        ledger_core::events::InvariantStatus::Fail => "fail",
    }
}

fn snapshot_to_json(snapshot: &ArtifactSnapshot) -> Value {
    json!({
        "artifact_id": snapshot.artifact_id.to_string(),
        "status": snapshot.status.as_wire_str(),
        "artifact_type": snapshot.artifact_type.as_wire_str(),
        "content_id": snapshot.content_id.as_str(),
        "declared_risk_class": snapshot.declared_risk_class.as_wire_str(),
        "computed_risk_class": snapshot.computed_risk_class.map(RiskClass::as_wire_str),
        "inputs": snapshot.inputs.iter().map(|input| json!({
            "artifact_id": input.artifact_id.to_string(),
            "content_id": input.content_id.as_str(),
        })).collect::<Vec<_>>(),
        "producer": {
            "actor": snapshot.producer.actor,
            "operation": snapshot.producer.operation,
            "surface": snapshot.producer.surface,
            "timestamp": format_timestamp(snapshot.producer.timestamp),
        },
        "delegate_to": snapshot.delegate_to,
        "validation_errors": snapshot.validation_errors,
        "approval_artifact_id": snapshot.approval_artifact_id.as_ref().map(ToString::to_string),
        "force_ack": snapshot.force_ack,
        "approval_scope": snapshot.approval_scope,
        "result_artifact_id": snapshot.result_artifact_id.as_ref().map(ToString::to_string),
        "erasure_cost": {
            "notes": snapshot.erasure_cost.notes,
            "edges": snapshot.erasure_cost.edges,
            "files": snapshot.erasure_cost.files,
            "bytes": snapshot.erasure_cost.bytes,
        },
        "creation_summary": {
            "notes": snapshot.creation_summary.notes,
            "edges": snapshot.creation_summary.edges,
            "files": snapshot.creation_summary.files,
            "bytes": snapshot.creation_summary.bytes,
        },
        "executor": snapshot.executor,
        "rejection_reason": snapshot.rejection_reason,
        "rejection_stage": snapshot.rejection_stage,
        "superseded_by": snapshot.superseded_by.as_ref().map(ToString::to_string),
        "created_at": format_timestamp(snapshot.created_at),
        "validated_at": snapshot.validated_at.map(format_timestamp),
        "approved_at": snapshot.approved_at.map(format_timestamp),
        "executed_at": snapshot.executed_at.map(format_timestamp),
    })
}

fn execution_summary_to_json(summary: &ExecutionSummary) -> Value {
    let phase_durations: BTreeMap<String, u64> =
        summary.phase_durations.iter().map(|(phase, ms)| (phase.as_wire_str().to_owned(), *ms)).collect();
    json!({
        "overall_status": summary.overall_status.as_wire_str(),
        "phase_durations": phase_durations,
        "attempt_count": summary.attempt_count,
        "first_error": summary.first_error,
        "failure_phase": summary.failure_phase.map(ExecutionPhase::as_wire_str),
        "resources": summary.resources,
        "started_at": format_timestamp(summary.started_at),
        "ended_at": format_timestamp(summary.ended_at),
    })
}

fn stored_content_to_json(content: &StoredContent) -> Value {
    match content {
        StoredContent::Json(value) => value.clone(),
        StoredContent::Binary(bytes) => json!({"binary_bytes": bytes.len()}),
        StoredContent::Text(text) => json!({"text": text}),
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp.format(&Rfc3339).unwrap_or_else(|_| timestamp.to_string())
}

fn write_events(events: &[Event]) -> CliResult<ExitCode> {
    let values: Vec<Value> =
        events.iter().map(|event| serde_json::to_value(event).unwrap_or(Value::Null)).collect();
    write_json_value(&Value::Array(values))
}

// ============================================================================
// SECTION: Output helpers
// ============================================================================

fn write_json_value(value: &Value) -> CliResult<ExitCode> {
    use std::io::Write as _;

    let rendered = serde_json::to_string_pretty(value)
        .map_err(|source| CliError::Json { path: PathBuf::from("<stdout>"), source })?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{rendered}").map_err(|source| CliError::Io { path: PathBuf::from("<stdout>"), source })?;
    Ok(ExitCode::SUCCESS)
}

fn emit_error(message: &str) -> ExitCode {
    use std::io::Write as _;

    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
