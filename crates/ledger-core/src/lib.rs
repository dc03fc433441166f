// crates/ledger-core/src/lib.rs
// ============================================================================
// Module: Ledger Core Library
// Description: Public API surface for the artifact ledger and execution
//              harness.
// Purpose: Expose the six core subsystems (content store, ledger, snapshot
//          projection, risk engine, plan manager, constraint engine) plus
//          the harness that orchestrates them, behind one crate.
// Dependencies: crate::{content_store, hashing, identifiers, events, ledger,
//               snapshot, risk, types, plan_manager, constraint, ruleset,
//               secrets, harness, config}
// ============================================================================

//! ## Overview
//! `ledger-core` is backend-agnostic: it owns an append-only event log, a
//! content-addressed store, and the state machine that drives an artifact
//! from proposal through execution, but it never interprets domain-specific
//! payloads beyond the registered [`types::TypePack`]s, and it never touches
//! a vault loader, graph builder, or network handler directly. Those
//! collaborators are supplied by the caller at the [`harness::Harness`]
//! boundary.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod constraint;
pub mod content_store;
pub mod events;
pub mod hashing;
pub mod harness;
pub mod identifiers;
pub mod ledger;
pub mod plan_manager;
pub mod risk;
pub mod ruleset;
pub mod secrets;
pub mod snapshot;
pub mod types;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::Config;
pub use config::ConfigError;
pub use constraint::ConstraintEngine;
pub use constraint::ConstraintError;
pub use content_store::ContentStore;
pub use content_store::ContentStoreError;
pub use events::Event;
pub use events::EventType;
pub use harness::Harness;
pub use harness::HarnessError;
pub use identifiers::ArtifactId;
pub use identifiers::ContentId;
pub use identifiers::ExecutionId;
pub use identifiers::IdError;
pub use ledger::Ledger;
pub use ledger::LedgerError;
pub use plan_manager::PlanManager;
pub use plan_manager::PlanManagerError;
pub use risk::RiskClass;
pub use risk::compute_risk;
pub use ruleset::Rule;
pub use ruleset::Ruleset;
pub use snapshot::ArtifactSnapshot;
pub use snapshot::ArtifactStatus;
pub use snapshot::SnapshotError;
pub use types::TypePackError;
pub use types::TypePackRegistry;

// ============================================================================
// SECTION: Legacy paths
// ============================================================================

/// Legacy ledger file names that may coexist under `.irrev` during a
/// migration window.
///
/// The core never opens these; they exist solely so an external migration
/// tool can discover what it needs to reconcile.
pub const LEGACY_LEDGER_FILE_NAMES: &[&str] = &["ledger.jsonl", "events.log", "audit.log"];

/// Enumerates the legacy ledger file paths that may coexist under
/// `<vault_path>/.irrev`, without opening or reading any of them.
#[must_use]
pub fn legacy_paths(vault_path: &std::path::Path) -> Vec<std::path::PathBuf> {
    let irrev = vault_path.join(".irrev");
    LEGACY_LEDGER_FILE_NAMES.iter().map(|name| irrev.join(name)).collect()
}

// ============================================================================
// SECTION: Crate-root error
// ============================================================================

/// Aggregates every subsystem's error type behind one `Result` alias, for
/// callers (the CLI, integration tests) that don't need to match on which
/// subsystem failed.
#[derive(Debug, thiserror::Error)]
pub enum LedgerGateError {
    /// A content store operation failed.
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Projecting a snapshot from an event slice failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// A plan-protocol transition failed.
    #[error(transparent)]
    PlanManager(#[from] PlanManagerError),
    /// A type pack operation failed.
    #[error(transparent)]
    TypePack(#[from] TypePackError),
    /// A constraint evaluation failed.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    /// A harness operation failed.
    #[error(transparent)]
    Harness(#[from] HarnessError),
    /// Minting or parsing an identifier failed.
    #[error(transparent)]
    Id(#[from] IdError),
    /// Loading or validating configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for `Result<T, LedgerGateError>`.
pub type LedgerGateResult<T> = Result<T, LedgerGateError>;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use super::*;

    #[test]
    fn legacy_paths_lists_three_files_under_irrev() {
        let paths = legacy_paths(std::path::Path::new("/vault"));
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.starts_with("/vault/.irrev")));
        assert!(paths.iter().any(|p| p.ends_with("ledger.jsonl")));
        assert!(paths.iter().any(|p| p.ends_with("events.log")));
        assert!(paths.iter().any(|p| p.ends_with("audit.log")));
    }

    #[test]
    fn ledger_gate_error_wraps_subsystem_errors_via_from() {
        let err: LedgerGateError = IdError::Malformed("x".to_owned()).into();
        assert!(matches!(err, LedgerGateError::Id(_)));
    }
}
