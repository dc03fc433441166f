// crates/ledger-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for the ledgergate CLI's argument parsing and
//              command dispatch helpers.
// Purpose: Exercise the propose -> validate -> approve -> execute lifecycle
//          and the inspection subcommands directly against their private
//          handler functions, without spawning the compiled binary.
// Dependencies: ledger-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! These tests call the CLI's private `command_*` functions and parsing
//! helpers directly (this module is a child of `main`, so it shares private
//! visibility) against a `Config` rooted at a fresh temp directory. Each
//! test gets its own vault root, so they do not share ledger or content
//! store state.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

use std::fs;

use ledger_core::ArtifactId;
use ledger_core::Config;
use ledger_core::config::ConfigOverrides;
use serde_json::json;
use tempfile::TempDir;

use super::ApproveArgs;
use super::CliError;
use super::ExecuteArgs;
use super::ProposeArgs;
use super::QueryArgs;
use super::ShowArgs;
use super::ValidateArgs;
use super::command_approve;
use super::command_execute;
use super::command_propose;
use super::command_query;
use super::command_show;
use super::command_validate;
use super::parse_event_type;
use super::parse_input_ref;

fn config_in(dir: &TempDir) -> Config {
    let overrides = ConfigOverrides { vault_root: Some(dir.path().to_path_buf()), ..ConfigOverrides::default() };
    Config::load(None, overrides).expect("load config")
}

fn write_payload(dir: &TempDir, name: &str, value: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, value.to_string()).expect("write payload file");
    path
}

fn propose_reversible(config: &Config, dir: &TempDir) -> ArtifactId {
    let payload_file = write_payload(dir, "rename.json", &json!({"from": "a.md", "to": "b.md"}));
    let args = ProposeArgs {
        operation: "vault.rename_note".to_owned(),
        payload_file: Some(payload_file),
        artifact_type: "plan".to_owned(),
        delegate_to: None,
        surface: None,
        actor: None,
        inputs: Vec::new(),
    };
    let exit = command_propose(config, args).expect("propose");
    assert_eq!(exit, std::process::ExitCode::SUCCESS);

    let ids = ledger_core::Ledger::open(&config.irrev_path()).expect("open ledger").known_artifact_ids().expect("ids");
    ids.into_iter().next().expect("one artifact proposed")
}

#[test]
fn propose_then_validate_then_approve_then_execute_completes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(&dir);

    let artifact_id = propose_reversible(&config, &dir);

    let validate_args = ValidateArgs { artifact_id: artifact_id.to_string(), validator: "cli-test".to_owned() };
    let exit = command_validate(&config, validate_args).expect("validate");
    assert_eq!(exit, std::process::ExitCode::SUCCESS);

    let approve_args =
        ApproveArgs { artifact_id: artifact_id.to_string(), approver: "alice".to_owned(), scope: None, force_ack: false };
    command_approve(&config, approve_args).expect("approve");

    let result_file = write_payload(&dir, "result.json", &json!({"renamed": true}));
    let execute_args = ExecuteArgs {
        artifact_id: artifact_id.to_string(),
        executor: "alice".to_owned(),
        result_file,
        result_artifact_type: "result".to_owned(),
        erased_notes: 0,
        erased_edges: 0,
        erased_files: 0,
        erased_bytes: 0,
        created_notes: 1,
        created_edges: 0,
        created_files: 0,
        created_bytes: 0,
    };
    let exit = command_execute(&config, execute_args).expect("execute");
    assert_eq!(exit, std::process::ExitCode::SUCCESS);

    let show_exit = command_show(&config, ShowArgs { artifact_id: artifact_id.to_string() }).expect("show");
    assert_eq!(show_exit, std::process::ExitCode::SUCCESS);
}

#[test]
fn validate_missing_operation_fails_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(&dir);

    let payload_file = write_payload(&dir, "empty.json", &json!({}));
    let propose_args = ProposeArgs {
        operation: String::new(),
        payload_file: Some(payload_file),
        artifact_type: "plan".to_owned(),
        delegate_to: None,
        surface: None,
        actor: None,
        inputs: Vec::new(),
    };
    let exit = command_propose(&config, propose_args).expect("propose succeeds even with an empty operation");
    assert_eq!(exit, std::process::ExitCode::SUCCESS);

    let ids = ledger_core::Ledger::open(&config.irrev_path()).expect("open ledger").known_artifact_ids().expect("ids");
    let artifact_id = ids.into_iter().next().expect("one artifact proposed");

    let validate_args = ValidateArgs { artifact_id: artifact_id.to_string(), validator: "cli-test".to_owned() };
    let exit = command_validate(&config, validate_args).expect("validate");
    assert_eq!(exit, std::process::ExitCode::FAILURE);
}

#[test]
fn query_by_event_type_round_trips_through_the_cli_parser() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(&dir);
    let artifact_id = propose_reversible(&config, &dir);

    let args = QueryArgs {
        artifact_id: Some(artifact_id.to_string()),
        execution_id: None,
        event_type: Some("artifact.created".to_owned()),
        actor: None,
        since: None,
        until: None,
        limit: None,
        order: super::OrderArg::Ascending,
    };
    let exit = command_query(&config, args).expect("query");
    assert_eq!(exit, std::process::ExitCode::SUCCESS);
}

#[test]
fn parse_event_type_rejects_unknown_wire_strings() {
    assert!(parse_event_type("artifact.created").is_ok());
    let err = parse_event_type("not.a.real.type").unwrap_err();
    assert!(matches!(err, CliError::BadArgument(_)));
}

#[test]
fn parse_input_ref_requires_colon_separated_pair() {
    let artifact_id = ArtifactId::from_raw(0, 1).expect("mint id");
    let raw = format!("{artifact_id}:{}", "a".repeat(64));
    let parsed = parse_input_ref(&raw).expect("parse input ref");
    assert_eq!(parsed.artifact_id, artifact_id);

    let err = parse_input_ref("not-a-valid-ref").unwrap_err();
    assert!(matches!(err, CliError::BadArgument(_)));
}
