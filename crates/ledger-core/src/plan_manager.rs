// crates/ledger-core/src/plan_manager.rs
// ============================================================================
// Module: Plan Manager
// Description: Drives an artifact through propose -> validate -> approve ->
//              execute, appending the events each transition requires.
// Purpose: Own the state-machine rules so no other component can append a
//          transition event out of order.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`PlanManager`] is the only component that appends `artifact.created`,
//! `artifact.validated`, `artifact.approved`, `artifact.executed`, and their
//! rejection counterparts. Each method checks the artifact's current
//! [`crate::snapshot::ArtifactSnapshot`] before acting, so an out-of-order
//! call (e.g. approving a plan still in `created`) fails before anything is
//! appended.

use std::collections::BTreeSet;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use crate::content_store::ContentStore;
use crate::content_store::ContentStoreError;
use crate::events::ApprovedPayload;
use crate::events::ArtifactType;
use crate::events::CreatedPayload;
use crate::events::CreationSummary;
use crate::events::ErasureCost;
use crate::events::Event;
use crate::events::EventType;
use crate::events::ExecutedPayload;
use crate::events::InputRef;
use crate::events::RejectedPayload;
use crate::events::ValidatedPayload;
use crate::hashing::StoredContent;
use crate::identifiers::ArtifactId;
use crate::identifiers::ContentId;
use crate::identifiers::IdError;
use crate::identifiers::IdGen;
use crate::ledger::Ledger;
use crate::ledger::LedgerError;
use crate::risk::RiskClass;
use crate::risk::compute_risk;
use crate::snapshot::ArtifactStatus;
use crate::types::ArtifactContentResolver;
use crate::types::TypePackError;
use crate::types::TypePackRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by plan state-machine transitions.
#[derive(Debug, Error)]
pub enum PlanManagerError {
    /// The artifact has no recorded events.
    #[error("artifact {0} not found")]
    NotFound(ArtifactId),
    /// The artifact's current status does not permit the requested transition.
    #[error("artifact {artifact_id} must be {expected} for this operation, is {found:?}")]
    WrongStatus {
        /// The artifact whose status was checked.
        artifact_id: ArtifactId,
        /// The status the transition required.
        expected: &'static str,
        /// The status actually observed.
        found: ArtifactStatus,
    },
    /// Destructive risk requires an explicit force-ack; none was given.
    #[error("risk class {0:?} requires an explicit force_ack")]
    ForceAckRequired(RiskClass),
    /// Execution requires approval and none is recorded on the artifact.
    #[error("artifact {0} requires approval before it can execute")]
    ApprovalMissing(ArtifactId),
    /// The recorded approval does not target this artifact or content id.
    #[error("approval {0} does not grant execution of the artifact it was checked against")]
    ApprovalMismatch(ArtifactId),
    /// The content referenced by an artifact's content id is missing.
    #[error("content {0} referenced by an artifact is missing from the store")]
    ContentMissing(ContentId),
    /// The caller-supplied handler closure returned an error.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A content store operation failed.
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
    /// A type pack operation failed.
    #[error(transparent)]
    TypePack(#[from] TypePackError),
    /// Minting a new artifact identifier failed.
    #[error(transparent)]
    Id(#[from] IdError),
}

// ============================================================================
// SECTION: Approval policy
// ============================================================================

/// Which risk classes require an explicit force-ack at approval time.
///
/// A configuration point rather than a hardcoded constant, threaded through
/// [`PlanManager::new`].
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// Risk classes that require `force_ack = true` at approval.
    pub require_force_ack_for: BTreeSet<RiskClass>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self { require_force_ack_for: BTreeSet::from([RiskClass::MutationDestructive]) }
    }
}

// ============================================================================
// SECTION: Execution outcome
// ============================================================================

/// What a handler reports back after running a plan's operation.
pub struct ExecutionOutcome {
    /// The result content to store for the new result artifact.
    pub result_content: Value,
    /// Erasure cost reported by the handler.
    pub erasure_cost: ErasureCost,
    /// Creation summary reported by the handler.
    pub creation_summary: CreationSummary,
    /// Artifact type to record for the result artifact.
    pub result_artifact_type: ArtifactType,
}

// ============================================================================
// SECTION: Ledger-backed content resolver
// ============================================================================

/// Resolves an artifact's content id by folding its current snapshot from
/// the ledger.
pub struct LedgerContentResolver<'a> {
    ledger: &'a Ledger,
}

impl<'a> LedgerContentResolver<'a> {
    /// Wraps `ledger` as a content resolver.
    #[must_use]
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }
}

impl ArtifactContentResolver for LedgerContentResolver<'_> {
    fn content_id_for(&self, artifact_id: &ArtifactId) -> Option<ContentId> {
        self.ledger.snapshot(artifact_id).ok().map(|snapshot| snapshot.content_id)
    }
}

// ============================================================================
// SECTION: PlanManager
// ============================================================================

/// Drives artifacts through the created -> validated -> approved -> executed
/// lifecycle, with rejected and superseded side paths.
pub struct PlanManager<'a> {
    ledger: &'a Ledger,
    content_store: &'a ContentStore,
    type_packs: &'a TypePackRegistry,
    policy: ApprovalPolicy,
}

impl<'a> PlanManager<'a> {
    /// Builds a plan manager over the given components and approval policy.
    #[must_use]
    pub fn new(
        ledger: &'a Ledger,
        content_store: &'a ContentStore,
        type_packs: &'a TypePackRegistry,
        policy: ApprovalPolicy,
    ) -> Self {
        Self { ledger, content_store, type_packs, policy }
    }

    fn require_status(&self, artifact_id: &ArtifactId, expected: ArtifactStatus, expected_name: &'static str) -> Result<crate::snapshot::ArtifactSnapshot, PlanManagerError> {
        let snapshot = self
            .ledger
            .snapshot(artifact_id)
            .map_err(|_| PlanManagerError::NotFound(artifact_id.clone()))?;
        if snapshot.status != expected {
            return Err(PlanManagerError::WrongStatus {
                artifact_id: artifact_id.clone(),
                expected: expected_name,
                found: snapshot.status,
            });
        }
        Ok(snapshot)
    }

    /// Proposes a new artifact: stores its content, computes its declared
    /// risk class, runs its type pack's input extraction, and appends
    /// `artifact.created`.
    ///
    /// # Errors
    /// Returns [`PlanManagerError`] on storage, type pack, or ledger failure.
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        &self,
        operation: &str,
        payload: Value,
        actor: &str,
        delegate_to: Option<String>,
        inputs: Vec<InputRef>,
        surface: Option<String>,
        artifact_type: ArtifactType,
    ) -> Result<ArtifactId, PlanManagerError> {
        let inputs_json: Vec<Value> = inputs
            .iter()
            .map(|input| json!({"artifact_id": input.artifact_id.to_string(), "content_id": input.content_id.as_str()}))
            .collect();
        let mut content = json!({
            "operation": operation,
            "payload": payload,
            "inputs": inputs_json,
        });
        if let Some(delegate_to) = &delegate_to {
            content["delegate_to"] = json!(delegate_to);
        }
        if let Some(surface) = &surface {
            content["surface"] = json!(surface);
        }

        let content_id = self.content_store.store(&StoredContent::Json(content.clone()))?;
        let artifact_id = IdGen.next_artifact_id()?;

        let (risk_class, risk_reasons) = compute_risk(operation, &content["payload"]);

        let pack = self.type_packs.get(&artifact_type)?;
        let resolver = LedgerContentResolver::new(self.ledger);
        let extracted_inputs = pack.extract_inputs(&content, &resolver)?;
        let payload_manifest = pack.compute_payload_manifest(&content);

        let created_payload = CreatedPayload {
            operation: operation.to_owned(),
            risk_class,
            risk_reasons,
            inputs: extracted_inputs,
            payload_manifest,
            delegate_to,
            surface,
        };
        self.ledger.append(Event {
            event_type: EventType::ArtifactCreated,
            artifact_id: artifact_id.clone(),
            timestamp: OffsetDateTime::now_utc(),
            actor: actor.to_owned(),
            payload: serde_json::to_value(created_payload).unwrap_or(Value::Null),
            content_id: Some(content_id),
            artifact_type: Some(artifact_type),
        })?;
        Ok(artifact_id)
    }

    /// Validates a created artifact: loads its content, runs its type pack,
    /// recomputes risk authoritatively, and appends `artifact.validated`
    /// (and `artifact.rejected` if errors were found).
    ///
    /// # Errors
    /// Returns [`PlanManagerError::NotFound`] if the artifact has no events,
    /// [`PlanManagerError::WrongStatus`] if it is not in `created`, or a
    /// storage/ledger error.
    pub fn validate(
        &self,
        artifact_id: &ArtifactId,
        validator: &str,
        constraint_results: Option<crate::events::ConstraintResultsSummary>,
    ) -> Result<bool, PlanManagerError> {
        let snapshot = self.require_status(artifact_id, ArtifactStatus::Created, "created")?;

        let content = match self.content_store.get(&snapshot.content_id)? {
            Some(StoredContent::Json(value)) => value,
            Some(_) | None => {
                self.append_validation_failure(artifact_id, validator, "missing or non-json content", snapshot.declared_risk_class)?;
                return Ok(false);
            }
        };

        let pack = self.type_packs.get(&snapshot.artifact_type)?;
        let errors = pack.validate(&content);
        let operation = content.get("operation").and_then(Value::as_str).unwrap_or(&snapshot.producer.operation);
        let payload = content.get("payload").cloned().unwrap_or(Value::Null);
        let (computed_risk_class, risk_reasons) = compute_risk(operation, &payload);

        let validated_payload = ValidatedPayload {
            validator: validator.to_owned(),
            errors: errors.clone(),
            computed_risk_class,
            risk_reasons,
            constraint_results,
        };
        let mut events = vec![Event {
            event_type: EventType::ArtifactValidated,
            artifact_id: artifact_id.clone(),
            timestamp: OffsetDateTime::now_utc(),
            actor: validator.to_owned(),
            payload: serde_json::to_value(validated_payload).unwrap_or(Value::Null),
            content_id: None,
            artifact_type: None,
        }];
        if !errors.is_empty() {
            events.push(Event {
                event_type: EventType::ArtifactRejected,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: validator.to_owned(),
                payload: serde_json::to_value(RejectedPayload { reason: errors.join("; "), stage: "validation".to_owned() })
                    .unwrap_or(Value::Null),
                content_id: None,
                artifact_type: None,
            });
        }
        self.ledger.append_many(events)?;
        Ok(errors.is_empty())
    }

    fn append_validation_failure(
        &self,
        artifact_id: &ArtifactId,
        validator: &str,
        reason: &str,
        declared_risk_class: RiskClass,
    ) -> Result<(), PlanManagerError> {
        let validated_payload = ValidatedPayload {
            validator: validator.to_owned(),
            errors: vec![reason.to_owned()],
            computed_risk_class: declared_risk_class,
            risk_reasons: Vec::new(),
            constraint_results: None,
        };
        self.ledger.append_many(vec![
            Event {
                event_type: EventType::ArtifactValidated,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: validator.to_owned(),
                payload: serde_json::to_value(validated_payload).unwrap_or(Value::Null),
                content_id: None,
                artifact_type: None,
            },
            Event {
                event_type: EventType::ArtifactRejected,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: validator.to_owned(),
                payload: serde_json::to_value(RejectedPayload { reason: reason.to_owned(), stage: "validation".to_owned() })
                    .unwrap_or(Value::Null),
                content_id: None,
                artifact_type: None,
            },
        ])?;
        Ok(())
    }

    /// Grants approval to a validated artifact, creating a separate approval
    /// artifact and appending `artifact.created` for it and
    /// `artifact.approved` for the target in one batch.
    ///
    /// # Errors
    /// Returns [`PlanManagerError::WrongStatus`] if the artifact is not
    /// validated or has outstanding validation errors, or
    /// [`PlanManagerError::ForceAckRequired`] if its risk class requires
    /// force-ack and `force_ack` is false.
    pub fn approve(
        &self,
        artifact_id: &ArtifactId,
        approver: &str,
        scope: Option<String>,
        force_ack: bool,
    ) -> Result<ArtifactId, PlanManagerError> {
        let snapshot = self.require_status(artifact_id, ArtifactStatus::Validated, "validated")?;
        if !snapshot.validation_errors.is_empty() {
            return Err(PlanManagerError::WrongStatus {
                artifact_id: artifact_id.clone(),
                expected: "validated with no errors",
                found: snapshot.status,
            });
        }
        let risk = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);
        if self.policy.require_force_ack_for.contains(&risk) && !force_ack {
            return Err(PlanManagerError::ForceAckRequired(risk));
        }

        let scope = scope.unwrap_or_else(|| snapshot.producer.operation.clone());
        let approval_content = json!({
            "target_artifact_id": artifact_id.to_string(),
            "approved_content_ids": [snapshot.content_id.as_str()],
            "scope": scope,
            "approver": approver,
            "force_ack": force_ack,
        });
        let approval_content_id = self.content_store.store(&StoredContent::Json(approval_content))?;
        let approval_artifact_id = IdGen.next_artifact_id()?;

        let created_payload = CreatedPayload {
            operation: "approval.grant".to_owned(),
            risk_class: RiskClass::ReadOnly,
            risk_reasons: vec!["approvals are append-only grants, never mutations".to_owned()],
            inputs: vec![InputRef { artifact_id: artifact_id.clone(), content_id: snapshot.content_id.clone() }],
            payload_manifest: Vec::new(),
            delegate_to: None,
            surface: None,
        };
        let approved_payload =
            ApprovedPayload { approval_artifact_id: approval_artifact_id.clone(), force_ack, scope };

        self.ledger.append_many(vec![
            Event {
                event_type: EventType::ArtifactCreated,
                artifact_id: approval_artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: approver.to_owned(),
                payload: serde_json::to_value(created_payload).unwrap_or(Value::Null),
                content_id: Some(approval_content_id),
                artifact_type: Some(ArtifactType::Approval),
            },
            Event {
                event_type: EventType::ArtifactApproved,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: approver.to_owned(),
                payload: serde_json::to_value(approved_payload).unwrap_or(Value::Null),
                content_id: None,
                artifact_type: None,
            },
        ])?;
        Ok(approval_artifact_id)
    }

    /// Runs `handler` against an approved artifact's stored content and
    /// appends `artifact.created` for the result plus `artifact.executed`
    /// for the target in one batch.
    ///
    /// # Errors
    /// Returns [`PlanManagerError::WrongStatus`] if the artifact is not
    /// approved, [`PlanManagerError::ApprovalMissing`] or
    /// [`PlanManagerError::ApprovalMismatch`] if its required approval is
    /// absent or does not target it, or [`PlanManagerError::HandlerFailed`]
    /// if `handler` errors.
    pub fn execute(
        &self,
        artifact_id: &ArtifactId,
        executor: &str,
        handler: impl FnOnce(&Value) -> Result<ExecutionOutcome, String>,
    ) -> Result<ArtifactId, PlanManagerError> {
        let snapshot = self.require_status(artifact_id, ArtifactStatus::Approved, "approved")?;
        let risk = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);
        if risk.requires_approval() {
            let approval_id =
                snapshot.approval_artifact_id.clone().ok_or_else(|| PlanManagerError::ApprovalMissing(artifact_id.clone()))?;
            let approval_snapshot =
                self.ledger.snapshot(&approval_id).map_err(|_| PlanManagerError::ApprovalMismatch(artifact_id.clone()))?;
            let approval_content = self.content_store.require(&approval_snapshot.content_id)?;
            let StoredContent::Json(approval_value) = approval_content else {
                return Err(PlanManagerError::ApprovalMismatch(artifact_id.clone()));
            };
            let targets_this = approval_value.get("target_artifact_id").and_then(Value::as_str) == Some(artifact_id.as_str());
            let lists_content_id = approval_value
                .get("approved_content_ids")
                .and_then(Value::as_array)
                .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(snapshot.content_id.as_str())));
            if !targets_this || !lists_content_id {
                return Err(PlanManagerError::ApprovalMismatch(artifact_id.clone()));
            }
        }

        let plan_content = self.content_store.require(&snapshot.content_id)?;
        let StoredContent::Json(plan_value) = &plan_content else {
            return Err(PlanManagerError::ContentMissing(snapshot.content_id.clone()));
        };
        let outcome = handler(plan_value).map_err(PlanManagerError::HandlerFailed)?;

        let result_content_id = self.content_store.store(&StoredContent::Json(outcome.result_content))?;
        let result_artifact_id = IdGen.next_artifact_id()?;

        let result_created = CreatedPayload {
            operation: format!("{}.result", snapshot.producer.operation),
            risk_class: RiskClass::ReadOnly,
            risk_reasons: vec!["execution results are read-only records".to_owned()],
            inputs: vec![InputRef { artifact_id: artifact_id.clone(), content_id: snapshot.content_id.clone() }],
            payload_manifest: Vec::new(),
            delegate_to: None,
            surface: None,
        };
        let executed_payload = ExecutedPayload {
            result_artifact_id: result_artifact_id.clone(),
            erasure_cost: outcome.erasure_cost,
            creation_summary: outcome.creation_summary,
            executor: executor.to_owned(),
        };

        self.ledger.append_many(vec![
            Event {
                event_type: EventType::ArtifactCreated,
                artifact_id: result_artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: executor.to_owned(),
                payload: serde_json::to_value(result_created).unwrap_or(Value::Null),
                content_id: Some(result_content_id),
                artifact_type: Some(outcome.result_artifact_type),
            },
            Event {
                event_type: EventType::ArtifactExecuted,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: executor.to_owned(),
                payload: serde_json::to_value(executed_payload).unwrap_or(Value::Null),
                content_id: None,
                artifact_type: None,
            },
        ])?;
        Ok(result_artifact_id)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use tempfile::tempdir;

    use super::*;

    fn setup() -> (tempfile::TempDir, Ledger, ContentStore, TypePackRegistry) {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let content_store = ContentStore::open(dir.path()).expect("open content store");
        let type_packs = TypePackRegistry::new();
        (dir, ledger, content_store, type_packs)
    }

    #[test]
    fn propose_then_validate_then_approve_then_execute_s1_scenario() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());

        let artifact_id = manager
            .propose(
                "vault.delete_note",
                json!({"note_id": "n1"}),
                "agent:harness",
                None,
                Vec::new(),
                Some("cli".to_owned()),
                ArtifactType::Plan,
            )
            .expect("propose");

        let passed = manager.validate(&artifact_id, "harness", None).expect("validate");
        assert!(passed);

        let approval_id = manager.approve(&artifact_id, "alice", None, true).expect("approve");
        assert_ne!(approval_id, artifact_id);

        let result_id = manager
            .execute(&artifact_id, "handler:vault", |_content| {
                Ok(ExecutionOutcome {
                    result_content: json!({"deleted": true}),
                    erasure_cost: ErasureCost { notes: 1, ..ErasureCost::default() },
                    creation_summary: CreationSummary::default(),
                    result_artifact_type: ArtifactType::Other("result".to_owned()),
                })
            })
            .expect("execute");

        let snapshot = ledger.snapshot(&artifact_id).expect("snapshot");
        assert_eq!(snapshot.status, ArtifactStatus::Executed);
        assert_eq!(snapshot.result_artifact_id, Some(result_id));
    }

    #[test]
    fn approve_without_force_ack_is_rejected_for_destructive_risk() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());
        let artifact_id = manager
            .propose("vault.purge", json!({}), "agent:harness", None, Vec::new(), None, ArtifactType::Plan)
            .expect("propose");
        manager.validate(&artifact_id, "harness", None).expect("validate");
        let err = manager.approve(&artifact_id, "alice", None, false).unwrap_err();
        assert!(matches!(err, PlanManagerError::ForceAckRequired(_)));
    }

    #[test]
    fn validate_before_created_status_is_rejected() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());
        let artifact_id = manager
            .propose("vault.stat", json!({}), "agent:harness", None, Vec::new(), None, ArtifactType::Plan)
            .expect("propose");
        manager.validate(&artifact_id, "harness", None).expect("first validate");
        let err = manager.validate(&artifact_id, "harness", None).unwrap_err();
        assert!(matches!(err, PlanManagerError::WrongStatus { .. }));
    }

    #[test]
    fn execute_without_approval_is_rejected() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let manager = PlanManager::new(&ledger, &content_store, &type_packs, ApprovalPolicy::default());
        let artifact_id = manager
            .propose("vault.purge", json!({}), "agent:harness", None, Vec::new(), None, ArtifactType::Plan)
            .expect("propose");
        manager.validate(&artifact_id, "harness", None).expect("validate");
        let err = manager
            .execute(&artifact_id, "handler:vault", |_| Ok(ExecutionOutcome {
                result_content: json!({}),
                erasure_cost: ErasureCost::default(),
                creation_summary: CreationSummary::default(),
                result_artifact_type: ArtifactType::Other("result".to_owned()),
            }))
            .unwrap_err();
        assert!(matches!(err, PlanManagerError::WrongStatus { .. }));
    }
}
