// crates/ledger-core/src/harness.rs
// ============================================================================
// Module: Harness
// Description: Orchestrates propose -> validate -> approve -> execute against
//              a pluggable Handler, logging phased execution events and
//              emitting a bundle on success.
// Purpose: Be the one place that wires PlanManager, ConstraintEngine, the
//          content store, and a caller-supplied Handler together, so no
//          caller has to hand-assemble the protocol itself.
// Dependencies: crate::{plan_manager, constraint, content_store, events,
//               identifiers, ledger, risk, ruleset, secrets, snapshot, types}
// ============================================================================

//! ## Overview
//! [`Harness::propose`] turns caller-supplied params into a validated plan
//! artifact: it asks a [`Handler`] to compute a plan and predict its effects,
//! runs the active rulesets against known artifact state, and hands the
//! result to [`crate::plan_manager::PlanManager`]. [`Harness::execute`] re-derives
//! the same plan deterministically, runs the handler's side-effecting phase,
//! and logs three `execution.logged` phases (prepare, execute, commit)
//! sharing one execution id before emitting a `bundle@v1` artifact. The
//! harness never loads a vault or a graph itself; both are summarized by the
//! caller into a [`VaultStateSnapshot`] and handed in.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use crate::constraint::ConstraintEngine;
use crate::constraint::ConstraintError;
use crate::constraint::EvalContext;
use crate::constraint::SelectionUniverse;
use crate::content_store::ContentStore;
use crate::content_store::ContentStoreError;
use crate::content_store::StoredContent;
use crate::events::ArtifactType;
use crate::events::ConstraintResultsSummary;
use crate::events::ConstraintViolation;
use crate::events::CreationSummary;
use crate::events::ErasureCost;
use crate::events::Event;
use crate::events::EventType;
use crate::events::ExecutionLoggedPayload;
use crate::events::ExecutionPhase;
use crate::events::ExecutionStatus;
use crate::events::RejectedPayload;
use crate::identifiers::ArtifactId;
use crate::identifiers::ExecutionId;
use crate::identifiers::IdError;
use crate::identifiers::IdGen;
use crate::ledger::Ledger;
use crate::ledger::LedgerError;
use crate::plan_manager::ApprovalPolicy;
use crate::plan_manager::ExecutionOutcome;
use crate::plan_manager::PlanManager;
use crate::plan_manager::PlanManagerError;
use crate::risk::RiskClass;
use crate::risk::compute_risk;
use crate::ruleset::Ruleset;
use crate::secrets::CompositeSecretsProvider;
use crate::secrets::SecretsProvider;
use crate::snapshot::ArtifactStatus;
use crate::types::TypePackError;
use crate::types::TypePackRegistry;

/// Maximum length, in characters, of an error message recorded on a failed
/// `execution.logged` event.
const MAX_LOGGED_ERROR_LEN: usize = 500;

/// Wire version stamped on every bundle this harness emits.
const BUNDLE_VERSION: &str = "bundle@v1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised orchestrating a propose/execute cycle.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The handler rejected the caller-supplied params before computing a plan.
    #[error("handler rejected params: {0:?}")]
    ParamsInvalid(Vec<String>),
    /// The handler rejected its own computed plan.
    #[error("handler rejected its own plan: {0:?}")]
    PlanInvalid(Vec<String>),
    /// The handler's side-effecting phase returned an error.
    #[error("handler execution failed: {0}")]
    HandlerFailed(String),
    /// Validation recorded errors against the plan artifact.
    #[error("plan {0} failed validation: {1:?}")]
    ValidationFailed(ArtifactId, Vec<String>),
    /// Execution was attempted on a plan that still requires approval.
    #[error("plan {0} requires approval before it can be executed")]
    ApprovalRequired(ArtifactId),
    /// A value could not be serialized to or deserialized from JSON.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A plan-protocol transition failed.
    #[error(transparent)]
    PlanManager(#[from] PlanManagerError),
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A content store operation failed.
    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),
    /// A constraint evaluation failed.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    /// A type pack operation failed.
    #[error(transparent)]
    TypePack(#[from] TypePackError),
    /// Minting an identifier failed.
    #[error(transparent)]
    Id(#[from] IdError),
}

// ============================================================================
// SECTION: Handler contract
// ============================================================================

/// Declared shape of a handler's predicted effects, recorded on the plan
/// artifact and folded into its risk computation.
#[derive(Debug, Clone, Serialize)]
pub struct EffectSummary {
    /// The risk class the handler predicts for its own operation.
    pub effect_type: RiskClass,
    /// Erasure the handler predicts it will cause if executed.
    pub predicted_erasure: ErasureCost,
    /// Output identifiers the handler predicts it will create.
    pub predicted_outputs: Vec<String>,
    /// Human-readable reasons backing `effect_type`.
    pub reasons: Vec<String>,
}

/// Static description of a handler, independent of any one plan.
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    /// The operation name this handler serves, e.g. `"vault.rename_note"`.
    pub operation: String,
    /// Another operation this handler delegates unresolved work to, if any.
    pub delegate_to: Option<String>,
    /// Whether this handler can run its plan without side effects.
    pub supports_dry_run: bool,
}

/// What a handler reports after running its side-effecting phase.
#[derive(Debug, Clone)]
pub struct HandlerOutcome<R> {
    /// The handler's typed result.
    pub result: R,
    /// Actual erasure caused by running the plan.
    pub erasure_cost: ErasureCost,
    /// Actual creation caused by running the plan.
    pub creation_summary: CreationSummary,
}

/// Everything a handler needs to run its side-effecting phase, owned so it
/// can cross the phase boundaries in [`Harness::execute`] without borrowing
/// from the harness itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Root directory of the vault being governed.
    pub vault_root: PathBuf,
    /// Actor performing the execution.
    pub executor: String,
    /// The plan artifact being executed.
    pub plan_artifact_id: ArtifactId,
    /// The approval artifact covering this execution, if the plan's risk
    /// required one.
    pub approval_artifact_id: Option<ArtifactId>,
    /// Whether this is a dry run: the handler must not perform side effects.
    pub dry_run: bool,
    /// A resolved secret value, if the caller asked for one by reference.
    pub secret: Option<String>,
}

/// A pluggable per-operation handler. The harness is generic over one
/// `Handler` per call; a caller running many operations keeps one handler
/// instance per operation and picks the right one before calling the
/// harness.
pub trait Handler {
    /// The handler's own plan representation, round-tripped through JSON so
    /// it can be re-derived deterministically at execute time.
    type Plan: Serialize + DeserializeOwned + Clone;
    /// The handler's typed execution result.
    type Result: Serialize;

    /// Static description of this handler.
    fn metadata(&self) -> HandlerMetadata;

    /// Validates raw params before a plan is computed. An empty list means
    /// the params are acceptable.
    fn validate_params(&self, params: &Value) -> Vec<String>;

    /// Computes a plan and its predicted effects from `params`. Must be
    /// pure and deterministic: [`Harness::execute`] calls this again to
    /// re-derive the same plan rather than trusting stored state.
    ///
    /// # Errors
    /// Returns a human-readable error if a plan cannot be computed.
    fn compute_plan(&self, params: &Value) -> Result<(Self::Plan, EffectSummary), String>;

    /// Validates a computed plan against handler-specific invariants beyond
    /// what the constraint engine checks. An empty list means it passed.
    fn validate_plan(&self, plan: &Self::Plan) -> Vec<String>;

    /// Runs the plan's side effects.
    ///
    /// # Errors
    /// Returns a human-readable error if execution fails.
    fn execute(&self, ctx: &ExecutionContext, plan: &Self::Plan) -> Result<HandlerOutcome<Self::Result>, String>;

    /// The artifact type recorded for this handler's result artifact.
    /// Defaults to `Other("<operation>.result")`.
    fn result_artifact_type(&self) -> ArtifactType {
        ArtifactType::Other(format!("{}.result", self.metadata().operation))
    }
}

// ============================================================================
// SECTION: Supporting state
// ============================================================================

/// A ruleset made available to constraint evaluation during propose, paired
/// with the metadata a bundle's repro header records about it.
#[derive(Debug, Clone)]
pub struct ActiveRuleset {
    /// The evaluable ruleset.
    pub ruleset: Ruleset,
    /// Content id of the ruleset definition, for the bundle's repro header.
    pub content_id: crate::identifiers::ContentId,
    /// Path the ruleset was loaded from, for the bundle's repro header.
    pub path: String,
}

/// A caller-supplied summary of vault state at propose time. Loading the
/// vault itself is out of this crate's scope; the caller reduces it to this
/// shape before calling [`Harness::propose`].
#[derive(Debug, Clone)]
pub struct VaultStateSnapshot {
    /// A content hash summarizing the vault's current state.
    pub content_hash: String,
    /// Number of notes in the vault.
    pub note_count: u64,
    /// When this snapshot was taken.
    pub timestamp: OffsetDateTime,
}

impl Default for VaultStateSnapshot {
    fn default() -> Self {
        Self { content_hash: "unknown".to_owned(), note_count: 0, timestamp: OffsetDateTime::now_utc() }
    }
}

/// What [`Harness::propose`] reports back to its caller.
#[derive(Debug, Clone)]
pub struct ProposeOutcome {
    /// The newly created plan artifact.
    pub plan_artifact_id: ArtifactId,
    /// The plan's computed risk class.
    pub risk_class: RiskClass,
    /// Whether this plan must be approved before it can be executed.
    pub requires_approval: bool,
    /// Whether approval of this plan requires an explicit force-ack.
    pub requires_force_ack: bool,
    /// The handler's plan, serialized for display.
    pub plan_summary: Value,
    /// Validation errors recorded against the plan, if any.
    pub validation_errors: Vec<String>,
}

/// What [`Harness::execute`] reports back to its caller.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    /// A dry run: the plan was re-derived but no side effects ran and
    /// nothing was logged.
    DryRun {
        /// The handler's plan, serialized for display.
        plan_summary: Value,
    },
    /// A real execution completed and a bundle was emitted.
    Completed {
        /// The result artifact the handler's outcome was stored as.
        result_artifact_id: ArtifactId,
        /// The bundle artifact summarizing this execution.
        bundle_artifact_id: ArtifactId,
        /// The execution id shared by every phase event this run logged.
        execution_id: ExecutionId,
    },
}

struct PhaseResult<T> {
    value: T,
    resources: BTreeMap<String, u64>,
}

impl<T> PhaseResult<T> {
    fn new(value: T) -> Self {
        Self { value, resources: BTreeMap::new() }
    }

    fn with_resources(value: T, resources: BTreeMap<String, u64>) -> Self {
        Self { value, resources }
    }
}

fn resources_from(erasure: &ErasureCost, creation: &CreationSummary) -> BTreeMap<String, u64> {
    let mut resources = BTreeMap::new();
    resources.insert("created_notes".to_owned(), creation.notes);
    resources.insert("created_edges".to_owned(), creation.edges);
    resources.insert("created_files".to_owned(), creation.files);
    resources.insert("created_bytes".to_owned(), creation.bytes);
    resources.insert("erased_notes".to_owned(), erasure.notes);
    resources.insert("erased_edges".to_owned(), erasure.edges);
    resources.insert("erased_files".to_owned(), erasure.files);
    resources.insert("erased_bytes".to_owned(), erasure.bytes);
    resources
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Orchestrates the plan protocol end to end against a pluggable [`Handler`].
pub struct Harness<'a> {
    ledger: &'a Ledger,
    content_store: &'a ContentStore,
    type_packs: &'a TypePackRegistry,
    policy: ApprovalPolicy,
    secrets: CompositeSecretsProvider,
    active_rulesets: Vec<ActiveRuleset>,
    vault_root: PathBuf,
    engine_version: String,
    environment: String,
}

impl<'a> Harness<'a> {
    /// Builds a harness over the given ledger, content store, and type pack
    /// registry, with the given approval policy, secrets provider, active
    /// rulesets, vault root, engine version, and environment label.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: &'a Ledger,
        content_store: &'a ContentStore,
        type_packs: &'a TypePackRegistry,
        policy: ApprovalPolicy,
        secrets: CompositeSecretsProvider,
        active_rulesets: Vec<ActiveRuleset>,
        vault_root: PathBuf,
        engine_version: String,
        environment: String,
    ) -> Self {
        Self { ledger, content_store, type_packs, policy, secrets, active_rulesets, vault_root, engine_version, environment }
    }

    fn plan_manager(&self) -> PlanManager<'a> {
        PlanManager::new(self.ledger, self.content_store, self.type_packs, self.policy.clone())
    }

    // ------------------------------------------------------------------
    // Propose
    // ------------------------------------------------------------------

    /// Computes a plan from `params`, evaluates the active rulesets against
    /// known artifact state, and records the result as a validated plan
    /// artifact.
    ///
    /// # Errors
    /// Returns [`HarnessError::ParamsInvalid`] or [`HarnessError::PlanInvalid`]
    /// if the handler rejects the params or its own plan before a plan
    /// artifact is ever created. Once a plan artifact exists, validation
    /// errors are recorded on it rather than returned as an error; see
    /// [`ProposeOutcome::validation_errors`].
    pub fn propose<H: Handler>(
        &self,
        handler: &H,
        params: Value,
        actor: &str,
        surface: Option<String>,
        vault_state: VaultStateSnapshot,
    ) -> Result<ProposeOutcome, HarnessError> {
        let param_errors = handler.validate_params(&params);
        if !param_errors.is_empty() {
            return Err(HarnessError::ParamsInvalid(param_errors));
        }

        let (plan, effect_summary) = handler.compute_plan(&params).map_err(HarnessError::HandlerFailed)?;

        let plan_errors = handler.validate_plan(&plan);
        if !plan_errors.is_empty() {
            return Err(HarnessError::PlanInvalid(plan_errors));
        }

        let plan_summary = serde_json::to_value(&plan).map_err(|err| HarnessError::Serialization(err.to_string()))?;
        let metadata = handler.metadata();
        let context = self.build_context(surface.as_deref(), &vault_state);

        let payload = json!({
            "params": params,
            "plan_summary": plan_summary,
            "effect_summary": {
                "effect_type": effect_summary.effect_type.as_wire_str(),
                "predicted_erasure": effect_summary.predicted_erasure,
                "predicted_outputs": effect_summary.predicted_outputs,
                "reasons": effect_summary.reasons,
            },
            "context": context,
        });

        let plan_artifact_id = self.plan_manager().propose(
            &metadata.operation,
            payload,
            actor,
            metadata.delegate_to.clone(),
            Vec::new(),
            surface,
            ArtifactType::Plan,
        )?;

        let constraint_summary = self.run_constraints(&plan_artifact_id)?;
        let passed = self.plan_manager().validate(&plan_artifact_id, "harness", Some(constraint_summary))?;

        let snapshot = self.ledger.snapshot(&plan_artifact_id)?;
        let risk_class = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);

        Ok(ProposeOutcome {
            plan_artifact_id,
            risk_class,
            requires_approval: risk_class.requires_approval(),
            requires_force_ack: risk_class.requires_force_ack(),
            plan_summary,
            validation_errors: if passed { Vec::new() } else { snapshot.validation_errors },
        })
    }

    fn build_context(&self, surface: Option<&str>, vault_state: &VaultStateSnapshot) -> Value {
        json!({
            "vault_state": {
                "content_hash": vault_state.content_hash,
                "note_count": vault_state.note_count,
                "timestamp": vault_state.timestamp.format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default(),
            },
            "active_rulesets": self.active_rulesets.iter().map(|active| json!({
                "id": active.ruleset.id,
                "version": active.ruleset.version,
                "content_id": active.content_id.as_str(),
                "path": active.path,
            })).collect::<Vec<_>>(),
            "surface": surface,
            "engine_version": self.engine_version,
            "environment": self.environment,
        })
    }

    fn run_constraints(&self, plan_artifact_id: &ArtifactId) -> Result<ConstraintResultsSummary, HarnessError> {
        let mut snapshots = Vec::new();
        for artifact_id in self.ledger.known_artifact_ids()? {
            snapshots.push(self.ledger.snapshot(&artifact_id)?);
        }
        let artifacts: Vec<&crate::snapshot::ArtifactSnapshot> = snapshots.iter().collect();
        let universe = SelectionUniverse { concepts: Vec::new(), graph: None, artifacts };
        let ctx = EvalContext { concepts_by_id: BTreeMap::new() };

        let engine = ConstraintEngine;
        let mut events = Vec::new();
        let mut rulesets_evaluated = 0u32;
        let mut rules_checked = 0u32;
        let mut rules_passed = 0u32;
        let mut rules_failed = 0u32;
        let mut invariants_verified: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        let mut violations = Vec::new();

        for active in &self.active_rulesets {
            let findings = engine.evaluate(&active.ruleset, &universe, &ctx)?;
            rulesets_evaluated += 1;
            let (constraint_payloads, invariant_payloads) = ConstraintEngine::to_events(&active.ruleset, &findings);

            for finding in &findings {
                rules_checked += 1;
                match finding.result {
                    crate::events::ConstraintResult::Pass => rules_passed += 1,
                    crate::events::ConstraintResult::Fail => {
                        rules_failed += 1;
                        violations.push(ConstraintViolation {
                            rule_id: finding.rule_id.clone(),
                            severity: "error".to_owned(),
                            message: finding.message.clone(),
                            item_id: finding.item_id.clone(),
                        });
                    }
                    crate::events::ConstraintResult::Warning => {
                        violations.push(ConstraintViolation {
                            rule_id: finding.rule_id.clone(),
                            severity: "warning".to_owned(),
                            message: finding.message.clone(),
                            item_id: finding.item_id.clone(),
                        });
                    }
                }
                if let Some(invariant) = &finding.invariant {
                    invariants_verified.insert(invariant.clone());
                }
            }

            for payload in constraint_payloads {
                events.push(Event {
                    event_type: EventType::ConstraintEvaluated,
                    artifact_id: plan_artifact_id.clone(),
                    timestamp: OffsetDateTime::now_utc(),
                    actor: "harness".to_owned(),
                    payload: serde_json::to_value(payload).map_err(|err| HarnessError::Serialization(err.to_string()))?,
                    content_id: None,
                    artifact_type: None,
                });
            }
            for payload in invariant_payloads {
                events.push(Event {
                    event_type: EventType::InvariantChecked,
                    artifact_id: plan_artifact_id.clone(),
                    timestamp: OffsetDateTime::now_utc(),
                    actor: "harness".to_owned(),
                    payload: serde_json::to_value(payload).map_err(|err| HarnessError::Serialization(err.to_string()))?,
                    content_id: None,
                    artifact_type: None,
                });
            }
        }

        self.ledger.append_many(events)?;

        Ok(ConstraintResultsSummary {
            rulesets_evaluated,
            rules_checked,
            rules_passed,
            rules_failed,
            invariants_verified: u32::try_from(invariants_verified.len()).unwrap_or(u32::MAX),
            violations,
        })
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    /// Re-derives `plan_artifact_id`'s plan deterministically, runs the
    /// handler, logs phased execution events, and emits a bundle.
    ///
    /// # Errors
    /// Returns [`HarnessError::ApprovalRequired`] if the plan is validated
    /// but its risk still requires approval. Returns
    /// [`HarnessError::HandlerFailed`] if the handler's execute phase
    /// errors; the failure is still logged before the error is returned.
    pub fn execute<H: Handler>(
        &self,
        plan_artifact_id: &ArtifactId,
        handler: &H,
        executor: &str,
        secret_ref: Option<&str>,
        dry_run: bool,
    ) -> Result<ExecuteOutcome, HarnessError> {
        let snapshot = self.ledger.snapshot(plan_artifact_id)?;
        let risk = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);

        if snapshot.status == ArtifactStatus::Validated && risk.requires_approval() {
            self.ledger.append(Event {
                event_type: EventType::ArtifactRejected,
                artifact_id: plan_artifact_id.clone(),
                timestamp: OffsetDateTime::now_utc(),
                actor: executor.to_owned(),
                payload: serde_json::to_value(RejectedPayload {
                    reason: "approval_required".to_owned(),
                    stage: "execution_gate".to_owned(),
                })
                .map_err(|err| HarnessError::Serialization(err.to_string()))?,
                content_id: None,
                artifact_type: None,
            })?;
            return Err(HarnessError::ApprovalRequired(plan_artifact_id.clone()));
        }

        let content = self.content_store.require(&snapshot.content_id)?;
        let StoredContent::Json(content_value) = content else {
            return Err(HarnessError::HandlerFailed("plan content is not json".to_owned()));
        };
        let params = content_value.pointer("/payload/params").cloned().unwrap_or(Value::Null);
        let repro_context = content_value.pointer("/payload/context").cloned().unwrap_or(Value::Null);
        let (plan, _effect_summary) = handler.compute_plan(&params).map_err(HarnessError::HandlerFailed)?;

        let secret = secret_ref.and_then(|reference| self.secrets.get(reference));
        let ctx = ExecutionContext {
            vault_root: self.vault_root.clone(),
            executor: executor.to_owned(),
            plan_artifact_id: plan_artifact_id.clone(),
            approval_artifact_id: snapshot.approval_artifact_id.clone(),
            dry_run,
            secret,
        };

        if dry_run {
            let plan_summary = serde_json::to_value(&plan).map_err(|err| HarnessError::Serialization(err.to_string()))?;
            return Ok(ExecuteOutcome::DryRun { plan_summary });
        }

        let execution_id = IdGen::new().next_execution_id()?;
        let handler_id = handler.metadata().operation;

        self.run_phase::<()>(plan_artifact_id, &execution_id, ExecutionPhase::Prepare, &handler_id, || {
            Ok(PhaseResult::new(()))
        })?;

        let outcome = self.run_phase(plan_artifact_id, &execution_id, ExecutionPhase::Execute, &handler_id, || {
            match handler.execute(&ctx, &plan) {
                Ok(outcome) => {
                    let resources = resources_from(&outcome.erasure_cost, &outcome.creation_summary);
                    Ok(PhaseResult::with_resources(outcome, resources))
                }
                Err(message) => Err(("handler_error".to_owned(), message)),
            }
        })?;

        let result_content =
            serde_json::to_value(&outcome.result).map_err(|err| HarnessError::Serialization(err.to_string()))?;
        let erasure_cost = outcome.erasure_cost;
        let creation_summary = outcome.creation_summary;
        let result_artifact_type = handler.result_artifact_type();

        let result_artifact_id = self.plan_manager().execute(plan_artifact_id, executor, move |_plan_content| {
            Ok(ExecutionOutcome {
                result_content: result_content.clone(),
                erasure_cost: erasure_cost.clone(),
                creation_summary: creation_summary.clone(),
                result_artifact_type: result_artifact_type.clone(),
            })
        })?;

        let result_content_id = self.ledger.snapshot(&result_artifact_id)?.content_id;
        let approval_content_id = match &snapshot.approval_artifact_id {
            Some(approval_id) => Some(self.ledger.snapshot(approval_id)?.content_id),
            None => None,
        };

        let bundle_artifact_id = self.run_phase(plan_artifact_id, &execution_id, ExecutionPhase::Commit, &handler_id, || {
            match self.emit_bundle(
                plan_artifact_id,
                &snapshot.content_id,
                &result_artifact_id,
                &result_content_id,
                &snapshot.approval_artifact_id,
                &approval_content_id,
                &handler_id,
                repro_context,
            ) {
                Ok(id) => Ok(PhaseResult::new(id)),
                Err(err) => Err(("bundle_error".to_owned(), err.to_string())),
            }
        })?;

        Ok(ExecuteOutcome::Completed { result_artifact_id, bundle_artifact_id, execution_id })
    }

    fn run_phase<T>(
        &self,
        plan_artifact_id: &ArtifactId,
        execution_id: &ExecutionId,
        phase: ExecutionPhase,
        handler_id: &str,
        body: impl FnOnce() -> Result<PhaseResult<T>, (String, String)>,
    ) -> Result<T, HarnessError> {
        let started_at = OffsetDateTime::now_utc();
        self.ledger.append(Event {
            event_type: EventType::ExecutionLogged,
            artifact_id: plan_artifact_id.clone(),
            timestamp: started_at,
            actor: handler_id.to_owned(),
            payload: serde_json::to_value(ExecutionLoggedPayload {
                execution_id: execution_id.clone(),
                attempt: 0,
                phase,
                status: ExecutionStatus::Started,
                handler_id: handler_id.to_owned(),
                started_at: Some(started_at),
                ended_at: None,
                duration_ms: None,
                resources: None,
                error_type: None,
                error: None,
                reason: None,
            })
            .map_err(|err| HarnessError::Serialization(err.to_string()))?,
            content_id: None,
            artifact_type: None,
        })?;

        match body() {
            Ok(result) => {
                let ended_at = OffsetDateTime::now_utc();
                let duration_ms = u64::try_from((ended_at - started_at).whole_milliseconds()).unwrap_or(0);
                self.ledger.append(Event {
                    event_type: EventType::ExecutionLogged,
                    artifact_id: plan_artifact_id.clone(),
                    timestamp: ended_at,
                    actor: handler_id.to_owned(),
                    payload: serde_json::to_value(ExecutionLoggedPayload {
                        execution_id: execution_id.clone(),
                        attempt: 0,
                        phase,
                        status: ExecutionStatus::Completed,
                        handler_id: handler_id.to_owned(),
                        started_at: Some(started_at),
                        ended_at: Some(ended_at),
                        duration_ms: Some(duration_ms),
                        resources: if result.resources.is_empty() { None } else { Some(result.resources) },
                        error_type: None,
                        error: None,
                        reason: None,
                    })
                    .map_err(|err| HarnessError::Serialization(err.to_string()))?,
                    content_id: None,
                    artifact_type: None,
                })?;
                Ok(result.value)
            }
            Err((error_type, error)) => {
                let ended_at = OffsetDateTime::now_utc();
                let duration_ms = u64::try_from((ended_at - started_at).whole_milliseconds()).unwrap_or(0);
                let truncated: String = error.chars().take(MAX_LOGGED_ERROR_LEN).collect();
                self.ledger.append(Event {
                    event_type: EventType::ExecutionLogged,
                    artifact_id: plan_artifact_id.clone(),
                    timestamp: ended_at,
                    actor: handler_id.to_owned(),
                    payload: serde_json::to_value(ExecutionLoggedPayload {
                        execution_id: execution_id.clone(),
                        attempt: 0,
                        phase,
                        status: ExecutionStatus::Failed,
                        handler_id: handler_id.to_owned(),
                        started_at: Some(started_at),
                        ended_at: Some(ended_at),
                        duration_ms: Some(duration_ms),
                        resources: None,
                        error_type: Some(error_type.clone()),
                        error: Some(truncated.clone()),
                        reason: None,
                    })
                    .map_err(|err| HarnessError::Serialization(err.to_string()))?,
                    content_id: None,
                    artifact_type: None,
                })?;
                Err(HarnessError::HandlerFailed(format!("{phase:?} failed: {truncated}")))
            }
        }
    }

    fn emit_bundle(
        &self,
        plan_artifact_id: &ArtifactId,
        plan_content_id: &crate::identifiers::ContentId,
        result_artifact_id: &ArtifactId,
        result_content_id: &crate::identifiers::ContentId,
        approval_artifact_id: &Option<ArtifactId>,
        approval_content_id: &Option<crate::identifiers::ContentId>,
        operation: &str,
        repro_context: Value,
    ) -> Result<ArtifactId, HarnessError> {
        let timestamp = OffsetDateTime::now_utc();
        let mut artifacts = json!({
            "plan": plan_artifact_id.to_string(),
            "result": result_artifact_id.to_string(),
        });
        if let Some(approval_id) = approval_artifact_id {
            artifacts["approval"] = json!(approval_id.to_string());
        }

        let content = json!({
            "version": BUNDLE_VERSION,
            "operation": operation,
            "timestamp": timestamp.format(&time::format_description::well_known::Rfc3339)
                .map_err(|err| HarnessError::Serialization(err.to_string()))?,
            "artifacts": artifacts,
            "repro": repro_context,
        });

        let content_id = self.content_store.store(&StoredContent::Json(content))?;
        let bundle_artifact_id = IdGen::new().next_artifact_id()?;
        let (risk_class, risk_reasons) = compute_risk("bundle.emit", &json!({}));

        let mut inputs = vec![
            json!({"artifact_id": plan_artifact_id.to_string(), "content_id": plan_content_id.as_str()}),
            json!({"artifact_id": result_artifact_id.to_string(), "content_id": result_content_id.as_str()}),
        ];
        if let (Some(approval_id), Some(approval_content_id)) = (approval_artifact_id, approval_content_id) {
            inputs.push(json!({"artifact_id": approval_id.to_string(), "content_id": approval_content_id.as_str()}));
        }

        self.ledger.append(Event {
            event_type: EventType::ArtifactCreated,
            artifact_id: bundle_artifact_id.clone(),
            timestamp,
            actor: "harness".to_owned(),
            payload: json!({
                "operation": "bundle.emit",
                "risk_class": risk_class.as_wire_str(),
                "risk_reasons": risk_reasons,
                "inputs": inputs,
                "payload_manifest": [],
            }),
            content_id: Some(content_id),
            artifact_type: Some(ArtifactType::Bundle),
        })?;

        Ok(bundle_artifact_id)
    }

    // ------------------------------------------------------------------
    // Convenience
    // ------------------------------------------------------------------

    /// Proposes, auto-approves if approval is not required, and executes in
    /// one call. Returns [`HarnessError::ApprovalRequired`] instead of
    /// auto-approving if the plan's risk requires one.
    ///
    /// # Errors
    /// Returns [`HarnessError::ValidationFailed`] if validation recorded
    /// errors, [`HarnessError::ApprovalRequired`] if the plan's risk needs an
    /// explicit approval step, or any error from [`Harness::propose`] or
    /// [`Harness::execute`].
    pub fn run<H: Handler>(
        &self,
        handler: &H,
        params: Value,
        actor: &str,
        surface: Option<String>,
        vault_state: VaultStateSnapshot,
        executor: &str,
    ) -> Result<ExecuteOutcome, HarnessError> {
        let proposed = self.propose(handler, params, actor, surface, vault_state)?;
        if !proposed.validation_errors.is_empty() {
            return Err(HarnessError::ValidationFailed(proposed.plan_artifact_id, proposed.validation_errors));
        }
        if proposed.requires_approval {
            return Err(HarnessError::ApprovalRequired(proposed.plan_artifact_id));
        }
        self.plan_manager().approve(&proposed.plan_artifact_id, actor, None, false)?;
        self.execute(&proposed.plan_artifact_id, handler, executor, None, false)
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
    use crate::ruleset::Ruleset;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct RenamePlan {
        from: String,
        to: String,
    }

    #[derive(Debug, Clone, serde::Serialize)]
    struct RenameResult {
        renamed: bool,
    }

    struct RenameHandler {
        fail: bool,
    }

    impl Handler for RenameHandler {
        type Plan = RenamePlan;
        type Result = RenameResult;

        fn metadata(&self) -> HandlerMetadata {
            HandlerMetadata { operation: "vault.rename_note".to_owned(), delegate_to: None, supports_dry_run: true }
        }

        fn validate_params(&self, params: &Value) -> Vec<String> {
            let mut errors = Vec::new();
            if params.get("from").and_then(Value::as_str).is_none() {
                errors.push("missing 'from'".to_owned());
            }
            if params.get("to").and_then(Value::as_str).is_none() {
                errors.push("missing 'to'".to_owned());
            }
            errors
        }

        fn compute_plan(&self, params: &Value) -> Result<(Self::Plan, EffectSummary), String> {
            let from = params.get("from").and_then(Value::as_str).ok_or("missing from")?.to_owned();
            let to = params.get("to").and_then(Value::as_str).ok_or("missing to")?.to_owned();
            let effect_summary = EffectSummary {
                effect_type: RiskClass::MutationReversible,
                predicted_erasure: ErasureCost::default(),
                predicted_outputs: vec![to.clone()],
                reasons: vec!["renames a single note in place".to_owned()],
            };
            Ok((RenamePlan { from, to }, effect_summary))
        }

        fn validate_plan(&self, plan: &Self::Plan) -> Vec<String> {
            if plan.from == plan.to { vec!["from and to must differ".to_owned()] } else { Vec::new() }
        }

        fn execute(&self, _ctx: &ExecutionContext, _plan: &Self::Plan) -> Result<HandlerOutcome<Self::Result>, String> {
            if self.fail {
                return Err("disk full".to_owned());
            }
            Ok(HandlerOutcome {
                result: RenameResult { renamed: true },
                erasure_cost: ErasureCost::default(),
                creation_summary: CreationSummary { notes: 1, ..CreationSummary::default() },
            })
        }
    }

    fn empty_ruleset() -> Ruleset {
        Ruleset { id: "core".to_owned(), version: "1".to_owned(), rules: Vec::new() }
    }

    fn setup() -> (tempfile::TempDir, Ledger, ContentStore, TypePackRegistry) {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(&dir.path().join("ledger")).expect("open ledger");
        let content_store = ContentStore::open(&dir.path().join("content")).expect("open content store");
        let type_packs = TypePackRegistry::default();
        (dir, ledger, content_store, type_packs)
    }

    fn harness<'a>(ledger: &'a Ledger, content_store: &'a ContentStore, type_packs: &'a TypePackRegistry) -> Harness<'a> {
        Harness::new(
            ledger,
            content_store,
            type_packs,
            ApprovalPolicy::default(),
            CompositeSecretsProvider::default(),
            vec![ActiveRuleset {
                ruleset: empty_ruleset(),
                content_id: crate::identifiers::ContentId::new("0".repeat(64)),
                path: "rulesets/core.toml".to_owned(),
            }],
            PathBuf::from("/vault"),
            "1.0.0".to_owned(),
            "test".to_owned(),
        )
    }

    #[test]
    fn full_lifecycle_reversible_plan_reaches_bundle() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let harness = harness(&ledger, &content_store, &type_packs);
        let handler = RenameHandler { fail: false };

        let proposed = harness
            .propose(
                &handler,
                json!({"from": "a.md", "to": "b.md"}),
                "agent:test",
                Some("cli".to_owned()),
                VaultStateSnapshot::default(),
            )
            .expect("propose");
        assert!(proposed.validation_errors.is_empty());
        assert_eq!(proposed.risk_class, RiskClass::MutationReversible);
        assert!(!proposed.requires_approval);

        harness
            .plan_manager()
            .approve(&proposed.plan_artifact_id, "agent:test", Some("vault.rename_note".to_owned()), false)
            .expect("approve");

        let outcome = harness
            .execute(&proposed.plan_artifact_id, &handler, "agent:test", None, false)
            .expect("execute");

        match outcome {
            ExecuteOutcome::Completed { result_artifact_id, bundle_artifact_id, .. } => {
                let snapshot = ledger.snapshot(&proposed.plan_artifact_id).expect("snapshot");
                assert_eq!(snapshot.status, ArtifactStatus::Executed);
                assert_eq!(snapshot.result_artifact_id, Some(result_artifact_id));

                let bundle_snapshot = ledger.snapshot(&bundle_artifact_id).expect("bundle snapshot");
                assert_eq!(bundle_snapshot.artifact_type, ArtifactType::Bundle);
            }
            ExecuteOutcome::DryRun { .. } => panic!("expected a completed execution"),
        }
    }

    #[test]
    fn execute_without_approval_is_rejected_with_approval_required() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let harness = harness(&ledger, &content_store, &type_packs);
        let handler = RenameHandler { fail: false };

        let proposed = harness
            .propose(
                &handler,
                json!({"from": "a.md", "to": "b.md"}),
                "agent:test",
                None,
                VaultStateSnapshot::default(),
            )
            .expect("propose");

        let err = harness.execute(&proposed.plan_artifact_id, &handler, "agent:test", None, false).unwrap_err();
        // Reversible plans don't require approval, so this exercises
        // PlanManager's own WrongStatus path, not the harness gate.
        assert!(matches!(err, HarnessError::PlanManager(_)));
    }

    #[test]
    fn handler_execute_failure_is_logged_without_producing_a_bundle() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let harness = harness(&ledger, &content_store, &type_packs);
        let handler = RenameHandler { fail: true };

        let proposed = harness
            .propose(
                &handler,
                json!({"from": "a.md", "to": "b.md"}),
                "agent:test",
                None,
                VaultStateSnapshot::default(),
            )
            .expect("propose");
        harness
            .plan_manager()
            .approve(&proposed.plan_artifact_id, "agent:test", None, false)
            .expect("approve");

        let err = harness.execute(&proposed.plan_artifact_id, &handler, "agent:test", None, false).unwrap_err();
        assert!(matches!(err, HarnessError::HandlerFailed(_)));

        let snapshot = ledger.snapshot(&proposed.plan_artifact_id).expect("snapshot");
        assert_eq!(snapshot.status, ArtifactStatus::Approved);
        assert!(ledger.list_by_type(&ArtifactType::Bundle).expect("list bundles").is_empty());

        let logs = ledger.execution_logs(Some(&proposed.plan_artifact_id), None, None, None, None).expect("logs");
        assert!(logs.iter().any(|(_, payload)| payload.status == ExecutionStatus::Failed));
    }

    #[test]
    fn dry_run_does_not_log_or_mutate_status() {
        let (_dir, ledger, content_store, type_packs) = setup();
        let harness = harness(&ledger, &content_store, &type_packs);
        let handler = RenameHandler { fail: false };

        let proposed = harness
            .propose(
                &handler,
                json!({"from": "a.md", "to": "b.md"}),
                "agent:test",
                None,
                VaultStateSnapshot::default(),
            )
            .expect("propose");
        harness
            .plan_manager()
            .approve(&proposed.plan_artifact_id, "agent:test", None, false)
            .expect("approve");

        let outcome = harness.execute(&proposed.plan_artifact_id, &handler, "agent:test", None, true).expect("dry run");
        assert!(matches!(outcome, ExecuteOutcome::DryRun { .. }));

        let snapshot = ledger.snapshot(&proposed.plan_artifact_id).expect("snapshot");
        assert_eq!(snapshot.status, ArtifactStatus::Approved);
    }
}
