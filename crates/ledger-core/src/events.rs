// crates/ledger-core/src/events.rs
// ============================================================================
// Module: Event Model
// Description: Immutable event records and their typed payloads.
// Purpose: Define the closed set of event and artifact types that make up
//          the append-only ledger line format.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Every line in `artifact.jsonl` deserializes to an [`Event`]. The event
//! type and artifact type are closed enums; the payload is a typed enum
//! with one variant per event type carrying its documented required fields.
//! The only place an open JSON value remains is inside a plan's
//! caller-supplied `params`, which is domain-specific by design.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::identifiers::ArtifactId;
use crate::identifiers::ContentId;
use crate::identifiers::ExecutionId;

// ============================================================================
// SECTION: Event type and artifact type
// ============================================================================

/// Closed set of event types recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// `artifact.created` — first event for any artifact.
    #[serde(rename = "artifact.created")]
    ArtifactCreated,
    /// `artifact.validated` — type-pack and risk validation ran.
    #[serde(rename = "artifact.validated")]
    ArtifactValidated,
    /// `artifact.approved` — a human or policy granted approval.
    #[serde(rename = "artifact.approved")]
    ArtifactApproved,
    /// `artifact.executed` — the handler ran and produced a result.
    #[serde(rename = "artifact.executed")]
    ArtifactExecuted,
    /// `artifact.rejected` — validation or gating denied the artifact.
    #[serde(rename = "artifact.rejected")]
    ArtifactRejected,
    /// `artifact.superseded` — a later artifact replaces this one.
    #[serde(rename = "artifact.superseded")]
    ArtifactSuperseded,
    /// `constraint.evaluated` — one rule evaluation result.
    #[serde(rename = "constraint.evaluated")]
    ConstraintEvaluated,
    /// `invariant.checked` — a rolled-up invariant status.
    #[serde(rename = "invariant.checked")]
    InvariantChecked,
    /// `execution.logged` — one phase transition of a harness execution.
    #[serde(rename = "execution.logged")]
    ExecutionLogged,
}

impl EventType {
    /// Returns the wire string for this event type, e.g. `"artifact.created"`.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::ArtifactCreated => "artifact.created",
            Self::ArtifactValidated => "artifact.validated",
            Self::ArtifactApproved => "artifact.approved",
            Self::ArtifactExecuted => "artifact.executed",
            Self::ArtifactRejected => "artifact.rejected",
            Self::ArtifactSuperseded => "artifact.superseded",
            Self::ConstraintEvaluated => "constraint.evaluated",
            Self::InvariantChecked => "invariant.checked",
            Self::ExecutionLogged => "execution.logged",
        }
    }
}

/// Closed set of artifact kinds, extensible via [`ArtifactType::Other`] for
/// domain-specific handler outputs the core does not interpret.
///
/// Serializes to a plain wire string in every case (including `Other`), not
/// the externally-tagged map form `serde`'s enum derive would otherwise give
/// a variant carrying data, so `artifact_type` stays a single string field
/// on the wire as spec.md §6 requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    /// A proposed operation awaiting validation and approval.
    Plan,
    /// A grant of approval targeting a plan.
    Approval,
    /// A harness execution's rolled-up summary.
    ExecutionSummary,
    /// A `bundle@v1` manifest tying plan, approval, and result together.
    Bundle,
    /// A handler-defined result or other domain-specific artifact kind.
    Other(String),
}

impl Serialize for ArtifactType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for ArtifactType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire_str(&s))
    }
}

impl ArtifactType {
    /// Parses a wire string back into an [`ArtifactType`], routing anything
    /// outside the closed set into [`ArtifactType::Other`].
    #[must_use]
    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "plan" => Self::Plan,
            "approval" => Self::Approval,
            "execution_summary" => Self::ExecutionSummary,
            "bundle" => Self::Bundle,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the wire string for this artifact type.
    #[must_use]
    pub fn as_wire_str(&self) -> &str {
        match self {
            Self::Plan => "plan",
            Self::Approval => "approval",
            Self::ExecutionSummary => "execution_summary",
            Self::Bundle => "bundle",
            Self::Other(name) => name,
        }
    }
}

// ============================================================================
// SECTION: Risk class (re-exported here for payload shapes)
// ============================================================================

/// Five-valued risk classification. Defined fully in [`crate::risk`]; the
/// variant here is the wire-serializable shape shared by event payloads.
pub use crate::risk::RiskClass;

// ============================================================================
// SECTION: Typed payloads
// ============================================================================

/// An input reference carried by a created artifact or an approval target.
///
/// # Invariants
/// - `content_id` is never empty; an artifact whose content id cannot be
///   resolved is a validation error, not an empty placeholder (diverges
///   from embedding an empty string for unresolved references).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    /// The referenced artifact's identifier.
    pub artifact_id: ArtifactId,
    /// The referenced artifact's canonical content id.
    pub content_id: ContentId,
}

/// Payload carried by `artifact.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPayload {
    /// The handler or protocol operation name, e.g. `"graph.load"`.
    pub operation: String,
    /// Declared risk class at creation time (subject to revision at validation).
    pub risk_class: RiskClass,
    /// Reasons the declared risk class was chosen.
    #[serde(default)]
    pub risk_reasons: Vec<String>,
    /// Other artifacts this one depends on or references.
    #[serde(default)]
    pub inputs: Vec<InputRef>,
    /// Manifest of files the payload declares, if any.
    #[serde(default)]
    pub payload_manifest: Vec<PayloadManifestEntry>,
    /// Handler this plan should be routed to at execution time.
    #[serde(default)]
    pub delegate_to: Option<String>,
    /// Surface that originated this artifact (`"cli"`, `"agent"`, ...).
    #[serde(default)]
    pub surface: Option<String>,
}

/// One entry in a payload manifest describing a referenced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadManifestEntry {
    /// Relative path of the referenced file.
    pub path: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Hex-encoded SHA-256 of the file contents.
    pub sha256: String,
}

/// Payload carried by `artifact.validated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedPayload {
    /// Identity of the validating component (e.g. `"harness"`).
    pub validator: String,
    /// Validation errors found; empty means validation passed.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Authoritative risk class recomputed from stored content.
    pub computed_risk_class: RiskClass,
    /// Reasons supporting the computed risk class.
    #[serde(default)]
    pub risk_reasons: Vec<String>,
    /// Summary of constraint engine evaluation run during validation, if any.
    #[serde(default)]
    pub constraint_results: Option<ConstraintResultsSummary>,
}

/// Summary of a constraint evaluation pass, embedded in a validated payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintResultsSummary {
    /// Number of rulesets evaluated.
    pub rulesets_evaluated: u32,
    /// Number of rules checked across all rulesets.
    pub rules_checked: u32,
    /// Number of rules that passed.
    pub rules_passed: u32,
    /// Number of rules that failed.
    pub rules_failed: u32,
    /// Number of distinct invariants verified.
    pub invariants_verified: u32,
    /// Individual violation records.
    #[serde(default)]
    pub violations: Vec<ConstraintViolation>,
}

/// A single constraint violation surfaced in a validation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintViolation {
    /// The rule or invariant id that was violated.
    pub rule_id: String,
    /// Finding severity.
    pub severity: String,
    /// Human-readable violation message.
    pub message: String,
    /// Identifier of the item that triggered the violation, if any.
    #[serde(default)]
    pub item_id: Option<String>,
}

/// Payload carried by `artifact.approved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedPayload {
    /// Identifier of the approval artifact granting this approval.
    pub approval_artifact_id: ArtifactId,
    /// Whether the approver explicitly acknowledged destructive risk.
    #[serde(default)]
    pub force_ack: bool,
    /// Scope string recorded with the approval (usually the operation name).
    pub scope: String,
}

/// Payload carried by `artifact.executed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedPayload {
    /// Identifier of the artifact holding the handler's result.
    pub result_artifact_id: ArtifactId,
    /// Erasure cost reported by the handler, if any.
    #[serde(default)]
    pub erasure_cost: ErasureCost,
    /// Creation summary reported by the handler, if any.
    #[serde(default)]
    pub creation_summary: CreationSummary,
    /// Identity of the executor (`"handler:harness"`, a user, ...).
    pub executor: String,
}

/// Counters describing data erased by a destructive operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErasureCost {
    /// Notes removed.
    #[serde(default)]
    pub notes: u64,
    /// Graph edges removed.
    #[serde(default)]
    pub edges: u64,
    /// Files removed.
    #[serde(default)]
    pub files: u64,
    /// Bytes removed.
    #[serde(default)]
    pub bytes: u64,
}

/// Counters describing data created by an operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreationSummary {
    /// Notes created.
    #[serde(default)]
    pub notes: u64,
    /// Graph edges created.
    #[serde(default)]
    pub edges: u64,
    /// Files created.
    #[serde(default)]
    pub files: u64,
    /// Bytes written.
    #[serde(default)]
    pub bytes: u64,
}

/// Payload carried by `artifact.rejected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedPayload {
    /// Why the artifact was rejected.
    pub reason: String,
    /// Which stage produced the rejection (`"validation"`, `"execution_gate"`, ...).
    pub stage: String,
}

/// Payload carried by `artifact.superseded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupersededPayload {
    /// The artifact that replaces this one.
    pub superseded_by: ArtifactId,
}

/// Evidence attached to a constraint evaluation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintEvidence {
    /// Identifier of the item the finding concerns.
    #[serde(default)]
    pub item_id: Option<String>,
    /// The kind of item evaluated (`"concept"`, `"artifact"`, ...).
    pub item_type: String,
    /// Human-readable explanation of the finding.
    pub message: String,
    /// Source line, if applicable.
    #[serde(default)]
    pub line: Option<u32>,
}

/// Payload carried by `constraint.evaluated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintEvaluatedPayload {
    /// Ruleset identifier the rule belongs to.
    pub ruleset_id: String,
    /// Rule identifier within the ruleset.
    pub rule_id: String,
    /// Invariant this rule contributes to, if declared.
    #[serde(default)]
    pub invariant: Option<String>,
    /// Result of evaluating the rule against one item.
    pub result: ConstraintResult,
    /// Evidence supporting a fail or warning result.
    #[serde(default)]
    pub evidence: Option<ConstraintEvidence>,
}

/// Result of one constraint rule evaluation against one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintResult {
    /// The rule's predicate held.
    Pass,
    /// The rule's predicate failed outright.
    Fail,
    /// The rule's predicate raised a non-blocking concern.
    Warning,
}

/// Payload carried by `invariant.checked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckedPayload {
    /// The invariant identifier being summarized.
    pub invariant_id: String,
    /// Overall status across every rule referencing this invariant.
    pub status: InvariantStatus,
    /// Number of rules that reference this invariant.
    pub rules_checked: u32,
    /// Number of failing findings for this invariant.
    pub violations: u32,
    /// Distinct item identifiers affected by a failing finding.
    #[serde(default)]
    pub affected_items: Vec<String>,
}

/// Rolled-up pass/fail status for an invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantStatus {
    /// No failing findings for this invariant.
    Pass,
    /// At least one failing finding for this invariant.
    Fail,
}

/// Phase of a harness-driven execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Setup prior to running the handler.
    Prepare,
    /// Invocation of the handler's execute method.
    Execute,
    /// Bundle emission and finalization.
    Commit,
}

impl ExecutionPhase {
    /// Returns the wire string for this phase.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Execute => "execute",
            Self::Commit => "commit",
        }
    }
}

/// Status of a single phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The phase began.
    Started,
    /// The phase finished without error.
    Completed,
    /// The phase raised an error.
    Failed,
    /// The phase was skipped (logging disabled).
    Skipped,
}

/// Payload carried by `execution.logged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLoggedPayload {
    /// Execution identifier shared by every phase of one execution.
    pub execution_id: ExecutionId,
    /// Retry attempt number, zero-based.
    #[serde(default)]
    pub attempt: u32,
    /// Which phase this event describes.
    pub phase: ExecutionPhase,
    /// The phase's status transition.
    pub status: ExecutionStatus,
    /// Identifier of the handler driving this execution.
    pub handler_id: String,
    /// Wall-clock start time of the phase, if started.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Wall-clock end time of the phase, if terminal.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    /// Duration of the phase in milliseconds, if terminal.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Resource counters reported by the handler's execution metrics.
    #[serde(default)]
    pub resources: Option<BTreeMap<String, u64>>,
    /// Exception type name, present only on failure.
    #[serde(default)]
    pub error_type: Option<String>,
    /// Error message, truncated to 500 characters, present only on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Reason a phase was skipped, present only when status is skipped.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Typed union of every event's payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Payload for `artifact.created`.
    Created(CreatedPayload),
    /// Payload for `artifact.validated`.
    Validated(ValidatedPayload),
    /// Payload for `artifact.approved`.
    Approved(ApprovedPayload),
    /// Payload for `artifact.executed`.
    Executed(ExecutedPayload),
    /// Payload for `artifact.rejected`.
    Rejected(RejectedPayload),
    /// Payload for `artifact.superseded`.
    Superseded(SupersededPayload),
    /// Payload for `constraint.evaluated`.
    ConstraintEvaluated(ConstraintEvaluatedPayload),
    /// Payload for `invariant.checked`.
    InvariantChecked(InvariantCheckedPayload),
    /// Payload for `execution.logged`.
    ExecutionLogged(ExecutionLoggedPayload),
}

// ============================================================================
// SECTION: Event
// ============================================================================

/// One immutable line of the append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Which kind of event this is.
    pub event_type: EventType,
    /// The artifact this event concerns.
    pub artifact_id: ArtifactId,
    /// When the event was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Who or what caused the event (`"agent:harness"`, a username, ...).
    pub actor: String,
    /// The event's typed payload. Stored as an open JSON value on the wire
    /// and interpreted via [`Event::payload_as`] to tolerate forward additions.
    pub payload: Value,
    /// Canonical content id, present only on `artifact.created`.
    #[serde(default)]
    pub content_id: Option<ContentId>,
    /// Artifact kind, present only on `artifact.created`.
    #[serde(default)]
    pub artifact_type: Option<ArtifactType>,
}

impl Event {
    /// Renders this event as one canonical, newline-free JSON line.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses one ledger line into an event.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if the line is not a well-formed event.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Formats the current time as an RFC 3339 timestamp string.
    #[must_use]
    pub fn format_timestamp(ts: OffsetDateTime) -> String {
        ts.format(&Rfc3339).unwrap_or_default()
    }

    /// Deserializes this event's payload into one of the typed
    /// [`EventPayload`] variants, for callers that want struct access
    /// instead of walking the open [`serde_json::Value`].
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if the payload does not match the
    /// shape expected for this event's [`EventType`].
    pub fn typed_payload(&self) -> Result<EventPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use serde_json::json;

    use super::*;

    #[test]
    fn event_type_round_trips_wire_string() {
        let serialized = serde_json::to_string(&EventType::ArtifactCreated).unwrap();
        assert_eq!(serialized, "\"artifact.created\"");
        let parsed: EventType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, EventType::ArtifactCreated);
    }

    #[test]
    fn artifact_type_other_round_trips() {
        let other = ArtifactType::Other("graph_result".to_owned());
        let serialized = serde_json::to_string(&other).unwrap();
        let parsed: ArtifactType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, other);
    }

    #[test]
    fn artifact_type_from_wire_str_round_trips_closed_variants() {
        assert_eq!(ArtifactType::from_wire_str("plan"), ArtifactType::Plan);
        assert_eq!(ArtifactType::from_wire_str("approval"), ArtifactType::Approval);
        assert_eq!(ArtifactType::from_wire_str("execution_summary"), ArtifactType::ExecutionSummary);
        assert_eq!(ArtifactType::from_wire_str("bundle"), ArtifactType::Bundle);
        assert_eq!(ArtifactType::from_wire_str("graph_result"), ArtifactType::Other("graph_result".to_owned()));
    }

    #[test]
    fn event_round_trips_through_json_line() {
        let event = Event {
            event_type: EventType::ArtifactCreated,
            artifact_id: ArtifactId::from_raw(1_700_000_000_000, 1).unwrap(),
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            actor: "agent:harness".to_owned(),
            payload: json!({"operation": "graph.load"}),
            content_id: Some(ContentId::new("a".repeat(64))),
            artifact_type: Some(ArtifactType::Plan),
        };
        let line = event.to_line().unwrap();
        assert!(!line.contains('\n'));
        let parsed = Event::from_line(&line).unwrap();
        assert_eq!(parsed.artifact_id, event.artifact_id);
        assert_eq!(parsed.event_type, event.event_type);
    }
}
