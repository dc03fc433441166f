// crates/ledger-core/src/snapshot.rs
// ============================================================================
// Module: Snapshot Projection
// Description: Event-fold projection of an artifact's current state.
// Purpose: Reconstruct an artifact's status and accumulated fields from its
//          event history without ever persisting the result.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A [`Snapshot`] is never stored; it is folded fresh from an artifact's
//! event slice every time a caller needs current state. [`fold_events`] is
//! deterministic and idempotent: the same event list always yields the same
//! snapshot, and folding a prefix then the remainder yields the same result
//! as folding the whole list at once.

use time::OffsetDateTime;

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
use crate::events::SupersededPayload;
use crate::events::ValidatedPayload;
use crate::identifiers::ArtifactId;
use crate::identifiers::ContentId;
use crate::risk::RiskClass;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while folding an artifact's event history into a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// `fold_events` was called with no events.
    #[error("cannot fold an empty event list")]
    EmptyHistory,
    /// The first event in the list was not `artifact.created`.
    #[error("first event for artifact {0} must be artifact.created, got {1:?}")]
    FirstEventNotCreated(ArtifactId, EventType),
    /// The event list mixed events from more than one artifact.
    #[error("event for artifact {found} does not belong to snapshot being folded for {expected}")]
    ArtifactIdMismatch {
        /// The artifact id the snapshot is being folded for.
        expected: ArtifactId,
        /// The artifact id actually found on the offending event.
        found: ArtifactId,
    },
    /// An event's payload did not match the shape expected for its event type.
    #[error("malformed payload on {0:?} event for artifact {1}: {2}")]
    MalformedPayload(EventType, ArtifactId, String),
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of an artifact, derived from its event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Only `artifact.created` has been observed.
    Created,
    /// `artifact.validated` has been observed and validation passed.
    Validated,
    /// `artifact.approved` has been observed.
    Approved,
    /// `artifact.executed` has been observed.
    Executed,
    /// The artifact was rejected, at any stage.
    Rejected,
    /// The artifact was superseded by a later artifact.
    Superseded,
}

impl ArtifactStatus {
    /// Returns the wire string for this status, as used in CLI filters and
    /// derived-summary output.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validated => "validated",
            Self::Approved => "approved",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    /// Parses a wire string back into an [`ArtifactStatus`], returning
    /// `None` for anything outside the closed set.
    #[must_use]
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "validated" => Some(Self::Validated),
            "approved" => Some(Self::Approved),
            "executed" => Some(Self::Executed),
            "rejected" => Some(Self::Rejected),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

/// Producer metadata recorded at creation time.
#[derive(Debug, Clone)]
pub struct ProducerMetadata {
    /// Actor that proposed the artifact.
    pub actor: String,
    /// Operation name declared at creation.
    pub operation: String,
    /// Creation timestamp.
    pub timestamp: OffsetDateTime,
    /// Originating surface (`"cli"`, `"agent"`, ...), if declared.
    pub surface: Option<String>,
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Derived, in-memory projection of an artifact's current state.
///
/// Never persisted; recomputed on demand by [`fold_events`] from an
/// artifact's full event slice.
#[derive(Debug, Clone)]
pub struct ArtifactSnapshot {
    /// The artifact this snapshot describes.
    pub artifact_id: ArtifactId,
    /// Current lifecycle status.
    pub status: ArtifactStatus,
    /// Kind of artifact, recorded at creation.
    pub artifact_type: ArtifactType,
    /// Canonical content id, recorded at creation.
    pub content_id: ContentId,
    /// Risk class declared by the proposer at creation time.
    pub declared_risk_class: RiskClass,
    /// Authoritative risk class recomputed at validation, if validation ran.
    pub computed_risk_class: Option<RiskClass>,
    /// Inputs referenced at creation time.
    pub inputs: Vec<InputRef>,
    /// Producer metadata recorded at creation.
    pub producer: ProducerMetadata,
    /// Handler this plan should be routed to, if declared.
    pub delegate_to: Option<String>,
    /// Validation errors recorded at the most recent validation, if any.
    pub validation_errors: Vec<String>,
    /// Identifier of the approval artifact granting approval, if approved.
    pub approval_artifact_id: Option<ArtifactId>,
    /// Whether the approver explicitly acknowledged destructive risk.
    pub force_ack: bool,
    /// Scope recorded with the approval, if approved.
    pub approval_scope: Option<String>,
    /// Identifier of the artifact holding the execution result, if executed.
    pub result_artifact_id: Option<ArtifactId>,
    /// Erasure cost reported by the handler, if executed.
    pub erasure_cost: ErasureCost,
    /// Creation summary reported by the handler, if executed.
    pub creation_summary: CreationSummary,
    /// Identity of the executor, if executed.
    pub executor: Option<String>,
    /// Rejection reason, if rejected.
    pub rejection_reason: Option<String>,
    /// Rejection stage, if rejected.
    pub rejection_stage: Option<String>,
    /// The artifact that replaced this one, if superseded.
    pub superseded_by: Option<ArtifactId>,
    /// Timestamp of the `artifact.created` event.
    pub created_at: OffsetDateTime,
    /// Timestamp of the most recent `artifact.validated` event, if any.
    pub validated_at: Option<OffsetDateTime>,
    /// Timestamp of the `artifact.approved` event, if any.
    pub approved_at: Option<OffsetDateTime>,
    /// Timestamp of the `artifact.executed` event, if any.
    pub executed_at: Option<OffsetDateTime>,
}

impl ArtifactSnapshot {
    fn from_created(
        artifact_id: ArtifactId,
        artifact_type: ArtifactType,
        content_id: ContentId,
        created_at: OffsetDateTime,
        actor: String,
        payload: &CreatedPayload,
    ) -> Self {
        Self {
            artifact_id,
            status: ArtifactStatus::Created,
            artifact_type,
            content_id,
            declared_risk_class: payload.risk_class,
            computed_risk_class: None,
            inputs: payload.inputs.clone(),
            producer: ProducerMetadata {
                actor,
                operation: payload.operation.clone(),
                timestamp: created_at,
                surface: payload.surface.clone(),
            },
            delegate_to: payload.delegate_to.clone(),
            validation_errors: Vec::new(),
            approval_artifact_id: None,
            force_ack: false,
            approval_scope: None,
            result_artifact_id: None,
            erasure_cost: ErasureCost::default(),
            creation_summary: CreationSummary::default(),
            executor: None,
            rejection_reason: None,
            rejection_stage: None,
            superseded_by: None,
            created_at,
            validated_at: None,
            approved_at: None,
            executed_at: None,
        }
    }

    fn apply_validated(&mut self, timestamp: OffsetDateTime, payload: &ValidatedPayload) {
        self.status = ArtifactStatus::Validated;
        self.validation_errors.clone_from(&payload.errors);
        self.computed_risk_class = Some(payload.computed_risk_class);
        self.validated_at = Some(timestamp);
        if !payload.errors.is_empty() {
            self.status = ArtifactStatus::Rejected;
            self.rejection_reason = Some(payload.errors.join("; "));
            self.rejection_stage = Some("validation".to_owned());
        }
    }

    fn apply_approved(&mut self, timestamp: OffsetDateTime, payload: &ApprovedPayload) {
        self.status = ArtifactStatus::Approved;
        self.approval_artifact_id = Some(payload.approval_artifact_id.clone());
        self.force_ack = payload.force_ack;
        self.approval_scope = Some(payload.scope.clone());
        self.approved_at = Some(timestamp);
    }

    fn apply_executed(&mut self, timestamp: OffsetDateTime, payload: &ExecutedPayload) {
        self.status = ArtifactStatus::Executed;
        self.result_artifact_id = Some(payload.result_artifact_id.clone());
        self.erasure_cost = payload.erasure_cost.clone();
        self.creation_summary = payload.creation_summary.clone();
        self.executor = Some(payload.executor.clone());
        self.executed_at = Some(timestamp);
    }

    fn apply_rejected(&mut self, payload: &RejectedPayload) {
        self.status = ArtifactStatus::Rejected;
        self.rejection_reason = Some(payload.reason.clone());
        self.rejection_stage = Some(payload.stage.clone());
    }

    fn apply_superseded(&mut self, payload: &SupersededPayload) {
        self.status = ArtifactStatus::Superseded;
        self.superseded_by = Some(payload.superseded_by.clone());
    }
}

// ============================================================================
// SECTION: fold_events
// ============================================================================

/// Folds an artifact's full event history into its current [`ArtifactSnapshot`].
///
/// # Errors
/// Returns [`SnapshotError::EmptyHistory`] if `events` is empty,
/// [`SnapshotError::FirstEventNotCreated`] if the first event is not
/// `artifact.created`, [`SnapshotError::ArtifactIdMismatch`] if the events do
/// not all share one artifact id, or [`SnapshotError::MalformedPayload`] if
/// an event's payload does not match its declared event type.
pub fn fold_events(events: &[Event]) -> Result<ArtifactSnapshot, SnapshotError> {
    let Some(first) = events.first() else {
        return Err(SnapshotError::EmptyHistory);
    };
    if first.event_type != EventType::ArtifactCreated {
        return Err(SnapshotError::FirstEventNotCreated(
            first.artifact_id.clone(),
            first.event_type,
        ));
    }
    let artifact_id = first.artifact_id.clone();
    let created_payload = typed_payload::<CreatedPayload>(first)?;
    let artifact_type = first.artifact_type.clone().unwrap_or(ArtifactType::Plan);
    let content_id = first.content_id.clone().unwrap_or_default();
    let mut snapshot = ArtifactSnapshot::from_created(
        artifact_id.clone(),
        artifact_type,
        content_id,
        first.timestamp,
        first.actor.clone(),
        &created_payload,
    );

    for event in &events[1..] {
        if event.artifact_id != artifact_id {
            return Err(SnapshotError::ArtifactIdMismatch {
                expected: artifact_id,
                found: event.artifact_id.clone(),
            });
        }
        match event.event_type {
            EventType::ArtifactCreated => {
                return Err(SnapshotError::FirstEventNotCreated(
                    event.artifact_id.clone(),
                    event.event_type,
                ));
            }
            EventType::ArtifactValidated => {
                let payload = typed_payload::<ValidatedPayload>(event)?;
                snapshot.apply_validated(event.timestamp, &payload);
            }
            EventType::ArtifactApproved => {
                let payload = typed_payload::<ApprovedPayload>(event)?;
                snapshot.apply_approved(event.timestamp, &payload);
            }
            EventType::ArtifactExecuted => {
                let payload = typed_payload::<ExecutedPayload>(event)?;
                snapshot.apply_executed(event.timestamp, &payload);
            }
            EventType::ArtifactRejected => {
                let payload = typed_payload::<RejectedPayload>(event)?;
                snapshot.apply_rejected(&payload);
            }
            EventType::ArtifactSuperseded => {
                let payload = typed_payload::<SupersededPayload>(event)?;
                snapshot.apply_superseded(&payload);
            }
            // Constraint and invariant events are audit trail entries attached
            // to the plan under validation; they do not change its status.
            EventType::ConstraintEvaluated | EventType::InvariantChecked | EventType::ExecutionLogged => {}
        }
    }

    Ok(snapshot)
}

fn typed_payload<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T, SnapshotError> {
    serde_json::from_value(event.payload.clone()).map_err(|err| {
        SnapshotError::MalformedPayload(event.event_type, event.artifact_id.clone(), err.to_string())
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use serde_json::json;
    use time::OffsetDateTime;

    use super::*;
    use crate::events::ArtifactType;

    #[test]
    fn artifact_status_wire_string_round_trips() {
        for status in
            [ArtifactStatus::Created, ArtifactStatus::Validated, ArtifactStatus::Approved, ArtifactStatus::Executed, ArtifactStatus::Rejected, ArtifactStatus::Superseded]
        {
            assert_eq!(ArtifactStatus::from_wire_str(status.as_wire_str()), Some(status));
        }
        assert_eq!(ArtifactStatus::from_wire_str("not_a_status"), None);
    }

    fn created_event(artifact_id: ArtifactId) -> Event {
        Event {
            event_type: EventType::ArtifactCreated,
            artifact_id,
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid ts"),
            actor: "agent:harness".to_owned(),
            payload: json!({
                "operation": "graph.load",
                "risk_class": "external_side_effect",
                "risk_reasons": [],
                "inputs": [],
                "payload_manifest": [],
            }),
            content_id: Some(ContentId::new("a".repeat(64))),
            artifact_type: Some(ArtifactType::Plan),
        }
    }

    #[test]
    fn empty_history_is_rejected() {
        let err = fold_events(&[]).unwrap_err();
        assert!(matches!(err, SnapshotError::EmptyHistory));
    }

    #[test]
    fn first_event_must_be_created() {
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 1).expect("valid");
        let mut event = created_event(artifact_id);
        event.event_type = EventType::ArtifactApproved;
        let err = fold_events(&[event]).unwrap_err();
        assert!(matches!(err, SnapshotError::FirstEventNotCreated(_, _)));
    }

    #[test]
    fn fold_is_deterministic_and_idempotent() {
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 2).expect("valid");
        let events = vec![created_event(artifact_id)];
        let a = fold_events(&events).expect("fold once");
        let b = fold_events(&events).expect("fold twice");
        assert_eq!(a.status, b.status);
        assert_eq!(a.content_id, b.content_id);
    }

    #[test]
    fn validation_errors_transition_to_rejected() {
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 3).expect("valid");
        let mut events = vec![created_event(artifact_id.clone())];
        events.push(Event {
            event_type: EventType::ArtifactValidated,
            artifact_id,
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_001).expect("valid ts"),
            actor: "harness".to_owned(),
            payload: json!({
                "validator": "harness",
                "errors": ["missing operation"],
                "computed_risk_class": "external_side_effect",
                "risk_reasons": [],
            }),
            content_id: None,
            artifact_type: None,
        });
        let snapshot = fold_events(&events).expect("fold");
        assert_eq!(snapshot.status, ArtifactStatus::Rejected);
        assert_eq!(snapshot.rejection_stage.as_deref(), Some("validation"));
    }
}
