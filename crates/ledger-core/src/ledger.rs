// crates/ledger-core/src/ledger.rs
// ============================================================================
// Module: Ledger
// Description: Append-only event log with lazily-built multi-index queries
//              and on-demand derived summaries.
// Purpose: Be the single source of truth for artifact history; every other
//          component's view of state is a read over this log.
// Dependencies: cap-std, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Events are appended to `artifact.jsonl` as newline-delimited JSON, one
//! line per event, and never rewritten. The first call to [`Ledger::query`]
//! triggers a full scan that builds three in-memory indexes (by artifact id,
//! by event type, by execution id); every append after that updates the
//! cached indexes incrementally rather than forcing a rescan. A reader
//! tolerates a final line left mid-write by a concurrent writer by silently
//! dropping it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use cap_std::fs::OpenOptions;
use thiserror::Error;
use time::OffsetDateTime;

use crate::events::ArtifactType;
use crate::events::ConstraintEvaluatedPayload;
use crate::events::ConstraintResult;
use crate::events::Event;
use crate::events::EventType;
use crate::events::ExecutionLoggedPayload;
use crate::events::ExecutionPhase;
use crate::events::ExecutionStatus;
use crate::events::InvariantCheckedPayload;
use crate::events::InvariantStatus;
use crate::identifiers::ArtifactId;
use crate::identifiers::ExecutionId;
use crate::snapshot::ArtifactSnapshot;
use crate::snapshot::ArtifactStatus;
use crate::snapshot::SnapshotError;
use crate::snapshot::fold_events;

const LEDGER_FILE_NAME: &str = "artifact.jsonl";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An I/O operation against the ledger file failed.
    #[error("ledger io error: {0}")]
    Io(String),
    /// A line in the ledger file could not be parsed as an event.
    #[error("malformed ledger line {line_number}: {source}")]
    MalformedLine {
        /// One-based line number of the offending line.
        line_number: usize,
        /// The underlying parse error.
        source: serde_json::Error,
    },
    /// An event could not be serialized for appending.
    #[error("failed to serialize event: {0}")]
    Serialize(serde_json::Error),
    /// An `execution_logs` query was made without an artifact or execution id.
    #[error("execution_logs queries require at least one of artifact_id or execution_id")]
    ExecutionLogsNeedsScope,
    /// Folding an artifact's events into a snapshot failed.
    #[error("failed to project snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

// ============================================================================
// SECTION: Query parameters and ordering
// ============================================================================

/// Sort order for [`Ledger::query`] results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    /// Chronological append order (the default).
    Ascending,
    /// Reverse chronological order.
    Descending,
}

/// Parameters accepted by the ledger's sole query primitive.
///
/// All fields default to "unconstrained"; an empty `Query::default()`
/// returns every event in append order.
#[derive(Default)]
pub struct Query<'a> {
    /// Restrict to events for this artifact.
    pub artifact_id: Option<ArtifactId>,
    /// Restrict to events sharing this execution id.
    pub execution_id: Option<ExecutionId>,
    /// Restrict to events of this type.
    pub event_type: Option<EventType>,
    /// Restrict to events at or after this timestamp.
    pub since: Option<OffsetDateTime>,
    /// Restrict to events at or before this timestamp.
    pub until: Option<OffsetDateTime>,
    /// Restrict to events recorded by this actor.
    pub actor: Option<&'a str>,
    /// Arbitrary additional predicate evaluated after the other filters.
    pub predicate: Option<&'a dyn Fn(&Event) -> bool>,
    /// Cap the number of results returned.
    pub limit: Option<usize>,
    /// Sort order of the returned events.
    pub order: QueryOrder,
    /// Skip events up to and including this cursor position (the ordinal
    /// position of an event within the full append-ordered sequence).
    pub after_event_id: Option<usize>,
}

impl Query<'_> {
    /// An unconstrained query returning every event in append order.
    #[must_use]
    pub fn all() -> Self {
        Self { order: QueryOrder::Ascending, ..Self::default() }
    }
}

impl Default for QueryOrder {
    fn default() -> Self {
        Self::Ascending
    }
}

/// One event together with its ordinal position in the append-ordered
/// sequence, usable as a cursor in a subsequent query's `after_event_id`.
#[derive(Debug, Clone)]
pub struct PositionedEvent {
    /// Ordinal position within the full append-ordered ledger.
    pub position: usize,
    /// The event itself.
    pub event: Event,
}

// ============================================================================
// SECTION: Cache / indexes
// ============================================================================

#[derive(Default)]
struct LedgerCache {
    loaded: bool,
    events: Vec<Event>,
    by_artifact: BTreeMap<ArtifactId, Vec<usize>>,
    by_event_type: BTreeMap<EventType, Vec<usize>>,
    by_execution: BTreeMap<ExecutionId, Vec<usize>>,
}

impl LedgerCache {
    fn index_event(&mut self, event: Event) {
        let position = self.events.len();
        self.by_artifact.entry(event.artifact_id.clone()).or_default().push(position);
        self.by_event_type.entry(event.event_type).or_default().push(position);
        if event.event_type == EventType::ExecutionLogged {
            if let Ok(payload) = serde_json::from_value::<ExecutionLoggedPayload>(event.payload.clone()) {
                self.by_execution.entry(payload.execution_id).or_default().push(position);
            }
        }
        self.events.push(event);
    }
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Append-only event log with lazy multi-index queries.
///
/// # Invariants
/// - No byte in a previously written line is ever rewritten.
/// - `append_many` makes a whole batch visible to a fresh reader, or none of
///   it, as a single file operation.
pub struct Ledger {
    dir: Dir,
    cache: RefCell<LedgerCache>,
}

impl Ledger {
    /// Opens (creating if necessary) a ledger rooted at `path`, the `.irrev`
    /// directory. Does not read the ledger file; indexes are built lazily on
    /// first [`Ledger::query`].
    ///
    /// # Errors
    /// Returns [`LedgerError::Io`] if the directory cannot be created or
    /// opened.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(path).map_err(|err| LedgerError::Io(err.to_string()))?;
        let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| LedgerError::Io(err.to_string()))?;
        Ok(Self { dir, cache: RefCell::new(LedgerCache::default()) })
    }

    /// Appends a single event.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on serialization or I/O failure.
    pub fn append(&self, event: Event) -> Result<(), LedgerError> {
        self.append_many(vec![event])
    }

    /// Appends a batch of events as one file write, so the whole batch
    /// becomes visible to a fresh reader or none of it does.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on serialization or I/O failure.
    pub fn append_many(&self, events: Vec<Event>) -> Result<(), LedgerError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buffer = String::new();
        for event in &events {
            let line = event.to_line().map_err(LedgerError::Serialize)?;
            buffer.push_str(&line);
            buffer.push('\n');
        }
        self.write_append(buffer.as_bytes())?;

        let mut cache = self.cache.borrow_mut();
        if cache.loaded {
            for event in events {
                cache.index_event(event);
            }
        }
        Ok(())
    }

    fn write_append(&self, bytes: &[u8]) -> Result<(), LedgerError> {
        use std::io::Write;
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        let mut file = self.dir.open_with(LEDGER_FILE_NAME, &options).map_err(|err| LedgerError::Io(err.to_string()))?;
        file.write_all(bytes).map_err(|err| LedgerError::Io(err.to_string()))
    }

    fn ensure_loaded(&self) -> Result<(), LedgerError> {
        if self.cache.borrow().loaded {
            return Ok(());
        }
        let contents = self.read_ledger_file()?;
        let mut cache = LedgerCache::default();
        let ends_with_newline = contents.ends_with('\n');
        let mut lines: Vec<&str> = contents.split('\n').collect();
        // A file with a trailing newline splits to one empty trailing
        // element; drop it. Without one, the last element is a line left
        // mid-write by a concurrent writer; tolerate it by dropping it too.
        if ends_with_newline {
            lines.pop();
        } else if lines.last().is_some_and(|l| !l.is_empty()) {
            lines.pop();
        }
        for (idx, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let event = Event::from_line(line)
                .map_err(|source| LedgerError::MalformedLine { line_number: idx + 1, source })?;
            cache.index_event(event);
        }
        cache.loaded = true;
        *self.cache.borrow_mut() = cache;
        Ok(())
    }

    fn read_ledger_file(&self) -> Result<String, LedgerError> {
        match self.dir.open(LEDGER_FILE_NAME) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents).map_err(|err| LedgerError::Io(err.to_string()))?;
                Ok(contents)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(LedgerError::Io(err.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Query primitive
    // ------------------------------------------------------------------

    /// The sole query primitive: intersects index candidates, applies
    /// range/actor/predicate filters, honors the cursor and limit, and
    /// returns results in the requested order.
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the ledger has not yet been scanned and
    /// the scan fails.
    pub fn query(&self, params: &Query<'_>) -> Result<Vec<Event>, LedgerError> {
        Ok(self.query_positioned(params)?.into_iter().map(|p| p.event).collect())
    }

    /// Like [`Ledger::query`] but also returns each event's ordinal
    /// position, suitable for use as a cursor in a later query.
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the ledger has not yet been scanned and
    /// the scan fails.
    pub fn query_positioned(&self, params: &Query<'_>) -> Result<Vec<PositionedEvent>, LedgerError> {
        self.ensure_loaded()?;
        let cache = self.cache.borrow();

        let mut candidates: Vec<usize> = match (&params.artifact_id, &params.execution_id, &params.event_type) {
            (Some(artifact_id), _, _) => cache.by_artifact.get(artifact_id).cloned().unwrap_or_default(),
            (None, Some(execution_id), _) => cache.by_execution.get(execution_id).cloned().unwrap_or_default(),
            (None, None, Some(event_type)) => cache.by_event_type.get(event_type).cloned().unwrap_or_default(),
            (None, None, None) => (0 .. cache.events.len()).collect(),
        };

        if params.artifact_id.is_some() {
            if let Some(execution_id) = &params.execution_id {
                let allowed = cache.by_execution.get(execution_id).cloned().unwrap_or_default();
                candidates.retain(|pos| allowed.contains(pos));
            }
            if let Some(event_type) = &params.event_type {
                let allowed = cache.by_event_type.get(event_type).cloned().unwrap_or_default();
                candidates.retain(|pos| allowed.contains(pos));
            }
        } else if params.execution_id.is_some() {
            if let Some(event_type) = &params.event_type {
                let allowed = cache.by_event_type.get(event_type).cloned().unwrap_or_default();
                candidates.retain(|pos| allowed.contains(pos));
            }
        }

        candidates.sort_unstable();

        if let Some(cursor) = params.after_event_id {
            candidates.retain(|pos| *pos > cursor);
        }

        let mut out = Vec::new();
        for pos in candidates {
            let event = &cache.events[pos];
            if let Some(since) = params.since {
                if event.timestamp < since {
                    continue;
                }
            }
            if let Some(until) = params.until {
                if event.timestamp > until {
                    continue;
                }
            }
            if let Some(actor) = params.actor {
                if event.actor != actor {
                    continue;
                }
            }
            if let Some(predicate) = params.predicate {
                if !predicate(event) {
                    continue;
                }
            }
            out.push(PositionedEvent { position: pos, event: event.clone() });
            if let Some(limit) = params.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }

        if params.order == QueryOrder::Descending {
            out.reverse();
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Convenience methods
    // ------------------------------------------------------------------

    /// All events recorded for `artifact_id`, in append order.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn events_for(&self, artifact_id: &ArtifactId) -> Result<Vec<Event>, LedgerError> {
        self.query(&Query { artifact_id: Some(artifact_id.clone()), ..Query::all() })
    }

    /// Returns the current snapshot for `artifact_id`.
    ///
    /// # Errors
    /// Returns [`LedgerError`] if the artifact has no events or folding
    /// fails.
    pub fn snapshot(&self, artifact_id: &ArtifactId) -> Result<ArtifactSnapshot, LedgerError> {
        let events = self.events_for(artifact_id)?;
        Ok(fold_events(&events)?)
    }

    /// Every distinct artifact id that has a `artifact.created` event.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn known_artifact_ids(&self) -> Result<Vec<ArtifactId>, LedgerError> {
        let created = self.query(&Query { event_type: Some(EventType::ArtifactCreated), ..Query::all() })?;
        Ok(created.into_iter().map(|event| event.artifact_id).collect())
    }

    /// All artifacts whose current status matches `status`.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan or fold failure.
    pub fn list_by_status(&self, status: ArtifactStatus) -> Result<Vec<ArtifactSnapshot>, LedgerError> {
        let mut out = Vec::new();
        for artifact_id in self.known_artifact_ids()? {
            let snapshot = self.snapshot(&artifact_id)?;
            if snapshot.status == status {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    /// All artifacts whose created event declares `artifact_type`.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn list_by_type(&self, artifact_type: &ArtifactType) -> Result<Vec<ArtifactId>, LedgerError> {
        let created = self.query(&Query { event_type: Some(EventType::ArtifactCreated), ..Query::all() })?;
        Ok(created
            .into_iter()
            .filter(|event| event.artifact_type.as_ref() == Some(artifact_type))
            .map(|event| event.artifact_id)
            .collect())
    }

    /// Artifacts currently awaiting an approval decision: validated, with no
    /// validation errors, not yet approved, rejected, or superseded.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan or fold failure.
    pub fn pending_approvals(&self) -> Result<Vec<ArtifactSnapshot>, LedgerError> {
        Ok(self
            .list_by_status(ArtifactStatus::Validated)?
            .into_iter()
            .filter(|snapshot| snapshot.validation_errors.is_empty())
            .collect())
    }

    /// Filtered, typed `constraint.evaluated` events.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn constraint_evaluations(
        &self,
        artifact_id: Option<&ArtifactId>,
        ruleset_id: Option<&str>,
        invariant: Option<&str>,
        result: Option<ConstraintResult>,
    ) -> Result<Vec<(Event, ConstraintEvaluatedPayload)>, LedgerError> {
        let events = self.query(&Query {
            artifact_id: artifact_id.cloned(),
            event_type: Some(EventType::ConstraintEvaluated),
            ..Query::all()
        })?;
        let mut out = Vec::new();
        for event in events {
            let Ok(payload) = serde_json::from_value::<ConstraintEvaluatedPayload>(event.payload.clone()) else {
                continue;
            };
            if ruleset_id.is_some_and(|id| id != payload.ruleset_id) {
                continue;
            }
            if let Some(invariant) = invariant {
                if payload.invariant.as_deref() != Some(invariant) {
                    continue;
                }
            }
            if let Some(result) = result {
                if payload.result != result {
                    continue;
                }
            }
            out.push((event, payload));
        }
        Ok(out)
    }

    /// Filtered, typed `invariant.checked` events.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn invariant_checks(
        &self,
        artifact_id: Option<&ArtifactId>,
        invariant: Option<&str>,
        status: Option<InvariantStatus>,
    ) -> Result<Vec<(Event, InvariantCheckedPayload)>, LedgerError> {
        let events = self.query(&Query {
            artifact_id: artifact_id.cloned(),
            event_type: Some(EventType::InvariantChecked),
            ..Query::all()
        })?;
        let mut out = Vec::new();
        for event in events {
            let Ok(payload) = serde_json::from_value::<InvariantCheckedPayload>(event.payload.clone()) else {
                continue;
            };
            if invariant.is_some_and(|id| id != payload.invariant_id) {
                continue;
            }
            if let Some(status) = status {
                if payload.status != status {
                    continue;
                }
            }
            out.push((event, payload));
        }
        Ok(out)
    }

    /// Filtered, typed `execution.logged` events. Requires at least one of
    /// `artifact_id` or `execution_id` to scope the query.
    ///
    /// # Errors
    /// Returns [`LedgerError::ExecutionLogsNeedsScope`] if neither id is
    /// given, or [`LedgerError`] on scan failure.
    pub fn execution_logs(
        &self,
        artifact_id: Option<&ArtifactId>,
        execution_id: Option<&ExecutionId>,
        phase: Option<ExecutionPhase>,
        status: Option<ExecutionStatus>,
        handler: Option<&str>,
    ) -> Result<Vec<(Event, ExecutionLoggedPayload)>, LedgerError> {
        if artifact_id.is_none() && execution_id.is_none() {
            return Err(LedgerError::ExecutionLogsNeedsScope);
        }
        let events = self.query(&Query {
            artifact_id: artifact_id.cloned(),
            execution_id: execution_id.cloned(),
            event_type: Some(EventType::ExecutionLogged),
            ..Query::all()
        })?;
        let mut out = Vec::new();
        for event in events {
            let Ok(payload) = serde_json::from_value::<ExecutionLoggedPayload>(event.payload.clone()) else {
                continue;
            };
            if let Some(phase) = phase {
                if payload.phase != phase {
                    continue;
                }
            }
            if let Some(status) = status {
                if payload.status != status {
                    continue;
                }
            }
            if handler.is_some_and(|h| h != payload.handler_id) {
                continue;
            }
            out.push((event, payload));
        }
        Ok(out)
    }

    /// The full phase timeline for one execution, in append order.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn execution_timeline(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<(Event, ExecutionLoggedPayload)>, LedgerError> {
        self.execution_logs(None, Some(execution_id), None, None, None)
    }

    /// Every event recorded for `artifact_id`, including constraint and
    /// invariant evaluations attached during its validation.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn audit_trail(&self, artifact_id: &ArtifactId) -> Result<Vec<Event>, LedgerError> {
        self.events_for(artifact_id)
    }

    // ------------------------------------------------------------------
    // Derived summaries
    // ------------------------------------------------------------------

    /// The chronologically last `execution.logged` event's execution id for
    /// `artifact_id`, if any.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn latest_execution_id(&self, artifact_id: &ArtifactId) -> Result<Option<ExecutionId>, LedgerError> {
        let events = self.query(&Query {
            artifact_id: Some(artifact_id.clone()),
            event_type: Some(EventType::ExecutionLogged),
            ..Query::all()
        })?;
        Ok(events
            .last()
            .and_then(|event| serde_json::from_value::<ExecutionLoggedPayload>(event.payload.clone()).ok())
            .map(|payload| payload.execution_id))
    }

    /// Computes an on-demand execution summary for `execution_id`, or
    /// `None` if no phase events exist for it.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn execution_summary(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionSummary>, LedgerError> {
        let timeline = self.execution_timeline(execution_id)?;
        if timeline.is_empty() {
            return Ok(None);
        }
        Ok(Some(ExecutionSummary::from_timeline(&timeline)))
    }

    /// Computes an on-demand constraint summary for `artifact_id`.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn constraint_summary(&self, artifact_id: &ArtifactId) -> Result<ConstraintSummary, LedgerError> {
        let constraints = self.constraint_evaluations(Some(artifact_id), None, None, None)?;
        let invariants = self.invariant_checks(Some(artifact_id), None, None)?;
        Ok(ConstraintSummary::from_events(&constraints, &invariants))
    }

    /// Computes an on-demand invariant summary for `artifact_id`.
    ///
    /// # Errors
    /// Returns [`LedgerError`] on scan failure.
    pub fn invariant_summary(&self, artifact_id: &ArtifactId) -> Result<InvariantSummary, LedgerError> {
        let invariants = self.invariant_checks(Some(artifact_id), None, None)?;
        Ok(InvariantSummary::from_events(&invariants))
    }
}

// ============================================================================
// SECTION: ExecutionSummary
// ============================================================================

/// Overall status of one harness execution, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallExecutionStatus {
    /// Every phase that started reached `completed`.
    Success,
    /// At least one phase reached `failed`.
    Failure,
    /// At least one phase started but never reached a terminal status, and
    /// none failed.
    Partial,
}

impl OverallExecutionStatus {
    /// Returns the wire string for this status.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }
}

/// Derived, never-stored summary of one execution's phase timeline.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// Overall status across the whole execution.
    pub overall_status: OverallExecutionStatus,
    /// Duration in milliseconds of each completed phase.
    pub phase_durations: BTreeMap<ExecutionPhase, u64>,
    /// One plus the maximum `attempt` number observed.
    pub attempt_count: u32,
    /// The first failure's error message, if any phase failed.
    pub first_error: Option<String>,
    /// The phase of the first failure, if any phase failed.
    pub failure_phase: Option<ExecutionPhase>,
    /// Resource counters merged across every phase: numeric keys are summed,
    /// non-numeric keys keep their first-written value.
    pub resources: BTreeMap<String, u64>,
    /// Earliest timestamp among the execution's phase events.
    pub started_at: OffsetDateTime,
    /// Latest timestamp among the execution's phase events.
    pub ended_at: OffsetDateTime,
}

impl ExecutionSummary {
    fn from_timeline(timeline: &[(Event, ExecutionLoggedPayload)]) -> Self {
        let mut phase_durations = BTreeMap::new();
        let mut resources = BTreeMap::new();
        let mut max_attempt = 0u32;
        let mut first_error = None;
        let mut failure_phase = None;
        let mut any_failed = false;
        let mut any_open = false;
        let mut started_at = timeline[0].0.timestamp;
        let mut ended_at = timeline[0].0.timestamp;

        for (event, payload) in timeline {
            started_at = started_at.min(event.timestamp);
            ended_at = ended_at.max(event.timestamp);
            max_attempt = max_attempt.max(payload.attempt);

            match payload.status {
                ExecutionStatus::Completed => {
                    if let Some(duration) = payload.duration_ms {
                        phase_durations.insert(payload.phase, duration);
                    }
                    if let Some(observed) = &payload.resources {
                        for (key, value) in observed {
                            resources
                                .entry(key.clone())
                                .and_modify(|existing: &mut u64| *existing += value)
                                .or_insert(*value);
                        }
                    }
                }
                ExecutionStatus::Failed => {
                    any_failed = true;
                    if first_error.is_none() {
                        first_error = payload.error.clone();
                        failure_phase = Some(payload.phase);
                    }
                }
                ExecutionStatus::Started => any_open = true,
                ExecutionStatus::Skipped => {}
            }
        }

        // A phase with a 'started' but no terminal event leaves it open.
        for phase in [ExecutionPhase::Prepare, ExecutionPhase::Execute, ExecutionPhase::Commit] {
            let started = timeline.iter().any(|(_, p)| p.phase == phase && p.status == ExecutionStatus::Started);
            let terminal = timeline.iter().any(|(_, p)| {
                p.phase == phase && matches!(p.status, ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Skipped)
            });
            if started && !terminal {
                any_open = true;
            }
        }

        let overall_status = if any_failed {
            OverallExecutionStatus::Failure
        } else if any_open {
            OverallExecutionStatus::Partial
        } else {
            OverallExecutionStatus::Success
        };

        Self {
            overall_status,
            phase_durations,
            attempt_count: max_attempt + 1,
            first_error,
            failure_phase,
            resources,
            started_at,
            ended_at,
        }
    }
}

// ============================================================================
// SECTION: ConstraintSummary / InvariantSummary
// ============================================================================

/// Whether constraint-engine audit data exists for an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintDataStatus {
    /// Both `constraint.evaluated` and `invariant.checked` events exist.
    Present,
    /// Only one of the two event kinds exists.
    Partial,
    /// Neither event kind exists.
    Missing,
}

impl ConstraintDataStatus {
    /// Returns the wire string for this status.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Partial => "partial",
            Self::Missing => "missing",
        }
    }
}

/// Derived, never-stored rollup of an artifact's constraint evaluation.
#[derive(Debug, Clone)]
pub struct ConstraintSummary {
    /// Whether both constraint and invariant audit events are present.
    pub constraint_data_status: ConstraintDataStatus,
    /// Count of passing rule evaluations.
    pub pass_count: u32,
    /// Count of failing rule evaluations.
    pub fail_count: u32,
    /// Count of warning rule evaluations.
    pub warning_count: u32,
    /// Distinct rulesets evaluated.
    pub rulesets: Vec<String>,
    /// Distinct invariants with at least one failing finding.
    pub violated_invariants: Vec<String>,
}

impl ConstraintSummary {
    fn from_events(
        constraints: &[(Event, ConstraintEvaluatedPayload)],
        invariants: &[(Event, InvariantCheckedPayload)],
    ) -> Self {
        let mut pass_count = 0u32;
        let mut fail_count = 0u32;
        let mut warning_count = 0u32;
        let mut rulesets: Vec<String> = Vec::new();
        for (_, payload) in constraints {
            match payload.result {
                ConstraintResult::Pass => pass_count += 1,
                ConstraintResult::Fail => fail_count += 1,
                ConstraintResult::Warning => warning_count += 1,
            }
            if !rulesets.contains(&payload.ruleset_id) {
                rulesets.push(payload.ruleset_id.clone());
            }
        }
        let violated_invariants: Vec<String> = invariants
            .iter()
            .filter(|(_, payload)| payload.status == InvariantStatus::Fail)
            .map(|(_, payload)| payload.invariant_id.clone())
            .collect();

        let constraint_data_status = match (constraints.is_empty(), invariants.is_empty()) {
            (false, false) => ConstraintDataStatus::Present,
            (true, true) => ConstraintDataStatus::Missing,
            _ => ConstraintDataStatus::Partial,
        };

        Self { constraint_data_status, pass_count, fail_count, warning_count, rulesets, violated_invariants }
    }
}

/// Derived, never-stored rollup of an artifact's invariant checks.
#[derive(Debug, Clone)]
pub struct InvariantSummary {
    /// Affected item ids, keyed by invariant id, for failing invariants.
    pub affected_by_invariant: BTreeMap<String, Vec<String>>,
    /// Overall status: fail iff any invariant failed.
    pub overall_status: InvariantStatus,
}

impl InvariantSummary {
    fn from_events(invariants: &[(Event, InvariantCheckedPayload)]) -> Self {
        let mut affected_by_invariant = BTreeMap::new();
        let mut any_fail = false;
        for (_, payload) in invariants {
            if payload.status == InvariantStatus::Fail {
                any_fail = true;
                affected_by_invariant.insert(payload.invariant_id.clone(), payload.affected_items.clone());
            }
        }
        Self {
            affected_by_invariant,
            overall_status: if any_fail { InvariantStatus::Fail } else { InvariantStatus::Pass },
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use serde_json::json;
    use tempfile::tempdir;
    use time::OffsetDateTime;

    use super::*;
    use crate::identifiers::ContentId;
    use crate::risk::RiskClass;

    fn created_event(artifact_id: ArtifactId, ts: i64) -> Event {
        Event {
            event_type: EventType::ArtifactCreated,
            artifact_id,
            timestamp: OffsetDateTime::from_unix_timestamp(ts).expect("valid ts"),
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
    fn append_then_query_round_trips() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 1).expect("valid");
        ledger.append(created_event(artifact_id.clone(), 1_700_000_000)).expect("append");
        let events = ledger.events_for(&artifact_id).expect("query");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].artifact_id, artifact_id);
    }

    #[test]
    fn append_is_visible_after_index_already_built() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let first = ArtifactId::from_raw(1_700_000_000_000, 1).expect("valid");
        let second = ArtifactId::from_raw(1_700_000_000_001, 2).expect("valid");
        ledger.append(created_event(first, 1_700_000_000)).expect("append");
        // Force index build.
        let _ = ledger.query(&Query::all()).expect("query");
        ledger.append(created_event(second.clone(), 1_700_000_001)).expect("append after index built");
        let events = ledger.events_for(&second).expect("query second");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn descending_order_and_limit_s5_scenario() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 9).expect("valid");
        let execution_id = ExecutionId::from("01EXEC000000000000000000X");
        for i in 0 .. 6u32 {
            let phase = match i % 3 {
                0 => ExecutionPhase::Prepare,
                1 => ExecutionPhase::Execute,
                _ => ExecutionPhase::Commit,
            };
            let status = if i < 3 { ExecutionStatus::Started } else { ExecutionStatus::Completed };
            let event = Event {
                event_type: EventType::ExecutionLogged,
                artifact_id: artifact_id.clone(),
                timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_100 + i64::from(i)).expect("valid ts"),
                actor: "harness".to_owned(),
                payload: serde_json::to_value(ExecutionLoggedPayload {
                    execution_id: execution_id.clone(),
                    attempt: 0,
                    phase,
                    status,
                    handler_id: "graph_loader".to_owned(),
                    started_at: None,
                    ended_at: None,
                    duration_ms: None,
                    resources: None,
                    error_type: None,
                    error: None,
                    reason: None,
                })
                .expect("serialize"),
                content_id: None,
                artifact_type: None,
            };
            ledger.append(event).expect("append phase event");
        }
        let events = ledger
            .query(&Query {
                execution_id: Some(execution_id),
                event_type: Some(EventType::ExecutionLogged),
                order: QueryOrder::Descending,
                limit: Some(3),
                ..Query::all()
            })
            .expect("query");
        assert_eq!(events.len(), 3);
        assert!(events[0].timestamp > events[2].timestamp);
    }

    #[test]
    fn execution_logs_without_scope_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let err = ledger.execution_logs(None, None, None, None, None).unwrap_err();
        assert!(matches!(err, LedgerError::ExecutionLogsNeedsScope));
    }

    #[test]
    fn malformed_line_surfaces_as_read_error() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(LEDGER_FILE_NAME), b"not json\n").expect("write garbage");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let err = ledger.query(&Query::all()).unwrap_err();
        assert!(matches!(err, LedgerError::MalformedLine { .. }));
    }

    #[test]
    fn trailing_partial_line_is_tolerated() {
        let dir = tempdir().expect("tempdir");
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 4).expect("valid");
        let line = created_event(artifact_id, 1_700_000_000).to_line().expect("serialize");
        let contents = format!("{line}\n{{\"partial\": tr");
        std::fs::write(dir.path().join(LEDGER_FILE_NAME), contents).expect("write");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let events = ledger.query(&Query::all()).expect("query tolerates partial tail");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn snapshot_reflects_declared_risk_class_from_created_event() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::open(dir.path()).expect("open ledger");
        let artifact_id = ArtifactId::from_raw(1_700_000_000_000, 5).expect("valid");
        ledger.append(created_event(artifact_id.clone(), 1_700_000_000)).expect("append");
        let snapshot = ledger.snapshot(&artifact_id).expect("snapshot");
        assert_eq!(snapshot.declared_risk_class, RiskClass::ExternalSideEffect);
    }
}
