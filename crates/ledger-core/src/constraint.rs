// crates/ledger-core/src/constraint.rs
// ============================================================================
// Module: Constraint Engine
// Description: Evaluates a declarative Ruleset against selected items.
// Purpose: Turn rule definitions into findings and, optionally, ledger
//          events attributing those findings to the artifact under review.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`ConstraintEngine::evaluate`] selects items by a rule's [`RuleScope`],
//! calls the named predicate from a fixed registry against each one, and
//! collects the resulting [`Finding`]s. [`ConstraintEngine::evaluate_and_emit`]
//! additionally folds those findings into `constraint.evaluated` and
//! `invariant.checked` events for a target artifact, exactly as validation
//! records them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::events::ConstraintEvaluatedPayload;
use crate::events::ConstraintEvidence;
use crate::events::ConstraintResult;
use crate::events::InvariantCheckedPayload;
use crate::events::InvariantStatus;
use crate::ruleset::Rule;
use crate::ruleset::RuleScope;
use crate::ruleset::Ruleset;
use crate::snapshot::ArtifactSnapshot;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while evaluating a ruleset.
#[derive(Debug, Error)]
pub enum ConstraintError {
    /// A rule named a predicate not present in the fixed registry.
    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),
}

// ============================================================================
// SECTION: Views the core owns
// ============================================================================

/// Minimal, vault-agnostic shape of a concept, supplied by a vault loader
/// that lives outside the core.
#[derive(Debug, Clone, Default)]
pub struct ConceptView {
    /// Stable concept identifier.
    pub id: String,
    /// Full text body.
    pub text: String,
    /// Heading strings found in the body, in document order.
    pub headings: Vec<String>,
    /// Ids of concepts this one links to.
    pub outlinks: Vec<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Free-form roles (`"index"`, `"hub"`, ...).
    pub roles: Vec<String>,
}

/// Dependency graph shape the core needs from a vault loader, reduced to
/// the one predicate the engine checks.
pub trait GraphView {
    /// Returns true if the graph contains a cycle.
    fn has_cycle(&self) -> bool;
}

/// Findings a selected item and its supporting context, passed to every
/// predicate.
pub enum Item<'a> {
    /// A `concept`-scoped item.
    Concept(&'a ConceptView),
    /// The `graph`-scoped singleton item.
    Graph(&'a dyn GraphView),
    /// An `artifact`-scoped item.
    Artifact(&'a ArtifactSnapshot),
    /// The `ruleset`-scoped singleton item (the ruleset checking itself).
    RulesetItem(&'a Ruleset),
    /// A `vault`-scoped context-only item.
    Null,
}

impl Item<'_> {
    fn item_type(&self) -> &'static str {
        match self {
            Self::Concept(_) => "concept",
            Self::Graph(_) => "graph",
            Self::Artifact(_) => "artifact",
            Self::RulesetItem(_) => "ruleset",
            Self::Null => "vault",
        }
    }

    fn item_id(&self) -> Option<String> {
        match self {
            Self::Concept(concept) => Some(concept.id.clone()),
            Self::Artifact(snapshot) => Some(snapshot.artifact_id.to_string()),
            Self::RulesetItem(ruleset) => Some(ruleset.id.clone()),
            Self::Graph(_) | Self::Null => None,
        }
    }
}

/// Context available to every predicate invocation beyond the item itself.
#[derive(Default)]
pub struct EvalContext<'a> {
    /// All known concepts keyed by id, for predicates that need to resolve
    /// link targets (e.g. checking the roles of an outlink's destination).
    pub concepts_by_id: BTreeMap<String, &'a ConceptView>,
}

// ============================================================================
// SECTION: Finding
// ============================================================================

/// One finding produced by a predicate evaluating one item against one rule.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Pass, fail, or warning.
    pub result: ConstraintResult,
    /// The rule id that produced this finding.
    pub rule_id: String,
    /// The invariant this finding contributes to, if the rule declares one.
    pub invariant: Option<String>,
    /// The item's identifier, if it has one.
    pub item_id: Option<String>,
    /// The kind of item evaluated.
    pub item_type: String,
    /// Human-readable explanation.
    pub message: String,
    /// Source line, if applicable.
    pub line: Option<u32>,
}

// ============================================================================
// SECTION: Predicate registry
// ============================================================================

type Predicate = fn(&Item<'_>, &Rule, &EvalContext<'_>) -> Vec<Finding>;

fn predicate_for(name: &str) -> Option<Predicate> {
    match name {
        "has_headings" => Some(predicate_has_headings),
        "no_outlinks_to_roles" => Some(predicate_no_outlinks_to_roles),
        "no_cycles" => Some(predicate_no_cycles),
        "no_prescriptive_tokens" => Some(predicate_no_prescriptive_tokens),
        "executed_has_required_approval" => Some(predicate_executed_has_required_approval),
        "approval_requires_force_ack" => Some(predicate_approval_requires_force_ack),
        "executed_has_result_artifact" => Some(predicate_executed_has_result_artifact),
        "producer_metadata_has_keys" => Some(predicate_producer_metadata_has_keys),
        "ruleset_messages_non_prescriptive" => Some(predicate_ruleset_messages_non_prescriptive),
        _ => None,
    }
}

fn finding(result: ConstraintResult, rule: &Rule, item: &Item<'_>, message: String, line: Option<u32>) -> Finding {
    Finding {
        result,
        rule_id: rule.id.clone(),
        invariant: rule.invariant.clone(),
        item_id: item.item_id(),
        item_type: item.item_type().to_owned(),
        message,
        line,
    }
}

fn pass(rule: &Rule, item: &Item<'_>) -> Vec<Finding> {
    vec![finding(ConstraintResult::Pass, rule, item, "ok".to_owned(), None)]
}

fn predicate_has_headings(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Concept(concept) = item else {
        return pass(rule, item);
    };
    if concept.headings.is_empty() {
        vec![finding(ConstraintResult::Fail, rule, item, rule.message.clone(), None)]
    } else {
        pass(rule, item)
    }
}

fn predicate_no_outlinks_to_roles(item: &Item<'_>, rule: &Rule, ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Concept(concept) = item else {
        return pass(rule, item);
    };
    let forbidden: BTreeSet<String> = rule
        .predicate
        .parameters
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| roles.iter().filter_map(|r| r.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let mut findings = Vec::new();
    for target_id in &concept.outlinks {
        let Some(target) = ctx.concepts_by_id.get(target_id) else {
            continue;
        };
        if target.roles.iter().any(|role| forbidden.contains(role)) {
            findings.push(finding(
                ConstraintResult::Fail,
                rule,
                item,
                format!("{} links to {target_id}, which carries a forbidden role", rule.message),
                None,
            ));
        }
    }
    if findings.is_empty() { pass(rule, item) } else { findings }
}

fn predicate_no_cycles(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Graph(graph) = item else {
        return pass(rule, item);
    };
    if graph.has_cycle() {
        vec![finding(ConstraintResult::Fail, rule, item, rule.message.clone(), None)]
    } else {
        pass(rule, item)
    }
}

const DEFAULT_PRESCRIPTIVE_TOKENS: &[&str] = &["must", "shall", "required to", "mandatory"];

fn prescriptive_tokens(rule: &Rule) -> Vec<String> {
    rule.predicate
        .parameters
        .get("tokens")
        .and_then(Value::as_array)
        .map(|tokens| tokens.iter().filter_map(|t| t.as_str().map(str::to_owned)).collect())
        .unwrap_or_else(|| DEFAULT_PRESCRIPTIVE_TOKENS.iter().map(|t| (*t).to_owned()).collect())
}

fn predicate_no_prescriptive_tokens(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Concept(concept) = item else {
        return pass(rule, item);
    };
    let lowered = concept.text.to_lowercase();
    let tokens = prescriptive_tokens(rule);
    let found: Vec<&str> = tokens.iter().map(String::as_str).filter(|token| lowered.contains(token)).collect();
    if found.is_empty() {
        pass(rule, item)
    } else {
        vec![finding(
            ConstraintResult::Warning,
            rule,
            item,
            format!("{} (found: {})", rule.message, found.join(", ")),
            None,
        )]
    }
}

fn predicate_executed_has_required_approval(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Artifact(snapshot) = item else {
        return pass(rule, item);
    };
    if !matches!(snapshot.status, crate::snapshot::ArtifactStatus::Executed) {
        return pass(rule, item);
    }
    let risk = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);
    if risk.requires_approval() && snapshot.approval_artifact_id.is_none() {
        vec![finding(ConstraintResult::Fail, rule, item, rule.message.clone(), None)]
    } else {
        pass(rule, item)
    }
}

fn predicate_approval_requires_force_ack(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Artifact(snapshot) = item else {
        return pass(rule, item);
    };
    if snapshot.approval_artifact_id.is_none() {
        return pass(rule, item);
    }
    let risk = snapshot.computed_risk_class.unwrap_or(snapshot.declared_risk_class);
    if risk.requires_force_ack() && !snapshot.force_ack {
        vec![finding(ConstraintResult::Fail, rule, item, rule.message.clone(), None)]
    } else {
        pass(rule, item)
    }
}

fn predicate_executed_has_result_artifact(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Artifact(snapshot) = item else {
        return pass(rule, item);
    };
    if matches!(snapshot.status, crate::snapshot::ArtifactStatus::Executed) && snapshot.result_artifact_id.is_none() {
        vec![finding(ConstraintResult::Fail, rule, item, rule.message.clone(), None)]
    } else {
        pass(rule, item)
    }
}

fn predicate_producer_metadata_has_keys(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::Artifact(snapshot) = item else {
        return pass(rule, item);
    };
    let required: Vec<String> = rule
        .predicate
        .parameters
        .get("keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(|k| k.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let mut missing = Vec::new();
    for key in &required {
        let present = match key.as_str() {
            "actor" => !snapshot.producer.actor.is_empty(),
            "operation" => !snapshot.producer.operation.is_empty(),
            "surface" => snapshot.producer.surface.is_some(),
            _ => true,
        };
        if !present {
            missing.push(key.clone());
        }
    }
    if missing.is_empty() {
        pass(rule, item)
    } else {
        vec![finding(
            ConstraintResult::Fail,
            rule,
            item,
            format!("{} (missing: {})", rule.message, missing.join(", ")),
            None,
        )]
    }
}

fn predicate_ruleset_messages_non_prescriptive(item: &Item<'_>, rule: &Rule, _ctx: &EvalContext<'_>) -> Vec<Finding> {
    let Item::RulesetItem(ruleset) = item else {
        return pass(rule, item);
    };
    let tokens = prescriptive_tokens(rule);
    let mut findings = Vec::new();
    for other in &ruleset.rules {
        let lowered = other.message.to_lowercase();
        if tokens.iter().any(|token| lowered.contains(token.as_str())) {
            findings.push(finding(
                ConstraintResult::Warning,
                rule,
                item,
                format!("rule '{}' message reads as prescriptive", other.id),
                None,
            ));
        }
    }
    if findings.is_empty() { pass(rule, item) } else { findings }
}

// ============================================================================
// SECTION: Selection
// ============================================================================

/// The concrete universe of items a selector can draw from, supplied by the
/// caller (typically the harness, which owns or is given the vault view).
#[derive(Default)]
pub struct SelectionUniverse<'a> {
    /// Every known concept.
    pub concepts: Vec<&'a ConceptView>,
    /// The dependency graph, if available.
    pub graph: Option<&'a dyn GraphView>,
    /// Every known artifact snapshot.
    pub artifacts: Vec<&'a ArtifactSnapshot>,
}

fn select<'a>(scope: RuleScope, rule: &Rule, universe: &SelectionUniverse<'a>, ruleset: &'a Ruleset) -> Vec<Item<'a>> {
    match scope {
        RuleScope::Concept => {
            let canonical_only =
                rule.selector.parameters.get("canonical_only").and_then(Value::as_bool).unwrap_or(false);
            let excluded_tags: BTreeSet<String> = rule
                .selector
                .parameters
                .get("excluded_tags")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(|t| t.as_str().map(str::to_owned)).collect())
                .unwrap_or_default();
            let excluded_roles: BTreeSet<String> = rule
                .selector
                .parameters
                .get("excluded_roles")
                .and_then(Value::as_array)
                .map(|roles| roles.iter().filter_map(|r| r.as_str().map(str::to_owned)).collect())
                .unwrap_or_default();
            universe
                .concepts
                .iter()
                .copied()
                .filter(|concept| !canonical_only || concept.tags.iter().any(|t| t == "canonical"))
                .filter(|concept| !concept.tags.iter().any(|t| excluded_tags.contains(t)))
                .filter(|concept| !concept.roles.iter().any(|r| excluded_roles.contains(r)))
                .map(Item::Concept)
                .collect()
        }
        RuleScope::Graph => universe.graph.map(Item::Graph).into_iter().collect(),
        RuleScope::Artifact => {
            universe.artifacts.iter().copied().map(Item::Artifact).collect()
        }
        RuleScope::Ruleset => vec![Item::RulesetItem(ruleset)],
        RuleScope::Vault => vec![Item::Null],
    }
}

// ============================================================================
// SECTION: ConstraintEngine
// ============================================================================

/// Evaluates a [`Ruleset`] against a [`SelectionUniverse`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstraintEngine;

impl ConstraintEngine {
    /// Evaluates every rule in `ruleset`, selecting items from `universe` and
    /// invoking each rule's named predicate against every selected item.
    ///
    /// # Errors
    /// Returns [`ConstraintError::UnknownPredicate`] if a rule names a
    /// predicate outside the fixed registry.
    pub fn evaluate(
        &self,
        ruleset: &Ruleset,
        universe: &SelectionUniverse<'_>,
        ctx: &EvalContext<'_>,
    ) -> Result<Vec<Finding>, ConstraintError> {
        let mut findings = Vec::new();
        for rule in &ruleset.rules {
            let predicate =
                predicate_for(&rule.predicate.name).ok_or_else(|| ConstraintError::UnknownPredicate(rule.predicate.name.clone()))?;
            for item in select(rule.scope, rule, universe, ruleset) {
                findings.extend(predicate(&item, rule, ctx));
            }
        }
        Ok(findings)
    }

    /// Folds a flat finding list into the `constraint.evaluated` and
    /// `invariant.checked` payloads the validation path appends, attributed
    /// to one target artifact.
    #[must_use]
    pub fn to_events(
        ruleset: &Ruleset,
        findings: &[Finding],
    ) -> (Vec<ConstraintEvaluatedPayload>, Vec<InvariantCheckedPayload>) {
        let mut constraint_events = Vec::new();
        for finding in findings {
            constraint_events.push(ConstraintEvaluatedPayload {
                ruleset_id: ruleset.id.clone(),
                rule_id: finding.rule_id.clone(),
                invariant: finding.invariant.clone(),
                result: finding.result,
                evidence: if finding.result == ConstraintResult::Pass {
                    None
                } else {
                    Some(ConstraintEvidence {
                        item_id: finding.item_id.clone(),
                        item_type: finding.item_type.clone(),
                        message: finding.message.clone(),
                        line: finding.line,
                    })
                },
            });
        }

        let mut invariant_events = Vec::new();
        for invariant in ruleset.referenced_invariants() {
            let rules_checked = ruleset.rules_for_invariant(&invariant).count();
            let violations: Vec<&Finding> = findings
                .iter()
                .filter(|f| f.invariant.as_deref() == Some(invariant.as_str()) && f.result == ConstraintResult::Fail)
                .collect();
            let mut affected_items: Vec<String> = Vec::new();
            for violation in &violations {
                if let Some(item_id) = &violation.item_id {
                    if !affected_items.contains(item_id) {
                        affected_items.push(item_id.clone());
                    }
                }
            }
            invariant_events.push(InvariantCheckedPayload {
                invariant_id: invariant,
                status: if violations.is_empty() { InvariantStatus::Pass } else { InvariantStatus::Fail },
                rules_checked: u32::try_from(rules_checked).unwrap_or(u32::MAX),
                violations: u32::try_from(violations.len()).unwrap_or(u32::MAX),
                affected_items,
            });
        }
        (constraint_events, invariant_events)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use std::collections::BTreeMap;

    use crate::identifiers::ArtifactId;
    use crate::risk::RiskClass;
    use crate::ruleset::Predicate as RulePredicate;
    use crate::ruleset::Selector;
    use crate::ruleset::Severity;
    use crate::snapshot::ArtifactStatus;
    use crate::snapshot::ProducerMetadata;

    use super::*;

    fn rule(id: &str, scope: RuleScope, predicate_name: &str) -> Rule {
        Rule {
            id: id.to_owned(),
            scope,
            severity: Severity::Error,
            invariant: Some("structure".to_owned()),
            selector: Selector { kind: "all".to_owned(), parameters: BTreeMap::new() },
            predicate: RulePredicate { name: predicate_name.to_owned(), parameters: BTreeMap::new() },
            message: "violation".to_owned(),
            rationale: None,
            boundary: None,
            repair_class: None,
            evidence: Vec::new(),
        }
    }

    fn sample_snapshot(status: ArtifactStatus) -> ArtifactSnapshot {
        ArtifactSnapshot {
            artifact_id: ArtifactId::from_raw(1_700_000_000_000, 1).expect("valid"),
            status,
            artifact_type: crate::events::ArtifactType::Plan,
            content_id: crate::identifiers::ContentId::new("a".repeat(64)),
            declared_risk_class: RiskClass::MutationDestructive,
            computed_risk_class: Some(RiskClass::MutationDestructive),
            inputs: Vec::new(),
            producer: ProducerMetadata {
                actor: "agent:harness".to_owned(),
                operation: "vault.purge".to_owned(),
                timestamp: time::OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid"),
                surface: Some("cli".to_owned()),
            },
            delegate_to: None,
            validation_errors: Vec::new(),
            approval_artifact_id: None,
            force_ack: false,
            approval_scope: None,
            result_artifact_id: None,
            erasure_cost: crate::events::ErasureCost::default(),
            creation_summary: crate::events::CreationSummary::default(),
            executor: None,
            rejection_reason: None,
            rejection_stage: None,
            superseded_by: None,
            created_at: time::OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid"),
            validated_at: None,
            approved_at: None,
            executed_at: None,
        }
    }

    #[test]
    fn has_headings_fails_on_empty_headings() {
        let concept = ConceptView { id: "c1".to_owned(), ..ConceptView::default() };
        let rule = rule("r1", RuleScope::Concept, "has_headings");
        let item = Item::Concept(&concept);
        let ctx = EvalContext::default();
        let findings = predicate_has_headings(&item, &rule, &ctx);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].result, ConstraintResult::Fail);
    }

    #[test]
    fn executed_without_approval_is_flagged_when_risk_requires_it() {
        let snapshot = sample_snapshot(ArtifactStatus::Executed);
        let rule = rule("r2", RuleScope::Artifact, "executed_has_required_approval");
        let item = Item::Artifact(&snapshot);
        let ctx = EvalContext::default();
        let findings = predicate_executed_has_required_approval(&item, &rule, &ctx);
        assert_eq!(findings[0].result, ConstraintResult::Fail);
    }

    #[test]
    fn unknown_predicate_surfaces_as_error() {
        let engine = ConstraintEngine;
        let ruleset =
            Ruleset { id: "r".to_owned(), version: "1".to_owned(), rules: vec![rule("r1", RuleScope::Concept, "nonexistent")] };
        let universe = SelectionUniverse::default();
        let ctx = EvalContext::default();
        let err = engine.evaluate(&ruleset, &universe, &ctx).unwrap_err();
        assert!(matches!(err, ConstraintError::UnknownPredicate(_)));
    }

    #[test]
    fn to_events_rolls_up_invariant_status_from_findings() {
        let ruleset =
            Ruleset { id: "r".to_owned(), version: "1".to_owned(), rules: vec![rule("r1", RuleScope::Concept, "has_headings")] };
        let findings = vec![Finding {
            result: ConstraintResult::Fail,
            rule_id: "r1".to_owned(),
            invariant: Some("structure".to_owned()),
            item_id: Some("c1".to_owned()),
            item_type: "concept".to_owned(),
            message: "no headings".to_owned(),
            line: None,
        }];
        let (constraint_events, invariant_events) = ConstraintEngine::to_events(&ruleset, &findings);
        assert_eq!(constraint_events.len(), 1);
        assert_eq!(invariant_events.len(), 1);
        assert_eq!(invariant_events[0].status, InvariantStatus::Fail);
        assert_eq!(invariant_events[0].affected_items, vec!["c1".to_owned()]);
    }
}
