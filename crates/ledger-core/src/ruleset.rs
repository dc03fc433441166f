// crates/ledger-core/src/ruleset.rs
// ============================================================================
// Module: Ruleset
// Description: Declarative constraint data model.
// Purpose: Describe what to check and how severely, without any evaluation
//          logic — the constraint engine interprets these values.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Ruleset`] is pure data: a versioned, identified list of [`Rule`]
//! values. Each rule names a scope to select items from, a selector with
//! parameters narrowing that selection, and a predicate with parameters
//! naming the check to run. Evaluation lives in [`crate::constraint`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Scope
// ============================================================================

/// What kind of item a rule's selector draws candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// A vault concept (note-like unit).
    Concept,
    /// The dependency graph, a singleton item.
    Graph,
    /// An artifact snapshot.
    Artifact,
    /// The ruleset itself, for meta-rules.
    Ruleset,
    /// Context-only, no concrete item (a single null item).
    Vault,
}

/// Severity a rule declares for its findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A blocking finding.
    Error,
    /// A non-blocking finding.
    Warning,
}

// ============================================================================
// SECTION: Selector / Predicate
// ============================================================================

/// Narrows a rule's scope-wide candidate set to the items it actually checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    /// Selector kind, interpreted by the constraint engine (e.g.
    /// `"all"`, `"canonical_only"`, `"by_status"`).
    pub kind: String,
    /// Free-form parameters for the named selector kind.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// Names the predicate function a rule invokes against each selected item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// Predicate name, looked up in the constraint engine's fixed registry.
    pub name: String,
    /// Free-form parameters passed to the predicate.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

// ============================================================================
// SECTION: Rule
// ============================================================================

/// One declarative constraint rule.
///
/// `boundary`, `repair_class`, and `evidence` are supplemental fields
/// round-tripped for authoring tools; the constraint engine never reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable rule identifier, unique within its ruleset.
    pub id: String,
    /// Kind of item this rule selects.
    pub scope: RuleScope,
    /// Blocking severity of this rule's findings.
    pub severity: Severity,
    /// Invariant this rule contributes evidence toward, if any.
    #[serde(default)]
    pub invariant: Option<String>,
    /// Narrows the scope's candidate set.
    pub selector: Selector,
    /// Names the check run against each selected item.
    pub predicate: Predicate,
    /// Human-readable summary shown in findings.
    pub message: String,
    /// Why this rule exists, for documentation.
    #[serde(default)]
    pub rationale: Option<String>,
    /// Free-form authoring metadata, unread by evaluation.
    #[serde(default)]
    pub boundary: Option<String>,
    /// Free-form authoring metadata, unread by evaluation.
    #[serde(default)]
    pub repair_class: Option<String>,
    /// Supporting citations, unread by evaluation.
    #[serde(default)]
    pub evidence: Vec<String>,
}

// ============================================================================
// SECTION: Ruleset
// ============================================================================

/// A versioned, identified collection of rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    /// Stable ruleset identifier.
    pub id: String,
    /// Ruleset version string, opaque to the engine.
    pub version: String,
    /// The rules making up this ruleset.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Returns every distinct invariant referenced by at least one rule.
    #[must_use]
    pub fn referenced_invariants(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            if let Some(invariant) = &rule.invariant {
                if !out.contains(invariant) {
                    out.push(invariant.clone());
                }
            }
        }
        out
    }

    /// Returns every rule referencing `invariant`.
    pub fn rules_for_invariant<'a>(&'a self, invariant: &str) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(move |rule| rule.invariant.as_deref() == Some(invariant))
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

    fn sample_rule(id: &str, invariant: Option<&str>) -> Rule {
        Rule {
            id: id.to_owned(),
            scope: RuleScope::Concept,
            severity: Severity::Error,
            invariant: invariant.map(str::to_owned),
            selector: Selector { kind: "all".to_owned(), parameters: BTreeMap::new() },
            predicate: Predicate { name: "has_headings".to_owned(), parameters: BTreeMap::new() },
            message: "concept must have headings".to_owned(),
            rationale: None,
            boundary: None,
            repair_class: None,
            evidence: Vec::new(),
        }
    }

    #[test]
    fn ruleset_round_trips_through_json() {
        let ruleset =
            Ruleset { id: "core".to_owned(), version: "1".to_owned(), rules: vec![sample_rule("r1", Some("structure"))] };
        let serialized = serde_json::to_value(&ruleset).expect("serialize");
        let parsed: Ruleset = serde_json::from_value(serialized).expect("parse");
        assert_eq!(parsed.id, "core");
        assert_eq!(parsed.rules.len(), 1);
    }

    #[test]
    fn supplemental_fields_round_trip_unused() {
        let mut rule = sample_rule("r2", None);
        rule.boundary = Some("section:intro".to_owned());
        rule.repair_class = Some("rewrite".to_owned());
        rule.evidence = vec!["doc://guideline#3".to_owned()];
        let serialized = serde_json::to_value(&rule).expect("serialize");
        let parsed: Rule = serde_json::from_value(serialized).expect("parse");
        assert_eq!(parsed.boundary.as_deref(), Some("section:intro"));
        assert_eq!(parsed.evidence, vec!["doc://guideline#3".to_owned()]);
    }

    #[test]
    fn referenced_invariants_deduplicates() {
        let ruleset = Ruleset {
            id: "core".to_owned(),
            version: "1".to_owned(),
            rules: vec![sample_rule("r1", Some("structure")), sample_rule("r2", Some("structure")), sample_rule("r3", None)],
        };
        assert_eq!(ruleset.referenced_invariants(), vec!["structure".to_owned()]);
    }

    #[test]
    fn selector_and_predicate_parameters_round_trip() {
        let mut rule = sample_rule("r4", None);
        rule.selector.parameters.insert("canonical_only".to_owned(), json!(true));
        rule.predicate.parameters.insert("roles".to_owned(), json!(["index", "hub"]));
        let serialized = serde_json::to_value(&rule).expect("serialize");
        let parsed: Rule = serde_json::from_value(serialized).expect("parse");
        assert_eq!(parsed.selector.parameters.get("canonical_only"), Some(&json!(true)));
    }
}
