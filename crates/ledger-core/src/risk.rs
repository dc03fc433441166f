// crates/ledger-core/src/risk.rs
// ============================================================================
// Module: Risk Engine
// Description: Pure classification of an operation's predicted effects.
// Purpose: Derive an authoritative risk class and supporting reasons from a
//          plan's operation name and payload, with no I/O.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`compute_risk`] is total and pure: given an operation name and a
//! payload, it always returns a risk class and a list of reasons, and it
//! never touches disk, the network, or the clock. Classification blends a
//! small table of known operations, generic boolean effect flags, and an
//! authoritative handler-declared `effect_summary`, in that order of
//! increasing precedence.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: RiskClass
// ============================================================================

/// Five-valued risk classification used to gate execution.
///
/// Ordering matters for display and sorting: `read_only < append_only <
/// mutation_reversible < mutation_destructive < external_side_effect`.
/// `external_side_effect` and `mutation_destructive` both require approval
/// and are otherwise incomparable in severity; use
/// [`RiskClass::requires_approval`] and [`RiskClass::requires_force_ack`]
/// for gating decisions rather than comparing ordinals directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Pure reads; no observable side effect.
    ReadOnly,
    /// Appends only; nothing is ever overwritten or removed.
    AppendOnly,
    /// Mutates state, but the change can be undone.
    MutationReversible,
    /// Mutates state in a way that cannot be undone.
    MutationDestructive,
    /// Affects a system outside the vault (network call, external database).
    ExternalSideEffect,
}

impl RiskClass {
    /// Returns true if this risk class requires explicit approval before execution.
    #[must_use]
    pub fn requires_approval(self) -> bool {
        matches!(self, Self::MutationDestructive | Self::ExternalSideEffect)
    }

    /// Returns true if this risk class requires an explicit force-ack from the approver.
    #[must_use]
    pub fn requires_force_ack(self) -> bool {
        matches!(self, Self::MutationDestructive)
    }

    /// Returns the wire string for this risk class.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::AppendOnly => "append_only",
            Self::MutationReversible => "mutation_reversible",
            Self::MutationDestructive => "mutation_destructive",
            Self::ExternalSideEffect => "external_side_effect",
        }
    }
}

// ============================================================================
// SECTION: Known operation table
// ============================================================================

/// A known operation's baseline classification, before payload-level
/// escalation is applied.
fn known_operation_baseline(operation: &str) -> Option<RiskClass> {
    match operation {
        "diagnostics.run" | "vault.stat" | "graph.query" => Some(RiskClass::ReadOnly),
        "audit.append" | "bundle.emit" => Some(RiskClass::AppendOnly),
        "vault.rename_note" | "vault.retag" => Some(RiskClass::MutationReversible),
        "vault.delete_note" | "vault.purge" => Some(RiskClass::MutationDestructive),
        "graph.load" => Some(RiskClass::ExternalSideEffect),
        _ => None,
    }
}

/// `graph.load` and similarly shaped external operations escalate to
/// destructive when the payload declares a mode that discards prior state.
fn escalates_to_destructive(operation: &str, payload: &Value) -> bool {
    if operation != "graph.load" {
        return false;
    }
    payload.get("mode").and_then(Value::as_str) == Some("rebuild")
}

// ============================================================================
// SECTION: Generic effect flags
// ============================================================================

#[derive(Debug, Default)]
struct EffectFlags {
    network: bool,
    destructive: bool,
    writes: bool,
    append_only: bool,
}

fn read_effect_flags(payload: &Value) -> EffectFlags {
    let Some(effects) = payload.get("effects").and_then(Value::as_object) else {
        return EffectFlags::default();
    };
    EffectFlags {
        network: effects.get("network").and_then(Value::as_bool).unwrap_or(false),
        destructive: effects.get("destructive").and_then(Value::as_bool).unwrap_or(false),
        writes: effects.get("writes").and_then(Value::as_bool).unwrap_or(false),
        append_only: effects.get("append_only").and_then(Value::as_bool).unwrap_or(false),
    }
}

/// An authoritative, handler-declared effect summary embedded in the payload
/// under `effect_summary`. When present, its `effect_type` takes precedence
/// over the table-driven and flag-driven classification below, short-circuiting
/// immediately when it declares `read_only`.
fn read_declared_effect_type(payload: &Value) -> Option<RiskClass> {
    let declared = payload.get("effect_summary")?.get("effect_type")?.as_str()?;
    match declared {
        "read_only" => Some(RiskClass::ReadOnly),
        "append_only" => Some(RiskClass::AppendOnly),
        "mutation_reversible" => Some(RiskClass::MutationReversible),
        "mutation_destructive" => Some(RiskClass::MutationDestructive),
        "external_side_effect" => Some(RiskClass::ExternalSideEffect),
        _ => None,
    }
}

// ============================================================================
// SECTION: compute_risk
// ============================================================================

/// Derives a risk class and supporting reasons from an operation name and
/// its payload. Pure, total, and free of I/O.
///
/// Precedence (highest wins): a declared `read_only` effect summary
/// short-circuits immediately; otherwise destructive > external > reversible
/// > append_only > read_only, folding in the known-operation table, the
/// generic `effects` flags, and any other declared `effect_summary`.
/// Unknown operations with no declared effects default to
/// [`RiskClass::ExternalSideEffect`] — the conservative choice that forces
/// approval.
#[must_use]
pub fn compute_risk(operation: &str, payload: &Value) -> (RiskClass, Vec<String>) {
    let mut reasons = Vec::new();

    if let Some(RiskClass::ReadOnly) = read_declared_effect_type(payload) {
        reasons.push("handler declared effect_summary.effect_type = read_only".to_owned());
        return (RiskClass::ReadOnly, reasons);
    }

    let mut destructive = false;
    let mut external = false;
    let mut reversible = false;
    let mut append_only = false;
    let mut read_only = false;
    let mut known = false;

    if let Some(baseline) = known_operation_baseline(operation) {
        known = true;
        reasons.push(format!("operation '{operation}' has a known baseline classification"));
        match baseline {
            RiskClass::ReadOnly => read_only = true,
            RiskClass::AppendOnly => append_only = true,
            RiskClass::MutationReversible => reversible = true,
            RiskClass::MutationDestructive => destructive = true,
            RiskClass::ExternalSideEffect => external = true,
        }
    }

    if escalates_to_destructive(operation, payload) {
        destructive = true;
        reasons.push(format!("operation '{operation}' payload requests a destructive mode"));
    }

    let flags = read_effect_flags(payload);
    if flags.destructive {
        destructive = true;
        reasons.push("payload effects.destructive = true".to_owned());
    }
    if flags.network {
        external = true;
        reasons.push("payload effects.network = true".to_owned());
    }
    if flags.writes {
        reversible = true;
        reasons.push("payload effects.writes = true".to_owned());
    }
    if flags.append_only {
        append_only = true;
        reasons.push("payload effects.append_only = true".to_owned());
    }

    if let Some(declared) = read_declared_effect_type(payload) {
        reasons.push(format!(
            "handler declared effect_summary.effect_type = {}",
            declared.as_wire_str()
        ));
        match declared {
            RiskClass::ReadOnly => {}
            RiskClass::AppendOnly => append_only = true,
            RiskClass::MutationReversible => reversible = true,
            RiskClass::MutationDestructive => destructive = true,
            RiskClass::ExternalSideEffect => external = true,
        }
    }

    if !known && !destructive && !external && !reversible && !append_only && !read_only {
        reasons.push(format!(
            "operation '{operation}' has no known classification or declared effects; defaulting to external_side_effect"
        ));
        return (RiskClass::ExternalSideEffect, reasons);
    }

    let class = if destructive {
        RiskClass::MutationDestructive
    } else if external {
        RiskClass::ExternalSideEffect
    } else if reversible {
        RiskClass::MutationReversible
    } else if append_only {
        RiskClass::AppendOnly
    } else {
        RiskClass::ReadOnly
    };
    (class, reasons)
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
    fn graph_load_sync_is_external_side_effect() {
        let (class, _) = compute_risk("graph.load", &json!({"mode": "sync", "database": "g1"}));
        assert_eq!(class, RiskClass::ExternalSideEffect);
    }

    #[test]
    fn graph_load_rebuild_escalates_to_destructive() {
        let (class, _) = compute_risk("graph.load", &json!({"mode": "rebuild", "database": "g1"}));
        assert_eq!(class, RiskClass::MutationDestructive);
    }

    #[test]
    fn unknown_operation_defaults_to_external_side_effect() {
        let (class, reasons) = compute_risk("mystery.op", &json!({}));
        assert_eq!(class, RiskClass::ExternalSideEffect);
        assert!(!reasons.is_empty());
    }

    #[test]
    fn declared_read_only_short_circuits_even_with_destructive_flags() {
        let payload = json!({
            "effects": {"destructive": true},
            "effect_summary": {"effect_type": "read_only"},
        });
        let (class, _) = compute_risk("vault.delete_note", &payload);
        assert_eq!(class, RiskClass::ReadOnly);
    }

    #[test]
    fn destructive_outranks_external_and_reversible() {
        let payload = json!({
            "effects": {"network": true, "writes": true, "destructive": true},
        });
        let (class, _) = compute_risk("custom.op", &payload);
        assert_eq!(class, RiskClass::MutationDestructive);
    }

    #[test]
    fn risk_class_gating_predicates() {
        assert!(RiskClass::MutationDestructive.requires_approval());
        assert!(RiskClass::MutationDestructive.requires_force_ack());
        assert!(RiskClass::ExternalSideEffect.requires_approval());
        assert!(!RiskClass::ExternalSideEffect.requires_force_ack());
        assert!(!RiskClass::MutationReversible.requires_approval());
    }
}
