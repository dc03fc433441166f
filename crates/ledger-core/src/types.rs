// crates/ledger-core/src/types.rs
// ============================================================================
// Module: Type Packs
// Description: Per-artifact-type payload validators and input extractors.
// Purpose: Keep the core ignorant of concrete payload shapes outside a fixed
//          set of pluggable TypePack implementations.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`TypePack`] is the only place the core interprets the shape of an
//! artifact's content. Three pure operations per pack: `validate`,
//! `extract_inputs`, and `compute_payload_manifest`. Registering a new
//! artifact type means registering a new [`TypePack`] in a
//! [`TypePackRegistry`]; the core never introspects payload shapes outside
//! this mechanism.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::events::InputRef;
use crate::events::PayloadManifestEntry;
use crate::hashing::hash_bytes;
use crate::identifiers::ArtifactId;
use crate::identifiers::ContentId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while extracting inputs from artifact content.
#[derive(Debug, Error)]
pub enum TypePackError {
    /// An input reference named an artifact whose content id could not be
    /// resolved through the supplied resolver. An unresolved content id is
    /// always a validation error, never an empty placeholder.
    #[error("cannot resolve content id for referenced artifact {0}")]
    UnresolvedReference(ArtifactId),
    /// The artifact id referenced by an input was malformed.
    #[error("malformed artifact id reference: {0}")]
    MalformedReference(String),
    /// No type pack is registered for the requested artifact type.
    #[error("no type pack registered for artifact type {0:?}")]
    UnknownArtifactType(crate::events::ArtifactType),
}

// ============================================================================
// SECTION: Content id resolver
// ============================================================================

/// Resolves an artifact's current canonical content id, for packs (approval,
/// bundle) that reference another artifact by id rather than embedding its
/// content id directly.
pub trait ArtifactContentResolver {
    /// Returns the current content id for `artifact_id`, if the artifact is
    /// known.
    fn content_id_for(&self, artifact_id: &ArtifactId) -> Option<ContentId>;
}

/// A resolver backed by a fixed in-memory map, useful for tests and for
/// callers that have already loaded the relevant snapshots.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    known: BTreeMap<ArtifactId, ContentId>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a known artifact id to content id mapping.
    pub fn insert(&mut self, artifact_id: ArtifactId, content_id: ContentId) {
        self.known.insert(artifact_id, content_id);
    }
}

impl ArtifactContentResolver for StaticResolver {
    fn content_id_for(&self, artifact_id: &ArtifactId) -> Option<ContentId> {
        self.known.get(artifact_id).cloned()
    }
}

// ============================================================================
// SECTION: TypePack trait
// ============================================================================

/// Per-artifact-type payload validator and input extractor.
///
/// Every operation is pure: no I/O, no clock, no randomness.
pub trait TypePack {
    /// Validates `content`, returning a list of human-readable errors. An
    /// empty list means validation passed.
    fn validate(&self, content: &Value) -> Vec<String>;

    /// Extracts the artifacts this content references as inputs.
    ///
    /// # Errors
    /// Returns [`TypePackError`] if a referenced artifact's content id
    /// cannot be resolved.
    fn extract_inputs(
        &self,
        content: &Value,
        resolver: &dyn ArtifactContentResolver,
    ) -> Result<Vec<InputRef>, TypePackError>;

    /// Computes a manifest of files declared by `content.payload.files`, if
    /// present. Returns an empty manifest when the content declares no files.
    fn compute_payload_manifest(&self, content: &Value) -> Vec<PayloadManifestEntry>;
}

// ============================================================================
// SECTION: Shared helpers
// ============================================================================

fn manifest_from_files_field(content: &Value) -> Vec<PayloadManifestEntry> {
    let Some(files) = content.pointer("/payload/files").and_then(Value::as_array) else {
        return Vec::new();
    };
    files
        .iter()
        .filter_map(|entry| {
            let path = entry.get("path")?.as_str()?.to_owned();
            let data = entry.get("data").and_then(Value::as_str).unwrap_or_default();
            let bytes = data.len() as u64;
            let sha256 = hash_bytes(data.as_bytes()).as_str().to_owned();
            Some(PayloadManifestEntry { path, bytes, sha256 })
        })
        .collect()
}

fn parse_artifact_id(raw: &str) -> Result<ArtifactId, TypePackError> {
    ArtifactId::parse(raw).map_err(|_| TypePackError::MalformedReference(raw.to_owned()))
}

// ============================================================================
// SECTION: Plan pack
// ============================================================================

/// TypePack for `plan` artifacts.
///
/// Requires a non-empty `operation` string and a `payload` mapping.
/// Validates that each entry in `inputs` carries both an `artifact_id` and a
/// `content_id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanPack;

impl TypePack for PlanPack {
    fn validate(&self, content: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        match content.get("operation").and_then(Value::as_str) {
            Some(op) if !op.is_empty() => {}
            _ => errors.push("plan content must declare a non-empty 'operation' string".to_owned()),
        }
        if !content.get("payload").is_some_and(Value::is_object) {
            errors.push("plan content must declare a 'payload' mapping".to_owned());
        }
        if let Some(inputs) = content.get("inputs").and_then(Value::as_array) {
            for (idx, input) in inputs.iter().enumerate() {
                let has_artifact = input.get("artifact_id").and_then(Value::as_str).is_some_and(|s| !s.is_empty());
                let has_content = input.get("content_id").and_then(Value::as_str).is_some_and(|s| !s.is_empty());
                if !has_artifact || !has_content {
                    errors.push(format!("plan input[{idx}] must declare both artifact_id and content_id"));
                }
            }
        }
        errors
    }

    fn extract_inputs(
        &self,
        content: &Value,
        _resolver: &dyn ArtifactContentResolver,
    ) -> Result<Vec<InputRef>, TypePackError> {
        let Some(inputs) = content.get("inputs").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(artifact_id) = input.get("artifact_id").and_then(Value::as_str) else {
                continue;
            };
            let Some(content_id) = input.get("content_id").and_then(Value::as_str) else {
                continue;
            };
            out.push(InputRef {
                artifact_id: parse_artifact_id(artifact_id)?,
                content_id: ContentId::from(content_id),
            });
        }
        Ok(out)
    }

    fn compute_payload_manifest(&self, content: &Value) -> Vec<PayloadManifestEntry> {
        manifest_from_files_field(content)
    }
}

// ============================================================================
// SECTION: Approval pack
// ============================================================================

/// TypePack for `approval` artifacts.
///
/// Requires a non-empty `target_artifact_id`, a non-empty list of
/// `approved_content_ids`, a `scope`, and an `approver`. `force_ack`, if
/// present, must be boolean.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprovalPack;

impl TypePack for ApprovalPack {
    fn validate(&self, content: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        if !content.get("target_artifact_id").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("approval content must declare a non-empty 'target_artifact_id'".to_owned());
        }
        let approved_ids_ok = content
            .get("approved_content_ids")
            .and_then(Value::as_array)
            .is_some_and(|ids| !ids.is_empty() && ids.iter().all(Value::is_string));
        if !approved_ids_ok {
            errors.push("approval content must declare a non-empty list of approved_content_ids".to_owned());
        }
        if !content.get("scope").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("approval content must declare a non-empty 'scope'".to_owned());
        }
        if !content.get("approver").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("approval content must declare a non-empty 'approver'".to_owned());
        }
        if let Some(force_ack) = content.get("force_ack") {
            if !force_ack.is_boolean() {
                errors.push("approval content's force_ack field must be boolean when present".to_owned());
            }
        }
        errors
    }

    fn extract_inputs(
        &self,
        content: &Value,
        resolver: &dyn ArtifactContentResolver,
    ) -> Result<Vec<InputRef>, TypePackError> {
        let Some(raw_target) = content.get("target_artifact_id").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        let target = parse_artifact_id(raw_target)?;
        let content_id = resolver
            .content_id_for(&target)
            .ok_or_else(|| TypePackError::UnresolvedReference(target.clone()))?;
        Ok(vec![InputRef { artifact_id: target, content_id }])
    }

    fn compute_payload_manifest(&self, _content: &Value) -> Vec<PayloadManifestEntry> {
        Vec::new()
    }
}

// ============================================================================
// SECTION: Bundle pack
// ============================================================================

/// TypePack for `bundle` artifacts, conforming to the `bundle@v1` format.
///
/// Requires `version == "bundle@v1"`, a non-empty `operation`, an ISO
/// timestamp, an `artifacts` object with `plan` and `result` ids (`approval`
/// optional for low risk), and a `repro` object with `surface` and
/// `engine_version`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundlePack;

impl TypePack for BundlePack {
    fn validate(&self, content: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        if content.get("version").and_then(Value::as_str) != Some("bundle@v1") {
            errors.push("bundle content must declare version 'bundle@v1'".to_owned());
        }
        if !content.get("operation").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("bundle content must declare a non-empty 'operation'".to_owned());
        }
        match content.get("timestamp").and_then(Value::as_str) {
            Some(ts) if time::OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339).is_ok() => {}
            _ => errors.push("bundle content must declare an ISO-8601 'timestamp'".to_owned()),
        }
        let Some(artifacts) = content.get("artifacts") else {
            errors.push("bundle content must declare an 'artifacts' object".to_owned());
            return errors;
        };
        if !artifacts.get("plan").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("bundle artifacts must reference a 'plan' id".to_owned());
        }
        if !artifacts.get("result").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("bundle artifacts must reference a 'result' id".to_owned());
        }
        let Some(repro) = content.get("repro") else {
            errors.push("bundle content must declare a 'repro' object".to_owned());
            return errors;
        };
        if !repro.get("surface").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("bundle repro must declare a non-empty 'surface'".to_owned());
        }
        if !repro.get("engine_version").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            errors.push("bundle repro must declare a non-empty 'engine_version'".to_owned());
        }
        errors
    }

    fn extract_inputs(
        &self,
        content: &Value,
        resolver: &dyn ArtifactContentResolver,
    ) -> Result<Vec<InputRef>, TypePackError> {
        let Some(artifacts) = content.get("artifacts") else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for key in ["plan", "approval", "result"] {
            let Some(raw) = artifacts.get(key).and_then(Value::as_str) else {
                continue;
            };
            let artifact_id = parse_artifact_id(raw)?;
            let content_id = resolver
                .content_id_for(&artifact_id)
                .ok_or_else(|| TypePackError::UnresolvedReference(artifact_id.clone()))?;
            out.push(InputRef { artifact_id, content_id });
        }
        Ok(out)
    }

    fn compute_payload_manifest(&self, _content: &Value) -> Vec<PayloadManifestEntry> {
        Vec::new()
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry mapping artifact type names to their [`TypePack`].
///
/// Comes pre-populated with [`PlanPack`], [`ApprovalPack`], and
/// [`BundlePack`] under their canonical wire names. Callers may register
/// additional packs for domain-specific artifact types (e.g. handler result
/// kinds) without the core ever introspecting their payload shape.
pub struct TypePackRegistry {
    packs: BTreeMap<String, Box<dyn TypePack + Send + Sync>>,
}

impl Default for TypePackRegistry {
    fn default() -> Self {
        let mut registry = Self { packs: BTreeMap::new() };
        registry.register("plan", Box::new(PlanPack));
        registry.register("approval", Box::new(ApprovalPack));
        registry.register("bundle", Box::new(BundlePack));
        registry
    }
}

impl TypePackRegistry {
    /// Creates a registry pre-populated with the built-in plan, approval,
    /// and bundle packs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the pack for `artifact_type`.
    pub fn register(&mut self, artifact_type: impl Into<String>, pack: Box<dyn TypePack + Send + Sync>) {
        self.packs.insert(artifact_type.into(), pack);
    }

    /// Looks up the pack registered for `artifact_type`'s wire name.
    ///
    /// # Errors
    /// Returns [`TypePackError::UnknownArtifactType`] if no pack is
    /// registered for that artifact type.
    pub fn get(&self, artifact_type: &crate::events::ArtifactType) -> Result<&(dyn TypePack + Send + Sync), TypePackError> {
        self.packs
            .get(artifact_type.as_wire_str())
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| TypePackError::UnknownArtifactType(artifact_type.clone()))
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
    fn plan_pack_rejects_missing_operation() {
        let errors = PlanPack.validate(&json!({"payload": {}}));
        assert!(!errors.is_empty());
    }

    #[test]
    fn plan_pack_accepts_minimal_valid_content() {
        let errors = PlanPack.validate(&json!({"operation": "graph.load", "payload": {}}));
        assert!(errors.is_empty());
    }

    #[test]
    fn plan_pack_rejects_input_missing_content_id() {
        let content = json!({
            "operation": "graph.load",
            "payload": {},
            "inputs": [{"artifact_id": "01ABCDEFGHJKMNPQRSTVWXYZ01"}],
        });
        let errors = PlanPack.validate(&content);
        assert!(!errors.is_empty());
    }

    #[test]
    fn approval_pack_requires_resolved_target_content_id() {
        let content = json!({
            "target_artifact_id": "01ABCDEFGHJKMNPQRSTVWXYZ01",
            "approved_content_ids": ["a".repeat(64)],
            "scope": "graph.load",
            "approver": "alice",
        });
        let resolver = StaticResolver::new();
        let err = ApprovalPack.extract_inputs(&content, &resolver).unwrap_err();
        assert!(matches!(err, TypePackError::UnresolvedReference(_)));
    }

    #[test]
    fn approval_pack_rejects_non_boolean_force_ack() {
        let content = json!({
            "target_artifact_id": "01ABCDEFGHJKMNPQRSTVWXYZ01",
            "approved_content_ids": ["a".repeat(64)],
            "scope": "graph.load",
            "approver": "alice",
            "force_ack": "yes",
        });
        let errors = ApprovalPack.validate(&content);
        assert!(!errors.is_empty());
    }

    #[test]
    fn bundle_pack_requires_exact_version() {
        let content = json!({
            "version": "bundle@v2",
            "operation": "graph.load",
            "timestamp": "2026-01-01T00:00:00Z",
            "artifacts": {"plan": "x", "result": "y"},
            "repro": {"surface": "cli", "engine_version": "1.0"},
        });
        let errors = BundlePack.validate(&content);
        assert!(!errors.is_empty());
    }

    #[test]
    fn registry_resolves_built_in_packs() {
        let registry = TypePackRegistry::new();
        assert!(registry.get(&crate::events::ArtifactType::Plan).is_ok());
        assert!(registry.get(&crate::events::ArtifactType::Approval).is_ok());
        assert!(registry.get(&crate::events::ArtifactType::Bundle).is_ok());
        let err = registry.get(&crate::events::ArtifactType::Other("mystery".to_owned())).unwrap_err();
        assert!(matches!(err, TypePackError::UnknownArtifactType(_)));
    }
}
