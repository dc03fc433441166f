// crates/ledger-core/src/hashing.rs
// ============================================================================
// Module: Ledger Canonical Hashing
// Description: JSON canonicalization (RFC 8785) and SHA-256 content hashing.
// Purpose: Provide deterministic content ids for artifact payloads stored in
//          the content-addressed store.
// Dependencies: serde, serde_jcs, serde_json, sha2, base64
// ============================================================================

//! ## Overview
//! Every content blob stored in the ledger's content-addressed store is
//! addressed by the SHA-256 digest of its RFC 8785 canonical JSON
//! serialization. Mapping-shaped content hashes directly; byte and text
//! payloads are first wrapped in a tagged envelope so that the canonical
//! form is always a JSON value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::identifiers::ContentId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while canonicalizing or hashing content.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be serialized to canonical JSON.
    #[error("failed to canonicalize content: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Wrapped payload envelopes
// ============================================================================

/// Tagged envelope used to canonicalize raw byte payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryEnvelope {
    #[serde(rename = "_type")]
    kind: BinaryTag,
    #[serde(rename = "_encoding")]
    encoding: EncodingTag,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum BinaryTag {
    #[serde(rename = "binary")]
    Binary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum EncodingTag {
    #[serde(rename = "base64")]
    Base64,
}

/// Tagged envelope used to canonicalize text payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextEnvelope {
    #[serde(rename = "_type")]
    kind: TextTag,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TextTag {
    #[serde(rename = "text")]
    Text,
}

/// Content accepted by the content-addressed store.
///
/// Mapping content is hashed and stored as-is; byte and text content are
/// wrapped in a tagged envelope first so round-tripping through the store
/// always yields a JSON object on disk.
#[derive(Debug, Clone)]
pub enum StoredContent {
    /// A JSON value, typically an object (e.g. a plan or approval payload).
    Json(Value),
    /// Raw bytes, wrapped with a base64 envelope.
    Binary(Vec<u8>),
    /// Text, wrapped with a text envelope.
    Text(String),
}

impl StoredContent {
    /// Converts this content into its canonical, on-disk JSON representation.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Binary(bytes) => {
                let envelope = BinaryEnvelope {
                    kind: BinaryTag::Binary,
                    encoding: EncodingTag::Base64,
                    data: BASE64.encode(bytes),
                };
                serde_json::to_value(envelope).unwrap_or(Value::Null)
            }
            Self::Text(text) => {
                let envelope = TextEnvelope {
                    kind: TextTag::Text,
                    data: text.clone(),
                };
                serde_json::to_value(envelope).unwrap_or(Value::Null)
            }
        }
    }

    /// Reconstructs stored content from its on-disk envelope.
    #[must_use]
    pub fn from_envelope(value: Value) -> Self {
        if let Value::Object(ref map) = value {
            if let Some(Value::String(tag)) = map.get("_type") {
                match tag.as_str() {
                    "binary" => {
                        if let Some(Value::String(data)) = map.get("data") {
                            if let Ok(bytes) = BASE64.decode(data) {
                                return Self::Binary(bytes);
                            }
                        }
                    }
                    "text" => {
                        if let Some(Value::String(data)) = map.get("data") {
                            return Self::Text(data.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Self::Json(value)
    }
}

// ============================================================================
// SECTION: Canonicalization and hashing
// ============================================================================

/// Returns RFC 8785 canonical JSON bytes (sorted keys, compact separators)
/// for any serializable value.
///
/// # Errors
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes raw bytes with SHA-256, returning a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> ContentId {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    ContentId::new(hex_encode(&digest))
}

/// Computes the content id for a piece of stored content by canonicalizing
/// its on-disk envelope and hashing the result.
///
/// # Errors
/// Returns [`HashError::Canonicalization`] when the envelope cannot be
/// serialized.
pub fn content_id_for(content: &StoredContent) -> Result<ContentId, HashError> {
    let envelope = content.to_envelope();
    let bytes = canonical_json_bytes(&envelope)?;
    Ok(hash_bytes(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
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
    fn same_mapping_hashes_identically_regardless_of_key_order() {
        let a = StoredContent::Json(json!({"b": 1, "a": 2}));
        let b = StoredContent::Json(json!({"a": 2, "b": 1}));
        assert_eq!(content_id_for(&a).unwrap(), content_id_for(&b).unwrap());
    }

    #[test]
    fn binary_round_trips_through_envelope() {
        let content = StoredContent::Binary(vec![1, 2, 3, 4]);
        let envelope = content.to_envelope();
        let restored = StoredContent::from_envelope(envelope);
        match restored {
            StoredContent::Binary(bytes) => assert_eq!(bytes, vec![1, 2, 3, 4]),
            _ => panic!("expected binary content"),
        }
    }

    #[test]
    fn text_round_trips_through_envelope() {
        let content = StoredContent::Text("hello".to_owned());
        let envelope = content.to_envelope();
        let restored = StoredContent::from_envelope(envelope);
        match restored {
            StoredContent::Text(text) => assert_eq!(text, "hello"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
