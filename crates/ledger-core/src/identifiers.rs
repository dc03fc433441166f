// crates/ledger-core/src/identifiers.rs
// ============================================================================
// Module: Ledger Identifiers
// Description: Time-ordered artifact identifiers, content hashes, and the
//              generator that mints them.
// Purpose: Provide strongly typed, serializable identifiers with stable wire
//          forms and a single source of time-ordered randomness.
// Dependencies: serde, rand, time
// ============================================================================

//! ## Overview
//! Every artifact recorded in the ledger is addressed by an [`ArtifactId`]:
//! a 48-bit millisecond timestamp concatenated with 80 bits of cryptographic
//! randomness, rendered as 26 Crockford base-32 characters. Ordering by the
//! string form sorts by creation time; collisions within the same
//! millisecond are broken by the random tail, not by a counter.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Crockford base32
// ============================================================================

const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// 48 bits of timestamp + 80 bits of randomness, 128 bits total, 26 base-32 characters.
const ENCODED_LEN: usize = 26;

fn encode_crockford(value: u128) -> String {
    let mut out = [0u8; ENCODED_LEN];
    let mut v = value;
    for slot in out.iter_mut().rev() {
        let idx = usize::try_from(v & 0x1f).unwrap_or(0);
        *slot = CROCKFORD_ALPHABET[idx];
        v >>= 5;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_crockford(s: &str) -> Option<u128> {
    if s.len() != ENCODED_LEN {
        return None;
    }
    let mut value: u128 = 0;
    for ch in s.chars() {
        let upper = ch.to_ascii_uppercase();
        let digit = CROCKFORD_ALPHABET.iter().position(|&c| c == upper as u8)?;
        value = (value << 5) | u128::from(digit as u8);
    }
    Some(value)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while minting or parsing identifiers.
#[derive(Debug, Error)]
pub enum IdError {
    /// The wall-clock timestamp does not fit in 48 bits.
    #[error("timestamp {0} does not fit in 48 bits")]
    TimestampOutOfRange(u128),
    /// A string was not a well-formed 26-character Crockford base32 identifier.
    #[error("malformed identifier: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: ArtifactId
// ============================================================================

/// Time-ordered, lexicographically sortable identifier for an artifact.
///
/// # Invariants
/// - Always exactly 26 Crockford base-32 characters on the wire.
/// - Lexicographic order on the encoded form matches creation order at
///   millisecond granularity; order within a millisecond is unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Builds an identifier from a raw 128-bit value (timestamp:randomness).
    ///
    /// # Errors
    /// Returns [`IdError::TimestampOutOfRange`] if the high 48 bits exceed
    /// the millisecond timestamp range.
    pub fn from_raw(timestamp_ms: u64, randomness: u128) -> Result<Self, IdError> {
        if timestamp_ms >> 48 != 0 {
            return Err(IdError::TimestampOutOfRange(u128::from(timestamp_ms)));
        }
        let value = (u128::from(timestamp_ms) << 80) | (randomness & ((1u128 << 80) - 1));
        Ok(Self(encode_crockford(value)))
    }

    /// Parses an identifier from its wire form, validating shape only.
    ///
    /// # Errors
    /// Returns [`IdError::Malformed`] if the string is not 26 valid
    /// Crockford base-32 characters.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        decode_crockford(s)
            .map(|_| Self(s.to_ascii_uppercase()))
            .ok_or_else(|| IdError::Malformed(s.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the millisecond timestamp encoded in this identifier.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let value = decode_crockford(&self.0).unwrap_or(0);
        u64::try_from(value >> 80).unwrap_or(0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ArtifactId> for String {
    fn from(value: ArtifactId) -> Self {
        value.0
    }
}

/// Execution identifier shared by every phase event within one
/// harness-driven execution. Wire-identical to [`ArtifactId`] but kept as a
/// distinct type so the two cannot be confused at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ArtifactId> for ExecutionId {
    fn from(value: ArtifactId) -> Self {
        Self(value.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

// ============================================================================
// SECTION: ContentId
// ============================================================================

/// Hex-encoded SHA-256 digest of a canonical content serialization.
///
/// # Invariants
/// - Always 64 lowercase hex characters, or empty to represent "unresolved"
///   during construction — callers must treat an empty `ContentId` as a
///   validation error before it reaches the ledger (see the type-pack
///   contracts in [`crate::types`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wraps an already-computed hex digest.
    #[must_use]
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this id carries no digest at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ContentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// SECTION: IdGen
// ============================================================================

/// Mints new [`ArtifactId`]s from the system clock and a cryptographic RNG.
///
/// Holds no mutable state: uniqueness comes from 80 bits of randomness per
/// call, not from a counter, so instances are freely shareable across
/// threads without synchronization.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGen;

impl IdGen {
    /// Creates a new generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Mints a new artifact identifier using the current wall-clock time.
    ///
    /// # Errors
    /// Returns [`IdError::TimestampOutOfRange`] if the system clock is set
    /// further in the future than the 48-bit millisecond range allows.
    pub fn next_artifact_id(&self) -> Result<ArtifactId, IdError> {
        let timestamp_ms = current_unix_millis();
        let mut randomness_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut randomness_bytes);
        let randomness = u128::from_be_bytes(randomness_bytes);
        ArtifactId::from_raw(timestamp_ms, randomness)
    }

    /// Mints a new execution identifier, wire-identical in shape to an
    /// artifact identifier.
    ///
    /// # Errors
    /// Returns [`IdError::TimestampOutOfRange`] under the same condition as
    /// [`IdGen::next_artifact_id`].
    pub fn next_execution_id(&self) -> Result<ExecutionId, IdError> {
        self.next_artifact_id().map(ExecutionId::from)
    }
}

fn current_unix_millis() -> u64 {
    let now = time::OffsetDateTime::now_utc();
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use super::*;

    #[test]
    fn round_trips_raw_value() {
        let id = ArtifactId::from_raw(1_700_000_000_000, 0xABCD_1234).expect("valid timestamp");
        let parsed = ArtifactId::parse(id.as_str()).expect("valid identifier");
        assert_eq!(id, parsed);
        assert_eq!(id.timestamp_ms(), 1_700_000_000_000);
    }

    #[test]
    fn rejects_oversized_timestamp() {
        let too_big = 1u64 << 49;
        let err = ArtifactId::from_raw(too_big, 0).unwrap_err();
        assert!(matches!(err, IdError::TimestampOutOfRange(_)));
    }

    #[test]
    fn rejects_malformed_string() {
        let err = ArtifactId::parse("not-a-valid-id").unwrap_err();
        assert!(matches!(err, IdError::Malformed(_)));
    }

    #[test]
    fn generated_ids_are_unique() {
        let gen = IdGen::new();
        let a = gen.next_artifact_id().expect("clock in range");
        let b = gen.next_artifact_id().expect("clock in range");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_content_id_reports_empty() {
        let id = ContentId::default();
        assert!(id.is_empty());
    }
}
