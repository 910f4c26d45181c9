// crates/variant-gate-core/src/core/hashing.rs
// ============================================================================
// Module: Variant Gate Hashing
// Description: Bucketing hash and content digests.
// Purpose: Map user identifiers to stable buckets and fingerprint stored values.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Two unrelated hashes live here:
//!
//! - The bucketing hash is the 32-bit rolling polynomial string hash
//!   (`hash * 31 + code_unit`, wrapping) reduced to `[0, 99]`. It must stay
//!   bit-for-bit stable: changing it reshuffles every cohort that was ever
//!   persisted.
//! - Content digests (SHA-256 over canonical JSON) protect stored values
//!   against silent corruption in durable backends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Bucketing
// ============================================================================

/// Number of buckets users are distributed over.
pub const BUCKET_COUNT: u32 = 100;

/// Computes the 32-bit rolling polynomial hash of a string.
///
/// The hash walks UTF-16 code units so identifiers produced by browser
/// clients land in the same bucket when evaluated here.
#[must_use]
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Returns the bucket in `[0, 99]` for a user identifier.
///
/// `i32::MIN` has no positive counterpart in `i32`; its absolute value is
/// taken as `2_147_483_648`.
#[must_use]
pub fn bucket_for(user_id: &str) -> u8 {
    let bucket = string_hash(user_id).unsigned_abs() % BUCKET_COUNT;
    u8::try_from(bucket).unwrap_or(u8::MAX)
}

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported content digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the canonical label stored alongside digests.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a stored algorithm label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Default content digest algorithm.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Content digest representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing content digests.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Digest Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
