//! JSON Canonicalization Scheme (RFC 8785) implementation.
//!
//! Provides deterministic JSON serialization for cryptographic operations.
//! Uses `serde_jcs` which guarantees:
//!
//! - Lexicographic key ordering
//! - No insignificant whitespace
//! - UTF-8 encoding
//! - IEEE 754 number normalization (1.0 → 1)

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize a value to JCS (RFC 8785) Canonical JSON bytes.
///
/// # Guarantees
///
/// - Keys sorted lexicographically
/// - No whitespace
/// - UTF-8 encoding
/// - Number normalization (IEEE 754)
///
/// # Example
///
/// ```
/// use attestgate_core::canonical;
/// use serde_json::json;
///
/// let value = json!({"b": 2, "a": 1});
/// let bytes = canonical::to_vec(&value).unwrap();
/// assert_eq!(bytes, br#"{"a":1,"b":2}"#);
/// ```
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_jcs::to_vec(value).context("failed to serialize canonical json")
}

/// Serialize to JCS Canonical JSON string.
///
/// # Example
///
/// ```
/// use attestgate_core::canonical;
/// use serde_json::json;
///
/// let value = json!({"z": 1, "a": 2});
/// let s = canonical::to_string(&value).unwrap();
/// assert_eq!(s, r#"{"a":2,"z":1}"#);
/// ```
pub fn to_string<T: Serialize>(value: &T) -> Result<String> {
    serde_jcs::to_string(value).context("failed to serialize canonical json string")
}
