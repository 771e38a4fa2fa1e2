// crates/uapk-gateway-core/src/core/hashing.rs
// ============================================================================
// Module: UAPK Gateway Canonical Hashing
// Description: Canonical JSON serialization and SHA-256 content hashing.
// Purpose: Provide deterministic digests for requests, actions, and audit records.
// Dependencies: serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every hashed payload in the gateway goes through one canonical form: keys
//! sorted lexicographically, no insignificant whitespace, strings escaped to
//! ASCII, floats equal to an integer serialized as integers and all other
//! floats rounded to ten decimal places. Recomputing a digest from stored
//! fields must reproduce it byte-for-byte, which is what makes the audit
//! chain verifiable by third parties.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::action::ActionInfo;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// Value could not be converted into JSON for canonicalization.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Returns the canonical JSON string for a JSON value.
#[must_use]
pub fn canonical_json_string(value: &Value) -> String {
    let normalized = normalize(value);
    let mut out = String::new();
    write_value(&mut out, &normalized);
    out
}

/// Converts a serializable value into JSON and returns its canonical string.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when JSON conversion fails.
pub fn canonical_json_value<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let json =
        serde_json::to_value(value).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    Ok(canonical_json_string(&json))
}

/// Hashes the canonical JSON form of a value with SHA-256.
#[must_use]
pub fn hash_canonical_json(value: &Value) -> String {
    hash_bytes(canonical_json_string(value).as_bytes())
}

/// Hashes raw bytes with SHA-256 and returns lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Computes the canonical hash of an action (`type`, `tool`, `params`).
///
/// Override tokens and approvals are bound to this digest, so the action
/// serialization must stay stable across issuance and redemption.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the action cannot be serialized.
pub fn action_hash(action: &ActionInfo) -> Result<String, HashError> {
    let json =
        serde_json::to_value(action).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    Ok(hash_canonical_json(&json))
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Largest float magnitude that can be represented exactly as an integer.
const MAX_EXACT_INTEGER_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Recursively normalizes a JSON value for canonical serialization.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => value.clone(),
        Value::Number(number) => Value::Number(normalize_number(number)),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(entries) => {
            let mut map = Map::new();
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(entry) = entries.get(key) {
                    map.insert(key.clone(), normalize(entry));
                }
            }
            Value::Object(map)
        }
    }
}

/// Normalizes a JSON number: integral floats become integers, other floats
/// are rounded to ten decimal places to neutralize representation noise.
fn normalize_number(number: &Number) -> Number {
    if number.is_i64() || number.is_u64() {
        return number.clone();
    }
    let Some(float) = number.as_f64() else {
        return number.clone();
    };
    if float.fract() == 0.0 && float.abs() < MAX_EXACT_INTEGER_FLOAT {
        #[allow(clippy::cast_possible_truncation, reason = "Integral value checked above.")]
        return Number::from(float as i64);
    }
    let rounded = (float * 1e10).round() / 1e10;
    Number::from_f64(rounded).unwrap_or_else(|| number.clone())
}

// ============================================================================
// SECTION: Canonical Writer
// ============================================================================

/// Writes a normalized JSON value with sorted keys and no whitespace.
fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_escaped_string(out, text),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(entries) => {
            out.push('{');
            for (index, (key, entry)) in entries.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_escaped_string(out, key);
                out.push(':');
                write_value(out, entry);
            }
            out.push('}');
        }
    }
}

/// Writes a string with full ASCII escaping.
fn write_escaped_string(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_ascii() && (ch as u32) >= 0x20 => out.push(ch),
            ch => {
                let code = ch as u32;
                if code < 0x10000 {
                    push_unicode_escape(out, code);
                } else {
                    // Encode astral characters as UTF-16 surrogate pairs.
                    let reduced = code - 0x10000;
                    push_unicode_escape(out, 0xd800 + (reduced >> 10));
                    push_unicode_escape(out, 0xdc00 + (reduced & 0x3ff));
                }
            }
        }
    }
    out.push('"');
}

/// Writes a `\uXXXX` escape for a UTF-16 code unit.
fn push_unicode_escape(out: &mut String, code: u32) {
    out.push_str(&format!("\\u{code:04x}"));
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
