// src/utils/address.rs
//! Canonical form for the 64-hex-character identifiers used as candidate
//! and issuer ids.
//!
//! Every identifier that crosses a boundary (route parameter, form field,
//! pasted value) goes through [`normalize`] before it reaches a record.

use crate::error::{ServiceError, ServiceResult};

/// Number of hex characters in a canonical identifier (without `0x`).
pub const ID_HEX_LEN: usize = 64;

fn is_hex64(body: &str) -> bool {
    body.len() == ID_HEX_LEN && body.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Strict check: optional `0x` prefix followed by exactly 64 hex characters.
pub fn is_valid(input: &str) -> bool {
    let cleaned = input.trim().to_ascii_lowercase();
    if cleaned.is_empty() {
        return false;
    }
    let body = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    is_hex64(body)
}

/// Returns `0x` + 64 lowercase hex characters, or an empty string when the
/// input cannot be brought into that shape.
///
/// Short hex strings are left-padded with zeros rather than rejected, so
/// `0xabc` and `0x000…0abc` name the same identifier.
pub fn normalize(input: &str) -> String {
    let cleaned = input.trim().to_ascii_lowercase();
    let body = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    if body.is_empty() || body.len() > ID_HEX_LEN {
        return String::new();
    }
    let full = format!("{:0>width$}", body, width = ID_HEX_LEN);
    if is_hex64(&full) {
        format!("0x{}", full)
    } else {
        String::new()
    }
}

/// Normalizes `input` or fails with [`ServiceError::InvalidAddress`].
pub fn require_address(input: &str) -> ServiceResult<String> {
    let normalized = normalize(input);
    if normalized.is_empty() {
        Err(ServiceError::InvalidAddress(input.trim().to_string()))
    } else {
        Ok(normalized)
    }
}

/// `0x1234...abcd` for valid identifiers, the trimmed input otherwise.
pub fn short_address(input: &str) -> String {
    let normalized = normalize(input);
    if normalized.is_empty() {
        return input.trim().to_string();
    }
    format!("{}...{}", &normalized[..6], &normalized[normalized.len() - 4..])
}

/// Looser form accepted by candidate-id inputs before normalization:
/// `0x` followed by 1 to 64 hex characters.
pub fn is_candidate_id(input: &str) -> bool {
    match input.trim().strip_prefix("0x") {
        Some(body) => {
            !body.is_empty()
                && body.len() <= ID_HEX_LEN
                && body.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}
