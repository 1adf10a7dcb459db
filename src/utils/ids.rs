// src/utils/ids.rs
//! Identifier and placeholder-hash generation.

use rand::Rng;

/// `PREFIX-NNNN` with a random four digit suffix, e.g. `REC-4821`.
///
/// The space is small; callers that need uniqueness retry against their
/// collection (see [`unique_prefixed_id`]).
pub fn prefixed_id(prefix: &str) -> String {
    let n: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{}-{}", prefix, n)
}

/// Like [`prefixed_id`] but retries while `taken` reports a collision.
/// Falls back to a wider suffix after a bounded number of attempts.
pub fn unique_prefixed_id(prefix: &str, taken: impl Fn(&str) -> bool) -> String {
    for _ in 0..32 {
        let candidate = prefixed_id(prefix);
        if !taken(&candidate) {
            return candidate;
        }
    }
    loop {
        let candidate = format!("{}-{}", prefix, random_hex(12));
        if !taken(&candidate) {
            return candidate;
        }
    }
}

/// `prefix_` followed by 16 random hex characters, e.g. `dep_1f0c…`.
pub fn token_id(prefix: &str) -> String {
    format!("{}_{}", prefix, random_hex(16))
}

/// Random lowercase hex string of `len` characters.
pub fn random_hex(len: usize) -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Deterministic, non-cryptographic placeholder hash: `hash_<seed>`.
pub fn placeholder_hash(seed: &str) -> String {
    format!("hash_{}", seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("REC");
        let (prefix, digits) = id.split_once('-').unwrap();
        assert_eq!(prefix, "REC");
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_unique_prefixed_id_skips_taken() {
        let id = unique_prefixed_id("SUB", |candidate| candidate.len() == 8);
        assert!(id.starts_with("SUB-"));
        assert_ne!(id.len(), 8);
    }

    #[test]
    fn test_token_id() {
        let id = token_id("dep");
        assert!(id.starts_with("dep_"));
        assert_eq!(id.len(), 20);
    }

    #[test]
    fn test_placeholder_hash_is_deterministic() {
        assert_eq!(placeholder_hash("REC-1000"), placeholder_hash("REC-1000"));
        assert_eq!(placeholder_hash("atlas.edu"), "hash_atlas.edu");
    }
}
