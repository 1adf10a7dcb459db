// src/utils/serialization.rs
//! JSON helpers used by the key-value store and the chain relay client.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Serializes a value to a JSON string.
///
/// # Returns
/// - `Ok(String)` with JSON representation on success
/// - `Err(serde_json::Error)` if serialization fails
pub fn serialize<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(data)
}

/// Deserializes a value from a JSON string.
///
/// # Note
/// The lifetime parameter lets the result borrow from the input string.
pub fn deserialize<'a, T: Deserialize<'a>>(data: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}

/// Deserializes an optional stored value, falling back to `T::default()`
/// when nothing is stored or the stored text is not valid for `T`.
///
/// Persisted state has no schema versioning, so unreadable entries are
/// treated as empty rather than fatal.
pub fn deserialize_or_default<T: DeserializeOwned + Default>(data: Option<&str>) -> T {
    match data {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("discarding unreadable stored value: {}", e);
                T::default()
            }
        },
        None => T::default(),
    }
}
