// src/models/access.rs
//! Viewer requests for access to a candidate's private credential.

use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Pending,
    Unlocked,
    Rejected,
}

/// Created by a viewer; only the owning candidate may change its status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: String,
    pub candidate_id: String,
    pub credential_record_id: String,
    pub viewer_id: String,
    pub viewer_name: String,
    /// Requested window such as `24h` or `7d`.
    pub duration: String,
    pub status: AccessStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    /// `true` while the request is unlocked and not yet expired.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AccessStatus::Unlocked && self.expires_at.map_or(false, |at| at > now)
    }
}

/// Parses `<n>h` or `<n>d` with `n > 0`.
pub fn parse_duration(input: &str) -> ServiceResult<Duration> {
    let trimmed = input.trim().to_ascii_lowercase();
    let invalid = || ServiceError::Validation(format!("unsupported access duration: {:?}", input));
    if trimmed.len() < 2 {
        return Err(invalid());
    }
    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    if n <= 0 {
        return Err(invalid());
    }
    match unit {
        "h" => Ok(Duration::hours(n)),
        "d" => Ok(Duration::days(n)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration(" 7D ").unwrap(), Duration::days(7));
        assert!(parse_duration("0h").is_err());
        assert!(parse_duration("forever").is_err());
        assert!(parse_duration("h").is_err());
    }
}
