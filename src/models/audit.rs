// src/models/audit.rs
//! Append-only audit trail entries.
//!
//! Neither entry type is ever mutated or deleted once recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action names written to the logs.
pub mod actions {
    pub const ISSUED: &str = "ISSUED";
    pub const EXTERNAL_VERIFY: &str = "EXTERNAL_VERIFY";
    pub const REVOKED: &str = "REVOKED";
    pub const DNS_CHECK: &str = "DNS_CHECK";
    pub const LEGAL_REVIEW: &str = "LEGAL_REVIEW";
    pub const SUBMITTED_LEGAL: &str = "SUBMITTED_LEGAL";
    pub const SUBMITTED_VERIFICATION: &str = "SUBMITTED_VERIFICATION";
    pub const LEGAL_APPROVED: &str = "LEGAL_APPROVED";
    pub const LEGAL_REJECTED: &str = "LEGAL_REJECTED";
    pub const LEGAL_UPDATE_REQUEST: &str = "LEGAL_UPDATE_REQUEST";
    pub const APPROVED: &str = "APPROVED";
    pub const REJECTED: &str = "REJECTED";
    pub const NEEDS_UPDATE: &str = "NEEDS_UPDATE";
    pub const APPROVAL_ROLLED_BACK: &str = "APPROVAL_ROLLED_BACK";
    pub const ISSUER_REGISTERED: &str = "ISSUER_REGISTERED";
    pub const DEPOSITS_REFUNDED: &str = "DEPOSITS_REFUNDED";
    pub const EXTERNAL_UPLOAD: &str = "EXTERNAL_UPLOAD";
    pub const ID_CHECK: &str = "ID_CHECK";
    pub const CLAIMED: &str = "CLAIMED";
    pub const TRUST_UPDATED: &str = "TRUST_UPDATED";
}

/// Per-credential verification event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEvent {
    pub id: String,
    /// Credential record id, or the issuer id for issuer-level events.
    pub credential_id: String,
    pub action: String,
    pub method: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Admin/review audit log entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub target_id: String,
    pub result: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Unified row returned by the issuer audit view.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditView {
    pub id: String,
    pub time: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub method: String,
    pub result: String,
    pub target_id: String,
}

impl From<&VerificationEvent> for AuditView {
    fn from(event: &VerificationEvent) -> Self {
        AuditView {
            id: event.id.clone(),
            time: event.timestamp,
            actor: "System".to_string(),
            action: event.action.clone(),
            method: event.method.clone(),
            result: event.result.clone(),
            target_id: event.credential_id.clone(),
        }
    }
}

impl From<&AuditLogEntry> for AuditView {
    fn from(entry: &AuditLogEntry) -> Self {
        AuditView {
            id: entry.id.clone(),
            time: entry.timestamp,
            actor: entry.actor.clone(),
            action: entry.action.clone(),
            method: "Portal".to_string(),
            result: entry.result.clone(),
            target_id: entry.target_id.clone(),
        }
    }
}

/// Exact match on action, case-insensitive substring on method and result.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub method: Option<String>,
    pub result: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, view: &AuditView) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_deref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }
        self.action.as_deref().map_or(true, |a| a.is_empty() || view.action == a)
            && contains(&view.method, &self.method)
            && contains(&view.result, &self.result)
    }
}
