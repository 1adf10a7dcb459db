// src/models/credential.rs
//! Issued credential record data model.
//!
//! A record is created on issuance (or when a candidate uploads an external
//! credential) and afterwards only changes through revocation, deposit
//! progress, ID checks and CCCD claims.

use super::deposit::DepositStatus;
use super::submission::FileRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who the credential is bound to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientType {
    /// A registered candidate, referenced by normalized candidate id.
    CandidateId,
    /// A hashed national id reference for recipients not yet on the platform.
    CccdHash,
}

/// Lifecycle status of a credential record. `Revoked` is terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    #[serde(alias = "ISSUED")]
    Issued,
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "PENDING")]
    Pending,
    #[serde(alias = "VERIFIED")]
    Verified,
    #[serde(alias = "REJECTED")]
    Rejected,
    #[serde(alias = "REVOKED")]
    Revoked,
}

impl CredentialStatus {
    /// Issued, active and verified records count as live.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CredentialStatus::Issued | CredentialStatus::Active | CredentialStatus::Verified
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Progress of the "ID on certificate" check for uploaded credentials.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdCheckStatus {
    #[default]
    NotRun,
    Checking,
    Matched,
    Unmatched,
}

/// An issued (or uploaded) credential record.
///
/// # Fields
/// - `record_id`: unique identifier, e.g. `REC-2481` or `EXT-1042`
/// - `recipient_type` with either `owner_candidate_id` or `cccd_hash_ref`
/// - `data_hash`: deterministic placeholder, not a cryptographic digest
/// - deposit fields mirror the deposit ledger entry for this record, if any
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub record_id: String,
    pub issuer_id: String,
    pub issuer_name: String,
    #[serde(default)]
    pub issuer_verified: bool,
    pub recipient_type: RecipientType,
    pub owner_candidate_id: Option<String>,
    pub cccd_hash_ref: Option<String>,
    pub cccd_masked: Option<String>,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub level: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
    pub visibility: Visibility,
    pub data_hash: String,
    #[serde(default)]
    pub internal_ref: Option<String>,
    #[serde(default)]
    pub deposit_status: Option<DepositStatus>,
    #[serde(default)]
    pub deposit_amount: u64,
    #[serde(default)]
    pub deposit_id: Option<String>,
    #[serde(default)]
    pub id_check_status: IdCheckStatus,
    #[serde(default)]
    pub storage_ref: Option<String>,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl CredentialRecord {
    pub fn is_revoked(&self) -> bool {
        self.status == CredentialStatus::Revoked
    }

    pub fn is_owned_by(&self, candidate_id: &str) -> bool {
        self.owner_candidate_id.as_deref() == Some(candidate_id)
    }
}

/// Input for issuing a credential.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct IssueCredentialPayload {
    #[serde(default)]
    pub recipient_type: Option<RecipientType>,
    /// Candidate id for `CANDIDATE_ID` recipients.
    #[serde(default)]
    pub candidate_id: Option<String>,
    /// Raw national id, only used to build the masked form.
    #[serde(default)]
    pub cccd: Option<String>,
    #[serde(default)]
    pub cccd_hash_ref: Option<String>,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub level: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_hash: Option<String>,
    #[serde(default)]
    pub internal_ref: Option<String>,
}

/// Append-only revocation history row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevocationEntry {
    pub record_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub performed_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A candidate's request asking an issuer to issue a credential.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRequest {
    pub request_id: String,
    pub issuer_id: String,
    pub candidate_id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub level: String,
    pub submitted_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Filter for listing issued credentials. Empty fields match everything.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFilter {
    pub status: Option<CredentialStatus>,
    pub recipient_type: Option<RecipientType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CredentialFilter {
    pub fn matches(&self, record: &CredentialRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.recipient_type.map_or(true, |r| record.recipient_type == r)
            && self.from.map_or(true, |from| record.issued_at >= from)
            && self.to.map_or(true, |to| record.issued_at <= to)
    }
}
