// src/models/issuer.rs
//! Issuer data model and its verification-level state.
//!
//! An issuer climbs from level 0 (no verification) to level 1 (domain
//! control proven over DNS, co-op issuers only) and level 2 (legal documents
//! approved by an admin). Non-co-op issuers skip the domain step.

use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Institution type. Co-op issuers must prove domain control before issuing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerType {
    #[serde(rename = "COOP", alias = "CO-OP")]
    Coop,
    #[serde(rename = "NON_COOP")]
    NonCoop,
}

/// Trust tier of an issuer, serialized as `0`, `1` or `2`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum VerificationLevel {
    #[default]
    None = 0,
    Domain = 1,
    Legal = 2,
}

impl From<VerificationLevel> for u8 {
    fn from(level: VerificationLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for VerificationLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VerificationLevel::None),
            1 => Ok(VerificationLevel::Domain),
            2 => Ok(VerificationLevel::Legal),
            other => Err(format!("verification level out of range: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    Unregistered,
}

/// Progress of the legal verification track.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LegalStatus {
    #[default]
    NotSubmitted,
    UnderReview,
    Approved,
    Rejected,
    NeedsUpdate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofMethod {
    Dns,
    Legal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStatus {
    Pending,
    Verified,
    Approved,
    Rejected,
    NeedsUpdate,
}

/// One entry of an issuer's proof list; at most one per [`ProofMethod`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    pub method: ProofMethod,
    pub proof_id: String,
    pub proof_hash: String,
    pub status: ProofStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Result of a successful DNS check.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsProof {
    pub record_id: String,
    pub domain_hash: String,
}

/// Proof attached to an approved legal submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegalProof {
    pub record_id: String,
    pub hash: String,
}

/// TXT record the issuer has to publish to prove domain control.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DnsChallenge {
    pub domain: String,
    pub host: String,
    pub value: String,
}

/// Issuer profile.
///
/// # Invariants
/// - `verification_level == Legal` implies `legal_proof.is_some()`
/// - a co-op issuer at `Domain` or above has `dns_proof.is_some()`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Issuer {
    pub id: String,
    pub org_name: String,
    /// `None` for unregistered profiles.
    pub issuer_type: Option<IssuerType>,
    pub verification_level: VerificationLevel,
    pub status: IssuerStatus,
    pub issuer_verified: bool,
    #[serde(default)]
    pub legal_status: LegalStatus,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, skip_serializing)]
    pub dns_token: Option<String>,
    #[serde(default)]
    pub dns_proof: Option<DnsProof>,
    #[serde(default)]
    pub legal_proof: Option<LegalProof>,
    #[serde(default)]
    pub proofs: Vec<ProofRecord>,
    #[serde(default)]
    pub last_submission_id: Option<String>,
    #[serde(default)]
    pub support_email: Option<String>,
}

impl Issuer {
    /// Freshly registered issuer at level 0.
    pub fn new(id: String, org_name: String, issuer_type: IssuerType) -> Self {
        Self {
            id,
            org_name,
            issuer_type: Some(issuer_type),
            verification_level: VerificationLevel::None,
            status: IssuerStatus::Active,
            issuer_verified: false,
            legal_status: LegalStatus::NotSubmitted,
            domain: None,
            dns_token: None,
            dns_proof: None,
            legal_proof: None,
            proofs: Vec::new(),
            last_submission_id: None,
            support_email: None,
        }
    }

    /// Placeholder profile returned for addresses with no registration.
    pub fn unregistered(id: String) -> Self {
        Self {
            org_name: "Unregistered Organization".to_string(),
            issuer_type: None,
            status: IssuerStatus::Unregistered,
            ..Self::new(id, String::new(), IssuerType::Coop)
        }
    }

    pub fn is_coop(&self) -> bool {
        self.issuer_type == Some(IssuerType::Coop)
    }

    /// Replaces the proof for `method`, keeping proofs of other methods.
    pub fn upsert_proof(&mut self, method: ProofMethod, proof_id: String, proof_hash: String, status: ProofStatus) {
        self.proofs.retain(|p| p.method != method);
        self.proofs.push(ProofRecord {
            method,
            proof_id,
            proof_hash,
            status,
            submitted_at: Utc::now(),
        });
    }

    pub fn proof(&self, method: ProofMethod) -> Option<&ProofRecord> {
        self.proofs.iter().find(|p| p.method == method)
    }

    /// Issuance rule: co-op issuers need level 1 or above, non-co-op issuers
    /// may always issue (records are marked verified pending external check).
    pub fn issuance_block_reason(&self) -> Option<String> {
        match self.status {
            IssuerStatus::Suspended => return Some("issuer is suspended".to_string()),
            IssuerStatus::Unregistered => return Some("issuer is not registered".to_string()),
            IssuerStatus::Active => {}
        }
        match self.issuer_type {
            Some(IssuerType::Coop) if self.verification_level < VerificationLevel::Domain => {
                Some("co-op issuers must verify their domain first".to_string())
            }
            Some(_) => None,
            None => Some("issuer type unknown".to_string()),
        }
    }

    /// Checks the level/proof invariants documented on the type.
    pub fn invariants_hold(&self) -> bool {
        let legal_ok = self.verification_level < VerificationLevel::Legal || self.legal_proof.is_some();
        let dns_ok = !self.is_coop()
            || self.verification_level < VerificationLevel::Domain
            || self.dns_proof.is_some();
        legal_ok && dns_ok
    }
}

/// Row of the persisted issuer directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IssuerDirectoryEntry {
    pub id: String,
    pub name: String,
    pub verified: bool,
}

/// What an issuer shows on its public trust page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustSettings {
    pub org_name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub support_contact: Option<String>,
    #[serde(default)]
    pub working_hours: Option<String>,
    #[serde(default)]
    pub sla: Option<String>,
    /// Hidden from the public directory until the issuer opts in.
    #[serde(default)]
    pub public: bool,
}

/// Partial update of [`TrustSettings`]. Absent fields keep their value; an
/// empty string clears an optional field.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrustSettingsUpdate {
    pub org_name: Option<String>,
    pub logo: Option<String>,
    pub website: Option<String>,
    pub policy: Option<String>,
    pub support_contact: Option<String>,
    pub working_hours: Option<String>,
    pub sla: Option<String>,
    pub public: Option<bool>,
}

fn cleared(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl TrustSettings {
    /// Starting point for an issuer that never saved its settings.
    pub fn defaults_for(issuer: &Issuer) -> Self {
        Self {
            org_name: issuer.org_name.clone(),
            logo: None,
            website: issuer.domain.as_ref().map(|d| format!("https://{}", d)),
            policy: String::new(),
            support_contact: issuer.support_email.clone(),
            working_hours: None,
            sla: None,
            public: false,
        }
    }

    /// Merges `update` into these settings.
    ///
    /// # Errors
    /// `Validation` for an empty organisation name or a website that is not
    /// an http(s) URL. Nothing is changed on error.
    pub fn apply(&mut self, update: TrustSettingsUpdate) -> ServiceResult<()> {
        let mut next = self.clone();
        if let Some(name) = update.org_name {
            next.org_name = cleared(name)
                .ok_or_else(|| ServiceError::Validation("organisation name is required".to_string()))?;
        }
        if let Some(website) = update.website {
            next.website = cleared(website);
            if let Some(url) = &next.website {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(ServiceError::Validation(format!("website must be an http(s) URL: {}", url)));
                }
            }
        }
        if let Some(policy) = update.policy {
            next.policy = policy.trim().to_string();
        }
        if let Some(logo) = update.logo {
            next.logo = cleared(logo);
        }
        if let Some(contact) = update.support_contact {
            next.support_contact = cleared(contact);
        }
        if let Some(hours) = update.working_hours {
            next.working_hours = cleared(hours);
        }
        if let Some(sla) = update.sla {
            next.sla = cleared(sla);
        }
        if let Some(public) = update.public {
            next.public = public;
        }
        *self = next;
        Ok(())
    }
}
