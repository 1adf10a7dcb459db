// src/storage/repository.rs
//! In-memory repository for issuers, credential records, requests,
//! submissions and the audit trail.
//!
//! All workflow state lives in one [`RepositoryState`] behind a
//! `tokio::sync::RwLock`. Services take the write guard for the duration
//! of a state transition, which makes each transition atomic with respect
//! to other callers. Collections are kept newest-first.

use crate::error::{ServiceError, ServiceResult};
use crate::models::access::AccessRequest;
use crate::models::audit::{AuditLogEntry, VerificationEvent};
use crate::models::credential::{IssuanceRequest, RequestStatus, RevocationEntry};
use crate::models::issuer::{Issuer, IssuerDirectoryEntry, IssuerType, TrustSettings, VerificationLevel};
use crate::models::submission::{
    ComplianceFile, FileRef, Recruiter, RoleType, Submission, SubmissionStatus,
};
use crate::utils::address::normalize;
use crate::utils::ids::unique_prefixed_id;
use crate::wallet::credential_storage::CredentialStorage;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default, Clone)]
pub struct RepositoryState {
    pub issuers: HashMap<String, Issuer>,
    pub directory: Vec<IssuerDirectoryEntry>,
    pub credentials: CredentialStorage,
    pub issuance_requests: Vec<IssuanceRequest>,
    pub access_requests: Vec<AccessRequest>,
    pub submissions: Vec<Submission>,
    pub compliance_files: Vec<ComplianceFile>,
    pub recruiters: HashMap<String, Recruiter>,
    /// Saved trust page settings, keyed by issuer id.
    pub trust_settings: HashMap<String, TrustSettings>,
    // Append-only; no mutable accessors.
    verification_events: Vec<VerificationEvent>,
    audit_logs: Vec<AuditLogEntry>,
    revocations: Vec<RevocationEntry>,
}

impl RepositoryState {
    pub fn issuer(&self, id: &str) -> ServiceResult<&Issuer> {
        self.issuers
            .get(id)
            .ok_or_else(|| ServiceError::not_found("issuer", id))
    }

    pub fn issuer_mut(&mut self, id: &str) -> ServiceResult<&mut Issuer> {
        self.issuers
            .get_mut(id)
            .ok_or_else(|| ServiceError::not_found("issuer", id))
    }

    pub fn submission(&self, id: &str) -> ServiceResult<&Submission> {
        self.submissions
            .iter()
            .find(|s| s.submission_id == id)
            .ok_or_else(|| ServiceError::not_found("submission", id))
    }

    pub fn submission_mut(&mut self, id: &str) -> ServiceResult<&mut Submission> {
        self.submissions
            .iter_mut()
            .find(|s| s.submission_id == id)
            .ok_or_else(|| ServiceError::not_found("submission", id))
    }

    /// Latest open (PENDING or NEEDS_UPDATE) submission for an entity.
    pub fn open_submission_for(&self, entity_id: &str, role_type: RoleType) -> Option<&Submission> {
        self.submissions.iter().find(|s| {
            s.entity_id == entity_id
                && s.role_type == role_type
                && matches!(s.status, SubmissionStatus::Pending | SubmissionStatus::NeedsUpdate)
        })
    }

    pub fn add_submission(&mut self, submission: Submission) {
        self.submissions.insert(0, submission);
    }

    pub fn new_submission_id(&self) -> String {
        unique_prefixed_id("SUB", |id| self.submissions.iter().any(|s| s.submission_id == id))
    }

    pub fn new_record_id(&self, prefix: &str) -> String {
        unique_prefixed_id(prefix, |id| self.credentials.contains_credential(id))
    }

    /// Sets the directory flag, inserting a row if the issuer is missing.
    pub fn set_directory_verified(&mut self, issuer_id: &str, name: &str, verified: bool) -> IssuerDirectoryEntry {
        match self.directory.iter_mut().find(|e| e.id == issuer_id) {
            Some(entry) => {
                entry.verified = verified;
                entry.clone()
            }
            None => {
                let entry = IssuerDirectoryEntry {
                    id: issuer_id.to_string(),
                    name: name.to_string(),
                    verified,
                };
                self.directory.push(entry.clone());
                entry
            }
        }
    }

    pub fn directory_verified(&self, issuer_id: &str) -> bool {
        self.directory
            .iter()
            .any(|e| e.id.eq_ignore_ascii_case(issuer_id) && e.verified)
    }

    pub fn add_event(&mut self, credential_id: &str, action: &str, method: &str, result: &str) -> VerificationEvent {
        let id = unique_prefixed_id("EV", |id| self.verification_events.iter().any(|e| e.id == id));
        let event = VerificationEvent {
            id,
            credential_id: credential_id.to_string(),
            action: action.to_string(),
            method: method.to_string(),
            result: result.to_string(),
            timestamp: Utc::now(),
        };
        self.verification_events.insert(0, event.clone());
        event
    }

    pub fn events(&self) -> &[VerificationEvent] {
        &self.verification_events
    }

    pub fn events_for(&self, credential_id: &str) -> Vec<VerificationEvent> {
        self.verification_events
            .iter()
            .filter(|e| e.credential_id == credential_id)
            .cloned()
            .collect()
    }

    pub fn add_audit_log(
        &mut self,
        actor: &str,
        action: &str,
        target_id: &str,
        result: &str,
        note: Option<String>,
    ) -> AuditLogEntry {
        let id = unique_prefixed_id("LOG", |id| self.audit_logs.iter().any(|l| l.id == id));
        let entry = AuditLogEntry {
            id,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            target_id: target_id.to_string(),
            result: result.to_string(),
            note,
        };
        self.audit_logs.insert(0, entry.clone());
        entry
    }

    pub fn audit_logs(&self) -> &[AuditLogEntry] {
        &self.audit_logs
    }

    pub fn add_revocation(&mut self, entry: RevocationEntry) {
        self.revocations.insert(0, entry);
    }

    pub fn revocations(&self) -> &[RevocationEntry] {
        &self.revocations
    }
}

/// Shared handle to the workflow state.
#[derive(Default)]
pub struct Repository {
    state: RwLock<RepositoryState>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RepositoryState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RepositoryState> {
        self.state.write().await
    }

    /// Loads a small demonstration data set: one co-op issuer with a
    /// verified domain, two non-co-op issuers, issuance requests and a
    /// pending legal submission.
    pub async fn seed_demo(&self) {
        let mut state = self.write().await;
        let now = Utc::now();

        let atlas_id = normalize("0xabc123abc123abc123abc123abc123abc123abc123abc123abc123abc12323ab");
        let mut atlas = Issuer::new(atlas_id.clone(), "Atlas University".to_string(), IssuerType::Coop);
        atlas.verification_level = VerificationLevel::Domain;
        atlas.domain = Some("atlas.edu".to_string());
        atlas.dns_proof = Some(crate::models::issuer::DnsProof {
            record_id: "DNS-7781".to_string(),
            domain_hash: "hash_dns_atlas_123".to_string(),
        });
        atlas.support_email = Some("support@atlas.edu".to_string());
        state.trust_settings.insert(
            atlas_id.clone(),
            TrustSettings {
                policy: "We only publish verification records after internal QA and consent.".to_string(),
                working_hours: Some("Mon-Fri, 9:00 - 18:00".to_string()),
                sla: Some("Responses under 24h".to_string()),
                public: true,
                ..TrustSettings::defaults_for(&atlas)
            },
        );
        state.issuers.insert(atlas_id.clone(), atlas);
        state.set_directory_verified(&atlas_id, "Atlas University", false);

        for (id, name) in [
            ("0x3103103103103103103103103103103103103103103103103103103103103103", "GrowthCert"),
            ("0x5025025025025025025025025025025025025025025025025025025025025025", "ComplianceHub"),
        ] {
            let id = normalize(id);
            state
                .issuers
                .insert(id.clone(), Issuer::new(id.clone(), name.to_string(), IssuerType::NonCoop));
            state.set_directory_verified(&id, name, false);
        }

        let candidate = normalize("0x91ab23cc98ddee11223344556677889900aabbccddeeff001122334455667788");
        state.issuance_requests = vec![
            IssuanceRequest {
                request_id: "REQ-9811".to_string(),
                issuer_id: atlas_id.clone(),
                candidate_id: candidate.clone(),
                credential_type: "Employment Verification".to_string(),
                level: "Level II".to_string(),
                submitted_at: now,
                status: RequestStatus::Pending,
                reason: None,
            },
            IssuanceRequest {
                request_id: "REQ-9812".to_string(),
                issuer_id: atlas_id.clone(),
                candidate_id: normalize("0xa7f9b45de3ffeeddccbbaa99887766554433221100ffeeddccbbaa9988776655"),
                credential_type: "Education Check".to_string(),
                level: "Level I".to_string(),
                submitted_at: now - Duration::days(1),
                status: RequestStatus::Approved,
                reason: None,
            },
        ];

        state.recruiters.insert(
            "recruiter-01".to_string(),
            Recruiter {
                id: "recruiter-01".to_string(),
                org_name: "NovaHire".to_string(),
                verified: false,
                proof_id: None,
            },
        );
        state.add_submission(Submission {
            submission_id: "SUB-1002".to_string(),
            entity_id: "recruiter-01".to_string(),
            entity_name: "NovaHire".to_string(),
            role_type: RoleType::Recruiter,
            status: SubmissionStatus::Pending,
            submitted_at: now - Duration::days(1),
            email: "trust@novahire.com".to_string(),
            files: vec![FileRef {
                name: "novahire-soc2.pdf".to_string(),
                url: "https://example.com/novahire-soc2.pdf".to_string(),
            }],
            notes: "SOC2 summary provided.".to_string(),
            note: None,
            reason: None,
            proof: None,
        });
        log::info!("seeded demo data: {} issuers", state.issuers.len());
    }
}
