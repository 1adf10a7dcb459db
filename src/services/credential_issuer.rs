// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Issues and revokes credential records and manages the issuer's queue of
//! issuance requests.
//!
//! Eligibility is decided by [`Issuer::issuance_block_reason`]: co-op
//! issuers need a verified domain (level 1), non-co-op issuers may always
//! issue but their records are marked `verified` pending external checks.
//! Co-op issuance is mirrored on chain before the record is stored.

use crate::blockchain::chain_client::ChainClient;
use crate::error::{ServiceError, ServiceResult};
use crate::models::audit::{actions, AuditFilter, AuditView, VerificationEvent};
use crate::models::credential::{
    CredentialFilter, CredentialRecord, CredentialStatus, IdCheckStatus, IssuanceRequest,
    IssueCredentialPayload, RecipientType, RequestStatus, RevocationEntry, Visibility,
};
use crate::models::issuer::Issuer;
use crate::storage::repository::{Repository, RepositoryState};
use crate::utils::address::{normalize, require_address};
use crate::utils::formatters::mask_cccd;
use crate::utils::ids::{placeholder_hash, unique_prefixed_id};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const ACTIVITY_LIMIT: usize = 5;

/// Credential record together with its verification events.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDetail {
    #[serde(flatten)]
    pub record: CredentialRecord,
    pub events: Vec<VerificationEvent>,
}

/// Dashboard counters for one issuer.
#[derive(Serialize, Debug, Clone, Default)]
pub struct IssuerOverview {
    pub pending: usize,
    pub issued: usize,
    pub active: usize,
    pub revoked: usize,
    pub activity: Vec<AuditView>,
}

/// Service for issuing, revoking and listing credential records
pub struct CredentialIssuer {
    repo: Arc<Repository>,
    chain: ChainClient,
}

/// Ids that belong to an issuer: the issuer itself, its records and its
/// submissions.
fn issuer_scope(state: &RepositoryState, issuer_id: &str) -> HashSet<String> {
    let mut scope: HashSet<String> = state
        .credentials
        .list()
        .into_iter()
        .filter(|r| r.issuer_id == issuer_id)
        .map(|r| r.record_id.clone())
        .collect();
    scope.extend(
        state
            .submissions
            .iter()
            .filter(|s| s.entity_id == issuer_id)
            .map(|s| s.submission_id.clone()),
    );
    scope.insert(issuer_id.to_string());
    scope
}

impl CredentialIssuer {
    /// Creates a new CredentialIssuer
    ///
    /// # Arguments
    /// * `repo` - Shared workflow state
    /// * `chain` - Client used to mirror co-op issuance on chain
    pub fn new(repo: Arc<Repository>, chain: ChainClient) -> Self {
        Self { repo, chain }
    }

    /// Issues a credential on behalf of `issuer_id`.
    ///
    /// # Arguments
    /// * `issuer_id` - Issuing organisation
    /// * `payload` - Recipient, type, level and optional hashes
    ///
    /// # Returns
    /// The stored record. Nothing is stored when any check or the chain
    /// call fails.
    ///
    /// # Errors
    /// - `IssuerNotEligible` when the issuer may not issue yet
    /// - `Validation` / `InvalidAddress` for an incomplete payload
    /// - `ExternalDependency` when the chain rejects a co-op issuance
    pub async fn issue_credential(&self, issuer_id: &str, payload: IssueCredentialPayload) -> ServiceResult<CredentialRecord> {
        let issuer_id = require_address(issuer_id)?;
        let credential_type = payload.credential_type.trim().to_string();
        if credential_type.is_empty() {
            return Err(ServiceError::Validation("credential type is required".to_string()));
        }
        let recipient_type = payload.recipient_type.unwrap_or(RecipientType::CandidateId);
        let owner = match recipient_type {
            RecipientType::CandidateId => {
                let candidate = payload
                    .candidate_id
                    .as_deref()
                    .ok_or_else(|| ServiceError::Validation("candidateId is required".to_string()))?;
                Some(require_address(candidate)?)
            }
            RecipientType::CccdHash => {
                if payload.cccd.is_none() && payload.cccd_hash_ref.is_none() {
                    return Err(ServiceError::Validation(
                        "cccd or cccdHashRef is required".to_string(),
                    ));
                }
                None
            }
        };

        let (issuer, issuer_verified, record_id) = {
            let state = self.repo.read().await;
            let issuer: Issuer = state.issuer(&issuer_id)?.clone();
            if let Some(reason) = issuer.issuance_block_reason() {
                return Err(ServiceError::IssuerNotEligible { issuer_id, reason });
            }
            let verified = issuer.issuer_verified || state.directory_verified(&issuer_id);
            (issuer, verified, state.new_record_id("REC"))
        };

        let data_hash = payload
            .data_hash
            .clone()
            .unwrap_or_else(|| placeholder_hash(&record_id));
        let (cccd_hash_ref, cccd_masked) = match recipient_type {
            RecipientType::CccdHash => (
                Some(
                    payload
                        .cccd_hash_ref
                        .clone()
                        .unwrap_or_else(|| placeholder_hash(&record_id)),
                ),
                Some(mask_cccd(payload.cccd.as_deref().unwrap_or("0000"))),
            ),
            RecipientType::CandidateId => (None, None),
        };

        let coop = issuer.is_coop();
        if coop {
            self.chain
                .issue_credential_by_coop_issuer(
                    &issuer_id,
                    &credential_type,
                    owner.as_deref(),
                    cccd_hash_ref.as_deref(),
                    &data_hash,
                )
                .await?;
        }

        let status = if coop {
            CredentialStatus::Issued
        } else {
            CredentialStatus::Verified
        };
        let record = CredentialRecord {
            record_id: record_id.clone(),
            issuer_id: issuer_id.clone(),
            issuer_name: issuer.org_name.clone(),
            issuer_verified,
            recipient_type,
            owner_candidate_id: owner,
            cccd_hash_ref,
            cccd_masked,
            credential_type,
            level: payload.level.trim().to_string(),
            issued_at: Utc::now(),
            expires_at: payload.expires_at,
            status,
            visibility: Visibility::Public,
            data_hash,
            internal_ref: payload.internal_ref.filter(|r| !r.trim().is_empty()),
            deposit_status: None,
            deposit_amount: 0,
            deposit_id: None,
            id_check_status: IdCheckStatus::NotRun,
            storage_ref: None,
            files: Vec::new(),
        };

        let mut state = self.repo.write().await;
        if state.credentials.contains_credential(&record_id) {
            return Err(ServiceError::Conflict(format!("record id {} already taken, retry", record_id)));
        }
        state.credentials.store_credential(record.clone());
        let method = match recipient_type {
            RecipientType::CccdHash => "Identity reference",
            RecipientType::CandidateId => "Platform user",
        };
        let (action, result) = if coop {
            (actions::ISSUED, "ISSUED")
        } else {
            (actions::EXTERNAL_VERIFY, "VERIFIED")
        };
        state.add_event(&record_id, action, method, result);
        info!("credential {} issued by {} ({:?})", record_id, issuer_id, status);
        Ok(record)
    }

    /// Revokes a record. Revocation is one-way; repeating it appends another
    /// history entry and event.
    ///
    /// # Errors
    /// `NotFound` for an unknown record.
    pub async fn revoke_credential(&self, record_id: &str, reason: &str, performed_by: &str) -> ServiceResult<CredentialRecord> {
        let reason = if reason.trim().is_empty() { "Other" } else { reason.trim() };
        let performed_by = if performed_by.trim().is_empty() {
            "System"
        } else {
            performed_by.trim()
        };
        let mut state = self.repo.write().await;
        let record = state
            .credentials
            .get_credential_mut(record_id)
            .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
        record.status = CredentialStatus::Revoked;
        let revoked = record.clone();
        state.add_revocation(RevocationEntry {
            record_id: record_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
            performed_by: performed_by.to_string(),
        });
        state.add_event(record_id, actions::REVOKED, "Portal", reason);
        info!("credential {} revoked by {}: {}", record_id, performed_by, reason);
        Ok(revoked)
    }

    /// Records issued by `issuer_id` (all issuers when `None`), newest first.
    /// An id that does not normalize matches nothing.
    pub async fn list_issued_credentials(&self, issuer_id: Option<&str>, filter: &CredentialFilter) -> Vec<CredentialRecord> {
        let issuer_id = issuer_id.map(normalize);
        let state = self.repo.read().await;
        state
            .credentials
            .list()
            .into_iter()
            .filter(|r| issuer_id.as_deref().map_or(true, |id| r.issuer_id == id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub async fn get_credential_detail(&self, record_id: &str) -> ServiceResult<CredentialDetail> {
        let state = self.repo.read().await;
        let record = state
            .credentials
            .get_credential(record_id)
            .ok_or_else(|| ServiceError::not_found("credential", record_id))?
            .clone();
        Ok(CredentialDetail {
            events: state.events_for(record_id),
            record,
        })
    }

    pub async fn get_revocation_history(&self, issuer_id: Option<&str>) -> Vec<RevocationEntry> {
        let state = self.repo.read().await;
        let scope = issuer_id.map(|id| issuer_scope(&state, &normalize(id)));
        state
            .revocations()
            .iter()
            .filter(|r| scope.as_ref().map_or(true, |s| s.contains(&r.record_id)))
            .cloned()
            .collect()
    }

    pub async fn overview(&self, issuer_id: &str) -> ServiceResult<IssuerOverview> {
        let issuer_id = require_address(issuer_id)?;
        let mut overview = IssuerOverview::default();
        {
            let state = self.repo.read().await;
            state.issuer(&issuer_id)?;
            for record in state.credentials.list().into_iter().filter(|r| r.issuer_id == issuer_id) {
                if record.is_revoked() {
                    overview.revoked += 1;
                } else {
                    overview.issued += 1;
                }
                if matches!(record.status, CredentialStatus::Issued | CredentialStatus::Verified) {
                    overview.active += 1;
                }
            }
            overview.pending = state
                .issuance_requests
                .iter()
                .filter(|r| r.issuer_id == issuer_id && r.status == RequestStatus::Pending)
                .count();
        }
        let mut activity = self.get_audit_logs(Some(&issuer_id), &AuditFilter::default()).await;
        activity.truncate(ACTIVITY_LIMIT);
        overview.activity = activity;
        Ok(overview)
    }

    /// Queues a request from a candidate for `issuer_id` to issue a credential.
    pub async fn create_issuance_request(
        &self,
        issuer_id: &str,
        candidate_id: &str,
        credential_type: &str,
        level: &str,
    ) -> ServiceResult<IssuanceRequest> {
        let issuer_id = require_address(issuer_id)?;
        let candidate_id = require_address(candidate_id)?;
        if credential_type.trim().is_empty() {
            return Err(ServiceError::Validation("credential type is required".to_string()));
        }
        let mut state = self.repo.write().await;
        state.issuer(&issuer_id)?;
        let request = IssuanceRequest {
            request_id: unique_prefixed_id("REQ", |id| state.issuance_requests.iter().any(|r| r.request_id == id)),
            issuer_id,
            candidate_id,
            credential_type: credential_type.trim().to_string(),
            level: level.trim().to_string(),
            submitted_at: Utc::now(),
            status: RequestStatus::Pending,
            reason: None,
        };
        state.issuance_requests.insert(0, request.clone());
        info!("issuance request {} queued for {}", request.request_id, request.issuer_id);
        Ok(request)
    }

    pub async fn list_requests(&self, issuer_id: &str) -> ServiceResult<Vec<IssuanceRequest>> {
        let issuer_id = require_address(issuer_id)?;
        let state = self.repo.read().await;
        Ok(state
            .issuance_requests
            .iter()
            .filter(|r| r.issuer_id == issuer_id)
            .cloned()
            .collect())
    }

    fn pending_request(state: &RepositoryState, issuer_id: &str, request_id: &str) -> ServiceResult<IssuanceRequest> {
        let request = state
            .issuance_requests
            .iter()
            .find(|r| r.request_id == request_id && r.issuer_id == issuer_id)
            .ok_or_else(|| ServiceError::not_found("issuance request", request_id))?;
        if request.status != RequestStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "request {} is already {:?}",
                request_id, request.status
            )));
        }
        Ok(request.clone())
    }

    fn set_request_status(state: &mut RepositoryState, request_id: &str, status: RequestStatus) {
        if let Some(target) = state.issuance_requests.iter_mut().find(|r| r.request_id == request_id) {
            target.status = status;
        }
    }

    /// Approves a pending request by issuing the credential it asks for.
    ///
    /// The request is marked approved before issuing, so a concurrent
    /// approval gets `Conflict`. It goes back to pending if issuance fails.
    pub async fn approve_request(&self, issuer_id: &str, request_id: &str) -> ServiceResult<CredentialRecord> {
        let issuer_id = require_address(issuer_id)?;
        let request = {
            let mut state = self.repo.write().await;
            let request = Self::pending_request(&state, &issuer_id, request_id)?;
            Self::set_request_status(&mut state, request_id, RequestStatus::Approved);
            request
        };
        let issued = self
            .issue_credential(
                &issuer_id,
                IssueCredentialPayload {
                    recipient_type: Some(RecipientType::CandidateId),
                    candidate_id: Some(request.candidate_id.clone()),
                    credential_type: request.credential_type.clone(),
                    level: request.level.clone(),
                    ..Default::default()
                },
            )
            .await;
        match issued {
            Ok(record) => {
                info!("issuance request {} approved as {}", request_id, record.record_id);
                Ok(record)
            }
            Err(e) => {
                let mut state = self.repo.write().await;
                Self::set_request_status(&mut state, request_id, RequestStatus::Pending);
                warn!("issuance request {} back to pending: {}", request_id, e);
                Err(e)
            }
        }
    }

    pub async fn reject_request(&self, issuer_id: &str, request_id: &str, reason: &str) -> ServiceResult<IssuanceRequest> {
        let issuer_id = require_address(issuer_id)?;
        let mut state = self.repo.write().await;
        Self::pending_request(&state, &issuer_id, request_id)?;
        let reason = if reason.trim().is_empty() { "Other" } else { reason.trim() };
        let target = state
            .issuance_requests
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| ServiceError::not_found("issuance request", request_id))?;
        target.status = RequestStatus::Rejected;
        target.reason = Some(reason.to_string());
        info!("issuance request {} rejected: {}", request_id, reason);
        Ok(target.clone())
    }

    /// Verification events and admin audit entries as one newest-first
    /// feed, scoped to `issuer_id` when given.
    pub async fn get_audit_logs(&self, issuer_id: Option<&str>, filter: &AuditFilter) -> Vec<AuditView> {
        let state = self.repo.read().await;
        let scope = issuer_id.map(|id| issuer_scope(&state, &normalize(id)));
        let in_scope = |target: &str| scope.as_ref().map_or(true, |s| s.contains(target));
        let mut logs: Vec<AuditView> = state
            .events()
            .iter()
            .filter(|e| in_scope(e.credential_id.as_str()))
            .map(AuditView::from)
            .chain(
                state
                    .audit_logs()
                    .iter()
                    .filter(|l| in_scope(l.target_id.as_str()))
                    .map(AuditView::from),
            )
            .filter(|view| filter.matches(view))
            .collect();
        logs.sort_by(|a, b| b.time.cmp(&a.time));
        logs
    }
}
