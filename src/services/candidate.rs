// src/services/candidate.rs
//! Candidate-facing workflow: the credential vault, external credential
//! uploads with their deposits, ID checks, CCCD claims and viewer access
//! requests. Also serves the public and recruiter views of a candidate.

use crate::blockchain::chain_client::ChainClient;
use crate::error::{ServiceError, ServiceResult};
use crate::models::access::{parse_duration, AccessRequest, AccessStatus};
use crate::models::audit::actions;
use crate::models::credential::{
    CredentialRecord, CredentialStatus, IdCheckStatus, RecipientType, Visibility,
};
use crate::models::deposit::{DepositEntry, DepositRequest};
use crate::models::submission::FileRef;
use crate::services::deposit_ledger::DepositLedger;
use crate::storage::repository::{Repository, RepositoryState};
use crate::utils::address::{normalize, require_address, short_address};
use crate::utils::formatters::status_variant;
use crate::utils::ids::{placeholder_hash, unique_prefixed_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Checks the identifier printed on an uploaded certificate.
#[async_trait]
pub trait IdChecker: Send + Sync {
    /// `true` when the certificate id matches the issuer's records.
    async fn check(&self, cert_id: &str) -> ServiceResult<bool>;
}

/// Stand-in checker that matches at a fixed probability.
pub struct RandomIdChecker {
    match_rate: f64,
}

impl RandomIdChecker {
    pub fn new(match_rate: f64) -> Self {
        Self {
            match_rate: match_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for RandomIdChecker {
    fn default() -> Self {
        Self::new(0.65)
    }
}

#[async_trait]
impl IdChecker for RandomIdChecker {
    async fn check(&self, _cert_id: &str) -> ServiceResult<bool> {
        Ok(rand::thread_rng().gen_bool(self.match_rate))
    }
}

/// Candidate upload of a credential from an issuer outside the platform flow.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCredentialPayload {
    pub candidate_id: String,
    pub issuer_id: String,
    #[serde(default)]
    pub issuer_name: Option<String>,
    /// Identifier printed on the certificate, used by the ID check.
    #[serde(default)]
    pub cert_id: Option<String>,
    /// When absent the record is bound to a CCCD reference until claimed.
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Deposit prepared earlier with [`CandidateService::prepare_external_deposit`].
    #[serde(default)]
    pub deposit_id: Option<String>,
    #[serde(default, rename = "type")]
    pub credential_type: Option<String>,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub storage_ref: Option<String>,
}

/// What a viewer sees when looking a candidate up.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub id: String,
    pub display_name: String,
    pub credentials: Vec<CredentialRecord>,
}

/// Row of a viewer's recent candidates list.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecentCandidate {
    pub id: String,
    pub display_name: String,
    /// `verified`, `pending` or `locked`.
    pub status: String,
    /// Badge variant for `status`.
    pub variant: String,
    pub last_action: DateTime<Utc>,
}

pub struct CandidateService {
    repo: Arc<Repository>,
    deposits: Arc<DepositLedger>,
    chain: ChainClient,
    id_checker: Arc<dyn IdChecker>,
}

impl CandidateService {
    pub fn new(
        repo: Arc<Repository>,
        deposits: Arc<DepositLedger>,
        chain: ChainClient,
        id_checker: Arc<dyn IdChecker>,
    ) -> Self {
        Self {
            repo,
            deposits,
            chain,
            id_checker,
        }
    }

    fn issuer_verified(state: &RepositoryState, issuer_id: &str) -> bool {
        state.directory_verified(issuer_id)
            || state.issuers.get(issuer_id).map_or(false, |i| i.issuer_verified)
    }

    fn apply_deposit(record: &mut CredentialRecord, entry: &DepositEntry) {
        record.deposit_status = Some(entry.status);
        record.deposit_amount = entry.amount;
        record.deposit_id = Some(entry.id.clone());
    }

    /// Candidate's records, newest first, with deposit fields refreshed
    /// from the ledger.
    pub async fn get_credentials(&self, candidate_id: &str) -> ServiceResult<Vec<CredentialRecord>> {
        let candidate = require_address(candidate_id)?;
        let ledger: HashMap<String, DepositEntry> = self
            .deposits
            .list()
            .await?
            .into_iter()
            .filter_map(|d| d.credential_record_id.clone().map(|rid| (rid, d)))
            .collect();

        let mut state = self.repo.write().await;
        let ids: Vec<String> = state
            .credentials
            .owned_by(&candidate)
            .into_iter()
            .map(|r| r.record_id.clone())
            .collect();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = state.credentials.get_credential_mut(&id) {
                if let Some(entry) = ledger.get(&id) {
                    Self::apply_deposit(record, entry);
                }
                records.push(record.clone());
            }
        }
        Ok(records)
    }

    /// Creates the REQUIRED deposit a candidate pays before uploading a
    /// credential from an unverified issuer. `None` when the issuer is
    /// already verified.
    pub async fn prepare_external_deposit(&self, candidate_id: &str, issuer_id: &str) -> ServiceResult<Option<DepositEntry>> {
        let candidate = require_address(candidate_id)?;
        let issuer = require_address(issuer_id)?;
        if Self::issuer_verified(&*self.repo.read().await, &issuer) {
            return Ok(None);
        }
        let entry = self
            .deposits
            .create_required_deposit(&candidate, &issuer, None)
            .await?;
        Ok(Some(entry))
    }

    /// Pays a deposit and mirrors the new status onto the linked record.
    pub async fn pay_deposit(&self, request: DepositRequest) -> ServiceResult<DepositEntry> {
        let mut state = self.repo.write().await;
        let paid = self.deposits.pay_deposit(request).await?;
        if let Some(record_id) = paid.credential_record_id.as_deref() {
            if let Some(record) = state.credentials.get_credential_mut(record_id) {
                Self::apply_deposit(record, &paid);
            }
        }
        Ok(paid)
    }

    /// Adds a credential uploaded by the candidate.
    ///
    /// A deposit passed in the payload is linked to the new record. Without
    /// one, a REQUIRED deposit is opened when the issuer is unverified.
    /// Records from unverified issuers start PENDING.
    ///
    /// # Errors
    /// - `InvalidAddress` for a bad candidate, issuer or wallet id
    /// - `NotFound` for an unknown deposit
    /// - `Conflict` when the deposit was taken from someone else or for
    ///   another issuer, is already refunded, or is linked to another record
    pub async fn add_external_credential(&self, payload: ExternalCredentialPayload) -> ServiceResult<CredentialRecord> {
        let candidate = require_address(&payload.candidate_id)?;
        let issuer_id = require_address(&payload.issuer_id)?;
        let wallet = payload
            .wallet_address
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .map(require_address)
            .transpose()?;

        let mut state = self.repo.write().await;
        let issuer_verified = Self::issuer_verified(&state, &issuer_id);
        let record_id = state.new_record_id("EXT");

        let deposit = match payload.deposit_id.as_deref() {
            Some(deposit_id) => {
                let entry = self.deposits.get_by_id(deposit_id).await?;
                let owner = normalize(&entry.candidate_address);
                let payer = match wallet.as_deref() {
                    Some(w) if w == owner => w,
                    _ => candidate.as_str(),
                };
                Some(
                    self.deposits
                        .link_deposit_to_credential(&entry.id, &record_id, payer, &issuer_id)
                        .await?,
                )
            }
            None if !issuer_verified => {
                let payer = wallet.as_deref().unwrap_or(&candidate);
                Some(
                    self.deposits
                        .create_required_deposit(payer, &issuer_id, Some(&record_id))
                        .await?,
                )
            }
            None => None,
        };

        let issuer_name = payload
            .issuer_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| state.issuers.get(&issuer_id).map(|i| i.org_name.clone()))
            .unwrap_or_else(|| short_address(&issuer_id));
        let (recipient_type, cccd_hash_ref) = match wallet {
            Some(_) => (RecipientType::CandidateId, None),
            None => (RecipientType::CccdHash, Some(format!("hash_cccd_{}", record_id))),
        };
        let status = if issuer_verified {
            CredentialStatus::Issued
        } else {
            CredentialStatus::Pending
        };

        let mut record = CredentialRecord {
            record_id: record_id.clone(),
            issuer_id,
            issuer_name,
            issuer_verified,
            recipient_type,
            owner_candidate_id: Some(candidate.clone()),
            cccd_hash_ref,
            cccd_masked: None,
            credential_type: payload
                .credential_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "External credential".to_string()),
            level: "N/A".to_string(),
            issued_at: Utc::now(),
            expires_at: None,
            status,
            visibility: Visibility::Private,
            data_hash: placeholder_hash(&record_id),
            internal_ref: payload.cert_id.filter(|c| !c.trim().is_empty()),
            deposit_status: None,
            deposit_amount: 0,
            deposit_id: None,
            id_check_status: IdCheckStatus::NotRun,
            storage_ref: payload
                .storage_ref
                .or_else(|| payload.file.as_ref().map(|f| f.url.clone()).filter(|u| !u.is_empty())),
            files: payload.file.into_iter().collect(),
        };
        if let Some(entry) = &deposit {
            Self::apply_deposit(&mut record, entry);
        }
        state.credentials.store_credential(record.clone());
        let result = if issuer_verified { "ISSUED" } else { "PENDING" };
        state.add_event(&record_id, actions::EXTERNAL_UPLOAD, "Candidate upload", result);
        info!("candidate {} uploaded {} ({})", candidate, record_id, result);
        Ok(record)
    }

    /// Runs the certificate ID check for one of the candidate's records.
    ///
    /// The record sits at CHECKING while the checker runs. A checker error
    /// puts it back to NOT_RUN.
    pub async fn run_id_check(&self, candidate_id: &str, record_id: &str) -> ServiceResult<CredentialRecord> {
        let candidate = require_address(candidate_id)?;
        let cert_id = {
            let mut state = self.repo.write().await;
            let record = state
                .credentials
                .get_credential_mut(record_id)
                .filter(|r| r.is_owned_by(&candidate))
                .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
            if record.id_check_status == IdCheckStatus::Checking {
                return Err(ServiceError::Conflict(format!("id check for {} already running", record_id)));
            }
            record.id_check_status = IdCheckStatus::Checking;
            record.internal_ref.clone().unwrap_or_else(|| record_id.to_string())
        };

        let outcome = self.id_checker.check(&cert_id).await;
        let mut state = self.repo.write().await;
        let record = state
            .credentials
            .get_credential_mut(record_id)
            .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
        let checked = match outcome {
            Ok(true) => IdCheckStatus::Matched,
            Ok(false) => IdCheckStatus::Unmatched,
            Err(e) => {
                warn!("id check for {} failed: {}", record_id, e);
                record.id_check_status = IdCheckStatus::NotRun;
                return Err(e);
            }
        };
        record.id_check_status = checked;
        let updated = record.clone();
        let result = format!("{:?}", updated.id_check_status).to_uppercase();
        state.add_event(record_id, actions::ID_CHECK, "Certificate ID", &result);
        Ok(updated)
    }

    /// Binds a CCCD-referenced record to the candidate once they prove the
    /// matching identity hash.
    pub async fn claim_credential_by_cccd(
        &self,
        record_id: &str,
        candidate_id: &str,
        cccd_hash: &str,
    ) -> ServiceResult<CredentialRecord> {
        let candidate = require_address(candidate_id)?;
        let cccd_hash = cccd_hash.trim();
        {
            let state = self.repo.read().await;
            let record = state
                .credentials
                .get_credential(record_id)
                .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
            Self::ensure_claimable(record, cccd_hash)?;
        }
        self.chain.claim_credential_by_cccd(record_id, cccd_hash).await?;

        let mut state = self.repo.write().await;
        let record = state
            .credentials
            .get_credential_mut(record_id)
            .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
        Self::ensure_claimable(record, cccd_hash)?;
        record.recipient_type = RecipientType::CandidateId;
        record.owner_candidate_id = Some(candidate.clone());
        record.cccd_hash_ref = None;
        let claimed = record.clone();
        state.add_event(record_id, actions::CLAIMED, "CCCD", "CLAIMED");
        info!("credential {} claimed by {}", record_id, candidate);
        Ok(claimed)
    }

    fn ensure_claimable(record: &CredentialRecord, cccd_hash: &str) -> ServiceResult<()> {
        if record.is_revoked() {
            return Err(ServiceError::Conflict(format!("credential {} is revoked", record.record_id)));
        }
        if record.recipient_type != RecipientType::CccdHash {
            return Err(ServiceError::Conflict(format!(
                "credential {} is already bound to a candidate",
                record.record_id
            )));
        }
        if cccd_hash.is_empty() || record.cccd_hash_ref.as_deref() != Some(cccd_hash) {
            return Err(ServiceError::Validation("identity hash does not match".to_string()));
        }
        Ok(())
    }

    /// Records a viewer's request to see one of the candidate's credentials.
    pub async fn request_access(
        &self,
        viewer_id: &str,
        viewer_name: &str,
        candidate_id: &str,
        record_id: &str,
        duration: &str,
    ) -> ServiceResult<AccessRequest> {
        let candidate = require_address(candidate_id)?;
        parse_duration(duration)?;
        let viewer_id = viewer_id.trim();
        if viewer_id.is_empty() {
            return Err(ServiceError::Validation("viewer id is required".to_string()));
        }
        let mut state = self.repo.write().await;
        state
            .credentials
            .get_credential(record_id)
            .filter(|r| r.is_owned_by(&candidate))
            .ok_or_else(|| ServiceError::not_found("credential", record_id))?;
        let request = AccessRequest {
            id: unique_prefixed_id("AR", |id| state.access_requests.iter().any(|r| r.id == id)),
            candidate_id: candidate,
            credential_record_id: record_id.to_string(),
            viewer_id: viewer_id.to_string(),
            viewer_name: if viewer_name.trim().is_empty() {
                viewer_id.to_string()
            } else {
                viewer_name.trim().to_string()
            },
            duration: duration.trim().to_string(),
            status: AccessStatus::Pending,
            requested_at: Utc::now(),
            expires_at: None,
        };
        state.access_requests.insert(0, request.clone());
        info!("{} requested access to {}", request.viewer_id, record_id);
        Ok(request)
    }

    /// Unlocks or rejects a request. Only the candidate who owns the
    /// credential may do this.
    pub async fn update_access_status(&self, actor_id: &str, request_id: &str, status: AccessStatus) -> ServiceResult<AccessRequest> {
        let actor = require_address(actor_id)?;
        if status == AccessStatus::Pending {
            return Err(ServiceError::Validation("access can only be unlocked or rejected".to_string()));
        }
        let mut state = self.repo.write().await;
        let request = state
            .access_requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| ServiceError::not_found("access request", request_id))?;
        if request.candidate_id != actor {
            return Err(ServiceError::Conflict(format!(
                "access request {} belongs to another candidate",
                request_id
            )));
        }
        request.expires_at = match status {
            AccessStatus::Unlocked => Some(Utc::now() + parse_duration(&request.duration)?),
            _ => None,
        };
        request.status = status;
        Ok(request.clone())
    }

    pub async fn list_access_requests(&self, candidate_id: &str) -> ServiceResult<Vec<AccessRequest>> {
        let candidate = require_address(candidate_id)?;
        let state = self.repo.read().await;
        Ok(state
            .access_requests
            .iter()
            .filter(|r| r.candidate_id == candidate)
            .cloned()
            .collect())
    }

    /// Live records of `candidate` that `viewer_id` may see: public ones,
    /// plus private ones the viewer holds an unexpired unlock for.
    fn visible_credentials(state: &RepositoryState, candidate: &str, viewer_id: Option<&str>) -> Vec<CredentialRecord> {
        let now = Utc::now();
        let unlocked: Vec<&str> = viewer_id
            .map(|viewer| {
                state
                    .access_requests
                    .iter()
                    .filter(|r| r.candidate_id == candidate && r.viewer_id == viewer && r.is_open_at(now))
                    .map(|r| r.credential_record_id.as_str())
                    .collect()
            })
            .unwrap_or_default();
        state
            .credentials
            .owned_by(candidate)
            .into_iter()
            .filter(|r| r.status.is_live())
            .filter(|r| r.visibility == Visibility::Public || unlocked.contains(&r.record_id.as_str()))
            .cloned()
            .collect()
    }

    fn display_name(candidate: &str) -> String {
        format!("Candidate {}...", &candidate[..6])
    }

    /// Looks a candidate up by id.
    ///
    /// Public live records are always visible. With a `viewer_id`, private
    /// records that viewer holds an unexpired unlock for are included too.
    pub async fn search_candidate(&self, query: &str, viewer_id: Option<&str>) -> ServiceResult<CandidateProfile> {
        let candidate = require_address(query)?;
        let state = self.repo.read().await;
        Ok(CandidateProfile {
            display_name: Self::display_name(&candidate),
            credentials: Self::visible_credentials(&state, &candidate, viewer_id),
            id: candidate,
        })
    }

    /// Credentials of one candidate as the given viewer may see them.
    pub async fn get_candidate_credentials(&self, candidate_id: &str, viewer_id: &str) -> ServiceResult<Vec<CredentialRecord>> {
        let candidate = require_address(candidate_id)?;
        let state = self.repo.read().await;
        Ok(Self::visible_credentials(&state, &candidate, Some(viewer_id)))
    }

    /// Candidates the viewer has asked about, most recent first.
    ///
    /// A candidate is `verified` while the viewer holds an unexpired unlock,
    /// `pending` while a request awaits an answer, and `locked` otherwise.
    pub async fn recent_candidates(&self, viewer_id: &str) -> ServiceResult<Vec<RecentCandidate>> {
        let viewer = viewer_id.trim();
        if viewer.is_empty() {
            return Err(ServiceError::Validation("viewer id is required".to_string()));
        }
        let now = Utc::now();
        let state = self.repo.read().await;
        let mut grouped: HashMap<&str, (DateTime<Utc>, bool, bool)> = HashMap::new();
        for request in state.access_requests.iter().filter(|r| r.viewer_id == viewer) {
            let row = grouped
                .entry(request.candidate_id.as_str())
                .or_insert((request.requested_at, false, false));
            row.0 = row.0.max(request.requested_at);
            row.1 |= request.is_open_at(now);
            row.2 |= request.status == AccessStatus::Pending;
        }
        let mut recent: Vec<RecentCandidate> = grouped
            .into_iter()
            .map(|(candidate, (last_action, unlocked, pending))| {
                let status = match (unlocked, pending) {
                    (true, _) => "verified",
                    (false, true) => "pending",
                    _ => "locked",
                };
                RecentCandidate {
                    id: candidate.to_string(),
                    display_name: Self::display_name(candidate),
                    status: status.to_string(),
                    variant: status_variant(status).to_string(),
                    last_action,
                }
            })
            .collect();
        recent.sort_by(|a, b| b.last_action.cmp(&a.last_action));
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deposit::DepositStatus;
    use crate::models::issuer::IssuerType;
    use crate::services::verifier::tests::{harness, Harness, ATLAS, GROWTH};

    const CANDIDATE: &str = "0x91ab23cc98ddee11223344556677889900aabbccddeeff001122334455667788";
    const VIEWER: &str = "recruiter-01";

    struct FixedIdChecker(ServiceResult<bool>);

    #[async_trait]
    impl IdChecker for FixedIdChecker {
        async fn check(&self, _cert_id: &str) -> ServiceResult<bool> {
            match &self.0 {
                Ok(matched) => Ok(*matched),
                Err(e) => Err(ServiceError::ExternalDependency(e.to_string())),
            }
        }
    }

    fn service_with(h: &Harness, checker: ServiceResult<bool>) -> CandidateService {
        CandidateService::new(
            h.repo.clone(),
            h.deposits.clone(),
            h.chain.clone(),
            Arc::new(FixedIdChecker(checker)),
        )
    }

    fn service(h: &Harness) -> CandidateService {
        service_with(h, Ok(true))
    }

    fn upload(wallet: Option<&str>) -> ExternalCredentialPayload {
        ExternalCredentialPayload {
            candidate_id: CANDIDATE.to_string(),
            issuer_id: GROWTH.to_string(),
            issuer_name: Some("GrowthCert".to_string()),
            cert_id: Some("GC-2024-0042".to_string()),
            wallet_address: wallet.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_external_credential_deposit_flow() {
        let h = harness();
        h.repo.seed_demo().await;
        let svc = service(&h);

        let record = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();
        assert!(record.record_id.starts_with("EXT-"));
        assert_eq!(record.status, CredentialStatus::Pending);
        assert_eq!(record.visibility, Visibility::Private);
        assert_eq!(record.recipient_type, RecipientType::CandidateId);
        assert_eq!(record.deposit_status, Some(DepositStatus::Required));
        assert_eq!(record.deposit_amount, 5);
        assert_eq!(record.id_check_status, IdCheckStatus::NotRun);

        let paid = svc
            .pay_deposit(DepositRequest {
                deposit_id: record.deposit_id.clone(),
                candidate_address: CANDIDATE.to_string(),
                issuer_id: GROWTH.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paid.status, DepositStatus::Paid);
        assert_eq!(h.balances.balance(CANDIDATE).await.unwrap(), 5);

        let vault = svc.get_credentials(CANDIDATE).await.unwrap();
        assert_eq!(vault.len(), 1);
        assert_eq!(vault[0].deposit_status, Some(DepositStatus::Paid));
        assert_eq!(vault[0].deposit_id, record.deposit_id);
    }

    #[tokio::test]
    async fn test_verified_issuer_needs_no_deposit() {
        let h = harness();
        h.repo.seed_demo().await;
        h.verifier.set_issuer_verified(GROWTH, true).await.unwrap();
        let svc = service(&h);

        assert!(svc.prepare_external_deposit(CANDIDATE, GROWTH).await.unwrap().is_none());
        let record = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();
        assert_eq!(record.status, CredentialStatus::Issued);
        assert!(record.deposit_id.is_none());
        assert!(h.deposits.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepared_deposit_is_linked_once() {
        let h = harness();
        let svc = service(&h);
        let prepared = svc.prepare_external_deposit(CANDIDATE, GROWTH).await.unwrap().unwrap();
        assert_eq!(prepared.status, DepositStatus::Required);

        let payload = ExternalCredentialPayload {
            deposit_id: Some(prepared.id.clone()),
            ..upload(Some(CANDIDATE))
        };
        let record = svc.add_external_credential(payload.clone()).await.unwrap();
        assert_eq!(record.deposit_id.as_deref(), Some(prepared.id.as_str()));
        assert_eq!(
            h.deposits.get_by_credential(&record.record_id).await.unwrap().unwrap().id,
            prepared.id
        );
        assert!(matches!(
            svc.add_external_credential(payload).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_deposit_cannot_be_attached() {
        let h = harness();
        let svc = service(&h);
        let outsider = "0x0000000000000000000000000000000000000000000000000000000000000042";
        let theirs = svc.prepare_external_deposit(outsider, GROWTH).await.unwrap().unwrap();
        let stolen = ExternalCredentialPayload {
            deposit_id: Some(theirs.id.clone()),
            ..upload(Some(CANDIDATE))
        };
        assert!(matches!(
            svc.add_external_credential(stolen).await,
            Err(ServiceError::Conflict(_))
        ));

        let own = svc.prepare_external_deposit(CANDIDATE, GROWTH).await.unwrap().unwrap();
        let wrong_issuer = ExternalCredentialPayload {
            issuer_id: ATLAS.to_string(),
            deposit_id: Some(own.id.clone()),
            ..upload(Some(CANDIDATE))
        };
        assert!(matches!(
            svc.add_external_credential(wrong_issuer).await,
            Err(ServiceError::Conflict(_))
        ));

        assert!(h.deposits.get_by_id(&theirs.id).await.unwrap().credential_record_id.is_none());
        assert!(h.deposits.get_by_id(&own.id).await.unwrap().credential_record_id.is_none());
        assert!(svc.get_credentials(CANDIDATE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_ids_are_rejected() {
        let h = harness();
        let svc = service(&h);
        let payload = ExternalCredentialPayload {
            candidate_id: "not-an-address".to_string(),
            ..upload(None)
        };
        assert!(matches!(
            svc.add_external_credential(payload).await,
            Err(ServiceError::InvalidAddress(_))
        ));
        assert!(matches!(
            svc.search_candidate("0xzz", None).await,
            Err(ServiceError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_id_check_outcomes() {
        let h = harness();
        let record = service(&h).add_external_credential(upload(Some(CANDIDATE))).await.unwrap();

        let checked = service_with(&h, Ok(false))
            .run_id_check(CANDIDATE, &record.record_id)
            .await
            .unwrap();
        assert_eq!(checked.id_check_status, IdCheckStatus::Unmatched);

        let failing = service_with(&h, Err(ServiceError::ExternalDependency("checker down".into())));
        assert!(failing.run_id_check(CANDIDATE, &record.record_id).await.is_err());
        let state = h.repo.read().await;
        assert_eq!(
            state.credentials.get_credential(&record.record_id).unwrap().id_check_status,
            IdCheckStatus::NotRun
        );
    }

    #[tokio::test]
    async fn test_id_check_requires_ownership() {
        let h = harness();
        let svc = service(&h);
        let record = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();
        let other = "0x0000000000000000000000000000000000000000000000000000000000000042";
        assert!(matches!(
            svc.run_id_check(other, &record.record_id).await,
            Err(ServiceError::NotFound { .. })
        ));
        let matched = svc.run_id_check(CANDIDATE, &record.record_id).await.unwrap();
        assert_eq!(matched.id_check_status, IdCheckStatus::Matched);
    }

    #[tokio::test]
    async fn test_claim_by_cccd() {
        let h = harness();
        let svc = service(&h);
        let record = svc.add_external_credential(upload(None)).await.unwrap();
        assert_eq!(record.recipient_type, RecipientType::CccdHash);
        let cccd_ref = record.cccd_hash_ref.clone().unwrap();
        assert_eq!(cccd_ref, format!("hash_cccd_{}", record.record_id));

        assert!(matches!(
            svc.claim_credential_by_cccd(&record.record_id, CANDIDATE, "hash_cccd_wrong").await,
            Err(ServiceError::Validation(_))
        ));
        let claimed = svc
            .claim_credential_by_cccd(&record.record_id, CANDIDATE, &cccd_ref)
            .await
            .unwrap();
        assert_eq!(claimed.recipient_type, RecipientType::CandidateId);
        assert_eq!(claimed.owner_candidate_id.as_deref(), Some(CANDIDATE));
        assert_eq!(h.gateway.calls().await.len(), 1);
        assert!(matches!(
            svc.claim_credential_by_cccd(&record.record_id, CANDIDATE, &cccd_ref).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_chain_failure_leaves_record_unbound() {
        let h = harness();
        let svc = service(&h);
        let record = svc.add_external_credential(upload(None)).await.unwrap();
        h.gateway.fail_on("claim_credential_by_cccd").await;
        let cccd_ref = record.cccd_hash_ref.clone().unwrap();
        assert!(svc
            .claim_credential_by_cccd(&record.record_id, CANDIDATE, &cccd_ref)
            .await
            .is_err());
        let state = h.repo.read().await;
        let stored = state.credentials.get_credential(&record.record_id).unwrap();
        assert_eq!(stored.recipient_type, RecipientType::CccdHash);
    }

    #[tokio::test]
    async fn test_access_request_lifecycle() {
        let h = harness();
        let svc = service(&h);
        let record = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();

        assert!(matches!(
            svc.request_access(VIEWER, "NovaHire", CANDIDATE, &record.record_id, "forever").await,
            Err(ServiceError::Validation(_))
        ));
        let request = svc
            .request_access(VIEWER, "NovaHire", CANDIDATE, &record.record_id, "24h")
            .await
            .unwrap();
        assert!(request.id.starts_with("AR-"));
        assert_eq!(request.status, AccessStatus::Pending);

        let outsider = "0x0000000000000000000000000000000000000000000000000000000000000042";
        assert!(matches!(
            svc.update_access_status(outsider, &request.id, AccessStatus::Unlocked).await,
            Err(ServiceError::Conflict(_))
        ));

        let hidden = svc.search_candidate(CANDIDATE, Some(VIEWER)).await.unwrap();
        assert!(hidden.credentials.is_empty());

        let unlocked = svc
            .update_access_status(CANDIDATE, &request.id, AccessStatus::Unlocked)
            .await
            .unwrap();
        assert_eq!(unlocked.status, AccessStatus::Unlocked);
        assert!(unlocked.expires_at.unwrap() > Utc::now());
        assert_eq!(svc.list_access_requests(CANDIDATE).await.unwrap().len(), 1);
        assert!(svc.list_access_requests(outsider).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_candidate_respects_visibility() {
        let h = harness();
        h.repo.seed_demo().await;
        h.verifier.set_issuer_verified(GROWTH, true).await.unwrap();
        let svc = service(&h);
        let record = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();

        let public = svc.search_candidate(&CANDIDATE.to_uppercase().replace("0X", "0x"), None).await.unwrap();
        assert_eq!(public.id, CANDIDATE);
        assert_eq!(public.display_name, "Candidate 0x91ab...");
        assert!(public.credentials.is_empty());

        let request = svc
            .request_access(VIEWER, "NovaHire", CANDIDATE, &record.record_id, "7d")
            .await
            .unwrap();
        svc.update_access_status(CANDIDATE, &request.id, AccessStatus::Unlocked)
            .await
            .unwrap();
        let viewer = svc.search_candidate(CANDIDATE, Some(VIEWER)).await.unwrap();
        assert_eq!(viewer.credentials.len(), 1);
        assert!(svc.search_candidate(CANDIDATE, Some("recruiter-02")).await.unwrap().credentials.is_empty());
    }

    #[tokio::test]
    async fn test_recent_candidates_and_viewer_credentials() {
        let h = harness();
        h.verifier
            .register_issuer(GROWTH, "GrowthCert", IssuerType::NonCoop)
            .await
            .unwrap();
        h.verifier.set_issuer_verified(GROWTH, true).await.unwrap();
        let svc = service(&h);
        let other = "0x0000000000000000000000000000000000000000000000000000000000000042";
        let mine = svc.add_external_credential(upload(Some(CANDIDATE))).await.unwrap();
        let theirs = svc
            .add_external_credential(ExternalCredentialPayload {
                candidate_id: other.to_string(),
                ..upload(Some(other))
            })
            .await
            .unwrap();

        assert!(svc.recent_candidates(VIEWER).await.unwrap().is_empty());
        let first = svc
            .request_access(VIEWER, "NovaHire", other, &theirs.record_id, "24h")
            .await
            .unwrap();
        svc.update_access_status(other, &first.id, AccessStatus::Rejected)
            .await
            .unwrap();
        let second = svc
            .request_access(VIEWER, "NovaHire", CANDIDATE, &mine.record_id, "24h")
            .await
            .unwrap();

        let recent = svc.recent_candidates(VIEWER).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, CANDIDATE);
        assert_eq!(recent[0].status, "pending");
        assert_eq!(recent[0].variant, "warning");
        assert_eq!(recent[0].last_action, second.requested_at);
        assert_eq!(recent[1].status, "locked");
        assert!(svc.get_candidate_credentials(CANDIDATE, VIEWER).await.unwrap().is_empty());

        svc.update_access_status(CANDIDATE, &second.id, AccessStatus::Unlocked)
            .await
            .unwrap();
        let recent = svc.recent_candidates(VIEWER).await.unwrap();
        assert_eq!(recent[0].status, "verified");
        assert_eq!(recent[0].variant, "success");
        let visible = svc.get_candidate_credentials(CANDIDATE, VIEWER).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].record_id, mine.record_id);
        assert!(svc.get_candidate_credentials(CANDIDATE, "recruiter-02").await.unwrap().is_empty());
        assert!(svc.recent_candidates("recruiter-02").await.unwrap().is_empty());
    }
}
