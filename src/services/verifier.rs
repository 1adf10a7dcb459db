// src/services/verifier.rs
//! Issuer Verification Service
//!
//! Drives an issuer through the verification ladder:
//! - level 0: registered, unverified
//! - level 1: domain control proven by a DNS TXT challenge (co-op issuers only)
//! - level 2: legal documents approved by an admin
//!
//! Every step that has an on-chain counterpart submits the chain call first
//! and only mutates local state once the call succeeds, so a chain failure
//! leaves the issuer untouched.
//!
//! The issuer directory (`id`, `name`, `verified`) is persisted under
//! [`DIRECTORY_KEY`] so verification flags survive restarts.

use crate::blockchain::chain_client::ChainClient;
use crate::error::{ServiceError, ServiceResult};
use crate::models::audit::actions;
use crate::models::deposit::RefundSummary;
use crate::models::issuer::{
    DnsChallenge, DnsProof, Issuer, IssuerDirectoryEntry, IssuerStatus, IssuerType, LegalProof,
    LegalStatus, ProofMethod, ProofStatus, TrustSettings, TrustSettingsUpdate, VerificationLevel,
};
use crate::models::submission::{
    ComplianceFile, ComplianceFileStatus, FileRef, RoleType, Submission, SubmissionStatus,
};
use crate::services::deposit_ledger::DepositLedger;
use crate::storage::kv_store::JsonStore;
use crate::storage::repository::{Repository, RepositoryState};
use crate::utils::address::require_address;
use crate::utils::ids::{placeholder_hash, prefixed_id, random_hex, unique_prefixed_id};
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;

pub const DIRECTORY_KEY: &str = "verifyme.issuers";

const DEFAULT_LEGAL_FILE: &str = "legal-pack.pdf";
const FALLBACK_LEGAL_EMAIL: &str = "legal@issuer.test";

/// Outcome of a DNS check. A mismatch is a normal result, not an error.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DnsCheck {
    Verified { issuer: Issuer },
    Mismatch { issuer: Issuer, reason: String },
    NotApplicable { reason: String },
}

/// Directory row and refund summary returned by [`IssuerVerifier::verify_issuer_and_refund`].
#[derive(Serialize, Debug, Clone)]
pub struct VerifiedIssuer {
    pub issuer: IssuerDirectoryEntry,
    pub refund: RefundSummary,
}

/// Service driving issuer registration and the DNS and legal verification steps
pub struct IssuerVerifier {
    repo: Arc<Repository>,
    chain: ChainClient,
    store: JsonStore,
    deposits: Arc<DepositLedger>,
}

impl IssuerVerifier {
    /// Creates a new IssuerVerifier
    ///
    /// # Arguments
    /// * `repo` - Shared workflow state
    /// * `chain` - Client submitting registry calls
    /// * `store` - Durable store holding the issuer directory
    /// * `deposits` - Ledger refunded when an issuer becomes verified
    pub fn new(repo: Arc<Repository>, chain: ChainClient, store: JsonStore, deposits: Arc<DepositLedger>) -> Self {
        Self {
            repo,
            chain,
            store,
            deposits,
        }
    }

    /// Merges the persisted directory into memory. Persisted rows win over
    /// seeded ones; issuer profiles pick up the stored verified flag.
    pub async fn restore_directory(&self) -> ServiceResult<usize> {
        let stored: Vec<IssuerDirectoryEntry> = self.store.retrieve_json(DIRECTORY_KEY).await?;
        let mut state = self.repo.write().await;
        for entry in &stored {
            state.set_directory_verified(&entry.id, &entry.name, entry.verified);
            if let Some(issuer) = state.issuers.get_mut(&entry.id) {
                issuer.issuer_verified = entry.verified;
            }
        }
        Ok(stored.len())
    }

    /// Writes the current directory to the durable store.
    pub async fn persist_directory(&self, directory: &[IssuerDirectoryEntry]) -> ServiceResult<()> {
        self.store.store_json(DIRECTORY_KEY, &directory).await
    }

    /// Registers an issuer on chain, then creates its level-0 profile.
    ///
    /// # Errors
    /// - `InvalidAddress` for a malformed issuer id
    /// - `Validation` for an empty organisation name
    /// - `Conflict` if the issuer is already registered
    /// - `ExternalDependency` if the chain rejects the registration
    pub async fn register_issuer(&self, address: &str, org_name: &str, issuer_type: IssuerType) -> ServiceResult<Issuer> {
        let id = require_address(address)?;
        let org_name = org_name.trim();
        if org_name.is_empty() {
            return Err(ServiceError::Validation("organisation name is required".to_string()));
        }
        let duplicate = || ServiceError::Conflict(format!("issuer {} is already registered", id));
        if self.repo.read().await.issuers.contains_key(&id) {
            return Err(duplicate());
        }

        self.chain.register_issuer(issuer_type).await?;

        let mut state = self.repo.write().await;
        if state.issuers.contains_key(&id) {
            return Err(duplicate());
        }
        let issuer = Issuer::new(id.clone(), org_name.to_string(), issuer_type);
        state.issuers.insert(id.clone(), issuer.clone());
        state.set_directory_verified(&id, org_name, false);
        state.add_audit_log(org_name, actions::ISSUER_REGISTERED, &id, "registered", None);
        self.persist_directory(&state.directory).await?;
        info!("issuer {} registered as {:?}", id, issuer_type);
        Ok(issuer)
    }

    /// Returns the issuer profile, or an `Unregistered` placeholder for ids
    /// with no registration.
    pub async fn get_issuer_profile(&self, address: &str) -> ServiceResult<Issuer> {
        let id = require_address(address)?;
        let state = self.repo.read().await;
        Ok(match state.issuers.get(&id) {
            Some(issuer) => {
                let mut profile = issuer.clone();
                profile.issuer_verified = issuer.issuer_verified || state.directory_verified(&id);
                profile
            }
            None => Issuer::unregistered(id),
        })
    }

    /// Stores `domain` and a fresh token, and returns the TXT record to publish.
    ///
    /// # Errors
    /// `Validation` for an empty domain or a non-co-op issuer.
    pub async fn start_dns_setup(&self, issuer_id: &str, domain: &str) -> ServiceResult<DnsChallenge> {
        let id = require_address(issuer_id)?;
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(ServiceError::Validation("domain is required".to_string()));
        }
        let mut state = self.repo.write().await;
        let issuer = state.issuer_mut(&id)?;
        if !issuer.is_coop() {
            return Err(ServiceError::Validation(
                "DNS verification is only required for co-op issuers".to_string(),
            ));
        }
        let token = format!("token_{}", random_hex(10));
        issuer.domain = Some(domain.to_string());
        issuer.dns_token = Some(token.clone());
        info!("dns challenge issued for {} on {}", id, domain);
        Ok(DnsChallenge {
            domain: domain.to_string(),
            host: format!("_verify.{}", domain),
            value: format!("verify={}", token),
        })
    }

    /// Checks `domain` against the configured one and, on an exact match,
    /// records the DNS proof and raises the issuer to at least level 1.
    pub async fn check_dns(&self, issuer_id: &str, domain: &str) -> ServiceResult<DnsCheck> {
        let id = require_address(issuer_id)?;
        let domain = domain.trim();
        {
            let state = self.repo.read().await;
            let issuer = state.issuer(&id)?;
            if !issuer.is_coop() {
                return Ok(DnsCheck::NotApplicable {
                    reason: "DNS verification is only for co-op issuers".to_string(),
                });
            }
            if issuer.domain.as_deref() != Some(domain) {
                return Ok(DnsCheck::Mismatch {
                    issuer: issuer.clone(),
                    reason: "Domain mismatch. Update domain and try again.".to_string(),
                });
            }
        }

        let proof = DnsProof {
            record_id: prefixed_id("DNS"),
            domain_hash: placeholder_hash(domain),
        };
        self.chain
            .request_dns_verification(&id, &proof.domain_hash)
            .await?;

        let mut state = self.repo.write().await;
        let issuer = state.issuer_mut(&id)?;
        if issuer.domain.as_deref() != Some(domain) {
            return Ok(DnsCheck::Mismatch {
                issuer: issuer.clone(),
                reason: "Domain changed during verification. Try again.".to_string(),
            });
        }
        issuer.upsert_proof(
            ProofMethod::Dns,
            proof.record_id.clone(),
            proof.domain_hash.clone(),
            ProofStatus::Verified,
        );
        issuer.verification_level = issuer.verification_level.max(VerificationLevel::Domain);
        issuer.dns_proof = Some(proof);
        issuer.status = IssuerStatus::Active;
        let verified = issuer.clone();
        state.add_event(&id, actions::DNS_CHECK, "DNS", "VERIFIED");
        info!("issuer {} domain {} verified", id, domain);
        Ok(DnsCheck::Verified { issuer: verified })
    }

    /// Queues the issuer's legal documents for admin review.
    ///
    /// A submission sent back with NEEDS_UPDATE is reopened as PENDING; a
    /// submission already PENDING is a conflict.
    pub async fn submit_legal_docs(&self, issuer_id: &str, files: Vec<FileRef>) -> ServiceResult<Issuer> {
        let id = require_address(issuer_id)?;
        let (submission_id, reopen) = {
            let state = self.repo.read().await;
            let issuer = state.issuer(&id)?;
            Self::ensure_legal_ready(issuer)?;
            match state.open_submission_for(&id, RoleType::Issuer) {
                Some(open) if open.status == SubmissionStatus::Pending => {
                    return Err(ServiceError::Conflict(format!(
                        "submission {} is already pending review",
                        open.submission_id
                    )));
                }
                Some(open) => (open.submission_id.clone(), true),
                None => (state.new_submission_id(), false),
            }
        };
        let legal_hash = placeholder_hash(&submission_id);
        self.chain.request_legal_verification(&id, &legal_hash).await?;

        let mut state = self.repo.write().await;
        let issuer = state.issuer(&id)?.clone();
        let files = if files.is_empty() {
            vec![FileRef {
                name: DEFAULT_LEGAL_FILE.to_string(),
                url: String::new(),
            }]
        } else {
            files
        };
        if reopen {
            let submission = state.submission_mut(&submission_id)?;
            submission.status = SubmissionStatus::Pending;
            submission.submitted_at = Utc::now();
            submission.files = files;
            submission.note = None;
        } else {
            state.add_submission(Submission {
                submission_id: submission_id.clone(),
                entity_id: id.clone(),
                entity_name: issuer.org_name.clone(),
                role_type: RoleType::Issuer,
                status: SubmissionStatus::Pending,
                submitted_at: Utc::now(),
                email: issuer
                    .support_email
                    .clone()
                    .unwrap_or_else(|| FALLBACK_LEGAL_EMAIL.to_string()),
                files,
                notes: "Submitted from issuer portal".to_string(),
                note: None,
                reason: None,
                proof: None,
            });
        }
        state.add_audit_log(&issuer.org_name, actions::SUBMITTED_LEGAL, &submission_id, "pending", None);

        let issuer = state.issuer_mut(&id)?;
        issuer.upsert_proof(ProofMethod::Legal, prefixed_id("LEGAL"), legal_hash, ProofStatus::Pending);
        issuer.legal_status = LegalStatus::UnderReview;
        issuer.last_submission_id = Some(submission_id.clone());
        info!("issuer {} submitted legal documents as {}", id, submission_id);
        Ok(issuer.clone())
    }

    fn ensure_legal_ready(issuer: &Issuer) -> ServiceResult<()> {
        if issuer.is_coop() && issuer.verification_level < VerificationLevel::Domain {
            return Err(ServiceError::Conflict(format!(
                "issuer {} must verify its domain before legal review",
                issuer.id
            )));
        }
        Ok(())
    }

    /// Raises the issuer to level 2 inside the caller's unit of work.
    pub fn apply_legal_approval(
        state: &mut RepositoryState,
        issuer_id: &str,
        proof: LegalProof,
        note: &str,
    ) -> ServiceResult<Issuer> {
        let issuer = state.issuer_mut(issuer_id)?;
        Self::ensure_legal_ready(issuer)?;
        issuer.verification_level = VerificationLevel::Legal;
        issuer.legal_status = LegalStatus::Approved;
        issuer.upsert_proof(
            ProofMethod::Legal,
            proof.record_id.clone(),
            proof.hash.clone(),
            ProofStatus::Approved,
        );
        issuer.legal_proof = Some(proof);
        issuer.issuer_verified = true;
        issuer.status = IssuerStatus::Active;
        let approved = issuer.clone();
        state.set_directory_verified(issuer_id, &approved.org_name, true);
        let result = if note.is_empty() { "approved" } else { note };
        state.add_audit_log("Admin", actions::LEGAL_APPROVED, issuer_id, result, None);
        info!("issuer {} legally verified", issuer_id);
        Ok(approved)
    }

    pub fn apply_legal_rejection(state: &mut RepositoryState, issuer_id: &str, reason: &str) -> ServiceResult<Issuer> {
        Self::apply_legal_outcome(
            state,
            issuer_id,
            LegalStatus::Rejected,
            ProofStatus::Rejected,
            actions::LEGAL_REJECTED,
            if reason.is_empty() { "rejected" } else { reason },
        )
    }

    pub fn apply_legal_needs_update(state: &mut RepositoryState, issuer_id: &str, note: &str) -> ServiceResult<Issuer> {
        Self::apply_legal_outcome(
            state,
            issuer_id,
            LegalStatus::NeedsUpdate,
            ProofStatus::NeedsUpdate,
            actions::LEGAL_UPDATE_REQUEST,
            if note.is_empty() { "needs_update" } else { note },
        )
    }

    fn apply_legal_outcome(
        state: &mut RepositoryState,
        issuer_id: &str,
        legal_status: LegalStatus,
        proof_status: ProofStatus,
        action: &str,
        result: &str,
    ) -> ServiceResult<Issuer> {
        let issuer = state.issuer_mut(issuer_id)?;
        issuer.legal_status = legal_status;
        let (proof_id, proof_hash) = match issuer.proof(ProofMethod::Legal) {
            Some(p) => (p.proof_id.clone(), p.proof_hash.clone()),
            None => (prefixed_id("LEGAL"), placeholder_hash(issuer_id)),
        };
        issuer.upsert_proof(ProofMethod::Legal, proof_id, proof_hash, proof_status);
        let updated = issuer.clone();
        state.add_audit_log("Admin", action, issuer_id, result, None);
        info!("issuer {} legal status -> {:?}", issuer_id, legal_status);
        Ok(updated)
    }

    /// Approves the issuer's latest submission without going through the
    /// admin queue. Local testing only.
    #[cfg(feature = "demo")]
    pub async fn approve_legal_demo(&self, issuer_id: &str) -> ServiceResult<Issuer> {
        let id = require_address(issuer_id)?;
        let mut state = self.repo.write().await;
        let submission_id = state.issuer(&id)?.last_submission_id.clone();
        let proof = LegalProof {
            record_id: prefixed_id("LEGAL"),
            hash: format!("hash_legal_{}", random_hex(8)),
        };
        let issuer = Self::apply_legal_approval(&mut state, &id, proof.clone(), "approved")?;
        if let Some(submission_id) = submission_id {
            if let Ok(submission) = state.submission_mut(&submission_id) {
                submission.status = SubmissionStatus::Approved;
                submission.proof = Some(proof);
            }
        }
        state.add_event(&id, actions::LEGAL_REVIEW, "Portal", "approved");
        self.persist_directory(&state.directory).await?;
        warn!("issuer {} approved through the demo shortcut", id);
        Ok(issuer)
    }

    pub async fn list_issuers(&self) -> Vec<IssuerDirectoryEntry> {
        self.repo.read().await.directory.clone()
    }

    /// Sets the verified flag on the directory row and the issuer profile.
    ///
    /// # Errors
    /// `NotFound` when the id is neither in the directory nor registered.
    pub async fn set_issuer_verified(&self, issuer_id: &str, verified: bool) -> ServiceResult<IssuerDirectoryEntry> {
        let id = require_address(issuer_id)?;
        let mut state = self.repo.write().await;
        let entry = Self::mark_verified(&mut state, &id, verified)?;
        self.persist_directory(&state.directory).await?;
        info!("issuer {} verified flag -> {}", id, verified);
        Ok(entry)
    }

    fn mark_verified(state: &mut RepositoryState, id: &str, verified: bool) -> ServiceResult<IssuerDirectoryEntry> {
        let name = match (state.directory.iter().find(|e| e.id == id), state.issuers.get(id)) {
            (Some(entry), _) => entry.name.clone(),
            (None, Some(issuer)) => issuer.org_name.clone(),
            (None, None) => return Err(ServiceError::not_found("issuer", id)),
        };
        let entry = state.set_directory_verified(id, &name, verified);
        if let Some(issuer) = state.issuers.get_mut(id) {
            issuer.issuer_verified = verified;
        }
        Ok(entry)
    }

    /// Marks the issuer verified and refunds the deposits held against it.
    ///
    /// Both steps run under the repository write lock. If persisting the
    /// directory or the refund fails, the directory row and the issuer flag
    /// go back to their prior values before the error is returned.
    pub async fn verify_issuer_and_refund(&self, issuer_id: &str) -> ServiceResult<VerifiedIssuer> {
        let id = require_address(issuer_id)?;
        let mut state = self.repo.write().await;
        let directory = state.directory.clone();
        let was_verified = state.issuers.get(&id).map(|i| i.issuer_verified);
        let issuer = Self::mark_verified(&mut state, &id, true)?;

        let refunded = match self.persist_directory(&state.directory).await {
            Ok(()) => self.deposits.refund_deposits_by_issuer(&id).await,
            Err(e) => Err(e),
        };
        match refunded {
            Ok(refund) => {
                Self::record_refund(&mut state, &id, &refund);
                info!("issuer {} verified, {} deposits refunded", id, refund.refunded_count);
                Ok(VerifiedIssuer { issuer, refund })
            }
            Err(e) => {
                state.directory = directory;
                if let (Some(flag), Some(profile)) = (was_verified, state.issuers.get_mut(&id)) {
                    profile.issuer_verified = flag;
                }
                if let Err(undo) = self.persist_directory(&state.directory).await {
                    error!("restoring directory for {} failed: {}", id, undo);
                }
                state.add_audit_log("Admin", actions::APPROVAL_ROLLED_BACK, &id, "verify_and_refund", Some(e.to_string()));
                warn!("verifying issuer {} rolled back: {}", id, e);
                Err(e)
            }
        }
    }

    /// Audits a refund run that moved or left pending any deposit.
    pub fn record_refund(state: &mut RepositoryState, issuer_id: &str, refund: &RefundSummary) {
        if refund.refunded_count == 0 && refund.pending_ids.is_empty() {
            return;
        }
        let note = (!refund.pending_ids.is_empty()).then(|| format!("pending: {}", refund.pending_ids.join(", ")));
        state.add_audit_log(
            "Admin",
            actions::DEPOSITS_REFUNDED,
            issuer_id,
            &format!("{} refunded, {} total", refund.refunded_count, refund.total_amount),
            note,
        );
    }

    /// Records compliance file metadata; the file body is stored elsewhere.
    pub async fn upload_compliance_file(&self, issuer_id: &str, name: &str, url: &str) -> ServiceResult<ComplianceFile> {
        let id = require_address(issuer_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("file name is required".to_string()));
        }
        let mut state = self.repo.write().await;
        state.issuer(&id)?;
        let file = ComplianceFile {
            id: unique_prefixed_id("FILE", |candidate| state.compliance_files.iter().any(|f| f.id == candidate)),
            issuer_id: id,
            name: name.to_string(),
            url: url.to_string(),
            status: ComplianceFileStatus::UnderReview,
            uploaded_at: Utc::now(),
        };
        state.compliance_files.insert(0, file.clone());
        Ok(file)
    }

    /// Saved trust page settings, or defaults derived from the profile.
    pub async fn get_trust_settings(&self, issuer_id: &str) -> ServiceResult<TrustSettings> {
        let id = require_address(issuer_id)?;
        let state = self.repo.read().await;
        let issuer = state.issuer(&id)?;
        Ok(state
            .trust_settings
            .get(&id)
            .cloned()
            .unwrap_or_else(|| TrustSettings::defaults_for(issuer)))
    }

    pub async fn update_trust_settings(&self, issuer_id: &str, update: TrustSettingsUpdate) -> ServiceResult<TrustSettings> {
        let id = require_address(issuer_id)?;
        let mut state = self.repo.write().await;
        let issuer = state.issuer(&id)?;
        let mut settings = state
            .trust_settings
            .get(&id)
            .cloned()
            .unwrap_or_else(|| TrustSettings::defaults_for(issuer));
        settings.apply(update)?;
        state.trust_settings.insert(id.clone(), settings.clone());
        let visibility = if settings.public { "public" } else { "private" };
        state.add_audit_log(&settings.org_name, actions::TRUST_UPDATED, &id, visibility, None);
        info!("issuer {} trust settings saved ({})", id, visibility);
        Ok(settings)
    }

    /// Trust page as seen by anyone. Issuers that have not made their page
    /// public are reported as not found.
    pub async fn public_trust_settings(&self, issuer_id: &str) -> ServiceResult<TrustSettings> {
        let id = require_address(issuer_id)?;
        self.repo
            .read()
            .await
            .trust_settings
            .get(&id)
            .filter(|t| t.public)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("trust page", id))
    }

    pub async fn list_compliance_files(&self, issuer_id: &str) -> ServiceResult<Vec<ComplianceFile>> {
        let id = require_address(issuer_id)?;
        let state = self.repo.read().await;
        Ok(state
            .compliance_files
            .iter()
            .filter(|f| f.issuer_id == id)
            .cloned()
            .collect())
    }
}
