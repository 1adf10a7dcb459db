// src/services/admin_review.rs
//! Admin review queue for issuer legal submissions and recruiter
//! verification requests.
//!
//! Approving an issuer submission is one unit of work: the issuer is
//! raised to level 2, the directory flag is persisted, and every deposit
//! held against the issuer is refunded. If persisting or refunding fails,
//! the issuer, directory and submission are restored to their prior state
//! before the error is returned.

use crate::error::{ServiceError, ServiceResult};
use crate::models::audit::{actions, AuditLogEntry};
use crate::models::deposit::{DepositEntry, RefundSummary};
use crate::models::issuer::{IssuerDirectoryEntry, LegalProof};
use crate::models::submission::{
    FileRef, Recruiter, RoleType, Submission, SubmissionFilter, SubmissionStatus,
};
use crate::services::deposit_ledger::DepositLedger;
use crate::services::verifier::IssuerVerifier;
use crate::storage::repository::{Repository, RepositoryState};
use crate::utils::ids::{placeholder_hash, prefixed_id};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Approved submission plus the refunds it triggered.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    #[serde(flatten)]
    pub submission: Submission,
    pub refunds: usize,
    pub refund: Option<RefundSummary>,
}

pub struct AdminReview {
    repo: Arc<Repository>,
    verifier: Arc<IssuerVerifier>,
    deposits: Arc<DepositLedger>,
}

/// State touched by an issuer approval, captured for rollback.
struct ApprovalSnapshot {
    submission: Submission,
    issuer: crate::models::issuer::Issuer,
    directory: Vec<IssuerDirectoryEntry>,
}

impl ApprovalSnapshot {
    fn take(state: &RepositoryState, submission: &Submission) -> ServiceResult<Self> {
        Ok(Self {
            submission: submission.clone(),
            issuer: state.issuer(&submission.entity_id)?.clone(),
            directory: state.directory.clone(),
        })
    }

    fn restore(self, state: &mut RepositoryState) -> ServiceResult<()> {
        let ApprovalSnapshot { issuer, submission, directory } = self;
        let issuer_id = issuer.id.clone();
        let submission_id = submission.submission_id.clone();
        *state.issuer_mut(&issuer_id)? = issuer;
        *state.submission_mut(&submission_id)? = submission;
        state.directory = directory;
        Ok(())
    }
}

impl AdminReview {
    pub fn new(repo: Arc<Repository>, verifier: Arc<IssuerVerifier>, deposits: Arc<DepositLedger>) -> Self {
        Self {
            repo,
            verifier,
            deposits,
        }
    }

    pub async fn list_submissions(&self, filter: &SubmissionFilter) -> Vec<Submission> {
        let state = self.repo.read().await;
        state
            .submissions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    pub async fn get_submission(&self, submission_id: &str) -> ServiceResult<Submission> {
        Ok(self.repo.read().await.submission(submission_id)?.clone())
    }

    fn ensure_open(submission: &Submission) -> ServiceResult<()> {
        if submission.status.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "submission {} is already {:?}",
                submission.submission_id, submission.status
            )));
        }
        Ok(())
    }

    /// Approves a PENDING submission.
    ///
    /// For an issuer this raises it to level 2, marks it verified in the
    /// directory, refunds its deposits and refreshes the deposit state of
    /// its credential records. For a recruiter it marks the recruiter
    /// verified.
    ///
    /// # Errors
    /// - `NotFound` for an unknown submission or entity
    /// - `Conflict` when the submission is not PENDING, or the issuer has
    ///   not completed the domain step
    /// - storage errors from the refund, after rolling the approval back
    pub async fn approve_submission(&self, submission_id: &str) -> ServiceResult<ApprovalOutcome> {
        let mut state = self.repo.write().await;
        let submission = state.submission(submission_id)?.clone();
        Self::ensure_open(&submission)?;
        if submission.status != SubmissionStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "submission {} is waiting for the applicant to resubmit",
                submission_id
            )));
        }
        let proof = LegalProof {
            record_id: prefixed_id("LEGAL"),
            hash: placeholder_hash(submission_id),
        };

        let refund = match submission.role_type {
            RoleType::Issuer => Some(self.approve_issuer(&mut state, &submission, proof.clone()).await?),
            RoleType::Recruiter => {
                let recruiter = state
                    .recruiters
                    .get_mut(&submission.entity_id)
                    .ok_or_else(|| ServiceError::not_found("recruiter", &submission.entity_id))?;
                recruiter.verified = true;
                recruiter.proof_id = Some(proof.record_id.clone());
                Self::mark_approved(&mut state, submission_id, proof)?;
                None
            }
        };

        let role = format!("{:?}", submission.role_type).to_uppercase();
        state.add_audit_log("Admin", actions::APPROVED, submission_id, "approved", Some(role));
        let approved = state.submission(submission_id)?.clone();
        info!("submission {} approved", submission_id);
        Ok(ApprovalOutcome {
            submission: approved,
            refunds: refund.as_ref().map_or(0, |r| r.refunded_count),
            refund,
        })
    }

    fn mark_approved(state: &mut RepositoryState, submission_id: &str, proof: LegalProof) -> ServiceResult<()> {
        let submission = state.submission_mut(submission_id)?;
        submission.status = SubmissionStatus::Approved;
        submission.proof = Some(proof);
        Ok(())
    }

    async fn approve_issuer(
        &self,
        state: &mut RepositoryState,
        submission: &Submission,
        proof: LegalProof,
    ) -> ServiceResult<RefundSummary> {
        let issuer_id = submission.entity_id.as_str();
        let snapshot = ApprovalSnapshot::take(state, submission)?;

        IssuerVerifier::apply_legal_approval(state, issuer_id, proof.clone(), "approved")?;
        Self::mark_approved(state, &submission.submission_id, proof)?;

        let committed = match self.verifier.persist_directory(&state.directory).await {
            Ok(()) => self.deposits.refund_deposits_by_issuer(issuer_id).await,
            Err(e) => Err(e),
        };
        let summary = match committed {
            Ok(summary) => summary,
            Err(e) => {
                warn!("approval of {} rolled back: {}", submission.submission_id, e);
                snapshot.restore(state)?;
                if let Err(persist) = self.verifier.persist_directory(&state.directory).await {
                    warn!("restoring issuer directory failed: {}", persist);
                }
                state.add_audit_log(
                    "Admin",
                    actions::APPROVAL_ROLLED_BACK,
                    &submission.submission_id,
                    "rolled_back",
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        IssuerVerifier::record_refund(state, issuer_id, &summary);

        let ledger: HashMap<String, DepositEntry> = self
            .deposits
            .list()
            .await
            .unwrap_or_else(|e| {
                warn!("deposit ledger unreadable after refund: {}", e);
                Vec::new()
            })
            .into_iter()
            .filter_map(|d| d.credential_record_id.clone().map(|rid| (rid, d)))
            .collect();
        for record in state.credentials.issued_by_mut(issuer_id) {
            record.issuer_verified = true;
            if let Some(entry) = ledger.get(&record.record_id) {
                record.deposit_status = Some(entry.status);
                record.deposit_amount = entry.amount;
                record.deposit_id = Some(entry.id.clone());
            }
        }
        Ok(summary)
    }

    /// Rejects a submission. No deposits are refunded.
    pub async fn reject_submission(&self, submission_id: &str, reason: &str, note: &str) -> ServiceResult<Submission> {
        let reason = if reason.trim().is_empty() { "Rejected" } else { reason.trim() };
        let mut state = self.repo.write().await;
        let submission = state.submission_mut(submission_id)?;
        Self::ensure_open(submission)?;
        submission.status = SubmissionStatus::Rejected;
        submission.reason = Some(reason.to_string());
        submission.note = Some(if note.is_empty() {
            submission.notes.clone()
        } else {
            note.to_string()
        });
        let updated = submission.clone();
        if updated.role_type == RoleType::Issuer {
            IssuerVerifier::apply_legal_rejection(&mut state, &updated.entity_id, reason)?;
        }
        let note = (!note.is_empty()).then(|| note.to_string());
        state.add_audit_log("Admin", actions::REJECTED, submission_id, reason, note);
        info!("submission {} rejected: {}", submission_id, reason);
        Ok(updated)
    }

    /// Sends a submission back to the applicant for changes.
    pub async fn request_update(&self, submission_id: &str, note: &str) -> ServiceResult<Submission> {
        let note = if note.trim().is_empty() { "Needs update" } else { note.trim() };
        let mut state = self.repo.write().await;
        let submission = state.submission_mut(submission_id)?;
        Self::ensure_open(submission)?;
        submission.status = SubmissionStatus::NeedsUpdate;
        submission.note = Some(note.to_string());
        let updated = submission.clone();
        if updated.role_type == RoleType::Issuer {
            IssuerVerifier::apply_legal_needs_update(&mut state, &updated.entity_id, note)?;
        }
        state.add_audit_log("Admin", actions::NEEDS_UPDATE, submission_id, note, None);
        info!("submission {} needs update", submission_id);
        Ok(updated)
    }

    pub async fn list_admin_audit_logs(&self, target_id: Option<&str>) -> Vec<AuditLogEntry> {
        let state = self.repo.read().await;
        state
            .audit_logs()
            .iter()
            .filter(|log| target_id.map_or(true, |t| log.target_id == t))
            .cloned()
            .collect()
    }

    /// Queues a recruiter's verification documents for review, registering
    /// the recruiter on first submission.
    pub async fn submit_recruiter_verification(
        &self,
        recruiter_id: &str,
        org_name: &str,
        email: &str,
        files: Vec<FileRef>,
    ) -> ServiceResult<Submission> {
        let recruiter_id = recruiter_id.trim();
        let org_name = org_name.trim();
        if recruiter_id.is_empty() || org_name.is_empty() {
            return Err(ServiceError::Validation(
                "recruiter id and organisation name are required".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(ServiceError::Validation("at least one document is required".to_string()));
        }
        let mut state = self.repo.write().await;
        let recruiter = state
            .recruiters
            .entry(recruiter_id.to_string())
            .or_insert_with(|| Recruiter {
                id: recruiter_id.to_string(),
                org_name: org_name.to_string(),
                verified: false,
                proof_id: None,
            });
        if recruiter.verified {
            return Err(ServiceError::Conflict(format!("recruiter {} is already verified", recruiter_id)));
        }

        let open = state
            .open_submission_for(recruiter_id, RoleType::Recruiter)
            .map(|s| (s.submission_id.clone(), s.status));
        let submission = match open {
            Some((id, SubmissionStatus::Pending)) => {
                return Err(ServiceError::Conflict(format!("submission {} is already pending review", id)));
            }
            Some((id, _)) => {
                let submission = state.submission_mut(&id)?;
                submission.status = SubmissionStatus::Pending;
                submission.submitted_at = Utc::now();
                submission.files = files;
                submission.note = None;
                submission.clone()
            }
            None => {
                let submission = Submission {
                    submission_id: state.new_submission_id(),
                    entity_id: recruiter_id.to_string(),
                    entity_name: org_name.to_string(),
                    role_type: RoleType::Recruiter,
                    status: SubmissionStatus::Pending,
                    submitted_at: Utc::now(),
                    email: email.trim().to_string(),
                    files,
                    notes: "Submitted from recruiter portal".to_string(),
                    note: None,
                    reason: None,
                    proof: None,
                };
                state.add_submission(submission.clone());
                submission
            }
        };
        state.add_audit_log(
            org_name,
            actions::SUBMITTED_VERIFICATION,
            &submission.submission_id,
            "pending",
            None,
        );
        info!("recruiter {} submitted {}", recruiter_id, submission.submission_id);
        Ok(submission)
    }
}
