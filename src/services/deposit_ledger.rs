// src/services/deposit_ledger.rs
//! Deposit ledger.
//!
//! Candidates who submit a credential from an issuer that is not yet
//! verified pay a refundable deposit. The whole ledger is persisted as one
//! JSON array under [`LEDGER_KEY`]; every read-modify-write cycle runs under
//! a single mutex so concurrent payments cannot both observe `REQUIRED`.
//!
//! Lifecycle: `REQUIRED -> PAID -> REFUND_PENDING -> REFUNDED`.

use crate::error::{ServiceError, ServiceResult};
use crate::models::deposit::{DepositEntry, DepositRequest, DepositStatus, RefundSummary};
use crate::storage::kv_store::JsonStore;
use crate::utils::address::{normalize, require_address};
use crate::utils::ids::token_id;
use crate::wallet::balance::BalanceStore;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const LEDGER_KEY: &str = "verifyme.deposits";

pub struct DepositLedger {
    store: JsonStore,
    balances: Arc<BalanceStore>,
    /// Charged for every new deposit.
    deposit_amount: u64,
    lock: Mutex<()>,
}

fn signed(amount: u64) -> ServiceResult<i64> {
    i64::try_from(amount).map_err(|_| ServiceError::Validation(format!("amount out of range: {}", amount)))
}

impl DepositLedger {
    pub fn new(store: JsonStore, balances: Arc<BalanceStore>, deposit_amount: u64) -> Self {
        Self {
            store,
            balances,
            deposit_amount,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> ServiceResult<Vec<DepositEntry>> {
        self.store.retrieve_json(LEDGER_KEY).await
    }

    async fn persist(&self, ledger: &[DepositEntry]) -> ServiceResult<()> {
        self.store.store_json(LEDGER_KEY, &ledger).await
    }

    /// All ledger entries in creation order.
    pub async fn list(&self) -> ServiceResult<Vec<DepositEntry>> {
        self.load().await
    }

    pub async fn get_by_id(&self, deposit_id: &str) -> ServiceResult<DepositEntry> {
        self.load()
            .await?
            .into_iter()
            .find(|d| d.id == deposit_id)
            .ok_or_else(|| ServiceError::not_found("deposit", deposit_id))
    }

    /// Entry linked to a credential record, if any.
    pub async fn get_by_credential(&self, record_id: &str) -> ServiceResult<Option<DepositEntry>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|d| d.credential_record_id.as_deref() == Some(record_id)))
    }

    fn required_entry(&self, candidate: String, issuer_id: String, record_id: Option<&str>) -> DepositEntry {
        DepositEntry {
            id: token_id("dep"),
            candidate_address: candidate,
            issuer_id,
            credential_record_id: record_id.map(str::to_string),
            amount: self.deposit_amount,
            status: DepositStatus::Required,
            created_at: Utc::now(),
            paid_at: None,
            refunded_at: None,
        }
    }

    /// Creates a `REQUIRED` deposit of the configured amount. Idempotent per
    /// credential record id: an existing entry for the same record is
    /// returned unchanged.
    ///
    /// # Errors
    /// `InvalidAddress` when the candidate or issuer id does not normalize.
    pub async fn create_required_deposit(
        &self,
        candidate_address: &str,
        issuer_id: &str,
        record_id: Option<&str>,
    ) -> ServiceResult<DepositEntry> {
        let candidate = require_address(candidate_address)?;
        let issuer = require_address(issuer_id)?;
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;
        if let Some(record_id) = record_id {
            if let Some(existing) = ledger.iter().find(|d| d.credential_record_id.as_deref() == Some(record_id)) {
                return Ok(existing.clone());
            }
        }
        let entry = self.required_entry(candidate, issuer, record_id);
        ledger.push(entry.clone());
        self.persist(&ledger).await?;
        info!("deposit {} required from {} for issuer {}", entry.id, entry.candidate_address, entry.issuer_id);
        Ok(entry)
    }

    /// Checks that an existing entry may be paid by `request`.
    fn ensure_payable(entry: &DepositEntry, candidate: &str, issuer: Option<&str>, record_id: Option<&str>) -> ServiceResult<()> {
        if entry.status != DepositStatus::Required {
            return Err(ServiceError::Conflict(format!(
                "deposit {} is {:?}, not payable",
                entry.id, entry.status
            )));
        }
        if entry.candidate_address != candidate {
            return Err(ServiceError::Conflict(format!(
                "deposit {} belongs to another candidate",
                entry.id
            )));
        }
        if issuer.map_or(false, |issuer| !entry.belongs_to_issuer(issuer)) {
            return Err(ServiceError::Conflict(format!(
                "deposit {} is held for another issuer",
                entry.id
            )));
        }
        match (entry.credential_record_id.as_deref(), record_id) {
            (Some(linked), Some(requested)) if linked != requested => Err(ServiceError::Conflict(format!(
                "deposit {} already belongs to {}",
                entry.id, linked
            ))),
            _ => Ok(()),
        }
    }

    /// Debits the candidate and marks the deposit `PAID`.
    ///
    /// The entry is looked up by `deposit_id`, then by credential record id,
    /// and created with the configured amount when neither is given or
    /// matches. Existing entries are always charged their recorded amount.
    /// Nothing is written if the debit fails. If persisting fails after the
    /// debit, the debit is reversed.
    ///
    /// # Errors
    /// - `InvalidAddress` for a bad candidate or issuer id
    /// - `NotFound` for an unknown `deposit_id`
    /// - `Validation` when a new deposit has no issuer
    /// - `Conflict` when the deposit is not `REQUIRED` or belongs to another
    ///   candidate, issuer or record
    /// - `InsufficientBalance` when the candidate cannot cover the amount
    pub async fn pay_deposit(&self, request: DepositRequest) -> ServiceResult<DepositEntry> {
        let candidate = require_address(&request.candidate_address)?;
        let issuer = match request.issuer_id.trim() {
            "" => None,
            raw => Some(require_address(raw)?),
        };
        let record_id = request.credential_record_id.as_deref();
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;

        let existing = match request.deposit_id.as_deref() {
            Some(id) => Some(
                ledger
                    .iter()
                    .position(|d| d.id == id)
                    .ok_or_else(|| ServiceError::not_found("deposit", id))?,
            ),
            None => record_id.and_then(|rid| ledger.iter().position(|d| d.credential_record_id.as_deref() == Some(rid))),
        };
        let idx = match existing {
            Some(idx) => {
                Self::ensure_payable(&ledger[idx], &candidate, issuer.as_deref(), record_id)?;
                idx
            }
            None => {
                let issuer = issuer
                    .ok_or_else(|| ServiceError::Validation("issuer id is required for a new deposit".to_string()))?;
                ledger.push(self.required_entry(candidate.clone(), issuer, record_id));
                ledger.len() - 1
            }
        };

        let amount = ledger[idx].amount;
        let delta = signed(amount)?;
        self.balances.adjust(&candidate, -delta).await?;

        let entry = &mut ledger[idx];
        if entry.credential_record_id.is_none() {
            entry.credential_record_id = request.credential_record_id.clone();
        }
        entry.status = DepositStatus::Paid;
        entry.paid_at = Some(Utc::now());
        let paid = entry.clone();

        if let Err(e) = self.persist(&ledger).await {
            warn!("deposit {} not recorded, reversing debit of {}: {}", paid.id, amount, e);
            if let Err(undo) = self.balances.adjust(&candidate, delta).await {
                error!("reversing debit for {} failed: {}", candidate, undo);
            }
            return Err(e);
        }
        info!("deposit {} paid by {} ({})", paid.id, candidate, amount);
        Ok(paid)
    }

    /// Attaches a deposit to a new credential record.
    ///
    /// Only a `REQUIRED` or `PAID` deposit taken from `candidate_address`
    /// for `issuer_id` and not yet linked elsewhere can be attached.
    ///
    /// # Errors
    /// - `NotFound` for an unknown deposit
    /// - `Conflict` for a deposit owned by another candidate or issuer, one
    ///   already refunded, or one linked to another record
    pub async fn link_deposit_to_credential(
        &self,
        deposit_id: &str,
        record_id: &str,
        candidate_address: &str,
        issuer_id: &str,
    ) -> ServiceResult<DepositEntry> {
        let candidate = require_address(candidate_address)?;
        let issuer = require_address(issuer_id)?;
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;
        let entry = ledger
            .iter_mut()
            .find(|d| d.id == deposit_id)
            .ok_or_else(|| ServiceError::not_found("deposit", deposit_id))?;
        let conflict = |why: &str| Err(ServiceError::Conflict(format!("deposit {} {}", deposit_id, why)));
        if normalize(&entry.candidate_address) != candidate {
            return conflict("belongs to another candidate");
        }
        if !entry.belongs_to_issuer(&issuer) {
            return conflict("is held for another issuer");
        }
        if !matches!(entry.status, DepositStatus::Required | DepositStatus::Paid) {
            return conflict("has already been refunded");
        }
        match entry.credential_record_id.as_deref() {
            Some(linked) if linked != record_id => return conflict(&format!("already belongs to {}", linked)),
            Some(_) => return Ok(entry.clone()),
            None => {}
        }
        entry.credential_record_id = Some(record_id.to_string());
        let linked = entry.clone();
        self.persist(&ledger).await?;
        Ok(linked)
    }

    /// Refunds every paid deposit held for `issuer_id`.
    ///
    /// Targets move to `REFUND_PENDING` and are persisted before any
    /// balance is credited. Each entry is then credited and persisted as
    /// `REFUNDED` on its own; if that write fails the credit is reversed, so
    /// an entry still at `REFUND_PENDING` has never been paid back and the
    /// next run for the issuer picks it up again. A credit failure keeps its
    /// entry pending and lists it in [`RefundSummary::pending_ids`].
    ///
    /// # Errors
    /// `InvalidAddress` for a bad issuer id, and storage failures. Individual
    /// credit failures are reported in the summary.
    pub async fn refund_deposits_by_issuer(&self, issuer_id: &str) -> ServiceResult<RefundSummary> {
        let issuer = require_address(issuer_id)?;
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;
        let targets: Vec<usize> = ledger
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.belongs_to_issuer(&issuer) && matches!(d.status, DepositStatus::Paid | DepositStatus::RefundPending)
            })
            .map(|(i, _)| i)
            .collect();
        let mut summary = RefundSummary::default();
        if targets.is_empty() {
            return Ok(summary);
        }

        for &i in &targets {
            ledger[i].status = DepositStatus::RefundPending;
        }
        self.persist(&ledger).await?;

        for &i in &targets {
            let delta = match signed(ledger[i].amount) {
                Ok(delta) => delta,
                Err(e) => {
                    warn!("refund of deposit {} stays pending: {}", ledger[i].id, e);
                    summary.pending_ids.push(ledger[i].id.clone());
                    continue;
                }
            };
            let candidate = ledger[i].candidate_address.clone();
            if let Err(e) = self.balances.adjust(&candidate, delta).await {
                warn!("refund of deposit {} stays pending: {}", ledger[i].id, e);
                summary.pending_ids.push(ledger[i].id.clone());
                continue;
            }

            ledger[i].status = DepositStatus::Refunded;
            ledger[i].refunded_at = Some(Utc::now());
            if let Err(e) = self.persist(&ledger).await {
                ledger[i].status = DepositStatus::RefundPending;
                ledger[i].refunded_at = None;
                warn!("deposit {} refund not recorded, reversing credit: {}", ledger[i].id, e);
                if let Err(undo) = self.balances.adjust(&candidate, -delta).await {
                    error!("reversing refund credit for {} failed: {}", candidate, undo);
                }
                return Err(e);
            }
            summary.refunded_count += 1;
            summary.total_amount += ledger[i].amount;
            if !summary.affected_candidates.contains(&candidate) {
                summary.affected_candidates.push(candidate);
            }
        }
        info!(
            "refunded {} deposits ({} credits) for issuer {}, {} pending",
            summary.refunded_count,
            summary.total_amount,
            issuer,
            summary.pending_ids.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv_store::testing::FlakyKv;

    const CANDIDATE: &str = "0x91ab23cc98ddee11223344556677889900aabbccddeeff001122334455667788";
    const OTHER_CANDIDATE: &str = "0x0000000000000000000000000000000000000000000000000000000000000042";
    const ISSUER: &str = "0xabc123abc123abc123abc123abc123abc123abc123abc123abc123abc12323ab";

    fn ledger_on(store: JsonStore) -> (DepositLedger, Arc<BalanceStore>) {
        let balances = Arc::new(BalanceStore::new(store.clone(), 10));
        (DepositLedger::new(store, balances.clone(), 5), balances)
    }

    fn ledger() -> (DepositLedger, Arc<BalanceStore>) {
        ledger_on(JsonStore::in_memory())
    }

    fn pay(record_id: &str) -> DepositRequest {
        DepositRequest {
            candidate_address: CANDIDATE.to_string(),
            issuer_id: ISSUER.to_string(),
            credential_record_id: Some(record_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_required_is_idempotent_per_record() {
        let (ledger, _) = ledger();
        let first = ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1001"))
            .await
            .unwrap();
        let second = ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1001"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.amount, 5);
        assert_eq!(ledger.list().await.unwrap().len(), 1);
        assert!(matches!(
            ledger.create_required_deposit(CANDIDATE, "atlas", None).await,
            Err(ServiceError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_pay_debits_and_blocks_double_pay() {
        let (ledger, balances) = ledger();
        let paid = ledger.pay_deposit(pay("REC-1001")).await.unwrap();
        assert_eq!(paid.status, DepositStatus::Paid);
        assert_eq!(paid.amount, 5);
        assert!(paid.paid_at.is_some());
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);

        let again = DepositRequest {
            deposit_id: Some(paid.id.clone()),
            ..pay("REC-1001")
        };
        assert!(matches!(ledger.pay_deposit(again).await, Err(ServiceError::Conflict(_))));
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failed_debit_leaves_ledger_untouched() {
        let store = JsonStore::in_memory();
        let balances = Arc::new(BalanceStore::new(store.clone(), 10));
        let ledger = DepositLedger::new(store, balances.clone(), 11);
        let err = ledger.pay_deposit(pay("REC-1001")).await.unwrap_err();
        assert!(err.to_string().starts_with("insufficient_balance"));
        assert!(ledger.list().await.unwrap().is_empty());
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_required_deposit_is_charged_its_recorded_amount() {
        let (ledger, balances) = ledger();
        let entry = ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1001"))
            .await
            .unwrap();
        let paid = ledger
            .pay_deposit(DepositRequest {
                deposit_id: Some(entry.id.clone()),
                candidate_address: CANDIDATE.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paid.amount, 5);
        assert_eq!(paid.issuer_id, normalize(ISSUER));
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_pay_rejects_foreign_and_unknown_deposits() {
        let (ledger, balances) = ledger();
        let entry = ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1001"))
            .await
            .unwrap();

        let foreign = DepositRequest {
            deposit_id: Some(entry.id.clone()),
            candidate_address: OTHER_CANDIDATE.to_string(),
            ..Default::default()
        };
        assert!(matches!(ledger.pay_deposit(foreign).await, Err(ServiceError::Conflict(_))));
        let other_issuer = DepositRequest {
            deposit_id: Some(entry.id.clone()),
            issuer_id: "0x3103".to_string(),
            ..pay("REC-1001")
        };
        assert!(matches!(ledger.pay_deposit(other_issuer).await, Err(ServiceError::Conflict(_))));
        let unknown = DepositRequest {
            deposit_id: Some("dep_missing".to_string()),
            ..pay("REC-1001")
        };
        assert!(matches!(ledger.pay_deposit(unknown).await, Err(ServiceError::NotFound { .. })));
        let no_issuer = DepositRequest {
            candidate_address: CANDIDATE.to_string(),
            ..Default::default()
        };
        assert!(matches!(ledger.pay_deposit(no_issuer).await, Err(ServiceError::Validation(_))));

        let stored = ledger.get_by_id(&entry.id).await.unwrap();
        assert_eq!(stored.candidate_address, CANDIDATE);
        assert_eq!(stored.status, DepositStatus::Required);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
        assert_eq!(balances.balance(OTHER_CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_short_issuer_ids_match_their_canonical_form() {
        let (ledger, balances) = ledger();
        let paid = ledger
            .pay_deposit(DepositRequest {
                issuer_id: "0xabc".to_string(),
                ..pay("REC-1001")
            })
            .await
            .unwrap();
        assert_eq!(paid.issuer_id, normalize("0xabc"));

        let summary = ledger.refund_deposits_by_issuer(&normalize("0xabc")).await.unwrap();
        assert_eq!(summary.refunded_count, 1);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_refund_is_single_shot() {
        let (ledger, balances) = ledger();
        ledger.pay_deposit(pay("REC-1001")).await.unwrap();
        ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1002"))
            .await
            .unwrap();

        let summary = ledger
            .refund_deposits_by_issuer(&ISSUER.to_uppercase().replace("0X", "0x"))
            .await
            .unwrap();
        assert_eq!(summary.refunded_count, 1);
        assert_eq!(summary.total_amount, 5);
        assert_eq!(summary.affected_candidates, vec![CANDIDATE.to_string()]);
        assert!(summary.pending_ids.is_empty());
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);

        let unpaid = ledger.get_by_credential("REC-1002").await.unwrap().unwrap();
        assert_eq!(unpaid.status, DepositStatus::Required);

        let second = ledger.refund_deposits_by_issuer(ISSUER).await.unwrap();
        assert_eq!(second, RefundSummary::default());
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_refund_retries_stuck_entries() {
        let (ledger, balances) = ledger();
        let paid = ledger.pay_deposit(pay("REC-1001")).await.unwrap();

        let mut entries = ledger.list().await.unwrap();
        entries[0].status = DepositStatus::RefundPending;
        ledger.persist(&entries).await.unwrap();

        let summary = ledger.refund_deposits_by_issuer(ISSUER).await.unwrap();
        assert_eq!(summary.refunded_count, 1);
        assert_eq!(ledger.get_by_id(&paid.id).await.unwrap().status, DepositStatus::Refunded);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_unrecorded_refund_is_reversed_and_retried_once() {
        let kv = Arc::new(FlakyKv::default());
        let (ledger, balances) = ledger_on(JsonStore::new(kv.clone()));
        let paid = ledger.pay_deposit(pay("REC-1001")).await.unwrap();
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);

        // writes: 1 = paid, 2 = refund pending, 3 = refunded
        kv.refuse_write_number(LEDGER_KEY, 3).await;
        let err = ledger.refund_deposits_by_issuer(ISSUER).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);
        assert_eq!(ledger.get_by_id(&paid.id).await.unwrap().status, DepositStatus::RefundPending);

        let retry = ledger.refund_deposits_by_issuer(ISSUER).await.unwrap();
        assert_eq!(retry.refunded_count, 1);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);

        let third = ledger.refund_deposits_by_issuer(ISSUER).await.unwrap();
        assert_eq!(third.refunded_count, 0);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_link_and_lookup() {
        let (ledger, _) = ledger();
        let entry = ledger.create_required_deposit(CANDIDATE, ISSUER, None).await.unwrap();
        let linked = ledger
            .link_deposit_to_credential(&entry.id, "REC-2001", CANDIDATE, ISSUER)
            .await
            .unwrap();
        assert_eq!(linked.credential_record_id.as_deref(), Some("REC-2001"));
        assert_eq!(ledger.get_by_credential("REC-2001").await.unwrap().unwrap().id, entry.id);
        assert!(matches!(
            ledger.link_deposit_to_credential("dep_missing", "REC-1", CANDIDATE, ISSUER).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.link_deposit_to_credential(&entry.id, "REC-2002", CANDIDATE, ISSUER).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_link_requires_matching_owner_and_open_status() {
        let (ledger, _) = ledger();
        let entry = ledger.create_required_deposit(CANDIDATE, ISSUER, None).await.unwrap();
        for (candidate, issuer) in [(OTHER_CANDIDATE, ISSUER), (CANDIDATE, OTHER_CANDIDATE)] {
            assert!(matches!(
                ledger.link_deposit_to_credential(&entry.id, "REC-3001", candidate, issuer).await,
                Err(ServiceError::Conflict(_))
            ));
        }
        assert!(ledger.get_by_id(&entry.id).await.unwrap().credential_record_id.is_none());

        let refunded = ledger.create_required_deposit(CANDIDATE, ISSUER, None).await.unwrap();
        ledger
            .pay_deposit(DepositRequest {
                deposit_id: Some(refunded.id.clone()),
                candidate_address: CANDIDATE.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        ledger.refund_deposits_by_issuer(ISSUER).await.unwrap();
        assert!(matches!(
            ledger.link_deposit_to_credential(&refunded.id, "REC-3002", CANDIDATE, ISSUER).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_pay_charges_once() {
        let (ledger, balances) = ledger();
        let ledger = Arc::new(ledger);
        let entry = ledger
            .create_required_deposit(CANDIDATE, ISSUER, Some("REC-1001"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = ledger.clone();
            let request = DepositRequest {
                deposit_id: Some(entry.id.clone()),
                ..pay("REC-1001")
            };
            handles.push(tokio::spawn(async move { ledger.pay_deposit(request).await }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(balances.balance(CANDIDATE).await.unwrap(), 5);
    }
}
