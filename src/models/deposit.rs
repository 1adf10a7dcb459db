// src/models/deposit.rs
//! Deposit ledger entries.

use crate::utils::address::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// REQUIRED → PAID → REFUND_PENDING → REFUNDED
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Required,
    Paid,
    RefundPending,
    Refunded,
}

/// Refundable hold charged to a candidate who submits a credential from an
/// issuer that is not yet verified.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepositEntry {
    pub id: String,
    pub candidate_address: String,
    pub issuer_id: String,
    pub credential_record_id: Option<String>,
    pub amount: u64,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl DepositEntry {
    /// Compares canonical ids, so entries written before normalization
    /// still match.
    pub fn belongs_to_issuer(&self, issuer_id: &str) -> bool {
        let stored = normalize(&self.issuer_id);
        !stored.is_empty() && stored == normalize(issuer_id)
    }
}

/// Outcome of a bulk refund for one issuer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummary {
    pub refunded_count: usize,
    pub total_amount: u64,
    pub affected_candidates: Vec<String>,
    /// Deposits whose balance credit failed; they stay at REFUND_PENDING
    /// and are retried by the next refund run for the same issuer.
    pub pending_ids: Vec<String>,
}

/// Input for paying a deposit. The amount always comes from the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    #[serde(default)]
    pub deposit_id: Option<String>,
    /// Overwritten with the session candidate by the HTTP layer.
    #[serde(default)]
    pub candidate_address: String,
    #[serde(default)]
    pub issuer_id: String,
    #[serde(default)]
    pub credential_record_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belongs_to_issuer_compares_canonical_ids() {
        let entry = DepositEntry {
            id: "dep_1".to_string(),
            candidate_address: normalize("0x91ab"),
            issuer_id: "0xABC".to_string(),
            credential_record_id: None,
            amount: 5,
            status: DepositStatus::Paid,
            created_at: Utc::now(),
            paid_at: None,
            refunded_at: None,
        };
        assert!(entry.belongs_to_issuer(&normalize("0xabc")));
        assert!(entry.belongs_to_issuer("0xabc"));
        assert!(!entry.belongs_to_issuer("0xabd"));
        assert!(!entry.belongs_to_issuer(""));
    }
}
