// src/wallet/balance.rs
//! Per-address wallet balances backing deposit payment and refund.
//!
//! Each balance lives under `verifyme.wallet.<address>.balance`. An address
//! seen for the first time is seeded with the configured default balance.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::kv_store::JsonStore;
use crate::utils::address::require_address;
use log::debug;
use tokio::sync::Mutex;

fn balance_key(address: &str) -> String {
    format!("verifyme.wallet.{}.balance", address)
}

pub struct BalanceStore {
    store: JsonStore,
    default_balance: u64,
    /// Serialises read-modify-write cycles on balances.
    lock: Mutex<()>,
}

impl BalanceStore {
    pub fn new(store: JsonStore, default_balance: u64) -> Self {
        Self {
            store,
            default_balance,
            lock: Mutex::new(()),
        }
    }

    async fn read_balance(&self, address: &str) -> ServiceResult<u64> {
        let key = balance_key(address);
        match self.store.get_raw(&key).await? {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => Ok(value),
                Err(_) => self.seed(&key).await,
            },
            None => self.seed(&key).await,
        }
    }

    async fn seed(&self, key: &str) -> ServiceResult<u64> {
        self.store
            .put_raw(key, self.default_balance.to_string())
            .await?;
        Ok(self.default_balance)
    }

    /// Current balance of `address`.
    pub async fn balance(&self, address: &str) -> ServiceResult<u64> {
        let address = require_address(address)?;
        let _guard = self.lock.lock().await;
        self.read_balance(&address).await
    }

    /// Applies `delta` and returns the new balance.
    ///
    /// # Errors
    /// - `InvalidAddress` if `address` does not normalize
    /// - `InsufficientBalance` if the result would be negative; the stored
    ///   balance is left unchanged
    pub async fn adjust(&self, address: &str, delta: i64) -> ServiceResult<u64> {
        let address = require_address(address)?;
        let _guard = self.lock.lock().await;
        let current = self.read_balance(&address).await?;
        let next = current as i128 + delta as i128;
        if next < 0 {
            return Err(ServiceError::InsufficientBalance {
                address,
                required: delta.unsigned_abs(),
                available: current,
            });
        }
        let next = next as u64;
        self.store
            .put_raw(&balance_key(&address), next.to_string())
            .await?;
        debug!("balance {} {} -> {}", address, current, next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDIDATE: &str = "0x91ab23cc98ddee11223344556677889900aabbccddeeff001122334455667788";

    #[tokio::test]
    async fn test_unknown_address_gets_default_balance() {
        let store = BalanceStore::new(JsonStore::in_memory(), 10);
        assert_eq!(store.balance(CANDIDATE).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_adjust_never_goes_negative() {
        let store = BalanceStore::new(JsonStore::in_memory(), 10);
        assert_eq!(store.adjust(CANDIDATE, -4).await.unwrap(), 6);

        let err = store.adjust(CANDIDATE, -7).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientBalance { required: 7, available: 6, .. }
        ));
        assert_eq!(store.balance(CANDIDATE).await.unwrap(), 6);

        assert_eq!(store.adjust(CANDIDATE, 4).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_short_and_long_forms_share_a_balance() {
        let store = BalanceStore::new(JsonStore::in_memory(), 10);
        store.adjust("0xabc", -3).await.unwrap();
        let long = format!("0x{:0>64}", "abc");
        assert_eq!(store.balance(&long).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let store = BalanceStore::new(JsonStore::in_memory(), 10);
        assert!(matches!(
            store.adjust("not-an-address", 1).await,
            Err(ServiceError::InvalidAddress(_))
        ));
    }
}
