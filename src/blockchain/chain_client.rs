// src/blockchain/chain_client.rs
//! Client side of the external chain collaborator.
//!
//! The registry lives on chain and is reached through a signing relay.
//! This module provides:
//! - [`ChainGateway`], the single "sign and execute" primitive
//! - [`HttpChainGateway`], which posts calls to a relay over HTTP
//! - [`RecordingChainGateway`], an in-process gateway that records calls
//! - [`ChainClient`], typed helpers for the registry calls the workflow uses

use crate::contracts::registry_calls::{RegistryCall, RegistryCalls};
use crate::error::{ServiceError, ServiceResult};
use crate::models::issuer::IssuerType;
use crate::utils::ids::random_hex;
use crate::utils::serialization::deserialize;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Receipt of an executed registry call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub digest: String,
}

/// Signs and executes a registry call.
///
/// Success and failure come back as one `Result`; failures are always
/// [`ServiceError::ExternalDependency`]. No retries are attempted.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn sign_and_execute(&self, call: &RegistryCall) -> ServiceResult<TxReceipt>;
}

/// Gateway that forwards calls to a signing relay.
///
/// # Protocol
/// `POST <relay_url>/execute` with the JSON-encoded [`RegistryCall`];
/// a 2xx response carries a JSON [`TxReceipt`].
#[derive(Clone)]
pub struct HttpChainGateway {
    http: reqwest::Client,
    relay_url: String,
}

impl HttpChainGateway {
    pub fn new(relay_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay_url: relay_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChainGateway for HttpChainGateway {
    async fn sign_and_execute(&self, call: &RegistryCall) -> ServiceResult<TxReceipt> {
        let response = self
            .http
            .post(format!("{}/execute", self.relay_url))
            .json(call)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalDependency(format!(
                "relay rejected {} ({}): {}",
                call.function(),
                status,
                body
            )));
        }
        let body = response.text().await?;
        deserialize::<TxReceipt>(&body)
            .map_err(|e| ServiceError::ExternalDependency(format!("malformed relay receipt: {}", e)))
    }
}

/// In-process gateway: records every call and returns a random digest.
///
/// In tests, functions registered with `fail_on` fail with
/// `ExternalDependency` instead, without being recorded.
#[derive(Default)]
pub struct RecordingChainGateway {
    calls: Mutex<Vec<RegistryCall>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingChainGateway {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn fail_on(&self, function: &str) {
        self.failing.lock().await.insert(function.to_string());
    }

    #[cfg(test)]
    pub async fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChainGateway for RecordingChainGateway {
    async fn sign_and_execute(&self, call: &RegistryCall) -> ServiceResult<TxReceipt> {
        if self.failing.lock().await.contains(call.function()) {
            return Err(ServiceError::ExternalDependency(format!(
                "{} rejected by chain",
                call.function()
            )));
        }
        self.calls.lock().await.push(call.clone());
        Ok(TxReceipt {
            digest: format!("0x{}", random_hex(64)),
        })
    }
}

/// Typed registry operations used by the workflow services.
#[derive(Clone)]
pub struct ChainClient {
    calls: RegistryCalls,
    gateway: Arc<dyn ChainGateway>,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl ChainClient {
    pub fn new(calls: RegistryCalls, gateway: Arc<dyn ChainGateway>) -> Self {
        Self { calls, gateway }
    }

    async fn execute(&self, call: RegistryCall) -> ServiceResult<TxReceipt> {
        match self.gateway.sign_and_execute(&call).await {
            Ok(receipt) => {
                info!("chain call {} executed: {}", call.function(), receipt.digest);
                Ok(receipt)
            }
            Err(e) => {
                warn!("chain call {} failed: {}", call.function(), e);
                Err(e)
            }
        }
    }

    pub async fn register_issuer(&self, issuer_type: IssuerType) -> ServiceResult<TxReceipt> {
        self.execute(self.calls.register_issuer(issuer_type, now_ms())).await
    }

    pub async fn request_dns_verification(&self, issuer_id: &str, domain_hash: &str) -> ServiceResult<TxReceipt> {
        self.execute(self.calls.request_dns_verification(issuer_id, domain_hash, now_ms()))
            .await
    }

    pub async fn request_legal_verification(&self, issuer_id: &str, legal_hash: &str) -> ServiceResult<TxReceipt> {
        self.execute(self.calls.request_legal_verification(issuer_id, legal_hash, now_ms()))
            .await
    }

    pub async fn issue_credential_by_coop_issuer(
        &self,
        issuer_id: &str,
        credential_type: &str,
        recipient: Option<&str>,
        cccd_hash: Option<&str>,
        data_hash: &str,
    ) -> ServiceResult<TxReceipt> {
        self.execute(self.calls.issue_credential_by_coop_issuer(
            issuer_id,
            credential_type,
            recipient,
            cccd_hash,
            data_hash,
            now_ms(),
        ))
        .await
    }

    pub async fn claim_credential_by_cccd(&self, credential_id: &str, cccd_hash: &str) -> ServiceResult<TxReceipt> {
        self.execute(self.calls.claim_credential_by_cccd(credential_id, cccd_hash, now_ms()))
            .await
    }
}
