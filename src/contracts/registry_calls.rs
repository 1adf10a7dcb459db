// src/contracts/registry_calls.rs
//! Call descriptions for the on-chain VerifyMe registry.
//!
//! The service never builds or signs transactions itself. It describes the
//! registry function to invoke and its arguments, and hands the description
//! to a [`ChainGateway`](crate::blockchain::chain_client::ChainGateway).

use crate::models::issuer::IssuerType;
use serde::{Deserialize, Serialize};

pub const MODULE_NAME: &str = "verifyme";

/// Typed argument of a registry call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CallArg {
    Object(String),
    U8(u8),
    U64(u64),
    Bytes(Vec<u8>),
    Address(String),
    OptionBytes(Option<Vec<u8>>),
    OptionAddress(Option<String>),
}

/// A fully described registry invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegistryCall {
    /// `<package>::<module>::<function>`
    pub target: String,
    pub arguments: Vec<CallArg>,
}

impl RegistryCall {
    /// Function name, the last segment of `target`.
    pub fn function(&self) -> &str {
        self.target.rsplit("::").next().unwrap_or(&self.target)
    }
}

/// Builds [`RegistryCall`]s against one deployed package and registry.
#[derive(Debug, Clone)]
pub struct RegistryCalls {
    package_id: String,
    registry_id: String,
}

impl RegistryCalls {
    pub fn new(package_id: impl Into<String>, registry_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            registry_id: registry_id.into(),
        }
    }

    fn call(&self, function: &str, mut args: Vec<CallArg>, timestamp_ms: u64) -> RegistryCall {
        let mut arguments = vec![CallArg::Object(self.registry_id.clone())];
        arguments.append(&mut args);
        arguments.push(CallArg::U64(timestamp_ms));
        RegistryCall {
            target: format!("{}::{}::{}", self.package_id, MODULE_NAME, function),
            arguments,
        }
    }

    /// Co-op issuers register as type `1`, non-co-op as `2`.
    pub fn register_issuer(&self, issuer_type: IssuerType, timestamp_ms: u64) -> RegistryCall {
        let type_val = match issuer_type {
            IssuerType::Coop => 1,
            IssuerType::NonCoop => 2,
        };
        self.call("register_issuer", vec![CallArg::U8(type_val)], timestamp_ms)
    }

    pub fn request_dns_verification(&self, issuer_id: &str, domain_hash: &str, timestamp_ms: u64) -> RegistryCall {
        self.call(
            "request_dns_verification",
            vec![
                CallArg::Address(issuer_id.to_string()),
                CallArg::Bytes(domain_hash.as_bytes().to_vec()),
                CallArg::OptionBytes(None),
            ],
            timestamp_ms,
        )
    }

    pub fn request_legal_verification(&self, issuer_id: &str, legal_hash: &str, timestamp_ms: u64) -> RegistryCall {
        self.call(
            "request_legal_verification",
            vec![
                CallArg::Address(issuer_id.to_string()),
                CallArg::Bytes(legal_hash.as_bytes().to_vec()),
                CallArg::OptionBytes(None),
            ],
            timestamp_ms,
        )
    }

    /// Exactly one of `recipient` and `cccd_hash` is expected to be set.
    pub fn issue_credential_by_coop_issuer(
        &self,
        issuer_id: &str,
        credential_type: &str,
        recipient: Option<&str>,
        cccd_hash: Option<&str>,
        data_hash: &str,
        timestamp_ms: u64,
    ) -> RegistryCall {
        self.call(
            "issue_credential_by_coop_issuer",
            vec![
                CallArg::Address(issuer_id.to_string()),
                CallArg::Bytes(credential_type.as_bytes().to_vec()),
                CallArg::OptionAddress(recipient.map(str::to_string)),
                CallArg::OptionBytes(cccd_hash.map(|h| h.as_bytes().to_vec())),
                CallArg::Bytes(data_hash.as_bytes().to_vec()),
            ],
            timestamp_ms,
        )
    }

    pub fn claim_credential_by_cccd(&self, credential_id: &str, cccd_hash: &str, timestamp_ms: u64) -> RegistryCall {
        self.call(
            "claim_credential_by_cccd",
            vec![
                CallArg::Bytes(credential_id.as_bytes().to_vec()),
                CallArg::Bytes(cccd_hash.as_bytes().to_vec()),
            ],
            timestamp_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_issuer_call_shape() {
        let calls = RegistryCalls::new("0xpkg", "0xreg");
        let call = calls.register_issuer(IssuerType::NonCoop, 42);
        assert_eq!(call.target, "0xpkg::verifyme::register_issuer");
        assert_eq!(call.function(), "register_issuer");
        assert_eq!(
            call.arguments,
            vec![
                CallArg::Object("0xreg".into()),
                CallArg::U8(2),
                CallArg::U64(42)
            ]
        );
    }

    #[test]
    fn test_issue_call_carries_optional_recipient() {
        let calls = RegistryCalls::new("0xpkg", "0xreg");
        let call = calls.issue_credential_by_coop_issuer("0x01", "Diploma", None, Some("hash_c"), "hash_d", 1);
        assert_eq!(call.arguments[3], CallArg::OptionAddress(None));
        assert_eq!(call.arguments[4], CallArg::OptionBytes(Some(b"hash_c".to_vec())));
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["arguments"][1]["type"], "address");
    }
}
