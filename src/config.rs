// src/config.rs
//! Runtime configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. optional `config/verifyme.{toml,json,yaml}`
//! 3. `VERIFYME_*` environment variables (a `.env` file is loaded first)

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;

pub const DEFAULT_JWT_SECRET: &str = "verifyme-dev-secret";
pub const DEFAULT_ADMIN_PASSPHRASE: &str = "verifyme-admin";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Directory for file-backed persistence; in-memory when unset.
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Signing relay for chain calls; an in-process recorder when unset.
    #[serde(default)]
    pub chain_relay_url: Option<String>,
    pub package_id: String,
    pub registry_id: String,
    pub jwt_secret: String,
    pub admin_passphrase: String,
    pub session_ttl_hours: u64,
    /// Deposit charged for credentials from unverified issuers.
    pub deposit_amount: u64,
    /// Balance given to an address the first time it is seen.
    pub default_balance: u64,
    pub seed_demo_data: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_dir: None,
            chain_relay_url: None,
            package_id: "0x0".to_string(),
            registry_id: "0x0".to_string(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            admin_passphrase: DEFAULT_ADMIN_PASSPHRASE.to_string(),
            session_ttl_hours: 12,
            deposit_amount: 5,
            default_balance: 10,
            seed_demo_data: false,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, the optional config file and the
    /// environment, then validates them.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let settings: Settings = Config::builder()
            .set_default("bind_addr", defaults.bind_addr)?
            .set_default("package_id", defaults.package_id)?
            .set_default("registry_id", defaults.registry_id)?
            .set_default("jwt_secret", defaults.jwt_secret)?
            .set_default("admin_passphrase", defaults.admin_passphrase)?
            .set_default("session_ttl_hours", defaults.session_ttl_hours as i64)?
            .set_default("deposit_amount", defaults.deposit_amount as i64)?
            .set_default("default_balance", defaults.default_balance as i64)?
            .set_default("seed_demo_data", defaults.seed_demo_data)?
            .add_source(File::with_name("config/verifyme").required(false))
            .add_source(Environment::with_prefix("VERIFYME"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.session_ttl_hours == 0 {
            return Err(ConfigError::Message(
                "session_ttl_hours must be greater than zero".to_string(),
            ));
        }
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Message("jwt_secret must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid bind_addr {:?}: {}", self.bind_addr, e)))
    }

    /// True while the signing secret or admin passphrase are the built-in
    /// development values.
    pub fn uses_dev_secrets(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET || self.admin_passphrase == DEFAULT_ADMIN_PASSPHRASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.deposit_amount, 5);
        assert_eq!(settings.default_balance, 10);
        assert!(settings.uses_dev_secrets());
    }

    #[test]
    fn test_rejects_bad_bind_addr_and_zero_ttl() {
        let bad_addr = Settings {
            bind_addr: "localhost".to_string(),
            ..Settings::default()
        };
        assert!(bad_addr.validate().is_err());

        let zero_ttl = Settings {
            session_ttl_hours: 0,
            ..Settings::default()
        };
        assert!(zero_ttl.validate().is_err());
    }
}
