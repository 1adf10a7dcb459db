// src/main.rs

//! # VerifyMe - Main Entry Point
//!
//! Wires the credential verification workflow together and starts the
//! HTTP API.
//!
//! ## Architecture Overview
//! 1. **Chain Layer**: `ChainClient` over a signing relay (or an in-process recorder)
//! 2. **Services Layer**: issuer verification, credential issuance, admin review,
//!    candidate workflow and the HTTP API
//! 3. **Storage Layer**: in-memory repository plus a key-value store for the
//!    deposit ledger, balances and issuer directory
//!
//! ## Configuration
//! Settings come from `config/verifyme.*` and `VERIFYME_*` environment
//! variables; see [`config::Settings`]. A `.env` file is loaded first.

use crate::blockchain::chain_client::{ChainClient, ChainGateway, HttpChainGateway, RecordingChainGateway};
use crate::config::Settings;
use crate::contracts::registry_calls::RegistryCalls;
use crate::services::api_server::ApiServer;
use crate::services::candidate::RandomIdChecker;
use crate::storage::kv_store::{FileKvStore, JsonStore, KvStore, MemoryKvStore};
use crate::storage::repository::Repository;
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod blockchain; // registry calls through the chain gateway
mod config;     // layered settings
mod contracts;  // registry call descriptors
mod error;      // service error type
mod models;     // data structures
mod services;   // business logic and API
mod storage;    // repository and key-value persistence
mod utils;      // helper functions
mod wallet;     // balances and credential records

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load `.env` and initialise logging
/// 2. Load and validate settings
/// 3. Open persistence and the chain gateway
/// 4. Build the services and start the API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("loading settings")?;
    if settings.uses_dev_secrets() {
        warn!("running with development JWT secret or admin passphrase");
    }

    let kv: Arc<dyn KvStore> = match &settings.data_dir {
        Some(dir) => Arc::new(
            FileKvStore::open(dir)
                .await
                .with_context(|| format!("opening data directory {}", dir))?,
        ),
        None => {
            info!("no data_dir configured, state is kept in memory");
            Arc::new(MemoryKvStore::new())
        }
    };

    let gateway: Arc<dyn ChainGateway> = match &settings.chain_relay_url {
        Some(url) => Arc::new(HttpChainGateway::new(url)),
        None => {
            warn!("no chain_relay_url configured, chain calls are recorded locally");
            Arc::new(RecordingChainGateway::new())
        }
    };
    let chain = ChainClient::new(
        RegistryCalls::new(settings.package_id.clone(), settings.registry_id.clone()),
        gateway,
    );

    let repo = Arc::new(Repository::new());
    if settings.seed_demo_data {
        repo.seed_demo().await;
    }

    let api_server = ApiServer::build(
        &settings,
        repo,
        chain,
        JsonStore::new(kv),
        Arc::new(RandomIdChecker::default()),
    )
    .await
    .context("building services")?;

    let addr = settings.socket_addr()?;
    api_server.run(addr).await.context("serving HTTP")?;
    Ok(())
}
