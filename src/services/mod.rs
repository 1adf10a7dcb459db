// src/services/mod.rs
pub mod admin_review;
pub mod api_server;
pub mod auth;
pub mod candidate;
pub mod credential_issuer;
pub mod deposit_ledger;
pub mod verifier;
