// src/blockchain/mod.rs
pub mod chain_client;
