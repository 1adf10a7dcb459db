// src/wallet/mod.rs
pub mod balance;
pub mod credential_storage;
