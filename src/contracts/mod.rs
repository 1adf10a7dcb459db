// src/contracts/mod.rs
pub mod registry_calls;
