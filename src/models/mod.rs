// src/models/mod.rs
pub mod access;
pub mod audit;
pub mod credential;
pub mod deposit;
pub mod issuer;
pub mod submission;
