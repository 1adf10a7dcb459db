// src/storage/mod.rs
pub mod kv_store;
pub mod repository;
