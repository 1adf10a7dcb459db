// src/utils/mod.rs
pub mod address;
pub mod formatters;
pub mod ids;
pub mod serialization;
