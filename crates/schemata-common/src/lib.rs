//! Schemata Common - Shared types and configuration
//!
//! This crate provides the value types and configuration tree used across
//! all Schemata components.

pub mod config;
pub mod types;

pub use config::RegistryConfig;
pub use types::*;
