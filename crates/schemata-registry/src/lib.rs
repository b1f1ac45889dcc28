//! Schemata registry
//!
//! The request-facing layer over the storage engine:
//! - [`TenantGate`]: tenancy resolution and lazy per-tenant replay
//! - [`RegistryService`]: schema registration, lookup and compatibility
//! - [`assemble`]: one-time topology selection from configuration

pub mod app;
pub mod compat;
pub mod gate;
pub mod service;

pub use app::{AssembleError, Registry, Topology, assemble};
pub use compat::{CompatibilityChecker, CompatibilityRules, Incompatibility, RecordFieldChecker};
pub use gate::{Credentials, GateError, TenancyMode, TenantGate};
pub use service::{RegistryError, RegistryResult, RegistryService};
