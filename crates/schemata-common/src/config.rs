//! Configuration types for Schemata
//!
//! Every section defaults sensibly so a partial TOML file (or none at all)
//! yields a runnable single-tenant, log-less, cache-only registry.

use crate::types::CompatibilityLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the registry process
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Tenancy configuration
    pub tenancy: TenancyConfig,
    /// Replicated log configuration
    pub log: LogConfig,
    /// Durable backend configuration
    pub backend: BackendConfig,
    /// Auth token store configuration
    pub auth: AuthConfig,
    /// Compatibility policy defaults
    pub compatibility: CompatibilityDefaults,
}

/// Tenancy configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Serve many tenants, one log stream each
    pub multi_tenant: bool,
    /// Tenant (and log stream) used in single-tenant mode
    pub default_tenant: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            multi_tenant: false,
            default_tenant: "schemas".to_string(),
        }
    }
}

/// Replicated log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log endpoints, tried in order. Empty means log-less mode.
    pub endpoints: Vec<String>,
    /// Idle delay between fetches once a tailer reaches the end of its stream
    pub poll_interval_ms: u64,
    /// Maximum records fetched per batch
    pub fetch_batch: usize,
    /// Fsync every append before acknowledging it
    pub sync_on_write: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            poll_interval_ms: 200,
            fetch_batch: 500,
            sync_on_write: true,
        }
    }
}

impl LogConfig {
    /// Whether any log endpoint is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Durable backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Database file. Absent means the log+cache topology.
    pub path: Option<PathBuf>,
    /// Connection attempts before bootstrap is declared failed
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts
    pub retry_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            path: None,
            connect_attempts: 15,
            retry_delay_ms: 3000,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Auth token store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Vault address, e.g. `http://127.0.0.1:8200`
    pub vault_address: Option<String>,
    /// Vault token. Falls back to `VAULT_TOKEN` when unset.
    pub vault_token: Option<String>,
    /// KV path under which per-user secrets live
    pub vault_mount: String,
    /// Request timeout against Vault
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            vault_address: None,
            vault_token: None,
            vault_mount: "secret/token".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Compatibility policy defaults
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityDefaults {
    /// Level applied when neither a subject nor a global level is set
    pub default_level: CompatibilityLevel,
}
