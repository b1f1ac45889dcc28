//! Schemata token stores
//!
//! Gates writes in multi-tenant mode. One store is selected at startup and
//! handed to the components that need it; it is never swapped afterwards.

pub mod error;
pub mod store;
pub mod vault;

pub use error::AuthError;
pub use store::{InMemoryTokenStore, TokenStore, generate_token};
pub use vault::{VaultConfig, VaultTokenStore};

use schemata_common::config::AuthConfig;
use std::sync::Arc;
use tracing::info;

/// Environment variable consulted when no Vault token is configured
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

/// Vault settings, if both an address and a token are available
#[must_use]
pub fn vault_config(config: &AuthConfig, env_token: Option<String>) -> Option<VaultConfig> {
    let address = config.vault_address.as_deref().filter(|a| !a.is_empty())?;
    let token = config
        .vault_token
        .clone()
        .or(env_token)
        .filter(|t| !t.is_empty())?;
    Some(VaultConfig {
        address: address.to_string(),
        token,
        mount: config.vault_mount.clone(),
        timeout_ms: config.timeout_ms,
    })
}

/// Select the token store from configuration
pub fn select_token_store(config: &AuthConfig) -> Result<Arc<dyn TokenStore>, AuthError> {
    let env_token = std::env::var(VAULT_TOKEN_ENV).ok();
    match vault_config(config, env_token) {
        Some(vault) => {
            info!("Using Vault token store at {}", vault.address);
            Ok(Arc::new(VaultTokenStore::new(vault)?))
        }
        None => {
            info!("Vault address or token not set, using in-memory token store");
            Ok(Arc::new(InMemoryTokenStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_requires_address_and_token() {
        let mut config = AuthConfig::default();
        assert!(vault_config(&config, Some("root".into())).is_none());

        config.vault_address = Some("http://vault:8200".into());
        assert!(vault_config(&config, None).is_none());
        assert!(vault_config(&config, Some(String::new())).is_none());

        let vault = vault_config(&config, Some("env-token".into())).unwrap();
        assert_eq!(vault.token, "env-token");
        assert_eq!(vault.mount, "secret/token");

        // An explicit token wins over the environment
        config.vault_token = Some("configured".into());
        let vault = vault_config(&config, Some("env-token".into())).unwrap();
        assert_eq!(vault.token, "configured");
    }

    #[tokio::test]
    async fn test_default_selection_is_in_memory() {
        let store = select_token_store(&AuthConfig::default()).unwrap();
        let token = store.add_user("acme", false).await.unwrap();
        assert!(store.authorize("acme", &token).await.unwrap());
    }
}
