//! Token store backed by a Vault KV (v1) secrets engine
//!
//! Each user is one secret at `{mount}/{name}` holding
//! `{"token": "<uuid>", "admin": <bool>}`.

use crate::error::AuthError;
use crate::store::{TokenStore, generate_token};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Header carrying the Vault client token
const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Connection settings for the Vault token store
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault address, e.g. `http://127.0.0.1:8200`
    pub address: String,
    /// Client token
    pub token: String,
    /// KV path under which user secrets live
    pub mount: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Secret stored per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSecret {
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: UserSecret,
}

/// Token store backed by Vault
pub struct VaultTokenStore {
    config: VaultConfig,
    base: Url,
    http_client: reqwest::Client,
}

impl VaultTokenStore {
    pub fn new(config: VaultConfig) -> Result<Self, AuthError> {
        if config.token.is_empty() {
            return Err(AuthError::Configuration("Vault token is empty".into()));
        }
        let base = Url::parse(&config.address).map_err(|e| {
            AuthError::Configuration(format!("invalid Vault address {}: {e}", config.address))
        })?;
        if base.cannot_be_a_base() {
            return Err(AuthError::Configuration(format!(
                "invalid Vault address {}",
                config.address
            )));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        Ok(Self {
            config,
            base,
            http_client,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn secret_url(&self, name: &str) -> Result<Url, AuthError> {
        secret_url(&self.base, &self.config.mount, name)
    }

    /// Read a user's secret, `None` if it does not exist
    async fn read_secret(&self, name: &str) -> Result<Option<UserSecret>, AuthError> {
        let response = self
            .http_client
            .get(self.secret_url(name)?)
            .header(VAULT_TOKEN_HEADER, &self.config.token)
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Unavailable(format!(
                "Vault read returned status {status}: {body}"
            )));
        }

        let body: ReadResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(Some(body.data))
    }

    async fn write_secret(&self, name: &str, secret: &UserSecret) -> Result<(), AuthError> {
        let response = self
            .http_client
            .post(self.secret_url(name)?)
            .header(VAULT_TOKEN_HEADER, &self.config.token)
            .json(secret)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Can't write secret for user {}: status {}", name, status);
            return Err(AuthError::Unavailable(format!(
                "Vault write returned status {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// URL of a user's secret. The name is always a single escaped segment.
fn secret_url(base: &Url, mount: &str, name: &str) -> Result<Url, AuthError> {
    if matches!(name, "" | "." | "..") {
        return Err(AuthError::InvalidUserName(name.to_string()));
    }
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AuthError::Configuration(format!("invalid Vault address {base}")))?
        .pop_if_empty()
        .push("v1")
        .extend(mount.split('/').filter(|s| !s.is_empty()))
        .push(name);
    Ok(url)
}

fn request_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl TokenStore for VaultTokenStore {
    async fn authorize(&self, name: &str, token: &str) -> Result<bool, AuthError> {
        let Some(secret) = self.read_secret(name).await? else {
            debug!("No Vault secret for user {}", name);
            return Ok(false);
        };
        Ok(secret.token == token)
    }

    async fn add_user(&self, name: &str, admin: bool) -> Result<String, AuthError> {
        let secret = UserSecret {
            token: generate_token(),
            admin,
        };
        self.write_secret(name, &secret).await?;
        Ok(secret.token)
    }

    async fn refresh_token(&self, name: &str) -> Result<String, AuthError> {
        let mut secret = self
            .read_secret(name)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))?;
        secret.token = generate_token();
        self.write_secret(name, &secret).await?;
        Ok(secret.token)
    }

    async fn is_admin(&self, name: &str) -> Result<bool, AuthError> {
        self.read_secret(name)
            .await?
            .map(|secret| secret.admin)
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))
    }
}
