//! Tenant gate
//!
//! Resolves the tenant a request acts for. In single-tenant mode every
//! request acts for the default tenant. In multi-tenant mode a request must
//! carry a user name and token; the first successful authentication of a
//! tenant subscribes this process to the tenant's stream and publishes the
//! user so other instances learn it through replay.

use schemata_auth::{AuthError, TokenStore};
use schemata_storage::{ADMIN_STREAM, Storage, StorageError, Watcher};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while resolving or administering tenants
#[derive(Debug, Error)]
pub enum GateError {
    #[error("user name and token required")]
    MissingCredentials,

    #[error("client authorization required for {0}")]
    Unauthorized(String),

    #[error("user {0} is not an administrator")]
    NotAdmin(String),

    #[error("authorization backend error: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How requests map to tenants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenancyMode {
    /// Every request acts for this tenant
    Single { tenant: String },
    /// Requests authenticate as a tenant
    Multi,
}

/// Credentials presented with a request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub name: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            token: Some(token.into()),
        }
    }

    /// No credentials at all
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            name: None,
            token: None,
        }
    }
}

/// Authenticates requests and subscribes tenant streams on demand
pub struct TenantGate {
    mode: TenancyMode,
    storage: Arc<dyn Storage>,
    tokens: Arc<dyn TokenStore>,
    watcher: Arc<dyn Watcher>,
}

impl TenantGate {
    pub fn new(
        mode: TenancyMode,
        storage: Arc<dyn Storage>,
        tokens: Arc<dyn TokenStore>,
        watcher: Arc<dyn Watcher>,
    ) -> Self {
        Self {
            mode,
            storage,
            tokens,
            watcher,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> &TenancyMode {
        &self.mode
    }

    /// Subscribe the streams every instance replays from startup
    pub fn start(&self) {
        match &self.mode {
            TenancyMode::Single { tenant } => {
                info!("Single-tenant mode, serving tenant '{}'", tenant);
                self.watcher.watch(tenant);
            }
            TenancyMode::Multi => {
                info!("Multi-tenant mode, replaying user directory");
                self.watcher.watch(ADMIN_STREAM);
            }
        }
    }

    /// Resolve the tenant a request acts for
    pub async fn resolve(&self, credentials: &Credentials) -> Result<String, GateError> {
        let TenancyMode::Single { tenant } = &self.mode else {
            return self.authenticate(credentials).await;
        };
        Ok(tenant.clone())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<String, GateError> {
        let (Some(name), Some(token)) = (
            credentials.name.as_deref().filter(|n| !n.is_empty()),
            credentials.token.as_deref().filter(|t| !t.is_empty()),
        ) else {
            return Err(GateError::MissingCredentials);
        };

        // Users learned through replay are known before their stream is
        if self
            .storage
            .user_by_name(name)
            .is_some_and(|user| user.token == token)
        {
            self.watcher.watch(name);
            return Ok(name.to_string());
        }

        if !self.tokens.authorize(name, token).await? {
            warn!("Rejected credentials for user {}", name);
            return Err(GateError::Unauthorized(name.to_string()));
        }

        // First successful authentication on this instance
        let admin = match self.tokens.is_admin(name).await {
            Ok(admin) => admin,
            Err(e) => {
                debug!("Admin flag of {} unavailable, assuming none: {}", name, e);
                false
            }
        };
        self.storage.add_user(name, token, admin)?;
        self.watcher.watch(name);
        self.storage.create_user(name, token, admin).await?;
        info!("Tenant {} authenticated, stream subscribed", name);
        Ok(name.to_string())
    }

    /// Fail unless `name` is an administrator
    pub async fn require_admin(&self, name: &str) -> Result<(), GateError> {
        if self.tokens.is_admin(name).await? {
            Ok(())
        } else {
            Err(GateError::NotAdmin(name.to_string()))
        }
    }

    /// Create a user and publish it, returning its token
    pub async fn create_user(&self, name: &str, admin: bool) -> Result<String, GateError> {
        let token = self.tokens.add_user(name, admin).await?;
        self.storage.create_user(name, &token, admin).await?;
        info!("Created user {} (admin: {})", name, admin);
        Ok(token)
    }

    /// Issue a new token for an existing user and publish it
    pub async fn refresh_token(&self, name: &str) -> Result<String, GateError> {
        let token = self.tokens.refresh_token(name).await?;
        let admin = self.tokens.is_admin(name).await?;
        self.storage.create_user(name, &token, admin).await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_auth::InMemoryTokenStore;
    use schemata_storage::{
        CombinedStorage, LogTransport, LogWriter, MemoryCache, MemoryLog, ReplayConfig,
        ReplayEngine, SchemaWriter, StateReader,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingWatcher {
        streams: Mutex<Vec<String>>,
    }

    impl Watcher for RecordingWatcher {
        fn watch(&self, stream: &str) {
            let mut streams = self.streams.lock().unwrap();
            if !streams.iter().any(|s| s == stream) {
                streams.push(stream.to_string());
            }
        }
    }

    impl RecordingWatcher {
        fn streams(&self) -> Vec<String> {
            self.streams.lock().unwrap().clone()
        }
    }

    struct Fixture {
        log: Arc<MemoryLog>,
        cache: Arc<MemoryCache>,
        tokens: Arc<InMemoryTokenStore>,
        watcher: Arc<RecordingWatcher>,
        gate: TenantGate,
    }

    fn fixture(mode: TenancyMode) -> Fixture {
        let log = Arc::new(MemoryLog::new());
        let cache = Arc::new(MemoryCache::new());
        let storage = Arc::new(CombinedStorage::new(
            Arc::new(LogWriter::new(log.clone())),
            cache.clone(),
            cache.clone(),
        ));
        let tokens = Arc::new(InMemoryTokenStore::new());
        let watcher = Arc::new(RecordingWatcher::default());
        let gate = TenantGate::new(mode, storage, tokens.clone(), watcher.clone());
        Fixture {
            log,
            cache,
            tokens,
            watcher,
            gate,
        }
    }

    #[tokio::test]
    async fn test_single_tenant_mode() {
        let f = fixture(TenancyMode::Single {
            tenant: "schemas".into(),
        });
        f.gate.start();
        assert_eq!(f.watcher.streams(), vec!["schemas".to_string()]);

        let tenant = f.gate.resolve(&Credentials::anonymous()).await.unwrap();
        assert_eq!(tenant, "schemas");
    }

    #[tokio::test]
    async fn test_multi_tenant_first_auth_subscribes() {
        let f = fixture(TenancyMode::Multi);
        f.gate.start();
        assert_eq!(f.watcher.streams(), vec![ADMIN_STREAM.to_string()]);

        let token = f.tokens.add_user("acme", false).await.unwrap();
        let tenant = f
            .gate
            .resolve(&Credentials::new("acme", token.clone()))
            .await
            .unwrap();
        assert_eq!(tenant, "acme");
        assert_eq!(
            f.watcher.streams(),
            vec![ADMIN_STREAM.to_string(), "acme".to_string()]
        );

        // The user is cached and published on the admin stream
        assert_eq!(f.cache.user_by_name("acme").unwrap().token, token);
        assert_eq!(f.log.end_offset(ADMIN_STREAM).await.unwrap(), 1);

        // Second request is served from the cache: no new subscription
        f.gate
            .resolve(&Credentials::new("acme", token))
            .await
            .unwrap();
        assert_eq!(f.watcher.streams().len(), 2);
        assert_eq!(f.log.end_offset(ADMIN_STREAM).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replayed_user_subscribes_its_stream() {
        let log = Arc::new(MemoryLog::new());
        let cache = Arc::new(MemoryCache::new());
        let storage = Arc::new(CombinedStorage::new(
            Arc::new(LogWriter::new(log.clone())),
            cache.clone(),
            cache.clone(),
        ));
        let engine = Arc::new(ReplayEngine::new(
            log.clone(),
            cache.clone(),
            ReplayConfig {
                poll_interval: Duration::from_millis(5),
                fetch_batch: 100,
            },
        ));
        let gate = TenantGate::new(
            TenancyMode::Multi,
            storage.clone(),
            Arc::new(InMemoryTokenStore::new()),
            engine.clone(),
        );
        gate.start();

        // The user reaches the cache through the admin stream only
        let token = gate.create_user("acme", false).await.unwrap();
        for _ in 0..400 {
            if cache.user_by_name("acme").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.user_by_name("acme").is_some());
        assert!(!engine.is_watching("acme"));

        let tenant = gate.resolve(&Credentials::new("acme", token)).await.unwrap();
        assert_eq!(tenant, "acme");
        assert!(engine.is_watching("acme"));

        storage.store_schema("acme", "orders", "a").await.unwrap();
        let mut versions = None;
        for _ in 0..400 {
            versions = cache.get_versions("acme", "orders").unwrap();
            if versions.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(versions, Some(vec![1]));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_multi_tenant_rejections() {
        let f = fixture(TenancyMode::Multi);
        f.tokens.add_user("acme", false).await.unwrap();

        assert!(matches!(
            f.gate.resolve(&Credentials::anonymous()).await,
            Err(GateError::MissingCredentials)
        ));
        assert!(matches!(
            f.gate.resolve(&Credentials::new("acme", "")).await,
            Err(GateError::MissingCredentials)
        ));
        assert!(matches!(
            f.gate.resolve(&Credentials::new("acme", "wrong")).await,
            Err(GateError::Unauthorized(name)) if name == "acme"
        ));
        assert!(matches!(
            f.gate.resolve(&Credentials::new("ghost", "t")).await,
            Err(GateError::Unauthorized(_))
        ));
        assert!(f.watcher.streams().is_empty());
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let f = fixture(TenancyMode::Multi);
        f.tokens.add_user("root", true).await.unwrap();

        f.gate.require_admin("root").await.unwrap();
        let token = f.gate.create_user("acme", false).await.unwrap();
        assert!(matches!(
            f.gate.require_admin("acme").await,
            Err(GateError::NotAdmin(_))
        ));
        assert!(matches!(
            f.gate.require_admin("ghost").await,
            Err(GateError::Auth(AuthError::UserNotFound(_)))
        ));

        let refreshed = f.gate.refresh_token("acme").await.unwrap();
        assert_ne!(token, refreshed);
        assert!(f.tokens.authorize("acme", &refreshed).await.unwrap());
        // Both the creation and the refresh were published
        assert_eq!(f.log.end_offset(ADMIN_STREAM).await.unwrap(), 2);
    }
}
