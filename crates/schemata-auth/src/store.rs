//! Token store capability and its in-memory implementation

use crate::error::AuthError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-tenant credential store
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Whether `token` is the current token of `name`.
    ///
    /// An unknown user is not authorized; that is not an error.
    async fn authorize(&self, name: &str, token: &str) -> Result<bool, AuthError>;

    /// Create (or replace) a user, returning its new token
    async fn add_user(&self, name: &str, admin: bool) -> Result<String, AuthError>;

    /// Replace the token of an existing user
    async fn refresh_token(&self, name: &str) -> Result<String, AuthError>;

    async fn is_admin(&self, name: &str) -> Result<bool, AuthError>;
}

/// Generate an opaque API token
#[must_use]
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
struct Credential {
    token: String,
    admin: bool,
}

/// Token store kept in process memory
#[derive(Default)]
pub struct InMemoryTokenStore {
    users: RwLock<HashMap<String, Credential>>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known users
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn authorize(&self, name: &str, token: &str) -> Result<bool, AuthError> {
        Ok(self
            .users
            .read()
            .get(name)
            .is_some_and(|credential| credential.token == token))
    }

    async fn add_user(&self, name: &str, admin: bool) -> Result<String, AuthError> {
        let token = generate_token();
        self.users.write().insert(
            name.to_string(),
            Credential {
                token: token.clone(),
                admin,
            },
        );
        Ok(token)
    }

    async fn refresh_token(&self, name: &str) -> Result<String, AuthError> {
        let mut users = self.users.write();
        let credential = users
            .get_mut(name)
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))?;
        credential.token = generate_token();
        Ok(credential.token.clone())
    }

    async fn is_admin(&self, name: &str) -> Result<bool, AuthError> {
        self.users
            .read()
            .get(name)
            .map(|credential| credential.admin)
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_authorize() {
        let store = InMemoryTokenStore::new();
        assert!(store.is_empty());

        let token = store.add_user("acme", false).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(Uuid::parse_str(&token).is_ok());

        assert!(store.authorize("acme", &token).await.unwrap());
        assert!(!store.authorize("acme", "wrong").await.unwrap());
        assert!(!store.authorize("globex", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_invalidates_old_token() {
        let store = InMemoryTokenStore::new();
        let old = store.add_user("acme", false).await.unwrap();
        let new = store.refresh_token("acme").await.unwrap();

        assert_ne!(old, new);
        assert!(!store.authorize("acme", &old).await.unwrap());
        assert!(store.authorize("acme", &new).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_errors() {
        let store = InMemoryTokenStore::new();
        assert!(matches!(
            store.refresh_token("ghost").await,
            Err(AuthError::UserNotFound(name)) if name == "ghost"
        ));
        assert!(matches!(
            store.is_admin("ghost").await,
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_flag() {
        let store = InMemoryTokenStore::new();
        store.add_user("root", true).await.unwrap();
        store.add_user("acme", false).await.unwrap();
        assert!(store.is_admin("root").await.unwrap());
        assert!(!store.is_admin("acme").await.unwrap());
    }
}
