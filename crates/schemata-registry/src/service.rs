//! Registry service
//!
//! Schema registration, lookup and compatibility configuration on top of
//! the storage surface. Transport-free: a handler layer resolves the tenant
//! through the [`TenantGate`](crate::TenantGate) and calls in here.

use crate::compat::CompatibilityRules;
use schemata_common::{CompatibilityConfig, CompatibilityLevel, Schema};
use schemata_storage::{Storage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("schema is incompatible with the latest version of {subject} under {level}")]
    IncompatibleSchema {
        subject: String,
        level: CompatibilityLevel,
    },

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("version {version} of subject {subject} not found")]
    VersionNotFound { subject: String, version: u32 },

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("error in the backend datastore: {0}")]
    Storage(#[from] StorageError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry operations for one process
pub struct RegistryService {
    storage: Arc<dyn Storage>,
    rules: CompatibilityRules,
    default_level: CompatibilityLevel,
}

impl RegistryService {
    pub fn new(
        storage: Arc<dyn Storage>,
        rules: CompatibilityRules,
        default_level: CompatibilityLevel,
    ) -> Self {
        Self {
            storage,
            rules,
            default_level,
        }
    }

    /// Register a schema under a subject, returning its global ID.
    ///
    /// A schema already registered under the subject keeps its ID. A new
    /// schema must be compatible with the subject's latest version.
    pub async fn register(&self, tenant: &str, subject: &str, schema: &str) -> RegistryResult<i64> {
        validate_syntax(schema)?;

        if let Some(existing) = self.storage.find_schema(tenant, subject, schema)? {
            debug!(
                "Schema already registered under {}/{} as version {} (id {})",
                tenant, subject, existing.version, existing.id
            );
            return Ok(existing.id);
        }

        if let Some(latest) = self.storage.get_latest_schema(tenant, subject)? {
            let level = self.effective_level(tenant, subject)?;
            if !self.rules.is_compatible(schema, &latest.schema, level) {
                return Err(RegistryError::IncompatibleSchema {
                    subject: subject.to_string(),
                    level,
                });
            }
        }

        let id = self.storage.store_schema(tenant, subject, schema).await?;
        info!("Registered schema {} under {}/{}", id, tenant, subject);
        Ok(id)
    }

    /// The version of `subject` whose text equals `schema`
    pub fn lookup(&self, tenant: &str, subject: &str, schema: &str) -> RegistryResult<Schema> {
        if let Some(found) = self.storage.find_schema(tenant, subject, schema)? {
            return Ok(found);
        }
        // Distinguish an unknown subject from an unknown schema
        self.versions(tenant, subject)?;
        Err(RegistryError::SchemaNotFound(format!(
            "no version of {subject} matches"
        )))
    }

    /// Whether `schema` may follow a given version of `subject`
    pub fn check_compatibility(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
        schema: &str,
    ) -> RegistryResult<bool> {
        validate_syntax(schema)?;
        let existing = self.schema(tenant, subject, version)?;
        let level = self.effective_level(tenant, subject)?;
        Ok(self.rules.is_compatible(schema, &existing, level))
    }

    /// Level applied to `subject`: its own, else the tenant's, else the default
    pub fn effective_level(
        &self,
        tenant: &str,
        subject: &str,
    ) -> RegistryResult<CompatibilityLevel> {
        if let Some(level) = self.storage.get_subject_config(tenant, subject)? {
            return Ok(level);
        }
        self.global_level(tenant)
    }

    pub async fn set_global_level(
        &self,
        tenant: &str,
        level: CompatibilityLevel,
    ) -> RegistryResult<CompatibilityConfig> {
        let config = CompatibilityConfig::new(level);
        self.storage.update_global_config(tenant, config).await?;
        Ok(config)
    }

    pub async fn set_subject_level(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> RegistryResult<CompatibilityConfig> {
        let config = CompatibilityConfig::new(level);
        self.storage
            .update_subject_config(tenant, subject, config)
            .await?;
        Ok(config)
    }

    /// Tenant-wide level, the configured default when unset
    pub fn global_level(&self, tenant: &str) -> RegistryResult<CompatibilityLevel> {
        Ok(self
            .storage
            .get_global_config(tenant)?
            .unwrap_or(self.default_level))
    }

    pub fn subject_level(&self, tenant: &str, subject: &str) -> RegistryResult<CompatibilityLevel> {
        self.storage
            .get_subject_config(tenant, subject)?
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    pub fn subjects(&self, tenant: &str) -> RegistryResult<Vec<String>> {
        Ok(self.storage.get_subjects(tenant)?)
    }

    pub fn versions(&self, tenant: &str, subject: &str) -> RegistryResult<Vec<u32>> {
        self.storage
            .get_versions(tenant, subject)?
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    pub fn schema(&self, tenant: &str, subject: &str, version: u32) -> RegistryResult<String> {
        self.storage
            .get_schema(tenant, subject, version)?
            .ok_or_else(|| RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            })
    }

    pub fn latest(&self, tenant: &str, subject: &str) -> RegistryResult<Schema> {
        self.storage
            .get_latest_schema(tenant, subject)?
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    pub fn schema_by_id(&self, tenant: &str, id: i64) -> RegistryResult<String> {
        self.storage
            .get_schema_by_id(tenant, id)?
            .ok_or_else(|| RegistryError::SchemaNotFound(format!("id {id}")))
    }
}

/// A schema must at least parse as a JSON document
fn validate_syntax(schema: &str) -> RegistryResult<()> {
    serde_json::from_str::<serde_json::Value>(schema)
        .map(|_| ())
        .map_err(|e| RegistryError::InvalidSchema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_storage::{
        CombinedStorage, LogWriter, MemoryCache, MemoryLog, StreamCursor, replay_to_end,
    };

    const SCHEMA_A: &str =
        r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;
    const SCHEMA_B: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"long"},
        {"name":"note","type":"string","default":""}]}"#;
    const SCHEMA_C: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"long"},
        {"name":"qty","type":"int"}]}"#;

    struct Fixture {
        log: Arc<MemoryLog>,
        cache: Arc<MemoryCache>,
        cursor: StreamCursor,
        service: RegistryService,
    }

    impl Fixture {
        /// Apply everything appended since the last call
        async fn catch_up(&mut self) {
            while self
                .cursor
                .poll(self.log.as_ref(), self.cache.as_ref(), 500)
                .await
                .unwrap()
                .records()
                > 0
            {}
        }
    }

    fn fixture() -> Fixture {
        let log = Arc::new(MemoryLog::new());
        let cache = Arc::new(MemoryCache::new());
        let storage = Arc::new(CombinedStorage::new(
            Arc::new(LogWriter::new(log.clone())),
            cache.clone(),
            cache.clone(),
        ));
        let service = RegistryService::new(
            storage,
            CompatibilityRules::record_fields(),
            CompatibilityLevel::Backward,
        );
        Fixture {
            log,
            cache,
            cursor: StreamCursor::new("acme"),
            service,
        }
    }

    #[tokio::test]
    async fn test_order_scenario() {
        let mut f = fixture();
        assert_eq!(f.service.register("acme", "orders", SCHEMA_A).await.unwrap(), 1);
        f.catch_up().await;
        assert_eq!(f.service.register("acme", "orders", SCHEMA_B).await.unwrap(), 2);
        f.catch_up().await;

        assert_eq!(f.service.versions("acme", "orders").unwrap(), vec![1, 2]);
        assert_eq!(
            f.service.latest("acme", "orders").unwrap(),
            Schema {
                subject: "orders".into(),
                id: 2,
                version: 2,
                schema: SCHEMA_B.into(),
            }
        );

        let config = f
            .service
            .set_subject_level("acme", "orders", CompatibilityLevel::Full)
            .await
            .unwrap();
        assert_eq!(config.compatibility, CompatibilityLevel::Full);
        f.catch_up().await;
        assert_eq!(
            f.service.subject_level("acme", "orders").unwrap(),
            CompatibilityLevel::Full
        );

        // Rebuilding from offset 0 reproduces the state
        let rebuilt = MemoryCache::new();
        replay_to_end(f.log.as_ref(), &rebuilt, "acme", 500)
            .await
            .unwrap();
        assert_eq!(rebuilt.snapshot(), f.cache.snapshot());
    }

    #[tokio::test]
    async fn test_register_round_trip_and_dedupe() {
        let mut f = fixture();
        let id = f.service.register("acme", "orders", SCHEMA_A).await.unwrap();
        f.catch_up().await;
        assert_eq!(f.service.schema_by_id("acme", id).unwrap(), SCHEMA_A);

        // Same text again: same ID, nothing appended
        assert_eq!(f.service.register("acme", "orders", SCHEMA_A).await.unwrap(), id);
        f.catch_up().await;
        assert_eq!(f.cursor.next_offset(), 1);

        let found = f.service.lookup("acme", "orders", SCHEMA_A).unwrap();
        assert_eq!(found.version, 1);
        assert_eq!(found.id, id);
        assert!(matches!(
            f.service.lookup("acme", "orders", SCHEMA_B),
            Err(RegistryError::SchemaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_same_text_under_another_subject_creates_it() {
        let mut f = fixture();
        let orders = f.service.register("acme", "orders", SCHEMA_A).await.unwrap();
        f.catch_up().await;

        let archive = f.service.register("acme", "archive", SCHEMA_A).await.unwrap();
        f.catch_up().await;
        assert_eq!((orders, archive), (1, 2));

        assert_eq!(f.service.versions("acme", "archive").unwrap(), vec![1]);
        assert_eq!(f.service.versions("acme", "orders").unwrap(), vec![1]);
        assert_eq!(
            f.service.subjects("acme").unwrap(),
            vec!["archive".to_string(), "orders".to_string()]
        );

        // Each subject reports its own registration
        assert_eq!(f.service.lookup("acme", "archive", SCHEMA_A).unwrap().id, 2);
        assert_eq!(f.service.lookup("acme", "orders", SCHEMA_A).unwrap().id, 1);
        assert_eq!(f.service.register("acme", "archive", SCHEMA_A).await.unwrap(), 2);
        assert!(matches!(
            f.service.lookup("acme", "payments", SCHEMA_A),
            Err(RegistryError::SubjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_and_incompatible() {
        let mut f = fixture();
        assert!(matches!(
            f.service.register("acme", "orders", "{not json").await,
            Err(RegistryError::InvalidSchema(_))
        ));

        f.service.register("acme", "orders", SCHEMA_A).await.unwrap();
        f.catch_up().await;

        // A new field without default breaks BACKWARD
        let err = f.service.register("acme", "orders", SCHEMA_C).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::IncompatibleSchema {
                level: CompatibilityLevel::Backward,
                ..
            }
        ));

        // ... but is fine once the subject opts out
        f.service
            .set_subject_level("acme", "orders", CompatibilityLevel::None)
            .await
            .unwrap();
        f.catch_up().await;
        assert_eq!(f.service.register("acme", "orders", SCHEMA_C).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_check_compatibility() {
        let mut f = fixture();
        f.service.register("acme", "orders", SCHEMA_A).await.unwrap();
        f.catch_up().await;

        assert!(f.service.check_compatibility("acme", "orders", 1, SCHEMA_B).unwrap());
        assert!(!f.service.check_compatibility("acme", "orders", 1, SCHEMA_C).unwrap());
        assert!(matches!(
            f.service.check_compatibility("acme", "orders", 9, SCHEMA_B),
            Err(RegistryError::VersionNotFound { version: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_levels_fall_back_to_global_then_default() {
        let mut f = fixture();
        assert_eq!(
            f.service.global_level("acme").unwrap(),
            CompatibilityLevel::Backward
        );
        assert!(matches!(
            f.service.subject_level("acme", "orders"),
            Err(RegistryError::SubjectNotFound(_))
        ));

        f.service
            .set_global_level("acme", CompatibilityLevel::Forward)
            .await
            .unwrap();
        f.catch_up().await;
        assert_eq!(
            f.service.effective_level("acme", "orders").unwrap(),
            CompatibilityLevel::Forward
        );
    }

    #[tokio::test]
    async fn test_not_found_reads() {
        let f = fixture();
        assert!(f.service.subjects("acme").unwrap().is_empty());
        assert!(matches!(
            f.service.versions("acme", "orders"),
            Err(RegistryError::SubjectNotFound(_))
        ));
        assert!(matches!(
            f.service.latest("acme", "orders"),
            Err(RegistryError::SubjectNotFound(_))
        ));
        assert!(matches!(
            f.service.schema("acme", "orders", 1),
            Err(RegistryError::VersionNotFound { .. })
        ));
        assert!(matches!(
            f.service.schema_by_id("acme", 1),
            Err(RegistryError::SchemaNotFound(_))
        ));
    }
}
