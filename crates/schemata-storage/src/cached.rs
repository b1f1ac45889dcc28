//! Log+backend+cache topology

use crate::error::StorageResult;
use crate::traits::{SchemaWriter, StateReader, StateStore, StateWriter};
use async_trait::async_trait;
use schemata_common::{CompatibilityConfig, CompatibilityLevel, Schema, User};
use std::sync::Arc;
use tracing::debug;

/// Reads from the cache first, then from the backend.
///
/// Writes go to the writer (a [`MultiWriter`](crate::MultiWriter) over the
/// log and the backend). State mutations go to the cache only.
pub struct CachedStorage {
    writer: Arc<dyn SchemaWriter>,
    cache: Arc<dyn StateStore>,
    backend: Arc<dyn StateReader>,
}

impl CachedStorage {
    pub fn new(
        writer: Arc<dyn SchemaWriter>,
        cache: Arc<dyn StateStore>,
        backend: Arc<dyn StateReader>,
    ) -> Self {
        Self {
            writer,
            cache,
            backend,
        }
    }

    /// Serve from the cache unless it misses or fails
    fn read_through<T>(
        &self,
        what: &str,
        cached: StorageResult<Option<T>>,
        backend: impl FnOnce(&dyn StateReader) -> StorageResult<Option<T>>,
    ) -> StorageResult<Option<T>> {
        match cached {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => backend(self.backend.as_ref()),
            Err(e) => {
                debug!("Cache read of {} failed, asking backend: {}", what, e);
                backend(self.backend.as_ref())
            }
        }
    }
}

#[async_trait]
impl SchemaWriter for CachedStorage {
    async fn store_schema(&self, tenant: &str, subject: &str, schema: &str) -> StorageResult<i64> {
        self.writer.store_schema(tenant, subject, schema).await
    }

    async fn update_global_config(
        &self,
        tenant: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        self.writer.update_global_config(tenant, config).await
    }

    async fn update_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        self.writer
            .update_subject_config(tenant, subject, config)
            .await
    }

    async fn create_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<String> {
        self.writer.create_user(name, token, admin).await
    }
}

impl StateReader for CachedStorage {
    fn is_empty(&self) -> bool {
        self.cache.is_empty() && self.backend.is_empty()
    }

    fn get_id(&self, tenant: &str, schema: &str) -> StorageResult<Option<i64>> {
        self.read_through("schema id", self.cache.get_id(tenant, schema), |backend| {
            backend.get_id(tenant, schema)
        })
    }

    fn get_schema_by_id(&self, tenant: &str, id: i64) -> StorageResult<Option<String>> {
        self.read_through("schema by id", self.cache.get_schema_by_id(tenant, id), |backend| {
            backend.get_schema_by_id(tenant, id)
        })
    }

    fn get_subjects(&self, tenant: &str) -> StorageResult<Vec<String>> {
        match self.cache.get_subjects(tenant) {
            Ok(subjects) if !subjects.is_empty() => Ok(subjects),
            Ok(_) => self.backend.get_subjects(tenant),
            Err(e) => {
                debug!("Cache read of subjects failed, asking backend: {}", e);
                self.backend.get_subjects(tenant)
            }
        }
    }

    fn get_versions(&self, tenant: &str, subject: &str) -> StorageResult<Option<Vec<u32>>> {
        self.read_through("versions", self.cache.get_versions(tenant, subject), |backend| {
            backend.get_versions(tenant, subject)
        })
    }

    fn get_schema(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
    ) -> StorageResult<Option<String>> {
        self.read_through(
            "schema",
            self.cache.get_schema(tenant, subject, version),
            |backend| backend.get_schema(tenant, subject, version),
        )
    }

    fn get_latest_schema(&self, tenant: &str, subject: &str) -> StorageResult<Option<Schema>> {
        self.read_through(
            "latest schema",
            self.cache.get_latest_schema(tenant, subject),
            |backend| backend.get_latest_schema(tenant, subject),
        )
    }

    fn find_schema(
        &self,
        tenant: &str,
        subject: &str,
        schema: &str,
    ) -> StorageResult<Option<Schema>> {
        self.read_through(
            "schema in subject",
            self.cache.find_schema(tenant, subject, schema),
            |backend| backend.find_schema(tenant, subject, schema),
        )
    }

    fn get_global_config(&self, tenant: &str) -> StorageResult<Option<CompatibilityLevel>> {
        self.read_through("global config", self.cache.get_global_config(tenant), |backend| {
            backend.get_global_config(tenant)
        })
    }

    fn get_subject_config(
        &self,
        tenant: &str,
        subject: &str,
    ) -> StorageResult<Option<CompatibilityLevel>> {
        self.read_through(
            "subject config",
            self.cache.get_subject_config(tenant, subject),
            |backend| backend.get_subject_config(tenant, subject),
        )
    }

    fn user_by_name(&self, name: &str) -> Option<User> {
        self.cache.user_by_name(name)
    }

    fn user_by_token(&self, token: &str) -> Option<User> {
        self.cache.user_by_token(token)
    }
}

impl StateWriter for CachedStorage {
    fn add_schema(
        &self,
        tenant: &str,
        subject: &str,
        id: i64,
        schema: &str,
    ) -> StorageResult<u32> {
        self.cache.add_schema(tenant, subject, id, schema)
    }

    fn set_global_config(&self, tenant: &str, level: CompatibilityLevel) -> StorageResult<()> {
        self.cache.set_global_config(tenant, level)
    }

    fn set_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> StorageResult<()> {
        self.cache.set_subject_config(tenant, subject, level)
    }

    fn add_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<()> {
        self.cache.add_user(name, token, admin)
    }
}
