//! Log+cache topology

use crate::error::StorageResult;
use crate::traits::{SchemaWriter, StateReader, StateWriter};
use async_trait::async_trait;
use schemata_common::{CompatibilityConfig, CompatibilityLevel, Schema, User};
use std::sync::Arc;

/// Forwards writes to a writer, reads to a reader and state mutations to a
/// state writer.
///
/// In the log+cache topology the writer is the WAL producer (or the null
/// writer) and both the reader and the state writer are the cache.
pub struct CombinedStorage {
    writer: Arc<dyn SchemaWriter>,
    reader: Arc<dyn StateReader>,
    state: Arc<dyn StateWriter>,
}

impl CombinedStorage {
    pub fn new(
        writer: Arc<dyn SchemaWriter>,
        reader: Arc<dyn StateReader>,
        state: Arc<dyn StateWriter>,
    ) -> Self {
        Self {
            writer,
            reader,
            state,
        }
    }
}

#[async_trait]
impl SchemaWriter for CombinedStorage {
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

impl StateReader for CombinedStorage {
    fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    fn get_id(&self, tenant: &str, schema: &str) -> StorageResult<Option<i64>> {
        self.reader.get_id(tenant, schema)
    }

    fn get_schema_by_id(&self, tenant: &str, id: i64) -> StorageResult<Option<String>> {
        self.reader.get_schema_by_id(tenant, id)
    }

    fn get_subjects(&self, tenant: &str) -> StorageResult<Vec<String>> {
        self.reader.get_subjects(tenant)
    }

    fn get_versions(&self, tenant: &str, subject: &str) -> StorageResult<Option<Vec<u32>>> {
        self.reader.get_versions(tenant, subject)
    }

    fn get_schema(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
    ) -> StorageResult<Option<String>> {
        self.reader.get_schema(tenant, subject, version)
    }

    fn get_latest_schema(&self, tenant: &str, subject: &str) -> StorageResult<Option<Schema>> {
        self.reader.get_latest_schema(tenant, subject)
    }

    fn find_schema(
        &self,
        tenant: &str,
        subject: &str,
        schema: &str,
    ) -> StorageResult<Option<Schema>> {
        self.reader.find_schema(tenant, subject, schema)
    }

    fn get_global_config(&self, tenant: &str) -> StorageResult<Option<CompatibilityLevel>> {
        self.reader.get_global_config(tenant)
    }

    fn get_subject_config(
        &self,
        tenant: &str,
        subject: &str,
    ) -> StorageResult<Option<CompatibilityLevel>> {
        self.reader.get_subject_config(tenant, subject)
    }

    fn user_by_name(&self, name: &str) -> Option<User> {
        self.reader.user_by_name(name)
    }

    fn user_by_token(&self, token: &str) -> Option<User> {
        self.reader.user_by_token(token)
    }
}

impl StateWriter for CombinedStorage {
    fn add_schema(
        &self,
        tenant: &str,
        subject: &str,
        id: i64,
        schema: &str,
    ) -> StorageResult<u32> {
        self.state.add_schema(tenant, subject, id, schema)
    }

    fn set_global_config(&self, tenant: &str, level: CompatibilityLevel) -> StorageResult<()> {
        self.state.set_global_config(tenant, level)
    }

    fn set_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> StorageResult<()> {
        self.state.set_subject_config(tenant, subject, level)
    }

    fn add_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<()> {
        self.state.add_user(name, token, admin)
    }
}
