//! Write path of the durable topology: log first, then backend

use crate::error::StorageResult;
use crate::traits::{SchemaWriter, StateWriter};
use async_trait::async_trait;
use schemata_common::CompatibilityConfig;
use std::sync::Arc;
use tracing::error;

/// Appends to the log, then writes the durable backend.
///
/// Fails fast: a log error skips the backend write. A backend error after a
/// successful append is returned as-is and nothing is rolled back; the
/// record still reaches the cache through replay.
pub struct MultiWriter {
    log: Arc<dyn SchemaWriter>,
    backend: Arc<dyn StateWriter>,
}

impl MultiWriter {
    pub fn new(log: Arc<dyn SchemaWriter>, backend: Arc<dyn StateWriter>) -> Self {
        Self { log, backend }
    }
}

#[async_trait]
impl SchemaWriter for MultiWriter {
    async fn store_schema(&self, tenant: &str, subject: &str, schema: &str) -> StorageResult<i64> {
        let id = self.log.store_schema(tenant, subject, schema).await?;
        self.backend
            .add_schema(tenant, subject, id, schema)
            .inspect_err(|e| {
                error!(
                    "Schema {} logged but not written to backend for {}/{}: {}",
                    id, tenant, subject, e
                );
            })?;
        Ok(id)
    }

    async fn update_global_config(
        &self,
        tenant: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        self.log.update_global_config(tenant, config).await?;
        self.backend
            .set_global_config(tenant, config.compatibility)
    }

    async fn update_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        self.log
            .update_subject_config(tenant, subject, config)
            .await?;
        self.backend
            .set_subject_config(tenant, subject, config.compatibility)
    }

    /// Users live in the log only
    async fn create_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<String> {
        self.log.create_user(name, token, admin).await
    }
}
