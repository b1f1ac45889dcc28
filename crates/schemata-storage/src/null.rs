//! Writer used when no log endpoint is configured

use crate::error::StorageResult;
use crate::traits::SchemaWriter;
use async_trait::async_trait;
use schemata_common::CompatibilityConfig;
use tracing::debug;

/// Accepts every write and records nothing.
///
/// `store_schema` returns ID 0, which no logged schema ever receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWriter;

#[async_trait]
impl SchemaWriter for NullWriter {
    async fn store_schema(&self, tenant: &str, subject: &str, _schema: &str) -> StorageResult<i64> {
        debug!("Log-less mode, dropping schema for {}/{}", tenant, subject);
        Ok(0)
    }

    async fn update_global_config(
        &self,
        _tenant: &str,
        _config: CompatibilityConfig,
    ) -> StorageResult<()> {
        Ok(())
    }

    async fn update_subject_config(
        &self,
        _tenant: &str,
        _subject: &str,
        _config: CompatibilityConfig,
    ) -> StorageResult<()> {
        Ok(())
    }

    async fn create_user(&self, _name: &str, token: &str, _admin: bool) -> StorageResult<String> {
        Ok(token.to_string())
    }
}
