//! WAL producer
//!
//! Turns registry mutations into log records and appends them to the
//! tenant's stream. Global schema IDs are derived from the append
//! position, so they are unique and strictly increasing per tenant without
//! any coordination service.

use crate::error::StorageResult;
use crate::record::LogRecord;
use crate::traits::SchemaWriter;
use crate::transport::LogTransport;
use async_trait::async_trait;
use schemata_common::CompatibilityConfig;
use std::sync::Arc;
use tracing::debug;

/// Writer that appends every mutation to the replicated log
pub struct LogWriter {
    transport: Arc<dyn LogTransport>,
}

impl LogWriter {
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self { transport }
    }

    /// Append a record to its stream, returning the acknowledged offset.
    ///
    /// Acknowledgment errors are returned as-is; nothing is retried here.
    async fn send(&self, record: &LogRecord) -> StorageResult<u64> {
        let (key, value) = record.encode()?;
        let offset = self.transport.append(record.stream(), key, &value).await?;
        debug!(
            "Appended {} record to stream '{}' at offset {}",
            key,
            record.stream(),
            offset
        );
        Ok(offset)
    }
}

/// Global ID of the schema stored at `offset`
#[must_use]
pub fn schema_id(offset: u64) -> i64 {
    i64::try_from(offset).map_or(i64::MAX, |offset| offset + 1)
}

#[async_trait]
impl SchemaWriter for LogWriter {
    async fn store_schema(&self, tenant: &str, subject: &str, schema: &str) -> StorageResult<i64> {
        let record = LogRecord::Schema {
            client: tenant.to_string(),
            subject: subject.to_string(),
            schema: schema.to_string(),
        };
        let offset = self.send(&record).await?;
        Ok(schema_id(offset))
    }

    async fn update_global_config(
        &self,
        tenant: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        let record = LogRecord::GlobalConfig {
            client: tenant.to_string(),
            compatibility: config.compatibility,
        };
        self.send(&record).await.map(|_| ())
    }

    async fn update_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()> {
        let record = LogRecord::SubjectConfig {
            client: tenant.to_string(),
            subject: subject.to_string(),
            compatibility: config.compatibility,
        };
        self.send(&record).await.map(|_| ())
    }

    async fn create_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<String> {
        let record = LogRecord::CreateUser {
            name: name.to_string(),
            token: token.to_string(),
            admin,
        };
        self.send(&record).await?;
        Ok(token.to_string())
    }
}
