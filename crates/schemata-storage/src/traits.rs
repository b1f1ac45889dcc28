//! Storage capability surface
//!
//! Three capabilities, composed differently by each topology:
//!
//! - [`SchemaWriter`]: the write path. Appends to the replicated log and,
//!   in the durable topology, also writes the backend.
//! - [`StateReader`]: low-latency reads. Absence is `None`, never an error.
//! - [`StateWriter`]: direct state mutation. Only the replay engine (and the
//!   multiwriter's backend step) calls it.

use crate::error::StorageResult;
use async_trait::async_trait;
use schemata_common::{CompatibilityConfig, CompatibilityLevel, Schema, User};

/// Write path for registry mutations
#[async_trait]
pub trait SchemaWriter: Send + Sync {
    /// Store a schema and return its global ID
    async fn store_schema(&self, tenant: &str, subject: &str, schema: &str) -> StorageResult<i64>;

    async fn update_global_config(
        &self,
        tenant: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()>;

    async fn update_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        config: CompatibilityConfig,
    ) -> StorageResult<()>;

    /// Publish a user to the user directory, returning its token
    async fn create_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<String>;
}

/// Read access to registry state
pub trait StateReader: Send + Sync {
    /// True when no schema is stored for any tenant
    fn is_empty(&self) -> bool;

    /// Global ID of the first schema of `tenant` whose text equals `schema`
    fn get_id(&self, tenant: &str, schema: &str) -> StorageResult<Option<i64>>;

    fn get_schema_by_id(&self, tenant: &str, id: i64) -> StorageResult<Option<String>>;

    fn get_subjects(&self, tenant: &str) -> StorageResult<Vec<String>>;

    /// Versions of a subject in ascending order, `None` for an unknown subject
    fn get_versions(&self, tenant: &str, subject: &str) -> StorageResult<Option<Vec<u32>>>;

    fn get_schema(&self, tenant: &str, subject: &str, version: u32)
    -> StorageResult<Option<String>>;

    fn get_latest_schema(&self, tenant: &str, subject: &str) -> StorageResult<Option<Schema>>;

    /// The lowest version of `subject` whose text equals `schema`
    fn find_schema(&self, tenant: &str, subject: &str, schema: &str)
    -> StorageResult<Option<Schema>>;

    fn get_global_config(&self, tenant: &str) -> StorageResult<Option<CompatibilityLevel>>;

    fn get_subject_config(
        &self,
        tenant: &str,
        subject: &str,
    ) -> StorageResult<Option<CompatibilityLevel>>;

    fn user_by_name(&self, name: &str) -> Option<User>;

    fn user_by_token(&self, token: &str) -> Option<User>;
}

/// Direct mutation of registry state
pub trait StateWriter: Send + Sync {
    /// Append a schema to a subject, assigning `max(version) + 1`.
    ///
    /// The version scan and the insert are two steps: two writers racing on
    /// the same subject can both observe the same maximum.
    fn add_schema(&self, tenant: &str, subject: &str, id: i64, schema: &str)
    -> StorageResult<u32>;

    fn set_global_config(&self, tenant: &str, level: CompatibilityLevel) -> StorageResult<()>;

    fn set_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> StorageResult<()>;

    fn add_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<()>;
}

/// A store that can be both read and written directly (cache, backend)
pub trait StateStore: StateReader + StateWriter {}

impl<T: StateReader + StateWriter + ?Sized> StateStore for T {}

/// The full surface exposed to the handler layer
pub trait Storage: SchemaWriter + StateReader + StateWriter {}

impl<T: SchemaWriter + StateReader + StateWriter + ?Sized> Storage for T {}
