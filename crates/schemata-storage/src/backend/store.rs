//! Durable backend backed by redb.
//!
//! Every per-tenant read is a prefix scan over the schema table, filtered
//! in the caller. The backend keeps no user directory: users live in the
//! cache only.

use super::tables;
use super::{BackendError, BackendResult};
use crate::error::StorageResult;
use crate::traits::{StateReader, StateWriter};
use redb::{Database, ReadableTableMetadata};
use schemata_common::{CompatibilityLevel, Schema, User};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Value stored per schema row
#[derive(Debug, Serialize, Deserialize)]
struct StoredSchema {
    id: i64,
    schema: String,
}

/// A decoded schema row
struct SchemaRow {
    subject: String,
    version: u32,
    id: i64,
    schema: String,
}

/// Durable backend backed by redb.
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Open (or create) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::SCHEMAS)?;
            let _t = write_txn.open_table(tables::GLOBAL_CONFIGS)?;
            let _t = write_txn.open_table(tables::SUBJECT_CONFIGS)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Open the database, retrying up to `attempts` times with a fixed delay.
    ///
    /// Blocks the calling thread between attempts. Returns
    /// [`BackendError::Unavailable`] once every attempt has failed.
    pub fn connect(path: impl AsRef<Path>, attempts: u32, delay: Duration) -> BackendResult<Self> {
        let path = path.as_ref();
        let attempts = attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match Self::open(path) {
                Ok(backend) => {
                    info!("Durable backend opened at {}", path.display());
                    return Ok(backend);
                }
                Err(e) => {
                    warn!(
                        "Can't open durable backend at {} (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        Err(BackendError::Unavailable {
            attempts,
            last_error,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan every schema row whose key starts with `prefix`, in key order
    fn scan(&self, prefix: &str) -> BackendResult<Vec<SchemaRow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SCHEMAS)?;
        let mut rows = Vec::new();
        for entry in table.range::<&str>(prefix..)? {
            let entry = entry?;
            let key = entry.0.value();
            if !key.starts_with(prefix) {
                break;
            }
            let (subject, version) = tables::parse_schema_key(key)
                .ok_or_else(|| BackendError::Corrupt(format!("bad schema key {key:?}")))?;
            let stored: StoredSchema = serde_json::from_slice(entry.1.value())?;
            rows.push(SchemaRow {
                subject: subject.to_string(),
                version,
                id: stored.id,
                schema: stored.schema,
            });
        }
        Ok(rows)
    }

    fn count_schemas(&self) -> BackendResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SCHEMAS)?;
        Ok(table.len()?)
    }

    fn lookup_schema(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
    ) -> BackendResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::SCHEMAS)?;
        let key = tables::schema_key(tenant, subject, version);
        match table.get(key.as_str())? {
            Some(bytes) => {
                let stored: StoredSchema = serde_json::from_slice(bytes.value())?;
                Ok(Some(stored.schema))
            }
            None => Ok(None),
        }
    }

    fn read_level(
        &self,
        table: tables::LevelTable,
        key: &str,
    ) -> BackendResult<Option<CompatibilityLevel>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let Some(level) = table.get(key)? else {
            return Ok(None);
        };
        let level = level
            .value()
            .parse::<CompatibilityLevel>()
            .map_err(|e| BackendError::Corrupt(e.to_string()))?;
        Ok(Some(level))
    }

    fn write_level(
        &self,
        table: tables::LevelTable,
        key: &str,
        level: CompatibilityLevel,
    ) -> BackendResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(key, level.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_schema(
        &self,
        tenant: &str,
        subject: &str,
        id: i64,
        schema: &str,
    ) -> BackendResult<u32> {
        // Read the current maximum in its own transaction, then write in
        // another. Concurrent writers on one subject can pick the same version.
        let version = self
            .scan(&tables::subject_prefix(tenant, subject))?
            .iter()
            .map(|row| row.version)
            .max()
            .unwrap_or(0)
            + 1;

        let value = serde_json::to_vec(&StoredSchema {
            id,
            schema: schema.to_string(),
        })?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::SCHEMAS)?;
            let key = tables::schema_key(tenant, subject, version);
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(version)
    }
}

impl StateReader for RedbBackend {
    fn is_empty(&self) -> bool {
        match self.count_schemas() {
            Ok(count) => count == 0,
            Err(e) => {
                error!("Failed to count stored schemas: {}", e);
                false
            }
        }
    }

    fn get_id(&self, tenant: &str, schema: &str) -> StorageResult<Option<i64>> {
        let rows = self.scan(&tables::tenant_prefix(tenant))?;
        Ok(rows.into_iter().find(|row| row.schema == schema).map(|row| row.id))
    }

    fn get_schema_by_id(&self, tenant: &str, id: i64) -> StorageResult<Option<String>> {
        let rows = self.scan(&tables::tenant_prefix(tenant))?;
        Ok(rows.into_iter().find(|row| row.id == id).map(|row| row.schema))
    }

    fn get_subjects(&self, tenant: &str) -> StorageResult<Vec<String>> {
        let mut subjects: Vec<String> = self
            .scan(&tables::tenant_prefix(tenant))?
            .into_iter()
            .map(|row| row.subject)
            .collect();
        subjects.dedup();
        Ok(subjects)
    }

    fn get_versions(&self, tenant: &str, subject: &str) -> StorageResult<Option<Vec<u32>>> {
        let versions: Vec<u32> = self
            .scan(&tables::subject_prefix(tenant, subject))?
            .into_iter()
            .map(|row| row.version)
            .collect();
        Ok((!versions.is_empty()).then_some(versions))
    }

    fn get_schema(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
    ) -> StorageResult<Option<String>> {
        Ok(self.lookup_schema(tenant, subject, version)?)
    }

    fn get_latest_schema(&self, tenant: &str, subject: &str) -> StorageResult<Option<Schema>> {
        let latest = self
            .scan(&tables::subject_prefix(tenant, subject))?
            .into_iter()
            .max_by_key(|row| row.version);
        Ok(latest.map(|row| Schema {
            subject: row.subject,
            id: row.id,
            version: row.version,
            schema: row.schema,
        }))
    }

    fn find_schema(
        &self,
        tenant: &str,
        subject: &str,
        schema: &str,
    ) -> StorageResult<Option<Schema>> {
        // Rows come back in version order
        let found = self
            .scan(&tables::subject_prefix(tenant, subject))?
            .into_iter()
            .find(|row| row.schema == schema);
        Ok(found.map(|row| Schema {
            subject: row.subject,
            id: row.id,
            version: row.version,
            schema: row.schema,
        }))
    }

    fn get_global_config(&self, tenant: &str) -> StorageResult<Option<CompatibilityLevel>> {
        Ok(self.read_level(tables::GLOBAL_CONFIGS, tenant)?)
    }

    fn get_subject_config(
        &self,
        tenant: &str,
        subject: &str,
    ) -> StorageResult<Option<CompatibilityLevel>> {
        let key = tables::subject_config_key(tenant, subject);
        Ok(self.read_level(tables::SUBJECT_CONFIGS, &key)?)
    }

    fn user_by_name(&self, _name: &str) -> Option<User> {
        None
    }

    fn user_by_token(&self, _token: &str) -> Option<User> {
        None
    }
}

impl StateWriter for RedbBackend {
    fn add_schema(
        &self,
        tenant: &str,
        subject: &str,
        id: i64,
        schema: &str,
    ) -> StorageResult<u32> {
        Ok(self.insert_schema(tenant, subject, id, schema)?)
    }

    fn set_global_config(&self, tenant: &str, level: CompatibilityLevel) -> StorageResult<()> {
        Ok(self.write_level(tables::GLOBAL_CONFIGS, tenant, level)?)
    }

    fn set_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> StorageResult<()> {
        let key = tables::subject_config_key(tenant, subject);
        Ok(self.write_level(tables::SUBJECT_CONFIGS, &key, level)?)
    }

    fn add_user(&self, _name: &str, _token: &str, _admin: bool) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RedbBackend) {
        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(dir.path().join("registry.redb")).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_versions_are_contiguous() {
        let (_dir, backend) = open_temp();
        assert!(backend.is_empty());

        assert_eq!(backend.add_schema("acme", "orders", 1, "a").unwrap(), 1);
        assert_eq!(backend.add_schema("acme", "orders", 2, "b").unwrap(), 2);
        assert_eq!(backend.add_schema("acme", "orders", 3, "c").unwrap(), 3);
        assert_eq!(backend.add_schema("acme", "users", 4, "d").unwrap(), 1);

        assert!(!backend.is_empty());
        assert_eq!(
            backend.get_versions("acme", "orders").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(backend.get_versions("acme", "missing").unwrap(), None);
    }

    #[test]
    fn test_reads_are_tenant_scoped() {
        let (_dir, backend) = open_temp();
        backend.add_schema("acme", "orders", 1, "a").unwrap();
        backend.add_schema("acme", "users", 2, "b").unwrap();
        backend.add_schema("acme-eu", "orders", 1, "x").unwrap();

        assert_eq!(
            backend.get_subjects("acme").unwrap(),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert_eq!(backend.get_id("acme", "b").unwrap(), Some(2));
        assert_eq!(backend.get_id("acme", "x").unwrap(), None);
        assert_eq!(
            backend.get_schema_by_id("acme-eu", 1).unwrap(),
            Some("x".to_string())
        );
        assert_eq!(backend.get_schema_by_id("acme", 9).unwrap(), None);
        assert_eq!(
            backend.get_schema("acme", "orders", 1).unwrap(),
            Some("a".to_string())
        );
        assert_eq!(backend.get_schema("acme", "orders", 2).unwrap(), None);
    }

    #[test]
    fn test_latest_schema() {
        let (_dir, backend) = open_temp();
        assert_eq!(backend.get_latest_schema("acme", "orders").unwrap(), None);

        backend.add_schema("acme", "orders", 1, "a").unwrap();
        backend.add_schema("acme", "orders", 2, "b").unwrap();
        let latest = backend.get_latest_schema("acme", "orders").unwrap().unwrap();
        assert_eq!(
            latest,
            Schema {
                subject: "orders".into(),
                id: 2,
                version: 2,
                schema: "b".into(),
            }
        );
    }

    #[test]
    fn test_find_schema_is_subject_scoped() {
        let (_dir, backend) = open_temp();
        backend.add_schema("acme", "orders", 1, "a").unwrap();
        backend.add_schema("acme", "orders", 2, "b").unwrap();
        backend.add_schema("acme", "archive", 3, "a").unwrap();

        let found = backend.find_schema("acme", "archive", "a").unwrap().unwrap();
        assert_eq!((found.id, found.version), (3, 1));
        let found = backend.find_schema("acme", "orders", "b").unwrap().unwrap();
        assert_eq!((found.id, found.version), (2, 2));
        assert_eq!(backend.find_schema("acme", "archive", "b").unwrap(), None);
        assert_eq!(backend.find_schema("acme-eu", "orders", "a").unwrap(), None);
    }

    #[test]
    fn test_configs() {
        let (_dir, backend) = open_temp();
        assert_eq!(backend.get_global_config("acme").unwrap(), None);

        backend
            .set_global_config("acme", CompatibilityLevel::Forward)
            .unwrap();
        backend
            .set_subject_config("acme", "orders", CompatibilityLevel::Full)
            .unwrap();
        backend
            .set_subject_config("acme", "orders", CompatibilityLevel::None)
            .unwrap();

        assert_eq!(
            backend.get_global_config("acme").unwrap(),
            Some(CompatibilityLevel::Forward)
        );
        assert_eq!(
            backend.get_subject_config("acme", "orders").unwrap(),
            Some(CompatibilityLevel::None)
        );
        assert_eq!(backend.get_subject_config("acme", "users").unwrap(), None);
        // Configs are not schemas
        assert!(backend.is_empty());
    }

    #[test]
    fn test_users_are_not_stored() {
        let (_dir, backend) = open_temp();
        backend.add_user("acme", "t0k3n", true).unwrap();
        assert!(backend.user_by_name("acme").is_none());
        assert!(backend.user_by_token("t0k3n").is_none());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.add_schema("acme", "orders", 1, "a").unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.get_id("acme", "a").unwrap(), Some(1));
        assert_eq!(backend.add_schema("acme", "orders", 2, "b").unwrap(), 2);
    }

    #[test]
    fn test_connect_gives_up_after_bounded_attempts() {
        let dir = TempDir::new().unwrap();
        // A directory can't be opened as a database file
        let err = RedbBackend::connect(dir.path(), 3, Duration::from_millis(1))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Unavailable { attempts: 3, .. }));

        let storage_err: StorageError = err.into();
        assert!(storage_err.is_backend());
    }

    #[test]
    fn test_connect_succeeds_on_first_attempt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("registry.redb");
        let backend = RedbBackend::connect(&path, 15, Duration::from_secs(3)).unwrap();
        assert_eq!(backend.path(), path.as_path());
    }
}
