//! In-memory materialized view
//!
//! Serves every low-latency read. In steady state the replay engine is its
//! only writer; each logical mapping has its own lock so a schema append
//! never blocks a token lookup. `parking_lot` locks are fair enough that a
//! busy writer can't starve readers.

use crate::error::StorageResult;
use crate::traits::{StateReader, StateWriter};
use parking_lot::RwLock;
use schemata_common::{CompatibilityLevel, Schema, User};
use std::collections::{BTreeMap, HashMap};

/// One stored version of a subject
#[derive(Debug, Clone)]
struct SchemaVersion {
    version: u32,
    id: i64,
    schema: String,
}

/// Users indexed by name and by token
#[derive(Default)]
struct UserDirectory {
    by_name: HashMap<String, User>,
    by_token: HashMap<String, String>,
}

/// Ordered, comparable copy of the whole cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// tenant -> subject -> versions in insertion order
    pub schemas: BTreeMap<String, BTreeMap<String, Vec<Schema>>>,
    pub global_configs: BTreeMap<String, CompatibilityLevel>,
    pub subject_configs: BTreeMap<(String, String), CompatibilityLevel>,
    pub users: BTreeMap<String, User>,
}

/// In-memory registry state
#[derive(Default)]
pub struct MemoryCache {
    schemas: RwLock<HashMap<String, BTreeMap<String, Vec<SchemaVersion>>>>,
    global_configs: RwLock<HashMap<String, CompatibilityLevel>>,
    subject_configs: RwLock<HashMap<String, HashMap<String, CompatibilityLevel>>>,
    users: RwLock<UserDirectory>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current state
    pub fn snapshot(&self) -> CacheSnapshot {
        let schemas = self
            .schemas
            .read()
            .iter()
            .map(|(tenant, subjects)| {
                let subjects = subjects
                    .iter()
                    .map(|(subject, versions)| {
                        let versions = versions
                            .iter()
                            .map(|v| Schema {
                                subject: subject.clone(),
                                id: v.id,
                                version: v.version,
                                schema: v.schema.clone(),
                            })
                            .collect();
                        (subject.clone(), versions)
                    })
                    .collect();
                (tenant.clone(), subjects)
            })
            .collect();

        let global_configs = self
            .global_configs
            .read()
            .iter()
            .map(|(tenant, level)| (tenant.clone(), *level))
            .collect();

        let subject_configs = self
            .subject_configs
            .read()
            .iter()
            .flat_map(|(tenant, subjects)| {
                subjects
                    .iter()
                    .map(|(subject, level)| ((tenant.clone(), subject.clone()), *level))
            })
            .collect();

        let users = self
            .users
            .read()
            .by_name
            .iter()
            .map(|(name, user)| (name.clone(), user.clone()))
            .collect();

        CacheSnapshot {
            schemas,
            global_configs,
            subject_configs,
            users,
        }
    }
}

impl StateReader for MemoryCache {
    fn is_empty(&self) -> bool {
        self.schemas
            .read()
            .values()
            .all(|subjects| subjects.values().all(Vec::is_empty))
    }

    fn get_id(&self, tenant: &str, schema: &str) -> StorageResult<Option<i64>> {
        let schemas = self.schemas.read();
        Ok(schemas.get(tenant).and_then(|subjects| {
            subjects
                .values()
                .flatten()
                .find(|v| v.schema == schema)
                .map(|v| v.id)
        }))
    }

    fn get_schema_by_id(&self, tenant: &str, id: i64) -> StorageResult<Option<String>> {
        let schemas = self.schemas.read();
        Ok(schemas.get(tenant).and_then(|subjects| {
            subjects
                .values()
                .flatten()
                .find(|v| v.id == id)
                .map(|v| v.schema.clone())
        }))
    }

    fn get_subjects(&self, tenant: &str) -> StorageResult<Vec<String>> {
        let schemas = self.schemas.read();
        Ok(schemas
            .get(tenant)
            .map(|subjects| subjects.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn get_versions(&self, tenant: &str, subject: &str) -> StorageResult<Option<Vec<u32>>> {
        let schemas = self.schemas.read();
        Ok(schemas
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .filter(|versions| !versions.is_empty())
            .map(|versions| versions.iter().map(|v| v.version).collect()))
    }

    fn get_schema(
        &self,
        tenant: &str,
        subject: &str,
        version: u32,
    ) -> StorageResult<Option<String>> {
        let schemas = self.schemas.read();
        Ok(schemas
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .and_then(|versions| versions.iter().find(|v| v.version == version))
            .map(|v| v.schema.clone()))
    }

    fn get_latest_schema(&self, tenant: &str, subject: &str) -> StorageResult<Option<Schema>> {
        let schemas = self.schemas.read();
        Ok(schemas
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .and_then(|versions| versions.iter().max_by_key(|v| v.version))
            .map(|v| Schema {
                subject: subject.to_string(),
                id: v.id,
                version: v.version,
                schema: v.schema.clone(),
            }))
    }

    fn find_schema(
        &self,
        tenant: &str,
        subject: &str,
        schema: &str,
    ) -> StorageResult<Option<Schema>> {
        let schemas = self.schemas.read();
        Ok(schemas
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .and_then(|versions| {
                versions
                    .iter()
                    .filter(|v| v.schema == schema)
                    .min_by_key(|v| v.version)
            })
            .map(|v| Schema {
                subject: subject.to_string(),
                id: v.id,
                version: v.version,
                schema: v.schema.clone(),
            }))
    }

    fn get_global_config(&self, tenant: &str) -> StorageResult<Option<CompatibilityLevel>> {
        Ok(self.global_configs.read().get(tenant).copied())
    }

    fn get_subject_config(
        &self,
        tenant: &str,
        subject: &str,
    ) -> StorageResult<Option<CompatibilityLevel>> {
        Ok(self
            .subject_configs
            .read()
            .get(tenant)
            .and_then(|subjects| subjects.get(subject))
            .copied())
    }

    fn user_by_name(&self, name: &str) -> Option<User> {
        self.users.read().by_name.get(name).cloned()
    }

    fn user_by_token(&self, token: &str) -> Option<User> {
        let users = self.users.read();
        users
            .by_token
            .get(token)
            .and_then(|name| users.by_name.get(name))
            .cloned()
    }
}

impl StateWriter for MemoryCache {
    fn add_schema(&self, tenant: &str, subject: &str, id: i64, schema: &str) -> StorageResult<u32> {
        let mut schemas = self.schemas.write();
        let versions = schemas
            .entry(tenant.to_string())
            .or_default()
            .entry(subject.to_string())
            .or_default();
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        versions.push(SchemaVersion {
            version,
            id,
            schema: schema.to_string(),
        });
        Ok(version)
    }

    fn set_global_config(&self, tenant: &str, level: CompatibilityLevel) -> StorageResult<()> {
        self.global_configs.write().insert(tenant.to_string(), level);
        Ok(())
    }

    fn set_subject_config(
        &self,
        tenant: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> StorageResult<()> {
        self.subject_configs
            .write()
            .entry(tenant.to_string())
            .or_default()
            .insert(subject.to_string(), level);
        Ok(())
    }

    fn add_user(&self, name: &str, token: &str, admin: bool) -> StorageResult<()> {
        let mut users = self.users.write();
        let user = User::new(name, token, admin);
        if let Some(previous) = users.by_name.insert(name.to_string(), user) {
            users.by_token.remove(&previous.token);
        }
        users.by_token.insert(token.to_string(), name.to_string());
        Ok(())
    }
}
