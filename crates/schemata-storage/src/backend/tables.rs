//! Redb table definitions for the durable backend.

use redb::TableDefinition;

// Key: "tenant\x00subject\x00version" with the version zero-padded to 10
// digits so key order is version order. Value: JSON-encoded StoredSchema
pub const SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new("schemas");

/// Table mapping a key to a compatibility level
pub type LevelTable = TableDefinition<'static, &'static str, &'static str>;

// Key: tenant, Value: compatibility level
pub const GLOBAL_CONFIGS: LevelTable = TableDefinition::new("global_configs");

// Key: "tenant\x00subject", Value: compatibility level
pub const SUBJECT_CONFIGS: LevelTable = TableDefinition::new("subject_configs");

const SEP: char = '\x00';

/// Prefix shared by every schema row of a tenant
pub fn tenant_prefix(tenant: &str) -> String {
    format!("{tenant}{SEP}")
}

/// Prefix shared by every version of a subject
pub fn subject_prefix(tenant: &str, subject: &str) -> String {
    format!("{tenant}{SEP}{subject}{SEP}")
}

pub fn schema_key(tenant: &str, subject: &str, version: u32) -> String {
    format!("{tenant}{SEP}{subject}{SEP}{version:010}")
}

pub fn subject_config_key(tenant: &str, subject: &str) -> String {
    format!("{tenant}{SEP}{subject}")
}

/// Split a schema key into `(subject, version)`
pub fn parse_schema_key(key: &str) -> Option<(&str, u32)> {
    let mut parts = key.splitn(3, SEP);
    let _tenant = parts.next()?;
    let subject = parts.next()?;
    let version = parts.next()?.parse().ok()?;
    Some((subject, version))
}
