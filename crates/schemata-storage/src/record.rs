//! Log record wire format
//!
//! Every mutation travels through the log as a key/value pair: the key is
//! the record tag, the value a flat JSON object of string fields.
//!
//! ```text
//! schema          {"client", "subject", "schema"}
//! global-config   {"client", "compatibility"}
//! subject-config  {"client", "subject", "compatibility"}
//! create-user     {"client": "admin", "name", "token", "admin": "true"|"false"}
//! ```

use schemata_common::{CompatibilityLevel, InvalidCompatibilityLevel};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stream holding the user directory
pub const ADMIN_STREAM: &str = "admin";

/// Decoding errors for log records
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown record tag: {0}")]
    UnknownTag(String),

    #[error("malformed {tag} payload: {source}")]
    Malformed {
        tag: RecordTag,
        #[source]
        source: serde_json::Error,
    },

    #[error("{tag} record is missing field '{field}'")]
    MissingField { tag: RecordTag, field: &'static str },

    #[error(transparent)]
    Compatibility(#[from] InvalidCompatibilityLevel),

    #[error("invalid admin flag: {0}")]
    InvalidAdminFlag(String),

    #[error("failed to encode {tag} payload: {source}")]
    Encode {
        tag: RecordTag,
        #[source]
        source: serde_json::Error,
    },
}

/// Record tag, carried as the log key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTag {
    Schema,
    GlobalConfig,
    SubjectConfig,
    CreateUser,
}

impl RecordTag {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::GlobalConfig => "global-config",
            Self::SubjectConfig => "subject-config",
            Self::CreateUser => "create-user",
        }
    }
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordTag {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema" => Ok(Self::Schema),
            "global-config" => Ok(Self::GlobalConfig),
            "subject-config" => Ok(Self::SubjectConfig),
            "create-user" => Ok(Self::CreateUser),
            other => Err(RecordError::UnknownTag(other.to_string())),
        }
    }
}

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Schema {
        client: String,
        subject: String,
        schema: String,
    },
    GlobalConfig {
        client: String,
        compatibility: CompatibilityLevel,
    },
    SubjectConfig {
        client: String,
        subject: String,
        compatibility: CompatibilityLevel,
    },
    CreateUser {
        name: String,
        token: String,
        admin: bool,
    },
}

impl LogRecord {
    #[must_use]
    pub const fn tag(&self) -> RecordTag {
        match self {
            Self::Schema { .. } => RecordTag::Schema,
            Self::GlobalConfig { .. } => RecordTag::GlobalConfig,
            Self::SubjectConfig { .. } => RecordTag::SubjectConfig,
            Self::CreateUser { .. } => RecordTag::CreateUser,
        }
    }

    /// Stream the record is appended to
    #[must_use]
    pub fn stream(&self) -> &str {
        match self {
            Self::Schema { client, .. }
            | Self::GlobalConfig { client, .. }
            | Self::SubjectConfig { client, .. } => client,
            Self::CreateUser { .. } => ADMIN_STREAM,
        }
    }

    /// Encode into a `(key, value)` pair
    pub fn encode(&self) -> Result<(&'static str, Vec<u8>), RecordError> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        match self {
            Self::Schema {
                client,
                subject,
                schema,
            } => {
                fields.insert("client", client);
                fields.insert("subject", subject);
                fields.insert("schema", schema);
            }
            Self::GlobalConfig {
                client,
                compatibility,
            } => {
                fields.insert("client", client);
                fields.insert("compatibility", compatibility.as_str());
            }
            Self::SubjectConfig {
                client,
                subject,
                compatibility,
            } => {
                fields.insert("client", client);
                fields.insert("subject", subject);
                fields.insert("compatibility", compatibility.as_str());
            }
            Self::CreateUser { name, token, admin } => {
                fields.insert("client", ADMIN_STREAM);
                fields.insert("name", name);
                fields.insert("token", token);
                fields.insert("admin", if *admin { "true" } else { "false" });
            }
        }
        let tag = self.tag();
        let value =
            serde_json::to_vec(&fields).map_err(|source| RecordError::Encode { tag, source })?;
        Ok((tag.as_str(), value))
    }

    /// Decode a `(key, value)` pair read from the log
    pub fn decode(key: &str, value: &[u8]) -> Result<Self, RecordError> {
        let tag: RecordTag = key.parse()?;
        let fields: BTreeMap<String, String> =
            serde_json::from_slice(value).map_err(|source| RecordError::Malformed { tag, source })?;
        let mut payload = Payload { tag, fields };

        match tag {
            RecordTag::Schema => Ok(Self::Schema {
                client: payload.take("client")?,
                subject: payload.take("subject")?,
                schema: payload.take("schema")?,
            }),
            RecordTag::GlobalConfig => Ok(Self::GlobalConfig {
                client: payload.take("client")?,
                compatibility: payload.take("compatibility")?.parse()?,
            }),
            RecordTag::SubjectConfig => Ok(Self::SubjectConfig {
                client: payload.take("client")?,
                subject: payload.take("subject")?,
                compatibility: payload.take("compatibility")?.parse()?,
            }),
            RecordTag::CreateUser => {
                let admin = match payload.take("admin")?.as_str() {
                    "true" => true,
                    "false" => false,
                    other => return Err(RecordError::InvalidAdminFlag(other.to_string())),
                };
                Ok(Self::CreateUser {
                    name: payload.take("name")?,
                    token: payload.take("token")?,
                    admin,
                })
            }
        }
    }
}

struct Payload {
    tag: RecordTag,
    fields: BTreeMap<String, String>,
}

impl Payload {
    fn take(&mut self, field: &'static str) -> Result<String, RecordError> {
        self.fields
            .remove(field)
            .ok_or(RecordError::MissingField {
                tag: self.tag,
                field,
            })
    }
}
