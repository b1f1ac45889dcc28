//! Core type definitions for Schemata
//!
//! Value types shared by the storage, auth and registry crates.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A stored schema version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Subject the schema belongs to
    pub subject: String,
    /// Tenant-wide global ID (log position + 1)
    pub id: i64,
    /// Per-subject version, starting at 1
    pub version: u32,
    /// Raw schema document
    pub schema: String,
}

/// Compatibility policy applied when a new schema version is registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompatibilityLevel {
    /// No check at all
    #[display("NONE")]
    None,
    /// New schema can read data written with the previous one
    #[default]
    #[display("BACKWARD")]
    Backward,
    /// Previous schema can read data written with the new one
    #[display("FORWARD")]
    Forward,
    /// Both backward and forward
    #[display("FULL")]
    Full,
}

impl CompatibilityLevel {
    /// All levels, in wire order
    pub const ALL: [Self; 4] = [Self::None, Self::Backward, Self::Forward, Self::Full];

    /// Wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Backward => "BACKWARD",
            Self::Forward => "FORWARD",
            Self::Full => "FULL",
        }
    }
}

/// Error parsing a compatibility level
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid compatibility level: {0}")]
pub struct InvalidCompatibilityLevel(pub String);

impl FromStr for CompatibilityLevel {
    type Err = InvalidCompatibilityLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| InvalidCompatibilityLevel(s.to_string()))
    }
}

/// Compatibility configuration, either tenant-global or per subject
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    pub compatibility: CompatibilityLevel,
}

impl CompatibilityConfig {
    #[must_use]
    pub const fn new(compatibility: CompatibilityLevel) -> Self {
        Self { compatibility }
    }
}

impl From<CompatibilityLevel> for CompatibilityConfig {
    fn from(compatibility: CompatibilityLevel) -> Self {
        Self { compatibility }
    }
}

/// A registry user, as replayed from `create-user` log records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub token: String,
    pub admin: bool,
}

impl User {
    pub fn new(name: impl Into<String>, token: impl Into<String>, admin: bool) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_roundtrip() {
        for level in CompatibilityLevel::ALL {
            assert_eq!(level.as_str().parse::<CompatibilityLevel>().unwrap(), level);
            assert_eq!(level.to_string(), level.as_str());
        }
    }

    #[test]
    fn test_level_parse_rejects_lowercase() {
        let err = "full".parse::<CompatibilityLevel>().unwrap_err();
        assert_eq!(err, InvalidCompatibilityLevel("full".into()));
    }

    #[test]
    fn test_config_json_shape() {
        let config = CompatibilityConfig::new(CompatibilityLevel::Full);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"compatibility":"FULL"}"#);
    }

    #[test]
    fn test_default_level_is_backward() {
        assert_eq!(CompatibilityLevel::default(), CompatibilityLevel::Backward);
    }
}
