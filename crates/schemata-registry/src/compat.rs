//! Compatibility rules
//!
//! The rule engine is pluggable: each level maps to a
//! [`CompatibilityChecker`]. `NONE` never consults a checker.

use schemata_common::CompatibilityLevel;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Why a candidate schema was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Incompatibility(pub String);

/// Decides whether a candidate schema may follow an existing one
pub trait CompatibilityChecker: Send + Sync {
    fn validate(&self, candidate: &str, existing: &str) -> Result<(), Incompatibility>;
}

/// Checkers indexed by level
#[derive(Clone, Default)]
pub struct CompatibilityRules {
    checkers: HashMap<CompatibilityLevel, Arc<dyn CompatibilityChecker>>,
}

impl CompatibilityRules {
    /// Rules with no checker registered: only `NONE` accepts anything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record-field rules for `BACKWARD`, `FORWARD` and `FULL`
    #[must_use]
    pub fn record_fields() -> Self {
        Self::new()
            .with_checker(
                CompatibilityLevel::Backward,
                Arc::new(RecordFieldChecker::backward()),
            )
            .with_checker(
                CompatibilityLevel::Forward,
                Arc::new(RecordFieldChecker::forward()),
            )
            .with_checker(
                CompatibilityLevel::Full,
                Arc::new(RecordFieldChecker::full()),
            )
    }

    #[must_use]
    pub fn with_checker(
        mut self,
        level: CompatibilityLevel,
        checker: Arc<dyn CompatibilityChecker>,
    ) -> Self {
        self.checkers.insert(level, checker);
        self
    }

    /// Whether `candidate` may follow `existing` under `level`
    pub fn is_compatible(
        &self,
        candidate: &str,
        existing: &str,
        level: CompatibilityLevel,
    ) -> bool {
        if level == CompatibilityLevel::None {
            return true;
        }
        let Some(checker) = self.checkers.get(&level) else {
            warn!("No checker for compatibility level {}", level);
            return false;
        };
        match checker.validate(candidate, existing) {
            Ok(()) => true,
            Err(e) => {
                info!("Compatibility check for level {} did not pass: {}", level, e);
                false
            }
        }
    }
}

/// Field-level rules over record schemas written as JSON documents.
///
/// Reading new data with an old schema (forward) tolerates added fields;
/// reading old data with a new schema (backward) requires every added
/// field to carry a default. Non-record schemas must keep their type.
#[derive(Debug, Clone, Copy)]
pub struct RecordFieldChecker {
    backward: bool,
    forward: bool,
}

impl RecordFieldChecker {
    #[must_use]
    pub const fn backward() -> Self {
        Self {
            backward: true,
            forward: false,
        }
    }

    #[must_use]
    pub const fn forward() -> Self {
        Self {
            backward: false,
            forward: true,
        }
    }

    #[must_use]
    pub const fn full() -> Self {
        Self {
            backward: true,
            forward: true,
        }
    }
}

/// Record fields by name, `true` when the field has a default
fn record_fields(schema: &Value) -> Option<BTreeMap<&str, bool>> {
    let fields = schema.get("fields")?.as_array()?;
    Some(
        fields
            .iter()
            .filter_map(|field| {
                let name = field.get("name")?.as_str()?;
                Some((name, field.get("default").is_some()))
            })
            .collect(),
    )
}

fn parse(schema: &str, what: &str) -> Result<Value, Incompatibility> {
    serde_json::from_str(schema).map_err(|e| Incompatibility(format!("{what} schema: {e}")))
}

/// Fields of `reader` missing from `writer` must have a default
fn readable(reader: &BTreeMap<&str, bool>, writer: &BTreeMap<&str, bool>) -> Result<(), String> {
    match reader
        .iter()
        .find(|(name, has_default)| !writer.contains_key(*name) && !**has_default)
    {
        Some((name, _)) => Err(format!("field '{name}' has no default")),
        None => Ok(()),
    }
}

impl CompatibilityChecker for RecordFieldChecker {
    fn validate(&self, candidate: &str, existing: &str) -> Result<(), Incompatibility> {
        let candidate = parse(candidate, "candidate")?;
        let existing = parse(existing, "existing")?;

        let (Some(new_fields), Some(old_fields)) =
            (record_fields(&candidate), record_fields(&existing))
        else {
            return if candidate.get("type") == existing.get("type") {
                Ok(())
            } else {
                Err(Incompatibility("schema type changed".into()))
            };
        };

        if self.backward {
            readable(&new_fields, &old_fields)
                .map_err(|e| Incompatibility(format!("backward: {e}")))?;
        }
        if self.forward {
            readable(&old_fields, &new_fields)
                .map_err(|e| Incompatibility(format!("forward: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;
    const V2_DEFAULTED: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"long"},
        {"name":"note","type":"string","default":""}]}"#;
    const V2_REQUIRED: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"long"},
        {"name":"note","type":"string"}]}"#;

    #[test]
    fn test_none_accepts_anything() {
        let rules = CompatibilityRules::new();
        assert!(rules.is_compatible("not even json", V1, CompatibilityLevel::None));
    }

    #[test]
    fn test_missing_checker_rejects() {
        let rules = CompatibilityRules::new();
        assert!(!rules.is_compatible(V1, V1, CompatibilityLevel::Backward));
    }

    #[test]
    fn test_backward_requires_defaults_for_new_fields() {
        let rules = CompatibilityRules::record_fields();
        assert!(rules.is_compatible(V2_DEFAULTED, V1, CompatibilityLevel::Backward));
        assert!(!rules.is_compatible(V2_REQUIRED, V1, CompatibilityLevel::Backward));
        // Dropping a field is fine for readers of old data
        assert!(rules.is_compatible(V1, V2_REQUIRED, CompatibilityLevel::Backward));
    }

    #[test]
    fn test_forward_and_full() {
        let rules = CompatibilityRules::record_fields();
        assert!(rules.is_compatible(V2_REQUIRED, V1, CompatibilityLevel::Forward));
        assert!(!rules.is_compatible(V1, V2_REQUIRED, CompatibilityLevel::Forward));

        assert!(rules.is_compatible(V2_DEFAULTED, V1, CompatibilityLevel::Full));
        assert!(!rules.is_compatible(V2_REQUIRED, V1, CompatibilityLevel::Full));
    }

    #[test]
    fn test_primitive_type_change() {
        let checker = RecordFieldChecker::full();
        assert!(checker
            .validate(r#"{"type":"string"}"#, r#"{"type":"string"}"#)
            .is_ok());
        assert_eq!(
            checker
                .validate(r#"{"type":"long"}"#, r#"{"type":"string"}"#)
                .unwrap_err(),
            Incompatibility("schema type changed".into())
        );
    }
}
