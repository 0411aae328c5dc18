// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Schema gate — maps component names to JSON Schema files and validates
//! configuration documents against them
//!
//! A missing schema file is reported as its own outcome, never as a
//! validation failure. Callers decide what a missing schema means; restore
//! and migration let such documents through.

pub mod validator;

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use validator::Violation;

/// Scheduler task schema, shipped in `<scheduler>/schema/`
pub const SCHEDULER_TASK_SCHEMA: &str = "schema_cache_record.json";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid component name '{0}', expected domain::Type")]
    InvalidComponentName(String),
    #[error("failed to read schema {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("schema {} is not valid JSON: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// A daemon component identifier such as `iqrf::MqttMessaging`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentName(String);

impl ComponentName {
    pub fn parse(name: &str) -> Result<Self, SchemaError> {
        let valid = match name.split_once("::") {
            Some((domain, kind)) => {
                !domain.is_empty()
                    && !kind.is_empty()
                    && name.split("::").all(|part| {
                        !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    })
            }
            None => false,
        };
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(SchemaError::InvalidComponentName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `iqrf::MqttMessaging` -> `schema__iqrf__MqttMessaging.json`
    pub fn schema_file_name(&self) -> String {
        format!("schema__{}.json", self.0.replace("::", "__"))
    }
}

impl std::fmt::Display for ComponentName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loaded schema document
#[derive(Debug, Clone)]
pub struct Schema {
    path: PathBuf,
    document: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(Vec<Violation>),
}

impl Schema {
    pub fn validate(&self, document: &Value) -> Verdict {
        let violations = validator::validate(&self.document, document);
        if violations.is_empty() {
            Verdict::Valid
        } else {
            debug!("{} violation(s) against {}", violations.len(), self.path.display());
            Verdict::Invalid(violations)
        }
    }
}

#[derive(Debug, Clone)]
pub enum SchemaLookup {
    Found(Schema),
    NotFound { path: PathBuf },
}

/// A directory of schema files
#[derive(Debug, Clone)]
pub struct SchemaStore {
    dir: PathBuf,
}

impl SchemaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resolve(&self, component: &ComponentName) -> Result<SchemaLookup, SchemaError> {
        self.resolve_file(&component.schema_file_name())
    }

    pub fn resolve_file(&self, file_name: &str) -> Result<SchemaLookup, SchemaError> {
        let path = self.dir.join(file_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SchemaLookup::NotFound { path });
            }
            Err(source) => return Err(SchemaError::Read { path, source }),
        };
        let document = serde_json::from_str(&content)
            .map_err(|source| SchemaError::Parse { path: path.clone(), source })?;
        debug!("Loaded schema {}", path.display());
        Ok(SchemaLookup::Found(Schema { path, document }))
    }
}

/// Result of running one document through the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Valid,
    /// No schema ships for this document; let it through
    SchemaNotFound,
    Invalid(Vec<Violation>),
}

/// Validates configuration documents against the schema store
#[derive(Debug, Clone)]
pub struct SchemaGate {
    store: SchemaStore,
}

impl SchemaGate {
    pub fn new(store: SchemaStore) -> Self {
        Self { store }
    }

    /// Daemon component document. The component name is read from the
    /// document's `component` property.
    pub fn check_component(&self, document: &Value) -> Result<(Option<ComponentName>, GateOutcome), SchemaError> {
        let name = match document.get("component").and_then(Value::as_str) {
            Some(name) => name,
            None => {
                return Ok((
                    None,
                    GateOutcome::Invalid(vec![Violation {
                        pointer: "/component".to_string(),
                        message: "missing component name".to_string(),
                    }]),
                ));
            }
        };
        let component = match ComponentName::parse(name) {
            Ok(component) => component,
            Err(e) => {
                return Ok((
                    None,
                    GateOutcome::Invalid(vec![Violation {
                        pointer: "/component".to_string(),
                        message: e.to_string(),
                    }]),
                ));
            }
        };
        let outcome = match self.store.resolve(&component)? {
            SchemaLookup::Found(schema) => verdict_to_outcome(schema.validate(document)),
            SchemaLookup::NotFound { path } => {
                warn!("No schema for component {} ({}), accepting as-is", component, path.display());
                GateOutcome::SchemaNotFound
            }
        };
        Ok((Some(component), outcome))
    }

    /// Document checked against a fixed schema file of the store
    pub fn check_with(&self, file_name: &str, document: &Value) -> Result<GateOutcome, SchemaError> {
        Ok(match self.store.resolve_file(file_name)? {
            SchemaLookup::Found(schema) => verdict_to_outcome(schema.validate(document)),
            SchemaLookup::NotFound { path } => {
                warn!("Schema {} not found, accepting document as-is", path.display());
                GateOutcome::SchemaNotFound
            }
        })
    }
}

fn verdict_to_outcome(verdict: Verdict) -> GateOutcome {
    match verdict {
        Verdict::Valid => GateOutcome::Valid,
        Verdict::Invalid(violations) => GateOutcome::Invalid(violations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_with_mqtt_schema() -> (TempDir, SchemaGate) {
        let dir = TempDir::new().unwrap();
        let schema = json!({
            "type": "object",
            "required": ["component", "instance", "BrokerAddr"],
            "properties": {
                "component": {"type": "string", "enum": ["iqrf::MqttMessaging"]},
                "instance": {"type": "string"},
                "BrokerAddr": {"type": "string"},
                "Qos": {"type": "integer", "minimum": 0, "maximum": 2}
            }
        });
        fs::write(dir.path().join("schema__iqrf__MqttMessaging.json"), schema.to_string()).unwrap();
        let gate = SchemaGate::new(SchemaStore::new(dir.path()));
        (dir, gate)
    }

    #[test]
    fn component_names_map_to_schema_files() {
        let name = ComponentName::parse("iqrf::MqttMessaging").unwrap();
        assert_eq!(name.schema_file_name(), "schema__iqrf__MqttMessaging.json");
        let nested = ComponentName::parse("shape::TraceFileService").unwrap();
        assert_eq!(nested.schema_file_name(), "schema__shape__TraceFileService.json");
        assert!(ComponentName::parse("MqttMessaging").is_err());
        assert!(ComponentName::parse("iqrf::").is_err());
        assert!(ComponentName::parse("../x::y").is_err());
    }

    #[test]
    fn valid_document_passes() {
        let (_dir, gate) = store_with_mqtt_schema();
        let doc = json!({"component": "iqrf::MqttMessaging", "instance": "a", "BrokerAddr": "tcp://x", "Qos": 1});
        let (component, outcome) = gate.check_component(&doc).unwrap();
        assert_eq!(component.unwrap().as_str(), "iqrf::MqttMessaging");
        assert_eq!(outcome, GateOutcome::Valid);
    }

    #[test]
    fn invalid_document_lists_violations() {
        let (_dir, gate) = store_with_mqtt_schema();
        let doc = json!({"component": "iqrf::MqttMessaging", "instance": "a", "Qos": 7});
        let (_, outcome) = gate.check_component(&doc).unwrap();
        match outcome {
            GateOutcome::Invalid(violations) => {
                assert_eq!(violations.len(), 2);
                assert!(violations.iter().any(|v| v.pointer == "/Qos"));
                assert!(violations.iter().any(|v| v.message.contains("BrokerAddr")));
            }
            other => panic!("expected violations, got {:?}", other),
        }
    }

    #[test]
    fn missing_schema_is_not_a_failure() {
        let (_dir, gate) = store_with_mqtt_schema();
        let doc = json!({"component": "iqrf::JsCache", "instance": "cache"});
        let (_, outcome) = gate.check_component(&doc).unwrap();
        assert_eq!(outcome, GateOutcome::SchemaNotFound);
    }

    #[test]
    fn missing_component_property_is_a_violation() {
        let (_dir, gate) = store_with_mqtt_schema();
        let (component, outcome) = gate.check_component(&json!({"instance": "a"})).unwrap();
        assert!(component.is_none());
        assert!(matches!(outcome, GateOutcome::Invalid(ref v) if v[0].pointer == "/component"));
    }

    #[test]
    fn unparsable_schema_is_a_server_error() {
        let (dir, gate) = store_with_mqtt_schema();
        fs::write(dir.path().join("schema__iqrf__Broken.json"), "{").unwrap();
        let err = gate.check_component(&json!({"component": "iqrf::Broken"})).unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }
}
