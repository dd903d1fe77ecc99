//! Device schema documents.
//!
//! A device publishes a schema describing its variables and actions:
//!
//! ```text
//! {
//!   "DATA":   { "<var>": {"TYPE": "UINT8"|"INT"|"STRING", "READ": bool, "WRITE": bool} },
//!   "ACTION": { "<action>": { "<param>": "UINT8"|"INT"|"STRING" } }
//! }
//! ```
//!
//! Both sections are optional.  Entries with an unknown or missing type are
//! skipped and logged, so one bad entry never hides the rest of the schema.
//! Entries are kept in name order.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::protocol::value::ValueType;

/// Errors produced by [`DeviceSchema::parse`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("schema is not a JSON object")]
    NotAnObject,

    /// `DATA` or `ACTION` is present but is not an object.
    #[error("schema section {0:?} is not an object")]
    InvalidSection(&'static str),
}

/// One variable a device exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: String,
    pub value_type: ValueType,
    pub readable: bool,
    pub writable: bool,
}

/// One action a device can perform, with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: String,
    pub parameters: Vec<(String, ValueType)>,
}

impl ActionSpec {
    pub fn parameter_type(&self, name: &str) -> Option<ValueType> {
        self.parameters
            .iter()
            .find(|(p, _)| p == name)
            .map(|(_, t)| *t)
    }
}

/// Renders the call form `name(p1,p2)`.
impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (param, _)) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(param)?;
        }
        f.write_str(")")
    }
}

/// The parsed schema of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSchema {
    pub variables: Vec<VariableSpec>,
    pub actions: Vec<ActionSpec>,
}

impl DeviceSchema {
    /// Parses a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the document is not a JSON object or one
    /// of its sections is not an object.  Malformed entries inside a section
    /// are skipped rather than reported.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let document: serde_json::Value =
            serde_json::from_str(text).map_err(SchemaError::InvalidJson)?;
        let serde_json::Value::Object(root) = document else {
            return Err(SchemaError::NotAnObject);
        };

        let mut schema = Self::default();

        if let Some(section) = root.get("DATA") {
            let data = section
                .as_object()
                .ok_or(SchemaError::InvalidSection("DATA"))?;
            for (name, entry) in data {
                let Some(entry) = entry.as_object() else {
                    debug!("schema variable {name:?} is not an object; skipped");
                    continue;
                };
                let Some(value_type) = entry
                    .get("TYPE")
                    .and_then(|t| t.as_str())
                    .and_then(ValueType::from_wire)
                else {
                    debug!("schema variable {name:?} has no known TYPE; skipped");
                    continue;
                };
                let flag = |key: &str| entry.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
                schema.variables.push(VariableSpec {
                    name: name.clone(),
                    value_type,
                    readable: flag("READ"),
                    writable: flag("WRITE"),
                });
            }
        }

        if let Some(section) = root.get("ACTION") {
            let actions = section
                .as_object()
                .ok_or(SchemaError::InvalidSection("ACTION"))?;
            for (name, entry) in actions {
                let Some(params) = entry.as_object() else {
                    debug!("schema action {name:?} is not an object; skipped");
                    continue;
                };
                let mut parameters: Vec<(String, ValueType)> = params
                    .iter()
                    .filter_map(|(param, kind)| {
                        let kind = kind.as_str().and_then(ValueType::from_wire);
                        if kind.is_none() {
                            debug!("parameter {param:?} of action {name:?} has no known type; skipped");
                        }
                        kind.map(|k| (param.clone(), k))
                    })
                    .collect();
                parameters.sort_by(|a, b| a.0.cmp(&b.0));
                schema.actions.push(ActionSpec {
                    name: name.clone(),
                    parameters,
                });
            }
        }

        schema.variables.sort_by(|a, b| a.name.cmp(&b.name));
        schema.actions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schema)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
