//! Values flowing along pipeline edges.

use crate::error::{AgentError, Result};
use crate::llm::Completion;
use crate::schema_rag::object_index::TableSchemaObject;
use std::collections::HashMap;
use std::fmt;

/// Type tag of a port or node output, checked when the graph is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Tables,
    Completion,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Tables => "tables",
            ValueKind::Completion => "completion",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Tables(Vec<TableSchemaObject>),
    Completion(Completion),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Tables(_) => ValueKind::Tables,
            Value::Completion(_) => ValueKind::Completion,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tables(&self) -> Option<&[TableSchemaObject]> {
        match self {
            Value::Tables(tables) => Some(tables),
            _ => None,
        }
    }

    pub fn as_completion(&self) -> Option<&Completion> {
        match self {
            Value::Completion(completion) => Some(completion),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

/// A named, typed input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub kind: ValueKind,
}

impl Port {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Text)
    }
}

/// Values delivered to one node invocation, keyed by port name.
#[derive(Debug, Default)]
pub struct Inputs {
    values: HashMap<String, Value>,
}

impl Inputs {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, port: &str) -> Result<&Value> {
        self.values
            .get(port)
            .ok_or_else(|| AgentError::Graph(format!("No value delivered to port '{}'", port)))
    }

    pub fn text(&self, port: &str) -> Result<&str> {
        let value = self.get(port)?;
        value.as_text().ok_or_else(|| mismatch(port, ValueKind::Text, value))
    }

    pub fn tables(&self, port: &str) -> Result<&[TableSchemaObject]> {
        let value = self.get(port)?;
        value.as_tables().ok_or_else(|| mismatch(port, ValueKind::Tables, value))
    }

    pub fn completion(&self, port: &str) -> Result<&Completion> {
        let value = self.get(port)?;
        value
            .as_completion()
            .ok_or_else(|| mismatch(port, ValueKind::Completion, value))
    }

    /// All text-valued ports, for nodes that take a dynamic set of fields.
    pub fn texts(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .filter_map(|(port, value)| value.as_text().map(|t| (port.clone(), t.to_string())))
            .collect()
    }
}

fn mismatch(port: &str, expected: ValueKind, got: &Value) -> AgentError {
    AgentError::Graph(format!(
        "Port '{}' expects {}, got {}",
        port,
        expected,
        got.kind()
    ))
}
