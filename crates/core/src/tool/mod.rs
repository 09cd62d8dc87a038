//! Tool specs, calls, results, and the in-process [`ToolRegistry`].

use crate::error::{Error, Result};
use compact_str::CompactString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

pub use registry::{Handler, ToolRegistry, handler};

mod registry;
pub mod schema;

/// A tool as advertised to models and gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The name of the tool
    pub name: CompactString,

    /// The description of the tool
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments object
    #[serde(default = "schema::empty_object", alias = "inputSchema")]
    pub parameters: Value,
}

impl ToolSpec {
    /// A tool with a hand-written parameter schema.
    pub fn new(
        name: impl Into<CompactString>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// A tool whose parameters are derived from `T`.
    pub fn for_input<T: JsonSchema>(
        name: impl Into<CompactString>,
        description: impl Into<String>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        Self::new(name, description, schema.to_value())
    }
}

/// A tool invocation proposed by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The ID of the tool call
    pub id: CompactString,

    /// The tool to call
    pub name: CompactString,

    /// The arguments object
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// A call with a fresh id.
    pub fn new(name: impl Into<CompactString>, arguments: Value) -> Self {
        Self {
            id: Ulid::new().to_string().into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not match the schema; the handler never ran.
    Validation,
    /// The handler ran and failed.
    Execution,
    /// No such tool.
    NotFound,
    /// The backend serving the tool is unreachable.
    Unavailable,
    /// The call did not finish in time.
    Timeout,
}

/// Outcome of a tool call. Every call yields one of these; failures are
/// values, never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallResult {
    Success { value: Value },
    Error { kind: ToolErrorKind, detail: String },
}

impl ToolCallResult {
    /// A successful result.
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    /// A failed result.
    pub fn error(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The error kind, if the call failed.
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    /// Text fed back to a model as the tool message.
    pub fn render(&self) -> String {
        match self {
            Self::Success { value: Value::String(text) } => text.clone(),
            Self::Success { value } => value.to_string(),
            Self::Error { kind, detail } => format!("error ({kind:?}): {detail}"),
        }
    }

    /// Convert into the orchestrator error taxonomy.
    pub fn into_result(self, tool: &str) -> Result<Value> {
        match self {
            Self::Success { value } => Ok(value),
            Self::Error {
                kind: ToolErrorKind::Validation,
                detail,
            } => Err(Error::Validation {
                tool: tool.into(),
                reason: detail,
            }),
            Self::Error { detail, .. } => Err(Error::ToolExecution {
                tool: tool.into(),
                detail,
            }),
        }
    }
}
