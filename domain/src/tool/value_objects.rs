//! Tool value objects: typed arguments going in and execution results coming out.

use super::entities::ParamType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A primitive value that passed the input filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl TypedValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            TypedValue::Boolean(_) => ParamType::Boolean,
            TypedValue::Integer(_) => ParamType::Integer,
            TypedValue::Number(_) => ParamType::Number,
            TypedValue::String(_) => ParamType::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Boolean(b) => write!(f, "{}", b),
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Number(n) => write!(f, "{}", n),
            TypedValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Arguments after filtering: only declared keys, each of its declared type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypedArguments(BTreeMap<String, TypedValue>);

impl TypedArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: TypedValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypedValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, TypedValue)> for TypedArguments {
    fn from_iter<I: IntoIterator<Item = (String, TypedValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Not loaded, or forbidden by the caller's deny-list.
    UnknownTool,
    InputRejected,
    Timeout,
    ToolInternalError,
    /// Back-pressure from the tool; only surfaced once retries are exhausted.
    TransientFailure,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "UNKNOWN_TOOL",
            FailureKind::InputRejected => "INPUT_REJECTED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::ToolInternalError => "TOOL_INTERNAL_ERROR",
            FailureKind::TransientFailure => "TRANSIENT_FAILURE",
        }
    }

    /// The fixed message a caller sees for this kind.
    pub fn public_message(&self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "unknown tool",
            FailureKind::InputRejected => "input rejected",
            FailureKind::Timeout => "tool execution timed out",
            FailureKind::ToolInternalError => "tool execution failed",
            FailureKind::TransientFailure => "tool temporarily unavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::TransientFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

const OUTPUT_OPEN: &str = "[TOOL OUTPUT]";
const OUTPUT_CLOSE: &str = "[/TOOL OUTPUT]";

/// Outcome of one call through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { output: String },
    Failure { kind: FailureKind, message: String },
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        ExecutionResult::Success {
            output: output.into(),
        }
    }

    /// Failure carrying the kind's fixed public message.
    pub fn failure(kind: FailureKind) -> Self {
        ExecutionResult::Failure {
            kind,
            message: kind.public_message().to_string(),
        }
    }

    pub fn input_rejected(reason: impl fmt::Display) -> Self {
        ExecutionResult::Failure {
            kind: FailureKind::InputRejected,
            message: format!("input rejected: {}", reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { output } => Some(output),
            ExecutionResult::Failure { .. } => None,
        }
    }

    /// Render for a downstream conversation, fencing tool output in markers.
    ///
    /// Markers that appear inside the output itself are rewritten so a tool
    /// cannot close the fence early.
    pub fn to_tool_content(&self) -> String {
        match self {
            ExecutionResult::Success { output } => {
                let safe = output
                    .replace(OUTPUT_OPEN, "[TOOL_OUTPUT]")
                    .replace(OUTPUT_CLOSE, "[/TOOL_OUTPUT]");
                format!("{}\n{}\n{}", OUTPUT_OPEN, safe, OUTPUT_CLOSE)
            }
            ExecutionResult::Failure { kind, message } => {
                format!("[TOOL ERROR] {}: {}", kind.code(), message)
            }
        }
    }
}
