//! Tool entities — capability descriptors and their input contracts.

use super::value_objects::TypedValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Names a tool may not take; they shadow gateway operations.
pub const RESERVED_TOOL_NAMES: &[&str] = &[
    "list_tools",
    "list_pending",
    "approve",
    "call",
    "help",
    "gateway",
];

/// Maximum length of a tool name, in bytes.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Primitive type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamType::String),
            "integer" => Ok(ParamType::Integer),
            "number" => Ok(ParamType::Number),
            "boolean" => Ok(ParamType::Boolean),
            other => Err(format!("unknown parameter type: {}", other)),
        }
    }
}

/// One entry of a tool's input contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    /// Enumerated constraint; when present the value must be one of these.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<TypedValue>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type,
            required: false,
            allowed: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_allowed(mut self, values: Vec<TypedValue>) -> Self {
        self.allowed = Some(values);
        self
    }
}

/// Declared name, description and typed input contract of a tool.
///
/// Pure data. The parameter order is the declaration order in the source unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// Why a tool name was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("tool name is empty")]
    Empty,
    #[error("tool name exceeds {MAX_TOOL_NAME_LEN} bytes")]
    TooLong,
    #[error("tool name must start with a lowercase ASCII letter")]
    InvalidStart,
    #[error("tool name contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("tool name '{0}' is reserved")]
    Reserved(String),
}

/// Check a tool name against `^[a-z][a-z0-9_]{0,63}$` and the reserved list.
pub fn validate_tool_name(name: &str) -> Result<(), NameError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(NameError::Empty);
    };
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !first.is_ascii_lowercase() {
        return Err(NameError::InvalidStart);
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')) {
        return Err(NameError::InvalidCharacter(bad));
    }
    if RESERVED_TOOL_NAMES.contains(&name) {
        return Err(NameError::Reserved(name.to_string()));
    }
    Ok(())
}
