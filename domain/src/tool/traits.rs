//! Tool domain traits
//!
//! Contains the pure input filter that turns caller-supplied JSON into
//! [`TypedArguments`]. The async `Callable` seam lives in the application
//! layer (ports) because it needs a runtime.

use super::entities::{CapabilityDescriptor, ParamSpec, ParamType};
use super::value_objects::{TypedArguments, TypedValue};
use serde_json::Value;

/// Largest integer magnitude an `f64` represents exactly.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

/// Why an argument map was refused. Messages name the parameter, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("parameter '{name}' must be of type {expected}")]
    TypeMismatch { name: String, expected: ParamType },
    #[error("parameter '{0}' is not one of the allowed values")]
    NotAllowed(String),
}

/// Validates and coerces raw arguments against a descriptor's input contract.
///
/// This is a pure domain trait; it runs on every call, not only at admission.
pub trait InputFilter: Send + Sync {
    fn filter(
        &self,
        descriptor: &CapabilityDescriptor,
        raw: &Value,
    ) -> Result<TypedArguments, InputError>;
}

/// Default filter: unknown keys rejected, required keys enforced, lossless
/// coercion only, enumerated constraints checked.
///
/// | Declared | Accepts |
/// |----------|---------|
/// | `string` | JSON string |
/// | `integer` | JSON integer, float with no fractional part, decimal string |
/// | `number` | JSON number (integers up to 2^53), numeric string |
/// | `boolean` | JSON bool, `"true"` / `"false"` |
///
/// A JSON `null` for the whole argument map counts as `{}`.
#[derive(Debug, Clone, Default)]
pub struct StrictInputFilter;

impl InputFilter for StrictInputFilter {
    fn filter(
        &self,
        descriptor: &CapabilityDescriptor,
        raw: &Value,
    ) -> Result<TypedArguments, InputError> {
        let empty = serde_json::Map::new();
        let map = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(InputError::NotAnObject),
        };

        if let Some(unknown) = map.keys().find(|k| descriptor.parameter(k).is_none()) {
            return Err(InputError::UnknownParameter(unknown.clone()));
        }

        let mut typed = TypedArguments::new();
        for param in &descriptor.parameters {
            match map.get(&param.name) {
                Some(value) => {
                    let coerced = coerce(param, value)?;
                    check_allowed(param, &coerced)?;
                    typed.insert(param.name.clone(), coerced);
                }
                None if param.required => {
                    return Err(InputError::MissingParameter(param.name.clone()));
                }
                None => {}
            }
        }
        Ok(typed)
    }
}

fn coerce(param: &ParamSpec, value: &Value) -> Result<TypedValue, InputError> {
    let coerced = match param.param_type {
        ParamType::String => match value {
            Value::String(s) => Some(TypedValue::String(s.clone())),
            _ => None,
        },
        ParamType::Integer => coerce_integer(value).map(TypedValue::Integer),
        ParamType::Number => coerce_number(value).map(TypedValue::Number),
        ParamType::Boolean => match value {
            Value::Bool(b) => Some(TypedValue::Boolean(*b)),
            Value::String(s) if s == "true" => Some(TypedValue::Boolean(true)),
            Value::String(s) if s == "false" => Some(TypedValue::Boolean(false)),
            _ => None,
        },
    };
    coerced.ok_or_else(|| InputError::TypeMismatch {
        name: param.name.clone(),
        expected: param.param_type,
    })
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?;
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
            let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
            (f.fract() == 0.0 && in_range).then_some(f as i64)
        }
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return (i.unsigned_abs() <= MAX_EXACT_F64_INT).then_some(i as f64);
            }
            if n.is_u64() {
                return None;
            }
            n.as_f64()
        }
        Value::String(s) => s.parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn check_allowed(param: &ParamSpec, value: &TypedValue) -> Result<(), InputError> {
    match &param.allowed {
        Some(allowed) if !allowed.contains(value) => {
            Err(InputError::NotAllowed(param.name.clone()))
        }
        _ => Ok(()),
    }
}
