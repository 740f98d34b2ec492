//! Static extraction of the capability descriptor.
//!
//! The descriptor is the literal table returned at the end of the chunk.
//! Nothing is evaluated: every field must be a literal (string fields may
//! be concatenations of literals), and `run` must be an inline function or
//! the name of a top-level local function.

use super::syntax::ast::{BinOp, Block, Expr, Field, Stat, UnOp};
use std::collections::HashSet;
use thiserror::Error;
use toolgate_domain::{
    CapabilityDescriptor, NameError, ParamSpec, ParamType, TypedValue, validate_tool_name,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("chunk does not end with a returned table literal")]
    NotALiteralTable,
    #[error("descriptor field '{0}' is missing")]
    MissingField(&'static str),
    #[error("descriptor field '{0}' is given more than once")]
    DuplicateField(String),
    #[error("descriptor field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    InvalidName(#[from] NameError),
    #[error("declared name '{declared}' does not match file name '{key}'")]
    NameMismatch { declared: String, key: String },
    #[error("'run' must be a function")]
    MissingEntryPoint,
    #[error("parameter {index}: {reason}")]
    BadParameter { index: usize, reason: String },
}

/// Extract the descriptor of `chunk`, checking the name against `unit_key`.
pub fn extract(
    chunk: &Block,
    unit_key: Option<&str>,
) -> Result<CapabilityDescriptor, DescriptorError> {
    let fields = match chunk.ret.as_ref().map(|r| r.exprs.as_slice()) {
        Some([Expr::Table(fields)]) => fields,
        _ => return Err(DescriptorError::NotALiteralTable),
    };

    let mut name = None;
    let mut description = None;
    let mut parameters = None;
    let mut run = None;
    let mut seen = HashSet::new();
    for (key, value) in named_fields(fields) {
        if !seen.insert(key.clone()) {
            return Err(DescriptorError::DuplicateField(key));
        }
        match key.as_str() {
            "name" => name = Some(value),
            "description" => description = Some(value),
            "parameters" => parameters = Some(value),
            "run" => run = Some(value),
            _ => {}
        }
    }

    let name = name.ok_or(DescriptorError::MissingField("name"))?;
    let name = constant_string(name).ok_or(DescriptorError::WrongType {
        field: "name",
        expected: "a string",
    })?;
    validate_tool_name(&name)?;
    if let Some(key) = unit_key
        && key != name
    {
        return Err(DescriptorError::NameMismatch {
            declared: name,
            key: key.to_string(),
        });
    }

    let description = match description {
        Some(expr) => constant_string(expr).ok_or(DescriptorError::WrongType {
            field: "description",
            expected: "a string",
        })?,
        None => String::new(),
    };

    match run {
        Some(Expr::Function(_)) => {}
        Some(Expr::Name { name, .. }) if is_top_level_function(chunk, name) => {}
        _ => return Err(DescriptorError::MissingEntryPoint),
    }

    let mut descriptor = CapabilityDescriptor::new(name, description);
    if let Some(expr) = parameters {
        let Expr::Table(entries) = expr else {
            return Err(DescriptorError::WrongType {
                field: "parameters",
                expected: "a table",
            });
        };
        let mut names = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let index = i + 1;
            let Field::Positional(Expr::Table(spec)) = entry else {
                return Err(bad(index, "must be a table in list position"));
            };
            let param = parameter(spec).map_err(|reason| bad(index, reason))?;
            if !names.insert(param.name.clone()) {
                return Err(bad(index, format!("duplicate parameter '{}'", param.name)));
            }
            descriptor = descriptor.with_parameter(param);
        }
    }
    Ok(descriptor)
}

fn bad(index: usize, reason: impl Into<String>) -> DescriptorError {
    DescriptorError::BadParameter {
        index,
        reason: reason.into(),
    }
}

/// `key = value` and `["key"] = value` fields; positional ones are ignored.
fn named_fields(fields: &[Field]) -> impl Iterator<Item = (String, &Expr)> {
    fields.iter().filter_map(|field| match field {
        Field::Named { key, value } => Some((key.clone(), value)),
        Field::Keyed {
            key: Expr::Str(key),
            value,
        } => Some((key.clone(), value)),
        _ => None,
    })
}

fn constant_string(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Str(s) => Some(s.clone()),
        Expr::Paren(inner) => constant_string(inner),
        Expr::Binary {
            op: BinOp::Concat,
            lhs,
            rhs,
        } => Some(format!("{}{}", constant_string(lhs)?, constant_string(rhs)?)),
        _ => None,
    }
}

fn is_top_level_function(chunk: &Block, name: &str) -> bool {
    chunk.stats.iter().any(|stat| match stat {
        Stat::LocalFunction { name: n, .. } => n == name,
        Stat::Local { names, exprs, .. } => names
            .iter()
            .position(|n| n == name)
            .and_then(|i| exprs.get(i))
            .is_some_and(|e| matches!(e, Expr::Function(_))),
        Stat::Function { name: n, .. } => {
            n.method.is_none() && n.path.len() == 1 && n.path[0] == name
        }
        _ => false,
    })
}

fn parameter(fields: &[Field]) -> Result<ParamSpec, String> {
    let mut name = None;
    let mut param_type = None;
    let mut required = false;
    let mut description = String::new();
    let mut allowed = None;
    let mut seen = HashSet::new();

    for (key, value) in named_fields(fields) {
        if !seen.insert(key.clone()) {
            return Err(format!("field '{}' is given more than once", key));
        }
        match key.as_str() {
            "name" => {
                let n = constant_string(value).ok_or("'name' must be a string")?;
                if !is_identifier(&n) {
                    return Err(format!("'{}' is not a valid parameter name", n));
                }
                name = Some(n);
            }
            "type" => {
                let t = constant_string(value).ok_or("'type' must be a string")?;
                param_type = Some(
                    t.parse::<ParamType>()
                        .map_err(|_| format!("unknown type '{}'", t))?,
                );
            }
            "required" => {
                required = match value {
                    Expr::True => true,
                    Expr::False => false,
                    _ => return Err("'required' must be true or false".to_string()),
                };
            }
            "description" => {
                description = constant_string(value).ok_or("'description' must be a string")?;
            }
            "enum" => allowed = Some(value),
            other => return Err(format!("unknown field '{}'", other)),
        }
    }

    let name = name.ok_or("'name' is missing")?;
    let param_type = param_type.ok_or("'type' is missing")?;
    let mut spec = ParamSpec::new(name, param_type).with_description(description);
    if required {
        spec = spec.required();
    }
    if let Some(expr) = allowed {
        spec = spec.with_allowed(enum_values(expr, param_type)?);
    }
    Ok(spec)
}

fn enum_values(expr: &Expr, param_type: ParamType) -> Result<Vec<TypedValue>, String> {
    let Expr::Table(fields) = expr else {
        return Err("'enum' must be a list".to_string());
    };
    if fields.is_empty() {
        return Err("'enum' must not be empty".to_string());
    }
    fields
        .iter()
        .map(|field| {
            let Field::Positional(value) = field else {
                return Err("'enum' must be a list".to_string());
            };
            literal_value(value, param_type).ok_or_else(|| {
                format!("'enum' values must be {} literals", param_type.as_str())
            })
        })
        .collect()
}

fn literal_value(expr: &Expr, param_type: ParamType) -> Option<TypedValue> {
    match (param_type, expr) {
        (ParamType::String, e) => constant_string(e).map(TypedValue::String),
        (ParamType::Integer, Expr::Int(i)) => Some(TypedValue::Integer(*i)),
        (ParamType::Number, Expr::Int(i)) => Some(TypedValue::Number(*i as f64)),
        (ParamType::Number, Expr::Float(f)) => Some(TypedValue::Number(*f)),
        (
            ParamType::Integer | ParamType::Number,
            Expr::Unary {
                op: UnOp::Neg,
                operand,
            },
        ) => {
            match literal_value(operand, param_type)? {
                TypedValue::Integer(i) => i.checked_neg().map(TypedValue::Integer),
                TypedValue::Number(f) => Some(TypedValue::Number(-f)),
                _ => None,
            }
        }
        (ParamType::Boolean, Expr::True) => Some(TypedValue::Boolean(true)),
        (ParamType::Boolean, Expr::False) => Some(TypedValue::Boolean(false)),
        _ => None,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::syntax::parse_chunk;

    fn extract_src(src: &str, key: Option<&str>) -> Result<CapabilityDescriptor, DescriptorError> {
        extract(&parse_chunk(src.as_bytes(), 200).unwrap(), key)
    }

    const GREET: &str = r#"
local function run(args)
  return "hello " .. args.who
end

return {
  name = "greet",
  description = "Greets " .. "someone",
  parameters = {
    { name = "who", type = "string", required = true, description = "Who to greet" },
    { name = "tone", type = "string", enum = { "warm", "formal" } },
    { name = "times", type = "integer", enum = { 1, 2, -3 } },
  },
  run = run,
}
"#;

    #[test]
    fn test_extracts_full_descriptor() {
        let descriptor = extract_src(GREET, Some("greet")).unwrap();
        assert_eq!(descriptor.name, "greet");
        assert_eq!(descriptor.description, "Greets someone");
        assert_eq!(descriptor.parameters.len(), 3);

        let who = descriptor.parameter("who").unwrap();
        assert!(who.required);
        assert_eq!(who.param_type, ParamType::String);
        assert_eq!(who.description, "Who to greet");

        let tone = descriptor.parameter("tone").unwrap();
        assert!(!tone.required);
        assert_eq!(
            tone.allowed,
            Some(vec![
                TypedValue::String("warm".into()),
                TypedValue::String("formal".into())
            ])
        );
        assert_eq!(
            descriptor.parameter("times").unwrap().allowed,
            Some(vec![
                TypedValue::Integer(1),
                TypedValue::Integer(2),
                TypedValue::Integer(-3)
            ])
        );
    }

    #[test]
    fn test_inline_run_and_no_parameters() {
        let descriptor =
            extract_src("return { name = 'ping', run = function() return 'pong' end }", None)
                .unwrap();
        assert!(descriptor.parameters.is_empty());
        assert_eq!(descriptor.description, "");
    }

    #[test]
    fn test_name_must_match_file() {
        assert_eq!(
            extract_src(GREET, Some("hello")),
            Err(DescriptorError::NameMismatch {
                declared: "greet".into(),
                key: "hello".into()
            })
        );
    }

    #[test]
    fn test_rejects_malformed_descriptors() {
        let cases = [
            "local t = {}\nreturn t",
            "return { name = 'x' }",
            "return { name = 'x', run = 5 }",
            "return { name = 'Bad', run = function() end }",
            "return { name = 'call', run = function() end }",
            "return { name = 'x', name = 'y', run = function() end }",
            "return { name = 'x', run = undefined_fn }",
            "return { name = 'x', run = function() end, parameters = { { name = 'a', type = 'float' } } }",
            "return { name = 'x', run = function() end, parameters = { { name = 'a', type = 'string' }, { name = 'a', type = 'string' } } }",
            "return { name = 'x', run = function() end, parameters = { { name = 'a', type = 'integer', enum = { 'one' } } } }",
            "return { name = 'x', run = function() end, parameters = { { name = 'a', type = 'integer', enum = {} } } }",
            "return { name = 'x', run = function() end, parameters = { { name = 'a', type = 'string', required = 'yes' } } }",
        ];
        for src in cases {
            assert!(extract_src(src, Some("x")).is_err(), "accepted: {}", src);
        }
    }

    #[test]
    fn test_reserved_name_reports_name_error() {
        let err = extract_src("return { name = 'approve', run = function() end }", None).unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidName(NameError::Reserved(_))));
    }
}
