//! Condition expression evaluation for `If` steps.
//!
//! A small comparison + field-path expression evaluator, narrowed to the
//! one field namespace this system's execution context exposes:
//! `context.<dot.path>`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("cannot parse condition expression: {0}")]
    ParseError(String),
    #[error("invalid field reference: {0}")]
    InvalidField(String),
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
}

/// Evaluate an `If` step's `condition` expression against the execution's
/// shared context.
///
/// Supported forms: `context.<path> <op> <literal>` with `op` one of
/// `== != > < >= <=`, and the bare boolean shorthand `context.<path>` which
/// is true when the resolved value is JSON `true`.
pub fn evaluate(expr: &str, context: &Value) -> Result<bool, ConditionError> {
    let expr = expr.trim();
    if let Some(result) = try_parse_comparison(expr, context)? {
        return Ok(result);
    }
    if let Some(path) = expr.strip_prefix("context.") {
        let value = get_json_path(context, path)
            .ok_or_else(|| ConditionError::InvalidField(expr.to_string()))?;
        return match value {
            Value::Bool(b) => Ok(*b),
            other => Err(ConditionError::TypeMismatch {
                expected: "boolean".to_string(),
                got: type_name(other),
            }),
        };
    }
    Err(ConditionError::ParseError(expr.to_string()))
}

fn try_parse_comparison(expr: &str, context: &Value) -> Result<Option<bool>, ConditionError> {
    const OPERATORS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];
    for op in OPERATORS {
        if let Some(idx) = expr.find(op) {
            let field = expr[..idx].trim();
            let literal = expr[idx + op.len()..].trim();
            let Some(path) = field.strip_prefix("context.") else {
                continue;
            };
            let field_value = get_json_path(context, path)
                .ok_or_else(|| ConditionError::InvalidField(field.to_string()))?;
            let compare_value = parse_literal(literal);
            return Ok(Some(compare(field_value, op, &compare_value)?));
        }
    }
    Ok(None)
}

fn get_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn parse_literal(value: &str) -> Value {
    if let Ok(n) = value.parse::<f64>() {
        return serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number);
    }
    match value {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
        || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
    {
        return Value::String(value[1..value.len() - 1].to_string());
    }
    Value::String(value.to_string())
}

fn type_name(v: &Value) -> String {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn compare(left: &Value, op: &str, right: &Value) -> Result<bool, ConditionError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            let (l, r) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
            Ok(match op {
                "==" => (l - r).abs() < f64::EPSILON,
                "!=" => (l - r).abs() >= f64::EPSILON,
                ">" => l > r,
                "<" => l < r,
                ">=" => l >= r,
                "<=" => l <= r,
                _ => return Err(ConditionError::ParseError(format!("unknown operator {op}"))),
            })
        }
        (Value::String(l), Value::String(r)) => match op {
            "==" => Ok(l == r),
            "!=" => Ok(l != r),
            _ => Err(ConditionError::TypeMismatch {
                expected: "number".to_string(),
                got: "string".to_string(),
            }),
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            "==" => Ok(l == r),
            "!=" => Ok(l != r),
            _ => Err(ConditionError::TypeMismatch {
                expected: "number".to_string(),
                got: "boolean".to_string(),
            }),
        },
        _ => Err(ConditionError::TypeMismatch {
            expected: "matching types".to_string(),
            got: "mismatched types".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_boolean_field() {
        let ctx = json!({"approved": true});
        assert!(evaluate("context.approved", &ctx).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let ctx = json!({"score": 0.9});
        assert!(evaluate("context.score >= 0.8", &ctx).unwrap());
        assert!(!evaluate("context.score < 0.8", &ctx).unwrap());
    }

    #[test]
    fn string_equality() {
        let ctx = json!({"status": "approved"});
        assert!(evaluate("context.status == \"approved\"", &ctx).unwrap());
    }

    #[test]
    fn missing_field_is_invalid() {
        let ctx = json!({});
        assert!(matches!(
            evaluate("context.missing == 1", &ctx),
            Err(ConditionError::InvalidField(_))
        ));
    }
}
