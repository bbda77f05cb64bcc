//! Pluggable evaluation of `${...}` template expressions.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::Locale;

#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Unsupported expression: {0}")]
    Unsupported(String),

    #[error("Cannot read '{segment}' from a {kind} value")]
    NotTraversable { segment: String, kind: &'static str },

    #[error("Invalid array index '{0}'")]
    InvalidIndex(String),
}

/// Two-phase expression capability.
///
/// The renderer calls `supports` for every expression in a template before
/// evaluating any of them, so an evaluator can reject syntax it does not
/// understand without producing partial output.
pub trait ExpressionEvaluator: Send + Sync {
    fn supports(&self, expression: &str) -> bool;

    /// Evaluate against the request variables merged with locale bindings.
    /// Missing values evaluate to `Value::Null`.
    fn evaluate(
        &self,
        expression: &str,
        variables: &Map<String, Value>,
        locale: &Locale,
    ) -> Result<Value, ExpressionError>;
}

lazy_static! {
    static ref PATH_EXPRESSION: Regex = Regex::new(
        r"^\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*(?:\?:\s*'([^']*)'\s*)?$"
    )
    .expect("valid path expression regex");
}

/// Evaluates dotted variable paths such as `user.name` or `items.0`, with an
/// optional `?: 'fallback'` used when the path resolves to null.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathExpressionEvaluator;

impl PathExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for PathExpressionEvaluator {
    fn supports(&self, expression: &str) -> bool {
        PATH_EXPRESSION.is_match(expression)
    }

    fn evaluate(
        &self,
        expression: &str,
        variables: &Map<String, Value>,
        _locale: &Locale,
    ) -> Result<Value, ExpressionError> {
        let caps = PATH_EXPRESSION
            .captures(expression)
            .ok_or_else(|| ExpressionError::Unsupported(expression.to_string()))?;

        let path = &caps[1];
        let value = lookup_path(variables, path)?;

        match (value, caps.get(2)) {
            (Value::Null, Some(fallback)) => Ok(Value::String(fallback.as_str().to_string())),
            (value, _) => Ok(value),
        }
    }
}

/// Walk a dotted path through nested objects and arrays.
///
/// Null propagates; reading a field of a string, number or bool is an error.
pub fn lookup_path(variables: &Map<String, Value>, path: &str) -> Result<Value, ExpressionError> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = variables.get(first).cloned().unwrap_or(Value::Null);

    for segment in segments {
        current = match current {
            Value::Null => return Ok(Value::Null),
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| ExpressionError::InvalidIndex(segment.to_string()))?;
                if index < items.len() {
                    items.swap_remove(index)
                } else {
                    Value::Null
                }
            }
            other => {
                return Err(ExpressionError::NotTraversable {
                    segment: segment.to_string(),
                    kind: kind_of(&other),
                })
            }
        };
    }

    Ok(current)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_supports_paths_only() {
        let evaluator = PathExpressionEvaluator::new();
        assert!(evaluator.supports("name"));
        assert!(evaluator.supports(" user.address.city "));
        assert!(evaluator.supports("items.0"));
        assert!(evaluator.supports("nick ?: 'friend'"));
        assert!(!evaluator.supports("a + b"));
        assert!(!evaluator.supports("user.getName()"));
        assert!(!evaluator.supports(""));
    }

    #[test]
    fn test_evaluate_nested_values() {
        let evaluator = PathExpressionEvaluator::new();
        let variables = vars(json!({
            "user": {"name": "Ann", "tags": ["vip", "beta"]},
            "count": 3
        }));
        let locale = Locale::default();

        assert_eq!(evaluator.evaluate("user.name", &variables, &locale).unwrap(), json!("Ann"));
        assert_eq!(evaluator.evaluate("user.tags.1", &variables, &locale).unwrap(), json!("beta"));
        assert_eq!(evaluator.evaluate("count", &variables, &locale).unwrap(), json!(3));
        assert_eq!(evaluator.evaluate("missing.deep", &variables, &locale).unwrap(), Value::Null);
    }

    #[test]
    fn test_fallback_applies_to_null_only() {
        let evaluator = PathExpressionEvaluator::new();
        let variables = vars(json!({"nick": "Zed"}));
        let locale = Locale::default();

        assert_eq!(evaluator.evaluate("nick ?: 'friend'", &variables, &locale).unwrap(), json!("Zed"));
        assert_eq!(evaluator.evaluate("alias ?: 'friend'", &variables, &locale).unwrap(), json!("friend"));
    }

    #[test]
    fn test_traversing_scalar_is_error() {
        let evaluator = PathExpressionEvaluator::new();
        let variables = vars(json!({"name": "Ann", "list": [1]}));
        let locale = Locale::default();

        assert!(matches!(
            evaluator.evaluate("name.first", &variables, &locale),
            Err(ExpressionError::NotTraversable { .. })
        ));
        assert!(matches!(
            evaluator.evaluate("list.first", &variables, &locale),
            Err(ExpressionError::InvalidIndex(_))
        ));
    }
}
