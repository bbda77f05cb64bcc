//! Message rendering.
//!
//! One interpolation rule is applied per render, picked in this fixed order:
//!
//! 1. `${expr}` expressions (named arguments only)
//! 2. `{name}` placeholders (named arguments only)
//! 3. indexed `{0}` / `{0,number}` placeholders (positional arguments only)
//! 4. `{}` placeholders filled left to right
//! 5. no substitution
//!
//! Rendering never fails: unsupported expressions return the template
//! untouched, and a failing expression leaves its own token in place.

use std::sync::Arc;

use chrono::DateTime;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::notification::TemplateArgs;

use super::expression::{lookup_path, ExpressionEvaluator, PathExpressionEvaluator};
use super::Locale;

const SIMPLE_PLACEHOLDER: &str = "{}";

/// Maximum fraction digits when formatting non-integral numbers
const MAX_FRACTION_DIGITS: usize = 3;

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(r"\$\{([^{}]*)\}").expect("valid expression regex");
    static ref NAMED: Regex =
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("valid named placeholder regex");
    static ref INDEXED: Regex = Regex::new(r"\{\s*(\d+)\s*(?:,\s*([A-Za-z]+)\s*(?:,\s*([^{}]*?)\s*)?)?\}")
        .expect("valid indexed placeholder regex");
}

#[derive(Debug, Error)]
enum FormatError {
    #[error("argument {index} is not a number")]
    NotANumber { index: usize },

    #[error("argument {index} is not an RFC 3339 timestamp")]
    NotADate { index: usize },

    #[error("unknown format type '{0}'")]
    UnknownType(String),
}

/// Renders message templates against request variables.
#[derive(Clone)]
pub struct TemplateRenderer {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(Arc::new(PathExpressionEvaluator::new()))
    }
}

impl TemplateRenderer {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Render `template` with the given arguments
    pub fn render(&self, template: &str, locale: &Locale, args: Option<&TemplateArgs>) -> String {
        let Some(args) = args else {
            return template.to_string();
        };

        if let TemplateArgs::Named(variables) = args {
            if EXPRESSION.is_match(template) {
                return self.render_expressions(template, variables, locale);
            }
            if NAMED.is_match(template) {
                return render_named(template, variables);
            }
        }

        if let TemplateArgs::Positional(values) = args {
            if INDEXED.is_match(template) {
                match render_indexed(template, values, locale) {
                    Ok(rendered) => return rendered,
                    Err(e) => {
                        tracing::debug!(error = %e, "Indexed formatting failed, using simple placeholders");
                    }
                }
            }
        }

        // Named maps keep insertion order, so `{}` takes values in the order
        // the caller wrote them
        if template.contains(SIMPLE_PLACEHOLDER) {
            return match args {
                TemplateArgs::Positional(values) => render_simple(template, values.iter()),
                TemplateArgs::Named(variables) => render_simple(template, variables.values()),
            };
        }

        template.to_string()
    }

    fn render_expressions(&self, template: &str, variables: &Map<String, Value>, locale: &Locale) -> String {
        if let Some(unsupported) = EXPRESSION
            .captures_iter(template)
            .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
            .find(|expr| !self.evaluator.supports(expr))
        {
            tracing::debug!(expression = %unsupported, "Unsupported template expression, leaving template unrendered");
            return template.to_string();
        }

        let mut context = locale.bindings();
        for (key, value) in variables {
            context.insert(key.clone(), value.clone());
        }

        EXPRESSION
            .replace_all(template, |caps: &Captures| {
                match self.evaluator.evaluate(&caps[1], &context, locale) {
                    Ok(value) => value_to_text(&value),
                    Err(e) => {
                        tracing::debug!(expression = %&caps[1], error = %e, "Expression evaluation failed");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

fn render_named(template: &str, variables: &Map<String, Value>) -> String {
    NAMED
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            let value = match variables.get(name) {
                Some(value) => Some(value.clone()),
                None if name.contains('.') => lookup_path(variables, name).ok().filter(|v| !v.is_null()),
                None => None,
            };
            match value {
                Some(value) => value_to_text(&value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn render_indexed(template: &str, values: &[Value], locale: &Locale) -> Result<String, FormatError> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for caps in INDEXED.captures_iter(template) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        output.push_str(&template[last..token.start()]);
        last = token.end();

        let index: usize = match caps[1].parse() {
            Ok(index) => index,
            Err(_) => {
                output.push_str(token.as_str());
                continue;
            }
        };

        let Some(value) = values.get(index) else {
            output.push_str(token.as_str());
            continue;
        };

        let format_type = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
        let style = caps.get(3).map(|m| m.as_str());
        output.push_str(&format_argument(index, value, format_type.as_deref(), style, locale)?);
    }

    output.push_str(&template[last..]);
    Ok(output)
}

fn format_argument(
    index: usize,
    value: &Value,
    format_type: Option<&str>,
    style: Option<&str>,
    locale: &Locale,
) -> Result<String, FormatError> {
    match format_type {
        None => Ok(match value {
            Value::Number(n) => format_number(n, locale, false),
            other => value_to_text(other),
        }),
        Some("number") => {
            let number = as_number(value).ok_or(FormatError::NotANumber { index })?;
            match style {
                Some("integer") => Ok(format_number(&round_number(&number), locale, true)),
                Some("percent") => {
                    let scaled = number.as_f64().unwrap_or_default() * 100.0;
                    let scaled = serde_json::Number::from_f64(scaled.round())
                        .ok_or(FormatError::NotANumber { index })?;
                    Ok(format!("{}%", format_number(&scaled, locale, true)))
                }
                _ => Ok(format_number(&number, locale, false)),
            }
        }
        Some("date") | Some("time") => {
            let text = value.as_str().ok_or(FormatError::NotADate { index })?;
            let timestamp = DateTime::parse_from_rfc3339(text).map_err(|_| FormatError::NotADate { index })?;
            let pattern = if format_type == Some("date") { "%Y-%m-%d" } else { "%H:%M:%S" };
            Ok(timestamp.format(pattern).to_string())
        }
        Some(other) => Err(FormatError::UnknownType(other.to_string())),
    }
}

fn render_simple<'a>(template: &str, mut values: impl Iterator<Item = &'a Value>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(SIMPLE_PLACEHOLDER) {
        output.push_str(&rest[..pos]);
        match values.next() {
            Some(value) => output.push_str(&value_to_text(value)),
            None => output.push_str(SIMPLE_PLACEHOLDER),
        }
        rest = &rest[pos + SIMPLE_PLACEHOLDER.len()..];
    }

    output.push_str(rest);
    output
}

/// Stringify a template value. Null renders as the literal `null`.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<serde_json::Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(i.into())
            } else {
                trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64)
            }
        }
        _ => None,
    }
}

fn round_number(number: &serde_json::Number) -> serde_json::Number {
    if number.is_f64() {
        let rounded = number.as_f64().unwrap_or_default().round();
        if rounded.abs() < i64::MAX as f64 {
            return (rounded as i64).into();
        }
    }
    number.clone()
}

fn format_number(number: &serde_json::Number, locale: &Locale, integer_only: bool) -> String {
    let text = if number.is_f64() {
        let digits = if integer_only { 0 } else { MAX_FRACTION_DIGITS };
        let formatted = format!("{:.*}", digits, number.as_f64().unwrap_or_default());
        if formatted.contains('.') {
            formatted.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            formatted
        }
    } else {
        number.to_string()
    };

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let mut out = String::from(sign);
    out.push_str(&group_digits(int_part, locale.grouping_separator()));
    if let Some(frac) = frac_part {
        out.push(locale.decimal_separator());
        out.push_str(frac);
    }
    out
}

fn group_digits(digits: &str, separator: char) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(value: Value) -> TemplateArgs {
        TemplateArgs::named(value).unwrap()
    }

    fn render(template: &str, args: Option<TemplateArgs>) -> String {
        TemplateRenderer::default().render(template, &Locale::default(), args.as_ref())
    }

    #[test]
    fn test_no_args_returns_template() {
        assert_eq!(render("Hello {0} {name} ${x}", None), "Hello {0} {name} ${x}");
    }

    #[test]
    fn test_expression_substitution() {
        let args = named(json!({"user": {"name": "Ann"}, "code": 42, "gone": null}));
        assert_eq!(
            render("Hi ${user.name}, code ${code}, ${gone}, ${missing}", Some(args)),
            "Hi Ann, code 42, null, null"
        );
    }

    #[test]
    fn test_unsupported_expression_returns_whole_template() {
        let args = named(json!({"a": 1, "b": 2}));
        let template = "Sum ${a} is ${a + b}";
        assert_eq!(render(template, Some(args)), template);
    }

    #[test]
    fn test_failing_expression_keeps_its_token_only() {
        let args = named(json!({"name": "Ann"}));
        assert_eq!(render("${name} / ${name.first}", Some(args)), "Ann / ${name.first}");
    }

    #[test]
    fn test_expression_sees_locale_bindings() {
        let renderer = TemplateRenderer::default();
        let args = named(json!({"name": "Jean"}));
        let rendered = renderer.render(
            "${name} (${displayLanguage}, ${country})",
            &Locale::parse("fr-FR"),
            Some(&args),
        );
        assert_eq!(rendered, "Jean (French, FR)");
    }

    #[test]
    fn test_expressions_take_priority_over_named() {
        let args = named(json!({"a": "x", "b": "y"}));
        assert_eq!(render("${a} {b}", Some(args)), "x {b}");
    }

    #[test]
    fn test_named_placeholders() {
        let args = named(json!({"name": "Bob", "order": {"id": "A1"}}));
        assert_eq!(
            render("Hi {name}, order {order.id}, {unknown}", Some(args)),
            "Hi Bob, order A1, {unknown}"
        );
    }

    #[test]
    fn test_named_args_ignore_indexed_template() {
        let args = named(json!({"name": "Bob"}));
        assert_eq!(render("Hello {0}", Some(args)), "Hello {0}");
    }

    #[test]
    fn test_indexed_placeholders() {
        let args = TemplateArgs::positional(["Bob", "Ann"]);
        assert_eq!(render("Hello {0} and {1}, again {0}", Some(args)), "Hello Bob and Ann, again Bob");
    }

    #[test]
    fn test_indexed_out_of_range_stays_literal() {
        let args = TemplateArgs::positional(["Bob"]);
        assert_eq!(render("{0} {3}", Some(args)), "Bob {3}");
    }

    #[test]
    fn test_indexed_numbers_use_locale_grouping() {
        let renderer = TemplateRenderer::default();
        let args = TemplateArgs::Positional(vec![json!(1234567), json!(1234.5)]);

        assert_eq!(
            renderer.render("{0} / {1,number}", &Locale::parse("en-US"), Some(&args)),
            "1,234,567 / 1,234.5"
        );
        assert_eq!(
            renderer.render("{0} / {1,number}", &Locale::parse("de-DE"), Some(&args)),
            "1.234.567 / 1.234,5"
        );
    }

    #[test]
    fn test_number_styles() {
        let args = TemplateArgs::Positional(vec![json!(2.6), json!(0.25)]);
        assert_eq!(render("{0,number,integer} {1,number,percent}", Some(args)), "3 25%");
    }

    #[test]
    fn test_date_format() {
        let args = TemplateArgs::positional(["2026-03-01T08:30:00Z"]);
        assert_eq!(render("On {0,date} at {0,time}", Some(args)), "On 2026-03-01 at 08:30:00");
    }

    #[test]
    fn test_indexed_format_error_falls_back_to_simple() {
        let args = TemplateArgs::positional(["abc", "def"]);
        assert_eq!(render("{0,number} then {}", Some(args)), "{0,number} then abc");
    }

    #[test]
    fn test_simple_placeholders_in_order() {
        let args = TemplateArgs::positional(["a", "b"]);
        assert_eq!(render("{} + {} = {}", Some(args)), "a + b = {}");
    }

    #[test]
    fn test_simple_placeholders_follow_named_insertion_order() {
        let args = named(json!({"zeta": "first", "alpha": "second", "mid": "third"}));
        assert_eq!(render("{} / {} / {}", Some(args)), "first / second / third");

        let parsed: TemplateArgs =
            serde_json::from_str(r#"{"to": "Bob", "code": 4711}"#).unwrap();
        assert_eq!(render("Dear {}, use {}", Some(parsed)), "Dear Bob, use 4711");
    }

    #[test]
    fn test_plain_template_unchanged() {
        let args = TemplateArgs::positional(["a"]);
        assert_eq!(render("No placeholders here", Some(args)), "No placeholders here");
    }

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits("1", ','), "1");
        assert_eq!(group_digits("1000", ','), "1,000");
        assert_eq!(group_digits("123456", '.'), "123.456");
    }
}
