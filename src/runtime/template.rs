/// Template interpolation and value coercion
///
/// Authored configs are strings with `{{dotted.path}}` placeholders, and the
/// editor stores structured fields (headers, mappings, conditions) as plain
/// text blocks. This module resolves placeholders against an execution context
/// and parses those blocks. Coercions follow the loose string/number rules
/// flow authors expect from the editor's JavaScript preview.

use crate::runtime::context::ExecutionContext;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"));

/// Replace every `{{ path }}` with the stringified value at that path
///
/// Paths are trimmed. Missing and null values render as an empty string.
/// Text without placeholders is returned unchanged.
pub fn apply_vars(template: &str, context: &ExecutionContext) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match context.get_path(caps[1].trim()) {
                None | Some(Value::Null) => String::new(),
                Some(value) => js_string(value),
            }
        })
        .into_owned()
}

/// Resolve placeholders in an arbitrary config value, stringifying it first
pub fn apply_vars_value(value: Option<&Value>, context: &ExecutionContext) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => apply_vars(s, context),
        Some(other) => apply_vars(&js_string(other), context),
    }
}

/// Stringify a JSON value the way a flow author sees it in the editor
///
/// Scalars follow JavaScript `String()`: `null` is `"null"` and integral
/// floats print without a fraction. Arrays and objects render as compact JSON.
pub fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_f64(f),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Stringify an optional value; an absent value is `"undefined"`
pub fn js_string_opt(value: Option<&Value>) -> String {
    value.map(js_string).unwrap_or_else(|| "undefined".to_string())
}

fn format_f64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

/// Numeric coercion with JavaScript `Number()` semantics
///
/// Missing values are NaN, null and empty/blank strings are 0, booleans are
/// 0 or 1, and unparsable strings are NaN.
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_number(s),
        Some(Value::Array(items)) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(Some(single)),
            _ => f64::NAN,
        },
        Some(Value::Object(_)) => f64::NAN,
    }
}

fn parse_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf"/"nan" spellings that JavaScript rejects
    if trimmed.chars().any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E' | 'x' | 'X'))
        && !is_hex_literal(trimmed)
    {
        return f64::NAN;
    }
    if is_hex_literal(trimmed) {
        return i64::from_str_radix(&trimmed[2..], 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

fn is_hex_literal(s: &str) -> bool {
    (s.starts_with("0x") || s.starts_with("0X"))
        && s.len() > 2
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// JavaScript truthiness of an optional value
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Parse a resolved string as JSON, falling back to the string itself
pub fn try_parse(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse a `key=value` block into ordered pairs
///
/// Accepts the editor's text form (one pair per line, split at the first `=`,
/// lines without `=` skipped) or a list of `{key, value}` objects. Keys are
/// trimmed and lower-cased, values are trimmed and template-resolved.
pub fn parse_pairs(block: Option<&Value>, context: &ExecutionContext) -> Vec<(String, String)> {
    let raw: Vec<(String, String)> = match block {
        Some(Value::String(text)) => text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("key").map(js_string)?;
                let value = match item.get("value") {
                    None | Some(Value::Null) => String::new(),
                    Some(value) => js_string(value),
                };
                Some((key, value))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), js_string(value)))
            .collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .map(|(key, value)| (key.trim().to_lowercase(), apply_vars(value.trim(), context)))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// A `from -> to` response mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub from: String,
    pub to: String,
}

/// Parse a mapping block: `from -> to` lines or a list of `{from, to}` objects
pub fn parse_mappings(block: Option<&Value>) -> Vec<Mapping> {
    match block {
        Some(Value::String(text)) => text
            .lines()
            .filter_map(|line| line.split_once("->"))
            .map(|(from, to)| Mapping {
                from: from.trim().to_string(),
                to: to.trim().to_string(),
            })
            .filter(|m| !m.from.is_empty() && !m.to.is_empty())
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                Some(Mapping {
                    from: item.get("from")?.as_str()?.trim().to_string(),
                    to: item.get("to")?.as_str()?.trim().to_string(),
                })
            })
            .filter(|m| !m.from.is_empty() && !m.to.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// True when a config value counts as absent for required-field checks
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}
