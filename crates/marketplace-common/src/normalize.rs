/// Best-effort extraction of JSON payloads from free-form model output.
///
/// Prompts ask for JSON, but completions arrive as plain JSON, as a ```json fenced
/// block, or as JSON wrapped in prose. A candidate payload is located with the
/// first strategy that yields one:
///
/// 1. the inner text of a ```json fence
/// 2. the span from the first opening bracket to the last matching closer
/// 3. the whole text
///
/// The candidate is then parsed and shaped. Any parse failure ends in the
/// caller-supplied fallback, so `normalize` always returns a usable value.
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Label for the synthetic item used when an array was requested but the model
/// returned a bare scalar.
const SYNTHETIC_NAME: &str = "AI Response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// An ordered list of items. Single objects are wrapped into a one-element list.
    Array,
    /// A single object. When `unwrap_key` is set and the object holds another
    /// object under that key, the nesting is peeled off until it stops.
    Object { unwrap_key: Option<&'static str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Fence,
    Brackets,
    Raw,
}

/// Extract and shape the JSON payload in `raw`, or return `fallback(raw)`.
pub fn normalize<F>(raw: &str, shape: Shape, fallback: F) -> Value
where
    F: FnOnce(&str) -> Value,
{
    let (source, candidate) = locate(raw, shape);
    let parsed = match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(v) => v,
        Err(e) => {
            debug!(?source, error = %e, "model output is not valid JSON, using fallback");
            return fallback(raw);
        }
    };

    match shape {
        Shape::Array => into_array(parsed),
        Shape::Object { unwrap_key } => match parsed {
            Value::Object(map) => Value::Object(unwrap_nested(map, unwrap_key)),
            other => {
                debug!(?source, kind = kind_of(&other), "expected a JSON object, using fallback");
                fallback(raw)
            }
        },
    }
}

fn locate(raw: &str, shape: Shape) -> (Source, &str) {
    if let Some(inner) = fenced_block(raw) {
        return (Source::Fence, inner);
    }
    let pairs: &[(char, char)] = match shape {
        Shape::Array => &[('[', ']'), ('{', '}')],
        Shape::Object { .. } => &[('{', '}')],
    };
    if let Some(span) = bracket_span(raw, pairs) {
        return (Source::Brackets, span);
    }
    (Source::Raw, raw)
}

fn fenced_block(raw: &str) -> Option<&str> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE.get_or_init(|| Regex::new(r"(?i)```json([\s\S]*?)```").expect("valid regex"));
    re.captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Earliest opener among `pairs` that has a closer somewhere after it, spanning
/// to the last such closer.
fn bracket_span<'a>(raw: &'a str, pairs: &[(char, char)]) -> Option<&'a str> {
    pairs
        .iter()
        .filter_map(|&(open, close)| {
            let start = raw.find(open)?;
            let end = raw.rfind(close)?;
            (end > start).then_some((start, end))
        })
        .min_by_key(|&(start, _)| start)
        .map(|(start, end)| &raw[start..=end])
}

fn into_array(parsed: Value) -> Value {
    match parsed {
        Value::Array(_) => parsed,
        Value::Object(_) => Value::Array(vec![parsed]),
        other => {
            let description = match other {
                Value::String(s) => s,
                v => v.to_string(),
            };
            json!([{ "name": SYNTHETIC_NAME, "description": description }])
        }
    }
}

fn unwrap_nested(mut map: Map<String, Value>, key: Option<&str>) -> Map<String, Value> {
    let Some(key) = key else {
        return map;
    };
    while let Some(Value::Object(_)) = map.get(key) {
        match map.remove(key) {
            Some(Value::Object(inner)) => map = inner,
            _ => break,
        }
    }
    map
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
