//! `${key}` substitution from a property bag into strings and JSON structures.

use cohort_core::types::Properties;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// Resolve placeholders in every string inside `value`, keeping its shape.
pub fn resolve(value: &Value, properties: &Properties) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, properties)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, properties)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, properties)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace each `${key}` in `input`. Unknown or null keys stay verbatim.
pub fn resolve_str(input: &str, properties: &Properties) -> String {
    if !input.contains("${") {
        return input.to_string();
    }
    token_pattern()
        .replace_all(input, |caps: &Captures<'_>| {
            properties
                .get(&caps[1])
                .and_then(stringify)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Scalar rendering used for substitution and regex matching.
/// `None` for null, which callers treat as "absent".
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => panic!("properties must be an object"),
        }
    }

    #[test]
    fn test_resolve_str_replaces_every_token() {
        let p = props(json!({"id": "u-1", "age": 30}));
        assert_eq!(
            resolve_str("/survey/${id}?age=${age}&again=${id}", &p),
            "/survey/u-1?age=30&again=u-1"
        );
    }

    #[test]
    fn test_unresolved_tokens_left_verbatim() {
        let p = props(json!({"id": "u-1", "gone": null}));
        assert_eq!(
            resolve_str("${id}/${missing}/${gone}", &p),
            "u-1/${missing}/${gone}"
        );
    }

    #[test]
    fn test_resolve_structure_preserving() {
        let p = props(json!({"token": "abc", "flag": true}));
        let input = json!({
            "auth": "Bearer ${token}",
            "list": ["${token}", 7, null, {"nested": "${flag}"}],
            "n": 1.5
        });
        let resolved = resolve(&input, &p);
        assert_eq!(
            resolved,
            json!({
                "auth": "Bearer abc",
                "list": ["abc", 7, null, {"nested": "1"}],
                "n": 1.5
            })
        );
    }

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify(&json!("x")).as_deref(), Some("x"));
        assert_eq!(stringify(&json!(42)).as_deref(), Some("42"));
        assert_eq!(stringify(&json!(false)).as_deref(), Some(""));
        assert_eq!(stringify(&json!([1, 2])).as_deref(), Some("[1,2]"));
        assert!(stringify(&Value::Null).is_none());
    }
}
