// Copyright (c) 2025-2026 The Freja Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use freja_bus::OutboundMessage;

/// Trait every builtin and MCP-registered tool implements.
///
/// `execute` takes the already-validated argument object and returns a
/// string envelope; errors are reported inside the string, never raised.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema-lite parameter shape (`type`, `enum`, `minLength`,
    /// `minimum`, `maximum`, nested `required`, array `items`).
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value) -> String;
}

/// Seam for the message tool: the agent core supplies the sink that applies
/// outbound policy and publishes to the bus.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, msg: OutboundMessage);
}

/// Seam for the spawn tool: implemented by the subagent manager.
#[async_trait]
pub trait SpawnHandler: Send + Sync {
    /// Start a background run and return immediately with a status line.
    async fn spawn(
        &self,
        task_id: &str,
        instructions: &str,
        goal: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> String;
}

/// Validate `args` against a JSON-schema-lite `schema`.
///
/// Returns human-readable problems; an empty list means the arguments are
/// acceptable.  Unknown fields are ignored.
pub fn validate_params(schema: &Value, args: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_object(schema, args, "", &mut errors);
    errors
}

fn validate_object(schema: &Value, value: &Value, prefix: &str, errors: &mut Vec<String>) {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if value.get(name).map(Value::is_null).unwrap_or(true) {
                errors.push(format!("missing required {prefix}{name}"));
            }
        }
    }

    let Some(properties) = properties else {
        return;
    };
    let Some(object) = value.as_object() else {
        return;
    };

    for (name, prop_schema) in properties {
        let Some(field) = object.get(name) else {
            continue;
        };
        if field.is_null() {
            continue;
        }
        let path = format!("{prefix}{name}");
        validate_field(prop_schema, field, &path, errors);
    }
}

fn validate_field(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            errors.push(format!("{path} should be {expected}"));
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            let rendered: Vec<String> = options.iter().map(render_enum_option).collect();
            errors.push(format!("{path} must be one of [{}]", rendered.join(", ")));
        }
    }

    if let (Some(min_len), Some(text)) =
        (schema.get("minLength").and_then(Value::as_u64), value.as_str())
    {
        if (text.chars().count() as u64) < min_len {
            errors.push(format!("{path} must be at least {min_len} chars"));
        }
    }

    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number < minimum {
                errors.push(format!("{path} must be >= {}", trim_float(minimum)));
            }
        }
    }
    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number > maximum {
                errors.push(format!("{path} must be <= {}", trim_float(maximum)));
            }
        }
    }

    if value.is_object() {
        validate_object(schema, value, &format!("{path}."), errors);
    }

    if let (Some(items), Some(elements)) = (schema.get("items"), value.as_array()) {
        if let Some(expected) = items.get("type").and_then(Value::as_str) {
            for (index, element) in elements.iter().enumerate() {
                if !type_matches(expected, element) {
                    errors.push(format!("{path}[{index}] should be {expected}"));
                } else if element.is_object() {
                    validate_object(items, element, &format!("{path}[{index}]."), errors);
                }
            }
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn render_enum_option(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 2},
                "count": {"type": "integer", "minimum": 1, "maximum": 10},
                "mode": {"type": "string", "enum": ["fast", "full"]},
                "meta": {
                    "type": "object",
                    "properties": {
                        "tag": {"type": "string"},
                        "flags": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["tag"]
                }
            },
            "required": ["query", "count"]
        })
    }

    #[test]
    fn missing_required_field_is_reported() {
        let errors = validate_params(&sample_schema(), &json!({"query": "hi"}));
        assert!(errors.join("; ").contains("missing required count"));
    }

    #[test]
    fn type_and_range_violations_are_reported() {
        let errors = validate_params(&sample_schema(), &json!({"query": "hi", "count": 0}));
        assert!(errors.iter().any(|e| e.contains("count must be >= 1")));

        let errors = validate_params(&sample_schema(), &json!({"query": "hi", "count": "2"}));
        assert!(errors.iter().any(|e| e.contains("count should be integer")));

        let errors = validate_params(&sample_schema(), &json!({"query": "hi", "count": 11}));
        assert!(errors.iter().any(|e| e.contains("count must be <= 10")));
    }

    #[test]
    fn enum_and_min_length_violations_are_reported() {
        let errors =
            validate_params(&sample_schema(), &json!({"query": "h", "count": 2, "mode": "slow"}));
        assert!(errors.iter().any(|e| e.contains("query must be at least 2 chars")));
        assert!(errors.iter().any(|e| e.contains("mode must be one of")));
    }

    #[test]
    fn nested_object_and_array_items_are_validated() {
        let errors = validate_params(
            &sample_schema(),
            &json!({"query": "hi", "count": 2, "meta": {"flags": [1, "ok"]}}),
        );
        assert!(errors.iter().any(|e| e.contains("missing required meta.tag")));
        assert!(errors.iter().any(|e| e.contains("meta.flags[0] should be string")));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let errors =
            validate_params(&sample_schema(), &json!({"query": "hi", "count": 2, "extra": "x"}));
        assert!(errors.is_empty());
    }

    #[test]
    fn null_optional_field_is_treated_as_absent() {
        let errors =
            validate_params(&sample_schema(), &json!({"query": "hi", "count": 2, "mode": null}));
        assert!(errors.is_empty());
    }

    #[test]
    fn null_required_field_is_missing() {
        let errors = validate_params(&sample_schema(), &json!({"query": "hi", "count": null}));
        assert!(errors.iter().any(|e| e.contains("missing required count")));
    }
}
