//! JSON repair and schema coercion: best-effort recovery of malformed
//! tool-call/JSON-mode output before it reaches the client, plus
//! optional primitive coercion and default injection against a
//! registered JSON Schema.
//!
//! No teacher analogue exists for this (the teacher never forwards raw
//! model output as structured data); the candidate-extraction and
//! repair passes below are a direct, idiomatic implementation of the
//! json repair spec rather than a port of anything in the pack.

use std::collections::HashSet;

use serde_json::Value;

use crate::config::JsonRepairConfig;

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub repaired_content: String,
    pub was_repaired: bool,
}

impl RepairOutcome {
    fn unchanged(content: &str) -> Self {
        Self {
            repaired_content: content.to_string(),
            was_repaired: false,
        }
    }
}

pub struct JsonRepairer {
    config: JsonRepairConfig,
}

impl JsonRepairer {
    pub fn new(config: JsonRepairConfig) -> Self {
        Self { config }
    }

    /// Repair `content` (the full text of a tool-call argument string or
    /// JSON-mode response body). `schema_key` looks up an optional
    /// registered schema in config for coercion; with no match,
    /// coercion is skipped.
    ///
    /// For already-valid JSON with no applicable schema, the output is
    /// byte-identical to the input: repair never rewrites well-formed
    /// content it doesn't need to touch.
    pub fn process(&self, content: &str, schema_key: Option<&str>) -> RepairOutcome {
        if !self.config.enabled {
            return RepairOutcome::unchanged(content);
        }

        let Some(candidate) = extract_candidate(content) else {
            return RepairOutcome::unchanged(content);
        };

        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return match self.schema_for(schema_key) {
                Some(schema) if self.config.coercion_enabled => {
                    let coerced = coerce_with_schema(value, schema);
                    let rendered = serde_json::to_string(&coerced).unwrap_or(candidate);
                    RepairOutcome {
                        repaired_content: rendered,
                        was_repaired: true,
                    }
                }
                _ => RepairOutcome::unchanged(content),
            };
        }

        if self.config.strict_mode {
            return RepairOutcome::unchanged(content);
        }

        let fixed = repair_syntax(&candidate);
        match serde_json::from_str::<Value>(&fixed) {
            Ok(value) => {
                let value = match self.schema_for(schema_key) {
                    Some(schema) if self.config.coercion_enabled => coerce_with_schema(value, schema),
                    _ => value,
                };
                let rendered = serde_json::to_string(&value).unwrap_or(fixed);
                RepairOutcome {
                    repaired_content: rendered,
                    was_repaired: true,
                }
            }
            Err(_) => RepairOutcome::unchanged(content),
        }
    }

    fn schema_for(&self, schema_key: Option<&str>) -> Option<&Value> {
        self.config.schemas.get(schema_key?)
    }
}

/// Candidate JSON region, in priority order: a fenced ```json code
/// block, then the first balanced `{...}` span, then the whole input.
fn extract_candidate(content: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced(content) {
        return Some(fenced);
    }
    if let Some(braced) = extract_balanced_braces(content) {
        return Some(braced);
    }
    Some(content.trim().to_string())
}

fn extract_fenced(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let after = after.strip_prefix('\n').unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

fn extract_balanced_braces(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in content[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn repair_syntax(candidate: &str) -> String {
    let s = normalize_quotes_and_controls(candidate);
    let s = remove_trailing_commas(&s);
    close_unbalanced_braces(&s)
}

/// Single quotes outside of double-quoted strings become double quotes
/// (handles a common model mistake: `{'key': 'value'}`). Bare control
/// characters found inside a double-quoted string are escaped.
fn normalize_quotes_and_controls(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_double = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_double = !in_double;
                out.push(c);
            }
            '\'' if !in_double => out.push('"'),
            '\n' if in_double => out.push_str("\\n"),
            '\t' if in_double => out.push_str("\\t"),
            '\r' if in_double => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn close_unbalanced_braces(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for c in s.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut out = s.to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

fn coerce_with_schema(value: Value, schema: &Value) -> Value {
    let Value::Object(mut obj) = value else {
        return value;
    };
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(obj);
    };

    for (key, prop_schema) in properties {
        let coerced = match obj.get(key).cloned() {
            Some(v) => coerce_primitive(v, prop_schema),
            None => prop_schema.get("default").cloned(),
        };
        if let Some(v) = coerced {
            obj.insert(key.clone(), v);
        }
    }

    if schema.get("additionalProperties").and_then(Value::as_bool) == Some(false) {
        let allowed: HashSet<&String> = properties.keys().collect();
        obj.retain(|k, _| allowed.contains(k));
    }

    Value::Object(obj)
}

fn coerce_primitive(value: Value, prop_schema: &Value) -> Value {
    let ty = prop_schema.get("type").and_then(Value::as_str);
    match (ty, &value) {
        (Some("number"), Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value),
        (Some("integer"), Value::String(s)) => s.parse::<i64>().ok().map(|n| Value::Number(n.into())).unwrap_or(value),
        (Some("boolean"), Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value,
        },
        _ => value,
    }
}

/// Streaming variant: buffers text deltas until the first balanced JSON
/// object completes (or the configured cap is exceeded, at which point
/// any further bytes are silently dropped). Only one repaired payload
/// is ever produced per stream.
pub struct StreamJsonBuffer {
    buffer: String,
    cap_bytes: usize,
    done: bool,
    schema_key: Option<String>,
}

impl StreamJsonBuffer {
    pub fn new(cap_bytes: usize, schema_key: Option<String>) -> Self {
        Self {
            buffer: String::new(),
            cap_bytes: cap_bytes.max(1),
            done: false,
            schema_key,
        }
    }

    /// Feed a text delta. Returns the repaired JSON the first time the
    /// buffered text contains a balanced object; `None` on every other
    /// call, including all calls after the cap is hit or a result has
    /// already been produced.
    pub fn feed(&mut self, repairer: &JsonRepairer, delta: &str) -> Option<String> {
        if self.done {
            return None;
        }
        if self.buffer.len() + delta.len() > self.cap_bytes {
            self.done = true;
            return None;
        }
        self.buffer.push_str(delta);
        let candidate = extract_balanced_braces(&self.buffer)?;
        self.done = true;
        Some(repairer.process(&candidate, self.schema_key.as_deref()).repaired_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repairer(coercion: bool) -> JsonRepairer {
        JsonRepairer::new(JsonRepairConfig {
            enabled: true,
            strict_mode: false,
            buffer_cap_bytes: 4096,
            coercion_enabled: coercion,
            schemas: Default::default(),
        })
    }

    #[test]
    fn valid_json_is_returned_byte_for_byte_unchanged() {
        let input = r#"{"a": 1, "b": "two"}"#;
        let outcome = repairer(false).process(input, None);
        assert!(!outcome.was_repaired);
        assert_eq!(outcome.repaired_content, input);
    }

    #[test]
    fn single_quotes_are_converted_to_double() {
        let outcome = repairer(false).process("{'a': 'b'}", None);
        assert!(outcome.was_repaired);
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["a"], "b");
    }

    #[test]
    fn trailing_commas_are_removed() {
        let outcome = repairer(false).process(r#"{"a": 1, "b": 2,}"#, None);
        assert!(outcome.was_repaired);
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn unbalanced_braces_are_closed() {
        let outcome = repairer(false).process(r#"{"a": {"b": 1}"#, None);
        assert!(outcome.was_repaired);
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["a"]["b"], 1);
    }

    #[test]
    fn fenced_block_is_preferred_over_surrounding_prose() {
        let input = "Here's the result:\n```json\n{\"a\": 1}\n```\nLet me know if that helps.";
        let outcome = repairer(false).process(input, None);
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn schema_coercion_converts_stringly_typed_numbers() {
        let mut config = JsonRepairConfig {
            enabled: true,
            strict_mode: false,
            buffer_cap_bytes: 4096,
            coercion_enabled: true,
            schemas: Default::default(),
        };
        config.schemas.insert(
            "get_weather".to_string(),
            json!({"properties": {"temperature": {"type": "number"}}}),
        );
        let repairer = JsonRepairer::new(config);
        let outcome = repairer.process(r#"{"temperature": "72"}"#, Some("get_weather"));
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["temperature"], 72.0);
    }

    #[test]
    fn schema_coercion_injects_missing_defaults() {
        let mut config = JsonRepairConfig {
            enabled: true,
            strict_mode: false,
            buffer_cap_bytes: 4096,
            coercion_enabled: true,
            schemas: Default::default(),
        };
        config.schemas.insert(
            "get_weather".to_string(),
            json!({"properties": {"unit": {"type": "string", "default": "celsius"}}}),
        );
        let repairer = JsonRepairer::new(config);
        let outcome = repairer.process(r#"{}"#, Some("get_weather"));
        let value: Value = serde_json::from_str(&outcome.repaired_content).unwrap();
        assert_eq!(value["unit"], "celsius");
    }

    #[test]
    fn unrecoverable_garbage_is_left_untouched() {
        let input = "not json at all, just prose";
        let outcome = repairer(false).process(input, None);
        assert!(!outcome.was_repaired);
        assert_eq!(outcome.repaired_content, input);
    }

    #[test]
    fn stream_buffer_emits_once_balanced_and_then_drops_extra_text() {
        let repairer = repairer(false);
        let mut buf = StreamJsonBuffer::new(4096, None);
        assert!(buf.feed(&repairer, "{\"a\":").is_none());
        let result = buf.feed(&repairer, "1}");
        assert!(result.is_some());
        assert!(buf.feed(&repairer, "trailing noise").is_none());
    }

    #[test]
    fn stream_buffer_gives_up_past_the_cap() {
        let repairer = repairer(false);
        let mut buf = StreamJsonBuffer::new(4, None);
        assert!(buf.feed(&repairer, "{\"a\": 1}").is_none());
    }
}
