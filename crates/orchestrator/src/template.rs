//! Template rendering and truthiness for chain conditions.
//!
//! Templates reference the parent binding with `${dotted.path}` segments;
//! unresolved paths render empty. Jsonpath support is the minimal `$.field`
//! form the chain `expect` contract asks for.

use serde_json::Value;

/// Substitute every `${path}` in `template` from `binding`.
pub fn render(template: &str, binding: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let path = &after[..end];
                out.push_str(&lookup_text(binding, path));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup_text(binding: &Value, path: &str) -> String {
    match lookup(binding, path) {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Dotted-path lookup over objects.
pub fn lookup(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Minimal jsonpath: `$.field` (optionally nested `$.a.b`).
pub fn jsonpath(value: &Value, path: &str) -> Option<Value> {
    let stripped = path.strip_prefix("$.").or_else(|| path.strip_prefix('$'))?;
    lookup(value, stripped)
}

/// Boolean reading of a rendered string: `true/1/yes/on` vs
/// `false/0/no/off`, numeric nonzero, any other non-empty string is true.
pub fn truthy(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    match normalized.as_str() {
        "" | "false" | "0" | "no" | "off" => false,
        "true" | "1" | "yes" | "on" => true,
        other => match other.parse::<f64>() {
            Ok(n) => n != 0.0,
            Err(_) => true,
        },
    }
}

/// Truthiness of a JSON value under the same rules.
pub fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => truthy(s),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_substitutes_dotted_paths() {
        let binding = json!({
            "output": {"content": "done"},
            "usage": {"total_tokens": 42},
            "agent": {"id": "main"},
        });
        assert_eq!(
            render("agent ${agent.id}: ${output.content} (${usage.total_tokens})", &binding),
            "agent main: done (42)"
        );
    }

    #[test]
    fn render_leaves_unresolved_empty_and_tolerates_unclosed() {
        let binding = json!({});
        assert_eq!(render("x=${missing.path}!", &binding), "x=!");
        assert_eq!(render("tail ${oops", &binding), "tail ${oops");
    }

    #[test]
    fn truthiness_table() {
        for yes in ["true", "1", "yes", "on", "On", " TRUE ", "2", "-3.5", "anything"] {
            assert!(truthy(yes), "{yes} should be true");
        }
        for no in ["false", "0", "no", "off", "", "  ", "0.0"] {
            assert!(!truthy(no), "{no:?} should be false");
        }
    }

    #[test]
    fn jsonpath_minimal_form() {
        let value = json!({"approved": true, "meta": {"count": 0}});
        assert_eq!(jsonpath(&value, "$.approved"), Some(json!(true)));
        assert_eq!(jsonpath(&value, "$.meta.count"), Some(json!(0)));
        assert_eq!(jsonpath(&value, "$.missing"), None);
        assert!(value_truthy(&jsonpath(&value, "$.approved").unwrap()));
        assert!(!value_truthy(&jsonpath(&value, "$.meta.count").unwrap()));
    }
}
