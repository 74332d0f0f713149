//! Tool-result overflow wrapper.
//!
//! When a tool signals it has more data (`hasMore` / `remaining`) but its
//! declared schema gives the caller no native range continuation, the
//! stored result becomes a YAML envelope keyed by the tool-message id
//! carrying the continuation hints.

use serde_json::{Map, Value};

use ag_domain::tool::ToolDefinition;

/// Whether the structured result signals unreturned data.
pub fn has_overflow(structured: &Value) -> bool {
    let has_more = structured
        .get("hasMore")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let remaining = structured
        .get("remaining")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    has_more || remaining > 0
}

/// Produce the YAML envelope, or `None` when wrapping does not apply (no
/// overflow, or the tool can express continuation natively).
pub fn wrap_overflow(
    message_id: &str,
    structured: &Value,
    definition: Option<&ToolDefinition>,
) -> Option<String> {
    if !has_overflow(structured) {
        return None;
    }
    if definition.is_some_and(ToolDefinition::supports_range_continuation) {
        return None;
    }

    let mut hints = Map::new();
    hints.insert(
        "hasMore".into(),
        Value::Bool(
            structured
                .get("hasMore")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        ),
    );
    for key in ["remaining", "returned"] {
        if let Some(value) = structured.get(key) {
            hints.insert(key.into(), value.clone());
        }
    }
    if let Some(next_range) = structured.get("nextRange").filter(|v| !v.is_null()) {
        hints.insert("nextRange".into(), next_range.clone());
    }

    let mut envelope = Map::new();
    envelope.insert(message_id.to_owned(), Value::Object(hints));
    serde_yaml::to_string(&Value::Object(envelope)).ok()
}
