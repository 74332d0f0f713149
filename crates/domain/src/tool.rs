//! Tool contracts: definitions exposed to the model and the registry the
//! executor dispatches through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecContext;
use crate::error::Result;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    /// JSON Schema for the structured result, when the tool declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDefinition {
    /// Whether the declared parameter schema lets a caller express native
    /// range continuation (byte/line offsets or a cursor). Tools without
    /// these get the overflow envelope when they signal more data.
    pub fn supports_range_continuation(&self) -> bool {
        let Some(props) = self.parameters.get("properties").and_then(Value::as_object) else {
            return false;
        };
        const RANGE_KEYS: [&str; 5] = ["offset", "start", "cursor", "range", "nextRange"];
        RANGE_KEYS.iter().any(|k| props.contains_key(*k))
    }
}

/// Result of one tool execution: the text handed back to the model and the
/// structured value used for continuation hints and redaction.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub content: String,
    pub structured: Option<Value>,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
        }
    }

    pub fn structured(content: impl Into<String>, structured: Value) -> Self {
        Self {
            content: content.into(),
            structured: Some(structured),
        }
    }
}

/// Registry the executor dispatches tool steps through. Unknown names are
/// `Error::NotFound`.
#[async_trait::async_trait]
pub trait ToolRegistry: Send + Sync {
    fn definition(&self, name: &str) -> Option<ToolDefinition>;

    async fn execute(&self, ctx: &ExecContext, name: &str, args: &Value) -> Result<ToolOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn range_continuation_detected_from_parameter_schema() {
        let with = ToolDefinition {
            name: "fs.read".into(),
            description: String::new(),
            parameters: json!({"type": "object", "properties": {"path": {}, "offset": {}}}),
            output_schema: None,
        };
        let without = ToolDefinition {
            name: "demo".into(),
            description: String::new(),
            parameters: json!({"type": "object", "properties": {"query": {}}}),
            output_schema: None,
        };
        assert!(with.supports_range_continuation());
        assert!(!without.supports_range_continuation());
    }
}
