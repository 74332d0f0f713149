//! Ephemeral per-turn plans: ordered tool/text steps extracted from a model
//! response, plus the canonical-args fingerprint used for de-duplication.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    #[default]
    Tool,
    Text,
}

/// One plan step. `tool` steps name a registry tool with an argument map;
/// `text` steps carry free-form reasoning in `reason`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: StepKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub reason: String,
}

impl Step {
    pub fn tool(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Tool,
            name: name.into(),
            args,
            reason: String::new(),
        }
    }

    /// De-duplication fingerprint: `(name, canonical args)`.
    pub fn fingerprint(&self) -> String {
        format!("{}\u{0}{}", self.name, canonical_args(&self.args))
    }
}

/// Schema-driven prompt the model asks of the user; surfaced in UI rather
/// than executed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Elicitation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub schema: Value,
}

impl Elicitation {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty() && self.schema.is_null()
    }
}

/// Ordered step sequence owned by a single orchestrator invocation; never
/// outlives its turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Elicitation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.elicitation.is_none()
    }

    /// Drop duplicate `tool` steps, keeping the first occurrence of each
    /// `(name, canonical args)` fingerprint. `text` steps are never dropped.
    pub fn refine(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.steps.retain(|step| {
            if step.kind != StepKind::Tool {
                return true;
            }
            seen.insert(step.fingerprint())
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical args
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic JSON rendering of an argument value: object keys are
/// recursively sorted, scalars keep their concrete JSON type (so `"1"` and
/// `1` never compare equal).
pub fn canonical_args(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys serialize through serde_json so escaping stays exact.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_args_sorts_keys_recursively() {
        let a = json!({"b": {"y": 2, "x": 1}, "a": [1, {"q": 0, "p": 9}]});
        let b = json!({"a": [1, {"p": 9, "q": 0}], "b": {"x": 1, "y": 2}});
        assert_eq!(canonical_args(&a), canonical_args(&b));
        assert_eq!(
            canonical_args(&a),
            r#"{"a":[1,{"p":9,"q":0}],"b":{"x":1,"y":2}}"#
        );
    }

    #[test]
    fn canonical_args_distinguishes_value_types() {
        let s = json!({"k": "1"});
        let n = json!({"k": 1});
        assert_ne!(canonical_args(&s), canonical_args(&n));
    }

    #[test]
    fn refine_drops_later_duplicates_only() {
        let mut plan = Plan {
            steps: vec![
                Step::tool("s1", "demo", json!({"a": 1})),
                Step::tool("s2", "demo", json!({"a": 1})),
                Step::tool("s3", "demo", json!({"a": 2})),
                Step {
                    id: "s4".into(),
                    kind: StepKind::Text,
                    reason: "thinking".into(),
                    ..Default::default()
                },
            ],
            elicitation: None,
        };
        plan.refine();
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3", "s4"]);
    }

    #[test]
    fn refine_treats_key_order_as_equal() {
        let mut plan = Plan {
            steps: vec![
                Step::tool("s1", "demo", json!({"a": 1, "b": 2})),
                Step::tool("s2", "demo", json!({"b": 2, "a": 1})),
            ],
            elicitation: None,
        };
        plan.refine();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "s1");
    }
}
