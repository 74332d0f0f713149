//! Agent configuration: identity, default model, and the chain declarations
//! evaluated after each turn completes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chains: Vec<ChainSpec>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chains
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One conditional continuation declared on an agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainSpec {
    /// Turn-status selector: `completed`, `failed`, or `*`.
    #[serde(default = "d_on")]
    pub on: String,
    #[serde(default)]
    pub when: Option<WhenSpec>,
    pub target: ChainTarget,
    #[serde(default)]
    pub conversation: ConversationPolicy,
    #[serde(default)]
    pub publish: PublishSpec,
    #[serde(default)]
    pub limits: ChainLimits,
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    #[serde(default)]
    pub mode: ChainMode,
    /// Template rendered against the parent binding to form the child query.
    #[serde(default)]
    pub query: String,
    /// Chain metadata merged into the child's context map.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl ChainSpec {
    /// Whether this chain reacts to the given completed-turn status.
    pub fn matches_status(&self, status: &str) -> bool {
        self.on == "*" || self.on == status
    }
}

fn d_on() -> String {
    "completed".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainTarget {
    pub agent_id: String,
}

/// `link` creates a fresh child conversation; otherwise the parent
/// conversation is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationPolicy {
    #[default]
    Reuse,
    Link,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSpec {
    /// Role of the placeholder message published on the parent turn.
    #[serde(default = "d_publish_role")]
    pub role: String,
    /// Parent-message selector; empty means the turn itself.
    #[serde(default)]
    pub parent: Option<String>,
    /// Actor name recorded on the placeholder message.
    #[serde(default = "d_publish_name")]
    pub name: String,
    /// Run the parent as a continuation turn when the child produced
    /// content.
    #[serde(default)]
    pub auto_next_turn: bool,
}

impl Default for PublishSpec {
    fn default() -> Self {
        Self {
            role: d_publish_role(),
            parent: None,
            name: d_publish_name(),
            auto_next_turn: false,
        }
    }
}

fn d_publish_role() -> String {
    "user".into()
}

fn d_publish_name() -> String {
    "chain".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLimits {
    #[serde(default = "d_max_depth")]
    pub max_depth: u32,
    /// Template whose rendered value de-duplicates chain firings per
    /// conversation.
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

impl Default for ChainLimits {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            dedupe_key: None,
        }
    }
}

fn d_max_depth() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorPolicy {
    Propagate,
    Message,
    #[default]
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    #[default]
    Sync,
    Async,
}

// ── when ────────────────────────────────────────────────────────────

/// Condition gating a chain: a template expression or a schema-gated LLM
/// subquery.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhenSpec {
    /// Template rendered against the parent binding and read as a boolean
    /// literal.
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub llm: Option<LlmWhen>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmWhen {
    /// User-prompt template for the subquery.
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub expect: Expect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expect {
    #[serde(default)]
    pub kind: ExpectKind,
    /// Regex pattern for `kind = regex`.
    #[serde(default)]
    pub pattern: Option<String>,
    /// `$.field` path for `kind = jsonpath`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for Expect {
    fn default() -> Self {
        Self {
            kind: ExpectKind::Boolean,
            pattern: None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpectKind {
    Regex,
    Jsonpath,
    #[default]
    Boolean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_defaults() {
        let spec: ChainSpec = serde_json::from_value(serde_json::json!({
            "target": {"agent_id": "summarizer"}
        }))
        .unwrap();
        assert_eq!(spec.on, "completed");
        assert_eq!(spec.limits.max_depth, 10);
        assert_eq!(spec.publish.role, "user");
        assert_eq!(spec.publish.name, "chain");
        assert_eq!(spec.mode, ChainMode::Sync);
        assert_eq!(spec.on_error, OnErrorPolicy::Ignore);
        assert!(spec.matches_status("completed"));
        assert!(!spec.matches_status("failed"));
    }

    #[test]
    fn wildcard_on_matches_everything() {
        let spec = ChainSpec {
            on: "*".into(),
            ..Default::default()
        };
        assert!(spec.matches_status("completed"));
        assert!(spec.matches_status("failed"));
    }
}
