//! Provider-agnostic LLM contract. Adapters for concrete providers live
//! outside this workspace; the orchestrator only sees this trait.

use serde::{Deserialize, Serialize};

use crate::context::ExecContext;
use crate::error::Result;
use crate::stream::{BoxStream, Choice, StreamEvent, Usage};
use crate::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat turn as sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: text.into(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }
}

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. `None` lets the provider choose.
    pub model: Option<String>,
    /// Free-form invocation mode (`chain` for chain subqueries).
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements. The orchestrator prefers `stream`
/// when `supports_streaming` is true and falls back to a single `generate`.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// One-shot generation.
    async fn generate(&self, ctx: &ExecContext, req: GenerateRequest) -> Result<GenerateResponse>;

    /// Streaming generation; events carry the latest cumulative choice.
    async fn stream(
        &self,
        ctx: &ExecContext,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Resolves a provider for a model id. Thin seam so tests can inject fakes.
#[async_trait::async_trait]
pub trait ProviderFinder: Send + Sync {
    async fn find(&self, ctx: &ExecContext, model: Option<&str>)
        -> Result<std::sync::Arc<dyn LlmProvider>>;
}
