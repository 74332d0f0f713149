//! `ag-store` — the conversation store contract.
//!
//! The orchestrator persists everything through [`ConversationStore`]; the
//! production backend is an external service, while [`MemoryStore`] backs
//! the runtime's tests and local development. All operations are idempotent
//! on primary key, and patches merge only explicitly-set fields: a `Some`
//! field is written, a `None` field leaves the stored value untouched.

mod memory;
mod patch;

pub use memory::MemoryStore;
pub use patch::{
    ConversationPatch, MessagePatch, ModelCallPatch, PayloadPatch, ToolCallPatch, TurnPatch,
};

use ag_domain::{
    Conversation, ExecContext, Message, Payload, Result, ToolCall, Turn,
};

/// Narrow persistence interface the runtime depends on.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, ctx: &ExecContext, id: &str) -> Result<Option<Conversation>>;

    async fn patch_conversations(
        &self,
        ctx: &ExecContext,
        patches: &[ConversationPatch],
    ) -> Result<()>;

    async fn get_payload(&self, ctx: &ExecContext, id: &str) -> Result<Option<Payload>>;

    async fn patch_payload(&self, ctx: &ExecContext, patch: PayloadPatch) -> Result<()>;

    async fn get_message(&self, ctx: &ExecContext, id: &str) -> Result<Option<Message>>;

    /// Look up the message that surfaced a given elicitation.
    async fn get_message_by_elicitation(
        &self,
        ctx: &ExecContext,
        elicitation_id: &str,
    ) -> Result<Option<Message>>;

    async fn patch_message(&self, ctx: &ExecContext, patch: MessagePatch) -> Result<()>;

    async fn patch_model_call(&self, ctx: &ExecContext, patch: ModelCallPatch) -> Result<()>;

    async fn patch_tool_call(&self, ctx: &ExecContext, patch: ToolCallPatch) -> Result<()>;

    async fn patch_turn(&self, ctx: &ExecContext, patch: TurnPatch) -> Result<()>;

    async fn delete_conversation(&self, ctx: &ExecContext, id: &str) -> Result<()>;

    async fn delete_message(&self, ctx: &ExecContext, id: &str) -> Result<()>;

    // ── read-side helpers the runtime needs beyond the patch surface ──

    async fn get_turn(&self, ctx: &ExecContext, id: &str) -> Result<Option<Turn>>;

    async fn get_tool_call(&self, ctx: &ExecContext, message_id: &str)
        -> Result<Option<ToolCall>>;

    /// Messages of a turn in creation order.
    async fn list_turn_messages(&self, ctx: &ExecContext, turn_id: &str) -> Result<Vec<Message>>;
}
