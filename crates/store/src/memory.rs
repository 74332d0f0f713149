//! In-memory conversation store backed by `parking_lot::RwLock` maps.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::RwLock;

use ag_domain::convo::ModelCall;
use ag_domain::{Conversation, ExecContext, Message, Payload, Result, ToolCall, Turn};

use crate::patch::{
    ConversationPatch, MessagePatch, ModelCallPatch, PayloadPatch, ToolCallPatch, TurnPatch,
};
use crate::ConversationStore;

/// Process-local store used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    turns: RwLock<HashMap<String, Turn>>,
    messages: RwLock<HashMap<String, Message>>,
    payloads: RwLock<HashMap<String, Payload>>,
    tool_calls: RwLock<HashMap<String, ToolCall>>,
    model_calls: RwLock<HashMap<String, ModelCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation record directly (test convenience).
    pub fn put_conversation(&self, conversation: Conversation) {
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation);
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn payload_count(&self) -> usize {
        self.payloads.read().len()
    }

    /// All messages of a conversation in creation order (test convenience).
    pub fn conversation_messages(&self, conversation_id: &str) -> Vec<Message> {
        let mut out: Vec<Message> = self
            .messages
            .read()
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, _ctx: &ExecContext, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(id).cloned())
    }

    async fn patch_conversations(
        &self,
        _ctx: &ExecContext,
        patches: &[ConversationPatch],
    ) -> Result<()> {
        let mut conversations = self.conversations.write();
        for patch in patches {
            let record = conversations
                .entry(patch.id.clone())
                .or_insert_with(|| Conversation::new(patch.id.clone()));
            patch.clone().apply(record);
        }
        Ok(())
    }

    async fn get_payload(&self, _ctx: &ExecContext, id: &str) -> Result<Option<Payload>> {
        Ok(self.payloads.read().get(id).cloned())
    }

    async fn patch_payload(&self, _ctx: &ExecContext, patch: PayloadPatch) -> Result<()> {
        let mut payloads = self.payloads.write();
        match payloads.entry(patch.id.clone()) {
            Entry::Occupied(mut record) => patch.apply(record.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(patch.materialize());
            }
        }
        Ok(())
    }

    async fn get_message(&self, _ctx: &ExecContext, id: &str) -> Result<Option<Message>> {
        Ok(self.messages.read().get(id).cloned())
    }

    async fn get_message_by_elicitation(
        &self,
        _ctx: &ExecContext,
        elicitation_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages
            .read()
            .values()
            .find(|m| m.elicitation_id.as_deref() == Some(elicitation_id))
            .cloned())
    }

    async fn patch_message(&self, _ctx: &ExecContext, patch: MessagePatch) -> Result<()> {
        let mut messages = self.messages.write();
        match messages.entry(patch.id.clone()) {
            Entry::Occupied(mut record) => patch.apply(record.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(patch.materialize());
            }
        }
        Ok(())
    }

    async fn patch_model_call(&self, _ctx: &ExecContext, patch: ModelCallPatch) -> Result<()> {
        let mut model_calls = self.model_calls.write();
        match model_calls.entry(patch.message_id.clone()) {
            Entry::Occupied(mut record) => patch.apply(record.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(patch.materialize());
            }
        }
        Ok(())
    }

    async fn patch_tool_call(&self, _ctx: &ExecContext, patch: ToolCallPatch) -> Result<()> {
        let mut tool_calls = self.tool_calls.write();
        match tool_calls.entry(patch.message_id.clone()) {
            Entry::Occupied(mut record) => patch.apply(record.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(patch.materialize());
            }
        }
        Ok(())
    }

    async fn patch_turn(&self, _ctx: &ExecContext, patch: TurnPatch) -> Result<()> {
        let mut turns = self.turns.write();
        match turns.entry(patch.id.clone()) {
            Entry::Occupied(mut record) => patch.apply(record.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(patch.materialize());
            }
        }
        Ok(())
    }

    async fn delete_conversation(&self, _ctx: &ExecContext, id: &str) -> Result<()> {
        self.conversations.write().remove(id);
        self.turns.write().retain(|_, t| t.conversation_id != id);
        let removed: Vec<String> = {
            let mut messages = self.messages.write();
            let ids: Vec<String> = messages
                .values()
                .filter(|m| m.conversation_id == id)
                .map(|m| m.id.clone())
                .collect();
            for mid in &ids {
                messages.remove(mid);
            }
            ids
        };
        let mut tool_calls = self.tool_calls.write();
        for mid in &removed {
            tool_calls.remove(mid);
        }
        Ok(())
    }

    async fn delete_message(&self, _ctx: &ExecContext, id: &str) -> Result<()> {
        self.messages.write().remove(id);
        self.tool_calls.write().remove(id);
        Ok(())
    }

    async fn get_turn(&self, _ctx: &ExecContext, id: &str) -> Result<Option<Turn>> {
        Ok(self.turns.read().get(id).cloned())
    }

    async fn get_tool_call(
        &self,
        _ctx: &ExecContext,
        message_id: &str,
    ) -> Result<Option<ToolCall>> {
        Ok(self.tool_calls.read().get(message_id).cloned())
    }

    async fn list_turn_messages(&self, _ctx: &ExecContext, turn_id: &str) -> Result<Vec<Message>> {
        let mut out: Vec<Message> = self
            .messages
            .read()
            .values()
            .filter(|m| m.turn_id == turn_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}
