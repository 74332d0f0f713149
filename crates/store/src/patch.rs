//! Patch types: one per record, `Option` per field. Only `Some` fields are
//! merged into the stored record; patching an unknown primary key creates
//! the record from the set fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ag_domain::{
    Conversation, Message, MessageKind, Payload, PayloadKind, PayloadStorage, Role, ToolCall,
    ToolCallStatus, Turn, TurnStatus,
};
use ag_domain::convo::ModelCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationPatch {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub last_turn_id: Option<String>,
    #[serde(default)]
    pub status: Option<TurnStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ConversationPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut Conversation) {
        if let Some(v) = self.parent_id {
            record.parent_id = Some(v);
        }
        if let Some(v) = self.default_model {
            record.default_model = Some(v);
        }
        if let Some(v) = self.last_turn_id {
            record.last_turn_id = Some(v);
        }
        if let Some(v) = self.status {
            record.status = Some(v);
        }
        if let Some(v) = self.tags {
            record.tags = v;
        }
        if let Some(v) = self.metadata {
            record.metadata = v;
        }
    }
}

impl From<Conversation> for ConversationPatch {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            parent_id: c.parent_id,
            default_model: c.default_model,
            last_turn_id: c.last_turn_id,
            status: c.status,
            tags: Some(c.tags),
            metadata: Some(c.metadata),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TurnPatch {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub status: Option<TurnStatus>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent_id_used: Option<String>,
}

impl TurnPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut Turn) {
        if let Some(v) = self.conversation_id {
            record.conversation_id = v;
        }
        if let Some(v) = self.parent_message_id {
            record.parent_message_id = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.started_at {
            record.started_at = v;
        }
        if let Some(v) = self.ended_at {
            record.ended_at = Some(v);
        }
        if let Some(v) = self.agent_id_used {
            record.agent_id_used = Some(v);
        }
    }

    /// Skeleton record for an unknown id.
    pub fn materialize(&self) -> Turn {
        Turn {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone().unwrap_or_default(),
            parent_message_id: self.parent_message_id.clone().unwrap_or_default(),
            status: self.status.unwrap_or(TurnStatus::Running),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            ended_at: self.ended_at,
            agent_id_used: self.agent_id_used.clone(),
        }
    }
}

impl From<Turn> for TurnPatch {
    fn from(t: Turn) -> Self {
        Self {
            id: t.id,
            conversation_id: Some(t.conversation_id),
            parent_message_id: Some(t.parent_message_id),
            status: Some(t.status),
            started_at: Some(t.started_at),
            ended_at: t.ended_at,
            agent_id_used: t.agent_id_used,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePatch {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub attachment_payload_id: Option<String>,
    #[serde(default)]
    pub linked_conversation_id: Option<String>,
    #[serde(default)]
    pub elicitation_id: Option<String>,
    #[serde(default)]
    pub interim: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessagePatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut Message) {
        if let Some(v) = self.conversation_id {
            record.conversation_id = v;
        }
        if let Some(v) = self.turn_id {
            record.turn_id = v;
        }
        if let Some(v) = self.parent_message_id {
            record.parent_message_id = v;
        }
        if let Some(v) = self.role {
            record.role = v;
        }
        if let Some(v) = self.kind {
            record.kind = v;
        }
        if let Some(v) = self.content {
            record.content = v;
        }
        if let Some(v) = self.raw_content {
            record.raw_content = Some(v);
        }
        if let Some(v) = self.mode {
            record.mode = Some(v);
        }
        if let Some(v) = self.actor {
            record.actor = Some(v);
        }
        if let Some(v) = self.tags {
            record.tags = v;
        }
        if let Some(v) = self.attachment_payload_id {
            record.attachment_payload_id = Some(v);
        }
        if let Some(v) = self.linked_conversation_id {
            record.linked_conversation_id = Some(v);
        }
        if let Some(v) = self.elicitation_id {
            record.elicitation_id = Some(v);
        }
        if let Some(v) = self.interim {
            record.interim = v;
        }
        if let Some(v) = self.created_at {
            record.created_at = v;
        }
    }

    pub fn materialize(&self) -> Message {
        let mut record = Message::new(
            self.id.clone(),
            self.conversation_id.clone().unwrap_or_default(),
            self.turn_id.clone().unwrap_or_default(),
            self.parent_message_id.clone().unwrap_or_default(),
            self.role.unwrap_or(Role::System),
            self.kind.unwrap_or(MessageKind::Text),
        );
        self.clone().apply(&mut record);
        record
    }
}

impl From<Message> for MessagePatch {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: Some(m.conversation_id),
            turn_id: Some(m.turn_id),
            parent_message_id: Some(m.parent_message_id),
            role: Some(m.role),
            kind: Some(m.kind),
            content: Some(m.content),
            raw_content: m.raw_content,
            mode: m.mode,
            actor: m.actor,
            tags: Some(m.tags),
            attachment_payload_id: m.attachment_payload_id,
            linked_conversation_id: m.linked_conversation_id,
            elicitation_id: m.elicitation_id,
            interim: Some(m.interim),
            created_at: Some(m.created_at),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PayloadPatch {
    pub id: String,
    #[serde(default)]
    pub kind: Option<PayloadKind>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub storage: Option<PayloadStorage>,
    #[serde(default)]
    pub inline_body: Option<Vec<u8>>,
    #[serde(default)]
    pub uri: Option<String>,
}

impl PayloadPatch {
    pub fn apply(self, record: &mut Payload) {
        if let Some(v) = self.kind {
            record.kind = v;
        }
        if let Some(v) = self.mime_type {
            record.mime_type = v;
        }
        if let Some(v) = self.size {
            record.size = v;
        }
        if let Some(v) = self.storage {
            record.storage = v;
        }
        if let Some(v) = self.inline_body {
            record.size = v.len() as u64;
            record.inline_body = Some(v);
            record.uri = None;
            record.storage = PayloadStorage::Inline;
        }
        if let Some(v) = self.uri {
            record.uri = Some(v);
            record.inline_body = None;
            record.storage = PayloadStorage::Uri;
        }
    }

    pub fn materialize(&self) -> Payload {
        let kind = self.kind.unwrap_or(PayloadKind::ToolResponse);
        let mime = self.mime_type.clone().unwrap_or_else(|| "text/plain".into());
        match (&self.inline_body, &self.uri) {
            (_, Some(uri)) => Payload::external(
                self.id.clone(),
                kind,
                mime,
                uri.clone(),
                self.size.unwrap_or(0),
            ),
            (Some(body), None) => Payload::inline(self.id.clone(), kind, mime, body.clone()),
            (None, None) => Payload::inline(self.id.clone(), kind, mime, Vec::new()),
        }
    }
}

impl From<Payload> for PayloadPatch {
    fn from(p: Payload) -> Self {
        Self {
            id: p.id,
            kind: Some(p.kind),
            mime_type: Some(p.mime_type),
            size: Some(p.size),
            storage: Some(p.storage),
            inline_body: p.inline_body,
            uri: p.uri,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCall / ModelCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCallPatch {
    pub message_id: String,
    #[serde(default)]
    pub op_id: Option<String>,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_kind: Option<String>,
    #[serde(default)]
    pub status: Option<ToolCallStatus>,
    #[serde(default)]
    pub request_payload_id: Option<String>,
    #[serde(default)]
    pub response_payload_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl ToolCallPatch {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ..Default::default()
        }
    }

    pub fn apply(self, record: &mut ToolCall) {
        if let Some(v) = self.op_id {
            record.op_id = v;
        }
        if let Some(v) = self.turn_id {
            record.turn_id = v;
        }
        if let Some(v) = self.tool_name {
            record.tool_name = v;
        }
        if let Some(v) = self.tool_kind {
            record.tool_kind = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.request_payload_id {
            record.request_payload_id = Some(v);
        }
        if let Some(v) = self.response_payload_id {
            record.response_payload_id = Some(v);
        }
        if let Some(v) = self.error_message {
            record.error_message = Some(v);
        }
        if let Some(v) = self.started_at {
            record.started_at = v;
        }
        if let Some(v) = self.completed_at {
            record.completed_at = Some(v);
        }
        if let Some(v) = self.trace_id {
            record.trace_id = Some(v);
        }
    }

    pub fn materialize(&self) -> ToolCall {
        let mut record = ToolCall {
            message_id: self.message_id.clone(),
            op_id: String::new(),
            turn_id: String::new(),
            tool_name: String::new(),
            tool_kind: "general".into(),
            status: ToolCallStatus::Running,
            request_payload_id: None,
            response_payload_id: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            trace_id: None,
        };
        self.clone().apply(&mut record);
        record
    }
}

impl From<ToolCall> for ToolCallPatch {
    fn from(t: ToolCall) -> Self {
        Self {
            message_id: t.message_id,
            op_id: Some(t.op_id),
            turn_id: Some(t.turn_id),
            tool_name: Some(t.tool_name),
            tool_kind: Some(t.tool_kind),
            status: Some(t.status),
            request_payload_id: t.request_payload_id,
            response_payload_id: t.response_payload_id,
            error_message: t.error_message,
            started_at: Some(t.started_at),
            completed_at: t.completed_at,
            trace_id: t.trace_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelCallPatch {
    pub message_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub status: Option<ToolCallStatus>,
    #[serde(default)]
    pub request_payload_id: Option<String>,
    #[serde(default)]
    pub response_payload_id: Option<String>,
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModelCallPatch {
    pub fn apply(self, record: &mut ModelCall) {
        if let Some(v) = self.turn_id {
            record.turn_id = v;
        }
        if let Some(v) = self.provider {
            record.provider = v;
        }
        if let Some(v) = self.model {
            record.model = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.request_payload_id {
            record.request_payload_id = Some(v);
        }
        if let Some(v) = self.response_payload_id {
            record.response_payload_id = Some(v);
        }
        if let Some(v) = self.prompt_tokens {
            record.prompt_tokens = Some(v);
        }
        if let Some(v) = self.completion_tokens {
            record.completion_tokens = Some(v);
        }
        if let Some(v) = self.error_message {
            record.error_message = Some(v);
        }
        if let Some(v) = self.started_at {
            record.started_at = v;
        }
        if let Some(v) = self.completed_at {
            record.completed_at = Some(v);
        }
    }

    pub fn materialize(&self) -> ModelCall {
        let mut record = ModelCall {
            message_id: self.message_id.clone(),
            turn_id: String::new(),
            provider: String::new(),
            model: String::new(),
            status: ToolCallStatus::Running,
            request_payload_id: None,
            response_payload_id: None,
            prompt_tokens: None,
            completion_tokens: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.clone().apply(&mut record);
        record
    }
}
