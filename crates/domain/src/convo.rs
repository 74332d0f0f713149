//! Durable conversation records: conversations, turns, messages, payloads,
//! and tool calls. Entities reference each other by string id only and are
//! fetched from the store, never shared by reference across turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A durable conversation container. Created explicitly, destroyed by
/// explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Parent conversation for chain-created children.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub last_turn_id: Option<String>,
    #[serde(default)]
    pub status: Option<TurnStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata blob.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            default_model: None,
            last_turn_id: None,
            status: None,
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TurnStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Running => "running",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
            TurnStatus::Canceled => "canceled",
        }
    }
}

/// One user-originated interaction. The turn id doubles as the stable task
/// message id: attachments produced during execution parent on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    /// The last user message the turn started from.
    pub parent_message_id: String,
    pub status: TurnStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent_id_used: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolOp,
    Control,
}

/// One transcript record.
///
/// Invariant: `parent_message_id` refers to a message in the same
/// conversation, or is the owning turn id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub turn_id: String,
    pub parent_message_id: String,
    pub role: Role,
    pub kind: MessageKind,
    /// Expanded/rendered text.
    #[serde(default)]
    pub content: String,
    /// The author's original text, when it differs from `content`.
    #[serde(default)]
    pub raw_content: Option<String>,
    /// Free-form discriminator (`chain`, `system-doc`, ...).
    #[serde(default)]
    pub mode: Option<String>,
    /// Actor name for non-user roles (e.g. the chain that published it).
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachment_payload_id: Option<String>,
    /// Set on chain-link messages pointing at the child conversation.
    #[serde(default)]
    pub linked_conversation_id: Option<String>,
    /// Id of the elicitation this message surfaced, when any.
    #[serde(default)]
    pub elicitation_id: Option<String>,
    #[serde(default)]
    pub interim: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Minimal constructor; callers fill optional fields as needed.
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        turn_id: impl Into<String>,
        parent_message_id: impl Into<String>,
        role: Role,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            turn_id: turn_id.into(),
            parent_message_id: parent_message_id.into(),
            role,
            kind,
            content: String::new(),
            raw_content: None,
            mode: None,
            actor: None,
            tags: Vec::new(),
            attachment_payload_id: None,
            linked_conversation_id: None,
            elicitation_id: None,
            interim: false,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    ToolRequest,
    ToolResponse,
    ModelRequest,
    ModelResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStorage {
    Inline,
    Uri,
}

/// An inline or externally-referenced blob.
///
/// Invariant: exactly one of `inline_body` / `uri` is populated; `size`
/// matches the body length when inline. The constructors are the only way
/// these are built, which keeps the invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub id: String,
    pub kind: PayloadKind,
    pub mime_type: String,
    pub size: u64,
    pub storage: PayloadStorage,
    #[serde(default)]
    pub inline_body: Option<Vec<u8>>,
    #[serde(default)]
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payload {
    pub fn inline(
        id: impl Into<String>,
        kind: PayloadKind,
        mime_type: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            mime_type: mime_type.into(),
            size: body.len() as u64,
            storage: PayloadStorage::Inline,
            inline_body: Some(body),
            uri: None,
            created_at: Utc::now(),
        }
    }

    pub fn external(
        id: impl Into<String>,
        kind: PayloadKind,
        mime_type: impl Into<String>,
        uri: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            mime_type: mime_type.into(),
            size,
            storage: PayloadStorage::Uri,
            inline_body: None,
            uri: Some(uri.into()),
            created_at: Utc::now(),
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        self.inline_body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Running)
    }
}

/// Record of one tool invocation, 1:1 with its tool message.
///
/// Lifecycle: created `running`; exactly one terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Id of the tool message this call is bound to.
    pub message_id: String,
    /// Model-provided operation id.
    pub op_id: String,
    pub turn_id: String,
    pub tool_name: String,
    pub tool_kind: String,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub request_payload_id: Option<String>,
    #[serde(default)]
    pub response_payload_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Record of one model invocation bound to a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCall {
    pub message_id: String,
    pub turn_id: String,
    pub provider: String,
    pub model: String,
    pub status: ToolCallStatus,
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
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
