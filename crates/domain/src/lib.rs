//! `ag-domain` — shared data model and contracts for the agently runtime.
//!
//! Everything the four core subsystems (client pool, snapshot FS, retrieval,
//! orchestrator) exchange lives here: conversation records, plans, payloads,
//! the execution context, the LLM provider trait, resource/workspace URIs,
//! and the configuration types.

pub mod config;
pub mod context;
pub mod convo;
pub mod error;
pub mod llm;
pub mod plan;
pub mod stream;
pub mod tool;
pub mod trace;
pub mod uri;
pub mod workspace;

// Re-exports for convenience.
pub use context::{AuthTokens, CancelToken, ExecContext, ServerToken, TurnMeta};
pub use convo::{
    Conversation, Message, MessageKind, Payload, PayloadKind, PayloadStorage, Role, ToolCall,
    ToolCallStatus, Turn, TurnStatus,
};
pub use error::{Error, Result};
pub use plan::{canonical_args, Elicitation, Plan, Step, StepKind};
