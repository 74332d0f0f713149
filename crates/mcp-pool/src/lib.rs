//! `ag-mcp-pool` — conversation-scoped MCP client pool.
//!
//! Clients are cached per `(conversation, server)` pair, constructed from
//! provider-supplied options with per-request credential injection, evicted
//! after an idle TTL by a background reaper, and disconnected gracefully on
//! every eviction path (reap, close-conversation, reconnect).

pub mod auth;
pub mod client;
pub mod pool;

pub use auth::{with_auth_token_context, Authorizer, AuthorizerProvider, CookieJarProvider};
pub use client::{ClientConnector, ClientOptions, ClientOptionsProvider, Endpoint, McpClient};
pub use pool::{ClientPool, ReaperHandle};
