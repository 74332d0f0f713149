//! Client and provider contracts the pool builds on.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use ag_domain::{ExecContext, Result};

use crate::auth::Authorizer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connected MCP client. `close`/`shutdown` default to no-ops so an
/// implementation lacking either is not an error; the pool tries `close`
/// first and falls back to `shutdown` on eviction.
#[async_trait::async_trait]
pub trait McpClient: Send + Sync {
    /// The server this client is connected to.
    fn server(&self) -> &str;

    async fn call_tool(&self, ctx: &ExecContext, name: &str, arguments: Value) -> Result<Value>;

    /// List resources below a uri prefix.
    async fn list_resources(&self, ctx: &ExecContext, uri: &str) -> Result<Vec<Value>>;

    /// Read a single resource's bytes.
    async fn read_resource(&self, ctx: &ExecContext, uri: &str) -> Result<Vec<u8>>;

    /// Graceful close; errors are logged by the pool, not propagated.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Last-resort teardown when `close` failed or is unavailable.
    async fn shutdown(&self, _ctx: &ExecContext) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options and providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport endpoint for a server.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Http { url: String },
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
}

/// Construction options supplied by the provider for one server, finalized
/// by the pool's credential hooks before the connector runs.
#[derive(Clone)]
pub struct ClientOptions {
    pub server: String,
    pub endpoint: Endpoint,
    /// Cookies the provider seeds every jar with, as `(url, cookie)` pairs.
    pub default_cookies: Vec<(String, String)>,
    /// Whether this server wants the ID token rather than the access token.
    pub prefer_id_token: bool,
    /// Per-user jar selected by the pool's cookie hook.
    pub cookie_jar: Option<Arc<reqwest::cookie::Jar>>,
    /// OAuth-style authorizer attached by the pool's auth hook.
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

impl ClientOptions {
    pub fn new(server: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            server: server.into(),
            endpoint,
            default_cookies: Vec::new(),
            prefer_id_token: false,
            cookie_jar: None,
            authorizer: None,
        }
    }
}

/// Supplies per-server construction options. Returning `Ok(None)` means the
/// server is unknown; both `None` and errors fail `get` without caching.
#[async_trait::async_trait]
pub trait ClientOptionsProvider: Send + Sync {
    async fn options(&self, ctx: &ExecContext, server: &str) -> Result<Option<ClientOptions>>;
}

/// Builds a connected client from finalized options.
#[async_trait::async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, ctx: &ExecContext, options: ClientOptions)
        -> Result<Arc<dyn McpClient>>;
}
