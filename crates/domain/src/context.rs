//! Execution context threaded through every async operation.
//!
//! An [`ExecContext`] bundles a cancellation token, an optional deadline, and
//! the typed value slots the runtime layers consult (turn metadata, ambient
//! auth tokens, per-call overrides, chain state). Deriving a child context
//! never mutates the parent; finalization writes use [`ExecContext::background`]
//! so persistent records stay consistent after an outer cancel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::retrieval::LocalRoot;
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CancelToken
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancellation token with parent→child propagation: canceling a parent
/// cancels every child derived from it, never the reverse.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves when the token (or any ancestor) is canceled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed value slots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity of the turn an operation runs under.
#[derive(Debug, Clone, Default)]
pub struct TurnMeta {
    pub turn_id: String,
    pub conversation_id: String,
    pub parent_message_id: String,
    pub trace_id: Option<String>,
}

/// Ambient auth tokens read from the request context (never issued here).
#[derive(Debug, Clone, Default)]
pub struct AuthTokens {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

/// A token selected for a specific server, placed in the context under the
/// slot the transport reads.
#[derive(Debug, Clone)]
pub struct ServerToken {
    pub server: String,
    pub token: String,
    /// True when the token is an ID token rather than an access token.
    pub id_token: bool,
}

/// Per-chain invocation counters, keyed `(conversation, chain index, target
/// agent)`. Shared by value: clones observe the same counters.
#[derive(Clone, Default)]
pub struct ChainControl {
    counts: Arc<Mutex<HashMap<(String, usize, String), u32>>>,
}

impl ChainControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter unless it already reached `max_depth`.
    /// Returns false when the chain is at its limit and must be skipped.
    pub fn try_enter(
        &self,
        conversation_id: &str,
        chain_index: usize,
        target_agent_id: &str,
        max_depth: u32,
    ) -> bool {
        let key = (
            conversation_id.to_owned(),
            chain_index,
            target_agent_id.to_owned(),
        );
        let mut counts = self.counts.lock();
        let count = counts.entry(key).or_insert(0);
        if *count >= max_depth {
            return false;
        }
        *count += 1;
        true
    }

    pub fn depth(&self, conversation_id: &str, chain_index: usize, target_agent_id: &str) -> u32 {
        let key = (
            conversation_id.to_owned(),
            chain_index,
            target_agent_id.to_owned(),
        );
        self.counts.lock().get(&key).copied().unwrap_or(0)
    }
}

/// Chain execution state carried on the context of a chain-spawned turn.
#[derive(Clone, Default)]
pub struct ChainScope {
    pub control: ChainControl,
    pub resume: bool,
    pub depth: u32,
    pub parent_turn_id: Option<String>,
    pub target_agent_id: Option<String>,
}

#[derive(Clone, Default)]
struct ContextValues {
    turn: Option<TurnMeta>,
    auth: Option<AuthTokens>,
    server_token: Option<ServerToken>,
    tool_timeout: Option<Duration>,
    chain: Option<ChainScope>,
    sync_roots: Vec<LocalRoot>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Default)]
pub struct ExecContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
    values: Arc<ContextValues>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context sharing values and deadline; canceling the child does
    /// not cancel the parent.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child(),
            deadline: self.deadline,
            values: self.values.clone(),
        }
    }

    /// Child context whose deadline is the sooner of the inherited deadline
    /// and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let new = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(d) => Some(d.min(new)),
            None => Some(new),
        };
        Self {
            cancel: self.cancel.child(),
            deadline,
            values: self.values.clone(),
        }
    }

    /// Detached context for finalization writes: fresh token, no deadline,
    /// same value slots.
    pub fn background(&self) -> Self {
        Self {
            cancel: CancelToken::new(),
            deadline: None,
            values: self.values.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline_exceeded()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error this context is currently done with, if any.
    pub fn err(&self) -> Option<Error> {
        if self.cancel.is_cancelled() {
            Some(Error::Canceled)
        } else if self.deadline_exceeded() {
            Some(Error::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Fail fast at a suspension point.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves when the token is canceled. Deadlines are enforced by the
    /// caller via `tokio::time::timeout` over the actual operation.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    // ── value accessors ─────────────────────────────────────────────

    pub fn turn(&self) -> Option<&TurnMeta> {
        self.values.turn.as_ref()
    }

    pub fn auth(&self) -> Option<&AuthTokens> {
        self.values.auth.as_ref()
    }

    pub fn server_token(&self) -> Option<&ServerToken> {
        self.values.server_token.as_ref()
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.values.tool_timeout
    }

    pub fn chain(&self) -> Option<&ChainScope> {
        self.values.chain.as_ref()
    }

    /// True while executing under a chain continuation.
    pub fn chain_mode(&self) -> bool {
        self.values.chain.is_some()
    }

    pub fn sync_roots(&self) -> &[LocalRoot] {
        &self.values.sync_roots
    }

    // ── value builders ──────────────────────────────────────────────

    pub fn with_turn(&self, turn: TurnMeta) -> Self {
        self.map_values(|v| v.turn = Some(turn))
    }

    pub fn with_auth(&self, auth: AuthTokens) -> Self {
        self.map_values(|v| v.auth = Some(auth))
    }

    pub fn with_server_token(&self, token: ServerToken) -> Self {
        self.map_values(|v| v.server_token = Some(token))
    }

    pub fn with_tool_timeout(&self, timeout: Duration) -> Self {
        self.map_values(|v| v.tool_timeout = Some(timeout))
    }

    pub fn with_chain(&self, chain: ChainScope) -> Self {
        self.map_values(|v| v.chain = Some(chain))
    }

    pub fn with_sync_roots(&self, roots: Vec<LocalRoot>) -> Self {
        self.map_values(|v| v.sync_roots = roots)
    }

    fn map_values(&self, f: impl FnOnce(&mut ContextValues)) -> Self {
        let mut values = (*self.values).clone();
        f(&mut values);
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_cancel_does_not_cancel_parent() {
        let parent = ExecContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn parent_cancel_propagates_to_child() {
        let parent = ExecContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.err(), Some(Error::Canceled)));
    }

    #[test]
    fn background_detaches_from_cancel_but_keeps_values() {
        let ctx = ExecContext::new().with_turn(TurnMeta {
            turn_id: "t1".into(),
            conversation_id: "c1".into(),
            parent_message_id: "m1".into(),
            trace_id: None,
        });
        ctx.cancel();
        let bg = ctx.background();
        assert!(!bg.is_cancelled());
        assert_eq!(bg.turn().unwrap().turn_id, "t1");
    }

    #[test]
    fn timeout_deadline_reports_deadline_error() {
        let ctx = ExecContext::new().with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.deadline_exceeded());
        assert!(matches!(ctx.err(), Some(Error::DeadlineExceeded)));
    }

    #[test]
    fn chain_control_enforces_depth() {
        let control = ChainControl::new();
        assert!(control.try_enter("c1", 0, "a", 2));
        assert!(control.try_enter("c1", 0, "a", 2));
        assert!(!control.try_enter("c1", 0, "a", 2));
        // Different key is independent.
        assert!(control.try_enter("c1", 1, "a", 2));
        assert_eq!(control.depth("c1", 0, "a"), 2);
    }
}
