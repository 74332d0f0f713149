//! The conversation-scoped client pool.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ag_domain::config::PoolConfig;
use ag_domain::trace::TraceEvent;
use ag_domain::{Error, ExecContext, Result};

use crate::auth::{AuthorizerProvider, CookieJarProvider};
use crate::client::{ClientConnector, ClientOptionsProvider, McpClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PoolEntry {
    client: Arc<dyn McpClient>,
    last_used: Instant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ClientPool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide pool of MCP clients keyed by `(conversation, server)`.
///
/// One mutex guards the two-level map. Construction happens outside the
/// lock after absence is confirmed; a racing construction keeps the first
/// inserted client and gracefully disconnects the loser.
pub struct ClientPool {
    entries: Mutex<HashMap<String, HashMap<String, PoolEntry>>>,
    provider: Arc<dyn ClientOptionsProvider>,
    connector: Arc<dyn ClientConnector>,
    cookie_jars: Option<Arc<dyn CookieJarProvider>>,
    authorizers: Option<Arc<dyn AuthorizerProvider>>,
    ttl: Duration,
}

impl ClientPool {
    pub fn new(
        provider: Arc<dyn ClientOptionsProvider>,
        connector: Arc<dyn ClientConnector>,
        config: &PoolConfig,
    ) -> Self {
        Self::with_ttl(provider, connector, config.ttl())
    }

    /// Constructor taking the raw TTL; `new` clamps through [`PoolConfig`].
    pub fn with_ttl(
        provider: Arc<dyn ClientOptionsProvider>,
        connector: Arc<dyn ClientConnector>,
        ttl: Duration,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            provider,
            connector,
            cookie_jars: None,
            authorizers: None,
            ttl,
        }
    }

    pub fn with_cookie_jars(mut self, hook: Arc<dyn CookieJarProvider>) -> Self {
        self.cookie_jars = Some(hook);
        self
    }

    pub fn with_authorizers(mut self, hook: Arc<dyn AuthorizerProvider>) -> Self {
        self.authorizers = Some(hook);
        self
    }

    pub fn options_provider(&self) -> &Arc<dyn ClientOptionsProvider> {
        &self.provider
    }

    /// Return the cached client for `(conversation, server)`, constructing
    /// one from provider options when absent. Provider errors are never
    /// cached; a failed construction leaves the pool unchanged.
    pub async fn get(
        &self,
        ctx: &ExecContext,
        conversation_id: &str,
        server: &str,
    ) -> Result<Arc<dyn McpClient>> {
        if let Some(client) = self.lookup(conversation_id, server) {
            return Ok(client);
        }

        let options = self
            .provider
            .options(ctx, server)
            .await?
            .ok_or_else(|| Error::Fatal(format!("no client options for server {server}")))?;

        // Credential injection: merge provider-default cookies into the
        // selected jar before it overrides the client's jar, so the first
        // request carries prior session cookies.
        let mut options = options;
        if let Some(hook) = &self.cookie_jars {
            if let Some(jar) = hook.jar(ctx) {
                for (url, cookie) in &options.default_cookies {
                    if let Ok(url) = url.parse() {
                        jar.add_cookie_str(cookie, &url);
                    }
                }
                options.cookie_jar = Some(jar);
            }
        }
        if let Some(hook) = &self.authorizers {
            if let Some(authorizer) = hook.authorizer(ctx) {
                options.authorizer = Some(authorizer);
            }
        }

        let client = self.connector.connect(ctx, options).await?;

        // Re-check under the lock: another caller may have won the race.
        let existing = {
            let mut entries = self.entries.lock();
            let servers = entries.entry(conversation_id.to_owned()).or_default();
            match servers.entry(server.to_owned()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().last_used = Instant::now();
                    Some(entry.get().client.clone())
                }
                Entry::Vacant(slot) => {
                    slot.insert(PoolEntry {
                        client: client.clone(),
                        last_used: Instant::now(),
                    });
                    None
                }
            }
        };

        match existing {
            Some(winner) => {
                disconnect(ctx, client, conversation_id, server, "lost construction race").await;
                Ok(winner)
            }
            None => {
                TraceEvent::ClientConstructed {
                    conversation_id: conversation_id.to_owned(),
                    server: server.to_owned(),
                }
                .emit();
                Ok(client)
            }
        }
    }

    fn lookup(&self, conversation_id: &str, server: &str) -> Option<Arc<dyn McpClient>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(conversation_id)?.get_mut(server)?;
        entry.last_used = Instant::now();
        Some(entry.client.clone())
    }

    /// Mark `(conversation, server)` as recently used.
    pub fn touch(&self, conversation_id: &str, server: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .get_mut(conversation_id)
            .and_then(|servers| servers.get_mut(server))
        {
            entry.last_used = Instant::now();
        }
    }

    /// Force-evict the cached client and construct a fresh one.
    pub async fn reconnect(
        &self,
        ctx: &ExecContext,
        conversation_id: &str,
        server: &str,
    ) -> Result<Arc<dyn McpClient>> {
        let evicted = {
            let mut entries = self.entries.lock();
            entries
                .get_mut(conversation_id)
                .and_then(|servers| servers.remove(server))
        };
        if let Some(entry) = evicted {
            disconnect(ctx, entry.client, conversation_id, server, "reconnect").await;
        }
        self.get(ctx, conversation_id, server).await
    }

    /// Drop every client of a conversation, gracefully disconnecting each.
    pub async fn close_conversation(&self, conversation_id: &str) {
        let evicted = {
            let mut entries = self.entries.lock();
            entries.remove(conversation_id)
        };
        let Some(servers) = evicted else { return };
        let ctx = ExecContext::new();
        for (server, entry) in servers {
            disconnect(&ctx, entry.client, conversation_id, &server, "conversation closed").await;
        }
    }

    /// Evict entries idle longer than the TTL. Returns the eviction count.
    pub async fn reap(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, String, Arc<dyn McpClient>)> = {
            let mut entries = self.entries.lock();
            let mut expired = Vec::new();
            for (conversation_id, servers) in entries.iter_mut() {
                servers.retain(|server, entry| {
                    if now.duration_since(entry.last_used) > self.ttl {
                        expired.push((
                            conversation_id.clone(),
                            server.clone(),
                            entry.client.clone(),
                        ));
                        false
                    } else {
                        true
                    }
                });
            }
            entries.retain(|_, servers| !servers.is_empty());
            expired
        };

        let count = expired.len();
        let ctx = ExecContext::new();
        for (conversation_id, server, client) in expired {
            disconnect(&ctx, client, &conversation_id, &server, "idle ttl").await;
        }
        count
    }

    /// Run [`ClientPool::reap`] on a ticker until the context is canceled or
    /// the returned handle is stopped.
    pub fn start_reaper(self: &Arc<Self>, ctx: &ExecContext, interval: Duration) -> ReaperHandle {
        let interval = interval.max(Duration::from_millis(1));
        let pool = Arc::clone(self);
        let stop = ctx.child();
        let watch = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick carries no idle time
            loop {
                tokio::select! {
                    _ = watch.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = pool.reap().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "client pool reaped idle entries");
                        }
                    }
                }
            }
        });
        ReaperHandle { stop, task }
    }

    /// Number of live entries across all conversations.
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn disconnect(
    ctx: &ExecContext,
    client: Arc<dyn McpClient>,
    conversation_id: &str,
    server: &str,
    reason: &str,
) {
    if let Err(e) = client.close().await {
        tracing::warn!(server = %server, error = %e, "client close failed, forcing shutdown");
        client.shutdown(ctx).await;
    }
    TraceEvent::ClientEvicted {
        conversation_id: conversation_id.to_owned(),
        server: server.to_owned(),
        reason: reason.to_owned(),
    }
    .emit();
}

/// Stops the background reaper; dropping the handle leaves it running until
/// its context is canceled.
pub struct ReaperHandle {
    stop: ExecContext,
    task: tokio::task::JoinHandle<()>,
}

impl ReaperHandle {
    pub fn stop(self) {
        self.stop.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, Endpoint};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        server: String,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl McpClient for FakeClient {
        fn server(&self) -> &str {
            &self.server
        }
        async fn call_tool(&self, _: &ExecContext, _: &str, _: Value) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn list_resources(&self, _: &ExecContext, _: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn read_resource(&self, _: &ExecContext, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeProvider {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ClientOptionsProvider for FakeProvider {
        async fn options(&self, _: &ExecContext, server: &str) -> Result<Option<ClientOptions>> {
            if self.fail {
                return Err(Error::Fatal("provider misconfigured".into()));
            }
            Ok(Some(ClientOptions::new(
                server,
                Endpoint::Http {
                    url: format!("http://localhost:9000/{server}"),
                },
            )))
        }
    }

    struct FakeConnector {
        built: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ClientConnector for FakeConnector {
        async fn connect(
            &self,
            _: &ExecContext,
            options: ClientOptions,
        ) -> Result<Arc<dyn McpClient>> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeClient {
                server: options.server,
                closes: self.closes.clone(),
            }))
        }
    }

    fn pool(ttl: Duration) -> (Arc<ClientPool>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = ClientPool::with_ttl(
            Arc::new(FakeProvider { fail: false }),
            Arc::new(FakeConnector {
                built: AtomicUsize::new(0),
                closes: closes.clone(),
            }),
            ttl,
        );
        (Arc::new(pool), closes)
    }

    fn client_id(client: &Arc<dyn McpClient>) -> usize {
        // Downcast-free identity: fake clients encode their id in server
        // comparisons, so use pointer identity instead.
        Arc::as_ptr(client) as *const () as usize
    }

    #[tokio::test]
    async fn get_caches_per_conversation_and_server() {
        let (pool, _) = pool(Duration::from_secs(60));
        let ctx = ExecContext::new();

        let a = pool.get(&ctx, "c1", "gh").await.unwrap();
        let b = pool.get(&ctx, "c1", "gh").await.unwrap();
        assert_eq!(client_id(&a), client_id(&b));

        let other_conv = pool.get(&ctx, "c2", "gh").await.unwrap();
        let other_server = pool.get(&ctx, "c1", "fs").await.unwrap();
        assert_ne!(client_id(&a), client_id(&other_conv));
        assert_ne!(client_id(&a), client_id(&other_server));
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn idle_entries_are_reaped_with_one_disconnect() {
        let (pool, closes) = pool(Duration::from_millis(10));
        let ctx = ExecContext::new();
        pool.get(&ctx, "c1", "gh").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.reap().await, 1);
        assert!(pool.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Second reap finds nothing; no double disconnect.
        assert_eq!(pool.reap().await, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn touch_defers_reaping() {
        let (pool, _) = pool(Duration::from_millis(40));
        let ctx = ExecContext::new();
        pool.get(&ctx, "c1", "gh").await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        pool.touch("c1", "gh");
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(pool.reap().await, 0);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn reconnect_returns_distinct_client_and_disconnects_old() {
        let (pool, closes) = pool(Duration::from_secs(60));
        let ctx = ExecContext::new();
        let first = pool.get(&ctx, "c1", "gh").await.unwrap();
        let second = pool.reconnect(&ctx, "c1", "gh").await.unwrap();
        assert_ne!(client_id(&first), client_id(&second));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // The pool now serves the fresh client.
        let third = pool.get(&ctx, "c1", "gh").await.unwrap();
        assert_eq!(client_id(&second), client_id(&third));
    }

    #[tokio::test]
    async fn close_conversation_drops_all_servers() {
        let (pool, closes) = pool(Duration::from_secs(60));
        let ctx = ExecContext::new();
        pool.get(&ctx, "c1", "gh").await.unwrap();
        pool.get(&ctx, "c1", "fs").await.unwrap();
        pool.get(&ctx, "c2", "gh").await.unwrap();

        pool.close_conversation("c1").await;
        assert_eq!(pool.len(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_errors_are_not_cached() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = ClientPool::with_ttl(
            Arc::new(FakeProvider { fail: true }),
            Arc::new(FakeConnector {
                built: AtomicUsize::new(0),
                closes: closes.clone(),
            }),
            Duration::from_secs(60),
        );
        let ctx = ExecContext::new();
        assert!(pool.get(&ctx, "c1", "gh").await.is_err());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn reaper_task_evicts_and_stops() {
        let (pool, closes) = pool(Duration::from_millis(10));
        let ctx = ExecContext::new();
        pool.get(&ctx, "c1", "gh").await.unwrap();

        let handle = pool.start_reaper(&ctx, Duration::from_millis(15));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        handle.stop();
    }

    #[tokio::test]
    async fn fake_clients_have_distinct_ids() {
        // Guards the pointer-identity helper against Arc reuse surprises.
        let (pool, _) = pool(Duration::from_secs(60));
        let ctx = ExecContext::new();
        let a = pool.get(&ctx, "c1", "a").await.unwrap();
        let b = pool.get(&ctx, "c1", "b").await.unwrap();
        assert_ne!(client_id(&a), client_id(&b));
        let _ = (a.server(), b.server());
    }
}
