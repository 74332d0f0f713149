//! The retrieval engine: `augment_docs` over one or more locations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use ag_domain::config::{MatchOptions, RetrievalConfig};
use ag_domain::trace::TraceEvent;
use ag_domain::workspace::{self, ENV_DEBUG_EMBEDIUS};
use ag_domain::{Error, ExecContext, Result};

use crate::augmenter::{AugmenterCache, Document};
use crate::page;
use crate::sync::{SyncResolver, UpstreamSyncConfig};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct AugmentRequest {
    pub query: String,
    pub locations: Vec<String>,
    pub embedder_id: String,
    pub options: MatchOptions,
    /// Cap on ranked documents; zero means unlimited.
    pub max_documents: usize,
    /// Replace matched chunks with whole-file content.
    pub include_file: bool,
    /// Trim the matched location prefix from document paths.
    pub trim_path: bool,
    /// Page byte budget; clamped to the default/ceiling.
    pub limit_bytes: Option<usize>,
    /// One-based page index.
    pub cursor: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AugmentResult {
    /// Documents of the requested page, ranked by descending score.
    pub documents: Vec<Document>,
    /// Rendered page content.
    pub content: String,
    /// Total formatted size across every ranked document.
    pub documents_size: usize,
    /// Next one-based cursor; zero when this page holds the last document.
    pub next_cursor: usize,
}

/// Whole-file reads for `include_file`, served through the composite FS.
#[async_trait::async_trait]
pub trait FileLoader: Send + Sync {
    async fn load(&self, ctx: &ExecContext, path: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Engine {
    augmenters: AugmenterCache,
    config: RetrievalConfig,
    sync: SyncResolver,
    workspace_root: PathBuf,
    file_loader: Option<Arc<dyn FileLoader>>,
}

impl Engine {
    pub fn new(
        augmenters: AugmenterCache,
        config: RetrievalConfig,
        sync: SyncResolver,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            augmenters,
            config,
            sync,
            workspace_root,
            file_loader: None,
        }
    }

    pub fn with_file_loader(mut self, loader: Arc<dyn FileLoader>) -> Self {
        self.file_loader = Some(loader);
        self
    }

    /// Index store location for a user: `${runtimeRoot}/index/<user>/
    /// embedius.sqlite`, or the `AGENTLY_INDEX_PATH` template. Matcher
    /// implementations open their vector store here.
    pub fn index_path(user: &str) -> Result<PathBuf> {
        workspace::index_path(user)
    }

    /// Sync descriptor for one location (consumed by the indexing layer).
    pub async fn sync_config_for(
        &self,
        ctx: &ExecContext,
        location: &str,
    ) -> Result<Option<UpstreamSyncConfig>> {
        self.sync.resolve(ctx, location).await
    }

    pub async fn augment_docs(
        &self,
        ctx: &ExecContext,
        req: AugmentRequest,
    ) -> Result<AugmentResult> {
        if req.query.trim().is_empty() {
            return Err(Error::validation("query is required"));
        }
        if req.locations.is_empty() {
            return Err(Error::validation("at least one location is required"));
        }

        let augmenter = self
            .augmenters
            .get(ctx, &req.embedder_id, &req.options)
            .await?;
        let max_documents = if req.max_documents == 0 {
            usize::MAX
        } else {
            req.max_documents
        };

        // ── Per-location matching, bounded by the concurrency limit ──
        let results = {
            let matcher = augmenter.matcher.clone();
            let concurrency = self.config.match_concurrency;
            if concurrency == 0 {
                let mut out = Vec::with_capacity(req.locations.len());
                for location in &req.locations {
                    let started = Instant::now();
                    let result = matcher
                        .match_documents(ctx, location, &req.query, max_documents)
                        .await;
                    emit_match_trace(location, &result, started);
                    out.push((location.clone(), result));
                }
                out
            } else {
                let semaphore = Arc::new(Semaphore::new(concurrency));
                let futures = req.locations.iter().map(|location| {
                    let semaphore = semaphore.clone();
                    let matcher = matcher.clone();
                    let query = req.query.clone();
                    let location = location.clone();
                    async move {
                        let _permit = semaphore.acquire().await;
                        let started = Instant::now();
                        let result = matcher
                            .match_documents(ctx, &location, &query, max_documents)
                            .await;
                        emit_match_trace(&location, &result, started);
                        (location, result)
                    }
                });
                futures_util::future::join_all(futures).await
            }
        };

        // ── Partial-failure policy ──
        let mut documents = Vec::new();
        let mut first_error: Option<Error> = None;
        let mut successes = 0usize;
        for (location, result) in results {
            match result {
                Ok(mut matched) => {
                    successes += 1;
                    if req.trim_path {
                        for doc in &mut matched {
                            let trimmed = doc
                                .path()
                                .strip_prefix(location.trim_end_matches('/'))
                                .map(|rest| rest.trim_start_matches('/').to_owned());
                            if let Some(trimmed) = trimmed {
                                doc.set_path(trimmed);
                            }
                        }
                    }
                    documents.extend(matched);
                }
                Err(e) => {
                    tracing::warn!(location = %location, error = %e, "location match failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(error) = first_error {
            if !(self.config.allow_partial && successes > 0) {
                return Err(error);
            }
        }

        // ── Rank, cap, rewrite paths ──
        let mut ranked = page::rank(documents);
        ranked.truncate(max_documents);
        for doc in &mut ranked {
            let rewritten = self.workspace_uri(doc.path());
            doc.set_path(rewritten);
        }

        if req.include_file {
            if let Some(loader) = &self.file_loader {
                for doc in &mut ranked {
                    let loaded = loader.load(ctx, doc.path()).await;
                    match loaded {
                        Ok(full) => doc.page_content = full,
                        Err(e) => {
                            tracing::debug!(path = %doc.path(), error = %e, "include-file read failed")
                        }
                    }
                }
            }
        }

        // ── Byte-budgeted pagination ──
        let limit = page::effective_limit(req.limit_bytes);
        let cursor = req.cursor.unwrap_or(1);
        let (current, next_cursor, documents_size) = page::paginate(&ranked, limit, cursor);

        if std::env::var(ENV_DEBUG_EMBEDIUS).is_ok() {
            tracing::debug!(
                ranked = ranked.len(),
                page_documents = current.documents.len(),
                documents_size,
                next_cursor,
                "augment_docs page assembled"
            );
        }

        Ok(AugmentResult {
            documents: current.documents,
            content: current.content,
            documents_size,
            next_cursor,
        })
    }

    /// Rewrite a filesystem path under the workspace root to the abstract
    /// workspace URI; other paths pass through.
    fn workspace_uri(&self, path: &str) -> String {
        if path.starts_with("workspace://") || path.starts_with("mcp:") {
            return path.to_owned();
        }
        match std::path::Path::new(path).strip_prefix(&self.workspace_root) {
            Ok(rel) => format!(
                "workspace://localhost/{}",
                rel.to_string_lossy().replace('\\', "/")
            ),
            Err(_) => path.to_owned(),
        }
    }
}

fn emit_match_trace(location: &str, result: &Result<Vec<Document>>, started: Instant) {
    if let Ok(documents) = result {
        TraceEvent::RetrievalMatched {
            location: location.to_owned(),
            documents: documents.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augmenter::{DocumentMatcher, MatcherFactory};
    use crate::embedder::{Embedder, EmbedderFinder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        fn id(&self) -> &str {
            "fake"
        }
        async fn embed(&self, _: &ExecContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    struct FakeFinder;

    #[async_trait::async_trait]
    impl EmbedderFinder for FakeFinder {
        async fn find(&self, _: &ExecContext, id: &str) -> Result<Arc<dyn Embedder>> {
            if id == "fake" {
                Ok(Arc::new(FakeEmbedder))
            } else {
                Err(Error::not_found(format!("embedder {id}")))
            }
        }
    }

    /// Matcher returning canned documents per location; `fail:` locations
    /// error, and the peak concurrency is tracked.
    struct ScriptedMatcher {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DocumentMatcher for ScriptedMatcher {
        async fn match_documents(
            &self,
            _: &ExecContext,
            location: &str,
            _query: &str,
            _max: usize,
        ) -> Result<Vec<Document>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(rest) = location.strip_prefix("fail:") {
                return Err(Error::Other(format!("match failed for {rest}")));
            }
            Ok(vec![
                Document::new("alpha", format!("{location}/a.txt"), 0.9),
                Document::new("bravo", format!("{location}/b.txt"), 0.3),
                Document::new("charlie", format!("{location}/c.txt"), 0.4),
            ])
        }
    }

    struct ScriptedFactory(Arc<ScriptedMatcher>);

    #[async_trait::async_trait]
    impl MatcherFactory for ScriptedFactory {
        async fn create(
            &self,
            _: &ExecContext,
            _: Arc<dyn Embedder>,
            _: &MatchOptions,
        ) -> Result<Arc<dyn DocumentMatcher>> {
            Ok(self.0.clone())
        }
    }

    fn engine(allow_partial: bool, concurrency: usize) -> (Engine, Arc<ScriptedMatcher>) {
        let matcher = Arc::new(ScriptedMatcher {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let cache = AugmenterCache::new(
            Arc::new(FakeFinder),
            Arc::new(ScriptedFactory(matcher.clone())),
        );
        let config = RetrievalConfig {
            match_concurrency: concurrency,
            allow_partial,
            local_roots: Vec::new(),
        };
        let sync = SyncResolver::new(Vec::new(), None);
        (
            Engine::new(cache, config, sync, PathBuf::from("/ws")),
            matcher,
        )
    }

    fn request(locations: &[&str]) -> AugmentRequest {
        AugmentRequest {
            query: "find things".into(),
            locations: locations.iter().map(|s| s.to_string()).collect(),
            embedder_id: "fake".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn content_lists_documents_in_score_order() {
        let (engine, _) = engine(false, 1);
        let result = engine
            .augment_docs(&ExecContext::new(), request(&["/ws/proj"]))
            .await
            .unwrap();
        let a = result.content.find("a.txt").unwrap();
        let c = result.content.find("c.txt").unwrap();
        let b = result.content.find("b.txt").unwrap();
        assert!(a < c && c < b);
        assert_eq!(result.next_cursor, 0);
        assert_eq!(result.documents.len(), 3);
    }

    #[tokio::test]
    async fn paths_under_workspace_root_rewrite_to_workspace_uris() {
        let (engine, _) = engine(false, 1);
        let result = engine
            .augment_docs(&ExecContext::new(), request(&["/ws/proj"]))
            .await
            .unwrap();
        assert_eq!(
            result.documents[0].path(),
            "workspace://localhost/proj/a.txt"
        );
    }

    #[tokio::test]
    async fn empty_query_and_locations_are_validation_errors() {
        let (engine, _) = engine(false, 1);
        let mut no_query = request(&["/ws"]);
        no_query.query = "  ".into();
        assert!(matches!(
            engine.augment_docs(&ExecContext::new(), no_query).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.augment_docs(&ExecContext::new(), request(&[])).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn partial_mode_returns_successes() {
        let (engine, _) = engine(true, 1);
        let result = engine
            .augment_docs(&ExecContext::new(), request(&["/ws/ok", "fail:bad"]))
            .await
            .unwrap();
        assert_eq!(result.documents.len(), 3);
    }

    #[tokio::test]
    async fn strict_mode_surfaces_first_error() {
        let (engine, _) = engine(false, 1);
        let err = engine
            .augment_docs(&ExecContext::new(), request(&["/ws/ok", "fail:bad"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("match failed for bad"));
    }

    #[tokio::test]
    async fn all_failures_error_even_in_partial_mode() {
        let (engine, _) = engine(true, 1);
        assert!(engine
            .augment_docs(&ExecContext::new(), request(&["fail:a", "fail:b"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn concurrency_limit_bounds_parallel_matches() {
        let (engine, matcher) = engine(false, 2);
        engine
            .augment_docs(
                &ExecContext::new(),
                request(&["/ws/a", "/ws/b", "/ws/c", "/ws/d", "/ws/e"]),
            )
            .await
            .unwrap();
        assert!(matcher.peak.load(Ordering::SeqCst) <= 2);
        assert!(matcher.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn max_documents_caps_ranked_set() {
        let (engine, _) = engine(false, 1);
        let mut req = request(&["/ws/proj"]);
        req.max_documents = 2;
        let result = engine.augment_docs(&ExecContext::new(), req).await.unwrap();
        assert_eq!(result.documents.len(), 2);
        // The lowest-scored document fell off.
        assert!(!result.content.contains("b.txt"));
    }

    #[tokio::test]
    async fn unknown_embedder_is_not_found() {
        let (engine, _) = engine(false, 1);
        let mut req = request(&["/ws"]);
        req.embedder_id = "nope".into();
        assert!(matches!(
            engine.augment_docs(&ExecContext::new(), req).await,
            Err(Error::NotFound(_))
        ));
    }
}
