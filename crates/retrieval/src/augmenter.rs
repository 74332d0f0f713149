//! Documents, matchers, and the cached embedder+matcher pairing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ag_domain::config::MatchOptions;
use ag_domain::{Error, ExecContext, Result};

use crate::embedder::{Embedder, EmbedderFinder};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An opaque matched document: page content plus a metadata map carrying at
/// least `path` and a numeric `score`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, path: impl Into<String>, score: f64) -> Self {
        let mut metadata = Map::new();
        metadata.insert("path".into(), Value::String(path.into()));
        metadata.insert(
            "score".into(),
            serde_json::Number::from_f64(score)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }

    pub fn score(&self) -> f64 {
        self.metadata
            .get("score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn path(&self) -> &str {
        self.metadata
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.metadata.insert("path".into(), Value::String(path.into()));
    }

    pub fn set_score(&mut self, score: f64) {
        self.metadata.insert(
            "score".into(),
            serde_json::Number::from_f64(score)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matcher seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The vector index consumed by the engine; implementations own indexing
/// and similarity search.
#[async_trait::async_trait]
pub trait DocumentMatcher: Send + Sync {
    async fn match_documents(
        &self,
        ctx: &ExecContext,
        location: &str,
        query: &str,
        max_documents: usize,
    ) -> Result<Vec<Document>>;
}

/// Builds a matcher bound to an embedder and match options.
#[async_trait::async_trait]
pub trait MatcherFactory: Send + Sync {
    async fn create(
        &self,
        ctx: &ExecContext,
        embedder: Arc<dyn Embedder>,
        options: &MatchOptions,
    ) -> Result<Arc<dyn DocumentMatcher>>;
}

/// An embedder paired with its matcher.
pub struct Augmenter {
    pub embedder: Arc<dyn Embedder>,
    pub matcher: Arc<dyn DocumentMatcher>,
}

impl std::fmt::Debug for Augmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Augmenter").finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AugmenterCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide augmenter map keyed `embedder-id|options-digest`; first use
/// constructs, later uses share.
pub struct AugmenterCache {
    finder: Arc<dyn EmbedderFinder>,
    factory: Arc<dyn MatcherFactory>,
    cache: Mutex<HashMap<String, Arc<Augmenter>>>,
}

impl AugmenterCache {
    pub fn new(finder: Arc<dyn EmbedderFinder>, factory: Arc<dyn MatcherFactory>) -> Self {
        Self {
            finder,
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(
        &self,
        ctx: &ExecContext,
        embedder_id: &str,
        options: &MatchOptions,
    ) -> Result<Arc<Augmenter>> {
        if embedder_id.is_empty() {
            return Err(Error::validation("embedder id is required"));
        }
        let key = format!("{embedder_id}|{}", options.digest());
        if let Some(augmenter) = self.cache.lock().get(&key).cloned() {
            return Ok(augmenter);
        }

        let embedder = self.finder.find(ctx, embedder_id).await?;
        let matcher = self.factory.create(ctx, embedder.clone(), options).await?;
        let augmenter = Arc::new(Augmenter { embedder, matcher });

        let mut cache = self.cache.lock();
        Ok(cache.entry(key).or_insert(augmenter).clone())
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEmbedder(String);

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        fn id(&self) -> &str {
            &self.0
        }
        async fn embed(&self, _: &ExecContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    struct FakeFinder;

    #[async_trait::async_trait]
    impl EmbedderFinder for FakeFinder {
        async fn find(&self, _: &ExecContext, id: &str) -> Result<Arc<dyn Embedder>> {
            if id == "missing" {
                return Err(Error::not_found(format!("embedder {id}")));
            }
            Ok(Arc::new(FakeEmbedder(id.to_owned())))
        }
    }

    struct NullMatcher;

    #[async_trait::async_trait]
    impl DocumentMatcher for NullMatcher {
        async fn match_documents(
            &self,
            _: &ExecContext,
            _: &str,
            _: &str,
            _: usize,
        ) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
    }

    struct FakeFactory;

    #[async_trait::async_trait]
    impl MatcherFactory for FakeFactory {
        async fn create(
            &self,
            _: &ExecContext,
            _: Arc<dyn Embedder>,
            _: &MatchOptions,
        ) -> Result<Arc<dyn DocumentMatcher>> {
            Ok(Arc::new(NullMatcher))
        }
    }

    #[tokio::test]
    async fn augmenters_cached_by_id_and_digest() {
        let cache = AugmenterCache::new(Arc::new(FakeFinder), Arc::new(FakeFactory));
        let ctx = ExecContext::new();
        let options = MatchOptions::default();

        let a = cache.get(&ctx, "e1", &options).await.unwrap();
        let b = cache.get(&ctx, "e1", &options).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        let other_options = MatchOptions {
            max_file_size: Some(1),
            ..Default::default()
        };
        cache.get(&ctx, "e1", &other_options).await.unwrap();
        cache.get(&ctx, "e2", &options).await.unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn missing_embedder_propagates_not_found() {
        let cache = AugmenterCache::new(Arc::new(FakeFinder), Arc::new(FakeFactory));
        let err = cache
            .get(&ExecContext::new(), "missing", &MatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn empty_embedder_id_is_validation_error() {
        let cache = AugmenterCache::new(Arc::new(FakeFinder), Arc::new(FakeFactory));
        let err = cache
            .get(&ExecContext::new(), "", &MatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn document_accessors() {
        let mut doc = Document::new("content", "src/lib.rs", 0.75);
        assert_eq!(doc.path(), "src/lib.rs");
        assert!((doc.score() - 0.75).abs() < f64::EPSILON);
        doc.set_path("workspace://localhost/src/lib.rs");
        doc.set_score(0.5);
        assert_eq!(doc.path(), "workspace://localhost/src/lib.rs");
        assert!((doc.score() - 0.5).abs() < f64::EPSILON);
    }
}
