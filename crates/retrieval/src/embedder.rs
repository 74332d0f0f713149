use std::sync::Arc;

use ag_domain::{ExecContext, Result};

/// Text embedding model consumed by the augmenter.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn id(&self) -> &str;

    /// One vector per input text.
    async fn embed(&self, ctx: &ExecContext, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Resolves embedders by id. Unknown ids are `Error::NotFound`.
#[async_trait::async_trait]
pub trait EmbedderFinder: Send + Sync {
    async fn find(&self, ctx: &ExecContext, id: &str) -> Result<Arc<dyn Embedder>>;
}
