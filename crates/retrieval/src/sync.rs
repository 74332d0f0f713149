//! Upstream-sync configuration: tells the indexing layer how to mirror its
//! local vector store against a canonical upstream database.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ag_domain::config::retrieval::{LocalRoot, UpstreamDb};
use ag_domain::uri::{self, ResourceUri};
use ag_domain::{ExecContext, Result};

/// Hook the indexing layer logs sync progress through.
pub type SyncLogHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Descriptor consumed by the indexing layer.
#[derive(Clone)]
pub struct UpstreamSyncConfig {
    pub enabled: bool,
    pub dataset: String,
    pub upstream: Option<UpstreamDb>,
    /// Local shadow table mirroring upstream rows.
    pub shadow_table: String,
    /// Local asset table for fetched blobs.
    pub asset_table: String,
    pub batch_size: usize,
    pub force: bool,
    pub background: bool,
    /// Minimum interval between sync passes.
    pub min_interval: Duration,
    pub log: Option<SyncLogHook>,
}

impl UpstreamSyncConfig {
    fn for_dataset(dataset: impl Into<String>, upstream: Option<UpstreamDb>) -> Self {
        let dataset = dataset.into();
        Self {
            enabled: upstream.is_some(),
            shadow_table: format!("{dataset}_shadow"),
            asset_table: format!("{dataset}_assets"),
            dataset,
            upstream,
            batch_size: 500,
            force: false,
            background: true,
            min_interval: Duration::from_secs(300),
            log: None,
        }
    }
}

impl std::fmt::Debug for UpstreamSyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSyncConfig")
            .field("enabled", &self.enabled)
            .field("dataset", &self.dataset)
            .field("upstream", &self.upstream)
            .field("shadow_table", &self.shadow_table)
            .field("asset_table", &self.asset_table)
            .field("batch_size", &self.batch_size)
            .field("force", &self.force)
            .field("background", &self.background)
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream reference advertised by a remote server's metadata.
#[derive(Debug, Clone)]
pub struct RemoteUpstream {
    pub dataset: String,
    pub upstream: UpstreamDb,
}

/// Reads server roots / upstream refs / secret resources from the remote.
#[async_trait::async_trait]
pub trait RemoteMetadata: Send + Sync {
    async fn upstream_for(
        &self,
        ctx: &ExecContext,
        location: &ResourceUri,
    ) -> Result<Option<RemoteUpstream>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SyncResolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves the sync config for a location: remote URIs consult the
/// remote's metadata; local paths match registered roots by longest common
/// prefix, with context-carried overrides appended to the static list.
pub struct SyncResolver {
    local_roots: Vec<LocalRoot>,
    remote_metadata: Option<Arc<dyn RemoteMetadata>>,
}

impl SyncResolver {
    pub fn new(local_roots: Vec<LocalRoot>, remote_metadata: Option<Arc<dyn RemoteMetadata>>) -> Self {
        Self {
            local_roots,
            remote_metadata,
        }
    }

    pub async fn resolve(
        &self,
        ctx: &ExecContext,
        location: &str,
    ) -> Result<Option<UpstreamSyncConfig>> {
        if location.starts_with("mcp:") {
            return self.resolve_remote(ctx, location).await;
        }
        Ok(self.resolve_local(ctx, location))
    }

    async fn resolve_remote(
        &self,
        ctx: &ExecContext,
        location: &str,
    ) -> Result<Option<UpstreamSyncConfig>> {
        let Some(metadata) = &self.remote_metadata else {
            return Ok(None);
        };
        let parsed = uri::parse(location)?;
        let Some(remote) = metadata.upstream_for(ctx, &parsed).await? else {
            return Ok(None);
        };
        Ok(Some(UpstreamSyncConfig::for_dataset(
            remote.dataset,
            Some(remote.upstream),
        )))
    }

    fn resolve_local(&self, ctx: &ExecContext, location: &str) -> Option<UpstreamSyncConfig> {
        let location_path = Path::new(location);
        let mut best: Option<(&LocalRoot, usize)> = None;
        for root in self.local_roots.iter().chain(ctx.sync_roots()) {
            if let Ok(rest) = location_path.strip_prefix(&root.path) {
                let matched = location.len() - rest.as_os_str().len();
                if best.map_or(true, |(_, depth)| matched > depth) {
                    best = Some((root, matched));
                }
            }
        }
        let (root, _) = best?;
        let mut config = UpstreamSyncConfig::for_dataset(root.dataset.clone(), root.upstream.clone());
        if let Some(shadow) = &root.shadow_table {
            config.shadow_table = shadow.clone();
        }
        if let Some(asset) = &root.asset_table {
            config.asset_table = asset.clone();
        }
        Some(config)
    }
}
