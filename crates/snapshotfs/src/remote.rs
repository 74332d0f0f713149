//! The underlying remote the snapshot layer caches over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ag_domain::uri::ResourceUri;
use ag_domain::ExecContext;

/// One remote object as surfaced by listing (or synthesized from a snapshot
/// archive entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path relative to the listed location.
    pub name: String,
    /// Canonical remote URL of the object.
    pub url: String,
    /// Size in bytes; zero when the remote does not advertise one.
    pub size: u64,
    #[serde(default)]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub md5: Option<String>,
}

/// Raw remote access: the snapshot layer uses it to fetch archives and to
/// list parents for freshness checks; the composite FS falls back to it for
/// non-snapshot schemes.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn download(&self, ctx: &ExecContext, uri: &ResourceUri) -> ag_domain::Result<Vec<u8>>;

    async fn list(&self, ctx: &ExecContext, uri: &ResourceUri)
        -> ag_domain::Result<Vec<RemoteFile>>;
}
