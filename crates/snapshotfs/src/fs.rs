//! The snapshot filesystem proper: resolver-driven dispatch, listing and
//! download over cached archives, and size-based freshness.

use std::sync::Arc;

use ag_domain::trace::TraceEvent;
use ag_domain::uri::{self, ResourceUri};
use ag_domain::ExecContext;

use crate::archive;
use crate::cache::{SnapshotCache, SnapshotEntry};
use crate::error::SnapshotError;
use crate::manifest;
use crate::remote::{RemoteFile, RemoteStore};
use crate::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolvers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The snapshot a location belongs to.
#[derive(Debug, Clone)]
pub struct SnapshotRef {
    pub snapshot_uri: String,
    pub root_uri: String,
}

/// Maps a location to its snapshot, when one is configured.
pub type SnapshotResolver = Arc<dyn Fn(&str) -> Option<SnapshotRef> + Send + Sync>;

/// Decides whether MD5 manifests are maintained for a snapshot.
pub type ManifestResolver = Arc<dyn Fn(&str) -> bool + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SnapshotFs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SnapshotFs {
    cache: Arc<SnapshotCache>,
    remote: Arc<dyn RemoteStore>,
    snapshot_resolver: SnapshotResolver,
    manifest_resolver: ManifestResolver,
}

impl SnapshotFs {
    pub fn new(
        cache: Arc<SnapshotCache>,
        remote: Arc<dyn RemoteStore>,
        snapshot_resolver: SnapshotResolver,
        manifest_resolver: ManifestResolver,
    ) -> Self {
        Self {
            cache,
            remote,
            snapshot_resolver,
            manifest_resolver,
        }
    }

    /// Whether any snapshot is configured for the location.
    pub fn resolves(&self, location: &str) -> bool {
        (self.snapshot_resolver)(location).is_some()
    }

    fn resolve(&self, location: &str) -> Result<SnapshotRef> {
        (self.snapshot_resolver)(location)
            .ok_or_else(|| SnapshotError::NoSnapshot(location.to_owned()))
    }

    /// Ensure the snapshot for `location` is cached, scheduling a
    /// background freshness check on a warm hit.
    pub async fn ensure_snapshot(
        &self,
        ctx: &ExecContext,
        location: &str,
    ) -> Result<Arc<SnapshotEntry>> {
        let snapshot_ref = self.resolve(location)?;
        let snapshot_uri = parse_uri(&snapshot_ref.snapshot_uri)?;
        let (entry, was_cached) = self.cache.ensure(ctx, &snapshot_uri).await?;
        if was_cached {
            self.spawn_freshness_check(ctx, snapshot_uri);
        }
        Ok(entry)
    }

    /// Compare the cached archive size against the size advertised by the
    /// remote (found by listing the snapshot's parent). Unknown or equal
    /// sizes count as fresh.
    pub async fn snapshot_up_to_date(&self, ctx: &ExecContext, location: &str) -> Result<bool> {
        let snapshot_ref = self.resolve(location)?;
        let snapshot_uri = parse_uri(&snapshot_ref.snapshot_uri)?;
        let key = snapshot_uri.canonical();
        let Some(cached) = self.cache.cached_size(&key) else {
            // Nothing cached yet; nothing to be stale.
            return Ok(true);
        };
        let Some(remote_size) = self.remote_size(ctx, &snapshot_uri).await? else {
            return Ok(true);
        };
        if remote_size == 0 || remote_size == cached {
            return Ok(true);
        }
        Ok(false)
    }

    async fn remote_size(
        &self,
        ctx: &ExecContext,
        snapshot_uri: &ResourceUri,
    ) -> Result<Option<u64>> {
        remote_size(self.remote.as_ref(), ctx, snapshot_uri).await
    }

    /// Kick one background refresh when the cached size no longer matches
    /// the remote. Readers keep the old archive until the atomic swap.
    fn spawn_freshness_check(&self, ctx: &ExecContext, snapshot_uri: ResourceUri) {
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let ctx = ctx.background();
        tokio::spawn(async move {
            let canonical = snapshot_uri.canonical();
            match remote_size(remote.as_ref(), &ctx, &snapshot_uri).await {
                Ok(Some(size)) => {
                    let cached = cache.cached_size(&canonical);
                    if size > 0 && cached.is_some_and(|c| c != size) {
                        if let Err(e) = cache.refresh(&ctx, &snapshot_uri).await {
                            tracing::warn!(uri = %canonical, error = %e, "snapshot refresh failed");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(uri = %canonical, error = %e, "snapshot freshness check failed");
                }
            }
        });
    }

    /// List the files under `location` out of its snapshot archive.
    pub async fn list(&self, ctx: &ExecContext, location: &str) -> Result<Vec<RemoteFile>> {
        let snapshot_ref = self.resolve(location)?;
        let entry = self.ensure_snapshot(ctx, location).await?;
        let root = parse_uri(&snapshot_ref.root_uri)?;
        let request = parse_uri(location)?;
        let rel_prefix = request.relative_to(&root).ok_or_else(|| {
            SnapshotError::Other(format!(
                "location {location} is outside snapshot root {}",
                snapshot_ref.root_uri
            ))
        })?;

        let manifests_enabled = (self.manifest_resolver)(location);
        let mut archive = archive::open_archive(&entry.path)?;
        let archive_entries = archive::entries(&mut archive)?;

        let mut out = Vec::new();
        for item in &archive_entries {
            if item.is_dir {
                continue;
            }
            let Some(rel) = entry.relative_path(&item.path) else {
                continue;
            };
            if !rel_prefix.is_empty()
                && rel != rel_prefix
                && !rel.starts_with(&format!("{rel_prefix}/"))
            {
                continue;
            }
            let url = root.join(&rel).canonical();
            let md5 = if manifests_enabled {
                entry.with_manifest(|manifest| {
                    manifest.and_then(|m| {
                        m.matching_md5(&item.path, item.size, item.mod_time)
                            .map(str::to_owned)
                    })
                })
            } else {
                None
            };
            out.push(RemoteFile {
                name: rel,
                url,
                size: item.size,
                mod_time: item.mod_time,
                is_dir: false,
                md5,
            });
        }
        Ok(out)
    }

    /// Build the full MD5 manifest for a location's snapshot by walking the
    /// whole archive. Returns the number of digested entries.
    pub async fn build_manifest(
        &self,
        ctx: &ExecContext,
        location: &str,
        progress_every: usize,
    ) -> Result<usize> {
        let entry = self.ensure_snapshot(ctx, location).await?;
        let mut archive = archive::open_archive(&entry.path)?;
        let manifest = manifest::Manifest::build(&mut archive, progress_every)?;
        let entries = manifest.entries.len();
        entry.update_manifest(|m| *m = manifest)?;
        TraceEvent::ManifestBuilt {
            uri: entry.uri.clone(),
            entries,
        }
        .emit();
        Ok(entries)
    }

    /// Read a single file out of its snapshot archive.
    pub async fn download(&self, ctx: &ExecContext, url: &str) -> Result<Vec<u8>> {
        let snapshot_ref = self.resolve(url)?;
        let entry = self.ensure_snapshot(ctx, url).await?;
        let root = parse_uri(&snapshot_ref.root_uri)?;
        let request = parse_uri(url)?;
        let rel = request.relative_to(&root).ok_or_else(|| {
            SnapshotError::Other(format!(
                "url {url} is outside snapshot root {}",
                snapshot_ref.root_uri
            ))
        })?;
        let archive_path = entry.archive_path(&rel);

        let mut archive = archive::open_archive(&entry.path)?;
        let bytes = archive::read_entry(&mut archive, &archive_path)?;

        if (self.manifest_resolver)(url) {
            let md5 = manifest::digest(&bytes);
            let size = bytes.len() as u64;
            let mod_time = {
                let mut archive = archive::open_archive(&entry.path)?;
                archive::entries(&mut archive)?
                    .into_iter()
                    .find(|e| e.path == archive_path)
                    .and_then(|e| e.mod_time)
            };
            entry.update_manifest(|m| m.record(archive_path.clone(), size, mod_time, md5))?;
        }
        Ok(bytes)
    }
}

fn parse_uri(input: &str) -> Result<ResourceUri> {
    uri::parse(input).map_err(|e| SnapshotError::Other(e.to_string()))
}

/// Advertised size of the snapshot object, found by listing its parent
/// directory until the entry shows up. `None` when the remote does not
/// surface it.
async fn remote_size(
    remote: &dyn RemoteStore,
    ctx: &ExecContext,
    snapshot_uri: &ResourceUri,
) -> Result<Option<u64>> {
    let name = match snapshot_uri.uri.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => return Ok(None),
    };
    let parent_path = match snapshot_uri.uri.rsplit_once('/') {
        Some((parent, _)) => parent.to_owned(),
        None => return Ok(None),
    };
    let parent = ResourceUri::new(snapshot_uri.server.clone(), parent_path);
    let listed = remote
        .list(ctx, &parent)
        .await
        .map_err(|e| SnapshotError::Fetch(e.to_string()))?;
    Ok(listed
        .into_iter()
        .find(|f| f.name == name || f.name.ends_with(&format!("/{name}")))
        .map(|f| f.size))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CompositeFs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatches between the snapshot FS and the raw remote by URI scheme and
/// resolver coverage.
pub struct CompositeFs {
    snapshot: Arc<SnapshotFs>,
    fallback: Arc<dyn RemoteStore>,
}

impl CompositeFs {
    pub fn new(snapshot: Arc<SnapshotFs>, fallback: Arc<dyn RemoteStore>) -> Self {
        Self { snapshot, fallback }
    }

    fn use_snapshot(&self, location: &str) -> bool {
        location.starts_with("mcp:") && self.snapshot.resolves(location)
    }

    pub async fn list(
        &self,
        ctx: &ExecContext,
        location: &str,
    ) -> ag_domain::Result<Vec<RemoteFile>> {
        if self.use_snapshot(location) {
            return self.snapshot.list(ctx, location).await.map_err(Into::into);
        }
        let parsed = uri::parse(location)?;
        self.fallback.list(ctx, &parsed).await
    }

    pub async fn download(&self, ctx: &ExecContext, url: &str) -> ag_domain::Result<Vec<u8>> {
        if self.use_snapshot(url) {
            return self.snapshot.download(ctx, url).await.map_err(Into::into);
        }
        let parsed = uri::parse(url)?;
        self.fallback.download(ctx, &parsed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_zip;

    struct ZipRemote {
        payload: Vec<u8>,
        listing: Vec<RemoteFile>,
    }

    #[async_trait::async_trait]
    impl RemoteStore for ZipRemote {
        async fn download(
            &self,
            _: &ExecContext,
            _: &ResourceUri,
        ) -> ag_domain::Result<Vec<u8>> {
            Ok(self.payload.clone())
        }
        async fn list(
            &self,
            _: &ExecContext,
            _: &ResourceUri,
        ) -> ag_domain::Result<Vec<RemoteFile>> {
            Ok(self.listing.clone())
        }
    }

    const ROOT: &str = "mcp:github://github.vianttech.com/adelphic/mediator";
    const SNAP: &str = "mcp:github://github.vianttech.com/adelphic/_snapshots/mediator.zip";

    fn build_fs(entries: &[(&str, &[u8])], manifests: bool) -> (SnapshotFs, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let zip_file = tmp.path().join("payload.zip");
        write_zip(&zip_file, entries);
        let payload = std::fs::read(&zip_file).unwrap();
        let remote: Arc<dyn RemoteStore> = Arc::new(ZipRemote {
            payload,
            listing: Vec::new(),
        });
        let cache = Arc::new(SnapshotCache::new(tmp.path().join("cache"), remote.clone()).unwrap());
        let snapshot_resolver: SnapshotResolver = Arc::new(|location: &str| {
            location.starts_with(ROOT).then(|| SnapshotRef {
                snapshot_uri: SNAP.into(),
                root_uri: ROOT.into(),
            })
        });
        let manifest_resolver: ManifestResolver = Arc::new(move |_| manifests);
        (
            SnapshotFs::new(cache, remote, snapshot_resolver, manifest_resolver),
            tmp,
        )
    }

    #[tokio::test]
    async fn listing_at_root_recomposes_canonical_urls() {
        let (fs, _tmp) = build_fs(&[("adelphic-mediator/file.txt", b"hello")], false);
        let listed = fs.list(&ExecContext::new(), ROOT).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].url,
            "mcp:github://github.vianttech.com/adelphic/mediator/file.txt"
        );
        assert_eq!(listed[0].size, 5);
        assert_eq!(listed[0].name, "file.txt");
    }

    #[tokio::test]
    async fn listing_filters_by_location_prefix() {
        let (fs, _tmp) = build_fs(
            &[
                ("mediator/src/lib.rs", b"lib"),
                ("mediator/src/util.rs", b"util"),
                ("mediator/docs/readme.md", b"docs"),
            ],
            false,
        );
        let listed = fs
            .list(&ExecContext::new(), &format!("{ROOT}/src"))
            .await
            .unwrap();
        let mut names: Vec<&str> = listed.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["src/lib.rs", "src/util.rs"]);
    }

    #[tokio::test]
    async fn download_maps_through_strip_prefix() {
        let (fs, _tmp) = build_fs(&[("wrapper/deep/file.bin", b"\x01\x02\x03")], false);
        let bytes = fs
            .download(&ExecContext::new(), &format!("{ROOT}/deep/file.bin"))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn download_missing_entry_is_distinguishable() {
        let (fs, _tmp) = build_fs(&[("mediator/present.txt", b"x")], false);
        let err = fs
            .download(&ExecContext::new(), &format!("{ROOT}/absent.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn build_manifest_attaches_md5_to_every_listed_file() {
        let (fs, _tmp) = build_fs(
            &[("mediator/a.txt", b"alpha"), ("mediator/b.txt", b"beta")],
            true,
        );
        let ctx = ExecContext::new();
        let digested = fs.build_manifest(&ctx, ROOT, 1).await.unwrap();
        assert_eq!(digested, 2);

        let listed = fs.list(&ctx, ROOT).await.unwrap();
        assert_eq!(listed.len(), 2);
        for file in &listed {
            assert!(file.md5.is_some(), "{} missing md5", file.name);
        }
    }

    #[tokio::test]
    async fn download_with_manifests_persists_md5_for_listing() {
        let (fs, _tmp) = build_fs(&[("mediator/file.txt", b"hello")], true);
        let ctx = ExecContext::new();
        fs.download(&ctx, &format!("{ROOT}/file.txt")).await.unwrap();

        let listed = fs.list(&ctx, ROOT).await.unwrap();
        assert_eq!(
            listed[0].md5.as_deref(),
            Some(manifest::digest(b"hello").as_str())
        );
    }

    #[tokio::test]
    async fn up_to_date_when_remote_size_unknown_or_equal() {
        let (fs, _tmp) = build_fs(&[("mediator/a.txt", b"1234")], false);
        let ctx = ExecContext::new();
        fs.ensure_snapshot(&ctx, ROOT).await.unwrap();
        // Empty parent listing → size unknown → fresh.
        assert!(fs.snapshot_up_to_date(&ctx, ROOT).await.unwrap());
    }

    #[tokio::test]
    async fn size_mismatch_reports_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_file = tmp.path().join("payload.zip");
        write_zip(&zip_file, &[("mediator/a.txt", b"1234")]);
        let payload = std::fs::read(&zip_file).unwrap();
        let remote: Arc<dyn RemoteStore> = Arc::new(ZipRemote {
            payload,
            listing: vec![RemoteFile {
                name: "mediator.zip".into(),
                url: SNAP.into(),
                size: 999_999,
                mod_time: None,
                is_dir: false,
                md5: None,
            }],
        });
        let cache =
            Arc::new(SnapshotCache::new(tmp.path().join("cache"), remote.clone()).unwrap());
        let snapshot_resolver: SnapshotResolver = Arc::new(|location: &str| {
            location.starts_with(ROOT).then(|| SnapshotRef {
                snapshot_uri: SNAP.into(),
                root_uri: ROOT.into(),
            })
        });
        let fs = SnapshotFs::new(cache, remote, snapshot_resolver, Arc::new(|_| false));

        let ctx = ExecContext::new();
        fs.ensure_snapshot(&ctx, ROOT).await.unwrap();
        assert!(!fs.snapshot_up_to_date(&ctx, ROOT).await.unwrap());
    }

    #[tokio::test]
    async fn unresolved_location_is_an_error() {
        let (fs, _tmp) = build_fs(&[("mediator/a", b"1")], false);
        let err = fs
            .list(&ExecContext::new(), "mcp:other://elsewhere/root")
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::NoSnapshot(_)));
    }
}
