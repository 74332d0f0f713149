//! Process-wide snapshot cache: one archive download per URI, atomic cache
//! writes, and size bookkeeping for staleness checks.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use tokio::sync::watch;

use ag_domain::trace::TraceEvent;
use ag_domain::uri::ResourceUri;
use ag_domain::ExecContext;

use crate::archive;
use crate::error::SnapshotError;
use crate::manifest::Manifest;
use crate::remote::RemoteStore;
use crate::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SnapshotEntry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ManifestSlot {
    Unloaded,
    Missing,
    Loaded(Manifest),
}

/// A registered snapshot: the on-disk archive plus the metadata needed to
/// map archive paths back to remote paths.
pub struct SnapshotEntry {
    pub uri: String,
    pub path: PathBuf,
    /// Common top-level directory stripped when mapping paths.
    pub strip_prefix: Option<String>,
    pub size: u64,
    manifest: Mutex<ManifestSlot>,
}

impl SnapshotEntry {
    fn new(uri: String, path: PathBuf, strip_prefix: Option<String>, size: u64) -> Self {
        Self {
            uri,
            path,
            strip_prefix,
            size,
            manifest: Mutex::new(ManifestSlot::Unloaded),
        }
    }

    /// Archive path for a path relative to the snapshot root.
    pub fn archive_path(&self, rel: &str) -> String {
        match &self.strip_prefix {
            Some(prefix) => format!("{prefix}/{rel}"),
            None => rel.to_owned(),
        }
    }

    /// Relative path for an archive path, when it belongs under the root.
    pub fn relative_path(&self, archive_path: &str) -> Option<String> {
        match &self.strip_prefix {
            Some(prefix) => archive_path
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(str::to_owned),
            None => Some(archive_path.to_owned()),
        }
    }

    /// Run `f` against the lazily-loaded manifest, if one exists on disk.
    pub fn with_manifest<R>(&self, f: impl FnOnce(Option<&Manifest>) -> R) -> R {
        let mut slot = self.manifest.lock();
        if matches!(*slot, ManifestSlot::Unloaded) {
            *slot = match Manifest::load(&Manifest::path_for(&self.path)) {
                Some(manifest) => ManifestSlot::Loaded(manifest),
                None => ManifestSlot::Missing,
            };
        }
        match &*slot {
            ManifestSlot::Loaded(manifest) => f(Some(manifest)),
            _ => f(None),
        }
    }

    /// Mutate the manifest (creating an empty one when absent) and persist
    /// it atomically.
    pub fn update_manifest(&self, f: impl FnOnce(&mut Manifest)) -> Result<()> {
        let mut slot = self.manifest.lock();
        let mut manifest = match std::mem::replace(&mut *slot, ManifestSlot::Missing) {
            ManifestSlot::Loaded(manifest) => manifest,
            _ => Manifest::load(&Manifest::path_for(&self.path)).unwrap_or_default(),
        };
        f(&mut manifest);
        manifest.save(&Manifest::path_for(&self.path))?;
        *slot = ManifestSlot::Loaded(manifest);
        Ok(())
    }

    fn invalidate_manifest(&self) {
        let mut slot = self.manifest.lock();
        *slot = ManifestSlot::Unloaded;
        let _ = std::fs::remove_file(Manifest::path_for(&self.path));
    }
}

type FlightResult = std::result::Result<Arc<SnapshotEntry>, String>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SnapshotCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One mutex guards the registered-entry map; a per-URI completion channel
/// serializes downloads; a separate set serializes refreshes.
pub struct SnapshotCache {
    root: PathBuf,
    remote: Arc<dyn RemoteStore>,
    entries: Mutex<HashMap<String, Arc<SnapshotEntry>>>,
    inflight: Mutex<HashMap<String, watch::Receiver<Option<FlightResult>>>>,
    sizes: RwLock<HashMap<String, u64>>,
    refreshing: Mutex<HashSet<String>>,
}

impl SnapshotCache {
    pub fn new(root: impl Into<PathBuf>, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            SnapshotError::CacheRoot(format!("{}: {e}", root.display()))
        })?;
        Ok(Self {
            root,
            remote,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            sizes: RwLock::new(HashMap::new()),
            refreshing: Mutex::new(HashSet::new()),
        })
    }

    /// Cache rooted at the user's default snapshot directory
    /// (`${runtimeRoot}/snapshots`, or the `AGENTLY_SNAPSHOT_PATH`
    /// template).
    pub fn for_user(user: &str, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let root = ag_domain::workspace::snapshot_cache_root(user)
            .map_err(|e| SnapshotError::CacheRoot(e.to_string()))?;
        Self::new(root, remote)
    }

    /// On-disk archive path: `<root>/<sha1(normalized uri)>.zip`.
    pub fn cache_path(&self, normalized_uri: &str) -> PathBuf {
        let mut hasher = Sha1::new();
        hasher.update(normalized_uri.as_bytes());
        self.root.join(format!("{}.zip", hex::encode(hasher.finalize())))
    }

    pub fn cached_size(&self, normalized_uri: &str) -> Option<u64> {
        self.sizes.read().get(normalized_uri).copied()
    }

    pub fn lookup(&self, normalized_uri: &str) -> Option<Arc<SnapshotEntry>> {
        self.entries.lock().get(normalized_uri).cloned()
    }

    /// Ensure the snapshot archive for `uri` is cached and registered.
    /// Returns the entry and whether it was already in memory.
    pub async fn ensure(
        &self,
        ctx: &ExecContext,
        uri: &ResourceUri,
    ) -> Result<(Arc<SnapshotEntry>, bool)> {
        let key = uri.canonical();
        if let Some(entry) = self.lookup(&key) {
            return Ok((entry, true));
        }

        enum Role {
            Wait(watch::Receiver<Option<FlightResult>>),
            Download(watch::Sender<Option<FlightResult>>),
        }

        let role = {
            let mut inflight = self.inflight.lock();
            if let Some(rx) = inflight.get(&key).cloned() {
                Role::Wait(rx)
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(key.clone(), rx);
                Role::Download(tx)
            }
        };

        match role {
            Role::Wait(mut rx) => loop {
                let done = rx.borrow_and_update().clone();
                if let Some(result) = done {
                    return result
                        .map(|entry| (entry, false))
                        .map_err(SnapshotError::Fetch);
                }
                if rx.changed().await.is_err() {
                    return Err(SnapshotError::Fetch("snapshot download aborted".into()));
                }
            },
            Role::Download(tx) => {
                let result = self.materialize(ctx, uri, &key).await;
                let flight: Option<FlightResult> = Some(
                    result
                        .as_ref()
                        .map(Arc::clone)
                        .map_err(|e| e.to_string()),
                );
                self.inflight.lock().remove(&key);
                let _ = tx.send(flight);
                result.map(|entry| (entry, false))
            }
        }
    }

    async fn materialize(
        &self,
        ctx: &ExecContext,
        uri: &ResourceUri,
        key: &str,
    ) -> Result<Arc<SnapshotEntry>> {
        let path = self.cache_path(key);

        let on_disk = std::fs::metadata(&path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !on_disk {
            let bytes = self
                .remote
                .download(ctx, uri)
                .await
                .map_err(|e| SnapshotError::Fetch(e.to_string()))?;
            write_atomic(&path, &bytes)?;
            TraceEvent::SnapshotFetched {
                uri: key.to_owned(),
                bytes: bytes.len() as u64,
                cache_path: path.display().to_string(),
            }
            .emit();
        }

        let entry = Arc::new(register_from_file(key, &path)?);
        self.sizes.write().insert(key.to_owned(), entry.size);
        self.entries.lock().insert(key.to_owned(), entry.clone());
        Ok(entry)
    }

    /// Atomically re-download a stale snapshot. At most one refresh per URI
    /// is in flight; a second caller returns false immediately. Readers keep
    /// the previously-registered entry until the swap.
    pub async fn refresh(&self, ctx: &ExecContext, uri: &ResourceUri) -> Result<bool> {
        let key = uri.canonical();
        if !self.refreshing.lock().insert(key.clone()) {
            return Ok(false);
        }

        let result = self.refresh_inner(ctx, uri, &key).await;
        self.refreshing.lock().remove(&key);
        result.map(|_| true)
    }

    async fn refresh_inner(
        &self,
        ctx: &ExecContext,
        uri: &ResourceUri,
        key: &str,
    ) -> Result<()> {
        let old_size = self.cached_size(key).unwrap_or(0);
        let bytes = self
            .remote
            .download(ctx, uri)
            .await
            .map_err(|e| SnapshotError::Fetch(e.to_string()))?;
        let path = self.cache_path(key);
        write_atomic(&path, &bytes)?;

        if let Some(previous) = self.lookup(key) {
            previous.invalidate_manifest();
        }
        let entry = Arc::new(register_from_file(key, &path)?);
        let new_size = entry.size;
        self.sizes.write().insert(key.to_owned(), new_size);
        self.entries.lock().insert(key.to_owned(), entry);

        TraceEvent::SnapshotRefreshed {
            uri: key.to_owned(),
            old_size,
            new_size,
        }
        .emit();
        Ok(())
    }
}

fn register_from_file(key: &str, path: &Path) -> Result<SnapshotEntry> {
    let size = std::fs::metadata(path)?.len();
    let mut archive = archive::open_archive(path)?;
    let entries = archive::entries(&mut archive)?;
    let strip_prefix = archive::detect_strip_prefix(&entries);
    Ok(SnapshotEntry::new(
        key.to_owned(),
        path.to_path_buf(),
        strip_prefix,
        size,
    ))
}

/// Write via a sibling `.part` file and atomic rename so readers never see
/// a torn archive.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = path.with_extension("zip.part");
    std::fs::write(&part, bytes)?;
    std::fs::rename(&part, path)?;
    Ok(())
}
