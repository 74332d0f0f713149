use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotConfig {
    /// Cache root override; when unset the runtime root's `snapshots/`
    /// directory (or the `AGENTLY_SNAPSHOT_PATH` template) is used.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    /// Manifest build progress is logged every this many entries.
    #[serde(default = "d_manifest_progress_every")]
    pub manifest_progress_every: usize,
}

fn d_manifest_progress_every() -> usize {
    256
}
