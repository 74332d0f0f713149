//! On-disk MD5 manifest sibling to each cached archive.
//!
//! `<sha1>.json` maps archive path → `{ size, mod_time, md5 }` so repeated
//! listings can attach digests without re-reading file contents. Loaded
//! lazily; written atomically via `.part` + rename.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::archive;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub size: u64,
    #[serde(default)]
    pub mod_time: Option<DateTime<Utc>>,
    pub md5: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    /// Manifest path sibling to the archive: `<stem>.json`.
    pub fn path_for(archive_path: &Path) -> PathBuf {
        archive_path.with_extension("json")
    }

    pub fn load(path: &Path) -> Option<Manifest> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| crate::SnapshotError::Other(format!("serializing manifest: {e}")))?;
        let part = path.with_extension("json.part");
        std::fs::write(&part, json)?;
        std::fs::rename(&part, path)?;
        Ok(())
    }

    /// Digest for an archive path when the cached entry still matches on
    /// size and mod-time.
    pub fn matching_md5(
        &self,
        path: &str,
        size: u64,
        mod_time: Option<DateTime<Utc>>,
    ) -> Option<&str> {
        let entry = self.entries.get(path)?;
        if entry.size == size && entry.mod_time == mod_time {
            Some(&entry.md5)
        } else {
            None
        }
    }

    pub fn record(
        &mut self,
        path: impl Into<String>,
        size: u64,
        mod_time: Option<DateTime<Utc>>,
        md5: String,
    ) {
        self.entries.insert(
            path.into(),
            ManifestEntry {
                size,
                mod_time,
                md5,
            },
        );
    }

    /// Build a full manifest by walking the archive and digesting every
    /// file entry. Progress is logged every `progress_every` entries.
    pub fn build(archive: &mut ZipArchive<File>, progress_every: usize) -> Result<Manifest> {
        let mut manifest = Manifest::default();
        let total = archive.len();
        for index in 0..total {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let Some(path) = archive::normalize_entry_path(file.name()) else {
                continue;
            };
            let size = file.size();
            let mod_time = archive::zip_mod_time(file.last_modified());
            let mut hasher = Md5::new();
            std::io::copy(&mut file, &mut hasher)?;
            let md5 = hex::encode(hasher.finalize());
            manifest.record(path, size, mod_time, md5);
            if progress_every > 0 && (index + 1) % progress_every == 0 {
                tracing::info!(done = index + 1, total, "manifest build progress");
            }
        }
        Ok(manifest)
    }
}

pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_zip;
    use crate::archive::{entries, open_archive};

    #[test]
    fn build_digests_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        write_zip(&zip_path, &[("root/a.txt", b"alpha"), ("root/b.txt", b"beta")]);

        let mut archive = open_archive(&zip_path).unwrap();
        let manifest = Manifest::build(&mut archive, 0).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(
            manifest.entries["root/a.txt"].md5,
            digest(b"alpha"),
        );
    }

    #[test]
    fn save_and_reload_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        write_zip(&zip_path, &[("root/a.txt", b"alpha")]);

        let mut archive = open_archive(&zip_path).unwrap();
        let manifest = Manifest::build(&mut archive, 0).unwrap();
        let manifest_path = Manifest::path_for(&zip_path);
        manifest.save(&manifest_path).unwrap();

        let loaded = Manifest::load(&manifest_path).unwrap();
        assert_eq!(
            loaded.entries["root/a.txt"],
            manifest.entries["root/a.txt"]
        );
        // No stray .part file left behind.
        assert!(!manifest_path.with_extension("json.part").exists());
    }

    #[test]
    fn matching_md5_requires_size_and_mod_time() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        write_zip(&zip_path, &[("root/a.txt", b"alpha")]);

        let mut archive = open_archive(&zip_path).unwrap();
        let manifest = Manifest::build(&mut archive, 0).unwrap();

        let mut archive = open_archive(&zip_path).unwrap();
        let listed = entries(&mut archive).unwrap();
        let entry = listed.iter().find(|e| e.path == "root/a.txt").unwrap();

        assert!(manifest
            .matching_md5("root/a.txt", entry.size, entry.mod_time)
            .is_some());
        assert!(manifest
            .matching_md5("root/a.txt", entry.size + 1, entry.mod_time)
            .is_none());
    }
}
