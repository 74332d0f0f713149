//! ZIP archive access: entry walking, strip-prefix detection, and hygiene
//! for archive paths before they map to remote resource paths.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use zip::ZipArchive;

use crate::error::SnapshotError;
use crate::Result;

/// Metadata of one archive entry, with the path normalized to `/`
/// separators and no leading `./`.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// Walk every entry collecting normalized metadata.
pub fn entries(archive: &mut ZipArchive<File>) -> Result<Vec<ArchiveEntry>> {
    let mut out = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let Some(path) = normalize_entry_path(file.name()) else {
            continue;
        };
        out.push(ArchiveEntry {
            path,
            size: file.size(),
            mod_time: zip_mod_time(file.last_modified()),
            is_dir: file.is_dir(),
        });
    }
    Ok(out)
}

/// The single common top-level directory of the archive, when one exists.
/// Archives produced from `git archive`-style exports wrap everything in
/// `<project>/`; mapping archive paths to remote paths strips it.
pub fn detect_strip_prefix(entries: &[ArchiveEntry]) -> Option<String> {
    let mut prefix: Option<&str> = None;
    for entry in entries {
        if entry.is_dir && !entry.path.contains('/') {
            // A bare top-level directory entry; candidate on its own.
            continue;
        }
        let head = entry.path.split('/').next()?;
        // A top-level file rules out any strip prefix.
        if !entry.is_dir && !entry.path.contains('/') {
            return None;
        }
        match prefix {
            None => prefix = Some(head),
            Some(existing) if existing == head => {}
            Some(_) => return None,
        }
    }
    prefix.map(str::to_owned)
}

/// Read one entry's bytes by its archive path.
pub fn read_entry(archive: &mut ZipArchive<File>, path: &str) -> Result<Vec<u8>> {
    let mut file = match archive.by_name(path) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(SnapshotError::EntryNotFound(path.to_owned()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Normalize an archive path: `/` separators, no leading `./`, reject
/// traversal and absolute paths outright (a hostile snapshot must not map
/// outside its root).
pub fn normalize_entry_path(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\\', "/");
    let cleaned = cleaned.trim_start_matches("./");
    if cleaned.is_empty() || cleaned.starts_with('/') {
        return None;
    }
    let mut parts = Vec::new();
    for part in cleaned.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    let mut path = parts.join("/");
    if cleaned.ends_with('/') {
        path.push('/');
    }
    Some(path.trim_end_matches('/').to_owned())
}

pub(crate) fn zip_mod_time(dt: Option<zip::DateTime>) -> Option<DateTime<Utc>> {
    let dt = dt?;
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;

    /// Write a ZIP archive of `(path, bytes)` entries for tests.
    pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_segments_and_rejects_traversal() {
        assert_eq!(normalize_entry_path("a/./b//c"), Some("a/b/c".into()));
        assert_eq!(normalize_entry_path("./x.txt"), Some("x.txt".into()));
        assert_eq!(normalize_entry_path("dir/"), Some("dir".into()));
        assert_eq!(normalize_entry_path("../evil"), None);
        assert_eq!(normalize_entry_path("/abs"), None);
        assert_eq!(normalize_entry_path(""), None);
    }

    #[test]
    fn strip_prefix_detected_for_single_root() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        test_support::write_zip(
            &zip_path,
            &[
                ("mediator/file.txt", b"hello"),
                ("mediator/src/lib.rs", b"pub fn x() {}"),
            ],
        );
        let mut archive = open_archive(&zip_path).unwrap();
        let entries = entries(&mut archive).unwrap();
        assert_eq!(detect_strip_prefix(&entries).as_deref(), Some("mediator"));
    }

    #[test]
    fn strip_prefix_absent_for_mixed_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        test_support::write_zip(&zip_path, &[("a/f.txt", b"1"), ("b/g.txt", b"2")]);
        let mut archive = open_archive(&zip_path).unwrap();
        let entries = entries(&mut archive).unwrap();
        assert_eq!(detect_strip_prefix(&entries), None);
    }

    #[test]
    fn strip_prefix_absent_for_top_level_file() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        test_support::write_zip(&zip_path, &[("README.md", b"r"), ("src/lib.rs", b"l")]);
        let mut archive = open_archive(&zip_path).unwrap();
        let entries = entries(&mut archive).unwrap();
        assert_eq!(detect_strip_prefix(&entries), None);
    }

    #[test]
    fn read_entry_distinguishes_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("snap.zip");
        test_support::write_zip(&zip_path, &[("f.txt", b"data")]);
        let mut archive = open_archive(&zip_path).unwrap();
        assert_eq!(read_entry(&mut archive, "f.txt").unwrap(), b"data");
        let err = read_entry(&mut archive, "missing.txt").unwrap_err();
        assert!(matches!(err, SnapshotError::EntryNotFound(_)));
    }
}
