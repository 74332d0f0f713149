//! `ag-snapshotfs` — snapshot-backed remote filesystem.
//!
//! A remote root may have a single ZIP snapshot; once cached locally, list
//! and download operations are served from the archive instead of per-file
//! remote reads. The cache is process-wide: one download per snapshot URI
//! (concurrent callers wait on the same completion), atomic `.part` +
//! rename writes, size-based staleness with background refresh, and an
//! on-disk MD5 manifest sibling to each archive.

pub mod archive;
pub mod cache;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod remote;

pub use cache::{SnapshotCache, SnapshotEntry};
pub use error::SnapshotError;
pub use fs::{CompositeFs, ManifestResolver, SnapshotFs, SnapshotRef, SnapshotResolver};
pub use remote::{RemoteFile, RemoteStore};

pub type Result<T> = std::result::Result<T, SnapshotError>;
