/// Errors specific to the snapshot filesystem.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive: {0}")]
    Archive(String),

    /// The requested path is not present in the cached snapshot.
    #[error("not found in snapshot: {0}")]
    EntryNotFound(String),

    #[error("snapshot fetch failed: {0}")]
    Fetch(String),

    #[error("no snapshot for location: {0}")]
    NoSnapshot(String),

    #[error("snapshot cache root cannot be created: {0}")]
    CacheRoot(String),

    #[error("{0}")]
    Other(String),
}

impl From<zip::result::ZipError> for SnapshotError {
    fn from(e: zip::result::ZipError) -> Self {
        SnapshotError::Archive(e.to_string())
    }
}

impl From<SnapshotError> for ag_domain::Error {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::EntryNotFound(path) => {
                ag_domain::Error::NotFound(format!("not found in snapshot: {path}"))
            }
            SnapshotError::CacheRoot(msg) => ag_domain::Error::Fatal(msg),
            other => ag_domain::Error::Other(other.to_string()),
        }
    }
}
