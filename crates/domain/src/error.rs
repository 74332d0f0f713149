/// Shared error type used across all agently crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Some locations failed while others succeeded; carries the first
    /// underlying failure message.
    #[error("partial failure: {0}")]
    Partial(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the transient kinds that qualify for a single retry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_predicate_covers_both_transient_kinds() {
        assert!(Error::Canceled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::Validation("x".into()).is_cancellation());
        assert!(!Error::Other("x".into()).is_cancellation());
    }
}
