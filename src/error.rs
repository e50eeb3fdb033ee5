use thiserror::Error;

/// Errors surfaced by the source tracker.
///
/// Registering a URL that already exists is not an error; `register`
/// returns the existing row instead.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Connectivity or constraint failure in SQLite. Never retried here.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    StorageIo(#[from] std::io::Error),

    /// `mark_checked` referenced a source id with no row.
    #[error("job source #{id} not found")]
    NotFound { id: i64 },

    #[error("invalid source url: {0:?}")]
    InvalidUrl(String),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
