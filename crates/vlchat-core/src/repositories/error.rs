use thiserror::Error;

/// Failures reading or writing persisted session and config files
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
