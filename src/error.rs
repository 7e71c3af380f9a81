use thiserror::Error;

/// Failures raised by an [`Adapter`](crate::adapter::Adapter).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the [`Registry`](crate::Registry).
///
/// Lookups never produce a not-found error; unknown keys resolve to ghost
/// features instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
