use thiserror::Error;

/// Errors surfaced by repository implementations.
///
/// A duplicate dedup key is never an error: implementations coalesce it and
/// report what was actually inserted.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}
