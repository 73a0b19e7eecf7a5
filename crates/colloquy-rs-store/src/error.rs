//! Error types for record storage.

/// Errors returned by record stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error while writing a record.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Attempted to change a field that is fixed at creation.
    #[error("immutable field `{field}` changed for record {id}")]
    Immutable { id: String, field: &'static str },
}

impl From<tempfile::PersistError> for StoreError {
    fn from(err: tempfile::PersistError) -> Self {
        StoreError::Io(err.error)
    }
}
