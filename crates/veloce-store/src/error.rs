/// Errors from storage backends and serializers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The stored bytes are not a valid document.
    #[error("decode error: {0}")]
    Decode(String),

    /// A blocking I/O task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Injected failure from [`InMemoryStore`](crate::InMemoryStore).
    #[error("simulated write failure (attempt {attempt})")]
    Simulated { attempt: u64 },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
