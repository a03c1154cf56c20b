use veloce_store::StoreError;

/// Errors produced by the persistence engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The worker task has stopped (closed or panicked).
    #[error("persistence worker has stopped")]
    WorkerClosed,

    /// No tokio runtime is available to run the worker on.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// A non-retryable storage or serialization failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the engine crate.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
