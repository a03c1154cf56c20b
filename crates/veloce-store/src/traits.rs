use std::path::Path;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Byte-level storage behind a database file.
///
/// All implementations must satisfy these invariants:
/// - A missing file is reported as `Ok(None)` / `Ok(false)`, never as `Err`.
/// - `write` replaces the entire content at `path` or fails without
///   leaving a partially written file behind (best effort for backends that
///   cannot rename atomically).
/// - Errors are returned to the caller; backends do not retry.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read the full content at `path`.
    ///
    /// Returns `Ok(None)` if nothing exists at `path`.
    async fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the content at `path` with `bytes`.
    async fn write(&self, path: &Path, bytes: &[u8]) -> StoreResult<()>;

    /// Remove the content at `path`. Returns `true` if something existed.
    async fn remove(&self, path: &Path) -> StoreResult<bool>;

    /// Check whether anything exists at `path`.
    ///
    /// Default implementation reads the content. Backends may override
    /// with a cheaper metadata lookup.
    async fn exists(&self, path: &Path) -> StoreResult<bool> {
        Ok(self.read(path).await?.is_some())
    }
}
