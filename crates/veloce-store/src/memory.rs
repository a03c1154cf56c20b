use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::traits::StoreBackend;

/// In-memory, HashMap-based store.
///
/// Intended for tests and embedding. Besides holding content it records
/// every successful write and can be told to fail a number of upcoming
/// writes, or to take a while for each write, which is how the retry and
/// in-flight behavior of the persistence engine is exercised.
pub struct InMemoryStore {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    history: RwLock<Vec<(PathBuf, Vec<u8>)>>,
    failures_remaining: AtomicU64,
    attempts: AtomicU64,
    write_delay: RwLock<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            failures_remaining: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            write_delay: RwLock::new(None),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail with [`StoreError::Simulated`].
    pub fn fail_next_writes(&self, count: u64) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every write wait `delay` before completing.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write().expect("lock poisoned") = delay;
    }

    /// Seed content without recording a write.
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files
            .write()
            .expect("lock poisoned")
            .insert(path.into(), bytes.into());
    }

    /// Current content at `path`.
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().expect("lock poisoned").get(path).cloned()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.history.read().expect("lock poisoned").len()
    }

    /// Number of write attempts so far, failed ones included.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of writes that were ever running at the same time.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every successful write, oldest first.
    pub fn history(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.history.read().expect("lock poisoned").clone()
    }

    /// Payload of the most recent successful write.
    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.history
            .read()
            .expect("lock poisoned")
            .last()
            .map(|(_, bytes)| bytes.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.get(path))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.write_delay.read().expect("lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Simulated { attempt });
        }

        self.files
            .write()
            .expect("lock poisoned")
            .insert(path.to_path_buf(), bytes.to_vec());
        self.history
            .write()
            .expect("lock poisoned")
            .push((path.to_path_buf(), bytes.to_vec()));
        Ok(())
    }

    async fn remove(&self, path: &Path) -> StoreResult<bool> {
        Ok(self
            .files
            .write()
            .expect("lock poisoned")
            .remove(path)
            .is_some())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let files = self.files.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryStore")
            .field("file_count", &files)
            .field("write_count", &self.write_count())
            .finish()
    }
}
