use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use veloce_store::{Serializer, StoreBackend};
use veloce_types::{OnUpdate, Trigger, VeloceConfig};

use crate::debug::DebugLog;
use crate::error::EngineResult;

/// One serialized snapshot on its way to disk.
///
/// The payload is encoded once; every retry writes the same bytes.
#[derive(Clone, Debug)]
pub struct SaveAttempt {
    pub payload: Vec<u8>,
    /// Attempts made so far (0 before the first write).
    pub attempt: u32,
    pub retry_delay: Duration,
}

impl SaveAttempt {
    pub fn new(payload: Vec<u8>, retry_delay: Duration) -> Self {
        Self {
            payload,
            attempt: 0,
            retry_delay,
        }
    }
}

/// Outcome of a successful flush, delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushReport {
    /// What caused the flush.
    pub trigger: Trigger,
    /// Write attempts it took, the successful one included.
    pub attempts: u32,
    /// Size of the written payload.
    pub bytes: usize,
    pub completed_at: DateTime<Utc>,
}

impl FlushReport {
    /// Method name passed to the `on_update` callback.
    pub fn method(&self) -> &str {
        self.trigger.method()
    }
}

/// Encodes snapshots and writes them to the backing file, retrying until
/// the write succeeds.
pub struct Persister {
    path: PathBuf,
    backend: Arc<dyn StoreBackend>,
    serializer: Arc<dyn Serializer>,
    indent: Option<usize>,
    retry_delay: Duration,
    on_update: Option<OnUpdate>,
    reports: broadcast::Sender<FlushReport>,
    log: DebugLog,
}

impl Persister {
    pub fn new(
        path: PathBuf,
        config: &VeloceConfig,
        backend: Arc<dyn StoreBackend>,
        serializer: Arc<dyn Serializer>,
        reports: broadcast::Sender<FlushReport>,
        log: DebugLog,
    ) -> Self {
        Self {
            path,
            backend,
            serializer,
            indent: config.indent(),
            retry_delay: config.saving_retry_timeout,
            on_update: config.on_update.clone(),
            reports,
            log,
        }
    }

    /// Write `snapshot` and report it as caused by `trigger`.
    ///
    /// Storage failures are retried every `saving_retry_timeout` with no
    /// upper bound. Only an encoding failure is returned, since retrying
    /// cannot fix it. Once the write lands, `on_update` is called exactly
    /// once and the report is broadcast.
    pub async fn flush(&self, snapshot: &Value, trigger: Trigger) -> EngineResult<FlushReport> {
        let payload = self.serializer.encode(snapshot, self.indent)?;
        let mut save = SaveAttempt::new(payload, self.retry_delay);

        loop {
            save.attempt += 1;
            match self.backend.write(&self.path, &save.payload).await {
                Ok(()) => break,
                Err(error) => {
                    self.log.retry(save.attempt, &error, save.retry_delay);
                    tokio::time::sleep(save.retry_delay).await;
                }
            }
        }

        let report = FlushReport {
            trigger,
            attempts: save.attempt,
            bytes: save.payload.len(),
            completed_at: Utc::now(),
        };
        if let Some(on_update) = &self.on_update {
            on_update(report.trigger.method(), report.trigger.result());
        }
        self.log.flush_executed(&report);
        // No subscribers is not an error.
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    /// Remove the backing file. `Ok(false)` if it did not exist.
    pub async fn delete(&self) -> EngineResult<bool> {
        let existed = self.backend.remove(&self.path).await?;
        self.log.delete_executed(existed);
        Ok(existed)
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("path", &self.path)
            .field("indent", &self.indent)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
