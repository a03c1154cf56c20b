use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use veloce_store::StoreError;
use veloce_types::MutationEvent;

use crate::persist::FlushReport;

/// Target used for the timestamped diagnostics emitted in debug mode.
pub const DEBUG_TARGET: &str = "velocedb::debug";

/// Lifecycle diagnostics for one database.
///
/// With `enabled` set, every event is logged at `info` on [`DEBUG_TARGET`]
/// together with a wall-clock timestamp. Otherwise the same events go to
/// the crate's own target at `trace`/`debug`. Logging never affects
/// control flow.
#[derive(Clone, Copy, Debug)]
pub struct DebugLog {
    enabled: bool,
    db: Uuid,
}

impl DebugLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            db: Uuid::now_v7(),
        }
    }

    /// Identifier attached to every event of this database.
    pub fn db(&self) -> Uuid {
        self.db
    }

    pub fn mutation_observed(&self, event: &MutationEvent) {
        let summary = event.summary();
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), %summary, "mutation observed");
        } else {
            trace!(db = %self.db, %summary, "mutation observed");
        }
    }

    pub fn flush_scheduled(&self, delay: Duration, resets: u32) {
        let delay_ms = delay.as_millis() as u64;
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), delay_ms, resets, "flush scheduled");
        } else {
            trace!(db = %self.db, delay_ms, resets, "flush scheduled");
        }
    }

    pub fn flush_forced(&self, resets: u32) {
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), resets, "reset ceiling reached, flushing now");
        } else {
            debug!(db = %self.db, resets, "reset ceiling reached, flushing now");
        }
    }

    pub fn flush_executed(&self, report: &FlushReport) {
        let method = report.trigger.method();
        if self.enabled {
            info!(
                target: DEBUG_TARGET,
                db = %self.db,
                timestamp = %report.completed_at.to_rfc3339(),
                method,
                attempts = report.attempts,
                bytes = report.bytes,
                "flush executed"
            );
        } else {
            debug!(db = %self.db, method, attempts = report.attempts, bytes = report.bytes, "flush executed");
        }
    }

    pub fn save_skipped(&self) {
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), "save skipped, nothing pending");
        } else {
            trace!(db = %self.db, "save skipped, nothing pending");
        }
    }

    /// A write attempt failed and will be retried after `delay`.
    pub fn retry(&self, attempt: u32, error: &StoreError, delay: Duration) {
        let delay_ms = delay.as_millis() as u64;
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), attempt, %error, delay_ms, "write failed, retrying");
        } else if attempt == 1 {
            warn!(db = %self.db, %error, delay_ms, "write failed, retrying");
        } else {
            debug!(db = %self.db, attempt, %error, "write failed again");
        }
    }

    pub fn delete_executed(&self, existed: bool) {
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), existed, "file deleted");
        } else {
            debug!(db = %self.db, existed, "file deleted");
        }
    }

    pub fn worker_stopped(&self, flushed: bool) {
        if self.enabled {
            info!(target: DEBUG_TARGET, db = %self.db, timestamp = %Utc::now().to_rfc3339(), flushed, "worker stopped");
        } else {
            debug!(db = %self.db, flushed, "worker stopped");
        }
    }
}
