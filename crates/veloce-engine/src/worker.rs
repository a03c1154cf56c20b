use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::error;
use uuid::Uuid;
use veloce_store::{Serializer, StoreBackend};
use veloce_types::{MutationEvent, Trigger, VeloceConfig};

use crate::debug::DebugLog;
use crate::error::{EngineError, EngineResult};
use crate::persist::{FlushReport, Persister};
use crate::scheduler::{DebounceState, Decision};

/// Capacity of the flush report broadcast channel.
const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Produces the value to persist. Called once at the start of each flush.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Value;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn snapshot(&self) -> Value {
        self()
    }
}

enum Command {
    Mutation(MutationEvent),
    Save {
        force: bool,
        reply: oneshot::Sender<EngineResult<Option<FlushReport>>>,
    },
    Delete {
        reply: oneshot::Sender<EngineResult<bool>>,
    },
    Shutdown {
        reply: oneshot::Sender<EngineResult<Option<FlushReport>>>,
    },
}

/// Handle to a running persistence worker.
///
/// The worker stops once every `EngineHandle` has been dropped, flushing
/// pending state first. [`WeakEngineHandle`]s do not keep it alive.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    reports: broadcast::Sender<FlushReport>,
    log: DebugLog,
}

impl EngineHandle {
    /// Report a mutation. Returns `false` if the worker has stopped.
    pub fn notify(&self, event: MutationEvent) -> bool {
        self.commands.send(Command::Mutation(event)).is_ok()
    }

    /// Persist now.
    ///
    /// Without `force` this writes only if a mutation is pending (in manual
    /// mode it always writes). Returns the report of the write, if any.
    pub async fn save(&self, force: bool) -> EngineResult<Option<FlushReport>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Save { force, reply })?;
        rx.await.map_err(|_| EngineError::WorkerClosed)?
    }

    /// Remove the backing file. `Ok(false)` if it did not exist.
    pub async fn delete(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Delete { reply })?;
        rx.await.map_err(|_| EngineError::WorkerClosed)?
    }

    /// Flush pending state and stop the worker.
    pub async fn shutdown(&self) -> EngineResult<Option<FlushReport>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| EngineError::WorkerClosed)?
    }

    /// Receive a [`FlushReport`] for every successful write from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FlushReport> {
        self.reports.subscribe()
    }

    pub fn downgrade(&self) -> WeakEngineHandle {
        WeakEngineHandle {
            commands: self.commands.downgrade(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Identifier of this database in log output.
    pub fn db(&self) -> Uuid {
        self.log.db()
    }

    fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::WorkerClosed)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("db", &self.log.db())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Mutation-only handle that does not keep the worker alive.
#[derive(Clone)]
pub struct WeakEngineHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl WeakEngineHandle {
    /// Report a mutation. Returns `false` if the worker has stopped.
    pub fn notify(&self, event: MutationEvent) -> bool {
        match self.commands.upgrade() {
            Some(commands) => commands.send(Command::Mutation(event)).is_ok(),
            None => false,
        }
    }
}

/// Start the persistence worker for the file at `path` on the current
/// tokio runtime.
pub fn spawn(
    path: PathBuf,
    config: &VeloceConfig,
    backend: Arc<dyn StoreBackend>,
    serializer: Arc<dyn Serializer>,
    source: Arc<dyn SnapshotSource>,
) -> EngineResult<(EngineHandle, JoinHandle<()>)> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| EngineError::NoRuntime(e.to_string()))?;

    let log = DebugLog::new(config.debug);
    let (commands, rx) = mpsc::unbounded_channel();
    let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
    let worker = Worker {
        commands: rx,
        state: DebounceState::new(
            config.auto_save_timeout,
            config.maximum_auto_save_timeouts,
            config.auto_save_active(),
        ),
        manual: config.no_proxy,
        persister: Persister::new(path, config, backend, serializer, reports.clone(), log),
        source,
        log,
    };
    let task = runtime.spawn(worker.run());

    Ok((
        EngineHandle {
            commands,
            reports,
            log,
        },
        task,
    ))
}

/// Owns the debounce state and performs every write for one file, one at a
/// time.
struct Worker {
    commands: mpsc::UnboundedReceiver<Command>,
    state: DebounceState,
    /// No interception: explicit saves always write.
    manual: bool,
    persister: Persister,
    source: Arc<dyn SnapshotSource>,
    log: DebugLog,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let deadline = self.state.deadline();
            let command = tokio::select! {
                command = self.commands.recv() => command,
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(trigger) = self.state.on_deadline() {
                        self.flush_logged(trigger).await;
                    }
                    continue;
                }
            };

            match command {
                Some(Command::Mutation(event)) => self.on_mutation(event).await,
                Some(Command::Save { force, reply }) => {
                    let _ = reply.send(self.save(force).await);
                }
                Some(Command::Delete { reply }) => {
                    let _ = reply.send(self.persister.delete().await);
                }
                Some(Command::Shutdown { reply }) => {
                    let result = self.drain().await;
                    self.log.worker_stopped(matches!(result, Ok(Some(_))));
                    let _ = reply.send(result);
                    return;
                }
                None => {
                    let result = self.drain().await;
                    if let Err(e) = &result {
                        error!(db = %self.log.db(), error = %e, "final flush failed");
                    }
                    self.log.worker_stopped(matches!(result, Ok(Some(_))));
                    return;
                }
            }
        }
    }

    async fn on_mutation(&mut self, event: MutationEvent) {
        self.log.mutation_observed(&event);
        let now = Instant::now();
        let resets = self.state.reset_count();
        match self.state.on_mutation(event, now) {
            Decision::Armed { deadline, resets } => {
                self.log.flush_scheduled(deadline - now, resets);
            }
            Decision::FlushNow(trigger) => {
                self.log.flush_forced(resets);
                self.flush_logged(trigger).await;
            }
            Decision::Deferred => {}
        }
    }

    async fn save(&mut self, force: bool) -> EngineResult<Option<FlushReport>> {
        let trigger = if self.manual {
            Some(if force { Trigger::Forced } else { Trigger::Manual })
        } else {
            self.state.take_for_save(force)
        };
        match trigger {
            Some(trigger) => self.flush(trigger).await.map(Some),
            None => {
                self.log.save_skipped();
                Ok(None)
            }
        }
    }

    /// Flush whatever is pending before the worker goes away.
    async fn drain(&mut self) -> EngineResult<Option<FlushReport>> {
        match self.state.clear() {
            Some(trigger) => self.flush(trigger).await.map(Some),
            None => Ok(None),
        }
    }

    async fn flush(&self, trigger: Trigger) -> EngineResult<FlushReport> {
        let snapshot = self.source.snapshot();
        self.persister.flush(&snapshot, trigger).await
    }

    async fn flush_logged(&self, trigger: Trigger) {
        if let Err(e) = self.flush(trigger).await {
            error!(db = %self.log.db(), error = %e, "scheduled flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;
    use veloce_store::{InMemoryStore, JsonSerializer};
    use veloce_types::{KeyPath, Method};

    struct Fixture {
        store: Arc<InMemoryStore>,
        data: Arc<Mutex<Value>>,
        handle: EngineHandle,
        task: JoinHandle<()>,
    }

    impl Fixture {
        fn new(config: VeloceConfig) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let data = Arc::new(Mutex::new(json!({"x": 0})));
            let source = {
                let data = Arc::clone(&data);
                move || data.lock().unwrap().clone()
            };
            let (handle, task) = spawn(
                PathBuf::from("db.json"),
                &config,
                Arc::clone(&store) as Arc<dyn StoreBackend>,
                Arc::new(JsonSerializer),
                Arc::new(source),
            )
            .unwrap();
            Self {
                store,
                data,
                handle,
                task,
            }
        }

        fn set_x(&self, value: i64) {
            self.data.lock().unwrap()["x"] = json!(value);
            assert!(self.handle.notify(MutationEvent::new(
                Method::Set,
                KeyPath::root(),
                vec![json!("x"), json!(value)],
                json!(null),
            )));
        }

        fn writes(&self) -> usize {
            self.store.write_count()
        }

        fn written(&self) -> Vec<Value> {
            self.store
                .history()
                .into_iter()
                .map(|(_, bytes)| serde_json::from_slice(&bytes).unwrap())
                .collect()
        }
    }

    fn config() -> VeloceConfig {
        VeloceConfig::new()
            .with_auto_save_timeout(Duration::from_millis(50))
            .with_saving_retry_timeout(Duration::from_millis(100))
            .with_maximum_auto_save_timeouts(10)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn quick_mutations_coalesce_into_one_write() {
        let f = Fixture::new(config());
        for i in 1..=4 {
            f.set_x(i);
            sleep(ms(2)).await;
        }
        // Last mutation at t=6, so the flush is due at t=56.
        sleep(ms(40)).await;
        assert_eq!(f.writes(), 0);
        sleep(ms(20)).await;
        assert_eq!(f.written(), vec![json!({"x": 4})]);

        sleep(ms(500)).await;
        assert_eq!(f.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn four_mutations_under_ceiling_of_three_write_once() {
        let f = Fixture::new(config().with_maximum_auto_save_timeouts(3));
        for i in 1..=4 {
            f.set_x(i);
            sleep(ms(2)).await;
        }
        sleep(ms(100)).await;
        assert_eq!(f.written(), vec![json!({"x": 4})]);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_stream_is_flushed_by_the_ceiling() {
        let f = Fixture::new(config().with_maximum_auto_save_timeouts(3));
        for i in 1..=20 {
            f.set_x(i);
            sleep(ms(10)).await;
        }
        // Every fifth mutation exceeds the ceiling and flushes at once.
        assert_eq!(
            f.written(),
            vec![
                json!({"x": 5}),
                json!({"x": 10}),
                json!({"x": 15}),
                json!({"x": 20}),
            ]
        );
        sleep(ms(200)).await;
        assert_eq!(f.writes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_retried_until_they_succeed() {
        let f = Fixture::new(config());
        let mut reports = f.handle.subscribe();
        f.store.fail_next_writes(3);
        f.set_x(1);

        let report = reports.recv().await.unwrap();
        assert_eq!(report.attempts, 4);
        assert_eq!(report.method(), "set");
        assert_eq!(f.store.attempt_count(), 4);
        assert_eq!(f.written(), vec![json!({"x": 1})]);
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_during_flush_rearms_after_it() {
        let f = Fixture::new(config());
        f.store.set_write_delay(Some(ms(100)));

        f.set_x(1);
        // Flush starts at t=50 and holds the write until t=150.
        sleep(ms(80)).await;
        f.set_x(2);
        sleep(ms(100)).await;
        assert_eq!(f.written(), vec![json!({"x": 1})]);

        sleep(ms(200)).await;
        assert_eq!(f.written(), vec![json!({"x": 1}), json!({"x": 2})]);
        assert_eq!(f.store.peak_concurrent_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn save_without_pending_is_a_noop_unless_forced() {
        let f = Fixture::new(config());
        assert!(f.handle.save(false).await.unwrap().is_none());
        assert_eq!(f.writes(), 0);

        let report = f.handle.save(true).await.unwrap().unwrap();
        assert_eq!(report.trigger, Trigger::Forced);
        assert_eq!(f.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn save_with_pending_writes_now_and_cancels_timer() {
        let f = Fixture::new(config());
        f.set_x(3);
        let report = f.handle.save(false).await.unwrap().unwrap();
        assert_eq!(report.method(), "set");
        assert_eq!(f.written(), vec![json!({"x": 3})]);

        sleep(ms(200)).await;
        assert_eq!(f.writes(), 1);
        assert!(f.handle.save(false).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_always_writes_on_save() {
        let f = Fixture::new(config().with_no_proxy(true));
        let first = f.handle.save(false).await.unwrap().unwrap();
        assert_eq!(first.trigger, Trigger::Manual);
        f.handle.save(false).await.unwrap().unwrap();
        let forced = f.handle.save(true).await.unwrap().unwrap();
        assert_eq!(forced.trigger, Trigger::Forced);
        assert_eq!(f.writes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_save_off_waits_for_explicit_save() {
        let f = Fixture::new(config().with_auto_save(false));
        f.set_x(1);
        sleep(ms(1000)).await;
        assert_eq!(f.writes(), 0);

        let report = f.handle.save(false).await.unwrap().unwrap();
        assert!(report.trigger.is_mutation());
        assert_eq!(f.written(), vec![json!({"x": 1})]);
    }

    #[tokio::test(start_paused = true)]
    async fn on_update_is_called_once_per_flush() {
        let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let f = Fixture::new(config().with_on_update(move |method, result| {
            sink.lock().unwrap().push((method.to_string(), result.clone()));
        }));
        for i in 1..=4 {
            f.set_x(i);
        }
        sleep(ms(200)).await;
        assert_eq!(*calls.lock().unwrap(), vec![("set".to_string(), json!(null))]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_state() {
        let f = Fixture::new(config());
        f.set_x(9);
        let report = f.handle.shutdown().await.unwrap().unwrap();
        assert_eq!(report.method(), "set");
        assert_eq!(f.written(), vec![json!({"x": 9})]);

        f.task.await.unwrap();
        assert!(matches!(
            f.handle.save(true).await,
            Err(EngineError::WorkerClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_flushes_and_stops() {
        let f = Fixture::new(config());
        let weak = f.handle.downgrade();
        f.set_x(7);
        let Fixture {
            store,
            handle,
            task,
            ..
        } = f;
        drop(handle);
        task.await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert!(!weak.notify(MutationEvent::new(
            Method::Clear,
            KeyPath::root(),
            vec![],
            json!(null)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_is_idempotent() {
        let f = Fixture::new(config());
        f.handle.save(true).await.unwrap();
        assert!(f.handle.delete().await.unwrap());
        assert!(!f.handle.delete().await.unwrap());
        assert!(f.store.get(Path::new("db.json")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debug_mode_does_not_change_scheduling() {
        let f = Fixture::new(config().with_debug(true));
        for i in 1..=4 {
            f.set_x(i);
            sleep(ms(2)).await;
        }
        sleep(ms(100)).await;
        assert_eq!(f.written(), vec![json!({"x": 4})]);
    }

    // ---- diagnostics ----

    /// Formatted log output captured by a thread-local subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::TRACE)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn debug_lines(&self) -> Vec<String> {
            self.lines()
                .into_iter()
                .filter(|line| line.contains(crate::debug::DEBUG_TARGET))
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn debug_mode_logs_lifecycle_with_timestamps() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let f = Fixture::new(config().with_debug(true));
        f.store.fail_next_writes(1);
        f.set_x(1);
        sleep(ms(300)).await;
        assert_eq!(f.written(), vec![json!({"x": 1})]);
        f.handle.delete().await.unwrap();

        let lines = logs.debug_lines();
        for message in [
            "mutation observed",
            "flush scheduled",
            "write failed, retrying",
            "flush executed",
            "file deleted",
        ] {
            let line = lines
                .iter()
                .find(|line| line.contains(message))
                .unwrap_or_else(|| panic!("no `{message}` line in {lines:#?}"));
            assert!(line.contains(" INFO "), "{line}");
            assert!(line.contains("timestamp="), "{line}");
            assert!(line.contains(&f.handle.db().to_string()), "{line}");
        }
        let executed = lines.iter().find(|line| line.contains("flush executed")).unwrap();
        assert!(executed.contains("method=\"set\""), "{executed}");
        assert!(executed.contains("attempts=2"), "{executed}");
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_mode_keeps_the_debug_target_silent() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let f = Fixture::new(config());
        f.set_x(1);
        sleep(ms(100)).await;
        assert_eq!(f.writes(), 1);

        assert!(logs.debug_lines().is_empty(), "{:#?}", logs.debug_lines());
        let lines = logs.lines();
        assert!(lines.iter().any(|line| line.contains("flush executed") && !line.contains("timestamp=")));
    }
}
