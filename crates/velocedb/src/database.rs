use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use veloce_engine::{EngineError, EngineHandle, FlushReport, SnapshotSource};
use veloce_proxy::{Document, MutationObserver, Proxy};
use veloce_store::{FileStore, JsonSerializer, Serializer, StoreBackend};
use veloce_types::VeloceConfig;

use crate::bridge::Bridge;
use crate::error::{VeloceError, VeloceResult};

enum Root {
    /// Proxy mode: mutations go through the document and are tracked.
    Tracked(Document),
    /// No-proxy mode: a plain value, saved only on request.
    Plain(Arc<Mutex<Value>>),
}

/// A JSON database bound to one file.
///
/// Dropping the database stops its worker after flushing pending changes.
/// Prefer [`Veloce::close`] to wait for that write and see its outcome.
pub struct Veloce {
    path: PathBuf,
    config: VeloceConfig,
    root: Root,
    engine: EngineHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Veloce {
    /// Open the database stored at `path`, using the local filesystem.
    ///
    /// A missing file starts from `config.target` (or `{}`) and is created
    /// by the first save. A file that cannot be parsed is an error.
    pub async fn open(path: impl Into<PathBuf>, config: VeloceConfig) -> VeloceResult<Self> {
        let backend = Arc::new(FileStore::new(config.file_options.clone()));
        Self::open_with(path, config, backend, Arc::new(JsonSerializer)).await
    }

    /// Open with a custom backend and serializer.
    pub async fn open_with(
        path: impl Into<PathBuf>,
        config: VeloceConfig,
        backend: Arc<dyn StoreBackend>,
        serializer: Arc<dyn Serializer>,
    ) -> VeloceResult<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| VeloceError::NoRuntime(e.to_string()))?;

        let path = path.into();
        let initial = match backend.read(&path).await? {
            Some(bytes) => serializer
                .decode(&bytes)
                .map_err(|source| VeloceError::Parse {
                    path: path.clone(),
                    source,
                })?,
            None => {
                debug!(path = %path.display(), "no existing file, starting from target");
                config
                    .target
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new()))
            }
        };

        let (root, source, bridge): (Root, Arc<dyn SnapshotSource>, Option<Arc<Bridge>>) =
            if config.no_proxy {
                let value = Arc::new(Mutex::new(initial));
                let source = {
                    let value = Arc::clone(&value);
                    move || value.lock().expect("lock poisoned").clone()
                };
                (Root::Plain(value), Arc::new(source) as Arc<dyn SnapshotSource>, None)
            } else {
                let bridge = Arc::new(Bridge::new(config.handler.clone()));
                let document = Document::new(
                    initial,
                    Arc::clone(&bridge) as Arc<dyn MutationObserver>,
                );
                let source = {
                    let document = document.clone();
                    move || {
                        document.sweep();
                        document.snapshot()
                    }
                };
                (
                    Root::Tracked(document),
                    Arc::new(source) as Arc<dyn SnapshotSource>,
                    Some(bridge),
                )
            };

        let (engine, worker) =
            veloce_engine::spawn(path.clone(), &config, backend, serializer, source)?;
        if let Some(bridge) = bridge {
            bridge.attach(engine.downgrade());
        }

        info!(
            path = %path.display(),
            db = %engine.db(),
            no_proxy = config.no_proxy,
            auto_save = config.auto_save_active(),
            "database opened"
        );

        Ok(Self {
            path,
            config,
            root,
            engine,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Handle to the root container. Proxy mode only.
    pub fn data(&self) -> VeloceResult<Proxy> {
        match &self.root {
            Root::Tracked(document) => Ok(document.root()?),
            Root::Plain(_) => Err(VeloceError::NoProxyMode { operation: "data" }),
        }
    }

    /// Exclusive access to the plain value. No-proxy mode only.
    ///
    /// Changes are not tracked; call [`Veloce::save`] to persist them. Drop
    /// the guard before awaiting a save.
    pub fn raw(&self) -> VeloceResult<RawData<'_>> {
        match &self.root {
            Root::Plain(value) => Ok(RawData {
                guard: value.lock().expect("lock poisoned"),
            }),
            Root::Tracked(_) => Err(VeloceError::ProxyMode { operation: "raw" }),
        }
    }

    /// Replace the whole tree.
    ///
    /// In proxy mode this is a `replace` mutation and schedules a save.
    pub fn set_data(&self, value: Value) {
        match &self.root {
            Root::Tracked(document) => document.replace_root(value),
            Root::Plain(plain) => *plain.lock().expect("lock poisoned") = value,
        }
    }

    /// Deep copy of the current tree.
    pub fn snapshot(&self) -> Value {
        match &self.root {
            Root::Tracked(document) => document.snapshot(),
            Root::Plain(value) => value.lock().expect("lock poisoned").clone(),
        }
    }

    /// Write the tree now.
    ///
    /// Without `force`, nothing is written unless a change is pending (in
    /// no-proxy mode changes cannot be seen, so it always writes). Returns
    /// the report of the write that happened, if any.
    pub async fn save(&self, force: bool) -> VeloceResult<Option<FlushReport>> {
        Ok(self.engine.save(force).await?)
    }

    /// Remove the backing file, keeping the in-memory tree.
    ///
    /// Returns `false` if there was no file. A later save recreates it.
    pub async fn delete(&self) -> VeloceResult<bool> {
        Ok(self.engine.delete().await?)
    }

    /// Receive a report after every successful write.
    pub fn subscribe(&self) -> broadcast::Receiver<FlushReport> {
        self.engine.subscribe()
    }

    /// Flush pending changes and stop the worker.
    ///
    /// Later saves fail with [`EngineError::WorkerClosed`]. Closing twice is
    /// not an error.
    pub async fn close(&self) -> VeloceResult<Option<FlushReport>> {
        let report = match self.engine.shutdown().await {
            Ok(report) => report,
            Err(EngineError::WorkerClosed) => None,
            Err(e) => return Err(e.into()),
        };
        let worker = self.worker.lock().expect("lock poisoned").take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                debug!(error = %e, "worker task ended abnormally");
            }
        }
        info!(path = %self.path.display(), "database closed");
        Ok(report)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &VeloceConfig {
        &self.config
    }

    pub fn is_proxy_mode(&self) -> bool {
        matches!(self.root, Root::Tracked(_))
    }
}

impl std::fmt::Debug for Veloce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Veloce")
            .field("path", &self.path)
            .field("proxy_mode", &self.is_proxy_mode())
            .field("engine", &self.engine)
            .finish()
    }
}

/// Lock guard over the plain value of a no-proxy database.
pub struct RawData<'a> {
    guard: MutexGuard<'a, Value>,
}

impl Deref for RawData<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.guard
    }
}

impl DerefMut for RawData<'_> {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;
    use veloce_store::InMemoryStore;
    use veloce_types::{HookAction, Method, MutationEvent, MutationHook, Trigger};

    const DB: &str = "db.json";

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn config() -> VeloceConfig {
        VeloceConfig::new()
            .with_auto_save_timeout(ms(50))
            .with_saving_retry_timeout(ms(100))
    }

    async fn open(store: &Arc<InMemoryStore>, config: VeloceConfig) -> Veloce {
        Veloce::open_with(
            DB,
            config,
            Arc::clone(store) as Arc<dyn StoreBackend>,
            Arc::new(JsonSerializer),
        )
        .await
        .unwrap()
    }

    fn stored(store: &InMemoryStore) -> Value {
        serde_json::from_slice(&store.get(Path::new(DB)).unwrap()).unwrap()
    }

    // ---- open ----

    #[tokio::test]
    async fn missing_file_starts_empty_without_writing() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        assert_eq!(db.snapshot(), json!({}));
        assert!(db.is_proxy_mode());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_starts_from_target() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config().with_target(json!({"users": []}))).await;
        assert_eq!(db.snapshot(), json!({"users": []}));
    }

    #[tokio::test]
    async fn existing_file_wins_over_target() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(DB, br#"{"kept": true}"#.to_vec());
        let db = open(&store, config().with_target(json!({"ignored": 1}))).await;
        assert_eq!(db.snapshot(), json!({"kept": true}));
    }

    #[tokio::test]
    async fn unparsable_file_is_fatal_and_untouched() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(DB, b"{not json".to_vec());
        let err = Veloce::open_with(
            DB,
            config(),
            Arc::clone(&store) as Arc<dyn StoreBackend>,
            Arc::new(JsonSerializer),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VeloceError::Parse { .. }));
        assert_eq!(store.get(Path::new(DB)).unwrap(), b"{not json".to_vec());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let err = Veloce::open_with(
            DB,
            config().with_auto_save_timeout(Duration::ZERO),
            Arc::clone(&store) as Arc<dyn StoreBackend>,
            Arc::new(JsonSerializer),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VeloceError::Config(_)));
    }

    // ---- proxy mode ----

    #[tokio::test(start_paused = true)]
    async fn quick_mutations_write_once_after_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config().with_maximum_auto_save_timeouts(3)).await;
        let root = db.data().unwrap();

        root.set("x", 1).unwrap();
        root.set("y", 2).unwrap();
        root.set("list", json!([])).unwrap();
        root.child("list").unwrap().push("a").unwrap();

        sleep(ms(30)).await;
        assert_eq!(store.write_count(), 0);
        sleep(ms(40)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(stored(&store)["x"], json!(1));

        sleep(ms(500)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn on_update_reports_method_and_result() {
        let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let store = Arc::new(InMemoryStore::new());
        let db = open(
            &store,
            config().with_on_update(move |method, result| {
                sink.lock().unwrap().push((method.to_string(), result.clone()));
            }),
        )
        .await;

        let root = db.data().unwrap();
        root.set("items", json!([1])).unwrap();
        root.child("items").unwrap().push(2).unwrap();
        sleep(ms(100)).await;

        assert_eq!(*calls.lock().unwrap(), vec![("push".to_string(), json!(2))]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_data_is_a_replace_mutation() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        let mut reports = db.subscribe();

        db.set_data(json!({"fresh": true}));
        let report = reports.recv().await.unwrap();
        assert_eq!(report.method(), "replace");
        assert_eq!(stored(&store), json!({"fresh": true}));
    }

    struct SkipCache;

    impl MutationHook for SkipCache {
        fn on_mutation(&self, event: &MutationEvent) -> HookAction {
            if event.method == Method::Set && event.args.first() == Some(&json!("cache")) {
                HookAction::Suppress
            } else {
                HookAction::Forward
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hook_can_suppress_scheduling() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config().with_handler(Arc::new(SkipCache))).await;
        let root = db.data().unwrap();

        root.set("cache", json!({"hot": 1})).unwrap();
        sleep(ms(200)).await;
        assert_eq!(store.write_count(), 0);

        root.set("real", 1).unwrap();
        sleep(ms(200)).await;
        assert_eq!(stored(&store), json!({"cache": {"hot": 1}, "real": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_recover() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_writes(3);
        let db = open(&store, config()).await;
        let mut reports = db.subscribe();

        db.data().unwrap().set("x", 1).unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.attempts, 4);
        assert_eq!(store.write_count(), 1);
        assert_eq!(stored(&store), json!({"x": 1}));
    }

    #[tokio::test]
    async fn raw_is_rejected_in_proxy_mode() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        assert!(matches!(db.raw(), Err(VeloceError::ProxyMode { .. })));
    }

    // ---- no-proxy mode ----

    #[tokio::test(start_paused = true)]
    async fn no_proxy_mode_never_saves_by_itself() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config().with_no_proxy(true)).await;
        assert!(matches!(db.data(), Err(VeloceError::NoProxyMode { .. })));

        db.raw().unwrap()["x"] = json!(1);
        sleep(ms(1000)).await;
        assert_eq!(store.write_count(), 0);

        let report = db.save(false).await.unwrap().unwrap();
        assert_eq!(report.trigger, Trigger::Manual);
        assert_eq!(stored(&store), json!({"x": 1}));

        db.set_data(json!([1, 2]));
        sleep(ms(1000)).await;
        assert_eq!(store.write_count(), 1);
    }

    // ---- save / delete / close ----

    #[tokio::test(start_paused = true)]
    async fn save_is_idempotent_without_changes() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        assert!(db.save(false).await.unwrap().is_none());
        assert!(db.save(false).await.unwrap().is_none());
        assert_eq!(store.write_count(), 0);

        db.save(true).await.unwrap().unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_keeps_memory_and_later_save_recreates() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(DB, br#"{"a": 1}"#.to_vec());
        let db = open(&store, config()).await;

        assert!(db.delete().await.unwrap());
        assert!(!db.delete().await.unwrap());
        assert_eq!(db.snapshot(), json!({"a": 1}));

        db.save(true).await.unwrap();
        assert_eq!(stored(&store), json!({"a": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_pending_changes() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        db.data().unwrap().set("late", true).unwrap();

        let report = db.close().await.unwrap().unwrap();
        assert_eq!(report.method(), "set");
        assert_eq!(stored(&store), json!({"late": true}));

        assert!(db.close().await.unwrap().is_none());
        assert!(matches!(
            db.save(true).await,
            Err(VeloceError::Engine(EngineError::WorkerClosed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn drop_flushes_pending_changes() {
        let store = Arc::new(InMemoryStore::new());
        let db = open(&store, config()).await;
        let root = db.data().unwrap();
        root.set("x", 1).unwrap();
        drop(db);

        sleep(ms(10)).await;
        assert_eq!(stored(&store), json!({"x": 1}));

        // The proxy outlives the database but its changes go nowhere.
        root.set("x", 2).unwrap();
        sleep(ms(200)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");

        let db = Veloce::open(&path, config()).await.unwrap();
        let root = db.data().unwrap();
        root.set("name", "veloce").unwrap();
        root.set("tags", json!(["a", "b"])).unwrap();
        db.close().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \""));

        let reopened = Veloce::open(&path, config()).await.unwrap();
        assert_eq!(
            reopened.snapshot(),
            json!({"name": "veloce", "tags": ["a", "b"]})
        );
    }

    #[tokio::test]
    async fn compact_output_without_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let db = Veloce::open(&path, config().with_space(None)).await.unwrap();
        db.data().unwrap().set("k", 1).unwrap();
        db.save(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"k":1}"#);
    }

    #[tokio::test]
    async fn keys_are_written_in_insertion_order() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(DB, br#"{"zeta":1,"alpha":{"b":2,"a":1}}"#.to_vec());
        let db = open(&store, config().with_space(None)).await;

        db.data().unwrap().set("beta", 3).unwrap();
        db.save(false).await.unwrap();
        let written = String::from_utf8(store.last_write().unwrap()).unwrap();
        assert_eq!(written, r#"{"zeta":1,"alpha":{"b":2,"a":1},"beta":3}"#);
    }
}
