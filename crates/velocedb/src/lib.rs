//! VeloceDB: a file-backed JSON object store.
//!
//! The application works on a live JSON tree. In proxy mode every change
//! made through a [`Proxy`] is detected and, after a quiet period, the whole
//! tree is written back to a single JSON file. In no-proxy mode the tree is
//! a plain [`serde_json::Value`] and saving is explicit.
//!
//! ```no_run
//! use std::time::Duration;
//! use velocedb::{Veloce, VeloceConfig};
//!
//! # async fn demo() -> velocedb::VeloceResult<()> {
//! let config = VeloceConfig::new().with_auto_save_timeout(Duration::from_millis(200));
//! let db = Veloce::open("data/users.json", config).await?;
//!
//! let users = db.data()?;
//! users.set("alice", serde_json::json!({"age": 30}))?;
//!
//! // Written after 200ms without further changes, or right now:
//! db.save(false).await?;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
pub mod database;
pub mod error;

pub use database::{RawData, Veloce};
pub use error::{VeloceError, VeloceResult};

pub use veloce_engine::FlushReport;
pub use veloce_proxy::{Proxy, ProxyError};
pub use veloce_store::{FileStore, InMemoryStore, JsonSerializer, Serializer, StoreBackend};
pub use veloce_types::{
    FileOptions, HookAction, Key, KeyPath, Method, MutationEvent, MutationHook, Trigger,
    VeloceConfig,
};
