//! Debounced persistence engine for VeloceDB.
//!
//! Mutations reported by the interceptor are coalesced by a
//! [`DebounceState`] and turned into flushes, which a [`Persister`] encodes
//! and writes with unbounded retry. Both live inside a single worker task
//! per database (see [`spawn`]), so writes to one file are never issued
//! concurrently.
//!
//! ```text
//!  mutation ──► EngineHandle ──mpsc──► worker ──► DebounceState
//!                                        │             │ flush
//!                                        ▼             ▼
//!                                  SnapshotSource ─► Persister ──► StoreBackend
//!                                                        │
//!                                                        └──► on_update / subscribers
//! ```

pub mod debug;
pub mod error;
pub mod persist;
pub mod scheduler;
pub mod worker;

pub use debug::DebugLog;
pub use error::{EngineError, EngineResult};
pub use persist::{FlushReport, Persister, SaveAttempt};
pub use scheduler::{DebounceState, Decision};
pub use worker::{spawn, EngineHandle, SnapshotSource, WeakEngineHandle};
