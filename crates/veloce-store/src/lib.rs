//! Storage collaborators for VeloceDB.
//!
//! The persistence engine never touches the filesystem or a JSON library
//! directly. It goes through two seams defined here:
//!
//! - [`StoreBackend`] -- reads, writes, and removes the bytes behind a path
//! - [`Serializer`] -- turns a document into bytes and back
//!
//! # Backends
//!
//! - [`FileStore`] -- the real filesystem, with optional atomic replace and fsync
//! - [`InMemoryStore`] -- `HashMap`-based store for tests, with failure injection
//!
//! # Design Rules
//!
//! 1. A missing file is not an error: `read` returns `Ok(None)` and `remove`
//!    returns `Ok(false)`.
//! 2. A write either replaces the whole file or fails; there are no partial writes.
//! 3. All other I/O errors are propagated; retry policy belongs to the caller.

pub mod codec;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use codec::{JsonSerializer, Serializer};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use traits::StoreBackend;
