//! Mutation interceptor for VeloceDB.
//!
//! A [`Document`] holds a JSON tree in an arena of containers. Callers read
//! and mutate it through [`Proxy`] handles; every mutation is applied under
//! the document lock and then reported, as a [`MutationEvent`], to the
//! document's [`MutationObserver`].
//!
//! # Wrapping
//!
//! Nested objects and arrays start out as raw values inside their parent.
//! The first time one is reached through [`Proxy::child`] it is moved into
//! the arena and the parent slot remembers its [`NodeId`], so every later
//! access yields a proxy for the same node. Containers introduced by a write
//! are moved into the arena before they are stored.
//!
//! # Lifetime
//!
//! Containers that are overwritten or removed stay in the arena while a
//! proxy for them is alive, and keep reporting mutations. [`Document::sweep`]
//! frees everything that is neither reachable from the root nor held by a
//! proxy.
//!
//! [`MutationEvent`]: veloce_types::MutationEvent

pub mod arena;
pub mod document;
pub mod error;
pub mod proxy;

pub use arena::NodeId;
pub use document::{Document, MutationObserver, NoopObserver};
pub use error::{ProxyError, ProxyResult};
pub use proxy::Proxy;
