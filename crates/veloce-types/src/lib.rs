//! Foundation types for VeloceDB.
//!
//! This crate provides the vocabulary shared by every other VeloceDB crate:
//! how a location inside a JSON document is addressed, what a mutation looks
//! like once it has been observed, what caused a flush, and how a database is
//! configured.
//!
//! # Key Types
//!
//! - [`Key`]: A field name or sequence index inside a JSON container
//! - [`Method`]: The kind of mutation that was applied
//! - [`MutationEvent`]: An observed mutation with its arguments and result
//! - [`Trigger`]: What caused a flush (a mutation, a manual save, or a forced save)
//! - [`VeloceConfig`]: Database configuration with validated defaults

pub mod config;
pub mod error;
pub mod key;
pub mod mutation;

pub use config::{FileOptions, HookAction, MutationHook, OnUpdate, VeloceConfig};
pub use error::ConfigError;
pub use key::{Key, KeyPath};
pub use mutation::{Method, MutationEvent, Trigger};
