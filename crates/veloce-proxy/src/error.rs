use veloce_types::{Key, KeyPath, Method};

use crate::arena::NodeId;

/// Errors from proxy operations.
///
/// The interceptor never fails on its own; these are reported when a call
/// does not fit the shape of the container it is made on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
    /// The addressed value is a scalar, not an object or array.
    #[error("value at {path} is not an object or array")]
    NotAContainer { path: KeyPath },

    /// A field name was used on an array.
    #[error("key `{key}` cannot address an element of the array at {path}")]
    KeyMismatch { path: KeyPath, key: Key },

    /// An insertion position past the end of an array.
    #[error("index {index} out of bounds for array of length {len} at {path}")]
    IndexOutOfBounds {
        path: KeyPath,
        index: usize,
        len: usize,
    },

    /// A sequence method was called on an object.
    #[error("{method} requires an array, found an object at {path}")]
    NotAnArray { path: KeyPath, method: Method },

    /// The handle's node has been freed.
    #[error("stale handle: {0:?} no longer exists")]
    StaleHandle(NodeId),
}

/// Result alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
