use std::path::PathBuf;

use thiserror::Error;
use veloce_engine::EngineError;
use veloce_proxy::ProxyError;
use veloce_store::StoreError;
use veloce_types::ConfigError;

#[derive(Debug, Error)]
pub enum VeloceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The existing file could not be decoded. It is left untouched.
    #[error("failed to parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: StoreError },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("{operation} is not available in no-proxy mode")]
    NoProxyMode { operation: &'static str },

    #[error("{operation} is only available in no-proxy mode")]
    ProxyMode { operation: &'static str },

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

pub type VeloceResult<T> = Result<T, VeloceError>;
