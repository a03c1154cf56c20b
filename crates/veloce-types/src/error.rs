use thiserror::Error;

/// Errors produced when validating a [`VeloceConfig`](crate::VeloceConfig).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{option} must be greater than zero")]
    ZeroDuration { option: &'static str },

    #[error("indentation of {space} exceeds the maximum of {max}")]
    SpaceTooLarge { space: usize, max: usize },
}
