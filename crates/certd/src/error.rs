//! CLI error types.

use thiserror::Error;

use certd_sdk::SdkError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A certd operation failed.
    #[error("{0}")]
    Sdk(#[from] SdkError),
    /// The engine failed outside a client call.
    #[error("{0}")]
    Engine(#[from] certd_pki::Error),
    /// Configuration file is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// State directory is missing or inconsistent.
    #[error("state error: {0}")]
    State(String),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
