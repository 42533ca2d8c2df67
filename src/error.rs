use std::io;
use thiserror::Error;

use crate::core::sensors::providers::ProviderError;
use crate::platform::host::CommandError;

/// Custom error type for hwsense
#[derive(Error, Debug)]
pub enum HwsenseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Host command failed: {0}")]
    Host(#[from] CommandError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for hwsense
pub type Result<T> = std::result::Result<T, HwsenseError>;

impl HwsenseError {
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        HwsenseError::Runtime(msg.into())
    }
}
