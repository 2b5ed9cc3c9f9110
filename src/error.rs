//! Error types for StreamGuard

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamGuardError>;

#[derive(Error, Debug)]
pub enum StreamGuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
