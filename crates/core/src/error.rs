//! Error types for engine construction and configuration.
//!
//! Runtime failures of probes and controls never surface here: probes are
//! downgraded to "no data" and controls report `false`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{name} must be positive (got {value:?})")]
    InvalidInterval { name: &'static str, value: Duration },

    #[error("Configuration file malformed: {path}: {source}")]
    ConfigMalformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration parse failed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session registry must be started inside a tokio runtime")]
    NoRuntime,

    #[error("Failed to spawn control thread: {0}")]
    ControlThread(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
