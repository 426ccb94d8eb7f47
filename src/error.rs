use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PansouError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Cache writer error: {0}")]
    CacheWriter(String),

    #[error("No main cache updater registered; {pending} pending cache writes cannot be persisted")]
    NoMainCacheUpdater { pending: usize },

    #[error("Shutdown phase '{phase}' exceeded its {timeout:?} budget")]
    ShutdownTimeout {
        phase: &'static str,
        timeout: Duration,
    },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Plugin '{name}' failed: {message}")]
    Plugin { name: String, message: String },

    #[error("Channel '{channel}' failed: {message}")]
    Channel { channel: String, message: String },

    #[error("An unexpected error occurred: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PansouError>;
