use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("No configuration directory available; pass --config")]
    NoConfigDir,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Discovery error: {0}")]
    Discovery(#[from] sniffer_engine::ProbeError),

    #[error("Download error: {0}")]
    Download(#[from] segfetch_engine::FetchError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AppError {
    pub fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
