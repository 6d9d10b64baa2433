//! Error type shared by the backend client, sync channels and handlers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sync storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
