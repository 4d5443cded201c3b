//! Top-level run error taxonomy.
//!
//! Fatal errors finalize the manifest with `status = "failed"` and the
//! cause before the runner returns. Recoverable conditions (LLM failures,
//! transient store hiccups) never surface here; they are absorbed by the
//! harness fallback and the storage retry bound.

use thiserror::Error;

use crate::config::ConfigError;
use crate::source::SourceError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error at {timestamp}: {message}")]
    Data { timestamp: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("exit logic violation: {0}")]
    ExitLogic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
