//! Backend contract for LLM providers.
//!
//! The engine never talks to a provider directly; it hands an
//! [`LlmRequest`] to an [`LlmBackend`] and classifies failures by the
//! error tag, not by downcasting.

use std::time::Duration;
use thiserror::Error;

/// A single model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model_id: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-attempt deadline the backend must respect.
    pub deadline: Duration,
}

/// Successful backend output.
///
/// `latency_ms` is reported by the backend itself (a mock reports a fixed
/// value) so decision events stay deterministic under replay.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCallOutput {
    pub text: String,
    pub latency_ms: u64,
}

/// Transport-level failure, tagged by retryability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Timeouts, 5xx, rate-limit responses; worth retrying.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Auth, quota, malformed request; retrying cannot help.
    #[error("permanent backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Provider interface. Implementations must be safe to call from the
/// per-bar fan-out threads.
pub trait LlmBackend: Send + Sync {
    fn call(&self, request: &LlmRequest) -> Result<LlmCallOutput, BackendError>;
}
