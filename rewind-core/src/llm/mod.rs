//! LLM decision harness: backend contract, rate limiting, retries,
//! circuit breaking, response parsing, and prompt construction.

pub mod backend;
pub mod circuit;
pub mod harness;
pub mod mock;
pub mod parser;
pub mod prompt;
pub mod rate_limiter;
pub mod response;

pub use backend::{BackendError, LlmBackend, LlmCallOutput, LlmRequest};
pub use circuit::{CircuitBreaker, CircuitState};
pub use harness::{HarnessConfig, HarnessStats, LlmHarness, LlmResult};
pub use parser::{parse_response, ParseError};
pub use rate_limiter::RateLimiter;
pub use response::{Decision, LlmResponse, SetupQuality};
