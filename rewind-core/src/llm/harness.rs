//! LLM harness: rate-limited, retried, circuit-broken calls with a
//! synthetic fallback decision.
//!
//! Synchronous from the caller's perspective. Internally the flow per
//! query is: circuit check -> (acquire token -> call -> parse) with
//! exponential backoff between attempts. Parse failures and transient
//! transport errors retry; permanent errors trip the circuit and fall
//! back immediately. Safe for concurrent callers.

use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::llm::backend::{BackendError, LlmBackend, LlmRequest};
use crate::llm::circuit::{CircuitBreaker, CircuitState};
use crate::llm::parser::parse_response;
use crate::llm::rate_limiter::RateLimiter;
use crate::llm::response::{Decision, LlmResponse};

/// Backoff cap per the retry policy.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    /// How long `acquire` may block on the rate limiter per attempt.
    pub acquire_timeout: Duration,
    pub fallback_decision: Decision,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(30),
            fallback_decision: Decision::Skip,
        }
    }
}

/// Outcome of one harness query, successful or fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResult {
    pub response: LlmResponse,
    pub success: bool,
    pub fallback_used: bool,
    pub error: Option<String>,
    pub retries: u32,
    /// Sum of backend-reported latencies across attempts.
    pub latency_ms: u64,
    pub circuit_state: CircuitState,
    pub raw_response: Option<String>,
}

/// Aggregate call statistics, surfaced in the manifest and heartbeat.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HarnessStats {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_retries: u64,
}

pub struct LlmHarness {
    backend: Box<dyn LlmBackend>,
    config: HarnessConfig,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    stats: Mutex<HarnessStats>,
}

impl LlmHarness {
    pub fn new(
        backend: Box<dyn LlmBackend>,
        config: HarnessConfig,
        rate_limiter: RateLimiter,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            backend,
            config,
            rate_limiter,
            breaker,
            stats: Mutex::new(HarnessStats::default()),
        }
    }

    /// Evaluate one request. Always returns a usable result; when the
    /// backend cannot be reached the result carries the fallback decision
    /// with `fallback_used = true`.
    pub fn query(&self, request: &LlmRequest) -> LlmResult {
        self.stats.lock().unwrap().total_calls += 1;

        if self.breaker.check() == CircuitState::Open {
            warn!("circuit breaker open, using fallback decision");
            return self.fallback_result("circuit breaker open", 0, 0);
        }

        let mut last_error = String::from("no attempts made");
        let mut latency_ms = 0u64;

        for attempt in 0..=self.config.max_retries {
            if !self.rate_limiter.acquire(self.config.acquire_timeout) {
                last_error = format!(
                    "rate limiter timeout ({}s)",
                    self.config.acquire_timeout.as_secs()
                );
            } else {
                match self.backend.call(request) {
                    Ok(output) => {
                        latency_ms += output.latency_ms;
                        match parse_response(&output.text) {
                            Ok(response) => {
                                self.breaker.record_success();
                                let mut stats = self.stats.lock().unwrap();
                                stats.successes += 1;
                                stats.total_retries += attempt as u64;
                                return LlmResult {
                                    response,
                                    success: true,
                                    fallback_used: false,
                                    error: None,
                                    retries: attempt,
                                    latency_ms,
                                    circuit_state: self.breaker.state(),
                                    raw_response: Some(output.text),
                                };
                            }
                            Err(parse_err) => {
                                last_error = format!("parse error: {parse_err}");
                                warn!(attempt, error = %last_error, "LLM response rejected");
                            }
                        }
                    }
                    Err(BackendError::Permanent(msg)) => {
                        // Not retryable; open the circuit so subsequent
                        // candidates short-circuit to the fallback
                        warn!(error = %msg, "permanent backend error, tripping circuit");
                        self.breaker.trip();
                        self.stats.lock().unwrap().failures += 1;
                        return self.fallback_result(&msg, attempt, latency_ms);
                    }
                    Err(BackendError::Transient(msg)) => {
                        last_error = msg;
                        warn!(attempt, error = %last_error, "transient backend error");
                    }
                }
            }

            if attempt < self.config.max_retries {
                std::thread::sleep(self.retry_delay(attempt));
            }
        }

        self.breaker.record_failure();
        {
            let mut stats = self.stats.lock().unwrap();
            stats.failures += 1;
            stats.total_retries += self.config.max_retries as u64;
        }
        self.fallback_result(&last_error, self.config.max_retries, latency_ms)
    }

    pub fn stats(&self) -> HarnessStats {
        *self.stats.lock().unwrap()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Delay before retrying attempt `attempt` (zero-indexed):
    /// `initial * 2^attempt`, capped at 30s, jittered by [0.75, 1.25].
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .initial_retry_delay
            .as_secs_f64()
            * 2f64.powi(attempt as i32);
        let capped = base.min(MAX_RETRY_DELAY.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(capped * jitter)
    }

    fn fallback_result(&self, error: &str, retries: u32, latency_ms: u64) -> LlmResult {
        LlmResult {
            response: LlmResponse::fallback(self.config.fallback_decision, error),
            success: false,
            fallback_used: true,
            error: Some(error.to_string()),
            retries,
            latency_ms,
            circuit_state: self.breaker.state(),
            raw_response: None,
        }
    }
}
