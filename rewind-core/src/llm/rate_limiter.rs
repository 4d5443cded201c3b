//! Token-bucket rate limiter for LLM calls.
//!
//! Sustained rate = max_calls_per_minute / 60 tokens per second; burst
//! capacity defaults to twice the per-minute budget's per-second rate.
//! `acquire` blocks the calling thread until a token is available or the
//! deadline expires. Safe for concurrent callers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    refill_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// `burst` caps how many calls can fire back-to-back; `None` uses
    /// 2x the sustained per-second rate (minimum 1 token).
    pub fn new(max_calls_per_minute: u32, burst: Option<u32>) -> Self {
        assert!(max_calls_per_minute > 0, "max_calls_per_minute must be positive");
        let refill_per_sec = max_calls_per_minute as f64 / 60.0;
        let burst = match burst {
            Some(b) => b as f64,
            None => (refill_per_sec * 2.0).max(1.0),
        };
        Self {
            refill_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until a token is available. Returns false if `timeout`
    /// expires first.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.try_acquire() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            // Sleep roughly one token's worth, bounded to keep the
            // deadline check responsive
            let wait = Duration::from_secs_f64((1.0 / self.refill_per_sec).min(0.05));
            std::thread::sleep(wait);
        }
    }

    /// Take a token without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.refill_per_sec, self.burst);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.refill_per_sec, self.burst);
        state.tokens
    }

    fn refill(state: &mut BucketState, refill_per_sec: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(burst);
        state.last_refill = now;
    }
}
