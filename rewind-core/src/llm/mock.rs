//! Mock LLM backends for tests and deterministic replay.
//!
//! A replayed run with a mock backend must produce byte-identical
//! artifacts, so mocks report a fixed latency (zero by default) and never
//! consult a clock or entropy source.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::llm::backend::{BackendError, LlmBackend, LlmCallOutput, LlmRequest};

/// JSON body for a `take` response at the given grade and confidence.
pub fn take_response(quality: &str, confidence: f64) -> String {
    format!(
        "{{\"decision\": \"take\", \"setup_quality\": \"{quality}\", \"confidence\": {confidence}, \"risk_flags\": [], \"notes\": \"mock take\"}}"
    )
}

/// JSON body for a `skip` response at the given grade and confidence.
pub fn skip_response(quality: &str, confidence: f64) -> String {
    format!(
        "{{\"decision\": \"skip\", \"setup_quality\": \"{quality}\", \"confidence\": {confidence}, \"risk_flags\": [\"weak_setup\"], \"notes\": \"mock skip\"}}"
    )
}

/// Returns the same text for every call.
#[derive(Debug, Clone)]
pub struct StaticLlm {
    text: String,
    latency_ms: u64,
}

impl StaticLlm {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), latency_ms: 0 }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn always_take() -> Self {
        Self::new(take_response("A", 0.9))
    }

    pub fn always_skip() -> Self {
        Self::new(skip_response("C", 0.8))
    }

    pub fn text(&self) -> String {
        self.text.clone()
    }
}

impl LlmBackend for StaticLlm {
    fn call(&self, _request: &LlmRequest) -> Result<LlmCallOutput, BackendError> {
        Ok(LlmCallOutput { text: self.text.clone(), latency_ms: self.latency_ms })
    }
}

/// Plays back a fixed sequence of outcomes, then repeats the final default.
///
/// Used to script scenarios like "take the first candidate, skip the rest"
/// or "fail five times, then recover".
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    default: String,
    latency_ms: u64,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default: skip_response("C", 0.5),
            latency_ms: 0,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl LlmBackend for ScriptedLlm {
    fn call(&self, _request: &LlmRequest) -> Result<LlmCallOutput, BackendError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(LlmCallOutput { text, latency_ms: self.latency_ms }),
            Some(Err(err)) => Err(err),
            None => Ok(LlmCallOutput {
                text: self.default.clone(),
                latency_ms: self.latency_ms,
            }),
        }
    }
}

/// Fails the first N calls, then returns a fixed success body.
pub struct FailingLlm {
    remaining_failures: Mutex<u64>,
    error: BackendError,
    success_text: String,
}

impl FailingLlm {
    pub fn transient(failures: u64, success_text: String) -> Self {
        Self {
            remaining_failures: Mutex::new(failures),
            error: BackendError::Transient("simulated timeout".into()),
            success_text,
        }
    }

    /// Every call fails permanently (auth-style outage).
    pub fn permanent(message: &str) -> Self {
        Self {
            remaining_failures: Mutex::new(u64::MAX),
            error: BackendError::Permanent(message.into()),
            success_text: String::new(),
        }
    }
}

impl LlmBackend for FailingLlm {
    fn call(&self, _request: &LlmRequest) -> Result<LlmCallOutput, BackendError> {
        let mut remaining = self.remaining_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Err(self.error.clone());
        }
        Ok(LlmCallOutput { text: self.success_text.clone(), latency_ms: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::parser::parse_response;
    use crate::llm::response::Decision;
    use std::time::Duration;

    fn request() -> LlmRequest {
        LlmRequest {
            system_prompt: String::new(),
            user_prompt: String::new(),
            model_id: "mock".into(),
            temperature: 0.0,
            max_tokens: 100,
            deadline: Duration::from_secs(1),
        }
    }

    #[test]
    fn canned_responses_are_schema_valid() {
        assert_eq!(
            parse_response(&take_response("A+", 0.95)).unwrap().decision,
            Decision::Take
        );
        assert_eq!(
            parse_response(&skip_response("B-", 0.4)).unwrap().decision,
            Decision::Skip
        );
    }

    #[test]
    fn scripted_plays_in_order_then_defaults() {
        let llm = ScriptedLlm::new(vec![
            Ok(take_response("A", 0.9)),
            Err(BackendError::Transient("blip".into())),
        ]);
        assert!(llm.call(&request()).is_ok());
        assert!(llm.call(&request()).is_err());
        // Exhausted: default skip
        let out = llm.call(&request()).unwrap();
        assert_eq!(parse_response(&out.text).unwrap().decision, Decision::Skip);
    }

    #[test]
    fn failing_recovers_after_n_calls() {
        let llm = FailingLlm::transient(2, take_response("A", 0.9));
        assert!(llm.call(&request()).is_err());
        assert!(llm.call(&request()).is_err());
        assert!(llm.call(&request()).is_ok());
    }

    #[test]
    fn static_latency_is_reported() {
        let llm = StaticLlm::always_skip().with_latency(7);
        assert_eq!(llm.call(&request()).unwrap().latency_ms, 7);
    }
}
