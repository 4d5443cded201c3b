//! Append-only event records: decision events and outcome labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{CandidateId, PositionId, RunId};
use crate::domain::position::ExitReason;
use crate::llm::circuit::CircuitState;
use crate::llm::response::{Decision, SetupQuality};
use crate::schema::SchemaVersion;

/// One record per candidate evaluation, appended to `decision_events.jsonl`.
///
/// `timestamp` is the decision bar's timestamp (event time), and
/// `latency_ms` is backend-reported, so a rerun against a mock backend
/// reproduces the log byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub schema_version: SchemaVersion,
    pub candidate_id: CandidateId,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub playbook: String,
    pub bar_index: usize,

    // Decision
    pub decision: Decision,
    pub setup_quality: SetupQuality,
    pub confidence: f64,
    pub risk_flags: Vec<String>,
    pub notes: Option<String>,

    // Harness telemetry
    pub llm_raw_response: Option<String>,
    pub latency_ms: u64,
    pub retries: u32,
    pub fallback_used: bool,
    pub circuit_state: CircuitState,
    pub llm_error: Option<String>,

    // Gate outcome
    pub passed_gate: bool,
    pub rejection_reason: Option<String>,
    pub was_executed: bool,

    pub prompt_version: String,
}

/// Post-exit label attached to a candidate.
///
/// Written when the corresponding position closes. Skipped candidates stay
/// unlabeled; counterfactual labeling is a post-processing concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeLabel {
    pub schema_version: SchemaVersion,
    pub candidate_id: CandidateId,
    pub position_id: PositionId,
    pub pnl_quote: f64,
    pub actual_r_multiple: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_VERSION;
    use chrono::TimeZone;

    #[test]
    fn decision_event_json_roundtrip() {
        let event = DecisionEvent {
            schema_version: SCHEMA_VERSION,
            candidate_id: CandidateId("run:BTC-USD:10:breakout".into()),
            run_id: RunId::new("run"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            symbol: "BTC-USD".into(),
            playbook: "breakout".into(),
            bar_index: 10,
            decision: Decision::Take,
            setup_quality: SetupQuality::A,
            confidence: 0.85,
            risk_flags: vec!["late_entry".into()],
            notes: Some("strong volume".into()),
            llm_raw_response: Some("{\"decision\":\"take\"}".into()),
            latency_ms: 12,
            retries: 0,
            fallback_used: false,
            circuit_state: CircuitState::Closed,
            llm_error: None,
            passed_gate: true,
            rejection_reason: None,
            was_executed: true,
            prompt_version: "v1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DecisionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn outcome_label_json_roundtrip() {
        let label = OutcomeLabel {
            schema_version: SCHEMA_VERSION,
            candidate_id: CandidateId("run:BTC-USD:10:breakout".into()),
            position_id: PositionId("run:BTC-USD:11:p0".into()),
            pnl_quote: 120.5,
            actual_r_multiple: 1.6,
            exit_reason: ExitReason::TrailingStop,
            bars_held: 48,
        };
        let json = serde_json::to_string(&label).unwrap();
        let back: OutcomeLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(label, back);
    }
}
