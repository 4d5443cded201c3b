//! Run counters and the heartbeat: the core's one mandatory logging
//! surface.

use serde::{Deserialize, Serialize};
use tracing::info;

use rewind_core::llm::circuit::CircuitState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub bars_processed: u64,
    pub candidates_generated: u64,
    pub trades_taken: u64,
    pub positions_closed: u64,
    pub llm_calls: u64,
    pub llm_failures: u64,
}

/// Emits a heartbeat every N bars via `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    every: u64,
}

impl Heartbeat {
    pub fn new(every: u64) -> Self {
        assert!(every > 0, "heartbeat interval must be positive");
        Self { every }
    }

    pub fn maybe_emit(
        &self,
        counters: &RunCounters,
        open_positions: usize,
        equity_quote: f64,
        circuit_state: CircuitState,
    ) {
        if counters.bars_processed % self.every != 0 {
            return;
        }
        info!(
            bars = counters.bars_processed,
            candidates = counters.candidates_generated,
            trades = counters.trades_taken,
            closed = counters.positions_closed,
            llm_calls = counters.llm_calls,
            llm_failures = counters.llm_failures,
            open_positions,
            equity = equity_quote,
            circuit = circuit_state.as_str(),
            "run heartbeat"
        );
    }
}
