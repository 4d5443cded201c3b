//! Position ledger records and closure events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::candidate::Direction;
use crate::domain::ids::{CandidateId, PositionId, RunId};

/// Reason a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    TimeStop,
    EndOfRun,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeStop => "time_stop",
            ExitReason::EndOfRun => "end_of_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop_loss" => Some(ExitReason::StopLoss),
            "trailing_stop" => Some(ExitReason::TrailingStop),
            "take_profit" => Some(ExitReason::TakeProfit),
            "time_stop" => Some(ExitReason::TimeStop),
            "end_of_run" => Some(ExitReason::EndOfRun),
            _ => None,
        }
    }
}

/// Ledger row for a position.
///
/// The ledger is the sole source of truth for PnL: equity queries sum
/// `pnl_quote` over closed rows, never a cached aggregate. Live trailing
/// state is persisted here too so a resumed run can reconstruct open
/// positions exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub position_id: PositionId,
    pub run_id: RunId,
    pub candidate_id: CandidateId,
    pub symbol: String,
    pub direction: Direction,

    // Entry
    pub entry_timestamp: DateTime<Utc>,
    pub entry_bar_index: usize,
    /// Actual fill price (slippage applied).
    pub entry_price: f64,
    pub entry_fees_quote: f64,
    pub size_quote: f64,
    pub size_units: f64,
    pub atr_at_entry: f64,

    // Exit spec snapshot
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub time_stop_bars: usize,
    pub trailing_enabled: bool,
    pub trailing_activation_price: Option<f64>,
    pub trailing_distance_atr: Option<f64>,

    // Live exit state
    pub trailing_armed: bool,
    pub trailing_stop: Option<f64>,
    pub highest_high: f64,
    pub lowest_low: f64,

    // Close
    pub is_open: bool,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub exit_bar_index: Option<usize>,
    pub exit_price: Option<f64>,
    pub exit_fees_quote: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl_quote: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub r_multiple: Option<f64>,
}

/// Emitted by the position engine when an exit condition fires.
///
/// Carries everything the runner needs to persist the closure and the
/// outcome label in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureEvent {
    pub position_id: PositionId,
    pub candidate_id: CandidateId,
    pub symbol: String,
    pub direction: Direction,
    pub exit_bar_index: usize,
    pub exit_timestamp: DateTime<Utc>,
    /// Fill price after slippage.
    pub exit_price: f64,
    pub exit_fees_quote: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
    pub pnl_quote: f64,
    pub pnl_pct: f64,
    pub r_multiple: f64,
}
