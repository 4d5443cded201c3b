//! Fees and slippage.
//!
//! Entries are taker orders (cross the spread), exits are maker orders at
//! the trigger level. The static-spread slippage model worsens every fill
//! by half the configured spread.

use serde::{Deserialize, Serialize};

use crate::domain::Direction;

/// Whether the R-multiple divides out execution costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RMultipleBasis {
    /// Risk unit is the stop distance alone; fees excluded. Default.
    PreFee,
    /// Net PnL divided by risk notional; fees included.
    PostFee,
}

impl Default for RMultipleBasis {
    fn default() -> Self {
        RMultipleBasis::PreFee
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub fee_maker_bps: f64,
    pub fee_taker_bps: f64,
    pub slippage_bps: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fee_maker_bps: 6.0,
            fee_taker_bps: 12.5,
            slippage_bps: 3.0,
        }
    }
}

impl CostModel {
    fn half_spread_frac(&self) -> f64 {
        self.slippage_bps / 2.0 / 10_000.0
    }

    /// Entry fill: reference price worsened by half the spread.
    /// Longs buy higher, shorts sell lower.
    pub fn entry_fill(&self, reference: f64, direction: Direction) -> f64 {
        reference * (1.0 + direction.sign() * self.half_spread_frac())
    }

    /// Exit fill: trigger price worsened by half the spread.
    /// Longs sell lower, shorts buy higher.
    pub fn exit_fill(&self, reference: f64, direction: Direction) -> f64 {
        reference * (1.0 - direction.sign() * self.half_spread_frac())
    }

    pub fn taker_fee(&self, notional: f64) -> f64 {
        notional.abs() * self.fee_taker_bps / 10_000.0
    }

    pub fn maker_fee(&self, notional: f64) -> f64 {
        notional.abs() * self.fee_maker_bps / 10_000.0
    }
}
