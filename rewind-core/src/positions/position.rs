//! Live state of one open position, including the trailing-stop machine.
//!
//! Intrabar simultaneity is resolved worst-case: when one bar's range
//! triggers several exits, they resolve stop loss -> trailing stop ->
//! take profit -> time stop, so a triggered stop always wins over a
//! triggered target in the same bar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Candidate, CandidateId, Direction, ExitReason, PositionId, PositionRow, RunId};
use crate::positions::exits;

/// A fired exit condition: the reason plus the raw trigger level
/// (pre-slippage fill reference).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitTrigger {
    pub reason: ExitReason,
    pub fill_reference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub position_id: PositionId,
    pub run_id: RunId,
    pub candidate_id: CandidateId,
    pub symbol: String,
    pub direction: Direction,

    pub entry_price: f64,
    pub entry_bar_index: usize,
    pub entry_timestamp: DateTime<Utc>,
    pub size_quote: f64,
    pub size_units: f64,
    pub entry_fees_quote: f64,
    pub atr_at_entry: f64,

    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub time_stop_bars: usize,
    pub trailing_enabled: bool,
    pub trailing_activation_price: Option<f64>,
    pub trailing_distance_atr: Option<f64>,

    /// Armed once the favorable extreme crosses the activation level.
    pub trailing_armed: bool,
    /// Monotone under the ratchet: never loosens once set.
    pub trailing_stop: Option<f64>,
    pub highest_high: f64,
    pub lowest_low: f64,
}

impl OpenPosition {
    /// Evaluate exits for this bar, then advance trailing state.
    ///
    /// Exits are checked against the stop levels as they stood entering
    /// the bar; extremes, arming, and the ratchet advance only when no
    /// exit fired. Returns at most one trigger per bar.
    pub fn update_bar(&mut self, bar: &Bar, bar_index: usize) -> Option<ExitTrigger> {
        // 1. Stop loss (original stop, highest priority)
        if exits::stop_hit(bar, self.stop_loss_price, self.direction) {
            return Some(ExitTrigger {
                reason: ExitReason::StopLoss,
                fill_reference: self.stop_loss_price,
            });
        }

        // 2. Trailing stop, at the effective level
        if self.trailing_armed {
            let level = self.effective_stop();
            if exits::stop_hit(bar, level, self.direction) {
                return Some(ExitTrigger {
                    reason: ExitReason::TrailingStop,
                    fill_reference: level,
                });
            }
        }

        // 3. Take profit
        if exits::take_profit_hit(bar, self.take_profit_price, self.direction) {
            return Some(ExitTrigger {
                reason: ExitReason::TakeProfit,
                fill_reference: self.take_profit_price,
            });
        }

        // 4. Time stop, filled at the close
        if exits::time_stop_hit(bar_index, self.entry_bar_index, self.time_stop_bars) {
            return Some(ExitTrigger {
                reason: ExitReason::TimeStop,
                fill_reference: bar.close,
            });
        }

        self.advance_trailing(bar);
        None
    }

    /// The stop level trailing checks run against: the trailing stop never
    /// undercuts the original stop.
    pub fn effective_stop(&self) -> f64 {
        match (self.trailing_stop, self.direction) {
            (Some(ts), Direction::Long) => ts.max(self.stop_loss_price),
            (Some(ts), Direction::Short) => ts.min(self.stop_loss_price),
            (None, _) => self.stop_loss_price,
        }
    }

    pub fn bars_held(&self, current_bar_index: usize) -> usize {
        current_bar_index.saturating_sub(self.entry_bar_index)
    }

    fn advance_trailing(&mut self, bar: &Bar) {
        self.highest_high = self.highest_high.max(bar.high);
        self.lowest_low = self.lowest_low.min(bar.low);

        if !self.trailing_enabled {
            return;
        }
        let (Some(activation), Some(distance)) =
            (self.trailing_activation_price, self.trailing_distance_atr)
        else {
            return;
        };

        let extreme = match self.direction {
            Direction::Long => self.highest_high,
            Direction::Short => self.lowest_low,
        };

        if !self.trailing_armed {
            if exits::trailing_activated(extreme, activation, self.direction) {
                self.trailing_armed = true;
                self.trailing_stop = Some(exits::trailing_level(
                    extreme,
                    self.atr_at_entry,
                    distance,
                    self.entry_price,
                    self.direction,
                ));
            }
            return;
        }

        // Armed: ratchet toward the extreme, never loosen
        let proposed = exits::trailing_level(
            extreme,
            self.atr_at_entry,
            distance,
            self.entry_price,
            self.direction,
        );
        self.trailing_stop = Some(match (self.trailing_stop, self.direction) {
            (Some(current), Direction::Long) => current.max(proposed),
            (Some(current), Direction::Short) => current.min(proposed),
            (None, _) => proposed,
        });
    }

    /// Ledger row for this position as currently open.
    pub fn to_row(&self) -> PositionRow {
        PositionRow {
            position_id: self.position_id.clone(),
            run_id: self.run_id.clone(),
            candidate_id: self.candidate_id.clone(),
            symbol: self.symbol.clone(),
            direction: self.direction,
            entry_timestamp: self.entry_timestamp,
            entry_bar_index: self.entry_bar_index,
            entry_price: self.entry_price,
            entry_fees_quote: self.entry_fees_quote,
            size_quote: self.size_quote,
            size_units: self.size_units,
            atr_at_entry: self.atr_at_entry,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
            time_stop_bars: self.time_stop_bars,
            trailing_enabled: self.trailing_enabled,
            trailing_activation_price: self.trailing_activation_price,
            trailing_distance_atr: self.trailing_distance_atr,
            trailing_armed: self.trailing_armed,
            trailing_stop: self.trailing_stop,
            highest_high: self.highest_high,
            lowest_low: self.lowest_low,
            is_open: true,
            exit_timestamp: None,
            exit_bar_index: None,
            exit_price: None,
            exit_fees_quote: None,
            exit_reason: None,
            pnl_quote: None,
            pnl_pct: None,
            r_multiple: None,
        }
    }

    /// Rebuild live state from an open ledger row (resume path).
    pub fn from_row(row: &PositionRow) -> Self {
        Self {
            position_id: row.position_id.clone(),
            run_id: row.run_id.clone(),
            candidate_id: row.candidate_id.clone(),
            symbol: row.symbol.clone(),
            direction: row.direction,
            entry_price: row.entry_price,
            entry_bar_index: row.entry_bar_index,
            entry_timestamp: row.entry_timestamp,
            size_quote: row.size_quote,
            size_units: row.size_units,
            entry_fees_quote: row.entry_fees_quote,
            atr_at_entry: row.atr_at_entry,
            stop_loss_price: row.stop_loss_price,
            take_profit_price: row.take_profit_price,
            time_stop_bars: row.time_stop_bars,
            trailing_enabled: row.trailing_enabled,
            trailing_activation_price: row.trailing_activation_price,
            trailing_distance_atr: row.trailing_distance_atr,
            trailing_armed: row.trailing_armed,
            trailing_stop: row.trailing_stop,
            highest_high: row.highest_high,
            lowest_low: row.lowest_low,
        }
    }

    /// Open a position from an accepted candidate at the given fill.
    #[allow(clippy::too_many_arguments)]
    pub fn from_candidate(
        candidate: &Candidate,
        position_id: PositionId,
        fill_price: f64,
        size_quote: f64,
        size_units: f64,
        entry_fees_quote: f64,
        entry_bar_index: usize,
        entry_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position_id,
            run_id: candidate.run_id.clone(),
            candidate_id: candidate.candidate_id.clone(),
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            entry_price: fill_price,
            entry_bar_index,
            entry_timestamp,
            size_quote,
            size_units,
            entry_fees_quote,
            atr_at_entry: candidate.atr_at_entry,
            stop_loss_price: candidate.exit_spec.stop_loss_price,
            take_profit_price: candidate.exit_spec.take_profit_price,
            time_stop_bars: candidate.exit_spec.time_stop_bars,
            trailing_enabled: candidate.exit_spec.trailing_enabled,
            trailing_activation_price: candidate.exit_spec.trailing_activation_price,
            trailing_distance_atr: candidate.exit_spec.trailing_distance_atr,
            trailing_armed: false,
            trailing_stop: None,
            highest_high: fill_price,
            lowest_low: fill_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Utc::now(), "BTC-USD".into(), close, high, low, close, 1000.0)
    }

    fn long_position() -> OpenPosition {
        OpenPosition {
            position_id: PositionId("run:BTC-USD:10:p0".into()),
            run_id: RunId::new("run"),
            candidate_id: CandidateId("run:BTC-USD:9:breakout".into()),
            symbol: "BTC-USD".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            entry_bar_index: 10,
            entry_timestamp: Utc::now(),
            size_quote: 1000.0,
            size_units: 10.0,
            entry_fees_quote: 1.25,
            atr_at_entry: 2.0,
            stop_loss_price: 97.6,
            take_profit_price: 110.0,
            time_stop_bars: 32,
            trailing_enabled: true,
            trailing_activation_price: Some(102.4),
            trailing_distance_atr: Some(1.2),
            trailing_armed: false,
            trailing_stop: None,
            highest_high: 100.0,
            lowest_low: 100.0,
        }
    }

    #[test]
    fn stop_loss_fires_at_original_stop() {
        let mut pos = long_position();
        let trigger = pos.update_bar(&bar(101.0, 97.0, 98.0), 11).unwrap();
        assert_eq!(trigger.reason, ExitReason::StopLoss);
        assert_eq!(trigger.fill_reference, 97.6);
    }

    #[test]
    fn stop_loss_wins_over_take_profit_in_same_bar() {
        let mut pos = long_position();
        // Bar range covers both the stop (97.6) and the target (110.0)
        let trigger = pos.update_bar(&bar(111.0, 97.0, 105.0), 11).unwrap();
        assert_eq!(trigger.reason, ExitReason::StopLoss);
    }

    #[test]
    fn take_profit_fires_at_target() {
        let mut pos = long_position();
        let trigger = pos.update_bar(&bar(110.5, 104.0, 109.0), 11).unwrap();
        assert_eq!(trigger.reason, ExitReason::TakeProfit);
        assert_eq!(trigger.fill_reference, 110.0);
    }

    #[test]
    fn time_stop_fills_at_close() {
        let mut pos = long_position();
        pos.trailing_enabled = false;
        let trigger = pos.update_bar(&bar(101.0, 99.0, 100.5), 42).unwrap();
        assert_eq!(trigger.reason, ExitReason::TimeStop);
        assert_eq!(trigger.fill_reference, 100.5);
    }

    #[test]
    fn trailing_arms_after_activation_crossed() {
        let mut pos = long_position();
        assert!(pos.update_bar(&bar(103.0, 101.0, 102.5), 11).is_none());
        assert!(pos.trailing_armed);
        // stop = max(entry, 103 - 1.2*2) = max(100, 100.6) = 100.6
        assert!((pos.trailing_stop.unwrap() - 100.6).abs() < 1e-12);
    }

    #[test]
    fn trailing_stop_ratchets_up_never_down() {
        let mut pos = long_position();
        pos.update_bar(&bar(103.0, 101.0, 102.5), 11); // arms at 100.6
        pos.update_bar(&bar(106.0, 102.0, 105.0), 12); // hh 106 -> 103.6
        assert!((pos.trailing_stop.unwrap() - 103.6).abs() < 1e-12);
        // Pullback bar that stays above the stop: no loosening
        pos.update_bar(&bar(105.0, 103.8, 104.0), 13);
        assert!((pos.trailing_stop.unwrap() - 103.6).abs() < 1e-12);
    }

    #[test]
    fn trailing_exit_fires_at_armed_level() {
        let mut pos = long_position();
        pos.update_bar(&bar(103.0, 101.0, 102.5), 11);
        pos.update_bar(&bar(106.0, 102.0, 105.0), 12); // stop now 103.6
        let trigger = pos.update_bar(&bar(105.0, 103.0, 103.2), 13).unwrap();
        assert_eq!(trigger.reason, ExitReason::TrailingStop);
        assert!((trigger.fill_reference - 103.6).abs() < 1e-12);
    }

    #[test]
    fn exits_use_levels_as_of_bar_open() {
        // A single wide bar crosses the activation and falls back; the
        // trailing state only advances after the exit checks, so no
        // trailing exit can fire from the same bar that armed it.
        let mut pos = long_position();
        assert!(pos.update_bar(&bar(104.0, 99.0, 99.5), 11).is_none());
        assert!(pos.trailing_armed);
    }

    #[test]
    fn short_trailing_is_mirrored() {
        let mut pos = long_position();
        pos.direction = Direction::Short;
        pos.stop_loss_price = 102.4;
        pos.take_profit_price = 90.0;
        pos.trailing_activation_price = Some(97.6);
        pos.highest_high = 100.0;
        pos.lowest_low = 100.0;

        assert!(pos.update_bar(&bar(99.0, 97.0, 97.5), 11).is_none());
        assert!(pos.trailing_armed);
        // stop = min(entry, 97 + 2.4) = min(100, 99.4) = 99.4
        assert!((pos.trailing_stop.unwrap() - 99.4).abs() < 1e-12);

        pos.update_bar(&bar(98.0, 95.0, 95.5), 12); // ll 95 -> 97.4
        assert!((pos.trailing_stop.unwrap() - 97.4).abs() < 1e-12);
    }

    #[test]
    fn row_roundtrip_preserves_state() {
        let mut pos = long_position();
        pos.update_bar(&bar(103.0, 101.0, 102.5), 11);
        let row = pos.to_row();
        let restored = OpenPosition::from_row(&row);
        assert_eq!(pos, restored);
    }
}
