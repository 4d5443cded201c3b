//! Multi-position lifecycle manager.
//!
//! Owns all live position state for a run. Opens positions from accepted
//! candidates with entry fills (taker fee + half-spread slippage), updates
//! every open position per bar, and produces closure events with realized
//! PnL and R-multiples. Exit evaluation is pure; persistence stays with
//! the runner.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{Bar, Candidate, ClosureEvent, ExitReason, PositionId, RunId};
use crate::positions::costs::{CostModel, RMultipleBasis};
use crate::positions::position::{ExitTrigger, OpenPosition};

pub struct PositionManager {
    run_id: RunId,
    costs: CostModel,
    r_basis: RMultipleBasis,
    /// BTreeMap so per-bar iteration order is deterministic.
    positions: BTreeMap<PositionId, OpenPosition>,
    /// Per-bar opening ordinal, reset when the entry bar advances.
    last_entry_bar: Option<usize>,
    entry_seq: usize,
}

impl PositionManager {
    pub fn new(run_id: RunId, costs: CostModel, r_basis: RMultipleBasis) -> Self {
        Self {
            run_id,
            costs,
            r_basis,
            positions: BTreeMap::new(),
            last_entry_bar: None,
            entry_seq: 0,
        }
    }

    /// Open a position from an accepted candidate.
    ///
    /// `fill_reference` is the configured fill price (next bar's open by
    /// default); slippage and the taker fee are applied here. Returns a
    /// clone of the created position for persistence.
    pub fn open(
        &mut self,
        candidate: &Candidate,
        fill_reference: f64,
        size_quote: f64,
        entry_bar_index: usize,
        entry_timestamp: DateTime<Utc>,
    ) -> OpenPosition {
        if self.last_entry_bar != Some(entry_bar_index) {
            self.last_entry_bar = Some(entry_bar_index);
            self.entry_seq = 0;
        }
        let position_id = PositionId::for_entry(
            &self.run_id,
            &candidate.symbol,
            entry_bar_index,
            self.entry_seq,
        );
        self.entry_seq += 1;

        let fill_price = self.costs.entry_fill(fill_reference, candidate.direction);
        let entry_fees = self.costs.taker_fee(size_quote);
        let size_units = size_quote / fill_price;

        let position = OpenPosition::from_candidate(
            candidate,
            position_id.clone(),
            fill_price,
            size_quote,
            size_units,
            entry_fees,
            entry_bar_index,
            entry_timestamp,
        );
        self.positions.insert(position_id, position.clone());
        position
    }

    /// Evaluate exits for every open position in `bar`'s symbol.
    ///
    /// At most one exit fires per position per bar; surviving positions
    /// have their trailing state advanced. Closed positions are removed
    /// from the live set.
    pub fn update(&mut self, bar: &Bar, bar_index: usize) -> Vec<ClosureEvent> {
        let mut closures = Vec::new();
        let mut closed_ids = Vec::new();

        for (id, position) in self.positions.iter_mut() {
            if position.symbol != bar.symbol {
                continue;
            }
            if let Some(trigger) = position.update_bar(bar, bar_index) {
                closures.push(Self::closure_for(
                    &self.costs,
                    self.r_basis,
                    position,
                    trigger,
                    bar.timestamp,
                    bar_index,
                ));
                closed_ids.push(id.clone());
            }
        }

        for id in closed_ids {
            self.positions.remove(&id);
        }
        closures
    }

    /// Force-close every open position in `bar`'s symbol at the close.
    pub fn force_close_symbol(&mut self, bar: &Bar, bar_index: usize) -> Vec<ClosureEvent> {
        let mut closures = Vec::new();
        let mut closed_ids = Vec::new();

        for (id, position) in self.positions.iter_mut() {
            if position.symbol != bar.symbol {
                continue;
            }
            let trigger = ExitTrigger {
                reason: ExitReason::EndOfRun,
                fill_reference: bar.close,
            };
            closures.push(Self::closure_for(
                &self.costs,
                self.r_basis,
                position,
                trigger,
                bar.timestamp,
                bar_index,
            ));
            closed_ids.push(id.clone());
        }

        for id in closed_ids {
            self.positions.remove(&id);
        }
        closures
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Total open notional at entry prices.
    pub fn exposure_quote(&self) -> f64 {
        self.positions.values().map(|p| p.size_quote).sum()
    }

    /// Restore live positions from ledger rows (resume path).
    pub fn restore(&mut self, positions: Vec<OpenPosition>) {
        for position in positions {
            self.positions.insert(position.position_id.clone(), position);
        }
    }

    fn closure_for(
        costs: &CostModel,
        r_basis: RMultipleBasis,
        position: &OpenPosition,
        trigger: ExitTrigger,
        exit_timestamp: DateTime<Utc>,
        exit_bar_index: usize,
    ) -> ClosureEvent {
        let sign = position.direction.sign();
        let exit_price = costs.exit_fill(trigger.fill_reference, position.direction);
        let exit_notional = exit_price * position.size_units;
        let exit_fees = costs.maker_fee(exit_notional);

        let gross = (exit_price - position.entry_price) * position.size_units * sign;
        let net = gross - position.entry_fees_quote - exit_fees;
        let pnl_pct = if position.size_quote > 0.0 {
            net / position.size_quote
        } else {
            0.0
        };

        let stop_distance = (position.entry_price - position.stop_loss_price) * sign;
        let r_multiple = match r_basis {
            RMultipleBasis::PreFee => {
                if stop_distance.abs() > 1e-12 {
                    (exit_price - position.entry_price) * sign / stop_distance
                } else {
                    0.0
                }
            }
            RMultipleBasis::PostFee => {
                let risk_notional = stop_distance * position.size_units;
                if risk_notional.abs() > 1e-12 {
                    net / risk_notional
                } else {
                    0.0
                }
            }
        };

        ClosureEvent {
            position_id: position.position_id.clone(),
            candidate_id: position.candidate_id.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            exit_bar_index,
            exit_timestamp,
            exit_price,
            exit_fees_quote: exit_fees,
            exit_reason: trigger.reason,
            bars_held: position.bars_held(exit_bar_index),
            pnl_quote: net,
            pnl_pct,
            r_multiple,
        }
    }
}
