//! Pure exit-condition checks.
//!
//! Triggers evaluate against bar extremes: a stop is assumed reached if the
//! bar's range touched it, and fills happen at the trigger level. Time
//! stops fill at the bar close.

use crate::domain::{Bar, Direction};

/// Stop trigger: long fires when the bar traded down to the stop, short
/// when it traded up to it.
pub fn stop_hit(bar: &Bar, stop: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => bar.low <= stop,
        Direction::Short => bar.high >= stop,
    }
}

/// Take-profit trigger: long fires when the bar traded up to the target.
pub fn take_profit_hit(bar: &Bar, take_profit: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => bar.high >= take_profit,
        Direction::Short => bar.low <= take_profit,
    }
}

/// Time stop: bars held since entry reached the limit.
pub fn time_stop_hit(current_bar_index: usize, entry_bar_index: usize, time_stop_bars: usize) -> bool {
    current_bar_index.saturating_sub(entry_bar_index) >= time_stop_bars
}

/// Trailing activation: the favorable extreme crossed the activation level.
pub fn trailing_activated(extreme: f64, activation: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => extreme >= activation,
        Direction::Short => extreme <= activation,
    }
}

/// Trailing stop level from the favorable extreme, floored (long) or
/// ceilinged (short) at the entry price so the armed stop never locks in
/// a loss.
pub fn trailing_level(
    extreme: f64,
    atr_at_entry: f64,
    distance_atr: f64,
    entry_price: f64,
    direction: Direction,
) -> f64 {
    match direction {
        Direction::Long => (extreme - distance_atr * atr_at_entry).max(entry_price),
        Direction::Short => (extreme + distance_atr * atr_at_entry).min(entry_price),
    }
}
