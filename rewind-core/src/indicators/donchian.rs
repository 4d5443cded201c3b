//! Donchian channels: highest high and lowest low over the prior window.
//!
//! The current bar is excluded: a breakout compares the current close
//! against the extremes of the preceding `period` bars.

use serde::{Deserialize, Serialize};

use crate::indicators::rolling::RollingWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donchian {
    highs: RollingWindow,
    lows: RollingWindow,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    upper: f64,
    lower: f64,
}

impl Donchian {
    pub fn new(period: usize) -> Self {
        Self {
            highs: RollingWindow::new(period),
            lows: RollingWindow::new(period),
            prev_high: None,
            prev_low: None,
            upper: 0.0,
            lower: 0.0,
        }
    }

    /// Returns (upper_channel, lower_channel).
    pub fn update(&mut self, high: f64, low: f64) -> (f64, f64) {
        // Fold the previous bar into the window; the current bar stays out
        if let (Some(ph), Some(pl)) = (self.prev_high, self.prev_low) {
            self.highs.push(ph);
            self.lows.push(pl);
        }

        if self.highs.is_empty() {
            self.upper = high;
            self.lower = low;
        } else {
            self.upper = self.highs.max();
            self.lower = self.lows.min();
        }

        self.prev_high = Some(high);
        self.prev_low = Some(low);
        (self.upper, self.lower)
    }

    pub fn value(&self) -> (f64, f64) {
        (self.upper, self.lower)
    }
}
