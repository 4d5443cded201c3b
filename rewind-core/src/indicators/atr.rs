//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|).
//! ATR uses Wilder smoothing (alpha = 1/period). The first bar has no
//! previous close, so its TR is just high-low.

use serde::{Deserialize, Serialize};

use crate::indicators::ema::Wilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atr {
    wilder: Wilder,
    prev_close: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            wilder: Wilder::new(period),
            prev_close: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let tr = match self.prev_close {
            Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
            None => high - low,
        };
        self.prev_close = Some(close);
        self.wilder.update(tr)
    }

    pub fn value(&self) -> f64 {
        self.wilder.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, TEST_EPSILON};

    #[test]
    fn first_bar_uses_high_low_range() {
        let mut atr = Atr::new(14);
        assert_approx(atr.update(105.0, 95.0, 102.0), 10.0, TEST_EPSILON);
    }

    #[test]
    fn gap_up_uses_prev_close_distance() {
        let mut atr = Atr::new(1); // alpha = 1, ATR equals latest TR
        atr.update(102.0, 97.0, 100.0);
        // TR = max(115-108, |115-100|, |108-100|) = 15
        assert_approx(atr.update(115.0, 108.0, 112.0), 15.0, TEST_EPSILON);
    }

    #[test]
    fn wilder_smoothing_over_three_bars() {
        let mut atr = Atr::new(2); // alpha = 0.5
        atr.update(105.0, 95.0, 102.0); // TR = 10, ATR = 10
        atr.update(108.0, 100.0, 106.0); // TR = 8, ATR = 9
        // TR = max(9, |107-106|, |98-106|) = 9, ATR = 0.5*9 + 0.5*9 = 9
        assert_approx(atr.update(107.0, 98.0, 99.0), 9.0, TEST_EPSILON);
    }
}
