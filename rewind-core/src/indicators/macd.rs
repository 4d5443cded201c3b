//! MACD: fast EMA minus slow EMA, with a signal EMA over the MACD line.

use serde::{Deserialize, Serialize};

use crate::indicators::ema::Ema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macd {
    ema_fast: Ema,
    ema_slow: Ema,
    ema_signal: Ema,
    macd: f64,
    signal_line: f64,
    histogram: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "fast period must be shorter than slow");
        Self {
            ema_fast: Ema::new(fast),
            ema_slow: Ema::new(slow),
            ema_signal: Ema::new(signal),
            macd: 0.0,
            signal_line: 0.0,
            histogram: 0.0,
        }
    }

    /// Returns (macd_line, signal_line, histogram).
    pub fn update(&mut self, close: f64) -> (f64, f64, f64) {
        let fast = self.ema_fast.update(close);
        let slow = self.ema_slow.update(close);
        self.macd = fast - slow;
        self.signal_line = self.ema_signal.update(self.macd);
        self.histogram = self.macd - self.signal_line;
        (self.macd, self.signal_line, self.histogram)
    }

    pub fn value(&self) -> (f64, f64, f64) {
        (self.macd, self.signal_line, self.histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, TEST_EPSILON};

    #[test]
    fn constant_input_is_flat() {
        let mut macd = Macd::new(12, 26, 9);
        for _ in 0..100 {
            macd.update(100.0);
        }
        let (line, signal, hist) = macd.value();
        assert_approx(line, 0.0, TEST_EPSILON);
        assert_approx(signal, 0.0, TEST_EPSILON);
        assert_approx(hist, 0.0, TEST_EPSILON);
    }

    #[test]
    fn uptrend_produces_positive_macd() {
        let mut macd = Macd::new(12, 26, 9);
        for i in 0..60 {
            macd.update(100.0 + i as f64);
        }
        let (line, _, hist) = macd.value();
        assert!(line > 0.0, "fast EMA should lead in an uptrend");
        assert!(hist > 0.0, "histogram positive while momentum builds");
    }

    #[test]
    fn downtrend_produces_negative_macd() {
        let mut macd = Macd::new(12, 26, 9);
        for i in 0..60 {
            macd.update(200.0 - i as f64);
        }
        let (line, _, _) = macd.value();
        assert!(line < 0.0);
    }
}
