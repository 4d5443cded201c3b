//! Relative Strength Index with Wilder smoothing.
//!
//! Separate Wilder EMAs over gains and losses; reports 50 until the first
//! price change is observed.

use serde::{Deserialize, Serialize};

use crate::indicators::ema::Wilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsi {
    gain_smooth: Wilder,
    loss_smooth: Wilder,
    prev_close: Option<f64>,
    value: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            gain_smooth: Wilder::new(period),
            loss_smooth: Wilder::new(period),
            prev_close: None,
            value: 50.0,
        }
    }

    pub fn update(&mut self, close: f64) -> f64 {
        let prev = match self.prev_close {
            Some(p) => p,
            None => {
                self.prev_close = Some(close);
                self.gain_smooth.update(0.0);
                self.loss_smooth.update(0.0);
                return 50.0;
            }
        };

        let change = close - prev;
        let avg_gain = self.gain_smooth.update(change.max(0.0));
        let avg_loss = self.loss_smooth.update((-change).max(0.0));

        self.value = if avg_loss < 1e-12 {
            if avg_gain > 1e-12 {
                100.0
            } else {
                50.0
            }
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        self.prev_close = Some(close);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_neutral() {
        let mut rsi = Rsi::new(14);
        assert_eq!(rsi.update(100.0), 50.0);
    }

    #[test]
    fn all_gains_pins_to_hundred() {
        let mut rsi = Rsi::new(14);
        for i in 0..20 {
            rsi.update(100.0 + i as f64);
        }
        assert_eq!(rsi.value(), 100.0);
    }

    #[test]
    fn all_losses_drops_low() {
        let mut rsi = Rsi::new(14);
        for i in 0..20 {
            rsi.update(100.0 - i as f64);
        }
        assert!(rsi.value() < 5.0);
    }

    #[test]
    fn mixed_moves_stay_in_range() {
        let mut rsi = Rsi::new(14);
        for i in 0..100 {
            let close = 100.0 + if i % 2 == 0 { 1.0 } else { -0.5 };
            rsi.update(close);
        }
        let v = rsi.value();
        assert!((0.0..=100.0).contains(&v));
    }
}
