//! Bollinger Bands: rolling mean with +/- k standard deviations.
//!
//! Before the window fills, all three bands collapse to the latest close.

use serde::{Deserialize, Serialize};

use crate::indicators::rolling::RollingWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerBands {
    window: RollingWindow,
    num_std: f64,
    upper: f64,
    mid: f64,
    lower: f64,
    width: f64,
    position: f64,
}

impl BollingerBands {
    pub fn new(period: usize, num_std: f64) -> Self {
        assert!(num_std > 0.0, "num_std must be positive");
        Self {
            window: RollingWindow::new(period),
            num_std,
            upper: 0.0,
            mid: 0.0,
            lower: 0.0,
            width: 0.0,
            position: 0.5,
        }
    }

    /// Returns (upper, mid, lower).
    pub fn update(&mut self, close: f64) -> (f64, f64, f64) {
        self.window.push(close);

        if !self.window.is_full() {
            self.mid = close;
            self.upper = close;
            self.lower = close;
            self.width = 0.0;
            self.position = 0.5;
            return (self.upper, self.mid, self.lower);
        }

        self.mid = self.window.mean();
        let std = self.window.std();
        self.upper = self.mid + self.num_std * std;
        self.lower = self.mid - self.num_std * std;

        self.width = if close.abs() > 1e-12 {
            (self.upper - self.lower) / close
        } else {
            0.0
        };

        let band_range = self.upper - self.lower;
        self.position = if band_range > 1e-12 {
            (close - self.lower) / band_range
        } else {
            0.5
        };

        (self.upper, self.mid, self.lower)
    }

    pub fn value(&self) -> (f64, f64, f64) {
        (self.upper, self.mid, self.lower)
    }

    /// Band width as a fraction of the latest close.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Close's position within the bands: 0 = lower band, 1 = upper band.
    pub fn position(&self) -> f64 {
        self.position
    }
}
