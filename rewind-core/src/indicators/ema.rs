//! Exponential moving averages.
//!
//! `Ema`: standard smoothing with alpha = 2/(period+1), seeded with the
//! first observed value.
//! `Wilder`: Wilder's smoothing with alpha = 1/period (used by ATR, RSI,
//! and ADX).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    period: usize,
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        if self.initialized {
            self.value = self.alpha * price + (1.0 - self.alpha) * self.value;
        } else {
            self.value = price;
            self.initialized = true;
        }
        self.value
    }

    /// Last computed value (0.0 before the first update).
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

/// Wilder's smoothing: `v[t] = v[t-1] + (x - v[t-1]) / period`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wilder {
    period: usize,
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Wilder {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "Wilder period must be >= 1");
        Self {
            period,
            alpha: 1.0 / period as f64,
            value: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if self.initialized {
            self.value += self.alpha * (x - self.value);
        } else {
            self.value = x;
            self.initialized = true;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}
