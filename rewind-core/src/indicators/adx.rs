//! Average Directional Index with +DI / -DI.
//!
//! Wilder smoothing throughout: smoothed TR, +DM, -DM produce the
//! directional indicators, and DX is smoothed again into ADX.

use serde::{Deserialize, Serialize};

use crate::indicators::ema::Wilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adx {
    tr_smooth: Wilder,
    plus_dm_smooth: Wilder,
    minus_dm_smooth: Wilder,
    dx_smooth: Wilder,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,
    adx: f64,
    di_plus: f64,
    di_minus: f64,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            tr_smooth: Wilder::new(period),
            plus_dm_smooth: Wilder::new(period),
            minus_dm_smooth: Wilder::new(period),
            dx_smooth: Wilder::new(period),
            prev_high: None,
            prev_low: None,
            prev_close: None,
            adx: 0.0,
            di_plus: 0.0,
            di_minus: 0.0,
        }
    }

    /// Returns (adx, +DI, -DI). All zero on the first bar.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> (f64, f64, f64) {
        let (prev_high, prev_low, prev_close) =
            match (self.prev_high, self.prev_low, self.prev_close) {
                (Some(h), Some(l), Some(c)) => (h, l, c),
                _ => {
                    self.prev_high = Some(high);
                    self.prev_low = Some(low);
                    self.prev_close = Some(close);
                    self.tr_smooth.update(high - low);
                    self.plus_dm_smooth.update(0.0);
                    self.minus_dm_smooth.update(0.0);
                    return (0.0, 0.0, 0.0);
                }
            };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };

        let tr_s = self.tr_smooth.update(tr);
        let plus_s = self.plus_dm_smooth.update(plus_dm);
        let minus_s = self.minus_dm_smooth.update(minus_dm);

        if tr_s > 1e-12 {
            self.di_plus = 100.0 * plus_s / tr_s;
            self.di_minus = 100.0 * minus_s / tr_s;
        } else {
            self.di_plus = 0.0;
            self.di_minus = 0.0;
        }

        let di_sum = self.di_plus + self.di_minus;
        let dx = if di_sum > 1e-12 {
            100.0 * (self.di_plus - self.di_minus).abs() / di_sum
        } else {
            0.0
        };
        self.adx = self.dx_smooth.update(dx);

        self.prev_high = Some(high);
        self.prev_low = Some(low);
        self.prev_close = Some(close);

        (self.adx, self.di_plus, self.di_minus)
    }

    pub fn value(&self) -> (f64, f64, f64) {
        (self.adx, self.di_plus, self.di_minus)
    }
}
