//! Incremental indicator accumulators.
//!
//! Every accumulator updates in O(1) from its retained state, so a run over
//! N bars computes the full feature set in O(N). All states derive serde so
//! checkpoints can snapshot and restore the pipeline exactly.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod donchian;
pub mod ema;
pub mod macd;
pub mod rolling;
pub mod rsi;

pub use adx::Adx;
pub use atr::Atr;
pub use bollinger::BollingerBands;
pub use donchian::Donchian;
pub use ema::{Ema, Wilder};
pub use macd::Macd;
pub use rolling::RollingWindow;
pub use rsi::Rsi;

#[cfg(test)]
pub(crate) const TEST_EPSILON: f64 = 1e-9;

#[cfg(test)]
pub(crate) fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "expected {expected}, got {actual}"
    );
}
