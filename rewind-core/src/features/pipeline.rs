//! Incremental feature pipeline.
//!
//! Maintains rolling state for every indicator and emits a
//! [`FeatureSnapshot`] per bar once `warmup_bars` have been consumed.
//! The whole pipeline serializes, so a checkpoint captures indicator
//! state exactly and a resumed run continues from the same values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::Bar;
use crate::features::snapshot::FeatureSnapshot;
use crate::indicators::{Adx, Atr, BollingerBands, Donchian, Ema, Macd, RollingWindow, Rsi};

/// Keys guaranteed present in every post-warmup snapshot.
pub const DECLARED_KEYS: &[&str] = &[
    "open", "high", "low", "close", "volume", "prev_close",
    "ret_1", "ret_4", "ret_16", "ret_96", "logret_1", "range_bps",
    "atr", "atr_bps", "atr_z_96", "realized_vol_96",
    "adx14", "di_plus_14", "di_minus_14", "trend_dir",
    "ema20", "ema50", "ema200", "ema20_slope_bps", "ema50_slope_bps",
    "rsi14", "macd", "macd_signal", "macd_hist",
    "donchian_high_32", "donchian_low_32", "breakout_dist_atr",
    "pullback_dist_ema20_atr", "pullback_dist_ema50_atr",
    "bb_upper", "bb_mid", "bb_lower", "bb_width_bps", "bb_pos",
    "vol_sma_96", "volume_ratio_96", "vol_z_96", "adv_quote",
    "chop_32", "spread_bps",
];

const Z_WINDOW: usize = 96;
const CHOP_LOOKBACK: usize = 32;
const SLOPE_LOOKBACK: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePipeline {
    symbol: String,
    warmup_bars: usize,
    spread_bps: f64,
    bar_count: usize,

    close_history: VecDeque<f64>,
    logret_history: VecDeque<f64>,

    ema20: Ema,
    ema50: Ema,
    ema200: Ema,
    ema20_history: VecDeque<f64>,
    ema50_history: VecDeque<f64>,

    atr: Atr,
    atr_bps_window: RollingWindow,
    adx: Adx,
    rsi: Rsi,
    macd: Macd,
    bb: BollingerBands,
    donchian: Donchian,

    volume_window: RollingWindow,
    turnover_window: RollingWindow,

    prev_close: Option<f64>,
}

impl FeaturePipeline {
    pub fn new(symbol: impl Into<String>, warmup_bars: usize, spread_bps: f64) -> Self {
        Self {
            symbol: symbol.into(),
            warmup_bars,
            spread_bps,
            bar_count: 0,
            close_history: VecDeque::with_capacity(200),
            logret_history: VecDeque::with_capacity(Z_WINDOW + 4),
            ema20: Ema::new(20),
            ema50: Ema::new(50),
            ema200: Ema::new(200),
            ema20_history: VecDeque::with_capacity(SLOPE_LOOKBACK + 1),
            ema50_history: VecDeque::with_capacity(SLOPE_LOOKBACK + 1),
            atr: Atr::new(14),
            atr_bps_window: RollingWindow::new(Z_WINDOW),
            adx: Adx::new(14),
            rsi: Rsi::new(14),
            macd: Macd::new(12, 26, 9),
            bb: BollingerBands::new(20, 2.0),
            donchian: Donchian::new(32),
            volume_window: RollingWindow::new(Z_WINDOW),
            turnover_window: RollingWindow::new(Z_WINDOW),
            prev_close: None,
        }
    }

    /// All keys a post-warmup snapshot contains. Pre-flight validation
    /// checks playbook requirements against this set.
    pub fn declared_keys() -> &'static [&'static str] {
        DECLARED_KEYS
    }

    pub fn bar_count(&self) -> usize {
        self.bar_count
    }

    pub fn is_warmed_up(&self) -> bool {
        self.bar_count >= self.warmup_bars
    }

    /// Consume one bar. Returns `None` until warmup completes, then a
    /// snapshot containing every declared key. Never panics on bar data:
    /// degenerate inputs resolve to the sentinel.
    pub fn on_bar(&mut self, bar: &Bar) -> Option<FeatureSnapshot> {
        self.bar_count += 1;
        let bar_index = self.bar_count - 1;

        let prev_close = self.prev_close;
        self.update_indicators(bar);

        if self.bar_count < self.warmup_bars {
            return None;
        }

        Some(self.compute_snapshot(bar, bar_index, prev_close, bar.timestamp))
    }

    fn update_indicators(&mut self, bar: &Bar) {
        let ema20_val = self.ema20.update(bar.close);
        let ema50_val = self.ema50.update(bar.close);
        self.ema200.update(bar.close);

        push_bounded(&mut self.ema20_history, ema20_val, SLOPE_LOOKBACK + 1);
        push_bounded(&mut self.ema50_history, ema50_val, SLOPE_LOOKBACK + 1);

        self.atr.update(bar.high, bar.low, bar.close);
        self.adx.update(bar.high, bar.low, bar.close);
        self.rsi.update(bar.close);
        self.macd.update(bar.close);
        self.bb.update(bar.close);
        self.donchian.update(bar.high, bar.low);

        self.volume_window.push(bar.volume);
        self.turnover_window.push(bar.close * bar.volume);

        if let Some(prev) = self.prev_close {
            if prev > 1e-12 && bar.close > 1e-12 {
                push_bounded(&mut self.logret_history, (bar.close / prev).ln(), Z_WINDOW);
            }
        }
        push_bounded(&mut self.close_history, bar.close, 200);
        self.prev_close = Some(bar.close);
    }

    fn compute_snapshot(
        &mut self,
        bar: &Bar,
        bar_index: usize,
        prev_close: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> FeatureSnapshot {
        let mut snap = FeatureSnapshot::new(self.symbol.clone(), bar_index, timestamp);
        let close = bar.close;

        // Price / returns
        snap.insert("open", bar.open);
        snap.insert("high", bar.high);
        snap.insert("low", bar.low);
        snap.insert("close", close);
        snap.insert("volume", bar.volume);
        snap.insert("prev_close", prev_close.unwrap_or(close));
        snap.insert("ret_1", self.lookback_return(close, 1));
        snap.insert("ret_4", self.lookback_return(close, 4));
        snap.insert("ret_16", self.lookback_return(close, 16));
        snap.insert("ret_96", self.lookback_return(close, 96));
        let logret_1 = match prev_close {
            Some(p) if p > 1e-12 && close > 1e-12 => (close / p).ln(),
            _ => 0.0,
        };
        snap.insert("logret_1", logret_1);
        snap.insert("range_bps", safe_div(bar.high - bar.low, close) * 10_000.0);

        // Volatility
        let atr_val = self.atr.value();
        snap.insert("atr", atr_val);
        let atr_bps = safe_div(atr_val, close) * 10_000.0;
        snap.insert("atr_bps", atr_bps);
        self.atr_bps_window.push(atr_bps);
        snap.insert(
            "atr_z_96",
            zscore(atr_bps, self.atr_bps_window.mean(), self.atr_bps_window.std()),
        );
        snap.insert("realized_vol_96", self.realized_vol());

        // Trend / regime
        let (adx_val, di_plus, di_minus) = self.adx.value();
        snap.insert("adx14", adx_val);
        snap.insert("di_plus_14", di_plus);
        snap.insert("di_minus_14", di_minus);
        let ema20_val = self.ema20.value();
        let ema50_val = self.ema50.value();
        let ema200_val = self.ema200.value();
        snap.insert("ema20", ema20_val);
        snap.insert("ema50", ema50_val);
        snap.insert("ema200", ema200_val);
        snap.insert("ema20_slope_bps", slope_bps(&self.ema20_history, SLOPE_LOOKBACK, close));
        snap.insert("ema50_slope_bps", slope_bps(&self.ema50_history, SLOPE_LOOKBACK, close));
        let trend_dir = if ema50_val > ema200_val {
            1.0
        } else if ema50_val < ema200_val {
            -1.0
        } else {
            0.0
        };
        snap.insert("trend_dir", trend_dir);

        // Momentum
        snap.insert("rsi14", self.rsi.value());
        let (macd_line, macd_signal, macd_hist) = self.macd.value();
        snap.insert("macd", macd_line);
        snap.insert("macd_signal", macd_signal);
        snap.insert("macd_hist", macd_hist);

        // Range / levels
        let (don_high, don_low) = self.donchian.value();
        snap.insert("donchian_high_32", don_high);
        snap.insert("donchian_low_32", don_low);
        snap.insert("breakout_dist_atr", safe_div(close - don_high, atr_val));
        snap.insert("pullback_dist_ema20_atr", safe_div(close - ema20_val, atr_val));
        snap.insert("pullback_dist_ema50_atr", safe_div(close - ema50_val, atr_val));
        let (bb_upper, bb_mid, bb_lower) = self.bb.value();
        snap.insert("bb_upper", bb_upper);
        snap.insert("bb_mid", bb_mid);
        snap.insert("bb_lower", bb_lower);
        snap.insert("bb_width_bps", self.bb.width() * 10_000.0);
        snap.insert("bb_pos", self.bb.position());

        // Volume / liquidity
        let turnover = close * bar.volume;
        if self.turnover_window.is_full() {
            snap.insert("adv_quote", self.turnover_window.mean());
        } else {
            snap.insert("adv_quote", turnover);
        }
        if self.volume_window.is_full() {
            let vol_sma = self.volume_window.mean();
            snap.insert("vol_sma_96", vol_sma);
            snap.insert(
                "volume_ratio_96",
                if vol_sma > 1e-12 { bar.volume / vol_sma } else { 1.0 },
            );
            snap.insert(
                "vol_z_96",
                zscore(bar.volume, vol_sma, self.volume_window.std()),
            );
        } else {
            snap.insert("vol_sma_96", bar.volume);
            snap.insert("volume_ratio_96", 1.0);
            snap.insert("vol_z_96", 0.0);
        }

        // Microstructure
        snap.insert("spread_bps", self.spread_bps);

        // Chop
        snap.insert("chop_32", self.chop_score());

        snap
    }

    fn lookback_return(&self, close: f64, lookback: usize) -> f64 {
        // close_history already contains the current close at the back
        if self.close_history.len() < lookback + 1 {
            return 0.0;
        }
        let past = self.close_history[self.close_history.len() - 1 - lookback];
        if past < 1e-12 {
            return 0.0;
        }
        close / past - 1.0
    }

    fn realized_vol(&self) -> f64 {
        if self.logret_history.len() < Z_WINDOW {
            return 0.0;
        }
        let n = self.logret_history.len() as f64;
        let mean: f64 = self.logret_history.iter().sum::<f64>() / n;
        let var: f64 = self
            .logret_history
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / n;
        var.sqrt()
    }

    /// Trend efficiency over the last 32 closes: 1 - net_move / path_length.
    /// 0 = perfectly trending, 1 = pure chop.
    fn chop_score(&self) -> f64 {
        if self.close_history.len() < CHOP_LOOKBACK {
            return 0.5;
        }
        let start = self.close_history.len() - CHOP_LOOKBACK;
        let prices: Vec<f64> = self.close_history.iter().skip(start).copied().collect();
        let net = (prices[prices.len() - 1] - prices[0]).abs();
        let path: f64 = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        if path < 1e-12 {
            return 0.5;
        }
        1.0 - net / path
    }
}

fn push_bounded(deque: &mut VecDeque<f64>, value: f64, cap: usize) {
    if deque.len() == cap {
        deque.pop_front();
    }
    deque.push_back(value);
}

/// Change over `lookback` samples, normalized by `reference` and scaled
/// to basis points. Zero until enough history exists.
fn slope_bps(history: &VecDeque<f64>, lookback: usize, reference: f64) -> f64 {
    if history.len() < lookback + 1 || reference.abs() < 1e-12 {
        return 0.0;
    }
    let current = history[history.len() - 1];
    let past = history[history.len() - 1 - lookback];
    (current - past) / reference * 10_000.0
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < 1e-12 {
        0.0
    } else {
        numerator / denominator
    }
}

fn zscore(value: f64, mean: f64, std: f64) -> f64 {
    if std < 1e-12 {
        0.0
    } else {
        (value - mean) / std
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars(n: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.37).sin() * 2.0;
                Bar::new(
                    t0 + Duration::minutes(15 * i as i64),
                    "BTC-USD".into(),
                    close - 0.2,
                    close + 1.0,
                    close - 1.0,
                    close,
                    50_000.0 + (i % 7) as f64 * 1_000.0,
                )
            })
            .collect()
    }

    #[test]
    fn returns_none_during_warmup() {
        let mut pipeline = FeaturePipeline::new("BTC-USD", 50, 1.5);
        let bars = bars(60);
        for (i, bar) in bars.iter().enumerate() {
            let snap = pipeline.on_bar(bar);
            if i + 1 < 50 {
                assert!(snap.is_none(), "bar {i} should still be warming up");
            } else {
                assert!(snap.is_some(), "bar {i} should emit a snapshot");
            }
        }
    }

    #[test]
    fn post_warmup_snapshot_has_all_declared_keys() {
        let mut pipeline = FeaturePipeline::new("BTC-USD", 40, 1.5);
        let mut last = None;
        for bar in bars(50) {
            last = pipeline.on_bar(&bar).or(last);
        }
        let snap = last.expect("warmup should have completed");
        let missing = snap.missing_keys(FeaturePipeline::declared_keys());
        assert!(missing.is_empty(), "missing keys: {missing:?}");
        assert!(snap.feature_ready);
    }

    #[test]
    fn ret_lookbacks_match_history() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut pipeline = FeaturePipeline::new("BTC-USD", 2, 1.5);
        let mut snap = None;
        for i in 0..6 {
            let close = 100.0 + i as f64; // 100, 101, ..., 105
            let bar = Bar::new(
                t0 + Duration::minutes(15 * i as i64),
                "BTC-USD".into(),
                close,
                close + 0.5,
                close - 0.5,
                close,
                1_000.0,
            );
            snap = pipeline.on_bar(&bar);
        }
        let snap = snap.unwrap();
        // ret_1 = 105/104 - 1
        assert!((snap.get("ret_1").unwrap() - (105.0 / 104.0 - 1.0)).abs() < 1e-12);
        // ret_4 = 105/101 - 1
        assert!((snap.get("ret_4").unwrap() - (105.0 / 101.0 - 1.0)).abs() < 1e-12);
        // Not enough history for ret_96
        assert_eq!(snap.get("ret_96"), Some(0.0));
    }

    #[test]
    fn trend_dir_reflects_ema_alignment() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut pipeline = FeaturePipeline::new("BTC-USD", 10, 1.5);
        let mut snap = None;
        for i in 0..300 {
            let close = 100.0 + i as f64 * 0.5;
            let bar = Bar::new(
                t0 + Duration::minutes(15 * i as i64),
                "BTC-USD".into(),
                close,
                close + 1.0,
                close - 1.0,
                close,
                1_000.0,
            );
            snap = pipeline.on_bar(&bar);
        }
        let snap = snap.unwrap();
        assert_eq!(snap.get("trend_dir"), Some(1.0));
        assert!(snap.get("ema20_slope_bps").unwrap() > 0.0);
    }

    #[test]
    fn checkpoint_roundtrip_preserves_state() {
        let mut pipeline = FeaturePipeline::new("BTC-USD", 10, 1.5);
        let all = bars(80);
        for bar in &all[..60] {
            pipeline.on_bar(bar);
        }
        let json = serde_json::to_string(&pipeline).unwrap();
        let mut restored: FeaturePipeline = serde_json::from_str(&json).unwrap();

        // Both pipelines must emit identical snapshots for the same tail
        for bar in &all[60..] {
            let a = pipeline.on_bar(bar);
            let b = restored.on_bar(bar);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn zero_price_resolves_to_sentinel_free_defaults() {
        // A degenerate bar (all zeros) must not panic; ratios fall back to 0
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut pipeline = FeaturePipeline::new("BTC-USD", 1, 1.5);
        let bar = Bar::new(t0, "BTC-USD".into(), 0.0, 0.0, 0.0, 0.0, 0.0);
        let snap = pipeline.on_bar(&bar).unwrap();
        assert_eq!(snap.get("range_bps"), Some(0.0));
        assert_eq!(snap.get("atr_bps"), Some(0.0));
    }
}
