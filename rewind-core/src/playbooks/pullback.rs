//! Pullback playbook.
//!
//! In an established trend, enters when price tags the EMA20 band and
//! reclaims it with a reversal confirmation. Long side shown; shorts are
//! mirrored against a downtrend.
//!
//! Entry conditions (all must hold, long side):
//! 1. ema50 > ema200 (uptrend regime)
//! 2. adx14 >= min_trend_strength
//! 3. low <= ema20 AND close >= ema20 (tag and reclaim)
//! 4. close >= open OR close > prev_close (reversal confirmation)
//! 5. rsi14 <= max_rsi (not overheated)
//! 6. optional: |pullback_dist_ema50_atr| <= max_dist_ema50_atr

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Bar, Direction};
use crate::features::snapshot::FeatureSnapshot;
use crate::playbooks::{CandidateSetup, ExitParams, Playbook};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PullbackParams {
    pub min_trend_strength: f64,
    /// RSI ceiling for longs; mirrored to `100 - max_rsi` as the floor for
    /// shorts.
    pub max_rsi: f64,
    pub max_dist_ema50_atr: f64,
    pub check_ema50_distance: bool,
}

impl Default for PullbackParams {
    fn default() -> Self {
        Self {
            min_trend_strength: 16.0,
            max_rsi: 55.0,
            max_dist_ema50_atr: 1.0,
            check_ema50_distance: true,
        }
    }
}

impl PullbackParams {
    pub fn with_overrides(mut self, params: &BTreeMap<String, f64>) -> Self {
        if let Some(&v) = params.get("min_trend_strength") {
            self.min_trend_strength = v;
        }
        if let Some(&v) = params.get("max_rsi") {
            self.max_rsi = v;
        }
        if let Some(&v) = params.get("max_dist_ema50_atr") {
            self.max_dist_ema50_atr = v;
        }
        if let Some(&v) = params.get("check_ema50_distance") {
            self.check_ema50_distance = v != 0.0;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct Pullback {
    params: PullbackParams,
    exits: ExitParams,
}

impl Pullback {
    pub fn new(params: PullbackParams, exits: ExitParams) -> Self {
        Self { params, exits }
    }

    fn quality_flags(
        &self,
        features: &FeatureSnapshot,
        direction: Direction,
    ) -> BTreeMap<String, bool> {
        let ema50 = features.get_or("ema50", 0.0);
        let ema200 = features.get_or("ema200", 0.0);
        let slope20 = features.get_or("ema20_slope_bps", 0.0);
        let slope50 = features.get_or("ema50_slope_bps", 0.0);
        let aligned = match direction {
            Direction::Long => ema50 > ema200 && slope20 > 0.0 && slope50 > 0.0,
            Direction::Short => ema50 < ema200 && slope20 < 0.0 && slope50 < 0.0,
        };

        let mut flags = BTreeMap::new();
        flags.insert("ema_alignment".to_string(), aligned);
        flags.insert(
            "pullback_depth_shallow".to_string(),
            features.get_or("pullback_dist_ema50_atr", 0.0).abs() < 0.5,
        );
        flags
    }
}

impl Playbook for Pullback {
    fn name(&self) -> &'static str {
        "pullback"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &[
            "close", "open", "low", "high", "prev_close", "atr", "adx14", "rsi14",
            "ema20", "ema50", "ema200", "pullback_dist_ema50_atr",
        ]
    }

    fn evaluate(&self, features: &FeatureSnapshot, _bar: &Bar) -> Option<CandidateSetup> {
        let close = features.get_or("close", 0.0);
        let atr = features.get_or("atr", 0.0);
        if close <= 0.0 || atr <= 0.0 {
            return None;
        }

        let adx = features.get_or("adx14", 0.0);
        if adx < self.params.min_trend_strength {
            return None;
        }

        let open = features.get_or("open", close);
        let low = features.get_or("low", close);
        let high = features.get_or("high", close);
        let prev_close = features.get_or("prev_close", close);
        let rsi = features.get_or("rsi14", 50.0);
        let ema20 = features.get_or("ema20", 0.0);
        let ema50 = features.get_or("ema50", 0.0);
        let ema200 = features.get_or("ema200", 0.0);
        let dist_ema50 = features.get_or("pullback_dist_ema50_atr", 0.0);

        let direction = if ema50 > ema200 {
            // Uptrend: tag EMA20 from above and reclaim
            let tagged = low <= ema20 && close >= ema20;
            let reversal = close >= open || close > prev_close;
            if !tagged || !reversal || rsi > self.params.max_rsi {
                return None;
            }
            Direction::Long
        } else if ema50 < ema200 {
            // Downtrend mirror: tag EMA20 from below and reject
            let tagged = high >= ema20 && close <= ema20;
            let reversal = close <= open || close < prev_close;
            if !tagged || !reversal || rsi < 100.0 - self.params.max_rsi {
                return None;
            }
            Direction::Short
        } else {
            return None;
        };

        if self.params.check_ema50_distance && dist_ema50.abs() > self.params.max_dist_ema50_atr {
            return None;
        }

        let dist_ema20_pct = if ema20.abs() > 1e-12 {
            (close - ema20) / ema20 * 100.0
        } else {
            0.0
        };
        let notes = format!(
            "Pullback {}: {:.2}% from EMA20, ADX={:.1}, RSI={:.1}, dist_to_EMA50={:.2}ATR",
            direction.as_str(),
            dist_ema20_pct,
            adx,
            rsi,
            dist_ema50,
        );

        Some(CandidateSetup {
            direction,
            entry_price: close,
            atr_at_entry: atr,
            exit_spec: self.exits.build_spec(close, atr, direction),
            quality_flags: self.quality_flags(features, direction),
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn exits() -> ExitParams {
        ExitParams {
            stop_loss_atr: 1.0,
            take_profit_atr: 1.8,
            time_stop_bars: 48,
            trailing_enabled: true,
            trailing_activation_r: 0.8,
            trailing_distance_atr: 1.0,
        }
    }

    fn bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "BTC-USD".into(),
            99.0,
            101.0,
            97.5,
            100.5,
            50_000.0,
        )
    }

    fn firing_features() -> FeatureSnapshot {
        let mut s = FeatureSnapshot::new(
            "BTC-USD".into(),
            500,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        s.insert("close", 100.5);
        s.insert("open", 99.0);
        s.insert("low", 97.5);
        s.insert("high", 101.0);
        s.insert("prev_close", 99.5);
        s.insert("atr", 2.0);
        s.insert("adx14", 20.0);
        s.insert("rsi14", 48.0);
        s.insert("ema20", 98.0); // low 97.5 tags, close 100.5 reclaims
        s.insert("ema50", 97.0);
        s.insert("ema200", 92.0);
        s.insert("pullback_dist_ema50_atr", 0.4);
        s.insert("ema20_slope_bps", 5.0);
        s.insert("ema50_slope_bps", 3.0);
        s
    }

    #[test]
    fn fires_long_on_tag_and_reclaim() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let setup = pb.evaluate(&firing_features(), &bar()).expect("should fire");
        assert_eq!(setup.direction, Direction::Long);
        assert!((setup.exit_spec.stop_loss_price - 98.5).abs() < 1e-12);
        assert!(setup.quality_flags["ema_alignment"]);
        assert!(setup.quality_flags["pullback_depth_shallow"]);
    }

    #[test]
    fn holds_without_trend_regime() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        f.insert("ema50", 90.0); // below ema200: downtrend rules apply, no short tag
        f.insert("ema200", 92.0);
        assert!(pb.evaluate(&f, &bar()).is_none());
    }

    #[test]
    fn holds_when_ema20_not_tagged() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        f.insert("low", 99.0); // never touched ema20 at 98
        assert!(pb.evaluate(&f, &bar()).is_none());
    }

    #[test]
    fn holds_when_overheated() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        f.insert("rsi14", 70.0);
        assert!(pb.evaluate(&f, &bar()).is_none());
    }

    #[test]
    fn holds_when_too_far_from_ema50() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        f.insert("pullback_dist_ema50_atr", 1.8);
        assert!(pb.evaluate(&f, &bar()).is_none());
    }

    #[test]
    fn distance_check_can_be_disabled() {
        let params = PullbackParams {
            check_ema50_distance: false,
            ..PullbackParams::default()
        };
        let pb = Pullback::new(params, exits());
        let mut f = firing_features();
        f.insert("pullback_dist_ema50_atr", 1.8);
        assert!(pb.evaluate(&f, &bar()).is_some());
    }

    #[test]
    fn fires_short_in_downtrend_mirror() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        // Downtrend: ema50 < ema200, price tags ema20 from below and rejects
        f.insert("ema50", 105.0);
        f.insert("ema200", 110.0);
        f.insert("ema20", 102.0);
        f.insert("close", 100.5);
        f.insert("open", 102.5);
        f.insert("high", 102.5); // tags ema20
        f.insert("low", 100.0);
        f.insert("prev_close", 101.5);
        f.insert("rsi14", 52.0);
        f.insert("pullback_dist_ema50_atr", -0.4);
        let setup = pb.evaluate(&f, &bar()).expect("short pullback should fire");
        assert_eq!(setup.direction, Direction::Short);
        assert!(setup.exit_spec.stop_loss_price > 100.5);
    }

    #[test]
    fn reversal_confirmation_is_required() {
        let pb = Pullback::new(PullbackParams::default(), exits());
        let mut f = firing_features();
        f.insert("open", 101.0); // bearish bar
        f.insert("close", 100.5);
        f.insert("prev_close", 100.5); // and not a higher close
        assert!(pb.evaluate(&f, &bar()).is_none());
    }
}
