//! Breakout playbook.
//!
//! Trades continuation when price breaks the Donchian channel with trend
//! and volume confirmation. Long on an upper break above EMA200, short on
//! a lower break below EMA200.
//!
//! Entry conditions (all must hold, long side shown):
//! 1. close >= donchian_high_32 + break_buffer_atr * ATR
//! 2. adx14 >= min_trend_strength
//! 3. close > ema200
//! 4. volume_ratio_96 >= min_vol_ratio OR vol_z_96 >= min_vol_z
//! 5. adv_quote >= min_adv_quote

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Bar, Direction};
use crate::features::snapshot::FeatureSnapshot;
use crate::playbooks::{CandidateSetup, ExitParams, Playbook};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutParams {
    /// Break buffer above/below the channel, in ATR units.
    pub break_buffer_atr: f64,
    /// Minimum ADX14.
    pub min_trend_strength: f64,
    pub min_vol_ratio: f64,
    pub min_vol_z: f64,
    /// Minimum average turnover in quote currency.
    pub min_adv_quote: f64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            break_buffer_atr: 0.10,
            min_trend_strength: 18.0,
            min_vol_ratio: 1.2,
            min_vol_z: 0.5,
            min_adv_quote: 5_000_000.0,
        }
    }
}

impl BreakoutParams {
    /// Apply overrides from a config parameter map; unknown keys are
    /// ignored so configs stay forward-compatible within a major version.
    pub fn with_overrides(mut self, params: &BTreeMap<String, f64>) -> Self {
        if let Some(&v) = params.get("break_buffer_atr") {
            self.break_buffer_atr = v;
        }
        if let Some(&v) = params.get("min_trend_strength") {
            self.min_trend_strength = v;
        }
        if let Some(&v) = params.get("min_vol_ratio") {
            self.min_vol_ratio = v;
        }
        if let Some(&v) = params.get("min_vol_z") {
            self.min_vol_z = v;
        }
        if let Some(&v) = params.get("min_adv_quote") {
            self.min_adv_quote = v;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct Breakout {
    params: BreakoutParams,
    exits: ExitParams,
}

impl Breakout {
    pub fn new(params: BreakoutParams, exits: ExitParams) -> Self {
        Self { params, exits }
    }

    fn quality_flags(&self, features: &FeatureSnapshot) -> BTreeMap<String, bool> {
        let mut flags = BTreeMap::new();
        flags.insert(
            "vol_expansion".to_string(),
            features.get_or("atr_z_96", 0.0) > 0.3,
        );
        flags.insert(
            "volume_confirm".to_string(),
            features.get_or("vol_z_96", 0.0) > 0.5,
        );
        flags.insert(
            "compression_present".to_string(),
            features.get_or("bb_width_bps", 10_000.0) < 200.0,
        );
        flags
    }
}

impl Playbook for Breakout {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &[
            "close", "atr", "adx14", "ema200", "donchian_high_32", "donchian_low_32",
            "volume_ratio_96", "vol_z_96", "adv_quote",
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

        let volume_confirmed = features.get_or("volume_ratio_96", 0.0) >= self.params.min_vol_ratio
            || features.get_or("vol_z_96", 0.0) >= self.params.min_vol_z;
        if !volume_confirmed {
            return None;
        }

        if features.get_or("adv_quote", 0.0) < self.params.min_adv_quote {
            return None;
        }

        let ema200 = features.get_or("ema200", 0.0);
        let buffer = self.params.break_buffer_atr * atr;
        let upper_break = features.get_or("donchian_high_32", f64::INFINITY) + buffer;
        let lower_break = features.get_or("donchian_low_32", f64::NEG_INFINITY) - buffer;

        let direction = if close >= upper_break && close > ema200 {
            Direction::Long
        } else if close <= lower_break && close < ema200 {
            Direction::Short
        } else {
            return None;
        };

        let threshold = match direction {
            Direction::Long => upper_break,
            Direction::Short => lower_break,
        };
        let buffer_pct = if threshold.abs() > 1e-12 {
            (close - threshold) / threshold * 100.0
        } else {
            0.0
        };
        let notes = format!(
            "Breakout {}: {:.2}% past threshold, ADX={:.1}, vol_ratio={:.2}, vol_z={:.2}",
            direction.as_str(),
            buffer_pct,
            adx,
            features.get_or("volume_ratio_96", 0.0),
            features.get_or("vol_z_96", 0.0),
        );

        Some(CandidateSetup {
            direction,
            entry_price: close,
            atr_at_entry: atr,
            exit_spec: self.exits.build_spec(close, atr, direction),
            quality_flags: self.quality_flags(features),
            notes,
        })
    }
}
