//! Categorical bucketing of numeric features.
//!
//! Continuous features are mapped to small label sets before they reach the
//! prompt builder or the candidate fingerprint. Threshold tables are fixed
//! and versioned with the feature schema.

use std::collections::BTreeMap;

use crate::features::snapshot::FeatureSnapshot;

/// Trend bucket from EMA alignment and ADX.
/// ADX below 15 reads as sideways regardless of alignment.
pub fn trend_mode(ema50: f64, ema200: f64, adx: f64) -> &'static str {
    if adx < 15.0 {
        return "sideways";
    }
    if ema50 > ema200 {
        "up"
    } else if ema50 < ema200 {
        "down"
    } else {
        "sideways"
    }
}

/// Volatility regime from the ATR z-score.
pub fn vol_mode(atr_z: f64) -> &'static str {
    if atr_z < -0.5 {
        "low"
    } else if atr_z > 0.5 {
        "high"
    } else {
        "normal"
    }
}

/// Volume regime from the volume z-score.
pub fn volume_regime(vol_z: f64) -> &'static str {
    if vol_z < -0.5 {
        "low"
    } else if vol_z > 0.5 {
        "high"
    } else {
        "normal"
    }
}

/// Momentum bucket from RSI and the MACD histogram.
pub fn momentum(rsi: f64, macd_hist: f64) -> &'static str {
    if rsi > 65.0 && macd_hist > 10.0 {
        return "strong_up";
    }
    if rsi < 35.0 && macd_hist < -10.0 {
        return "strong_down";
    }
    if rsi > 55.0 || macd_hist > 3.0 {
        return "mild_up";
    }
    if rsi < 45.0 || macd_hist < -3.0 {
        return "mild_down";
    }
    "flat"
}

/// RSI label per the fixed table.
pub fn rsi_label(rsi: f64) -> &'static str {
    if rsi >= 70.0 {
        "overbought"
    } else if rsi >= 60.0 {
        "strong"
    } else if rsi >= 40.0 {
        "neutral"
    } else if rsi >= 30.0 {
        "weak"
    } else {
        "oversold"
    }
}

/// Price location relative to the key moving averages, in ATR units.
pub fn price_location(close: f64, ema20: f64, ema50: f64, ema200: f64, atr: f64) -> &'static str {
    if atr < 1e-12 {
        return "near_key_ma";
    }
    let dist_20 = (close - ema20).abs() / atr;
    let dist_50 = (close - ema50).abs() / atr;
    let dist_200 = (close - ema200).abs() / atr;
    if dist_20.min(dist_50).min(dist_200) < 0.5 {
        return "near_key_ma";
    }
    if close > ema20 && close > ema50 && close > ema200 {
        return "above_key_ma";
    }
    if close < ema20 && close < ema50 && close < ema200 {
        return "below_key_ma";
    }
    "near_key_ma"
}

/// Chop bucket from the trend-efficiency score (0 trending .. 1 choppy).
pub fn chop_bucket(chop: f64) -> &'static str {
    if chop < 0.4 {
        "low"
    } else if chop > 0.7 {
        "high"
    } else {
        "medium"
    }
}

/// Risk/reward bucket from gain and stop distances in ATR units.
pub fn rr_bucket(expected_gain_atr: f64, stop_atr: f64) -> &'static str {
    if stop_atr < 1e-12 {
        return "<1.5";
    }
    let rr = expected_gain_atr / stop_atr;
    if rr < 1.5 {
        "<1.5"
    } else if rr < 2.0 {
        "1.5-2"
    } else if rr < 3.0 {
        "2-3"
    } else {
        ">3"
    }
}

/// Distance to a structural level, in ATR units.
pub fn distance_to_structure(distance_atr: f64) -> &'static str {
    let d = distance_atr.abs();
    if d < 0.3 {
        "near"
    } else if d < 1.0 {
        "medium"
    } else {
        "far"
    }
}

/// Overall risk mode from drawdown, volatility, and exposure.
pub fn risk_mode(dd_24h_bps: f64, vol_z: f64, exposure_frac: f64) -> &'static str {
    if dd_24h_bps > 500.0 || vol_z > 2.0 || exposure_frac > 0.8 {
        return "risk_off";
    }
    if dd_24h_bps < 100.0 && vol_z < 0.5 && exposure_frac < 0.3 {
        return "risk_on";
    }
    "neutral"
}

/// Drawdown magnitude bucket (bps of peak equity).
pub fn drawdown_bucket(dd_24h_bps: f64) -> &'static str {
    if dd_24h_bps < 50.0 {
        "none"
    } else if dd_24h_bps < 200.0 {
        "small"
    } else if dd_24h_bps < 500.0 {
        "medium"
    } else {
        "large"
    }
}

/// ADX scaled to a 0-100 trend-strength percentage (capped at ADX 60).
pub fn trend_strength_pct(adx: f64) -> f64 {
    (adx.min(60.0) / 60.0) * 100.0
}

/// Bucket the snapshot's regime features into the fingerprint label map.
///
/// The candidate fingerprint hashes this map, so two candidates with the
/// same categorical market state collide, which is the point: the cache can
/// group opportunities by regime.
pub fn bucket_features(snapshot: &FeatureSnapshot) -> BTreeMap<String, String> {
    let ema20 = snapshot.get_or("ema20", 0.0);
    let ema50 = snapshot.get_or("ema50", 0.0);
    let ema200 = snapshot.get_or("ema200", 0.0);
    let adx = snapshot.get_or("adx14", 0.0);
    let rsi = snapshot.get_or("rsi14", 50.0);
    let close = snapshot.get_or("close", 0.0);
    let atr = snapshot.get_or("atr", 0.0);

    let mut buckets = BTreeMap::new();
    buckets.insert("trend_mode".into(), trend_mode(ema50, ema200, adx).into());
    buckets.insert("vol_mode".into(), vol_mode(snapshot.get_or("atr_z_96", 0.0)).into());
    buckets.insert(
        "volume_regime".into(),
        volume_regime(snapshot.get_or("vol_z_96", 0.0)).into(),
    );
    buckets.insert(
        "momentum".into(),
        momentum(rsi, snapshot.get_or("macd_hist", 0.0)).into(),
    );
    buckets.insert("rsi".into(), rsi_label(rsi).into());
    buckets.insert(
        "price_location".into(),
        price_location(close, ema20, ema50, ema200, atr).into(),
    );
    buckets.insert(
        "chop".into(),
        chop_bucket(snapshot.get_or("chop_32", 0.5)).into(),
    );
    buckets
}
