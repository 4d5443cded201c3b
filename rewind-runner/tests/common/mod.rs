//! Shared fixtures for runner integration tests: crafted bar series and
//! a baseline config with relaxed playbook thresholds so scenarios fire
//! deterministically.
#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use rewind_core::domain::Bar;
use rewind_runner::config::RunConfig;

/// Install a test-writer tracing subscriber once per test binary so
/// heartbeats land in captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Bars where a single breakout fires once.
///
/// Flat at 100 for `flat` bars, one jump bar to 108, a +1/bar climb to
/// 138, then a -2/bar decline floored at 120. With the breakout
/// playbook's thresholds relaxed, exactly one candidate appears on the
/// jump bar: during the climb the close never clears the prior high by
/// the buffer, and the shallow decline never undercuts the 32-bar low,
/// so the short side stays quiet too.
pub fn staircase_bars(symbol: &str, n: usize, flat: usize) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut bars = Vec::with_capacity(n);
    let mut prev_close = 100.0;
    for i in 0..n {
        let close = if i < flat {
            100.0
        } else if i == flat {
            108.0
        } else if i <= flat + 30 {
            108.0 + (i - flat) as f64
        } else {
            (138.0 - 2.0 * (i - flat - 30) as f64).max(120.0)
        };
        let open: f64 = if i == 0 { 100.0 } else { prev_close };
        let high = open.max(close) + 1.0;
        let low = open.min(close) - 1.0;
        bars.push(Bar::new(
            t0 + Duration::minutes(15 * i as i64),
            symbol.to_string(),
            open,
            high,
            low,
            close,
            50_000.0,
        ));
        prev_close = close;
    }
    bars
}

/// Bars where the breakout fires on every post-warmup bar: each close
/// clears the previous high by more than the buffer.
pub fn runaway_ramp(symbol: &str, n: usize) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut bars = Vec::with_capacity(n);
    let mut prev_close = 100.0;
    for i in 0..n {
        let close = 100.0 + 2.0 * i as f64;
        let open: f64 = if i == 0 { 100.0 } else { prev_close };
        let high = open.max(close) + 0.5;
        let low = open.min(close) - 0.5;
        bars.push(Bar::new(
            t0 + Duration::minutes(15 * i as i64),
            symbol.to_string(),
            open,
            high,
            low,
            close,
            50_000.0,
        ));
        prev_close = close;
    }
    bars
}

/// Steady +1/bar ramp with one wide-range bar at `special` that tags the
/// EMA20 band and closes above the prior Donchian high, so both the
/// breakout and the pullback fire on that bar (and only that bar).
pub fn two_playbook_bars(symbol: &str, n: usize, special: usize) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut bars = Vec::with_capacity(n);
    let mut prev_close = 100.0;
    for i in 0..n {
        let (open, close, high, low) = if i == special {
            let open = prev_close;
            let close = prev_close + 3.0;
            (open, close, close + 1.0, open - 12.0)
        } else {
            let close = if i < special {
                100.0 + i as f64
            } else {
                // Pause at the special bar's close, then resume +1/bar;
                // the close never clears the special bar's high by the
                // buffer, so no further breakout fires
                100.0 + special as f64 + 2.0 + (i - special - 1) as f64
            };
            let open: f64 = if i == 0 { 100.0 } else { prev_close };
            (open, close, open.max(close) + 1.0, open.min(close) - 1.0)
        };
        bars.push(Bar::new(
            t0 + Duration::minutes(15 * i as i64),
            symbol.to_string(),
            open,
            high,
            low,
            close,
            50_000.0,
        ));
        prev_close = close;
    }
    bars
}

/// Baseline config: zero fees and slippage, relaxed breakout thresholds,
/// a far take profit and time stop so trailing behavior is observable.
pub fn scenario_config(run_id: &str) -> RunConfig {
    let toml = format!(
        r#"
run_id = "{run_id}"

[market]
symbols = ["BTC-USD"]
timeframe = "15m"
warmup_bars = 60
spread_bps = 0.0

[fees]
maker_bps = 0.0
taker_bps = 0.0

[portfolio]
starting_equity_quote = 10000.0
max_positions = 3
max_exposure_fraction = 1.0
allow_leverage = false
size_method = "equal_weight"
risk_per_trade_fraction = 0.02

[llm]
provider = "mock"
model = "mock"
temperature = 0.0
max_tokens = 500
max_calls_per_minute = 6000
max_retries = 0
initial_retry_delay_ms = 1
attempt_timeout_ms = 5000
circuit_breaker_threshold = 5
circuit_breaker_timeout_secs = 60.0
fallback_decision = "skip"
minimum_quality = "B"

[[playbooks]]
name = "breakout"
params = {{ min_trend_strength = 0.0, min_vol_ratio = 0.0, min_vol_z = -100.0, min_adv_quote = 0.0 }}

[playbooks.exits]
stop_loss_atr = 1.2
take_profit_atr = 50.0
time_stop_bars = 500
trailing_activation_r = 1.0
trailing_distance_atr = 1.2

[execution]
decision_timing = "on_close"
fill_timing = "next_open"
slippage_model = "static_spread"
slippage_bps = 0.0
r_multiple_basis = "pre_fee"
checkpoint_interval_bars = 50
heartbeat_interval_bars = 1000
"#
    );
    RunConfig::from_toml(&toml).expect("scenario config must parse")
}
