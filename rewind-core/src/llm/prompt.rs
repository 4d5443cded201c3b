//! Prompt construction.
//!
//! The model never sees raw floats for regime context: continuous
//! features are bucketed into labels first. Prompt text is versioned;
//! decision events record which version produced them.

use std::fmt::Write as _;
use std::time::Duration;

use crate::domain::Candidate;
use crate::features::bucketing;
use crate::features::snapshot::FeatureSnapshot;
use crate::llm::backend::LlmRequest;
use crate::llm::response::SetupQuality;

pub const PROMPT_VERSION: &str = "v1";

pub const SYSTEM_PROMPT: &str = "\
You are a professional trading system evaluating candidate trade setups.

Your role is to:
1. Assess the quality of a trade setup according to the specified playbook
2. Identify risk factors that could invalidate the setup
3. Make a binary decision: TAKE or SKIP
4. Provide a confidence score reflecting your conviction

You MUST output valid JSON only, with no additional text or explanation.

Output schema:
{
  \"decision\": \"take\" or \"skip\",
  \"setup_quality\": \"A+\" | \"A\" | \"A-\" | \"B+\" | \"B\" | \"B-\" | \"C+\" | \"C\" | \"C-\",
  \"confidence\": 0.0 to 1.0,
  \"risk_flags\": [\"flag1\", \"flag2\", ...],
  \"notes\": \"Brief reasoning (1-2 sentences max)\"
}

Quality grades:
- A tier: strong setup, all key criteria met, good risk/reward
- B tier: acceptable setup, some conditions met, marginal risk/reward
- C tier: weak setup, few conditions met, poor risk/reward
Use + and - to shade within a tier.

Risk flags can include:
- crowded_longs, crowded_shorts
- late_entry, extended_move
- high_chop, weak_setup
- no_volume_confirm, low_liquidity
- regime_mismatch

Be selective. Only take A-tier setups in favorable conditions.
When in doubt, skip. Capital preservation is paramount.";

/// Portfolio state at decision time, as shown to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioSnapshot {
    pub open_positions: usize,
    pub exposure_frac: f64,
    pub drawdown_bps: f64,
    pub equity_quote: f64,
}

/// Policy section of the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConstraints {
    pub minimum_quality: SetupQuality,
    pub max_risk_per_trade_frac: f64,
}

/// Sectioned user prompt: global regime, asset state, candidate setup,
/// policy constraints.
pub fn build_user_prompt(
    candidate: &Candidate,
    features: &FeatureSnapshot,
    portfolio: &PortfolioSnapshot,
    policy: &PolicyConstraints,
) -> String {
    let atr = features.get_or("atr", 0.0);
    let close = features.get_or("close", 0.0);
    let ema20 = features.get_or("ema20", 0.0);
    let ema50 = features.get_or("ema50", 0.0);
    let ema200 = features.get_or("ema200", 0.0);
    let adx = features.get_or("adx14", 0.0);
    let rsi = features.get_or("rsi14", 50.0);
    let atr_z = features.get_or("atr_z_96", 0.0);
    let vol_z = features.get_or("vol_z_96", 0.0);
    let chop = features.get_or("chop_32", 0.5);

    let stop_distance = candidate
        .exit_spec
        .stop_distance(candidate.entry_price, candidate.direction);
    let stop_atr = if atr > 1e-12 { stop_distance / atr } else { 0.0 };
    let gain_distance =
        (candidate.exit_spec.take_profit_price - candidate.entry_price) * candidate.direction.sign();
    let gain_atr = if atr > 1e-12 { gain_distance / atr } else { 0.0 };

    let mut p = String::with_capacity(1024);

    let _ = writeln!(p, "# GLOBAL MARKET REGIME");
    let _ = writeln!(
        p,
        "Risk Mode: {}",
        bucketing::risk_mode(portfolio.drawdown_bps, atr_z, portfolio.exposure_frac)
    );
    let _ = writeln!(
        p,
        "Trend: {} (strength: {:.0}%)",
        bucketing::trend_mode(ema50, ema200, adx),
        bucketing::trend_strength_pct(adx)
    );
    let _ = writeln!(p, "Volatility: {}", bucketing::vol_mode(atr_z));
    let _ = writeln!(
        p,
        "Drawdown: {}",
        bucketing::drawdown_bucket(portfolio.drawdown_bps)
    );
    let _ = writeln!(p);

    let _ = writeln!(p, "# ASSET STATE: {}", candidate.symbol);
    let _ = writeln!(
        p,
        "Price Location: {}",
        bucketing::price_location(close, ema20, ema50, ema200, atr)
    );
    let _ = writeln!(
        p,
        "Momentum: {} (RSI: {})",
        bucketing::momentum(rsi, features.get_or("macd_hist", 0.0)),
        bucketing::rsi_label(rsi)
    );
    let _ = writeln!(p, "Volume: {} (z-score: {vol_z:.2})", bucketing::volume_regime(vol_z));
    let _ = writeln!(p, "Chop Score: {}", bucketing::chop_bucket(chop));
    let _ = writeln!(p);

    let _ = writeln!(p, "# CANDIDATE SETUP");
    let _ = writeln!(p, "Playbook: {}", candidate.playbook.to_uppercase());
    let _ = writeln!(p, "Direction: {}", candidate.direction.as_str().to_uppercase());
    let _ = writeln!(p, "Stop Loss: {stop_atr:.2} ATR");
    let _ = writeln!(
        p,
        "Expected R:R: {}",
        bucketing::rr_bucket(gain_atr, stop_atr)
    );
    let _ = writeln!(
        p,
        "Distance to Structure: {}",
        bucketing::distance_to_structure(features.get_or("breakout_dist_atr", 0.0))
    );
    let _ = writeln!(p);

    let _ = writeln!(p, "# PORTFOLIO STATE");
    let _ = writeln!(p, "Open Positions: {}", portfolio.open_positions);
    let _ = writeln!(p, "Exposure: {:.0}%", portfolio.exposure_frac * 100.0);
    let _ = writeln!(p);

    let _ = writeln!(p, "# POLICY CONSTRAINTS");
    let _ = writeln!(p, "Required Quality: {} or better", policy.minimum_quality);
    let _ = writeln!(
        p,
        "Max Risk Per Trade: {:.1}% of equity",
        policy.max_risk_per_trade_frac * 100.0
    );
    let _ = writeln!(p);

    let _ = writeln!(p, "# YOUR DECISION");
    let _ = write!(p, "Evaluate this setup and output your decision as JSON.");

    p
}

/// Assemble the full backend request for one candidate.
#[allow(clippy::too_many_arguments)]
pub fn build_request(
    candidate: &Candidate,
    features: &FeatureSnapshot,
    portfolio: &PortfolioSnapshot,
    policy: &PolicyConstraints,
    model_id: &str,
    temperature: f64,
    max_tokens: u32,
    deadline: Duration,
) -> LlmRequest {
    LlmRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: build_user_prompt(candidate, features, portfolio, policy),
        model_id: model_id.to_string(),
        temperature,
        max_tokens,
        deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateId, Direction, ExitSpec, RunId};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn sample_candidate() -> Candidate {
        Candidate {
            candidate_id: CandidateId("run:BTC-USD:10:breakout".into()),
            run_id: RunId::new("run"),
            symbol: "BTC-USD".into(),
            timeframe: "15m".into(),
            bar_index: 10,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            playbook: "breakout".into(),
            direction: Direction::Long,
            entry_price: 100.0,
            atr_at_entry: 2.0,
            exit_spec: ExitSpec {
                stop_loss_price: 97.6,
                take_profit_price: 104.8,
                time_stop_bars: 32,
                trailing_enabled: true,
                trailing_activation_price: Some(102.4),
                trailing_distance_atr: Some(1.2),
            },
            features: BTreeMap::new(),
            feature_fingerprint: "abc".into(),
            llm_decision: None,
            llm_confidence: None,
            llm_setup_quality: None,
            rejection_reason: None,
            taken: false,
            position_id: None,
        }
    }

    fn sample_features() -> FeatureSnapshot {
        let mut s = FeatureSnapshot::new(
            "BTC-USD".into(),
            10,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        s.insert("close", 100.0);
        s.insert("atr", 2.0);
        s.insert("ema20", 98.0);
        s.insert("ema50", 96.0);
        s.insert("ema200", 90.0);
        s.insert("adx14", 24.0);
        s.insert("rsi14", 62.0);
        s.insert("atr_z_96", 0.2);
        s.insert("vol_z_96", 0.8);
        s.insert("macd_hist", 1.0);
        s.insert("chop_32", 0.3);
        s.insert("breakout_dist_atr", 0.2);
        s
    }

    fn sample_portfolio() -> PortfolioSnapshot {
        PortfolioSnapshot {
            open_positions: 1,
            exposure_frac: 0.25,
            drawdown_bps: 30.0,
            equity_quote: 10_000.0,
        }
    }

    fn sample_policy() -> PolicyConstraints {
        PolicyConstraints {
            minimum_quality: SetupQuality::A,
            max_risk_per_trade_frac: 0.02,
        }
    }

    #[test]
    fn prompt_contains_all_sections() {
        let prompt = build_user_prompt(
            &sample_candidate(),
            &sample_features(),
            &sample_portfolio(),
            &sample_policy(),
        );
        for section in [
            "# GLOBAL MARKET REGIME",
            "# ASSET STATE: BTC-USD",
            "# CANDIDATE SETUP",
            "# PORTFOLIO STATE",
            "# POLICY CONSTRAINTS",
            "# YOUR DECISION",
        ] {
            assert!(prompt.contains(section), "missing section {section}");
        }
    }

    #[test]
    fn prompt_shows_bucketed_labels_not_raw_ema() {
        let prompt = build_user_prompt(
            &sample_candidate(),
            &sample_features(),
            &sample_portfolio(),
            &sample_policy(),
        );
        assert!(prompt.contains("Trend: up"));
        assert!(prompt.contains("Volume: high"));
        assert!(prompt.contains("Playbook: BREAKOUT"));
        assert!(prompt.contains("Direction: LONG"));
    }

    #[test]
    fn prompt_reports_stop_and_rr_in_atr_units() {
        let prompt = build_user_prompt(
            &sample_candidate(),
            &sample_features(),
            &sample_portfolio(),
            &sample_policy(),
        );
        // stop = 2.4 / 2.0 ATR = 1.20; gain = 4.8 / 2.0 = 2.4 ATR; rr = 2.0
        assert!(prompt.contains("Stop Loss: 1.20 ATR"));
        assert!(prompt.contains("Expected R:R: 2-3"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let a = build_user_prompt(
            &sample_candidate(),
            &sample_features(),
            &sample_portfolio(),
            &sample_policy(),
        );
        let b = build_user_prompt(
            &sample_candidate(),
            &sample_features(),
            &sample_portfolio(),
            &sample_policy(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn system_prompt_lists_all_grades() {
        for grade in ["A+", "A-", "B+", "B-", "C+", "C-"] {
            assert!(SYSTEM_PROMPT.contains(grade));
        }
    }
}
