//! Candidate: a potential trade produced by a playbook, awaiting a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::ids::{CandidateId, PositionId, RunId};
use crate::llm::response::{Decision, SetupQuality};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for longs, -1 for shorts. PnL per unit = (exit - entry) * sign.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// Compound exit specification attached to a candidate.
///
/// Invariants (checked by [`ExitSpec::validate`]):
/// - longs: `stop_loss_price < entry_price < take_profit_price`, shorts reversed
/// - `time_stop_bars > 0`
/// - trailing enabled requires both an activation price and a positive
///   ATR distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSpec {
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub time_stop_bars: usize,
    pub trailing_enabled: bool,
    pub trailing_activation_price: Option<f64>,
    pub trailing_distance_atr: Option<f64>,
}

impl ExitSpec {
    pub fn validate(&self, entry_price: f64, direction: Direction) -> Result<(), ExitSpecError> {
        match direction {
            Direction::Long => {
                if self.stop_loss_price >= entry_price {
                    return Err(ExitSpecError::StopOnWrongSide {
                        stop: self.stop_loss_price,
                        entry: entry_price,
                    });
                }
                if self.take_profit_price <= entry_price {
                    return Err(ExitSpecError::TakeProfitOnWrongSide {
                        take_profit: self.take_profit_price,
                        entry: entry_price,
                    });
                }
            }
            Direction::Short => {
                if self.stop_loss_price <= entry_price {
                    return Err(ExitSpecError::StopOnWrongSide {
                        stop: self.stop_loss_price,
                        entry: entry_price,
                    });
                }
                if self.take_profit_price >= entry_price {
                    return Err(ExitSpecError::TakeProfitOnWrongSide {
                        take_profit: self.take_profit_price,
                        entry: entry_price,
                    });
                }
            }
        }
        if self.time_stop_bars == 0 {
            return Err(ExitSpecError::TimeStopZero);
        }
        if self.trailing_enabled {
            if self.trailing_activation_price.is_none() {
                return Err(ExitSpecError::TrailingIncomplete);
            }
            match self.trailing_distance_atr {
                None => return Err(ExitSpecError::TrailingIncomplete),
                Some(d) if d <= 0.0 => {
                    return Err(ExitSpecError::TrailingDistanceNotPositive(d))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Absolute distance from entry to the original stop (the 1R unit).
    pub fn stop_distance(&self, entry_price: f64, direction: Direction) -> f64 {
        (entry_price - self.stop_loss_price) * direction.sign()
    }
}

#[derive(Debug, Error)]
pub enum ExitSpecError {
    #[error("stop loss {stop} is on the wrong side of entry {entry}")]
    StopOnWrongSide { stop: f64, entry: f64 },

    #[error("take profit {take_profit} is on the wrong side of entry {entry}")]
    TakeProfitOnWrongSide { take_profit: f64, entry: f64 },

    #[error("time_stop_bars must be > 0")]
    TimeStopZero,

    #[error("trailing enabled without activation price and distance")]
    TrailingIncomplete,

    #[error("trailing_distance_atr must be > 0, got {0}")]
    TrailingDistanceNotPositive(f64),
}

/// Candidate record stored in the cache.
///
/// Every opportunity (taken or skipped) is persisted; the cache is the
/// learning substrate for post-hoc analysis. Immutable after creation
/// except `taken`, `position_id`, and the decision fields set once the
/// LLM has answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub run_id: RunId,
    pub symbol: String,
    pub timeframe: String,
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    pub playbook: String,
    pub direction: Direction,
    /// Proposed entry price (decision-bar close; actual fill may differ).
    pub entry_price: f64,
    pub atr_at_entry: f64,
    pub exit_spec: ExitSpec,
    /// Full feature vector at the decision bar.
    pub features: BTreeMap<String, f64>,
    /// blake3 over the bucketed features.
    pub feature_fingerprint: String,
    pub llm_decision: Option<Decision>,
    pub llm_confidence: Option<f64>,
    pub llm_setup_quality: Option<SetupQuality>,
    /// Why a `take` decision was vetoed (portfolio constraints), if it was.
    pub rejection_reason: Option<String>,
    pub taken: bool,
    pub position_id: Option<PositionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_spec() -> ExitSpec {
        ExitSpec {
            stop_loss_price: 97.6,
            take_profit_price: 104.8,
            time_stop_bars: 32,
            trailing_enabled: true,
            trailing_activation_price: Some(102.4),
            trailing_distance_atr: Some(1.2),
        }
    }

    #[test]
    fn valid_long_spec_passes() {
        assert!(long_spec().validate(100.0, Direction::Long).is_ok());
    }

    #[test]
    fn long_stop_above_entry_rejected() {
        let mut spec = long_spec();
        spec.stop_loss_price = 101.0;
        assert!(matches!(
            spec.validate(100.0, Direction::Long),
            Err(ExitSpecError::StopOnWrongSide { .. })
        ));
    }

    #[test]
    fn long_take_profit_below_entry_rejected() {
        let mut spec = long_spec();
        spec.take_profit_price = 99.0;
        assert!(matches!(
            spec.validate(100.0, Direction::Long),
            Err(ExitSpecError::TakeProfitOnWrongSide { .. })
        ));
    }

    #[test]
    fn short_spec_is_mirrored() {
        let spec = ExitSpec {
            stop_loss_price: 102.4,
            take_profit_price: 95.2,
            time_stop_bars: 32,
            trailing_enabled: false,
            trailing_activation_price: None,
            trailing_distance_atr: None,
        };
        assert!(spec.validate(100.0, Direction::Short).is_ok());
        // Same levels are invalid for a long
        assert!(spec.validate(100.0, Direction::Long).is_err());
    }

    #[test]
    fn trailing_requires_distance_and_activation() {
        let mut spec = long_spec();
        spec.trailing_distance_atr = None;
        assert!(matches!(
            spec.validate(100.0, Direction::Long),
            Err(ExitSpecError::TrailingIncomplete)
        ));

        let mut spec = long_spec();
        spec.trailing_distance_atr = Some(0.0);
        assert!(matches!(
            spec.validate(100.0, Direction::Long),
            Err(ExitSpecError::TrailingDistanceNotPositive(_))
        ));
    }

    #[test]
    fn stop_distance_is_positive_for_both_directions() {
        let spec = long_spec();
        assert!((spec.stop_distance(100.0, Direction::Long) - 2.4).abs() < 1e-12);

        let short = ExitSpec {
            stop_loss_price: 102.4,
            take_profit_price: 95.2,
            time_stop_bars: 32,
            trailing_enabled: false,
            trailing_activation_price: None,
            trailing_distance_atr: None,
        };
        assert!((short.stop_distance(100.0, Direction::Short) - 2.4).abs() < 1e-12);
    }
}
