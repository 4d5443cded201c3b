//! Playbooks: deterministic opportunity detectors.
//!
//! A playbook answers "is this an opportunity", never "should we take it";
//! the take/skip call belongs to the LLM harness. Detectors are pure
//! functions of the feature snapshot and the current bar; parameters are
//! plain struct fields populated from config.

pub mod breakout;
pub mod pullback;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Bar, Direction, ExitSpec};
use crate::features::snapshot::FeatureSnapshot;

pub use breakout::Breakout;
pub use pullback::Pullback;

/// A detected opportunity, before ids and persistence are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSetup {
    pub direction: Direction,
    /// Proposed entry: the decision bar's close.
    pub entry_price: f64,
    pub atr_at_entry: f64,
    pub exit_spec: ExitSpec,
    pub quality_flags: BTreeMap<String, bool>,
    pub notes: String,
}

/// Exit template parameters, shared by all playbooks and carried in config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitParams {
    pub stop_loss_atr: f64,
    pub take_profit_atr: f64,
    pub time_stop_bars: usize,
    #[serde(default = "default_trailing_enabled")]
    pub trailing_enabled: bool,
    /// Profit level that arms the trailing stop, in R units.
    pub trailing_activation_r: f64,
    pub trailing_distance_atr: f64,
}

fn default_trailing_enabled() -> bool {
    true
}

impl ExitParams {
    /// Instantiate the template at a concrete entry price and ATR.
    pub fn build_spec(&self, entry_price: f64, atr: f64, direction: Direction) -> ExitSpec {
        let sign = direction.sign();
        let stop_distance = self.stop_loss_atr * atr;
        ExitSpec {
            stop_loss_price: entry_price - sign * stop_distance,
            take_profit_price: entry_price + sign * self.take_profit_atr * atr,
            time_stop_bars: self.time_stop_bars,
            trailing_enabled: self.trailing_enabled,
            trailing_activation_price: self
                .trailing_enabled
                .then(|| entry_price + sign * self.trailing_activation_r * stop_distance),
            trailing_distance_atr: self.trailing_enabled.then_some(self.trailing_distance_atr),
        }
    }
}

/// Stateless opportunity detector.
pub trait Playbook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Feature keys this detector reads; checked against the pipeline's
    /// declared outputs during pre-flight.
    fn required_features(&self) -> &'static [&'static str];

    /// At most one candidate per (bar, playbook, symbol).
    fn evaluate(&self, features: &FeatureSnapshot, bar: &Bar) -> Option<CandidateSetup>;
}
