//! Versioned run configuration.
//!
//! The config is the only mutable input to a run: validated pre-flight,
//! snapshotted into the run directory, never mutated after start. TOML is
//! the on-disk authoring format; the snapshot is JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use rewind_core::domain::RunId;
use rewind_core::llm::response::{Decision, SetupQuality};
use rewind_core::playbooks::ExitParams;
use rewind_core::positions::RMultipleBasis;
use rewind_core::schema::{SchemaVersion, SCHEMA_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: SchemaVersion,
    pub run_id: String,
    #[serde(default)]
    pub description: String,
    pub market: MarketConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    pub playbooks: Vec<PlaybookEntry>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_schema_version() -> SchemaVersion {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_venue")]
    pub venue: String,
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// YYYY-MM-DD, inclusive. None means from the start of the data.
    #[serde(default)]
    pub start_date: Option<String>,
    /// YYYY-MM-DD, inclusive. None means through the end of the data.
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_warmup_bars")]
    pub warmup_bars: usize,
    /// Static bid-ask spread assumption, in basis points.
    #[serde(default = "default_spread_bps")]
    pub spread_bps: f64,
}

fn default_venue() -> String {
    "coinbase".to_string()
}
fn default_timeframe() -> String {
    "15m".to_string()
}
fn default_warmup_bars() -> usize {
    400
}
fn default_spread_bps() -> f64 {
    2.0
}

impl MarketConfig {
    pub fn start(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        parse_date(self.start_date.as_deref())
    }

    pub fn end(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        parse_date(self.end_date.as_deref())
    }
}

fn parse_date(s: Option<&str>) -> Result<Option<DateTime<Utc>>, ConfigError> {
    match s {
        None => Ok(None),
        Some(raw) => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ConfigError::InvalidDate(raw.to_string()))?;
            let dt = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| ConfigError::InvalidDate(raw.to_string()))?
                .and_utc();
            Ok(Some(dt))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeesConfig {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self { maker_bps: 6.0, taker_bps: 12.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMethod {
    /// size = equity * max_exposure_fraction / max_positions
    EqualWeight,
    /// size = equity * risk_per_trade_fraction / stop_distance_pct
    RiskParity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub starting_equity_quote: f64,
    pub max_positions: usize,
    pub max_exposure_fraction: f64,
    pub allow_leverage: bool,
    pub size_method: SizeMethod,
    pub risk_per_trade_fraction: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            starting_equity_quote: 10_000.0,
            max_positions: 3,
            max_exposure_fraction: 1.0,
            allow_leverage: false,
            size_method: SizeMethod::EqualWeight,
            risk_per_trade_fraction: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_calls_per_minute: u32,
    /// Token-bucket burst capacity; None uses the limiter default.
    #[serde(default)]
    pub burst: Option<u32>,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    /// Per-attempt backend deadline.
    pub attempt_timeout_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: f64,
    pub fallback_decision: Decision,
    /// Quality gate: take decisions below this grade are not executed.
    pub minimum_quality: SetupQuality,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-sonnet".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            max_calls_per_minute: 50,
            burst: None,
            max_retries: 3,
            initial_retry_delay_ms: 1000,
            attempt_timeout_ms: 30_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60.0,
            fallback_decision: Decision::Skip,
            minimum_quality: SetupQuality::B,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Entry-parameter overrides; unknown keys are ignored.
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    pub exits: ExitParams,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTiming {
    OnClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillTiming {
    /// Decisions at bar close fill at the next bar's open.
    NextOpen,
    /// Fill immediately at the decision bar's close.
    SameClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    StaticSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub decision_timing: DecisionTiming,
    pub fill_timing: FillTiming,
    pub slippage_model: SlippageModel,
    pub slippage_bps: f64,
    pub r_multiple_basis: RMultipleBasis,
    pub checkpoint_interval_bars: u64,
    pub heartbeat_interval_bars: u64,
    /// Stop cleanly (checkpoint + cancelled status) after this many bars.
    /// A runtime limit, not part of the run's identity hash.
    #[serde(default)]
    pub max_bars: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            decision_timing: DecisionTiming::OnClose,
            fill_timing: FillTiming::NextOpen,
            slippage_model: SlippageModel::StaticSpread,
            slippage_bps: 3.0,
            r_multiple_basis: RMultipleBasis::PreFee,
            checkpoint_interval_bars: 500,
            heartbeat_interval_bars: 100,
            max_bars: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("run_id must not be empty")]
    EmptyRunId,

    #[error("symbols must not be empty or blank")]
    BadSymbols,

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("start_date must be before end_date")]
    DateRangeInverted,

    #[error("warmup_bars must be > 0")]
    BadWarmup,

    #[error("fees must be non-negative")]
    NegativeFees,

    #[error("starting_equity_quote must be > 0")]
    BadEquity,

    #[error("max_positions must be > 0")]
    BadMaxPositions,

    #[error("max_exposure_fraction {0} > 1.0 requires allow_leverage")]
    ExposureNeedsLeverage(f64),

    #[error("max_exposure_fraction must be > 0")]
    BadExposure,

    #[error("risk_per_trade_fraction must be in (0, 0.5]")]
    BadRiskFraction,

    #[error("temperature must be within [0, 2]")]
    BadTemperature,

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("playbooks must not be empty")]
    NoPlaybooks,

    #[error("unknown playbook: {0}")]
    UnknownPlaybook(String),

    #[error("playbook {playbook} requires feature '{feature}' not produced by the pipeline")]
    MissingFeature { playbook: String, feature: String },

    #[error("duplicate playbook: {0}")]
    DuplicatePlaybook(String),

    #[error("playbook {name}: take_profit_atr ({tp}) must exceed stop_loss_atr ({sl})")]
    TakeProfitInsideStop { name: String, tp: f64, sl: f64 },

    #[error("playbook {0}: exit parameters must be positive")]
    BadExitParams(String),

    #[error("slippage_bps must be non-negative")]
    BadSlippage,
}

pub const KNOWN_PLAYBOOKS: &[&str] = &["breakout", "pullback"];

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn run_id(&self) -> RunId {
        RunId::new(self.run_id.clone())
    }

    /// Enabled playbooks in deterministic (name) order.
    pub fn enabled_playbooks(&self) -> Vec<&PlaybookEntry> {
        let mut entries: Vec<_> = self.playbooks.iter().filter(|p| p.enabled).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Content hash over the run's identity.
    ///
    /// `execution.max_bars` is a runtime stop limit, not part of run
    /// identity: an interrupted run must be resumable by the same config
    /// with the limit lifted.
    pub fn content_hash(&self) -> String {
        let mut identity = self.clone();
        identity.execution.max_bars = None;
        let json = serde_json::to_string(&identity).expect("config must serialize");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    /// Cross-field validation; run pre-flight before any store opens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_id.trim().is_empty() {
            return Err(ConfigError::EmptyRunId);
        }
        if self.market.symbols.is_empty()
            || self.market.symbols.iter().any(|s| s.trim().is_empty())
        {
            return Err(ConfigError::BadSymbols);
        }
        if self.market.warmup_bars == 0 {
            return Err(ConfigError::BadWarmup);
        }
        if let (Some(start), Some(end)) = (self.market.start()?, self.market.end()?) {
            if start >= end {
                return Err(ConfigError::DateRangeInverted);
            }
        }

        if self.fees.maker_bps < 0.0 || self.fees.taker_bps < 0.0 {
            return Err(ConfigError::NegativeFees);
        }

        let p = &self.portfolio;
        if p.starting_equity_quote <= 0.0 {
            return Err(ConfigError::BadEquity);
        }
        if p.max_positions == 0 {
            return Err(ConfigError::BadMaxPositions);
        }
        if p.max_exposure_fraction <= 0.0 {
            return Err(ConfigError::BadExposure);
        }
        if p.max_exposure_fraction > 1.0 && !p.allow_leverage {
            return Err(ConfigError::ExposureNeedsLeverage(p.max_exposure_fraction));
        }
        if p.risk_per_trade_fraction <= 0.0 || p.risk_per_trade_fraction > 0.5 {
            return Err(ConfigError::BadRiskFraction);
        }

        let l = &self.llm;
        if !(0.0..=2.0).contains(&l.temperature) {
            return Err(ConfigError::BadTemperature);
        }
        if l.max_tokens == 0 {
            return Err(ConfigError::NonPositive("max_tokens"));
        }
        if l.max_calls_per_minute == 0 {
            return Err(ConfigError::NonPositive("max_calls_per_minute"));
        }
        if l.attempt_timeout_ms == 0 {
            return Err(ConfigError::NonPositive("attempt_timeout_ms"));
        }
        if l.circuit_breaker_threshold == 0 {
            return Err(ConfigError::NonPositive("circuit_breaker_threshold"));
        }

        if self.playbooks.is_empty() {
            return Err(ConfigError::NoPlaybooks);
        }
        let mut seen = Vec::new();
        for pb in &self.playbooks {
            if !KNOWN_PLAYBOOKS.contains(&pb.name.as_str()) {
                return Err(ConfigError::UnknownPlaybook(pb.name.clone()));
            }
            if seen.contains(&pb.name.as_str()) {
                return Err(ConfigError::DuplicatePlaybook(pb.name.clone()));
            }
            seen.push(pb.name.as_str());

            let e = &pb.exits;
            if e.take_profit_atr <= e.stop_loss_atr {
                return Err(ConfigError::TakeProfitInsideStop {
                    name: pb.name.clone(),
                    tp: e.take_profit_atr,
                    sl: e.stop_loss_atr,
                });
            }
            let positive = e.stop_loss_atr > 0.0
                && e.take_profit_atr > 0.0
                && e.time_stop_bars > 0
                && (!e.trailing_enabled
                    || (e.trailing_activation_r > 0.0 && e.trailing_distance_atr > 0.0));
            if !positive {
                return Err(ConfigError::BadExitParams(pb.name.clone()));
            }
        }

        if self.execution.slippage_bps < 0.0 {
            return Err(ConfigError::BadSlippage);
        }
        if self.execution.checkpoint_interval_bars == 0 {
            return Err(ConfigError::NonPositive("checkpoint_interval_bars"));
        }
        if self.execution.heartbeat_interval_bars == 0 {
            return Err(ConfigError::NonPositive("heartbeat_interval_bars"));
        }

        Ok(())
    }
}
