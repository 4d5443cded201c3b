//! Validated LLM response schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Binary trade decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Take,
    Skip,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Take => "take",
            Decision::Skip => "skip",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "take" => Ok(Decision::Take),
            "skip" => Ok(Decision::Skip),
            other => Err(format!("decision must be 'take' or 'skip', got '{other}'")),
        }
    }
}

/// Nine-grade setup quality scale.
///
/// Variants are declared worst-to-best so the derived `Ord` makes
/// `quality >= minimum` the gate comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SetupQuality {
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl SetupQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupQuality::CMinus => "C-",
            SetupQuality::C => "C",
            SetupQuality::CPlus => "C+",
            SetupQuality::BMinus => "B-",
            SetupQuality::B => "B",
            SetupQuality::BPlus => "B+",
            SetupQuality::AMinus => "A-",
            SetupQuality::A => "A",
            SetupQuality::APlus => "A+",
        }
    }

    /// True when this grade satisfies the configured minimum.
    pub fn meets(&self, minimum: SetupQuality) -> bool {
        *self >= minimum
    }
}

impl fmt::Display for SetupQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetupQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A+" => Ok(SetupQuality::APlus),
            "A" => Ok(SetupQuality::A),
            "A-" => Ok(SetupQuality::AMinus),
            "B+" => Ok(SetupQuality::BPlus),
            "B" => Ok(SetupQuality::B),
            "B-" => Ok(SetupQuality::BMinus),
            "C+" => Ok(SetupQuality::CPlus),
            "C" => Ok(SetupQuality::C),
            "C-" => Ok(SetupQuality::CMinus),
            other => Err(format!("invalid setup quality grade: '{other}'")),
        }
    }
}

/// Parsed and validated model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub decision: Decision,
    pub setup_quality: SetupQuality,
    /// Always within [0, 1] after parsing (out-of-range inputs are clamped).
    pub confidence: f64,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LlmResponse {
    /// Conservative synthetic response used when the circuit is open or
    /// retries are exhausted.
    pub fn fallback(decision: Decision, reason: &str) -> Self {
        Self {
            decision,
            setup_quality: SetupQuality::C,
            confidence: 0.0,
            risk_flags: vec!["fallback_used".to_string()],
            notes: Some(format!("fallback response: {reason}")),
        }
    }
}
