//! Deterministic identifiers.
//!
//! All ids are composites of run id, symbol, and bar index. Rerunning the
//! same config against the same bars must reproduce identical artifacts, so
//! nothing here draws from a clock or an entropy source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Run identifier (caller-supplied, unique per run directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candidate identifier: `<run_id>:<symbol>:<bar_index>:<playbook>`.
///
/// At most one candidate per (bar, playbook, symbol) exists, so the
/// composite is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn for_bar(run_id: &RunId, symbol: &str, bar_index: usize, playbook: &str) -> Self {
        Self(format!("{run_id}:{symbol}:{bar_index}:{playbook}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position identifier: `<run_id>:<symbol>:<bar_index>:p<seq>`.
///
/// `seq` is the opening's ordinal within its entry bar, so multiple fills on
/// one bar stay distinct without any global counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

impl PositionId {
    pub fn for_entry(run_id: &RunId, symbol: &str, bar_index: usize, seq: usize) -> Self {
        Self(format!("{run_id}:{symbol}:{bar_index}:p{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a candidate's bucketed features.
///
/// BTreeMap keys serialize in sorted order, so the same buckets always hash
/// to the same hex string across builds and platforms.
pub fn feature_fingerprint(buckets: &BTreeMap<String, String>) -> String {
    let json = serde_json::to_string(buckets).expect("bucket map must serialize");
    blake3::hash(json.as_bytes()).to_hex().to_string()
}
