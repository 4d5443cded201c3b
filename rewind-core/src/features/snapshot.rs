//! Per-bar feature snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel emitted when a feature cannot be computed (division by zero,
/// NaN input). The snapshot also flags `feature_ready = false` so
/// downstream consumers can skip the bar instead of trading on garbage.
pub const SENTINEL: f64 = -999.0;

/// Mapping from feature name to value, plus the bar context it was
/// computed for. Keys are a BTreeMap so serialization order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    /// False when any feature resolved to the sentinel this bar.
    pub feature_ready: bool,
    values: BTreeMap<String, f64>,
}

impl FeatureSnapshot {
    pub fn new(symbol: String, bar_index: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            bar_index,
            timestamp,
            feature_ready: true,
            values: BTreeMap::new(),
        }
    }

    /// Insert a value; a non-finite value is replaced by the sentinel and
    /// clears the ready flag.
    pub fn insert(&mut self, key: &str, value: f64) {
        if value.is_finite() {
            self.values.insert(key.to_string(), value);
        } else {
            self.values.insert(key.to_string(), SENTINEL);
            self.feature_ready = false;
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).copied().unwrap_or(default)
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Declared keys that are absent from this snapshot.
    pub fn missing_keys(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|k| !self.values.contains_key(**k))
            .map(|k| k.to_string())
            .collect()
    }
}
