//! Crash-safe checkpoints.
//!
//! Written atomically (tmp + rename) every `checkpoint_interval_bars`.
//! A checkpoint carries the feature-pipeline state and the full live
//! state of every open position. The ledger also persists trailing state
//! per bar, but it keeps advancing between checkpoints, so a crash replay
//! that read position state from the ledger would start ahead of the
//! checkpointed bar and could exit on a different bar than an
//! uninterrupted run. Restoring from the checkpoint itself keeps replay
//! exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use rewind_core::domain::{Candidate, RunId};
use rewind_core::features::FeaturePipeline;
use rewind_core::positions::OpenPosition;
use rewind_core::schema::{SchemaVersion, SCHEMA_VERSION};

use crate::progress::RunCounters;
use crate::storage::StoreError;

/// An accepted candidate awaiting its fill at the next bar open.
///
/// Carried in the checkpoint: a decision made on the last bar before a
/// crash must still fill after resume, or the replayed run diverges from
/// an uninterrupted one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub candidate: Candidate,
    pub size_quote: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: SchemaVersion,
    pub run_id: RunId,
    /// Identity hash of the config that produced this checkpoint; resume
    /// refuses a mismatch.
    pub config_hash: String,
    /// Index of the last fully processed bar group.
    pub bar_index: usize,
    pub bar_timestamp: DateTime<Utc>,
    /// Per-symbol pipeline state.
    pub feature_pipelines: BTreeMap<String, FeaturePipeline>,
    /// Full live state of every open position as of `bar_index`.
    pub open_positions: Vec<OpenPosition>,
    pub pending_entries: Vec<PendingEntry>,
    pub equity_quote: f64,
    pub counters: RunCounters,
}

/// Atomic write: serialize to a sibling tmp file, then rename over.
pub fn save(path: &Path, checkpoint: &Checkpoint) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(checkpoint)
        .map_err(|e| StoreError::Serde(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
}

/// Load a checkpoint if one exists and its schema major matches.
pub fn load(path: &Path) -> Result<Option<Checkpoint>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    let checkpoint: Checkpoint =
        serde_json::from_str(&json).map_err(|e| StoreError::Serde(e.to_string()))?;
    if !checkpoint.schema_version.compatible_with(&SCHEMA_VERSION) {
        return Err(StoreError::SchemaMismatch {
            found: checkpoint.schema_version.to_string(),
            expected: SCHEMA_VERSION.to_string(),
        });
    }
    Ok(Some(checkpoint))
}
