//! Run manifest: provenance, status, and counters.
//!
//! Written at start, refreshed at every checkpoint, finalized on
//! termination. The `status` and `error` fields plus the last heartbeat
//! are the diagnostic surface for a failed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use rewind_core::domain::RunId;
use rewind_core::schema::ArtifactHeader;

use crate::progress::RunCounters;
use crate::storage::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub header: ArtifactHeader,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub counters: RunCounters,
    pub error: Option<String>,
}

impl RunManifest {
    pub fn start(run_id: RunId, config_hash: String) -> Self {
        Self {
            header: ArtifactHeader::for_run("RunManifest", run_id),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            config_hash,
            counters: RunCounters::default(),
            error: None,
        }
    }

    pub fn finalize(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }

    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| StoreError::Serde(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_running_to_completed() {
        let mut manifest = RunManifest::start(RunId::new("run"), "hash".into());
        assert_eq!(manifest.status, RunStatus::Running);
        assert!(manifest.completed_at.is_none());

        manifest.counters.bars_processed = 500;
        manifest.finalize(RunStatus::Completed, None);
        assert_eq!(manifest.status, RunStatus::Completed);
        assert!(manifest.completed_at.is_some());
        assert!(manifest.error.is_none());
    }

    #[test]
    fn failed_manifest_carries_cause() {
        let mut manifest = RunManifest::start(RunId::new("run"), "hash".into());
        manifest.finalize(RunStatus::Failed, Some("bar out of order".into()));
        assert_eq!(manifest.status, RunStatus::Failed);
        assert_eq!(manifest.error.as_deref(), Some("bar out of order"));
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = RunManifest::start(RunId::new("run"), "hash".into());
        manifest.counters.candidates_generated = 12;
        manifest.write(&path).unwrap();

        let back = RunManifest::read(&path).unwrap();
        assert_eq!(back.status, RunStatus::Running);
        assert_eq!(back.counters.candidates_generated, 12);
        assert_eq!(back.config_hash, "hash");
        assert_eq!(back.header.schema, "RunManifest");
    }
}
