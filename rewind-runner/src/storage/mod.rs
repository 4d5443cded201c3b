//! Durable stores: single-file SQLite per table plus the JSONL decision
//! log. One writer per store, owned by the runner for the whole run.

pub mod candidate_cache;
pub mod decision_log;
pub mod labels;
pub mod ledger;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use rewind_core::schema::{SchemaVersion, SCHEMA_VERSION};

pub use candidate_cache::{CandidateCache, CandidateFilter};
pub use decision_log::DecisionLog;
pub use labels::OutcomeLabels;
pub use ledger::PositionLedger;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("store schema version {found} is incompatible with {expected}")]
    SchemaMismatch { found: String, expected: String },

    #[error("position {0} is already closed")]
    AlreadyClosed(String),

    #[error("position {0} not found")]
    PositionNotFound(String),
}

/// Retry a store write with exponential backoff. Write failures are
/// retried up to `max_attempts`; exhaustion propagates the last error and
/// fails the run (the checkpoint makes the bar replayable).
pub fn with_retry<T>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < max_attempts => {
                warn!(attempt, error = %err, "store write failed, retrying");
                std::thread::sleep(base_delay * 2u32.pow(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Open a SQLite file, creating parent directories, and enforce the
/// schema-version gate: a fresh store records the current version, an
/// existing store must match the current major.
pub(crate) fn open_versioned(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(found) => {
            let found_version: SchemaVersion =
                found.parse().map_err(|_| StoreError::SchemaMismatch {
                    found: found.clone(),
                    expected: SCHEMA_VERSION.to_string(),
                })?;
            if !found_version.compatible_with(&SCHEMA_VERSION) {
                return Err(StoreError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION.to_string(),
                });
            }
        }
    }
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_retry_returns_first_success() {
        let mut calls = 0;
        let result: Result<i32, StoreError> = with_retry(3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 2 {
                Err(StoreError::Io("disk busy".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn with_retry_gives_up_after_bound() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_retry(3, Duration::from_millis(1), || {
            calls += 1;
            Err(StoreError::Io("disk gone".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn versioned_open_stamps_and_accepts_same_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        {
            let conn = open_versioned(&path).unwrap();
            let v: String = conn
                .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |r| {
                    r.get(0)
                })
                .unwrap();
            assert_eq!(v, SCHEMA_VERSION.to_string());
        }
        // Reopen succeeds
        assert!(open_versioned(&path).is_ok());
    }

    #[test]
    fn versioned_open_rejects_different_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO meta (key, value) VALUES ('schema_version', '99.0');",
            )
            .unwrap();
        }
        assert!(matches!(
            open_versioned(&path),
            Err(StoreError::SchemaMismatch { .. })
        ));
    }
}
