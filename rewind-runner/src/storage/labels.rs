//! Outcome labels: post-exit ground truth keyed by candidate id.

use rusqlite::{params, Connection, Row};
use std::path::Path;

use rewind_core::domain::{CandidateId, ExitReason, OutcomeLabel, PositionId};
use rewind_core::schema::SCHEMA_VERSION;

use crate::storage::StoreError;

pub struct OutcomeLabels {
    conn: Connection,
}

impl OutcomeLabels {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = super::open_versioned(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS labels (
                candidate_id TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                pnl_quote REAL NOT NULL,
                actual_r_multiple REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                bars_held INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_labels_position ON labels(position_id);",
        )?;
        Ok(Self { conn })
    }

    pub fn put_label(&self, label: &OutcomeLabel) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO labels (
                candidate_id, position_id, pnl_quote, actual_r_multiple,
                exit_reason, bars_held
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                label.candidate_id.as_str(),
                label.position_id.as_str(),
                label.pnl_quote,
                label.actual_r_multiple,
                label.exit_reason.as_str(),
                label.bars_held as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_label(&self, candidate_id: &CandidateId) -> Result<Option<OutcomeLabel>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM labels WHERE candidate_id = ?1")?;
        let mut rows = stmt.query_map([candidate_id.as_str()], row_to_label)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All labels whose candidate belongs to the run (candidate ids are
    /// prefixed by the run id).
    pub fn labels_for_run(&self, run_id: &str) -> Result<Vec<OutcomeLabel>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM labels WHERE candidate_id LIKE ?1 ORDER BY candidate_id",
        )?;
        let pattern = format!("{run_id}:%");
        let rows = stmt.query_map([pattern], row_to_label)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM labels", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_label(row: &Row<'_>) -> rusqlite::Result<OutcomeLabel> {
    let exit_reason: String = row.get("exit_reason")?;
    let bars_held: i64 = row.get("bars_held")?;
    Ok(OutcomeLabel {
        schema_version: SCHEMA_VERSION,
        candidate_id: CandidateId(row.get("candidate_id")?),
        position_id: PositionId(row.get("position_id")?),
        pnl_quote: row.get("pnl_quote")?,
        actual_r_multiple: row.get("actual_r_multiple")?,
        exit_reason: ExitReason::parse(&exit_reason).unwrap_or(ExitReason::EndOfRun),
        bars_held: bars_held as usize,
    })
}
