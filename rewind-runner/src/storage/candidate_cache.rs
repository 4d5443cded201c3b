//! Candidate cache: every evaluated opportunity, taken or skipped.
//!
//! Append-only except `taken`/`position_id` (set once on execution) and
//! the LLM decision fields (set once after evaluation). `put` is
//! insert-or-replace so a replayed bar after crash recovery does not
//! duplicate rows.

use rusqlite::{params, Connection, Row};
use std::path::Path;

use rewind_core::domain::{Candidate, CandidateId, Direction, PositionId, RunId};
use rewind_core::llm::response::{Decision, SetupQuality};

use crate::storage::StoreError;

pub struct CandidateCache {
    conn: Connection,
}

/// Query filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub run_id: Option<String>,
    pub symbol: Option<String>,
    pub playbook: Option<String>,
    pub taken: Option<bool>,
    pub limit: Option<usize>,
}

impl CandidateCache {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = super::open_versioned(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS candidates (
                candidate_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                bar_index INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                playbook TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                atr_at_entry REAL NOT NULL,
                exit_spec TEXT NOT NULL,
                features TEXT NOT NULL,
                feature_fingerprint TEXT NOT NULL,
                llm_decision TEXT,
                llm_confidence REAL,
                llm_setup_quality TEXT,
                rejection_reason TEXT,
                taken INTEGER NOT NULL,
                position_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_candidates_run_id
                ON candidates(run_id, symbol, timestamp);
            CREATE INDEX IF NOT EXISTS idx_candidates_taken
                ON candidates(run_id, taken);
            CREATE INDEX IF NOT EXISTS idx_candidates_playbook
                ON candidates(playbook);",
        )?;
        Ok(Self { conn })
    }

    pub fn put(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let exit_spec = serde_json::to_string(&candidate.exit_spec)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        let features = serde_json::to_string(&candidate.features)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO candidates (
                candidate_id, run_id, symbol, timeframe, bar_index, timestamp,
                playbook, direction, entry_price, atr_at_entry, exit_spec,
                features, feature_fingerprint, llm_decision, llm_confidence,
                llm_setup_quality, rejection_reason, taken, position_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                candidate.candidate_id.as_str(),
                candidate.run_id.as_str(),
                candidate.symbol,
                candidate.timeframe,
                candidate.bar_index as i64,
                candidate.timestamp.to_rfc3339(),
                candidate.playbook,
                candidate.direction.as_str(),
                candidate.entry_price,
                candidate.atr_at_entry,
                exit_spec,
                features,
                candidate.feature_fingerprint,
                candidate.llm_decision.map(|d| d.as_str()),
                candidate.llm_confidence,
                candidate.llm_setup_quality.map(|q| q.as_str()),
                candidate.rejection_reason,
                candidate.taken as i64,
                candidate.position_id.as_ref().map(|p| p.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Attach the LLM decision fields after evaluation.
    pub fn record_decision(
        &self,
        candidate_id: &CandidateId,
        decision: Decision,
        confidence: f64,
        quality: SetupQuality,
        rejection_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE candidates
             SET llm_decision = ?1, llm_confidence = ?2, llm_setup_quality = ?3,
                 rejection_reason = ?4
             WHERE candidate_id = ?5",
            params![
                decision.as_str(),
                confidence,
                quality.as_str(),
                rejection_reason,
                candidate_id.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Set the taken flag and the position back-reference, exactly once.
    pub fn mark_taken(
        &self,
        candidate_id: &CandidateId,
        position_id: &PositionId,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE candidates SET taken = 1, position_id = ?1 WHERE candidate_id = ?2",
            params![position_id.as_str(), candidate_id.as_str()],
        )?;
        Ok(())
    }

    pub fn get(&self, candidate_id: &CandidateId) -> Result<Option<Candidate>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM candidates WHERE candidate_id = ?1")?;
        let mut rows = stmt.query_map([candidate_id.as_str()], row_to_candidate)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn query(&self, filter: &CandidateFilter) -> Result<Vec<Candidate>, StoreError> {
        let (where_clause, params) = filter_clause(filter);
        let mut sql = format!(
            "SELECT * FROM candidates {where_clause} ORDER BY timestamp, candidate_id"
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_candidate)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self, filter: &CandidateFilter) -> Result<u64, StoreError> {
        let (where_clause, params) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM candidates {where_clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = stmt.query_row(param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn filter_clause(filter: &CandidateFilter) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(run_id) = &filter.run_id {
        params.push(Box::new(run_id.clone()));
        clauses.push(format!("run_id = ?{}", params.len()));
    }
    if let Some(symbol) = &filter.symbol {
        params.push(Box::new(symbol.clone()));
        clauses.push(format!("symbol = ?{}", params.len()));
    }
    if let Some(playbook) = &filter.playbook {
        params.push(Box::new(playbook.clone()));
        clauses.push(format!("playbook = ?{}", params.len()));
    }
    if let Some(taken) = filter.taken {
        params.push(Box::new(taken as i64));
        clauses.push(format!("taken = ?{}", params.len()));
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_clause, params)
}

fn row_to_candidate(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    let direction: String = row.get("direction")?;
    let timestamp: String = row.get("timestamp")?;
    let exit_spec: String = row.get("exit_spec")?;
    let features: String = row.get("features")?;
    let llm_decision: Option<String> = row.get("llm_decision")?;
    let llm_setup_quality: Option<String> = row.get("llm_setup_quality")?;
    let position_id: Option<String> = row.get("position_id")?;
    let taken: i64 = row.get("taken")?;
    let bar_index: i64 = row.get("bar_index")?;

    Ok(Candidate {
        candidate_id: CandidateId(row.get("candidate_id")?),
        run_id: RunId(row.get("run_id")?),
        symbol: row.get("symbol")?,
        timeframe: row.get("timeframe")?,
        bar_index: bar_index as usize,
        timestamp: timestamp
            .parse()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        playbook: row.get("playbook")?,
        direction: if direction == "long" { Direction::Long } else { Direction::Short },
        entry_price: row.get("entry_price")?,
        atr_at_entry: row.get("atr_at_entry")?,
        exit_spec: serde_json::from_str(&exit_spec)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        features: serde_json::from_str(&features)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        feature_fingerprint: row.get("feature_fingerprint")?,
        llm_decision: llm_decision.and_then(|d| d.parse().ok()),
        llm_confidence: row.get("llm_confidence")?,
        llm_setup_quality: llm_setup_quality.and_then(|q| q.parse().ok()),
        rejection_reason: row.get("rejection_reason")?,
        taken: taken != 0,
        position_id: position_id.map(PositionId),
    })
}
