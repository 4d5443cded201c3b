//! Position ledger: the sole source of truth for PnL.
//!
//! Closures are append-once: closing an already-closed position is an
//! error. Live trailing state is persisted per bar so a resumed run can
//! reconstruct open positions exactly. Realized equity is always a SQL
//! aggregate over closed rows, never a cached number.

use rusqlite::{params, Connection, Row};
use std::path::Path;

use rewind_core::domain::{
    CandidateId, ClosureEvent, Direction, ExitReason, PositionId, PositionRow, RunId,
};

use crate::storage::StoreError;

pub struct PositionLedger {
    conn: Connection,
}

impl PositionLedger {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = super::open_versioned(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS positions (
                position_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                candidate_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_timestamp TEXT NOT NULL,
                entry_bar_index INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                entry_fees_quote REAL NOT NULL,
                size_quote REAL NOT NULL,
                size_units REAL NOT NULL,
                atr_at_entry REAL NOT NULL,
                stop_loss_price REAL NOT NULL,
                take_profit_price REAL NOT NULL,
                time_stop_bars INTEGER NOT NULL,
                trailing_enabled INTEGER NOT NULL,
                trailing_activation_price REAL,
                trailing_distance_atr REAL,
                trailing_armed INTEGER NOT NULL DEFAULT 0,
                trailing_stop REAL,
                highest_high REAL NOT NULL,
                lowest_low REAL NOT NULL,
                is_open INTEGER NOT NULL DEFAULT 1,
                exit_timestamp TEXT,
                exit_bar_index INTEGER,
                exit_price REAL,
                exit_fees_quote REAL,
                exit_reason TEXT,
                pnl_quote REAL,
                pnl_pct REAL,
                r_multiple REAL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_run
                ON positions(run_id, symbol, is_open, entry_timestamp);
            CREATE INDEX IF NOT EXISTS idx_positions_candidate
                ON positions(candidate_id);",
        )?;
        Ok(Self { conn })
    }

    /// Record an opening. Insert-or-replace keeps crash-recovery replays
    /// idempotent.
    pub fn open_position(&self, row: &PositionRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO positions (
                position_id, run_id, candidate_id, symbol, direction,
                entry_timestamp, entry_bar_index, entry_price, entry_fees_quote,
                size_quote, size_units, atr_at_entry, stop_loss_price,
                take_profit_price, time_stop_bars, trailing_enabled,
                trailing_activation_price, trailing_distance_atr, trailing_armed,
                trailing_stop, highest_high, lowest_low, is_open
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, 1)",
            params![
                row.position_id.as_str(),
                row.run_id.as_str(),
                row.candidate_id.as_str(),
                row.symbol,
                row.direction.as_str(),
                row.entry_timestamp.to_rfc3339(),
                row.entry_bar_index as i64,
                row.entry_price,
                row.entry_fees_quote,
                row.size_quote,
                row.size_units,
                row.atr_at_entry,
                row.stop_loss_price,
                row.take_profit_price,
                row.time_stop_bars as i64,
                row.trailing_enabled as i64,
                row.trailing_activation_price,
                row.trailing_distance_atr,
                row.trailing_armed as i64,
                row.trailing_stop,
                row.highest_high,
                row.lowest_low,
            ],
        )?;
        Ok(())
    }

    /// Persist the live trailing state for an open position.
    pub fn update_trailing_state(
        &self,
        position_id: &PositionId,
        trailing_armed: bool,
        trailing_stop: Option<f64>,
        highest_high: f64,
        lowest_low: f64,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE positions
             SET trailing_armed = ?1, trailing_stop = ?2, highest_high = ?3,
                 lowest_low = ?4
             WHERE position_id = ?5 AND is_open = 1",
            params![
                trailing_armed as i64,
                trailing_stop,
                highest_high,
                lowest_low,
                position_id.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::PositionNotFound(position_id.to_string()));
        }
        Ok(())
    }

    /// Record a closure. Closing a closed (or unknown) position is an
    /// error; the ledger is append-once per lifecycle transition.
    pub fn close_position(&self, closure: &ClosureEvent) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE positions
             SET is_open = 0, exit_timestamp = ?1, exit_bar_index = ?2,
                 exit_price = ?3, exit_fees_quote = ?4, exit_reason = ?5,
                 pnl_quote = ?6, pnl_pct = ?7, r_multiple = ?8
             WHERE position_id = ?9 AND is_open = 1",
            params![
                closure.exit_timestamp.to_rfc3339(),
                closure.exit_bar_index as i64,
                closure.exit_price,
                closure.exit_fees_quote,
                closure.exit_reason.as_str(),
                closure.pnl_quote,
                closure.pnl_pct,
                closure.r_multiple,
                closure.position_id.as_str(),
            ],
        )?;
        if updated == 0 {
            let exists: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM positions WHERE position_id = ?1",
                [closure.position_id.as_str()],
                |row| row.get(0),
            )?;
            return Err(if exists > 0 {
                StoreError::AlreadyClosed(closure.position_id.to_string())
            } else {
                StoreError::PositionNotFound(closure.position_id.to_string())
            });
        }
        Ok(())
    }

    pub fn get(&self, position_id: &PositionId) -> Result<Option<PositionRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM positions WHERE position_id = ?1")?;
        let mut rows = stmt.query_map([position_id.as_str()], row_to_position)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn open_positions(&self, run_id: &RunId) -> Result<Vec<PositionRow>, StoreError> {
        self.select_rows(
            "SELECT * FROM positions WHERE run_id = ?1 AND is_open = 1
             ORDER BY entry_timestamp, position_id",
            run_id,
        )
    }

    pub fn all_positions(&self, run_id: &RunId) -> Result<Vec<PositionRow>, StoreError> {
        self.select_rows(
            "SELECT * FROM positions WHERE run_id = ?1
             ORDER BY entry_timestamp, position_id",
            run_id,
        )
    }

    /// Realized PnL over closed positions: the only sanctioned equity
    /// input.
    pub fn realized_pnl(&self, run_id: &RunId) -> Result<f64, StoreError> {
        let sum: Option<f64> = self.conn.query_row(
            "SELECT SUM(pnl_quote) FROM positions WHERE run_id = ?1 AND is_open = 0",
            [run_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }

    fn select_rows(&self, sql: &str, run_id: &RunId) -> Result<Vec<PositionRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([run_id.as_str()], row_to_position)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<PositionRow> {
    let direction: String = row.get("direction")?;
    let entry_timestamp: String = row.get("entry_timestamp")?;
    let exit_timestamp: Option<String> = row.get("exit_timestamp")?;
    let exit_reason: Option<String> = row.get("exit_reason")?;
    let entry_bar_index: i64 = row.get("entry_bar_index")?;
    let time_stop_bars: i64 = row.get("time_stop_bars")?;
    let exit_bar_index: Option<i64> = row.get("exit_bar_index")?;
    let trailing_enabled: i64 = row.get("trailing_enabled")?;
    let trailing_armed: i64 = row.get("trailing_armed")?;
    let is_open: i64 = row.get("is_open")?;

    Ok(PositionRow {
        position_id: PositionId(row.get("position_id")?),
        run_id: RunId(row.get("run_id")?),
        candidate_id: CandidateId(row.get("candidate_id")?),
        symbol: row.get("symbol")?,
        direction: if direction == "long" { Direction::Long } else { Direction::Short },
        entry_timestamp: entry_timestamp
            .parse()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        entry_bar_index: entry_bar_index as usize,
        entry_price: row.get("entry_price")?,
        entry_fees_quote: row.get("entry_fees_quote")?,
        size_quote: row.get("size_quote")?,
        size_units: row.get("size_units")?,
        atr_at_entry: row.get("atr_at_entry")?,
        stop_loss_price: row.get("stop_loss_price")?,
        take_profit_price: row.get("take_profit_price")?,
        time_stop_bars: time_stop_bars as usize,
        trailing_enabled: trailing_enabled != 0,
        trailing_activation_price: row.get("trailing_activation_price")?,
        trailing_distance_atr: row.get("trailing_distance_atr")?,
        trailing_armed: trailing_armed != 0,
        trailing_stop: row.get("trailing_stop")?,
        highest_high: row.get("highest_high")?,
        lowest_low: row.get("lowest_low")?,
        is_open: is_open != 0,
        exit_timestamp: exit_timestamp
            .map(|t| {
                t.parse()
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })
            .transpose()?,
        exit_bar_index: exit_bar_index.map(|i| i as usize),
        exit_price: row.get("exit_price")?,
        exit_fees_quote: row.get("exit_fees_quote")?,
        exit_reason: exit_reason.and_then(|r| ExitReason::parse(&r)),
        pnl_quote: row.get("pnl_quote")?,
        pnl_pct: row.get("pnl_pct")?,
        r_multiple: row.get("r_multiple")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn open_ledger() -> (tempfile::TempDir, PositionLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PositionLedger::open(&dir.path().join("positions.sqlite")).unwrap();
        (dir, ledger)
    }

    fn position_row(id: &str) -> PositionRow {
        PositionRow {
            position_id: PositionId(id.to_string()),
            run_id: RunId::new("run"),
            candidate_id: CandidateId("run:BTC-USD:9:breakout".into()),
            symbol: "BTC-USD".into(),
            direction: Direction::Long,
            entry_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            entry_bar_index: 10,
            entry_price: 100.0,
            entry_fees_quote: 1.25,
            size_quote: 1000.0,
            size_units: 10.0,
            atr_at_entry: 2.0,
            stop_loss_price: 97.6,
            take_profit_price: 104.8,
            time_stop_bars: 32,
            trailing_enabled: true,
            trailing_activation_price: Some(102.4),
            trailing_distance_atr: Some(1.2),
            trailing_armed: false,
            trailing_stop: None,
            highest_high: 100.0,
            lowest_low: 100.0,
            is_open: true,
            exit_timestamp: None,
            exit_bar_index: None,
            exit_price: None,
            exit_fees_quote: None,
            exit_reason: None,
            pnl_quote: None,
            pnl_pct: None,
            r_multiple: None,
        }
    }

    fn closure(id: &str, pnl: f64) -> ClosureEvent {
        ClosureEvent {
            position_id: PositionId(id.to_string()),
            candidate_id: CandidateId("run:BTC-USD:9:breakout".into()),
            symbol: "BTC-USD".into(),
            direction: Direction::Long,
            exit_bar_index: 20,
            exit_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            exit_price: 103.0,
            exit_fees_quote: 0.6,
            exit_reason: ExitReason::TrailingStop,
            bars_held: 10,
            pnl_quote: pnl,
            pnl_pct: pnl / 1000.0,
            r_multiple: 1.2,
        }
    }

    #[test]
    fn open_and_fetch_roundtrip() {
        let (_dir, ledger) = open_ledger();
        let row = position_row("run:BTC-USD:10:p0");
        ledger.open_position(&row).unwrap();
        let back = ledger.get(&row.position_id).unwrap().unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn close_marks_row_and_is_once_only() {
        let (_dir, ledger) = open_ledger();
        let row = position_row("run:BTC-USD:10:p0");
        ledger.open_position(&row).unwrap();
        ledger.close_position(&closure("run:BTC-USD:10:p0", 28.5)).unwrap();

        let back = ledger.get(&row.position_id).unwrap().unwrap();
        assert!(!back.is_open);
        assert_eq!(back.exit_reason, Some(ExitReason::TrailingStop));
        assert_eq!(back.pnl_quote, Some(28.5));

        // Double close is an error
        assert!(matches!(
            ledger.close_position(&closure("run:BTC-USD:10:p0", 28.5)),
            Err(StoreError::AlreadyClosed(_))
        ));
    }

    #[test]
    fn closing_unknown_position_is_distinct_error() {
        let (_dir, ledger) = open_ledger();
        assert!(matches!(
            ledger.close_position(&closure("run:BTC-USD:99:p0", 0.0)),
            Err(StoreError::PositionNotFound(_))
        ));
    }

    #[test]
    fn update_trailing_state_persists() {
        let (_dir, ledger) = open_ledger();
        let row = position_row("run:BTC-USD:10:p0");
        ledger.open_position(&row).unwrap();
        ledger
            .update_trailing_state(&row.position_id, true, Some(101.6), 104.0, 99.0)
            .unwrap();
        let back = ledger.get(&row.position_id).unwrap().unwrap();
        assert!(back.trailing_armed);
        assert_eq!(back.trailing_stop, Some(101.6));
        assert_eq!(back.highest_high, 104.0);
    }

    #[test]
    fn open_positions_excludes_closed() {
        let (_dir, ledger) = open_ledger();
        ledger.open_position(&position_row("run:BTC-USD:10:p0")).unwrap();
        ledger.open_position(&position_row("run:BTC-USD:12:p0")).unwrap();
        ledger.close_position(&closure("run:BTC-USD:10:p0", 10.0)).unwrap();

        let run = RunId::new("run");
        let open = ledger.open_positions(&run).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].position_id.as_str(), "run:BTC-USD:12:p0");
        assert_eq!(ledger.all_positions(&run).unwrap().len(), 2);
    }

    #[test]
    fn realized_pnl_sums_closed_rows_only() {
        let (_dir, ledger) = open_ledger();
        let run = RunId::new("run");
        assert_eq!(ledger.realized_pnl(&run).unwrap(), 0.0);

        ledger.open_position(&position_row("run:BTC-USD:10:p0")).unwrap();
        ledger.open_position(&position_row("run:BTC-USD:12:p0")).unwrap();
        ledger.close_position(&closure("run:BTC-USD:10:p0", 25.0)).unwrap();
        assert!((ledger.realized_pnl(&run).unwrap() - 25.0).abs() < 1e-9);

        ledger.close_position(&closure("run:BTC-USD:12:p0", -10.0)).unwrap();
        assert!((ledger.realized_pnl(&run).unwrap() - 15.0).abs() < 1e-9);
    }
}
