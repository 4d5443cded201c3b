//! Append-only JSONL log of decision events.
//!
//! One line per candidate evaluation, flushed per bar. On resume the log
//! is truncated back to the checkpoint's bar index so replayed bars never
//! duplicate lines.

use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rewind_core::domain::DecisionEvent;

use crate::storage::StoreError;

pub struct DecisionLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DecisionLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file) })
    }

    pub fn append(&mut self, event: &DecisionEvent) -> Result<(), StoreError> {
        let line =
            serde_json::to_string(event).map_err(|e| StoreError::Serde(e.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush().map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop events newer than `cutoff` (resume path: events from bars
    /// after the checkpoint will be re-emitted by the replay).
    pub fn truncate_after(path: &Path, cutoff: DateTime<Utc>) -> Result<(), StoreError> {
        if !path.exists() {
            return Ok(());
        }
        let events = Self::read_all(path)?;
        let kept: Vec<&DecisionEvent> =
            events.iter().filter(|e| e.timestamp <= cutoff).collect();
        let mut out = String::new();
        for event in kept {
            out.push_str(
                &serde_json::to_string(event).map_err(|e| StoreError::Serde(e.to_string()))?,
            );
            out.push('\n');
        }
        std::fs::write(path, out).map_err(|e| StoreError::Io(e.to_string()))
    }

    pub fn read_all(path: &Path) -> Result<Vec<DecisionEvent>, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            events
                .push(serde_json::from_str(&line).map_err(|e| StoreError::Serde(e.to_string()))?);
        }
        Ok(events)
    }
}
