//! The cycle log: one JSON line per analysis cycle.
//!
//! The log is never rewritten. Readers tolerate malformed lines (they are
//! counted and skipped); the writer assigns monotonic `cycleId`s under the
//! cycle lock.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Timelike, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::LockConfig;
use crate::layout::Layout;
use crate::models::{CycleRecord, PhaseSummary};
use crate::storage::{self, FileLock, StoreError};

const TAIL_PROBE_LINES: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct CycleScan {
    pub records: Vec<CycleRecord>,
    /// 1-based line numbers that did not parse as a cycle record.
    pub invalid_lines: Vec<usize>,
}

/// Read the whole log. A missing file is an empty log.
pub fn read_all(path: &Path) -> Result<CycleScan, StoreError> {
    let mut scan = CycleScan::default();
    for (line, bytes) in storage::read_lines(path)? {
        match serde_json::from_slice::<CycleRecord>(&bytes) {
            Ok(record) => scan.records.push(record),
            Err(e) => {
                tracing::warn!(log = %path.display(), line, error = %e, "skipping unparseable cycle record");
                scan.invalid_lines.push(line);
            }
        }
    }
    Ok(scan)
}

/// The newest parseable record, from a tail read.
pub fn last_record(path: &Path) -> Result<Option<CycleRecord>, StoreError> {
    let tail = storage::read_tail_lines(path, TAIL_PROBE_LINES)?;
    let found = tail
        .iter()
        .rev()
        .find_map(|raw| serde_json::from_str::<CycleRecord>(raw).ok());
    if found.is_some() || tail.len() < TAIL_PROBE_LINES {
        return Ok(found);
    }
    Ok(read_all(path)?.records.pop())
}

/// Calendar day (`YYYY-MM-DD`) and hour of a timestamp, as written.
///
/// RFC 3339 timestamps keep their own offset; naive timestamps are taken
/// at face value.
pub fn day_and_hour(timestamp: &str) -> Option<(String, u32)> {
    let naive = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.naive_local(),
        Err(_) => ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())?,
    };
    Some((naive.date().format("%Y-%m-%d").to_string(), naive.hour()))
}

/// A cycle about to be appended; the writer fills in id and (optionally)
/// the timestamp.
#[derive(Debug, Clone, Default)]
pub struct CycleDraft {
    pub timestamp: Option<String>,
    pub phases: BTreeMap<String, PhaseSummary>,
    pub cognitive_load: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CycleLog {
    path: PathBuf,
    lock_path: PathBuf,
    lock: LockConfig,
}

impl CycleLog {
    pub fn new(layout: &Layout, lock: &LockConfig) -> Self {
        Self {
            path: layout.cycle_log(),
            lock_path: layout.cycle_lock(),
            lock: lock.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<CycleScan, StoreError> {
        read_all(&self.path)
    }

    pub fn last_record(&self) -> Result<Option<CycleRecord>, StoreError> {
        last_record(&self.path)
    }

    pub fn writer(&self) -> Result<CycleWriter, StoreError> {
        let lock = FileLock::acquire(&self.lock_path, &self.lock)?;
        let last_id = last_record(&self.path)?.map(|r| r.cycle_id).unwrap_or(0);
        let file = storage::open_append(&self.path)?;
        Ok(CycleWriter {
            path: self.path.clone(),
            file,
            last_id,
            _lock: lock,
        })
    }

    pub fn append(&self, draft: CycleDraft) -> Result<CycleRecord, StoreError> {
        self.writer()?.append(draft)
    }
}

#[derive(Debug)]
pub struct CycleWriter {
    path: PathBuf,
    file: File,
    last_id: u64,
    _lock: FileLock,
}

impl CycleWriter {
    pub fn append(&mut self, draft: CycleDraft) -> Result<CycleRecord, StoreError> {
        let record = CycleRecord {
            cycle_id: self.last_id + 1,
            timestamp: draft
                .timestamp
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            phases: draft.phases,
            cognitive_load: draft.cognitive_load,
            extra: BTreeMap::new(),
        };
        let line = serde_json::to_string(&record)?;
        storage::append_line(&mut self.file, &self.path, &line)?;
        self.last_id = record.cycle_id;
        tracing::debug!(cycle_id = record.cycle_id, "cycle recorded");
        Ok(record)
    }
}
