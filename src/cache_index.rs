//! Day / hour / file index over the cycle log.
//!
//! The index is always rebuilt from scratch. [`build_index`] is a pure
//! function of the records: maps are ordered and no generation time is
//! recorded, so rebuilding an unchanged log yields byte-identical JSON.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::config::LockConfig;
use crate::cycles;
use crate::layout::Layout;
use crate::models::{CacheIndex, CycleRecord, CycleSummary, DateRange};
use crate::storage::{self, FileLock};

pub fn build_index(records: &[CycleRecord]) -> CacheIndex {
    let mut by_day: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    let mut by_hour: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    let mut by_file: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    let mut entries = Vec::with_capacity(records.len());

    for record in records {
        match cycles::day_and_hour(&record.timestamp) {
            Some((day, hour)) => {
                by_day.entry(day).or_default().push(record.cycle_id);
                by_hour
                    .entry(format!("{:02}", hour))
                    .or_default()
                    .push(record.cycle_id);
            }
            None => tracing::warn!(
                cycle_id = record.cycle_id,
                timestamp = %record.timestamp,
                "unparseable timestamp; cycle not bucketed by day/hour"
            ),
        }

        for file in record.touched_files() {
            by_file
                .entry(file.to_string())
                .or_default()
                .push(record.cycle_id);
        }

        entries.push(CycleSummary {
            cycle_id: record.cycle_id,
            timestamp: record.timestamp.clone(),
            phase_counts: record
                .phases
                .iter()
                .map(|(name, phase)| (name.clone(), phase.count))
                .collect(),
        });
    }

    let date_range = DateRange {
        first: by_day.keys().next().cloned(),
        last: by_day.keys().next_back().cloned(),
    };

    CacheIndex {
        total_cycles: records.len(),
        date_range,
        by_day,
        by_hour,
        by_file,
        entries,
    }
}

/// Canonical serialized form written to `cache/index.json`.
pub fn to_json(index: &CacheIndex) -> Result<String> {
    Ok(storage::to_pretty_json(index)?)
}

#[derive(Debug, Clone)]
pub struct CacheIndexer {
    layout: Layout,
    lock: LockConfig,
}

impl CacheIndexer {
    pub fn new(layout: &Layout, lock: &LockConfig) -> Self {
        Self {
            layout: layout.clone(),
            lock: lock.clone(),
        }
    }

    /// Full rebuild from the cycle log; replaces `cache/index.json`.
    ///
    /// A missing cycle log produces (and persists) an empty index.
    pub fn rebuild(&self) -> Result<CacheIndex> {
        let (index, _) = self.rebuild_with_records()?;
        Ok(index)
    }

    /// Like [`rebuild`](Self::rebuild), also handing back the records read
    /// so callers can derive timelines without a second scan.
    pub fn rebuild_with_records(&self) -> Result<(CacheIndex, Vec<CycleRecord>)> {
        let _lock = FileLock::acquire(&self.layout.index_lock(), &self.lock)?;

        let log = self.layout.cycle_log();
        if !log.exists() {
            tracing::info!(log = %log.display(), "cycle log missing; writing empty index");
        }
        let scan = cycles::read_all(&log)
            .with_context(|| format!("Failed to read cycle log: {}", log.display()))?;

        let index = build_index(&scan.records);
        let json = to_json(&index)?;
        let path = self.layout.index_file();
        storage::write_atomic(&path, json.as_bytes())
            .with_context(|| format!("Failed to write index: {}", path.display()))?;

        tracing::info!(
            total_cycles = index.total_cycles,
            days = index.by_day.len(),
            files = index.by_file.len(),
            skipped_lines = scan.invalid_lines.len(),
            "cache index rebuilt"
        );
        Ok((index, scan.records))
    }

    /// The persisted index, if one has been written.
    pub fn load(&self) -> Result<Option<CacheIndex>> {
        let path = self.layout.index_file();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read index: {}", path.display()))
            }
        };
        let index = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index: {}", path.display()))?;
        Ok(Some(index))
    }
}
