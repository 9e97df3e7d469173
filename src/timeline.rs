//! Per-day timelines derived from the cache index and the cycle log.
//!
//! The index says which cycles belong to a day; the log supplies their
//! contents. When the two disagree the log wins and the missing cycle is
//! skipped with a warning.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use crate::cache_index::{build_index, CacheIndexer};
use crate::config::LockConfig;
use crate::cycles;
use crate::layout::Layout;
use crate::models::{CacheIndex, CycleRecord, HourCount, Timeline};
use crate::storage;

pub fn generate_timeline(index: &CacheIndex, records: &[CycleRecord], date: &str) -> Timeline {
    let ids = match index.by_day.get(date) {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Timeline::empty(date),
    };

    let mut by_id: HashMap<u64, Vec<&CycleRecord>> = HashMap::new();
    for record in records {
        by_id.entry(record.cycle_id).or_default().push(record);
    }

    let mut histogram: BTreeMap<u32, usize> = BTreeMap::new();
    let mut loads = Vec::new();
    let mut total_cycles = 0;
    let mut seen: HashSet<u64> = HashSet::new();

    for id in ids {
        // The index lists a duplicated id once per record
        if !seen.insert(*id) {
            continue;
        }
        let Some(candidates) = by_id.get(id) else {
            tracing::warn!(cycle_id = id, date, "index references a cycle missing from the log; skipping");
            continue;
        };
        if candidates.len() > 1 {
            tracing::warn!(cycle_id = id, copies = candidates.len(), "duplicate cycle id in the log");
        }

        let mut on_day = 0;
        for record in candidates {
            let hour = match cycles::day_and_hour(&record.timestamp) {
                Some((day, _)) if day != date => continue,
                Some((_, hour)) => Some(hour),
                None => {
                    tracing::warn!(cycle_id = id, "cycle timestamp no longer parses; not counted by hour");
                    None
                }
            };
            on_day += 1;
            total_cycles += 1;
            if let Some(hour) = hour {
                *histogram.entry(hour).or_default() += 1;
            }
            if let Some(load) = record.cognitive_load.filter(|l| l.is_finite()) {
                loads.push(load);
            }
        }
        if on_day == 0 {
            tracing::warn!(cycle_id = id, date, "indexed cycle is no longer on this day; skipping");
        }
    }

    let cognitive_load_avg = if loads.is_empty() {
        0.0
    } else {
        loads.iter().sum::<f64>() / loads.len() as f64
    };

    // Ascending iteration + strict comparison keeps the smallest hour on ties
    let mut most_active_hour: Option<(u32, usize)> = None;
    for (&hour, &count) in &histogram {
        if most_active_hour.map_or(true, |(_, best)| count > best) {
            most_active_hour = Some((hour, count));
        }
    }

    Timeline {
        date: date.to_string(),
        hours: histogram
            .into_iter()
            .map(|(hour, count)| HourCount { hour, count })
            .collect(),
        total_cycles,
        cognitive_load_avg,
        most_active_hour: most_active_hour.map(|(hour, _)| hour),
    }
}

#[derive(Debug, Clone)]
pub struct TimelineAggregator {
    layout: Layout,
    lock: LockConfig,
}

impl TimelineAggregator {
    pub fn new(layout: &Layout, lock: &LockConfig) -> Self {
        Self {
            layout: layout.clone(),
            lock: lock.clone(),
        }
    }

    /// Timeline for one day using the persisted index.
    ///
    /// Without a persisted index the index is built in memory; nothing is
    /// written in that case.
    pub fn for_date(&self, date: &str) -> Result<Timeline> {
        let log = self.layout.cycle_log();
        let scan = cycles::read_all(&log)
            .with_context(|| format!("Failed to read cycle log: {}", log.display()))?;

        let index = match CacheIndexer::new(&self.layout, &self.lock).load()? {
            Some(index) => index,
            None => {
                tracing::info!("no cache index on disk; indexing in memory");
                build_index(&scan.records)
            }
        };

        Ok(generate_timeline(&index, &scan.records, date))
    }

    /// Write `cache/timelines/<date>.json` for every indexed day and remove
    /// files for days the index no longer has.
    pub fn write_all(&self, index: &CacheIndex, records: &[CycleRecord]) -> Result<Vec<PathBuf>> {
        let dir = self.layout.timelines_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let mut written = Vec::with_capacity(index.by_day.len());
        for date in index.by_day.keys() {
            let timeline = generate_timeline(index, records, date);
            let path = self.layout.timeline_file(date);
            storage::write_json_atomic(&path, &timeline)
                .with_context(|| format!("Failed to write timeline: {}", path.display()))?;
            written.push(path);
        }

        let keep: BTreeSet<&String> = index.by_day.keys().collect();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let stale = path.extension().is_some_and(|e| e == "json")
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| !keep.contains(&stem.to_string()));
            if stale {
                tracing::debug!(path = %path.display(), "removing stale timeline");
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }

        Ok(written)
    }
}
