//! Current-state snapshot for polling clients.
//!
//! Built from the newest cycle record plus whatever collaborator artifacts
//! are available. Only the cycle log read can fail the whole snapshot; each
//! optional source that is missing or unreadable just leaves its field out.
//!
//! Every read is bounded: the logs are read from the tail and whole-file
//! artifacts above `snapshot.max_artifact_bytes` are skipped.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SnapshotConfig;
use crate::cycles;
use crate::layout::Layout;
use crate::models::{json_kind, ContextSnapshot};
use crate::storage;

/// Focus events read per requested recent file; repeats are common.
const FOCUS_EVENTS_PER_FILE: usize = 8;

#[derive(Debug, Clone)]
pub struct ContextSnapshotGenerator {
    layout: Layout,
    cfg: SnapshotConfig,
}

impl ContextSnapshotGenerator {
    pub fn new(layout: &Layout, cfg: &SnapshotConfig) -> Self {
        Self {
            layout: layout.clone(),
            cfg: cfg.clone(),
        }
    }

    /// `None` when no cycle has been recorded yet.
    pub fn generate(&self) -> Result<Option<ContextSnapshot>> {
        let log = self.layout.cycle_log();
        let Some(last) = cycles::last_record(&log)
            .with_context(|| format!("Failed to read cycle log: {}", log.display()))?
        else {
            return Ok(None);
        };

        let mut snapshot = ContextSnapshot {
            cycle_id: last.cycle_id,
            timestamp: last.timestamp,
            focused_file: None,
            recently_viewed: None,
            patterns: None,
            forecasts: None,
            mood: None,
            confidence: None,
        };

        if let Some(recent) = optional("ide focus", self.recent_files()) {
            if !recent.is_empty() {
                snapshot.focused_file = recent.first().cloned();
                snapshot.recently_viewed = Some(recent);
            }
        }

        snapshot.patterns = optional("patterns", self.latest_items("patterns.json"));
        snapshot.forecasts = optional("forecasts", self.latest_items("forecasts.json"));

        if let Some(state) = optional("mental state", self.mental_state()) {
            snapshot.mood = state
                .get("mood")
                .and_then(Value::as_str)
                .map(str::to_string);
            snapshot.confidence = state.get("confidence").and_then(Value::as_f64);
        }

        Ok(Some(snapshot))
    }

    /// Generate and persist to `artifacts/context_snapshot.json`.
    pub fn write(&self) -> Result<Option<(ContextSnapshot, PathBuf)>> {
        let Some(snapshot) = self.generate()? else {
            return Ok(None);
        };
        let path = self.layout.snapshot_file();
        storage::write_json_atomic(&path, &snapshot)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
        Ok(Some((snapshot, path)))
    }

    /// Distinct files of the newest focus events, newest first.
    fn recent_files(&self) -> Result<Vec<String>> {
        let path = self.layout.focus_log();
        require_exists(&path)?;
        let limit = self.cfg.recent_files;
        let lines = storage::read_tail_lines(&path, limit * FOCUS_EVENTS_PER_FILE)?;

        let mut files: Vec<String> = Vec::with_capacity(limit);
        for raw in lines.iter().rev() {
            let Ok(event) = serde_json::from_str::<Value>(raw) else {
                tracing::debug!("skipping unparseable focus event");
                continue;
            };
            let file = event
                .get("file")
                .or_else(|| event.get("path"))
                .and_then(Value::as_str);
            if let Some(file) = file {
                if !files.iter().any(|f| f == file) {
                    files.push(file.to_string());
                }
            }
            if files.len() >= limit {
                break;
            }
        }
        Ok(files)
    }

    /// Last `max_items` elements of a canonical (bare array) artifact.
    fn latest_items(&self, name: &str) -> Result<Vec<Value>> {
        let value = self.read_small_json(&self.layout.artifact(name))?;
        let mut items = match value {
            Value::Array(items) => items,
            other => bail!(
                "{} is {}, not an array; run `cyl normalize`",
                name,
                json_kind(&other)
            ),
        };
        let skip = items.len().saturating_sub(self.cfg.max_items);
        Ok(items.split_off(skip))
    }

    fn mental_state(&self) -> Result<Value> {
        let value = self.read_small_json(&self.layout.artifact("mental_state.json"))?;
        if !value.is_object() {
            bail!("mental_state.json is {}, not an object", json_kind(&value));
        }
        Ok(value)
    }

    fn read_small_json(&self, path: &Path) -> Result<Value> {
        require_exists(path)?;
        let size = std::fs::metadata(path)?.len();
        if size > self.cfg.max_artifact_bytes {
            bail!(
                "{} is {} bytes, above the {} byte snapshot budget",
                path.display(),
                size,
                self.cfg.max_artifact_bytes
            );
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?)
    }
}

/// An optional source that simply is not there yet.
#[derive(Debug, Error)]
#[error("{} not found", .0.display())]
struct Missing(PathBuf);

fn require_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Missing(path.to_path_buf()).into());
    }
    Ok(())
}

/// Keep a best-effort field's value, logging why it was dropped otherwise.
fn optional<T>(source: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is::<Missing>() => {
            tracing::debug!(source, "{:#}", e);
            None
        }
        Err(e) => {
            tracing::warn!(source, "omitting from snapshot: {:#}", e);
            None
        }
    }
}
