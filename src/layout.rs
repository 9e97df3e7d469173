//! Fixed on-disk layout of a workspace.
//!
//! ```text
//! <root>/ledger/ledger.jsonl          hash-chained ledger entries
//! <root>/ledger/cycles.jsonl          cycle log (source of truth)
//! <root>/cache/index.json             derived cache index
//! <root>/cache/timelines/<date>.json  derived per-day timelines
//! <root>/artifacts/                   ADRs, collaborator outputs, context snapshot
//! <root>/ide/focus.jsonl              editor focus events
//! ```
//!
//! Paths are conventions, not per-call options; only the root is configurable.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const LEDGER_DIR: &str = "ledger";
pub const CACHE_DIR: &str = "cache";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const IDE_DIR: &str = "ide";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join(LEDGER_DIR)
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.ledger_dir().join("ledger.jsonl")
    }

    pub fn ledger_lock(&self) -> PathBuf {
        self.ledger_dir().join("ledger.lock")
    }

    pub fn cycle_log(&self) -> PathBuf {
        self.ledger_dir().join("cycles.jsonl")
    }

    pub fn cycle_lock(&self) -> PathBuf {
        self.ledger_dir().join("cycles.lock")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn index_file(&self) -> PathBuf {
        self.cache_dir().join("index.json")
    }

    pub fn index_lock(&self) -> PathBuf {
        self.cache_dir().join("index.lock")
    }

    pub fn timelines_dir(&self) -> PathBuf {
        self.cache_dir().join("timelines")
    }

    pub fn timeline_file(&self, date: &str) -> PathBuf {
        self.timelines_dir().join(format!("{}.json", date))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.artifacts_dir().join(name)
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.artifact("context_snapshot.json")
    }

    pub fn focus_log(&self) -> PathBuf {
        self.root.join(IDE_DIR).join("focus.jsonl")
    }

    /// Create every directory of the layout plus empty raw logs. Idempotent.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.ledger_dir(),
            self.cache_dir(),
            self.timelines_dir(),
            self.artifacts_dir(),
            self.root.join(IDE_DIR),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        for file in [self.ledger_file(), self.cycle_log()] {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file)
                .with_context(|| format!("Failed to create file: {}", file.display()))?;
        }

        Ok(())
    }
}
