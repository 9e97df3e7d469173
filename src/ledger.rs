//! Append-only, hash-chained ledger.
//!
//! Each entry binds itself to its position with
//! `current_hash = SHA-256(target_id, previous_hash)`, where the first entry
//! has `previous_hash = null`. [`LedgerStore::verify_chain`] reports malformed
//! lines and broken links without touching the file;
//! [`LedgerStore::repair`] drops malformed lines and recomputes the chain from
//! the first entry forward.
//!
//! Appends go through a [`LedgerWriter`], which holds the ledger lock and the
//! tail hash for as long as it lives.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::LockConfig;
use crate::layout::Layout;
use crate::models::{LedgerEntry, LedgerPayload};
use crate::storage::{self, FileLock, StoreError};

/// Stand-in for a null `previous_hash` when computing the genesis digest.
const GENESIS_MARKER: &str = "genesis";

/// Fields that must be present on every line. `previous_hash` may be null
/// but not absent.
const REQUIRED_FIELDS: [&str; 5] = [
    "entry_id",
    "type",
    "target_id",
    "current_hash",
    "previous_hash",
];

/// Lines inspected from the end of the file before falling back to a full scan.
const TAIL_PROBE_LINES: usize = 32;

/// Digest binding an entry to its predecessor.
pub fn chain_digest(target_id: &str, previous_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(previous_hash.unwrap_or(GENESIS_MARKER).as_bytes());
    hex::encode(hasher.finalize())
}

/// Why a ledger line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineIssue {
    #[error("line {line}: invalid JSON: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: schema violation: {message}")]
    Schema { line: usize, message: String },
}

impl LineIssue {
    pub fn line(&self) -> usize {
        match self {
            LineIssue::Parse { line, .. } | LineIssue::Schema { line, .. } => *line,
        }
    }
}

/// Parse and validate one ledger line.
pub fn parse_line(line: usize, raw: &str) -> Result<LedgerEntry, LineIssue> {
    let value: Value = serde_json::from_str(raw).map_err(|e| LineIssue::Parse {
        line,
        message: e.to_string(),
    })?;

    let schema = |message: String| LineIssue::Schema { line, message };

    let obj = value
        .as_object()
        .ok_or_else(|| schema("entry is not a JSON object".to_string()))?;
    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(schema(format!("missing field `{}`", field)));
        }
    }

    serde_json::from_value(value).map_err(|e| schema(e.to_string()))
}

/// A structurally valid entry together with where it came from.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub line: usize,
    pub raw: String,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone)]
pub struct RejectedLine {
    pub issue: LineIssue,
    /// The line exactly as stored, which may not be valid UTF-8.
    pub raw: Vec<u8>,
}

/// Every line of the ledger, split into valid entries and rejects.
#[derive(Debug, Clone, Default)]
pub struct LedgerScan {
    pub entries: Vec<ScannedEntry>,
    pub rejected: Vec<RejectedLine>,
}

impl LedgerScan {
    pub fn total_lines(&self) -> usize {
        self.entries.len() + self.rejected.len()
    }
}

pub fn scan(path: &Path) -> Result<LedgerScan, StoreError> {
    let mut scan = LedgerScan::default();
    for (line, bytes) in storage::read_lines(path)? {
        let parsed = match std::str::from_utf8(&bytes) {
            Ok(text) => parse_line(line, text).map(|entry| (entry, text.to_string())),
            Err(e) => Err(LineIssue::Parse {
                line,
                message: format!("invalid UTF-8: {}", e),
            }),
        };
        match parsed {
            Ok((entry, raw)) => scan.entries.push(ScannedEntry { line, raw, entry }),
            Err(issue) => scan.rejected.push(RejectedLine { issue, raw: bytes }),
        }
    }
    Ok(scan)
}

/// A position where `previous_hash` does not match the predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    /// Position among valid entries.
    pub index: usize,
    /// 1-based line in the file.
    pub line: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// An entry whose `current_hash` is not the digest of its own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestMismatch {
    pub index: usize,
    pub line: usize,
    pub entry_id: String,
    pub recorded: String,
    pub computed: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub total_lines: usize,
    pub valid_entries: usize,
    pub invalid: Vec<LineIssue>,
    pub breaks: Vec<ChainBreak>,
    pub digest_mismatches: Vec<DigestMismatch>,
}

/// Check links between consecutive valid entries of a scan.
pub fn check_chain(scan: &LedgerScan) -> ChainReport {
    let mut breaks = Vec::new();
    let mut digest_mismatches = Vec::new();
    let mut expected: Option<&str> = None;

    for (index, scanned) in scan.entries.iter().enumerate() {
        let entry = &scanned.entry;
        if entry.previous_hash.as_deref() != expected {
            breaks.push(ChainBreak {
                index,
                line: scanned.line,
                expected: expected.map(str::to_string),
                actual: entry.previous_hash.clone(),
            });
        }

        let computed = chain_digest(&entry.target_id, entry.previous_hash.as_deref());
        if computed != entry.current_hash {
            digest_mismatches.push(DigestMismatch {
                index,
                line: scanned.line,
                entry_id: entry.entry_id.clone(),
                recorded: entry.current_hash.clone(),
                computed,
            });
        }

        expected = Some(entry.current_hash.as_str());
    }

    let invalid: Vec<LineIssue> = scan.rejected.iter().map(|r| r.issue.clone()).collect();
    ChainReport {
        valid: invalid.is_empty() && breaks.is_empty() && digest_mismatches.is_empty(),
        total_lines: scan.total_lines(),
        valid_entries: scan.entries.len(),
        invalid,
        breaks,
        digest_mismatches,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepairOptions {
    /// Report what would change without writing anything.
    pub dry_run: bool,
    /// Copy dropped lines to `<ledger>.rejected` once the rewrite succeeds.
    pub quarantine: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub repaired_count: usize,
    pub removed_count: usize,
    pub final_length: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_path: Option<PathBuf>,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.repaired_count > 0 || self.removed_count > 0
    }
}

/// The ledger file of a workspace.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: LockConfig,
}

impl LedgerStore {
    pub fn new(layout: &Layout, lock: &LockConfig) -> Self {
        Self {
            path: layout.ledger_file(),
            lock_path: layout.ledger_lock(),
            lock: lock.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the single writer for this ledger.
    pub fn writer(&self) -> Result<LedgerWriter, StoreError> {
        LedgerWriter::open(&self.path, &self.lock_path, &self.lock)
    }

    /// Append one entry through a short-lived writer.
    pub fn append(&self, target_id: &str, payload: LedgerPayload) -> Result<LedgerEntry> {
        let mut writer = self.writer()?;
        Ok(writer.append(target_id, payload)?)
    }

    pub fn verify_chain(&self) -> Result<ChainReport> {
        let scan = scan(&self.path)
            .with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;
        Ok(check_chain(&scan))
    }

    /// Drop malformed lines and recompute every link from the first entry.
    ///
    /// Nothing is written when the chain is already consistent.
    pub fn repair(&self, opts: RepairOptions) -> Result<RepairReport> {
        let _lock = FileLock::acquire(&self.lock_path, &self.lock)?;
        let scan = scan(&self.path)
            .with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;

        let mut repaired_count = 0;
        let mut lines = Vec::with_capacity(scan.entries.len());
        let mut previous: Option<String> = None;

        for scanned in scan.entries {
            let mut entry = scanned.entry;
            let digest = chain_digest(&entry.target_id, previous.as_deref());
            if entry.previous_hash != previous || entry.current_hash != digest {
                tracing::debug!(
                    entry_id = %entry.entry_id,
                    line = scanned.line,
                    "relinking ledger entry"
                );
                entry.previous_hash = previous.clone();
                entry.current_hash = digest;
                repaired_count += 1;
                lines.push(serde_json::to_string(&entry)?);
            } else {
                lines.push(scanned.raw);
            }
            previous = Some(entry.current_hash);
        }

        let mut report = RepairReport {
            repaired_count,
            removed_count: scan.rejected.len(),
            final_length: lines.len(),
            dry_run: opts.dry_run,
            backup_path: None,
            rejected_path: None,
        };

        if opts.dry_run || !report.changed() {
            return Ok(report);
        }

        let backup = self.backup_path();
        std::fs::copy(&self.path, &backup)
            .with_context(|| format!("Failed to back up ledger to {}", backup.display()))?;
        report.backup_path = Some(backup);

        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        storage::write_atomic(&self.path, body.as_bytes())?;

        // Only after the rewrite landed; a failed rewrite leaves no side file
        if opts.quarantine && !scan.rejected.is_empty() {
            let rejected_path = self.rejected_path();
            let mut file = storage::open_append(&rejected_path)?;
            for rejected in &scan.rejected {
                storage::append_raw_line(&mut file, &rejected_path, &rejected.raw)?;
            }
            report.rejected_path = Some(rejected_path);
        }

        tracing::info!(
            repaired = report.repaired_count,
            removed = report.removed_count,
            final_length = report.final_length,
            "ledger repaired"
        );
        Ok(report)
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        sibling(&self.path, &format!("backup-{}", stamp))
    }

    pub fn rejected_path(&self) -> PathBuf {
        sibling(&self.path, "rejected")
    }
}

/// `ledger.jsonl` + `suffix` -> `ledger.jsonl.<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Exclusive appender owning the ledger tail.
#[derive(Debug)]
pub struct LedgerWriter {
    path: PathBuf,
    file: File,
    last_hash: Option<String>,
    _lock: FileLock,
}

impl LedgerWriter {
    fn open(path: &Path, lock_path: &Path, lock: &LockConfig) -> Result<Self, StoreError> {
        let lock = FileLock::acquire(lock_path, lock)?;
        let last_hash = last_valid_hash(path)?;
        let file = storage::open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_hash,
            _lock: lock,
        })
    }

    /// Hash the next entry will chain to.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn append(
        &mut self,
        target_id: &str,
        payload: LedgerPayload,
    ) -> Result<LedgerEntry, StoreError> {
        let previous_hash = self.last_hash.clone();
        let entry = LedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            target_id: target_id.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            current_hash: chain_digest(target_id, previous_hash.as_deref()),
            previous_hash,
            payload,
        };

        let line = serde_json::to_string(&entry)?;
        storage::append_line(&mut self.file, &self.path, &line)?;
        self.last_hash = Some(entry.current_hash.clone());

        tracing::debug!(
            entry_id = %entry.entry_id,
            kind = %entry.entry_type(),
            target = %entry.target_id,
            "ledger entry appended"
        );
        Ok(entry)
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush().map_err(|e| StoreError::io(&self.path, e))
    }
}

/// `current_hash` of the last valid entry, reading only the tail when possible.
fn last_valid_hash(path: &Path) -> Result<Option<String>, StoreError> {
    let tail = storage::read_tail_lines(path, TAIL_PROBE_LINES)?;
    let found = tail
        .iter()
        .rev()
        .find_map(|raw| parse_line(0, raw).ok().map(|e| e.current_hash));
    if found.is_some() || tail.len() < TAIL_PROBE_LINES {
        return Ok(found);
    }

    Ok(scan(path)?
        .entries
        .last()
        .map(|s| s.entry.current_hash.clone()))
}
