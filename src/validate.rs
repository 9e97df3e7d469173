//! Structural health check behind `cyl validate`.
//!
//! Findings are either fatal (the raw logs are missing, unreadable, or the
//! chain is broken) or warnings (recoverable drift that `repair`, `rebuild`
//! or `normalize` can fix). The command passes when nothing is fatal.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;

use crate::cache_index::{build_index, CacheIndexer};
use crate::config::Config;
use crate::cycles;
use crate::ledger::{self, check_chain};
use crate::models::CycleRecord;
use crate::normalize::Normalizer;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub ledger_entries: usize,
    pub ledger_invalid: usize,
    pub chain_breaks: usize,
    pub digest_mismatches: usize,
    pub cycles: usize,
    pub cycles_invalid: usize,
    pub fatal: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.fatal.is_empty()
    }
}

pub fn validate(config: &Config) -> Result<ValidationReport> {
    let layout = config.layout();
    let mut report = ValidationReport::default();

    // Ledger
    let ledger_path = layout.ledger_file();
    if !ledger_path.exists() {
        report
            .fatal
            .push(format!("missing ledger: {}", ledger_path.display()));
    } else {
        match ledger::scan(&ledger_path) {
            Ok(scan) => {
                let chain = check_chain(&scan);
                report.ledger_entries = chain.valid_entries;
                report.ledger_invalid = chain.invalid.len();
                report.chain_breaks = chain.breaks.len();
                report.digest_mismatches = chain.digest_mismatches.len();
                for issue in &chain.invalid {
                    report.warnings.push(format!("ledger {}", issue));
                }
                for b in &chain.breaks {
                    report.fatal.push(format!(
                        "ledger chain break at entry {} (line {}): expected {}, found {}",
                        b.index,
                        b.line,
                        b.expected.as_deref().unwrap_or("null"),
                        b.actual.as_deref().unwrap_or("null")
                    ));
                }
                for m in &chain.digest_mismatches {
                    report.fatal.push(format!(
                        "ledger entry {} (line {}) has a hash that does not match its contents",
                        m.entry_id, m.line
                    ));
                }
            }
            Err(e) => report.fatal.push(format!("unreadable ledger: {}", e)),
        }
    }

    // Cycle log and the index derived from it
    let cycle_path = layout.cycle_log();
    if !cycle_path.exists() {
        report
            .fatal
            .push(format!("missing cycle log: {}", cycle_path.display()));
    } else {
        match cycles::read_all(&cycle_path) {
            Ok(scan) => {
                report.cycles = scan.records.len();
                report.cycles_invalid = scan.invalid_lines.len();
                for line in &scan.invalid_lines {
                    report
                        .warnings
                        .push(format!("cycle log line {}: not a valid cycle record", line));
                }
                check_index(config, &scan.records, &mut report);
            }
            Err(e) => report.fatal.push(format!("unreadable cycle log: {}", e)),
        }
    }

    // Artifact shapes
    match Normalizer::new(&layout, &config.normalize.rules).and_then(|n| n.normalize(true)) {
        Ok(shapes) => {
            for action in shapes.actions_performed {
                report
                    .warnings
                    .push(format!("non-canonical artifact, `cyl normalize` would fix: {}", action));
            }
            report.warnings.extend(shapes.warnings);
        }
        Err(e) => report.warnings.push(format!("artifact check failed: {:#}", e)),
    }

    Ok(report)
}

fn check_index(
    config: &Config,
    records: &[CycleRecord],
    report: &mut ValidationReport,
) {
    let indexer = CacheIndexer::new(&config.layout(), &config.lock);
    let stored = match indexer.load() {
        Ok(Some(index)) => index,
        Ok(None) => {
            report
                .warnings
                .push("no cache index; run `cyl rebuild`".to_string());
            return;
        }
        Err(e) => {
            report
                .warnings
                .push(format!("cache index unreadable, run `cyl rebuild`: {:#}", e));
            return;
        }
    };

    let known: HashSet<u64> = records.iter().map(|r| r.cycle_id).collect();
    let drifted = stored
        .entries
        .iter()
        .filter(|e| !known.contains(&e.cycle_id))
        .count();
    if drifted > 0 {
        report.warnings.push(format!(
            "cache index references {} cycle(s) missing from the log",
            drifted
        ));
    } else if stored != build_index(records) {
        report
            .warnings
            .push("cache index is stale; run `cyl rebuild`".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycles::{CycleDraft, CycleLog};
    use crate::ledger::LedgerStore;
    use crate::models::{LedgerPayload, ManifestPayload};
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path());
        config.layout().ensure().unwrap();
        (tmp, config)
    }

    #[test]
    fn test_missing_logs_are_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path());
        let report = validate(&config).unwrap();
        assert!(!report.passed());
        assert_eq!(report.fatal.len(), 2);
    }

    #[test]
    fn test_fresh_workspace_passes_with_index_warning() {
        let (_tmp, config) = setup();
        let report = validate(&config).unwrap();
        assert!(report.passed(), "{:?}", report.fatal);
        assert!(report.warnings.iter().any(|w| w.contains("no cache index")));
    }

    #[test]
    fn test_invalid_lines_warn_but_pass() {
        let (_tmp, config) = setup();
        let layout = config.layout();
        LedgerStore::new(&layout, &config.lock)
            .append("m", LedgerPayload::Manifest(ManifestPayload::default()))
            .unwrap();
        writeln!(
            std::fs::OpenOptions::new().append(true).open(layout.ledger_file()).unwrap(),
            "nope"
        )
        .unwrap();
        CacheIndexer::new(&layout, &config.lock).rebuild().unwrap();

        let report = validate(&config).unwrap();
        assert!(report.passed());
        assert_eq!(report.ledger_entries, 1);
        assert_eq!(report.ledger_invalid, 1);
    }

    #[test]
    fn test_stale_index_warns() {
        let (_tmp, config) = setup();
        let layout = config.layout();
        CacheIndexer::new(&layout, &config.lock).rebuild().unwrap();
        CycleLog::new(&layout, &config.lock)
            .append(CycleDraft::default())
            .unwrap();

        let report = validate(&config).unwrap();
        assert!(report.passed());
        assert_eq!(report.cycles, 1);
        assert!(report.warnings.iter().any(|w| w.contains("stale")));
    }

    #[test]
    fn test_chain_break_is_fatal() {
        let (_tmp, config) = setup();
        let layout = config.layout();
        let store = LedgerStore::new(&layout, &config.lock);
        store
            .append("a", LedgerPayload::Manifest(ManifestPayload::default()))
            .unwrap();
        let content = std::fs::read_to_string(layout.ledger_file()).unwrap();
        let mut v: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        v["previous_hash"] = serde_json::json!("0000");
        std::fs::write(layout.ledger_file(), format!("{}\n", v)).unwrap();

        let report = validate(&config).unwrap();
        assert!(!report.passed());
        assert_eq!(report.chain_breaks, 1);
    }
}
