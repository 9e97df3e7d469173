//! Workspace statistics and health overview.
//!
//! Provides a quick summary of what has been recorded: ledger entries by
//! type, cycle counts, the indexed date range, and how recently the last
//! cycle ran. Used by `cyl stats`.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::cache_index::CacheIndexer;
use crate::config::Config;
use crate::cycles;
use crate::ledger;
use crate::models::{CacheIndex, EntryType};

/// Run the stats command: scan the logs and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let layout = config.layout();

    let ledger_scan = ledger::scan(&layout.ledger_file())?;
    let mut by_type: BTreeMap<EntryType, usize> = BTreeMap::new();
    for scanned in &ledger_scan.entries {
        *by_type.entry(scanned.entry.entry_type()).or_default() += 1;
    }

    let cycle_scan = cycles::read_all(&layout.cycle_log())?;
    let last_cycle = cycle_scan.records.last();
    let index = CacheIndexer::new(&layout, &config.lock).load();

    println!("Cycle Ledger — Workspace Stats");
    println!("==============================");
    println!();
    println!("  Workspace:   {}", layout.root().display());
    println!("  Ledger:      {}", file_size(&layout.ledger_file()));
    println!("  Cycle log:   {}", file_size(&layout.cycle_log()));
    println!("  Index:       {}", file_size(&layout.index_file()));
    println!();
    println!(
        "  Entries:     {} ({} invalid line{})",
        ledger_scan.entries.len(),
        ledger_scan.rejected.len(),
        if ledger_scan.rejected.len() == 1 { "" } else { "s" }
    );
    println!(
        "  Cycles:      {} ({} invalid line{})",
        cycle_scan.records.len(),
        cycle_scan.invalid_lines.len(),
        if cycle_scan.invalid_lines.len() == 1 { "" } else { "s" }
    );

    match last_cycle {
        Some(record) => println!(
            "  Last cycle:  #{} {}",
            record.cycle_id,
            format_ts_relative(&record.timestamp)
        ),
        None => println!("  Last cycle:  never"),
    }

    println!("  Indexed:     {}", index_summary(index));

    if !by_type.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<12} {:>8}", "TYPE", "ENTRIES");
        println!("  {}", "-".repeat(21));
        for (kind, count) in &by_type {
            println!("  {:<12} {:>8}", kind, count);
        }
    }

    println!();
    Ok(())
}

fn index_summary(index: Result<Option<CacheIndex>>) -> String {
    match index {
        Ok(Some(index)) => {
            let range = match (&index.date_range.first, &index.date_range.last) {
                (Some(first), Some(last)) => format!("{} .. {}", first, last),
                _ => "empty".to_string(),
            };
            format!(
                "{} cycles, {} days, {} files ({})",
                index.total_cycles,
                index.by_day.len(),
                index.by_file.len(),
                range
            )
        }
        Ok(None) => "not built (run `cyl rebuild`)".to_string(),
        Err(e) => format!("unreadable, run `cyl rebuild`: {:#}", e),
    }
}

fn file_size(path: &Path) -> String {
    match std::fs::metadata(path) {
        Ok(m) => format_bytes(m.len()),
        Err(_) => "missing".to_string(),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - parsed.timestamp();

    if delta < 0 {
        return ts.to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        parsed.format("%Y-%m-%d %H:%M").to_string()
    }
}
