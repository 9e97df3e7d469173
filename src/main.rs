//! # Cycle Ledger CLI (`cyl`)
//!
//! The `cyl` binary appends to and maintains the ledger and cycle log of a
//! workspace, and regenerates every view derived from them.
//!
//! ## Usage
//!
//! ```bash
//! cyl --config ./config/cyl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cyl init` | Create the workspace layout and empty logs |
//! | `cyl append` | Append a hash-chained ledger entry |
//! | `cyl record` | Append a cycle record |
//! | `cyl verify` | Check the ledger chain |
//! | `cyl repair` | Drop malformed lines and relink the chain |
//! | `cyl rebuild` | Rebuild the cache index and all timelines |
//! | `cyl timeline <date>` | Show one day's activity |
//! | `cyl snapshot` | Write the current context snapshot |
//! | `cyl normalize` | Rewrite legacy artifact shapes |
//! | `cyl validate` | Structural health check |
//! | `cyl stats` | Workspace summary |
//!
//! Summaries go to stdout; logs go to stderr (`RUST_LOG` overrides the
//! configured level).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use cycle_ledger::cache_index::CacheIndexer;
use cycle_ledger::config::{self, Config};
use cycle_ledger::cycles::{self, CycleDraft, CycleLog};
use cycle_ledger::ledger::{ChainReport, LedgerStore, RepairOptions};
use cycle_ledger::models::{EntryType, LedgerPayload, PhaseSummary, Timeline};
use cycle_ledger::normalize::Normalizer;
use cycle_ledger::snapshot::ContextSnapshotGenerator;
use cycle_ledger::timeline::TimelineAggregator;
use cycle_ledger::{stats, validate};

/// Cycle Ledger CLI: hash-chained records for a periodic analysis loop.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cyl.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cyl",
    about = "Cycle Ledger: append-only, hash-chained records for a periodic analysis loop",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cyl.toml`.
    #[arg(long, global = true, default_value = "./config/cyl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the workspace layout and empty logs.
    ///
    /// Idempotent: existing files are left untouched.
    Init,

    /// Append an entry to the ledger.
    Append {
        /// Entry type: adr, snapshot, evidence, or manifest.
        #[arg(long = "type")]
        entry_type: String,

        /// Identifier of the thing this entry is about.
        #[arg(long)]
        target: String,

        /// Type-specific payload as a JSON object.
        #[arg(long)]
        data: Option<String>,
    },

    /// Append a cycle record to the cycle log.
    Record {
        /// Phase result as `name=count` or `name=count:file,file`. Repeatable.
        #[arg(long = "phase", value_parser = parse_phase)]
        phases: Vec<(String, PhaseSummary)>,

        /// Cognitive load metric for this cycle.
        #[arg(long)]
        load: Option<f64>,

        /// Cycle timestamp (RFC 3339). Defaults to now.
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Verify the ledger hash chain.
    ///
    /// Exits non-zero when any line is invalid or any link is broken.
    Verify {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Repair the ledger chain.
    ///
    /// Drops lines that do not parse, recomputes every link, and backs up
    /// the original before writing.
    Repair {
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Do not keep dropped lines in `ledger.jsonl.rejected`.
        #[arg(long)]
        no_quarantine: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the cache index and every per-day timeline from the cycle log.
    Rebuild,

    /// Show the activity timeline of one day.
    Timeline {
        /// Day as YYYY-MM-DD.
        date: String,

        /// Print the timeline as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate and persist the context snapshot.
    Snapshot {
        /// Also print the snapshot JSON to stdout.
        #[arg(long)]
        print: bool,
    },

    /// Rewrite artifacts stored in a legacy shape into their canonical shape.
    Normalize {
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check that the workspace is structurally sound.
    ///
    /// Exits non-zero on fatal findings; warnings alone pass.
    Validate {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a summary of the workspace.
    Stats,
}

/// Parse a `name=count[:file,file]` phase argument.
fn parse_phase(s: &str) -> Result<(String, PhaseSummary), String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid phase '{}': expected name=count[:files]", s))?;
    if name.trim().is_empty() {
        return Err(format!("invalid phase '{}': empty name", s));
    }
    let (count, files) = match rest.split_once(':') {
        Some((count, files)) => (count, files),
        None => (rest, ""),
    };
    let count: u64 = count
        .trim()
        .parse()
        .map_err(|_| format!("invalid phase '{}': count must be a non-negative integer", s))?;
    let files = files
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    Ok((
        name.trim().to_string(),
        PhaseSummary {
            count,
            hash: String::new(),
            files,
        },
    ))
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let _ = subscriber.try_init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => run_init(&cfg)?,
        Commands::Append {
            entry_type,
            target,
            data,
        } => run_append(&cfg, &entry_type, &target, data.as_deref())?,
        Commands::Record {
            phases,
            load,
            timestamp,
        } => run_record(&cfg, phases, load, timestamp)?,
        Commands::Verify { json } => run_verify(&cfg, json)?,
        Commands::Repair {
            dry_run,
            no_quarantine,
            json,
        } => {
            let opts = RepairOptions {
                dry_run,
                quarantine: cfg.ledger.quarantine_rejected && !no_quarantine,
            };
            run_repair(&cfg, opts, json)?;
        }
        Commands::Rebuild => run_rebuild(&cfg)?,
        Commands::Timeline { date, json } => run_timeline(&cfg, &date, json)?,
        Commands::Snapshot { print } => run_snapshot(&cfg, print)?,
        Commands::Normalize { dry_run, json } => run_normalize(&cfg, dry_run, json)?,
        Commands::Validate { json } => run_validate(&cfg, json)?,
        Commands::Stats => stats::run_stats(&cfg)?,
    }

    Ok(())
}

fn run_init(cfg: &Config) -> Result<()> {
    let layout = cfg.layout();
    layout.ensure()?;
    println!("Workspace initialized at {}", layout.root().display());
    Ok(())
}

fn run_append(cfg: &Config, entry_type: &str, target: &str, data: Option<&str>) -> Result<()> {
    let kind: EntryType = entry_type.parse().map_err(anyhow::Error::msg)?;
    if target.trim().is_empty() {
        bail!("--target must not be empty");
    }
    let data = match data {
        Some(raw) => serde_json::from_str(raw).context("--data is not valid JSON")?,
        None => serde_json::Value::Null,
    };
    let payload =
        LedgerPayload::decode(kind, data).with_context(|| format!("Invalid {} payload", kind))?;

    let entry = LedgerStore::new(&cfg.layout(), &cfg.lock).append(target, payload)?;
    println!("{} {} {}", entry.entry_id, entry.entry_type(), entry.current_hash);
    Ok(())
}

fn run_record(
    cfg: &Config,
    phases: Vec<(String, PhaseSummary)>,
    load: Option<f64>,
    timestamp: Option<String>,
) -> Result<()> {
    if let Some(ts) = &timestamp {
        if cycles::day_and_hour(ts).is_none() {
            bail!("--timestamp '{}' is not a recognizable timestamp", ts);
        }
    }
    if let Some(load) = load {
        if !load.is_finite() {
            bail!("--load must be a finite number");
        }
    }
    let phases: BTreeMap<String, PhaseSummary> = phases.into_iter().collect();

    let record = CycleLog::new(&cfg.layout(), &cfg.lock).append(CycleDraft {
        timestamp,
        phases,
        cognitive_load: load,
    })?;
    println!("Recorded cycle #{} at {}", record.cycle_id, record.timestamp);
    Ok(())
}

fn run_verify(cfg: &Config, json: bool) -> Result<()> {
    let report = LedgerStore::new(&cfg.layout(), &cfg.lock).verify_chain()?;
    if json {
        print_json(&report)?;
    } else {
        print_chain_report(&report);
    }
    if !report.valid {
        bail!("ledger chain is not valid; run `cyl repair`");
    }
    Ok(())
}

fn print_chain_report(report: &ChainReport) {
    println!(
        "Ledger: {} entries, {} lines",
        report.valid_entries, report.total_lines
    );
    for issue in &report.invalid {
        println!("  invalid  {}", issue);
    }
    for b in &report.breaks {
        println!(
            "  break    entry {} (line {}): expected {}, found {}",
            b.index,
            b.line,
            b.expected.as_deref().unwrap_or("null"),
            b.actual.as_deref().unwrap_or("null")
        );
    }
    for m in &report.digest_mismatches {
        println!(
            "  digest   entry {} (line {}): recorded {}, computed {}",
            m.index, m.line, m.recorded, m.computed
        );
    }
    if report.valid {
        println!("Chain OK.");
    }
}

fn run_repair(cfg: &Config, opts: RepairOptions, json: bool) -> Result<()> {
    let report = LedgerStore::new(&cfg.layout(), &cfg.lock).repair(opts)?;
    if json {
        return print_json(&report);
    }

    let prefix = if report.dry_run { "Would repair" } else { "Repaired" };
    println!(
        "{}: {} relinked, {} removed, {} entries",
        prefix, report.repaired_count, report.removed_count, report.final_length
    );
    if let Some(path) = &report.backup_path {
        println!("  backup:   {}", path.display());
    }
    if let Some(path) = &report.rejected_path {
        println!("  rejected: {}", path.display());
    }
    if !report.changed() {
        println!("Nothing to repair.");
    }
    Ok(())
}

fn run_rebuild(cfg: &Config) -> Result<()> {
    let layout = cfg.layout();
    let (index, records) = CacheIndexer::new(&layout, &cfg.lock).rebuild_with_records()?;
    let written = TimelineAggregator::new(&layout, &cfg.lock).write_all(&index, &records)?;

    println!(
        "Index rebuilt: {} cycles, {} days, {} files, {} timelines",
        index.total_cycles,
        index.by_day.len(),
        index.by_file.len(),
        written.len()
    );
    Ok(())
}

fn run_timeline(cfg: &Config, date: &str, json: bool) -> Result<()> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", date))?;
    let timeline = TimelineAggregator::new(&cfg.layout(), &cfg.lock).for_date(date)?;
    if json {
        return print_json(&timeline);
    }
    print_timeline(&timeline);
    Ok(())
}

fn print_timeline(timeline: &Timeline) {
    println!("Timeline {}", timeline.date);
    println!("===================");
    if timeline.total_cycles == 0 {
        println!("  No cycles recorded.");
        return;
    }
    println!("  Cycles:       {}", timeline.total_cycles);
    println!("  Avg load:     {:.2}", timeline.cognitive_load_avg);
    if let Some(hour) = timeline.most_active_hour {
        println!("  Busiest hour: {:02}:00", hour);
    }
    println!();
    for h in &timeline.hours {
        println!("  {:02}:00  {:>4}  {}", h.hour, h.count, "#".repeat(h.count.min(50)));
    }
}

fn run_snapshot(cfg: &Config, print: bool) -> Result<()> {
    let generator = ContextSnapshotGenerator::new(&cfg.layout(), &cfg.snapshot);
    match generator.write()? {
        Some((snapshot, path)) => {
            if print {
                print_json(&snapshot)?;
            } else {
                println!(
                    "Snapshot for cycle #{} written to {}",
                    snapshot.cycle_id,
                    path.display()
                );
            }
        }
        None => println!("No cycles recorded yet; no snapshot written."),
    }
    Ok(())
}

fn run_normalize(cfg: &Config, dry_run: bool, json: bool) -> Result<()> {
    let report = Normalizer::new(&cfg.layout(), &cfg.normalize.rules)?.normalize(dry_run)?;
    if json {
        return print_json(&report);
    }

    if report.actions_performed.is_empty() {
        println!("All artifacts canonical.");
    }
    let verb = if dry_run { "would normalize" } else { "normalized" };
    for action in &report.actions_performed {
        println!("  {}  {}", verb, action);
    }
    for warning in &report.warnings {
        println!("  warning     {}", warning);
    }
    Ok(())
}

fn run_validate(cfg: &Config, json: bool) -> Result<()> {
    let report = validate::validate(cfg)?;
    if json {
        print_json(&report)?;
    } else {
        println!(
            "Ledger: {} entries ({} invalid). Cycles: {} ({} invalid).",
            report.ledger_entries, report.ledger_invalid, report.cycles, report.cycles_invalid
        );
        for f in &report.fatal {
            println!("  FATAL  {}", f);
        }
        for w in &report.warnings {
            println!("  warn   {}", w);
        }
        if report.passed() {
            println!("Validation passed.");
        }
    }
    if !report.passed() {
        bail!("validation failed with {} fatal finding(s)", report.fatal.len());
    }
    Ok(())
}
