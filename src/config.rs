use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::layout::Layout;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Keep lines dropped by `repair` in `ledger.jsonl.rejected`.
    #[serde(default = "default_quarantine")]
    pub quarantine_rejected: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quarantine_rejected: true,
        }
    }
}

fn default_quarantine() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay_ms: 100,
        }
    }
}

fn default_lock_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_recent_files")]
    pub recent_files: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            recent_files: 5,
            max_items: 3,
            max_artifact_bytes: 1024 * 1024,
        }
    }
}

fn default_recent_files() -> usize {
    5
}
fn default_max_items() -> usize {
    3
}
fn default_max_artifact_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizeConfig {
    /// Extra artifacts to normalize on top of the built-in ones.
    #[serde(default)]
    pub rules: Vec<NormalizeRuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizeRuleConfig {
    /// Glob relative to the workspace root, e.g. `artifacts/**/*-hints.json`.
    pub pattern: String,
    pub key: String,
    pub canonical: CanonicalShape,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalShape {
    Array,
    Wrapped,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults for everything except the workspace root.
    pub fn minimal(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace: WorkspaceConfig { root: root.into() },
            ledger: LedgerConfig::default(),
            lock: LockConfig::default(),
            snapshot: SnapshotConfig::default(),
            normalize: NormalizeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.workspace.root)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.workspace.root.as_os_str().is_empty() {
        anyhow::bail!("workspace.root must not be empty");
    }

    if config.snapshot.recent_files == 0 {
        anyhow::bail!("snapshot.recent_files must be > 0");
    }

    if config.snapshot.max_items == 0 {
        anyhow::bail!("snapshot.max_items must be > 0");
    }

    for rule in &config.normalize.rules {
        if rule.key.trim().is_empty() {
            anyhow::bail!("normalize rule '{}' has an empty key", rule.pattern);
        }
        globset::Glob::new(&rule.pattern)
            .with_context(|| format!("Invalid normalize pattern: {}", rule.pattern))?;
    }

    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
        other => anyhow::bail!(
            "Unknown logging level: '{}'. Must be trace, debug, info, warn, error, or off.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cyl.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_defaults_applied() {
        let (_tmp, path) = write_config("[workspace]\nroot = \"/tmp/ws\"\n");
        let cfg = load_config(&path).unwrap();
        assert!(cfg.ledger.quarantine_rejected);
        assert_eq!(cfg.lock.retries, 5);
        assert_eq!(cfg.snapshot.recent_files, 5);
        assert_eq!(cfg.snapshot.max_items, 3);
        assert!(cfg.normalize.rules.is_empty());
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_normalize_rules_parsed() {
        let (_tmp, path) = write_config(
            r#"[workspace]
root = "/tmp/ws"

[[normalize.rules]]
pattern = "artifacts/**/*-hints.json"
key = "hints"
canonical = "wrapped"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.normalize.rules.len(), 1);
        assert_eq!(cfg.normalize.rules[0].canonical, CanonicalShape::Wrapped);
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let (_tmp, path) = write_config("[workspace]\nroot = \"/tmp/ws\"\n[logging]\nlevel = \"loud\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_zero_max_items() {
        let (_tmp, path) = write_config("[workspace]\nroot = \"/tmp/ws\"\n[snapshot]\nmax_items = 0\n");
        assert!(load_config(&path).is_err());
    }
}
