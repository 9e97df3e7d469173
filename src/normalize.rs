//! Reconcile the two legacy shapes of list artifacts.
//!
//! Collaborators have written the same list both as a bare array and as an
//! object wrapping it under one key (`{"patterns": [...]}`). Each known
//! artifact has one canonical shape; [`ArtifactShape::decode`] and
//! [`ArtifactShape::encode`] are the only code that understands the other
//! one. Anything that matches neither shape is reported and left alone.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{CanonicalShape, NormalizeRuleConfig};
use crate::layout::{Layout, CACHE_DIR, LEDGER_DIR};
use crate::models::json_kind;
use crate::storage;

/// Canonical on-disk shape of a list artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactShape {
    /// `[...]`; the legacy form is `{key: [...]}`.
    BareArray { key: String },
    /// `{key: [...], ...}`; the legacy form is `[...]`.
    Wrapped { key: String },
}

/// What decoding found in a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Canonical,
    /// Legacy shape; holds the list to re-encode canonically.
    Legacy(Vec<Value>),
    /// Neither shape. Holds a description for the warning.
    Ambiguous(String),
}

impl ArtifactShape {
    pub fn key(&self) -> &str {
        match self {
            ArtifactShape::BareArray { key } | ArtifactShape::Wrapped { key } => key,
        }
    }

    pub fn decode(&self, value: &Value) -> Decoded {
        match (self, value) {
            (ArtifactShape::BareArray { .. }, Value::Array(_)) => Decoded::Canonical,
            (ArtifactShape::BareArray { key }, Value::Object(map)) => match map.get(key) {
                Some(Value::Array(items)) if map.len() == 1 => Decoded::Legacy(items.clone()),
                Some(Value::Array(_)) => Decoded::Ambiguous(format!(
                    "object has `{}` plus {} other key(s); unwrapping would drop data",
                    key,
                    map.len() - 1
                )),
                _ => Decoded::Ambiguous(format!("object without a `{}` array", key)),
            },
            (ArtifactShape::Wrapped { .. }, Value::Array(items)) => Decoded::Legacy(items.clone()),
            (ArtifactShape::Wrapped { key }, Value::Object(map)) => match map.get(key) {
                Some(Value::Array(_)) => Decoded::Canonical,
                _ => Decoded::Ambiguous(format!("object without a `{}` array", key)),
            },
            (_, other) => Decoded::Ambiguous(format!("top-level value is {}", json_kind(other))),
        }
    }

    pub fn encode(&self, items: Vec<Value>) -> Value {
        match self {
            ArtifactShape::BareArray { .. } => Value::Array(items),
            ArtifactShape::Wrapped { key } => {
                let mut map = serde_json::Map::new();
                map.insert(key.clone(), Value::Array(items));
                Value::Object(map)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ArtifactShape::BareArray { key } => format!("unwrapped {{\"{}\": [...]}} to a bare array", key),
            ArtifactShape::Wrapped { key } => format!("wrapped bare array as {{\"{}\": [...]}}", key),
        }
    }
}

/// An artifact (or glob of artifacts) and its canonical shape.
#[derive(Debug, Clone)]
pub struct ArtifactRule {
    /// Glob relative to the workspace root.
    pub pattern: String,
    pub shape: ArtifactShape,
}

impl ArtifactRule {
    fn bare(pattern: &str, key: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            shape: ArtifactShape::BareArray {
                key: key.to_string(),
            },
        }
    }

    fn wrapped(pattern: &str, key: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            shape: ArtifactShape::Wrapped {
                key: key.to_string(),
            },
        }
    }
}

impl From<&NormalizeRuleConfig> for ArtifactRule {
    fn from(cfg: &NormalizeRuleConfig) -> Self {
        match cfg.canonical {
            CanonicalShape::Array => ArtifactRule::bare(&cfg.pattern, &cfg.key),
            CanonicalShape::Wrapped => ArtifactRule::wrapped(&cfg.pattern, &cfg.key),
        }
    }
}

/// Artifacts every workspace has.
pub fn default_rules() -> Vec<ArtifactRule> {
    vec![
        ArtifactRule::bare("artifacts/patterns.json", "patterns"),
        ArtifactRule::bare("artifacts/correlations.json", "correlations"),
        ArtifactRule::bare("artifacts/forecasts.json", "forecasts"),
        ArtifactRule::wrapped("artifacts/adrs.json", "adrs"),
    ]
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Normalizer {
    layout: Layout,
    rules: Vec<ArtifactRule>,
    matchers: Vec<GlobSet>,
}

impl Normalizer {
    /// Built-in rules followed by `extra`; the first matching rule wins.
    pub fn new(layout: &Layout, extra: &[NormalizeRuleConfig]) -> Result<Self> {
        let mut rules = default_rules();
        rules.extend(extra.iter().map(ArtifactRule::from));
        Self::with_rules(layout, rules)
    }

    pub fn with_rules(layout: &Layout, rules: Vec<ArtifactRule>) -> Result<Self> {
        let matchers = rules
            .iter()
            .map(|rule| build_globset(&rule.pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layout: layout.clone(),
            rules,
            matchers,
        })
    }

    /// Rewrite every non-canonical artifact. With `dry_run`, report the
    /// actions that would be taken without writing.
    pub fn normalize(&self, dry_run: bool) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();

        for (path, rel, rule) in self.matched_files()? {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    report.warnings.push(format!("{}: unreadable: {}", rel, e));
                    continue;
                }
            };
            let value: Value = match serde_json::from_str(&content) {
                Ok(v) => v,
                Err(e) => {
                    report.warnings.push(format!("{}: invalid JSON: {}", rel, e));
                    continue;
                }
            };

            match rule.shape.decode(&value) {
                Decoded::Canonical => {}
                Decoded::Ambiguous(why) => {
                    tracing::warn!(artifact = %rel, "left untouched: {}", why);
                    report.warnings.push(format!("{}: left untouched: {}", rel, why));
                }
                Decoded::Legacy(items) => {
                    let count = items.len();
                    let action = format!("{}: {} ({} items)", rel, rule.shape.describe(), count);
                    if !dry_run {
                        let canonical = rule.shape.encode(items);
                        storage::write_json_atomic(&path, &canonical)
                            .with_context(|| format!("Failed to rewrite {}", path.display()))?;
                        tracing::info!(artifact = %rel, items = count, "artifact normalized");
                    }
                    report.actions_performed.push(action);
                }
            }
        }

        Ok(report)
    }

    /// Existing files matched by a rule, sorted by relative path.
    fn matched_files(&self) -> Result<Vec<(PathBuf, String, &ArtifactRule)>> {
        let root = self.layout.root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_raw_or_cache_dir(root, e.path()));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = relative_str(root, path);
            if let Some(i) = self.matchers.iter().position(|m| m.is_match(&rel)) {
                found.push((path.to_path_buf(), rel, &self.rules[i]));
            }
        }

        found.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(found)
    }
}

fn is_raw_or_cache_dir(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| rel == Path::new(LEDGER_DIR) || rel == Path::new(CACHE_DIR))
        .unwrap_or(false)
}

fn relative_str(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))?);
    Ok(builder.build()?)
}
