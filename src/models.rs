//! Core data models.
//!
//! Raw records ([`LedgerEntry`], [`CycleRecord`]) are what the append-only
//! logs hold. Derived views ([`CacheIndex`], [`Timeline`], [`ContextSnapshot`])
//! are computed from them and can be thrown away and rebuilt at any time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ─── Ledger ─────────────────────────────────────────────────────────

/// Payload category of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Adr,
    Snapshot,
    Evidence,
    Manifest,
}

impl EntryType {
    pub const ALL: [EntryType; 4] = [
        EntryType::Adr,
        EntryType::Snapshot,
        EntryType::Evidence,
        EntryType::Manifest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Adr => "ADR",
            EntryType::Snapshot => "SNAPSHOT",
            EntryType::Evidence => "EVIDENCE",
            EntryType::Manifest => "MANIFEST",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown entry type '{}'. Must be adr, snapshot, evidence, or manifest.",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdrPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(rename = "cycleId", default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidencePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Type-specific content of a ledger entry, keyed by [`EntryType`].
///
/// Known fields are typed; anything else is carried in `extra` untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerPayload {
    Adr(AdrPayload),
    Snapshot(SnapshotPayload),
    Evidence(EvidencePayload),
    Manifest(ManifestPayload),
}

impl LedgerPayload {
    pub fn entry_type(&self) -> EntryType {
        match self {
            LedgerPayload::Adr(_) => EntryType::Adr,
            LedgerPayload::Snapshot(_) => EntryType::Snapshot,
            LedgerPayload::Evidence(_) => EntryType::Evidence,
            LedgerPayload::Manifest(_) => EntryType::Manifest,
        }
    }

    /// Decode `data` for the given type. `null` decodes to an empty payload;
    /// any other non-object value is rejected.
    pub fn decode(kind: EntryType, data: Value) -> Result<Self, serde_json::Error> {
        let data = match data {
            Value::Null => Value::Object(serde_json::Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "{} data must be a JSON object, got {}",
                    kind,
                    json_kind(&other)
                )))
            }
        };

        Ok(match kind {
            EntryType::Adr => LedgerPayload::Adr(serde_json::from_value(data)?),
            EntryType::Snapshot => LedgerPayload::Snapshot(serde_json::from_value(data)?),
            EntryType::Evidence => LedgerPayload::Evidence(serde_json::from_value(data)?),
            EntryType::Manifest => LedgerPayload::Manifest(serde_json::from_value(data)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            LedgerPayload::Adr(p) => serde_json::to_value(p),
            LedgerPayload::Snapshot(p) => serde_json::to_value(p),
            LedgerPayload::Evidence(p) => serde_json::to_value(p),
            LedgerPayload::Manifest(p) => serde_json::to_value(p),
        };
        // Plain structs of strings and JSON values always serialize
        encoded.unwrap_or(Value::Null)
    }
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One record of the hash-chained ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLedgerEntry", into = "RawLedgerEntry")]
pub struct LedgerEntry {
    pub entry_id: String,
    pub target_id: String,
    pub timestamp: String,
    pub previous_hash: Option<String>,
    pub current_hash: String,
    pub payload: LedgerPayload,
}

impl LedgerEntry {
    pub fn entry_type(&self) -> EntryType {
        self.payload.entry_type()
    }
}

/// On-disk shape of a [`LedgerEntry`].
#[derive(Serialize, Deserialize)]
struct RawLedgerEntry {
    entry_id: String,
    #[serde(rename = "type")]
    kind: EntryType,
    target_id: String,
    #[serde(default)]
    timestamp: String,
    previous_hash: Option<String>,
    current_hash: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawLedgerEntry> for LedgerEntry {
    type Error = serde_json::Error;

    fn try_from(raw: RawLedgerEntry) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            payload: LedgerPayload::decode(raw.kind, raw.data)?,
            entry_id: raw.entry_id,
            target_id: raw.target_id,
            timestamp: raw.timestamp,
            previous_hash: raw.previous_hash,
            current_hash: raw.current_hash,
        })
    }
}

impl From<LedgerEntry> for RawLedgerEntry {
    fn from(entry: LedgerEntry) -> Self {
        RawLedgerEntry {
            kind: entry.entry_type(),
            data: entry.payload.to_value(),
            entry_id: entry.entry_id,
            target_id: entry.target_id,
            timestamp: entry.timestamp,
            previous_hash: entry.previous_hash,
            current_hash: entry.current_hash,
        }
    }
}

// ─── Cycle log ──────────────────────────────────────────────────────

/// Result of one analysis phase within a cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub hash: String,
    /// Paths this phase touched, if the producer reports them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

/// One periodic execution cycle. Source of truth for every derived index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    #[serde(rename = "cycleId")]
    pub cycle_id: u64,
    pub timestamp: String,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseSummary>,
    #[serde(
        rename = "cognitiveLoad",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cognitive_load: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CycleRecord {
    /// Distinct file paths across all phases, sorted.
    pub fn touched_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self
            .phases
            .values()
            .flat_map(|p| p.files.iter().map(String::as_str))
            .filter(|f| !f.is_empty())
            .collect();
        files.sort_unstable();
        files.dedup();
        files
    }
}

// ─── Derived views ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: Option<String>,
    pub last: Option<String>,
}

/// Lightweight copy of a cycle kept in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    #[serde(rename = "cycleId")]
    pub cycle_id: u64,
    pub timestamp: String,
    pub phase_counts: BTreeMap<String, u64>,
}

/// Secondary index over the cycle log. Every field is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    pub total_cycles: usize,
    pub date_range: DateRange,
    pub by_day: BTreeMap<String, Vec<u64>>,
    pub by_hour: BTreeMap<String, Vec<u64>>,
    pub by_file: BTreeMap<String, Vec<u64>>,
    pub entries: Vec<CycleSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

/// Per-day aggregate of the cycle log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub date: String,
    pub hours: Vec<HourCount>,
    pub total_cycles: usize,
    pub cognitive_load_avg: f64,
    pub most_active_hour: Option<u32>,
}

impl Timeline {
    pub fn empty(date: &str) -> Self {
        Timeline {
            date: date.to_string(),
            hours: Vec::new(),
            total_cycles: 0,
            cognitive_load_avg: 0.0,
            most_active_hour: None,
        }
    }
}

/// Compact current-state document for polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub cycle_id: u64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recently_viewed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecasts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}
