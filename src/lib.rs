//! # Cycle Ledger
//!
//! Append-only, hash-chained record keeping for a periodic analysis loop.
//!
//! Two JSONL logs are the source of truth: the ledger of decisions and
//! evidence, chained by SHA-256 so tampering or truncation is detectable,
//! and the cycle log, one record per execution cycle. Everything else
//! (cache index, per-day timelines, context snapshot) is derived from
//! them and can be rebuilt at any time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ledger.jsonl │   │ cycles.jsonl │──▶│ cache/index  │──▶ timelines
//! │ (hash chain) │   │ (cycle log)  │   └──────────────┘
//! └──────┬───────┘   └──────┬───────┘
//!        │                  └──────────▶ context snapshot
//!        ▼
//!  verify / repair          artifacts/ ──▶ normalizer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cyl init                                  # create the workspace layout
//! cyl append --type ADR --target adr-7      # chain a ledger entry
//! cyl record --phase patterns=3:src/a.rs    # log a cycle
//! cyl rebuild                               # index + timelines
//! cyl verify
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`layout`] | Workspace directory layout |
//! | [`storage`] | Locks, atomic writes, tail reads |
//! | [`models`] | Core data types |
//! | [`ledger`] | Hash-chained ledger: append, verify, repair |
//! | [`cycles`] | Cycle log |
//! | [`cache_index`] | Secondary index over the cycle log |
//! | [`timeline`] | Per-day activity timelines |
//! | [`snapshot`] | Current-state context snapshot |
//! | [`normalize`] | Artifact shape normalization |
//! | [`validate`] | Structural health check |
//! | [`stats`] | Workspace summary |

pub mod cache_index;
pub mod config;
pub mod cycles;
pub mod layout;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod timeline;
pub mod validate;
