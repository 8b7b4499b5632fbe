//! pulsegrid-analyzer — diffs desired state against the actual-state
//! index and emits corrective intents.
//!
//! Analysis only runs when both sides pass the freshness gate; a stale
//! side is an expected mode (warm-up, bus outage), reported as a typed
//! outcome rather than an error. This crate covers the
//! duplicate-instance policy: when two heartbeating instances occupy
//! the same desired index, one of them is stopped after a grace
//! period.

mod analyzer;
mod duplicates;
mod snapshot;

pub use analyzer::{AnalysisResult, Analyzer, AnalyzerError};
pub use snapshot::StateSnapshot;
