//! Behavioral analysis of sandboxed test runs.
//!
//! A raw `behavior.jsonl` event log is folded into per-process summaries by
//! [`ProcessAggregator`], then reduced against a known-safe [`Baseline`] by
//! [`dedup`] to leave only anomalous behavior.

pub mod aggregator;
pub mod dedup;
pub mod event;
pub mod risk;
pub mod stats;

pub use aggregator::{aggregate_file, NoiseFilter, ProcessAggregator};
pub use dedup::{dedup, DedupedProcessStats};
pub use event::{BehaviorEvent, ContainerInfo, EventArg};
pub use risk::RiskFlag;
pub use stats::{Baseline, Counter, NetworkActivity, PerProcessStats, ProcessSummary};
