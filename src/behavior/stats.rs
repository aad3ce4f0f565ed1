//! Aggregated per-process behavior snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::risk::RiskFlag;

/// Keyed occurrence counter (value -> count).
pub type Counter = BTreeMap<String, u64>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkActivity {
    /// `ip` or `ip:port` of direct connections.
    #[serde(default)]
    pub ips: Counter,
    #[serde(default)]
    pub dns_records: Counter,
}

impl NetworkActivity {
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.dns_records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    #[serde(default)]
    pub syscall_profile: Counter,
    #[serde(default)]
    pub file_access: Counter,
    #[serde(default)]
    pub executed_commands: Counter,
    #[serde(default)]
    pub network_activity: NetworkActivity,
}

impl ProcessSummary {
    pub fn is_empty(&self) -> bool {
        self.syscall_profile.is_empty()
            && self.file_access.is_empty()
            && self.executed_commands.is_empty()
            && self.network_activity.is_empty()
    }
}

/// A named snapshot of per-process summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerProcessStats {
    pub collection: String,
    pub per_process: BTreeMap<String, ProcessSummary>,
    #[serde(default)]
    pub count_processes: usize,
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub risk_flags: BTreeSet<RiskFlag>,
}

impl PerProcessStats {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Known-safe behavior used as the subtrahend in dedup.
///
/// Loaded once and never mutated, so it is shared across concurrent dedup
/// operations behind an `Arc` without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    stats: PerProcessStats,
}

impl Baseline {
    pub fn new(stats: PerProcessStats) -> Self {
        Self { stats }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        PerProcessStats::load(path).map(Self::new)
    }

    pub fn name(&self) -> &str {
        &self.stats.collection
    }

    pub fn stats(&self) -> &PerProcessStats {
        &self.stats
    }

    pub fn process(&self, name: &str) -> Option<&ProcessSummary> {
        self.stats.per_process.get(name)
    }

    pub fn process_count(&self) -> usize {
        self.stats.per_process.len()
    }
}
