//! Baseline subtraction: isolates behavior a target shows that a known-safe
//! baseline does not.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::stats::{Baseline, Counter, NetworkActivity, PerProcessStats, ProcessSummary};

/// Anomalous residue of a snapshot after baseline subtraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupedProcessStats {
    pub collection: String,
    pub per_process: BTreeMap<String, ProcessSummary>,
    pub count_processes: usize,
    pub baseline_source: String,
    pub removed_processes: usize,
    pub removed_files: usize,
    pub removed_commands: usize,
    pub removed_syscalls: usize,
}

impl DedupedProcessStats {
    /// True when nothing survived subtraction.
    pub fn is_clean(&self) -> bool {
        self.per_process.is_empty()
    }
}

/// Subtracts `baseline` from `target`.
///
/// Syscalls keep only their numeric excess over the baseline. Files,
/// commands, IPs and DNS names are set differences on their keys. A shared
/// process left with nothing is dropped and counted; a process unknown to
/// the baseline is kept whole.
pub fn dedup(target: &PerProcessStats, baseline: &Baseline) -> DedupedProcessStats {
    let mut result = DedupedProcessStats {
        collection: target.collection.clone(),
        baseline_source: baseline.name().to_string(),
        ..DedupedProcessStats::default()
    };

    for (name, proc) in &target.per_process {
        let Some(base) = baseline.process(name) else {
            result.per_process.insert(name.clone(), proc.clone());
            continue;
        };

        let mut residue = ProcessSummary::default();

        for (syscall, &count) in &proc.syscall_profile {
            match base.syscall_profile.get(syscall) {
                None => {
                    residue.syscall_profile.insert(syscall.clone(), count);
                }
                Some(&base_count) if count > base_count => {
                    residue
                        .syscall_profile
                        .insert(syscall.clone(), count - base_count);
                }
                Some(_) => result.removed_syscalls += 1,
            }
        }

        let (files, removed_files) = key_difference(&proc.file_access, &base.file_access);
        residue.file_access = files;
        result.removed_files += removed_files;

        let (commands, removed_commands) =
            key_difference(&proc.executed_commands, &base.executed_commands);
        residue.executed_commands = commands;
        result.removed_commands += removed_commands;

        residue.network_activity = NetworkActivity {
            ips: key_difference(&proc.network_activity.ips, &base.network_activity.ips).0,
            dns_records: key_difference(
                &proc.network_activity.dns_records,
                &base.network_activity.dns_records,
            )
            .0,
        };

        if residue.is_empty() {
            result.removed_processes += 1;
        } else {
            result.per_process.insert(name.clone(), residue);
        }
    }

    result.count_processes = result.per_process.len();
    result
}

/// Entries of `target` whose key is absent from `base`, plus how many were dropped.
fn key_difference(target: &Counter, base: &Counter) -> (Counter, usize) {
    let mut removed = 0;
    let kept = target
        .iter()
        .filter(|(key, _)| {
            let shared = base.contains_key(*key);
            if shared {
                removed += 1;
            }
            !shared
        })
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    (kept, removed)
}
