//! Boolean risk heuristics over aggregated counts.
//!
//! These are hints for the verdict producer and human reviewers, not
//! decisions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::stats::ProcessSummary;

const SENSITIVE_PATHS: [&str; 4] = ["/etc/passwd", "/etc/shadow", "/root", ".ssh"];
const SHELL_BINARIES: [&str; 4] = ["/bin/sh", "/bin/bash", "sh", "bash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    SensitiveFileAccess,
    ShellSpawned,
    NetworkActivity,
    ProcfsAccess,
}

/// Evaluates every heuristic over the union of the given summaries.
pub fn evaluate<'a>(summaries: impl IntoIterator<Item = &'a ProcessSummary>) -> BTreeSet<RiskFlag> {
    let mut flags = BTreeSet::new();
    for summary in summaries {
        let files = summary.file_access.keys();
        for path in files {
            if SENSITIVE_PATHS.iter().any(|s| path.contains(s)) {
                flags.insert(RiskFlag::SensitiveFileAccess);
            }
            if path.contains("/proc") {
                flags.insert(RiskFlag::ProcfsAccess);
            }
        }
        if summary
            .executed_commands
            .keys()
            .any(|cmd| SHELL_BINARIES.iter().any(|s| cmd.contains(s)))
        {
            flags.insert(RiskFlag::ShellSpawned);
        }
        if !summary.network_activity.is_empty() {
            flags.insert(RiskFlag::NetworkActivity);
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_raised_independently() {
        let mut summary = ProcessSummary::default();
        assert!(evaluate([&summary]).is_empty());

        summary.file_access.insert("/home/u/.ssh/id_rsa".into(), 1);
        summary.file_access.insert("/proc/self/environ".into(), 2);
        summary.executed_commands.insert("/bin/sh".into(), 1);
        summary.network_activity.dns_records.insert("evil.example".into(), 1);

        let flags = evaluate([&summary]);
        assert_eq!(
            flags.into_iter().collect::<Vec<_>>(),
            vec![
                RiskFlag::SensitiveFileAccess,
                RiskFlag::ShellSpawned,
                RiskFlag::NetworkActivity,
                RiskFlag::ProcfsAccess,
            ]
        );
    }

    #[test]
    fn test_flag_serialization() {
        let json = serde_json::to_string(&RiskFlag::ShellSpawned).unwrap();
        assert_eq!(json, "\"shell_spawned\"");
    }
}
