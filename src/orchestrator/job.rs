//! Per-package analysis job state.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::archive::ArchiveError;
use crate::model::Package;
use crate::traits::RunnerError;

/// Lifecycle of one job:
/// `Pending -> Cached | Triggered -> Polling -> Succeeded | Failed | TimedOut`,
/// or `Cancelled` when a sibling failed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Cached,
    Triggered,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Cached
                | JobState::Succeeded
                | JobState::Failed
                | JobState::TimedOut
                | JobState::Cancelled
        )
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to trigger test run: {0}")]
    Trigger(#[source] RunnerError),

    #[error("Failed to poll run {run_id}: {source}")]
    Poll {
        run_id: u64,
        #[source]
        source: RunnerError,
    },

    #[error("Run {run_id} finished with conclusion {conclusion:?}")]
    Unsuccessful {
        run_id: u64,
        conclusion: Option<String>,
    },

    #[error("Run {run_id} did not finish within {}s", .timeout.as_secs())]
    TimedOut { run_id: u64, timeout: Duration },

    #[error("Cancelled after a sibling job failed")]
    Cancelled,

    #[error("Failed to fetch artifact {artifact}: {source}")]
    Artifact {
        artifact: String,
        #[source]
        source: RunnerError,
    },

    #[error("Failed to extract artifact {artifact}: {source}")]
    Extract {
        artifact: String,
        #[source]
        source: ArchiveError,
    },

    #[error("Failed to produce diff for {}: {source}", .path.display())]
    Diff {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Join(String),
}

impl JobError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> JobError {
        let context = context.into();
        move |source| JobError::Io { context, source }
    }

    /// True for failures that only exist because another job failed first.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Terminal state a job ends in when it fails with this error.
    pub fn terminal_state(&self) -> JobState {
        match self {
            JobError::Cancelled => JobState::Cancelled,
            JobError::TimedOut { .. } => JobState::TimedOut,
            _ => JobState::Failed,
        }
    }
}

/// Tracks one package through the state machine.
#[derive(Debug)]
pub struct AnalysisJob {
    pub package: Package,
    pub state: JobState,
    pub run_id: Option<u64>,
    started: Instant,
}

impl AnalysisJob {
    pub fn new(package: Package) -> Self {
        Self {
            package,
            state: JobState::Pending,
            run_id: None,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, next: JobState) {
        debug!(
            package = %self.package,
            from = ?self.state,
            to = ?next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Job state change"
        );
        self.state = next;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Successful outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResult {
    pub package: Package,
    /// `Cached` or `Succeeded`.
    pub state: JobState,
    pub run_id: Option<u64>,
    /// Job-scoped directories the artifacts were extracted into.
    pub artifacts: Vec<PathBuf>,
    /// Where `behavior.jsonl`, `diff.json` and `ai-analysis.json` end up.
    pub output_dir: PathBuf,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Polling.is_terminal());
        assert!(JobState::Cached.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
    }

    #[test]
    fn test_error_classification() {
        assert!(JobError::Cancelled.is_cancellation());
        let timeout = JobError::TimedOut {
            run_id: 7,
            timeout: Duration::from_secs(30),
        };
        assert!(!timeout.is_cancellation());
        assert_eq!(timeout.terminal_state(), JobState::TimedOut);
        assert_eq!(timeout.to_string(), "Run 7 did not finish within 30s");
    }

    #[test]
    fn test_job_advances() {
        let mut job = AnalysisJob::new(Package::new("a", "1.0.0"));
        assert_eq!(job.state, JobState::Pending);
        job.advance(JobState::Triggered);
        job.run_id = Some(3);
        job.advance(JobState::Polling);
        assert_eq!(job.state, JobState::Polling);
    }
}
