//! Remote sandboxed test runs for direct dependencies.
//!
//! Each package is either served from the on-disk cache of a prior run or
//! dispatched to the [`TestRunner`], polled to completion and its artifacts
//! extracted. Copying artifacts into the output directory and producing the
//! baseline diff happen in background tasks; [`TestOrchestrator::run_packages`]
//! returns only after both the jobs and those tasks have finished.

pub mod archive;
pub mod github;
pub mod job;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::behavior::{aggregate_file, dedup, Baseline, NoiseFilter};
use crate::executor::{CancelSignal, TaskOutcome, WorkerPool};
use crate::model::Package;
use crate::traits::{RunStatus, TestRunner};
use crate::verdict::{ASSESSMENT_FILE, BEHAVIOR_LOG, DIFF_FILE};

pub use archive::{extract_zip, safe_relative, ArchiveError, ExtractReport};
pub use github::{CiEndpoint, GithubActionsRunner};
pub use job::{AnalysisJob, JobError, JobState, PackageResult};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No packages to analyze")]
    NoPackages,

    #[error("Analysis failed for {package}: {source}")]
    Job {
        package: String,
        #[source]
        source: JobError,
    },

    #[error("Artifact processing failed for {package}: {source}")]
    Copy {
        package: String,
        #[source]
        source: JobError,
    },
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs in flight.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Wall-clock bound on polling a single run.
    pub job_timeout: Duration,
    /// Results of earlier runs, one `<slug>/` directory per package.
    pub cache_dir: PathBuf,
    /// Scratch space for extracted artifacts.
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub noise: NoiseFilter,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(15),
            job_timeout: Duration::from_secs(30 * 60),
            cache_dir: PathBuf::from("analysis-results"),
            work_dir: std::env::temp_dir().join("dependency-gate"),
            output_dir: PathBuf::from("output"),
            noise: NoiseFilter::default(),
        }
    }
}

type CopyResult = (Package, Result<(), JobError>);

/// State shared by every job of one `run_packages` call.
#[derive(Clone)]
struct JobContext {
    runner: Arc<dyn TestRunner>,
    baseline: Option<Arc<Baseline>>,
    config: Arc<OrchestratorConfig>,
    copies: Arc<Mutex<JoinSet<CopyResult>>>,
}

pub struct TestOrchestrator {
    runner: Arc<dyn TestRunner>,
    baseline: Option<Arc<Baseline>>,
    config: Arc<OrchestratorConfig>,
}

impl TestOrchestrator {
    pub fn new(runner: Arc<dyn TestRunner>, config: OrchestratorConfig) -> Self {
        Self {
            runner,
            baseline: None,
            config: Arc::new(config),
        }
    }

    /// Enables diff generation against `baseline`.
    pub fn with_baseline(mut self, baseline: Arc<Baseline>) -> Self {
        info!(
            baseline = %baseline.name(),
            processes = baseline.process_count(),
            "Loaded baseline"
        );
        self.baseline = Some(baseline);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn package_output_dir(&self, package: &Package) -> PathBuf {
        self.config.output_dir.join(package.slug())
    }

    /// Runs every package through cache lookup or a remote test run.
    ///
    /// Fail-fast: the first failing job stops new jobs from starting and
    /// in-flight polls from continuing. Background copy tasks are always
    /// awaited before returning. The error returned is the first real
    /// failure, never a cancellation it caused.
    #[instrument(skip(self, packages), fields(packages = packages.len(), limit = self.config.concurrency))]
    pub async fn run_packages(
        &self,
        packages: &[Package],
    ) -> Result<Vec<PackageResult>, OrchestratorError> {
        if packages.is_empty() {
            return Err(OrchestratorError::NoPackages);
        }
        let total = packages.len();
        info!(total, "Starting analysis");

        let copies = Arc::new(Mutex::new(JoinSet::new()));
        let ctx = JobContext {
            runner: Arc::clone(&self.runner),
            baseline: self.baseline.clone(),
            config: Arc::clone(&self.config),
            copies: Arc::clone(&copies),
        };
        let cancel = CancelSignal::new();

        let batch = WorkerPool::new(self.config.concurrency)
            .run(packages.to_vec(), &cancel, move |package, cancel| {
                let ctx = ctx.clone();
                async move { ctx.analyze(package, cancel).await }
            })
            .await;

        // Second barrier: artifact copies and diffs.
        debug!("Waiting for artifact copies");
        let mut pending = std::mem::take(&mut *copies.lock().await);
        let mut copy_failure = None;
        while let Some(joined) = pending.join_next().await {
            let (package, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    error!(error = %err, "Copy task panicked");
                    copy_failure.get_or_insert(OrchestratorError::Copy {
                        package: "<unknown>".to_string(),
                        source: JobError::Join(err.to_string()),
                    });
                    continue;
                }
            };
            match result {
                Ok(()) => debug!(package = %package, "Artifacts copied"),
                Err(err) if err.is_cancellation() => {
                    debug!(package = %package, "Artifact copy skipped after cancellation")
                }
                Err(err) => {
                    warn!(package = %package, error = %err, "Artifact processing failed");
                    copy_failure.get_or_insert(OrchestratorError::Copy {
                        package: package.id(),
                        source: err,
                    });
                }
            }
        }

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut skipped = 0;
        for outcome in batch.outcomes {
            match outcome {
                TaskOutcome::Completed(_, result) => {
                    info!(
                        package = %result.package,
                        progress = %format!("{}/{}", results.len() + 1, total),
                        state = ?result.state,
                        artifacts = result.artifacts.len(),
                        "Package analyzed"
                    );
                    results.push(result);
                }
                TaskOutcome::Failed(package, err) => {
                    if err.is_cancellation() {
                        debug!(package = %package, "Job cancelled");
                    } else {
                        error!(package = %package, error = %err, "Job failed");
                    }
                    failures.push((package, err));
                }
                TaskOutcome::Skipped(_) => skipped += 1,
            }
        }

        let first_real = failures
            .iter()
            .position(|(_, err)| !err.is_cancellation())
            .or(if failures.is_empty() { None } else { Some(0) });
        if let Some(index) = first_real {
            let (package, source) = failures.swap_remove(index);
            warn!(
                failed = failures.len() + 1,
                skipped,
                completed = results.len(),
                "Analysis aborted"
            );
            return Err(OrchestratorError::Job {
                package: package.id(),
                source,
            });
        }
        if let Some(err) = copy_failure {
            return Err(err);
        }

        results.sort_by(|a, b| a.package.cmp(&b.package));
        info!(completed = results.len(), "Analysis complete");
        Ok(results)
    }
}

impl JobContext {
    async fn analyze(
        &self,
        package: Package,
        cancel: CancelSignal,
    ) -> Result<PackageResult, JobError> {
        let mut job = AnalysisJob::new(package.clone());
        let slug = package.slug();
        let output_dir = self.config.output_dir.join(&slug);
        let cache_dir = self.config.cache_dir.join(&slug);

        if cache_dir.join(BEHAVIOR_LOG).is_file() {
            info!(package = %package, "Using cached behavior log");
            let (cache, output) = (cache_dir.clone(), output_dir.clone());
            let baseline = self.baseline.clone();
            let noise = self.config.noise.clone();
            blocking(move || restore_cached(&cache, &output, baseline.as_deref(), &noise)).await?;
            job.advance(JobState::Cached);
            return Ok(PackageResult {
                package,
                state: JobState::Cached,
                run_id: None,
                artifacts: vec![cache_dir],
                output_dir,
                duration_ms: job.elapsed().as_millis() as u64,
            });
        }

        let run_id = match self.runner.trigger(&package).await {
            Ok(id) => id,
            Err(err) => {
                job.advance(JobState::Failed);
                return Err(JobError::Trigger(err));
            }
        };
        job.run_id = Some(run_id);
        job.advance(JobState::Triggered);
        info!(package = %package, run_id, "Triggered test run");

        job.advance(JobState::Polling);
        let status = match self.poll(run_id, &cancel).await {
            Ok(status) => status,
            Err(err) => {
                job.advance(err.terminal_state());
                return Err(err);
            }
        };
        if !status.succeeded() {
            job.advance(JobState::Failed);
            return Err(JobError::Unsuccessful {
                run_id,
                conclusion: status.conclusion,
            });
        }

        let artifacts = self.download_artifacts(&package, run_id).await?;
        job.advance(JobState::Succeeded);

        if artifacts.is_empty() {
            warn!(package = %package, run_id, "Run produced no artifacts");
        } else {
            let task = copy_artifacts(
                package.clone(),
                artifacts.clone(),
                output_dir.clone(),
                self.baseline.clone(),
                self.config.noise.clone(),
                cancel,
            );
            self.copies.lock().await.spawn(task);
        }

        Ok(PackageResult {
            package,
            state: JobState::Succeeded,
            run_id: Some(run_id),
            artifacts,
            output_dir,
            duration_ms: job.elapsed().as_millis() as u64,
        })
    }

    /// Polls until the run completes, the job times out, or a sibling fails.
    async fn poll(&self, run_id: u64, cancel: &CancelSignal) -> Result<RunStatus, JobError> {
        let limit = self.config.job_timeout;
        let deadline = Instant::now() + limit;
        let timed_out = || JobError::TimedOut {
            run_id,
            timeout: limit,
        };
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            attempt += 1;
            debug!(run_id, attempt, "Polling run");

            let status = timeout_at(deadline, self.runner.run_status(run_id))
                .await
                .map_err(|_| timed_out())?
                .map_err(|source| JobError::Poll { run_id, source })?;
            if status.is_completed() {
                return Ok(status);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Downloads and extracts every unexpired artifact into a job-scoped
    /// directory under `work_dir`.
    async fn download_artifacts(
        &self,
        package: &Package,
        run_id: u64,
    ) -> Result<Vec<PathBuf>, JobError> {
        let listed = self
            .runner
            .list_artifacts(run_id)
            .await
            .map_err(|source| JobError::Artifact {
                artifact: format!("run {} listing", run_id),
                source,
            })?;
        let job_dir = self
            .config
            .work_dir
            .join(package.slug())
            .join(run_id.to_string());

        let mut extracted = Vec::new();
        for artifact in listed {
            if artifact.expired {
                debug!(artifact = %artifact.name, "Skipping expired artifact");
                continue;
            }
            let Some(relative) = safe_relative(&artifact.name) else {
                warn!(artifact = %artifact.name, "Skipping artifact with unsafe name");
                continue;
            };
            let data = self
                .runner
                .download_artifact(&artifact)
                .await
                .map_err(|source| JobError::Artifact {
                    artifact: artifact.name.clone(),
                    source,
                })?;

            let dest = job_dir.join(relative);
            let target = dest.clone();
            let report = blocking(move || {
                extract_zip(&data, &target).map_err(|source| JobError::Extract {
                    artifact: artifact.name,
                    source,
                })
            })
            .await?;
            debug!(
                dest = %dest.display(),
                written = report.written,
                rejected = report.rejected.len(),
                "Extracted artifact"
            );
            extracted.push(dest);
        }
        Ok(extracted)
    }
}

/// Files only this crate may write into a package's output directory. A
/// test subject controls its artifacts, so copies of these are refused.
const GENERATED_FILES: [&str; 2] = [DIFF_FILE, ASSESSMENT_FILE];

/// Background half of a remote job: flatten artifacts into the output
/// directory, then diff against the baseline.
///
/// The diff and any verdict left from an earlier run are discarded first,
/// since they describe a different behavior log.
async fn copy_artifacts(
    package: Package,
    artifacts: Vec<PathBuf>,
    output_dir: PathBuf,
    baseline: Option<Arc<Baseline>>,
    noise: NoiseFilter,
    cancel: CancelSignal,
) -> CopyResult {
    if cancel.is_cancelled() {
        return (package, Err(JobError::Cancelled));
    }
    let id = package.id();
    let result = blocking(move || {
        for file in GENERATED_FILES {
            remove_if_present(&output_dir.join(file))?;
        }
        for artifact in &artifacts {
            let withheld = archive::copy_dir_contents(artifact, &output_dir, &GENERATED_FILES)
                .map_err(JobError::io(format!("copying {}", artifact.display())))?;
            if !withheld.is_empty() {
                warn!(
                    package = %id,
                    artifact = %artifact.display(),
                    files = ?withheld,
                    "Artifact carries generated files, ignoring them"
                );
            }
        }
        if let Some(baseline) = baseline.as_deref() {
            let log = output_dir.join(BEHAVIOR_LOG);
            if log.is_file() {
                write_diff(&output_dir, baseline, &noise)?;
            } else {
                warn!(dir = %output_dir.display(), "Artifacts contain no behavior log");
            }
        }
        Ok(())
    })
    .await;
    (package, result)
}

fn remove_if_present(path: &Path) -> Result<(), JobError> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            Err(JobError::io(format!("removing stale {}", path.display()))(err))
        }
        _ => Ok(()),
    }
}

/// Serves a package from the cache: diffs the cached log if needed and
/// copies the per-package files into the output directory.
fn restore_cached(
    cache_dir: &Path,
    output_dir: &Path,
    baseline: Option<&Baseline>,
    noise: &NoiseFilter,
) -> Result<(), JobError> {
    if let Some(baseline) = baseline {
        write_diff(cache_dir, baseline, noise)?;
    }
    std::fs::create_dir_all(output_dir)
        .map_err(JobError::io(format!("creating {}", output_dir.display())))?;
    for file in [BEHAVIOR_LOG, DIFF_FILE, ASSESSMENT_FILE] {
        let from = cache_dir.join(file);
        if from.is_file() {
            std::fs::copy(&from, output_dir.join(file))
                .map_err(JobError::io(format!("copying cached {}", file)))?;
        }
    }
    Ok(())
}

/// Writes `dir/diff.json` from `dir/behavior.jsonl` unless it already exists.
/// Returns whether a diff was written.
fn write_diff(dir: &Path, baseline: &Baseline, noise: &NoiseFilter) -> Result<bool, JobError> {
    let diff_path = dir.join(DIFF_FILE);
    if diff_path.exists() {
        return Ok(false);
    }
    let log = dir.join(BEHAVIOR_LOG);
    let collection = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stats = aggregate_file(&log, &collection, noise).map_err(|source| JobError::Diff {
        path: log.clone(),
        source,
    })?;
    let diff = dedup(&stats, baseline);
    let json = serde_json::to_vec_pretty(&diff).map_err(|e| JobError::Diff {
        path: diff_path.clone(),
        source: e.into(),
    })?;
    std::fs::write(&diff_path, json).map_err(|source| JobError::Diff {
        path: diff_path.clone(),
        source,
    })?;
    debug!(
        path = %diff_path.display(),
        processes = diff.count_processes,
        "Wrote diff"
    );
    Ok(true)
}

async fn blocking<T, F>(f: F) -> Result<T, JobError>
where
    F: FnOnce() -> Result<T, JobError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| JobError::Join(e.to_string()))?
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::archive::build_zip;
    use super::fakes::ScriptedRunner;
    use super::*;
    use crate::behavior::{PerProcessStats, ProcessSummary};
    use crate::verdict::load_diff;

    const LOG: &[u8] = br#"{"processId":1,"processName":"node","eventName":"openat","args":[{"name":"pathname","type":"const char*","value":"/etc/passwd"}]}
{"processId":1,"processName":"node","eventName":"openat","args":[{"name":"pathname","type":"const char*","value":"/etc/os-release"}]}
"#;

    fn config(root: &Path) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(5),
            job_timeout: Duration::from_secs(5),
            cache_dir: root.join("cache"),
            work_dir: root.join("work"),
            output_dir: root.join("out"),
            noise: NoiseFilter::default(),
        }
    }

    fn baseline() -> Arc<Baseline> {
        let mut node = ProcessSummary::default();
        node.file_access.insert("/etc/os-release".into(), 1);
        node.syscall_profile.insert("openat".into(), 2);
        Arc::new(Baseline::new(PerProcessStats {
            collection: "baseline".into(),
            per_process: [("node".to_string(), node)].into_iter().collect(),
            count_processes: 1,
            ..PerProcessStats::default()
        }))
    }

    fn packages(n: usize) -> Vec<Package> {
        (0..n).map(|i| Package::new(format!("pkg{}", i), "1.0.0")).collect()
    }

    #[tokio::test]
    async fn test_in_flight_jobs_never_exceed_limit() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            polls_until_done: 3,
            ..ScriptedRunner::default()
        });
        let orchestrator = TestOrchestrator::new(runner.clone(), config(root.path()));

        let results = orchestrator.run_packages(&packages(7)).await.unwrap();
        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|r| r.state == JobState::Succeeded));
        assert_eq!(runner.trigger_count(), 7);
        let peak = runner.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak was {peak}");
    }

    #[tokio::test]
    async fn test_first_failure_stops_new_triggers() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_trigger: ["pkg0".to_string()].into_iter().collect(),
            polls_until_done: usize::MAX,
            ..ScriptedRunner::default()
        });
        let mut cfg = config(root.path());
        cfg.concurrency = 1;
        let orchestrator = TestOrchestrator::new(runner.clone(), cfg);

        let err = orchestrator.run_packages(&packages(5)).await.unwrap_err();
        assert!(
            matches!(err, OrchestratorError::Job { ref package, source: JobError::Trigger(_) } if package == "pkg0@1.0.0")
        );
        assert_eq!(runner.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_cancels_polling_sibling() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_trigger: ["pkg1".to_string()].into_iter().collect(),
            polls_until_done: usize::MAX,
            ..ScriptedRunner::default()
        });
        let orchestrator = TestOrchestrator::new(runner.clone(), config(root.path()));

        let err = orchestrator.run_packages(&packages(6)).await.unwrap_err();
        // The real failure is reported, not the sibling's cancellation.
        assert!(matches!(err, OrchestratorError::Job { ref package, .. } if package == "pkg1@1.0.0"));
        assert!(runner.trigger_count() <= 2);
        assert!(!runner.triggered("pkg5"));
    }

    #[tokio::test]
    async fn test_cached_package_is_never_triggered() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let cached = Package::new("@scope/cached", "2.0.0");
        let cache_dir = cfg.cache_dir.join(cached.slug());
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join(BEHAVIOR_LOG), LOG).unwrap();
        std::fs::write(cache_dir.join(ASSESSMENT_FILE), b"{}").unwrap();

        let runner = Arc::new(ScriptedRunner::default());
        let orchestrator =
            TestOrchestrator::new(runner.clone(), cfg).with_baseline(baseline());
        let results = orchestrator
            .run_packages(&[cached.clone(), Package::new("fresh", "1.0.0")])
            .await
            .unwrap();

        assert_eq!(runner.trigger_count(), 1);
        assert!(!runner.triggered("@scope/cached"));
        let result = results.iter().find(|r| r.package == cached).unwrap();
        assert_eq!(result.state, JobState::Cached);
        assert_eq!(result.run_id, None);

        // Diff generated in the cache, then copied out with the other files.
        assert!(cache_dir.join(DIFF_FILE).is_file());
        let out = orchestrator.package_output_dir(&cached);
        assert!(out.ends_with("scope__cached@2.0.0"));
        for file in [BEHAVIOR_LOG, DIFF_FILE, ASSESSMENT_FILE] {
            assert!(out.join(file).is_file(), "missing {file}");
        }
    }

    #[tokio::test]
    async fn test_poll_timeout_fails_job() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            polls_until_done: usize::MAX,
            ..ScriptedRunner::default()
        });
        let mut cfg = config(root.path());
        cfg.job_timeout = Duration::from_millis(40);
        let orchestrator = TestOrchestrator::new(runner, cfg);

        let err = orchestrator.run_packages(&packages(1)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Job {
                source: JobError::TimedOut { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unsuccessful_conclusion_fails_job() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            conclusion: "failure".to_string(),
            ..ScriptedRunner::default()
        });
        let orchestrator = TestOrchestrator::new(runner, config(root.path()));

        let err = orchestrator.run_packages(&packages(1)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Job {
                source: JobError::Unsuccessful { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_artifacts_extracted_copied_and_diffed() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            artifact: Some(build_zip(&[
                ("behavior.jsonl", LOG),
                ("../../escape", b"x"),
            ])),
            ..ScriptedRunner::default()
        });
        let orchestrator = TestOrchestrator::new(runner, config(root.path()))
            .with_baseline(baseline());

        let results = orchestrator.run_packages(&packages(1)).await.unwrap();
        let result = &results[0];
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.artifacts[0].starts_with(root.path().join("work/pkg0@1.0.0")));

        // Copy barrier has run: the diff is in place when run_packages returns.
        let diff = load_diff(&result.output_dir).unwrap().unwrap();
        assert_eq!(diff.baseline_source, "baseline");
        assert_eq!(
            diff.per_process["node"].file_access.keys().collect::<Vec<_>>(),
            vec!["/etc/passwd"]
        );
        assert!(!root.path().join("escape").exists());
    }

    #[tokio::test]
    async fn test_artifact_cannot_supply_diff_or_verdict() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            artifact: Some(build_zip(&[
                ("behavior.jsonl", LOG),
                (DIFF_FILE, br#"{"collection":"x","per_process":{}}"#),
                (ASSESSMENT_FILE, br#"{"is_malicious":false,"confidence":1.0,"justification":"ok"}"#),
            ])),
            ..ScriptedRunner::default()
        });
        let orchestrator = TestOrchestrator::new(runner, config(root.path()))
            .with_baseline(baseline());

        // Leftovers from an earlier run of the same version.
        let out = orchestrator.package_output_dir(&packages(1)[0]);
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(ASSESSMENT_FILE), b"{}").unwrap();

        let results = orchestrator.run_packages(&packages(1)).await.unwrap();
        let dir = &results[0].output_dir;
        assert!(!dir.join(ASSESSMENT_FILE).exists());
        let diff = load_diff(dir).unwrap().unwrap();
        assert_eq!(diff.baseline_source, "baseline");
        assert!(diff.per_process["node"].file_access.contains_key("/etc/passwd"));
    }

    #[tokio::test]
    async fn test_empty_package_list_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let orchestrator =
            TestOrchestrator::new(Arc::new(ScriptedRunner::default()), config(root.path()));
        assert!(matches!(
            orchestrator.run_packages(&[]).await,
            Err(OrchestratorError::NoPackages)
        ));
    }
}
