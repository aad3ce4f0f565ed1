//! End-to-end gate run.
//!
//! [`GatePipeline`] executes the stages in order:
//! 1. **Graph**: parse the lock-file into a [`DependencyGraph`], either given
//!    directly or found (or generated) next to a `package.json`
//! 2. **Mirror**: upload every node to the staging registry
//! 3. **Analysis**: sandboxed test runs of the direct dependencies
//! 4. **Verdicts**: assess each anomaly diff (needs a baseline and a producer)
//! 5. **Gate**: promote the whole graph to the trusted registry, or block
//!
//! Any stage error aborts the run. A blocked promotion is not an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::behavior::Baseline;
use crate::config::{ConfigError, GateConfig};
use crate::gate::{collect_verdicts, GateDecision, GateError, PromotionGate};
use crate::graph::{
    build_graph, build_graph_for_manifest, root_package, GraphError, Lockfile, LockfileGenerator,
    PackageManifest,
};
use crate::mirror::{HttpRegistry, MirrorError, MirrorReport, NpmUpstream, RegistryMirror};
use crate::model::{DependencyGraph, Package};
use crate::orchestrator::{
    GithubActionsRunner, OrchestratorError, PackageResult, TestOrchestrator,
};
use crate::traits::{RegistryError, RunnerError, VerdictError, VerdictProducer};
use crate::verdict::{SecurityAssessment, VerdictStage};

// ============================================================================
// Results
// ============================================================================

/// Wall-clock time per stage, in milliseconds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total_duration_ms: u64,
    pub graph_duration_ms: u64,
    pub mirror_duration_ms: u64,
    pub analysis_duration_ms: u64,
    pub verdict_duration_ms: u64,
    pub gate_duration_ms: u64,
    /// Nodes in the graph, root included.
    pub packages: usize,
    pub direct_dependencies: usize,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub graph: DependencyGraph,
    pub staging: MirrorReport,
    pub results: Vec<PackageResult>,
    pub verdicts: BTreeMap<String, SecurityAssessment>,
    /// `None` when no trusted registry is configured.
    pub decision: Option<GateDecision>,
    pub stats: RunStats,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Dependency graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Staging mirror: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Analysis: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Verdicts: {0}")]
    Verdict(#[from] VerdictError),

    #[error("Promotion: {0}")]
    Gate(#[from] GateError),

    #[error("Registry client: {0}")]
    Registry(#[from] RegistryError),

    #[error("CI client: {0}")]
    Runner(#[from] RunnerError),

    #[error("Failed to load baseline {}: {source}", .path.display())]
    Baseline {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task join error: {0}")]
    Join(String),
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct GatePipeline {
    lockfiles: LockfileGenerator,
    staging: RegistryMirror,
    orchestrator: TestOrchestrator,
    verdicts: Option<VerdictStage>,
    gate: Option<PromotionGate>,
}

impl GatePipeline {
    pub fn new(staging: RegistryMirror, orchestrator: TestOrchestrator) -> Self {
        Self {
            lockfiles: LockfileGenerator::default(),
            staging,
            orchestrator,
            verdicts: None,
            gate: None,
        }
    }

    pub fn with_lockfile_generator(mut self, generator: LockfileGenerator) -> Self {
        self.lockfiles = generator;
        self
    }

    pub fn with_verdict_stage(mut self, stage: VerdictStage) -> Self {
        self.verdicts = Some(stage);
        self
    }

    pub fn with_gate(mut self, gate: PromotionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Wires the HTTP clients described by `config`.
    ///
    /// The verdict stage is enabled only when both a baseline and a
    /// `producer` are available; the gate only when a trusted registry is
    /// configured.
    pub fn from_config(
        config: &GateConfig,
        producer: Option<Arc<dyn VerdictProducer>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let staging_endpoint = config.staging.clone().ok_or(ConfigError::Missing("staging"))?;
        let ci = config.ci.clone().ok_or(ConfigError::Missing("ci"))?;

        let upstream = Arc::new(NpmUpstream::new(config.upstream_registry.clone())?);
        let staging = RegistryMirror::new(
            Arc::new(HttpRegistry::new("staging", staging_endpoint)?),
            upstream.clone(),
            config.mirror_concurrency,
        );

        let mut orchestrator = TestOrchestrator::new(
            Arc::new(GithubActionsRunner::new(ci)?),
            config.orchestrator_config(),
        );
        if let Some(path) = &config.baseline_path {
            let baseline = Baseline::load(path).map_err(|source| PipelineError::Baseline {
                path: path.clone(),
                source,
            })?;
            orchestrator = orchestrator.with_baseline(Arc::new(baseline));
        }

        let mut pipeline = Self::new(staging, orchestrator)
            .with_lockfile_generator(LockfileGenerator::new(&config.npm_program));
        match producer {
            Some(producer) if config.baseline_path.is_some() => {
                pipeline = pipeline
                    .with_verdict_stage(VerdictStage::new(producer, config.verdict_concurrency));
            }
            Some(_) => warn!("Verdict producer given without a baseline, verdict stage disabled"),
            None => {}
        }
        if let Some(trusted) = config.trusted.clone() {
            pipeline = pipeline.with_gate(PromotionGate::new(RegistryMirror::new(
                Arc::new(HttpRegistry::new("trusted", trusted)?),
                upstream,
                config.mirror_concurrency,
            )));
        }
        Ok(pipeline)
    }

    /// Runs every configured stage for the project described by
    /// `lockfile_path`. `root` defaults to the lock-file's own root entry.
    #[instrument(skip(self, root), fields(lockfile = %lockfile_path.display()))]
    pub async fn run(
        &self,
        lockfile_path: &Path,
        root: Option<&Package>,
    ) -> Result<RunOutcome, PipelineError> {
        let start = Instant::now();
        info!("Building dependency graph");
        let path = lockfile_path.to_path_buf();
        let root = root.cloned();
        let graph = tokio::task::spawn_blocking(move || -> Result<DependencyGraph, GraphError> {
            let lockfile = Lockfile::from_path(&path)?;
            let root = match root {
                Some(root) => root,
                None => root_package(&lockfile)?,
            };
            build_graph(&lockfile, &root)
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))??;
        self.run_graph(graph, start).await
    }

    /// Runs every configured stage for the project whose `package.json` is
    /// at `manifest_path`. The root identity and its edges come from the
    /// manifest; the lock-file beside it is used, or generated when absent.
    #[instrument(skip(self), fields(manifest = %manifest_path.display()))]
    pub async fn run_manifest(&self, manifest_path: &Path) -> Result<RunOutcome, PipelineError> {
        let start = Instant::now();
        info!("Building dependency graph from manifest");
        let manifest = PackageManifest::from_path(manifest_path)?;
        manifest.validate()?;
        let lockfile = self.lockfiles.load_or_generate(manifest_path).await?;
        let graph = build_graph_for_manifest(&lockfile, &manifest)?;
        self.run_graph(graph, start).await
    }

    async fn run_graph(
        &self,
        graph: DependencyGraph,
        start: Instant,
    ) -> Result<RunOutcome, PipelineError> {
        let mut stats = RunStats {
            graph_duration_ms: start.elapsed().as_millis() as u64,
            ..RunStats::default()
        };

        let direct: Vec<Package> = graph
            .direct_dependencies()
            .into_iter()
            .map(|node| node.package.clone())
            .collect();
        stats.packages = graph.len();
        stats.direct_dependencies = direct.len();
        info!(
            duration_ms = stats.graph_duration_ms,
            root = %graph.root,
            packages = stats.packages,
            direct = stats.direct_dependencies,
            "Graph built"
        );

        // Stage 2: staging mirror
        let stage_start = Instant::now();
        let staging = self.staging.upload_graph(&graph).await?;
        stats.mirror_duration_ms = stage_start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.mirror_duration_ms,
            uploaded = staging.uploaded.len(),
            skipped = staging.skipped.len(),
            "Staging mirror completed"
        );

        // Stage 3: analysis
        let stage_start = Instant::now();
        let results = if direct.is_empty() {
            info!("No direct dependencies to analyze");
            Vec::new()
        } else {
            self.orchestrator.run_packages(&direct).await?
        };
        stats.analysis_duration_ms = stage_start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.analysis_duration_ms,
            analyzed = results.len(),
            "Analysis completed"
        );

        let analyzed: Vec<(Package, PathBuf)> = results
            .iter()
            .map(|r| (r.package.clone(), r.output_dir.clone()))
            .collect();

        // Stage 4: verdicts
        let stage_start = Instant::now();
        let verdicts = match &self.verdicts {
            Some(stage) if !analyzed.is_empty() => stage.evaluate(analyzed.clone()).await?,
            _ => BTreeMap::new(),
        };
        stats.verdict_duration_ms = stage_start.elapsed().as_millis() as u64;

        // Stage 5: promotion
        let stage_start = Instant::now();
        let decision = match &self.gate {
            Some(gate) => {
                if self.verdicts.is_none() {
                    warn!("Promotion gate running without a verdict stage");
                }
                let collected = collect_verdicts(&analyzed)?;
                Some(gate.evaluate(&graph, &collected).await?)
            }
            None => None,
        };
        stats.gate_duration_ms = stage_start.elapsed().as_millis() as u64;

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.total_duration_ms,
            promoted = decision.as_ref().map(GateDecision::is_promoted),
            "Run finished"
        );

        Ok(RunOutcome {
            graph,
            staging,
            results,
            verdicts,
            decision,
            stats,
        })
    }
}
