//! Promotion of a vetted dependency graph into the trusted registry.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::mirror::{MirrorError, MirrorReport, RegistryMirror};
use crate::model::{DependencyGraph, Package};
use crate::traits::VerdictError;
use crate::verdict::{load_assessment, SecurityAssessment};

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Failed to read verdict for {package}: {source}")]
    Verdict {
        package: String,
        #[source]
        source: VerdictError,
    },

    #[error("Promotion to trusted registry failed: {0}")]
    Promotion(#[from] MirrorError),
}

/// A package whose verdict stopped promotion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedPackage {
    pub package: Package,
    pub confidence: f64,
    pub justification: String,
    pub indicators: Vec<String>,
    /// Ids of the packages it pulls in transitively.
    pub pulls_in: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateDecision {
    /// Every node of the graph was mirrored into the trusted registry.
    Promoted { report: MirrorReport },
    /// Nothing was promoted.
    Blocked { blocked: Vec<BlockedPackage> },
}

impl GateDecision {
    pub fn is_promoted(&self) -> bool {
        matches!(self, GateDecision::Promoted { .. })
    }
}

/// Reads the verdict of each analyzed package from its output directory.
/// A missing `ai-analysis.json` is reported as `None`.
pub fn collect_verdicts(
    analyzed: &[(Package, PathBuf)],
) -> Result<Vec<(Package, Option<SecurityAssessment>)>, GateError> {
    analyzed
        .iter()
        .map(|(package, dir)| read_verdict(package, dir).map(|v| (package.clone(), v)))
        .collect()
}

fn read_verdict(package: &Package, dir: &Path) -> Result<Option<SecurityAssessment>, GateError> {
    load_assessment(dir).map_err(|source| GateError::Verdict {
        package: package.id(),
        source,
    })
}

/// Packages whose verdict is malicious. No verdict counts as safe.
pub fn blocking_packages(
    graph: &DependencyGraph,
    verdicts: &[(Package, Option<SecurityAssessment>)],
) -> Vec<BlockedPackage> {
    verdicts
        .iter()
        .filter_map(|(package, verdict)| match verdict {
            Some(a) if a.is_malicious => Some(BlockedPackage {
                package: package.clone(),
                confidence: a.confidence,
                justification: a.justification.clone(),
                indicators: a.indicators.clone(),
                pulls_in: graph.transitive_closure(&package.id()).into_iter().collect(),
            }),
            _ => None,
        })
        .collect()
}

/// All-or-nothing promotion into the trusted registry.
pub struct PromotionGate {
    trusted: RegistryMirror,
}

impl PromotionGate {
    pub fn new(trusted: RegistryMirror) -> Self {
        Self { trusted }
    }

    /// Promotes the whole graph if no verdict is malicious; otherwise returns
    /// the blocking packages and leaves the trusted registry untouched.
    #[instrument(skip(self, graph, verdicts), fields(root = %graph.root, verdicts = verdicts.len()))]
    pub async fn evaluate(
        &self,
        graph: &DependencyGraph,
        verdicts: &[(Package, Option<SecurityAssessment>)],
    ) -> Result<GateDecision, GateError> {
        for (package, verdict) in verdicts {
            match verdict {
                None => info!(package = %package, "No verdict (clean diff), treating as safe"),
                Some(a) if !a.is_malicious => {
                    info!(package = %package, confidence = a.confidence, "Safe")
                }
                Some(_) => {}
            }
        }

        let blocked = blocking_packages(graph, verdicts);
        if !blocked.is_empty() {
            for b in &blocked {
                warn!(
                    package = %b.package,
                    confidence = b.confidence,
                    justification = %b.justification,
                    "Blocked"
                );
            }
            warn!(blocked = blocked.len(), "Promotion skipped");
            return Ok(GateDecision::Blocked { blocked });
        }

        info!(
            registry = %self.trusted.registry_label(),
            nodes = graph.len(),
            "All packages passed, promoting full dependency graph"
        );
        let report = self.trusted.upload_graph(graph).await?;
        Ok(GateDecision::Promoted { report })
    }
}
