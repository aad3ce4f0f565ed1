//! Verdicts over anomaly diffs and the files that carry them between stages.
//!
//! Per package output directory:
//! - `behavior.jsonl`: raw event log
//! - `diff.json`: [`DedupedProcessStats`]
//! - `ai-analysis.json`: [`SecurityAssessment`]
//!
//! Whether the last two exist is control-flow state: a missing diff means the
//! package was never compared to a baseline, a missing assessment means the
//! producer never had to look at it.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::behavior::DedupedProcessStats;
use crate::executor::{CancelSignal, WorkerPool};
use crate::model::Package;
use crate::traits::{VerdictError, VerdictProducer};

pub const BEHAVIOR_LOG: &str = "behavior.jsonl";
pub const DIFF_FILE: &str = "diff.json";
pub const ASSESSMENT_FILE: &str = "ai-analysis.json";

/// Safe/malicious judgement for one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    pub is_malicious: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<String>,
}

impl SecurityAssessment {
    /// Verdict for a diff with nothing left after baseline subtraction.
    pub fn clean() -> Self {
        Self {
            is_malicious: false,
            confidence: 1.0,
            justification: "No anomalous behavior detected. All activity matched baseline patterns."
                .to_string(),
            indicators: Vec::new(),
        }
    }
}

/// Reads `ai-analysis.json` from `dir`. `Ok(None)` when there is none.
pub fn load_assessment(dir: &Path) -> Result<Option<SecurityAssessment>, VerdictError> {
    match std::fs::read(dir.join(ASSESSMENT_FILE)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn save_assessment(dir: &Path, assessment: &SecurityAssessment) -> Result<(), VerdictError> {
    let json = serde_json::to_vec_pretty(assessment)?;
    std::fs::write(dir.join(ASSESSMENT_FILE), json)?;
    Ok(())
}

/// Reads `diff.json` from `dir`. `Ok(None)` when there is none.
pub fn load_diff(dir: &Path) -> Result<Option<DedupedProcessStats>, VerdictError> {
    match std::fs::read(dir.join(DIFF_FILE)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Runs a [`VerdictProducer`] over analyzed packages.
pub struct VerdictStage {
    producer: Arc<dyn VerdictProducer>,
    concurrency: usize,
}

impl VerdictStage {
    pub fn new(producer: Arc<dyn VerdictProducer>, concurrency: usize) -> Self {
        Self {
            producer,
            concurrency,
        }
    }

    /// Produces (or reuses) an assessment for every `(package, output dir)`
    /// that has a diff, keyed by package id.
    ///
    /// Fail-fast: the first producer or I/O error stops the rest.
    #[instrument(skip(self, targets), fields(packages = targets.len()))]
    pub async fn evaluate(
        &self,
        targets: Vec<(Package, PathBuf)>,
    ) -> Result<BTreeMap<String, SecurityAssessment>, VerdictError> {
        let producer = Arc::clone(&self.producer);
        let cancel = CancelSignal::new();

        let mut batch = WorkerPool::new(self.concurrency)
            .run(targets, &cancel, move |(package, dir), _cancel| {
                let producer = Arc::clone(&producer);
                async move { assess_one(producer.as_ref(), &package, &dir).await }
            })
            .await;

        if let Some(((package, _), err)) = batch.take_first_failure() {
            warn!(package = %package, error = %err, "Verdict stage aborted");
            return Err(err);
        }

        let verdicts: BTreeMap<_, _> = batch
            .completed()
            .filter_map(|((package, _), assessment)| {
                assessment.clone().map(|a| (package.id(), a))
            })
            .collect();
        info!(verdicts = verdicts.len(), "Verdict stage complete");
        Ok(verdicts)
    }
}

async fn assess_one(
    producer: &dyn VerdictProducer,
    package: &Package,
    dir: &Path,
) -> Result<Option<SecurityAssessment>, VerdictError> {
    if let Some(cached) = load_assessment(dir)? {
        debug!(package = %package, "Using cached assessment");
        return Ok(Some(cached));
    }
    let Some(diff) = load_diff(dir)? else {
        debug!(package = %package, "No diff, nothing to assess");
        return Ok(None);
    };

    let assessment = if diff.is_clean() {
        debug!(package = %package, "Clean diff");
        SecurityAssessment::clean()
    } else {
        producer.assess(package, &diff).await?
    };
    save_assessment(dir, &assessment)?;

    info!(
        package = %package,
        malicious = assessment.is_malicious,
        confidence = assessment.confidence,
        "Assessed"
    );
    Ok(Some(assessment))
}
