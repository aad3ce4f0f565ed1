//! Capability interfaces for the external collaborators: artifact registries,
//! the upstream public registry, the remote test runner and the verdict
//! producer. HTTP implementations live next to the component that uses them;
//! tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::behavior::DedupedProcessStats;
use crate::mirror::PackageMetadata;
use crate::model::Package;
use crate::verdict::SecurityAssessment;

/// Transport-level failure talking to a package registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode registry response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Transport-level failure talking to the remote test runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Dispatch returned no run details")]
    MissingRunDetails,

    #[error("Artifact redirect without Location header")]
    MissingRedirect,

    #[error("Failed to decode runner response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("Verdict producer failed for {package}: {reason}")]
    Producer { package: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed verdict or diff document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Staging or trusted registry: existence check plus publish.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Short label used in logs (e.g. `"staging"`).
    fn label(&self) -> &str;

    /// True when this exact `name@version` is already published.
    async fn version_exists(&self, package: &Package) -> Result<bool, RegistryError>;

    async fn publish(
        &self,
        package: &Package,
        metadata: &PackageMetadata,
        tarball: &[u8],
    ) -> Result<(), RegistryError>;
}

/// Authoritative public registry the mirror copies from.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Version metadata, normalized at ingestion.
    async fn fetch_metadata(&self, package: &Package) -> Result<PackageMetadata, RegistryError>;

    async fn fetch_tarball(&self, url: &str) -> Result<Vec<u8>, RegistryError>;
}

/// Status of a remote test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn succeeded(&self) -> bool {
        self.conclusion.as_deref() == Some("success")
    }
}

/// An output artifact of a remote test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub expired: bool,
}

/// Remote, isolated test execution (a CI workflow).
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Dispatches a test job for `package` and returns its run id.
    async fn trigger(&self, package: &Package) -> Result<u64, RunnerError>;

    async fn run_status(&self, run_id: u64) -> Result<RunStatus, RunnerError>;

    async fn list_artifacts(&self, run_id: u64) -> Result<Vec<ArtifactRef>, RunnerError>;

    /// Downloads an artifact as zip bytes.
    async fn download_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RunnerError>;
}

/// External judgement over an anomaly diff.
#[async_trait]
pub trait VerdictProducer: Send + Sync {
    async fn assess(
        &self,
        package: &Package,
        diff: &DedupedProcessStats,
    ) -> Result<SecurityAssessment, VerdictError>;
}
