//! Copies every package of a dependency graph from the public upstream into
//! a private artifact registry.

pub mod http;
pub mod metadata;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::executor::{CancelSignal, WorkerPool};
use crate::model::{DependencyGraph, PackageNode};
use crate::traits::{ArtifactRegistry, RegistryError, UpstreamSource};

pub use http::{HttpRegistry, NpmUpstream, RegistryEndpoint};
pub use metadata::{digest, PackageMetadata, PublishDocument, Repository, TarballDigest};

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Failed to check {package} in {registry}: {source}")]
    Exists {
        package: String,
        registry: String,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to fetch metadata for {package}: {source}")]
    Metadata {
        package: String,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to download tarball for {package} from {url}: {source}")]
    Download {
        package: String,
        url: String,
        #[source]
        source: RegistryError,
    },

    #[error("Failed to publish {package} to {registry}: {source}")]
    Publish {
        package: String,
        registry: String,
        #[source]
        source: RegistryError,
    },
}

/// Ids of the packages a mirror run published or found already present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

impl MirrorReport {
    pub fn total(&self) -> usize {
        self.uploaded.len() + self.skipped.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Uploaded,
    AlreadyPresent,
}

/// Upstream-to-registry copier with bounded parallelism.
#[derive(Clone)]
pub struct RegistryMirror {
    registry: Arc<dyn ArtifactRegistry>,
    upstream: Arc<dyn UpstreamSource>,
    concurrency: usize,
}

impl RegistryMirror {
    pub fn new(
        registry: Arc<dyn ArtifactRegistry>,
        upstream: Arc<dyn UpstreamSource>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            upstream,
            concurrency,
        }
    }

    pub fn registry_label(&self) -> &str {
        self.registry.label()
    }

    /// Uploads every non-root node of `graph`.
    ///
    /// Versions the registry already holds are skipped. The first failure
    /// stops new uploads from starting and is returned once in-flight
    /// uploads settle.
    #[instrument(skip(self, graph), fields(registry = %self.registry.label(), packages = graph.len().saturating_sub(1)))]
    pub async fn upload_graph(&self, graph: &DependencyGraph) -> Result<MirrorReport, MirrorError> {
        let nodes: Vec<PackageNode> = graph.non_root_nodes().cloned().collect();
        let total = nodes.len();
        info!(total, "Starting upload");

        let done = Arc::new(AtomicUsize::new(0));
        let registry = Arc::clone(&self.registry);
        let upstream = Arc::clone(&self.upstream);
        let cancel = CancelSignal::new();

        let mut batch = WorkerPool::new(self.concurrency)
            .run(nodes, &cancel, move |node, _cancel| {
                let registry = Arc::clone(&registry);
                let upstream = Arc::clone(&upstream);
                let done = Arc::clone(&done);
                async move {
                    let outcome = upload_node(registry.as_ref(), upstream.as_ref(), &node).await?;
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(package = %node.id(), progress = %format!("{}/{}", n, total), ?outcome, "Mirrored");
                    Ok::<_, MirrorError>(outcome)
                }
            })
            .await;

        if let Some((node, err)) = batch.take_first_failure() {
            warn!(package = %node.id(), skipped = batch.skipped(), error = %err, "Upload aborted");
            return Err(err);
        }

        let mut report = MirrorReport::default();
        for (node, outcome) in batch.completed() {
            match outcome {
                UploadOutcome::Uploaded => report.uploaded.push(node.id()),
                UploadOutcome::AlreadyPresent => report.skipped.push(node.id()),
            }
        }
        report.uploaded.sort();
        report.skipped.sort();
        info!(
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            "Upload complete"
        );
        Ok(report)
    }
}

async fn upload_node(
    registry: &dyn ArtifactRegistry,
    upstream: &dyn UpstreamSource,
    node: &PackageNode,
) -> Result<UploadOutcome, MirrorError> {
    let package = &node.package;
    let exists = registry
        .version_exists(package)
        .await
        .map_err(|source| MirrorError::Exists {
            package: package.id(),
            registry: registry.label().to_string(),
            source,
        })?;
    if exists {
        return Ok(UploadOutcome::AlreadyPresent);
    }

    let metadata = upstream
        .fetch_metadata(package)
        .await
        .map_err(|source| MirrorError::Metadata {
            package: package.id(),
            source,
        })?;

    let url = node.tarball_url();
    let tarball = upstream
        .fetch_tarball(&url)
        .await
        .map_err(|source| MirrorError::Download {
            package: package.id(),
            url: url.clone(),
            source,
        })?;

    registry
        .publish(package, &metadata, &tarball)
        .await
        .map_err(|source| MirrorError::Publish {
            package: package.id(),
            registry: registry.label().to_string(),
            source,
        })?;
    Ok(UploadOutcome::Uploaded)
}
