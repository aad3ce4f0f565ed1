//! Dependency graph construction from npm lock-files.
//!
//! - [`lockfile`]: `package-lock.json` (v3) parsing into a [`DependencyGraph`]
//! - [`manifest`]: `package.json` parsing for the root package identity
//! - [`generate`]: lock-file lookup or generation for a `package.json`
//!
//! [`DependencyGraph`]: crate::model::DependencyGraph

pub mod generate;
pub mod lockfile;
pub mod manifest;

pub use lockfile::{
    build_graph, build_graph_for_manifest, parse_lockfile, root_package, Lockfile, LockfileEntry,
};
pub use generate::{LockfileGenerator, LOCKFILE_NAME};
pub use manifest::PackageManifest;

use thiserror::Error;

/// Errors raised while building a dependency graph. All of them abort the run.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported lockfile version: {0} (expected 3)")]
    UnsupportedLockfileVersion(u64),

    #[error("Root package entry not found in lockfile")]
    MissingRoot,

    #[error("Lockfile generation with {program} failed: {reason}")]
    LockfileGeneration { program: String, reason: String },

    #[error("package.json missing '{0}' field")]
    MissingField(&'static str),

    /// A dependency points outside the canonical registry (VCS or raw URL).
    #[error("Non-reproducible dependency in {package}: {dependency} -> {location}")]
    NonReproducibleDependency {
        package: String,
        dependency: String,
        location: String,
    },
}
