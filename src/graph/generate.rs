//! Lock-file lookup for a `package.json`, generating one with npm when the
//! project has none.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, instrument};

use super::lockfile::Lockfile;
use super::GraphError;

pub const LOCKFILE_NAME: &str = "package-lock.json";
const MANIFEST_NAME: &str = "package.json";

/// Runs `<program> install --package-lock-only` in a scratch copy of the
/// project so the caller's tree is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileGenerator {
    program: PathBuf,
}

impl Default for LockfileGenerator {
    fn default() -> Self {
        Self::new("npm")
    }
}

impl LockfileGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The lock-file next to `manifest_path`, or a freshly generated one.
    #[instrument(skip(self), fields(manifest = %manifest_path.display()))]
    pub async fn load_or_generate(&self, manifest_path: &Path) -> Result<Lockfile, GraphError> {
        let sibling = manifest_path
            .parent()
            .map(|dir| dir.join(LOCKFILE_NAME))
            .unwrap_or_else(|| PathBuf::from(LOCKFILE_NAME));
        if sibling.is_file() {
            debug!(lockfile = %sibling.display(), "Using existing lockfile");
            return Lockfile::from_path(&sibling);
        }
        self.generate(manifest_path).await
    }

    async fn generate(&self, manifest_path: &Path) -> Result<Lockfile, GraphError> {
        let fail = |reason: String| GraphError::LockfileGeneration {
            program: self.program.display().to_string(),
            reason,
        };

        let scratch = tempfile::Builder::new()
            .prefix("dependency-gate-lock-")
            .tempdir()
            .map_err(|e| fail(format!("creating scratch directory: {}", e)))?;
        let manifest = tokio::fs::read(manifest_path)
            .await
            .map_err(|source| GraphError::Read {
                path: manifest_path.display().to_string(),
                source,
            })?;
        tokio::fs::write(scratch.path().join(MANIFEST_NAME), manifest)
            .await
            .map_err(|e| fail(format!("staging package.json: {}", e)))?;

        info!(program = %self.program.display(), "Generating lockfile");
        let output = tokio::process::Command::new(&self.program)
            .args(["install", "--package-lock-only", "--ignore-scripts", "--silent"])
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("{}: {}", output.status, stderr.trim())));
        }

        let generated = scratch.path().join(LOCKFILE_NAME);
        if !generated.is_file() {
            return Err(fail(format!("{} was not generated", LOCKFILE_NAME)));
        }
        Lockfile::from_path(&generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sibling_lockfile_is_used_without_generating() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(MANIFEST_NAME);
        std::fs::write(&manifest, br#"{"name":"app","version":"1.0.0"}"#).unwrap();
        std::fs::write(
            dir.path().join(LOCKFILE_NAME),
            br#"{"name":"app","lockfileVersion":3,"packages":{"":{"name":"app","version":"1.0.0"}}}"#,
        )
        .unwrap();

        let generator = LockfileGenerator::new("/nonexistent/npm");
        let lockfile = generator.load_or_generate(&manifest).await.unwrap();
        assert_eq!(lockfile.name.as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn test_failed_generation_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(MANIFEST_NAME);
        std::fs::write(&manifest, br#"{"name":"app","version":"1.0.0"}"#).unwrap();

        let err = LockfileGenerator::new("/nonexistent/npm")
            .load_or_generate(&manifest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::LockfileGeneration { ref program, .. } if program == "/nonexistent/npm"
        ));
        assert!(!dir.path().join(LOCKFILE_NAME).exists());
    }
}
