//! Run configuration, loaded from JSON with secrets overridable from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::behavior::NoiseFilter;
use crate::mirror::RegistryEndpoint;
use crate::model::CANONICAL_REGISTRY;
use crate::orchestrator::{CiEndpoint, OrchestratorConfig};

pub const ENV_STAGING_TOKEN: &str = "GATE_STAGING_TOKEN";
pub const ENV_TRUSTED_TOKEN: &str = "GATE_TRUSTED_TOKEN";
pub const ENV_CI_TOKEN: &str = "GATE_CI_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Registry every dependency is mirrored into before testing.
    pub staging: Option<RegistryEndpoint>,
    /// Registry a vetted graph is promoted into. Promotion is off without it.
    pub trusted: Option<RegistryEndpoint>,
    pub upstream_registry: String,
    pub ci: Option<CiEndpoint>,
    pub mirror_concurrency: usize,
    pub analysis_concurrency: usize,
    pub verdict_concurrency: usize,
    pub poll_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub cache_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Known-safe snapshot; no diffs or verdicts without one.
    pub baseline_path: Option<PathBuf>,
    pub noise_patterns: Vec<String>,
    /// Package manager used to generate a missing lock-file.
    pub npm_program: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            staging: None,
            trusted: None,
            upstream_registry: CANONICAL_REGISTRY.to_string(),
            ci: None,
            mirror_concurrency: 10,
            analysis_concurrency: 5,
            verdict_concurrency: 5,
            poll_interval_secs: 15,
            job_timeout_secs: 30 * 60,
            cache_dir: PathBuf::from("analysis-results"),
            work_dir: std::env::temp_dir().join("dependency-gate"),
            output_dir: PathBuf::from("output"),
            baseline_path: None,
            noise_patterns: vec!["node_modules".to_string()],
            npm_program: "npm".to_string(),
        }
    }
}

impl GateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn with_staging(mut self, endpoint: RegistryEndpoint) -> Self {
        self.staging = Some(endpoint);
        self
    }

    pub fn with_trusted(mut self, endpoint: RegistryEndpoint) -> Self {
        self.trusted = Some(endpoint);
        self
    }

    pub fn with_ci(mut self, endpoint: CiEndpoint) -> Self {
        self.ci = Some(endpoint);
        self
    }

    pub fn with_baseline(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_path = Some(path.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_analysis_concurrency(mut self, limit: usize) -> Self {
        self.analysis_concurrency = limit;
        self
    }

    /// Overrides tokens from `GATE_*_TOKEN` environment variables.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let (Some(staging), Some(token)) = (self.staging.as_mut(), lookup(ENV_STAGING_TOKEN)) {
            staging.token = token;
        }
        if let (Some(trusted), Some(token)) = (self.trusted.as_mut(), lookup(ENV_TRUSTED_TOKEN)) {
            trusted.token = token;
        }
        if let (Some(ci), Some(token)) = (self.ci.as_mut(), lookup(ENV_CI_TOKEN)) {
            ci.token = token;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let staging = self.staging.as_ref().ok_or(ConfigError::Missing("staging"))?;
        if staging.token.is_empty() {
            return Err(ConfigError::Missing("staging.token"));
        }
        if let Some(trusted) = &self.trusted {
            if trusted.token.is_empty() {
                return Err(ConfigError::Missing("trusted.token"));
            }
        }
        let ci = self.ci.as_ref().ok_or(ConfigError::Missing("ci"))?;
        if ci.token.is_empty() {
            return Err(ConfigError::Missing("ci.token"));
        }

        for (field, value) in [
            ("mirror_concurrency", self.mirror_concurrency),
            ("analysis_concurrency", self.analysis_concurrency),
            ("verdict_concurrency", self.verdict_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.job_timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::Invalid {
                field: "job_timeout_secs",
                reason: "shorter than the poll interval".to_string(),
            });
        }
        Ok(())
    }

    pub fn noise_filter(&self) -> NoiseFilter {
        NoiseFilter::new(self.noise_patterns.iter().cloned())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.analysis_concurrency,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            cache_dir: self.cache_dir.clone(),
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
            noise: self.noise_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "staging": { "base_url": "http://localhost:4873/api", "owner": "acme" },
        "ci": { "owner": "acme", "repo": "sandbox", "workflow": "test.yml" },
        "analysis_concurrency": 3
    }"#;

    #[test]
    fn test_partial_document_takes_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), DOC).unwrap();
        let config = GateConfig::from_file(file.path()).unwrap();

        assert_eq!(config.analysis_concurrency, 3);
        assert_eq!(config.mirror_concurrency, 10);
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.upstream_registry, "https://registry.npmjs.org");
        assert_eq!(config.noise_patterns, vec!["node_modules"]);
        assert_eq!(config.npm_program, "npm");
        let ci = config.ci.as_ref().unwrap();
        assert_eq!(ci.git_ref, "main");
        assert_eq!(ci.api_base, "https://api.github.com");
        assert!(config.trusted.is_none());
    }

    #[test]
    fn test_env_tokens_override_and_validate() {
        let config: GateConfig = serde_json::from_str(DOC).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("staging.token"))
        ));

        let config = config.apply_env_from(|key| match key {
            ENV_STAGING_TOKEN => Some("s3cret".to_string()),
            ENV_CI_TOKEN => Some("ghp".to_string()),
            _ => None,
        });
        assert_eq!(config.staging.as_ref().unwrap().token, "s3cret");
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config: GateConfig = serde_json::from_str(DOC).unwrap();
        let config = config
            .apply_env_from(|_| Some("t".to_string()))
            .with_analysis_concurrency(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "analysis_concurrency",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = GateConfig::from_file(Path::new("/nonexistent/gate.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
