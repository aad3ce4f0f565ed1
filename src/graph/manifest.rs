//! `package.json` parsing for the root package.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::GraphError;
use crate::model::Package;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, GraphError> {
        let bytes = std::fs::read(path).map_err(|source| GraphError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&bytes)
    }

    /// Requires `name` and `version`.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.name.is_empty() {
            return Err(GraphError::MissingField("name"));
        }
        if self.version.is_empty() {
            return Err(GraphError::MissingField("version"));
        }
        Ok(())
    }

    pub fn to_package(&self) -> Package {
        Package::new(self.name.clone(), self.version.clone())
    }

    /// Production and development dependencies; dev entries win on conflict.
    pub fn all_dependencies(&self) -> BTreeMap<String, String> {
        let mut all = self.dependencies.clone();
        all.extend(self.dev_dependencies.clone());
        all
    }
}
