//! HTTP clients for the artifact registries and the public upstream registry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::metadata::{PackageMetadata, PublishDocument};
use crate::model::{Package, CANONICAL_REGISTRY};
use crate::traits::{ArtifactRegistry, RegistryError, UpstreamSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection details of a private npm-compatible registry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryEndpoint {
    /// API root, e.g. `https://api.github.com` or `http://localhost:4873/api`.
    pub base_url: String,
    pub owner: String,
    #[serde(default, skip_serializing)]
    pub token: String,
}

/// Private registry reached over HTTP with bearer authentication.
pub struct HttpRegistry {
    label: String,
    endpoint: RegistryEndpoint,
    client: Client,
}

impl HttpRegistry {
    pub fn new(label: impl Into<String>, endpoint: RegistryEndpoint) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            label: label.into(),
            endpoint,
            client,
        })
    }

    /// `<base>/packages/<owner>/npm/<encoded name>`
    pub fn package_url(&self, package: &Package) -> String {
        format!(
            "{}/packages/{}/npm/{}",
            self.endpoint.base_url.trim_end_matches('/'),
            self.endpoint.owner,
            package.registry_path()
        )
    }
}

#[async_trait]
impl ArtifactRegistry for HttpRegistry {
    fn label(&self) -> &str {
        &self.label
    }

    async fn version_exists(&self, package: &Package) -> Result<bool, RegistryError> {
        let url = self.package_url(package);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.endpoint.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let doc: Value = response
                    .json()
                    .await
                    .map_err(|e| RegistryError::Decode(e.to_string()))?;
                Ok(doc
                    .get("versions")
                    .and_then(Value::as_object)
                    .is_some_and(|versions| versions.contains_key(&package.version)))
            }
            status => Err(RegistryError::Status {
                url,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn publish(
        &self,
        package: &Package,
        metadata: &PackageMetadata,
        tarball: &[u8],
    ) -> Result<(), RegistryError> {
        let url = self.package_url(package);
        let document = PublishDocument::build(package, metadata, tarball, &url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.endpoint.token)
            .json(&document)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(package = %package, registry = %self.label, "Published");
                Ok(())
            }
            StatusCode::CONFLICT => {
                warn!(package = %package, registry = %self.label, "Version already published");
                Ok(())
            }
            status => Err(RegistryError::Status {
                url,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// The public npm registry (or a compatible proxy).
pub struct NpmUpstream {
    base_url: String,
    client: Client,
}

impl NpmUpstream {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn canonical() -> Result<Self, RegistryError> {
        Self::new(CANONICAL_REGISTRY)
    }
}

#[async_trait]
impl UpstreamSource for NpmUpstream {
    async fn fetch_metadata(&self, package: &Package) -> Result<PackageMetadata, RegistryError> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            package.registry_path(),
            package.version
        );
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url,
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let raw: Value = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(PackageMetadata::from_upstream(&package.name, &raw))
    }

    async fn fetch_tarball(&self, url: &str) -> Result<Vec<u8>, RegistryError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(server: &mockito::Server) -> HttpRegistry {
        HttpRegistry::new(
            "staging",
            RegistryEndpoint {
                base_url: server.url(),
                owner: "acme".to_string(),
                token: "secret".to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_version_exists() {
        let mut server = mockito::Server::new_async().await;
        let found = server
            .mock("GET", "/packages/acme/npm/@scope%2flib")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"versions":{"1.0.0":{}}}"#)
            .expect(2)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/packages/acme/npm/left-pad")
            .with_status(404)
            .create_async()
            .await;

        let reg = registry(&server);
        assert!(reg
            .version_exists(&Package::new("@scope/lib", "1.0.0"))
            .await
            .unwrap());
        assert!(!reg
            .version_exists(&Package::new("@scope/lib", "2.0.0"))
            .await
            .unwrap());
        assert!(!reg
            .version_exists(&Package::new("left-pad", "1.3.0"))
            .await
            .unwrap());
        found.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_treats_conflict_as_success() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", "/packages/acme/npm/left-pad")
            .with_status(409)
            .create_async()
            .await;

        let reg = registry(&server);
        reg.publish(
            &Package::new("left-pad", "1.3.0"),
            &PackageMetadata::default(),
            b"tgz",
        )
        .await
        .unwrap();
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_surfaces_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/packages/acme/npm/left-pad")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = registry(&server)
            .publish(
                &Package::new("left-pad", "1.3.0"),
                &PackageMetadata::default(),
                b"tgz",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_upstream_normalizes_metadata() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/@scope%2fcli/1.0.0")
            .with_status(200)
            .with_body(r#"{"name":"@scope/cli","bin":"./cli.js","repository":"github:a/b"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/@scope/cli/-/cli-1.0.0.tgz")
            .with_status(200)
            .with_body("tarball-bytes")
            .create_async()
            .await;

        let upstream = NpmUpstream::new(server.url()).unwrap();
        let pkg = Package::new("@scope/cli", "1.0.0");
        let meta = upstream.fetch_metadata(&pkg).await.unwrap();
        assert_eq!(meta.bin.unwrap()["cli"], "./cli.js");
        assert_eq!(
            meta.repository.unwrap().url,
            "git+https://github.com/a/b.git"
        );

        let bytes = upstream
            .fetch_tarball(&format!("{}/@scope/cli/-/cli-1.0.0.tgz", server.url()))
            .await
            .unwrap();
        assert_eq!(bytes, b"tarball-bytes");
    }
}
