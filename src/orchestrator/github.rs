//! GitHub Actions as the remote test runner.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::model::Package;
use crate::traits::{ArtifactRef, RunStatus, RunnerError, TestRunner};

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("dependency-gate/", env!("CARGO_PKG_VERSION"));

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_git_ref() -> String {
    "main".to_string()
}

/// Workflow that runs one package in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiEndpoint {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Workflow file name, e.g. `test-package.yml`.
    pub workflow: String,
    #[serde(default = "default_git_ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing)]
    pub token: String,
}

#[derive(Deserialize)]
struct DispatchResponse {
    #[serde(alias = "id")]
    workflow_run_id: u64,
}

#[derive(Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<ArtifactRef>,
}

pub struct GithubActionsRunner {
    endpoint: CiEndpoint,
    client: Client,
    /// Stops at the first redirect so the blob host never sees the token.
    no_redirect: Client,
}

impl GithubActionsRunner {
    pub fn new(endpoint: CiEndpoint) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        let no_redirect = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            endpoint,
            client,
            no_redirect,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/actions/{}",
            self.endpoint.api_base.trim_end_matches('/'),
            self.endpoint.owner,
            self.endpoint.repo,
            path
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.endpoint.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

async fn expect_ok(response: Response) -> Result<Response, RunnerError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RunnerError::Status {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TestRunner for GithubActionsRunner {
    async fn trigger(&self, package: &Package) -> Result<u64, RunnerError> {
        let url = self.repo_url(&format!("workflows/{}/dispatches", self.endpoint.workflow));
        let body = json!({
            "ref": self.endpoint.git_ref,
            "inputs": { "package": package.name, "version": package.version },
            "return_run_details": true,
        });
        let response = self.authed(self.client.post(&url)).json(&body).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(RunnerError::MissingRunDetails);
        }
        let dispatch: DispatchResponse = expect_ok(response)
            .await?
            .json()
            .await
            .map_err(|e| RunnerError::Decode(e.to_string()))?;
        debug!(package = %package, run_id = dispatch.workflow_run_id, "Dispatched workflow");
        Ok(dispatch.workflow_run_id)
    }

    async fn run_status(&self, run_id: u64) -> Result<RunStatus, RunnerError> {
        let url = self.repo_url(&format!("runs/{}", run_id));
        let response = self.authed(self.client.get(&url)).send().await?;
        expect_ok(response)
            .await?
            .json()
            .await
            .map_err(|e| RunnerError::Decode(e.to_string()))
    }

    async fn list_artifacts(&self, run_id: u64) -> Result<Vec<ArtifactRef>, RunnerError> {
        let url = self.repo_url(&format!("runs/{}/artifacts", run_id));
        let response = self.authed(self.client.get(&url)).send().await?;
        let list: ArtifactList = expect_ok(response)
            .await?
            .json()
            .await
            .map_err(|e| RunnerError::Decode(e.to_string()))?;
        Ok(list.artifacts)
    }

    async fn download_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, RunnerError> {
        let url = self.repo_url(&format!("artifacts/{}/zip", artifact.id));
        let mut response = self.authed(self.no_redirect.get(&url)).send().await?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(RunnerError::MissingRedirect)?
                .to_string();
            debug!(artifact = %artifact.name, "Following artifact redirect");
            response = self.client.get(&location).send().await?;
        }

        let bytes = expect_ok(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
