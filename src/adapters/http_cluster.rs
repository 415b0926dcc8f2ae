use crate::domain::model::{ApplyOutcome, Manifest, WorkloadStatus};
use crate::domain::ports::ClusterApi;
use crate::utils::error::{OrchestratorError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize)]
struct ApplyRequest<'a> {
    source: &'a str,
    manifest: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct WorkloadList {
    #[serde(default)]
    items: Vec<WorkloadStatus>,
}

/// Cluster API reached through a JSON/REST gateway in front of the
/// orchestration platform.
#[derive(Debug, Clone)]
pub struct HttpClusterApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClusterApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        Url::parse(base_url).map_err(|e| OrchestratorError::InvalidConfigValue {
            field: "cluster.api_url".to_string(),
            value: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn workloads_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/workloads", self.base_url, namespace)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn parse_outcome(result: &str) -> Result<ApplyOutcome> {
    match result {
        "created" => Ok(ApplyOutcome::Created),
        "configured" | "updated" => Ok(ApplyOutcome::Updated),
        "unchanged" => Ok(ApplyOutcome::Unchanged),
        other => Err(OrchestratorError::Cluster(format!("unknown apply result '{}'", other))),
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn apply_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<ApplyOutcome> {
        let url = format!("{}/api/v1/namespaces/{}/apply", self.base_url, namespace);
        tracing::debug!("POST {} ({})", url, manifest.source);

        let response = self
            .authorize(self.client.post(&url))
            .json(&ApplyRequest {
                source: &manifest.source,
                manifest: &manifest.body,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    OrchestratorError::TransientApplyError {
                        manifest: manifest.source.clone(),
                        message: e.to_string(),
                    }
                } else {
                    OrchestratorError::HttpError(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body: ApplyResponse = response.json().await?;
            return parse_outcome(&body.result);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            // 原樣保留 API 的錯誤訊息
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(OrchestratorError::ApplyRejected {
                    manifest: manifest.source.clone(),
                    message: body,
                })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(OrchestratorError::TransientApplyError {
                manifest: manifest.source.clone(),
                message: format!("HTTP {}: {}", status, body),
            }),
            s if s.is_server_error() => Err(OrchestratorError::TransientApplyError {
                manifest: manifest.source.clone(),
                message: format!("HTTP {}: {}", status, body),
            }),
            _ => Err(OrchestratorError::Cluster(format!(
                "apply of {} returned HTTP {}: {}",
                manifest.source, status, body
            ))),
        }
    }

    async fn resource_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        let url = format!("{}/{}", self.workloads_url(namespace), name);
        let response = self.authorize(self.client.get(&url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(response.json().await?)),
            s => Err(OrchestratorError::Cluster(format!("GET {} returned HTTP {}", url, s))),
        }
    }

    async fn list_resources(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadStatus>> {
        let url = self.workloads_url(namespace);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("labelSelector", selector)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Cluster(format!(
                "GET {}?labelSelector={} returned HTTP {}",
                url, selector, status
            )));
        }
        let list: WorkloadList = response.json().await?;
        Ok(list.items)
    }
}
