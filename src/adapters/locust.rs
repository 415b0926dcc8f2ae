use crate::domain::model::{LoadTestSpec, SwarmStats, WorkerInfo};
use crate::domain::ports::LoadGenerator;
use crate::utils::error::{OrchestratorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

const AGGREGATED_ROW: &str = "Aggregated";

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    stats: Vec<StatsRow>,
    #[serde(default)]
    workers: Vec<LocustWorker>,
    #[serde(default)]
    total_rps: f64,
    #[serde(default)]
    current_response_time_percentiles: HashMap<String, Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct StatsRow {
    name: String,
    #[serde(default)]
    num_requests: u64,
    #[serde(default)]
    num_failures: u64,
    #[serde(default)]
    median_response_time: Option<f64>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LocustWorker {
    id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    user_count: u32,
}

#[derive(Debug, Deserialize)]
struct SwarmResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
}

impl StatsResponse {
    fn percentile(&self, row: Option<&StatsRow>, key: &str) -> f64 {
        row.and_then(|r| r.extra.get(key))
            .and_then(serde_json::Value::as_f64)
            .or_else(|| self.current_response_time_percentiles.get(key).copied().flatten())
            .unwrap_or(0.0)
    }

    fn into_swarm_stats(self) -> SwarmStats {
        let aggregated = self.stats.iter().find(|r| r.name == AGGREGATED_ROW);

        SwarmStats {
            total_requests: aggregated.map(|r| r.num_requests).unwrap_or(0),
            total_failures: aggregated.map(|r| r.num_failures).unwrap_or(0),
            rps: self.total_rps,
            p50_ms: aggregated
                .and_then(|r| r.median_response_time)
                .unwrap_or_else(|| self.percentile(aggregated, "response_time_percentile_0.5")),
            p95_ms: self.percentile(aggregated, "response_time_percentile_0.95"),
            p99_ms: self.percentile(aggregated, "response_time_percentile_0.99"),
            workers: self
                .workers
                .iter()
                .map(|w| WorkerInfo {
                    id: w.id.clone(),
                    state: w.state.clone(),
                    user_count: w.user_count,
                })
                .collect(),
        }
    }
}

/// Talks to a Locust master's web API.
#[derive(Debug, Clone)]
pub struct LocustClient {
    client: Client,
    base_url: String,
}

impl LocustClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::LoadGenerator(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::LoadGenerator(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_stats(&self) -> Result<StatsResponse> {
        self.get_json("/stats/requests").await
    }
}

#[async_trait]
impl LoadGenerator for LocustClient {
    async fn connected_workers(&self) -> Result<Vec<WorkerInfo>> {
        let stats = self.fetch_stats().await?.into_swarm_stats();
        Ok(stats
            .workers
            .into_iter()
            .filter(|w| w.state != "missing")
            .collect())
    }

    async fn start_swarm(&self, spec: &LoadTestSpec) -> Result<()> {
        let url = format!("{}/swarm", self.base_url);
        let form = [
            ("user_count", spec.users.to_string()),
            ("spawn_rate", spec.spawn_rate.to_string()),
            ("host", spec.target_url.clone()),
        ];
        tracing::debug!("POST {} {:?}", url, form);

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| OrchestratorError::LoadGenerator(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::LoadGenerator(format!(
                "POST {} returned HTTP {}",
                url,
                response.status()
            )));
        }
        let body: SwarmResponse = response.json().await?;
        if !body.success {
            return Err(OrchestratorError::LoadGenerator(format!(
                "swarm refused: {}",
                body.message
            )));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<SwarmStats> {
        Ok(self.fetch_stats().await?.into_swarm_stats())
    }

    async fn stop_swarm(&self) -> Result<()> {
        let _: serde_json::Value = self.get_json("/stop").await?;
        Ok(())
    }
}
