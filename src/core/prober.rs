use crate::domain::model::{EndpointSpec, HealthState, ProbeKind, ProbeResult};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct PrometheusTargets {
    data: PrometheusTargetData,
}

#[derive(Debug, Deserialize)]
struct PrometheusTargetData {
    #[serde(rename = "activeTargets", default)]
    active_targets: Vec<PrometheusTarget>,
}

#[derive(Debug, Deserialize)]
struct PrometheusTarget {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    health: String,
    #[serde(rename = "lastError", default)]
    last_error: String,
}

#[derive(Debug, Deserialize)]
struct JaegerServices {
    #[serde(default)]
    data: Option<Vec<String>>,
}

/// Confirms that observability backends are actually integrated, not just
/// that their pods are Running.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: Client,
    timeout: Duration,
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    pub async fn probe(&self, unit: &str, endpoint: &EndpointSpec) -> ProbeResult {
        let start = Instant::now();
        let health = self.classify(endpoint).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &health {
            HealthState::Healthy => {
                tracing::info!("💚 {} ({}) healthy in {}ms", endpoint.name, unit, latency_ms)
            }
            other => tracing::warn!("💔 {} ({}) {}", endpoint.name, unit, other),
        }

        ProbeResult {
            unit: unit.to_string(),
            endpoint: endpoint.name.clone(),
            kind: endpoint.probe.label().to_string(),
            url: endpoint.url.clone(),
            required: endpoint.required,
            health,
            latency_ms,
        }
    }

    /// Probes concurrently; results keep the order of `targets`.
    pub async fn probe_all(&self, targets: Vec<(String, EndpointSpec)>) -> Vec<ProbeResult> {
        let prober = self.clone();
        gather(targets, move |unit, endpoint| {
            let prober = prober.clone();
            async move { prober.probe(&unit, &endpoint).await }
        })
        .await
    }

    async fn get(&self, url: &str) -> Result<Response, HealthState> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| HealthState::Unreachable(e.to_string()))
    }

    async fn classify(&self, endpoint: &EndpointSpec) -> HealthState {
        let base = endpoint.url.trim_end_matches('/');

        match &endpoint.probe {
            ProbeKind::Http { expected_status } => {
                let response = match self.get(&endpoint.url).await {
                    Ok(response) => response,
                    Err(state) => return state,
                };
                let code = response.status();
                match expected_status {
                    Some(expected) if code.as_u16() != *expected => {
                        HealthState::Degraded(format!("expected HTTP {}, got {}", expected, code))
                    }
                    Some(_) => HealthState::Healthy,
                    None if code.is_success() => HealthState::Healthy,
                    None => HealthState::Degraded(format!("HTTP {}", code)),
                }
            }
            ProbeKind::PrometheusTarget { job } => {
                let response = match self.get(&format!("{}/api/v1/targets", base)).await {
                    Ok(response) => response,
                    Err(state) => return state,
                };
                if !response.status().is_success() {
                    return HealthState::Degraded(format!("targets API returned {}", response.status()));
                }
                let targets: PrometheusTargets = match response.json().await {
                    Ok(targets) => targets,
                    Err(e) => return HealthState::Degraded(format!("unexpected targets payload: {}", e)),
                };
                classify_prometheus_job(&targets, job)
            }
            ProbeKind::LokiReady => {
                let response = match self.get(&format!("{}/ready", base)).await {
                    Ok(response) => response,
                    Err(state) => return state,
                };
                let code = response.status();
                if code.is_success() {
                    HealthState::Healthy
                } else {
                    let body = response.text().await.unwrap_or_default();
                    HealthState::Degraded(format!("HTTP {}: {}", code, body.trim()))
                }
            }
            ProbeKind::JaegerService { service } => {
                let response = match self.get(&format!("{}/api/services", base)).await {
                    Ok(response) => response,
                    Err(state) => return state,
                };
                if !response.status().is_success() {
                    return HealthState::Degraded(format!("services API returned {}", response.status()));
                }
                match response.json::<JaegerServices>().await {
                    Ok(services) if services.data.as_deref().unwrap_or(&[]).iter().any(|s| s == service) => {
                        HealthState::Healthy
                    }
                    Ok(_) => HealthState::Degraded(format!("service {} has not reported any traces", service)),
                    Err(e) => HealthState::Degraded(format!("unexpected services payload: {}", e)),
                }
            }
        }
    }
}

async fn gather<F, Fut>(targets: Vec<(String, EndpointSpec)>, probe: F) -> Vec<ProbeResult>
where
    F: Fn(String, EndpointSpec) -> Fut,
    Fut: Future<Output = ProbeResult> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, (unit, endpoint)) in targets.iter().cloned().enumerate() {
        let probing = probe(unit, endpoint);
        tasks.spawn(async move { (index, probing.await) });
    }

    let mut slots: Vec<Option<ProbeResult>> = vec![None; targets.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!("Probe task failed: {}", e),
        }
    }

    // 異常結束的 task 視為 Unreachable，required endpoint 仍會讓 run 失敗
    slots
        .into_iter()
        .zip(targets)
        .map(|(slot, (unit, endpoint))| {
            slot.unwrap_or_else(|| ProbeResult {
                kind: endpoint.probe.label().to_string(),
                url: endpoint.url.clone(),
                required: endpoint.required,
                health: HealthState::Unreachable("probe task aborted".to_string()),
                latency_ms: 0,
                endpoint: endpoint.name,
                unit,
            })
        })
        .collect()
}

fn classify_prometheus_job(targets: &PrometheusTargets, job: &str) -> HealthState {
    let matching: Vec<&PrometheusTarget> = targets
        .data
        .active_targets
        .iter()
        .filter(|t| t.labels.get("job").map(String::as_str) == Some(job))
        .collect();

    if matching.is_empty() {
        return HealthState::Degraded(format!("job {} not present in service discovery", job));
    }

    let down: Vec<&PrometheusTarget> = matching.iter().copied().filter(|t| t.health != "up").collect();
    if down.is_empty() {
        HealthState::Healthy
    } else {
        HealthState::Degraded(format!(
            "{} of {} targets for job {} down: {}",
            down.len(),
            matching.len(),
            job,
            down[0].last_error
        ))
    }
}
