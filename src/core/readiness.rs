use crate::core::cancel::CancelSignal;
use crate::domain::model::{DeployableUnit, ReadinessCheck, WorkloadStatus};
use crate::domain::ports::ClusterApi;
use crate::utils::error::{OrchestratorError, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// 等待上限；更長的 timeout 一律截斷
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub ready: bool,
    pub status: String,
}

impl Observation {
    fn ready(status: impl Into<String>) -> Self {
        Self {
            ready: true,
            status: status.into(),
        }
    }

    fn not_ready(status: impl Into<String>) -> Self {
        Self {
            ready: false,
            status: status.into(),
        }
    }
}

fn replicas_satisfied(status: &WorkloadStatus, expected: Option<u32>) -> bool {
    match expected {
        Some(expected) => status.available_replicas >= expected,
        None => status.desired_replicas > 0 && status.available_replicas >= status.desired_replicas,
    }
}

/// Blocks until a unit's readiness predicate holds.
pub struct ReadinessGate {
    cluster: Arc<dyn ClusterApi>,
    http: Client,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(cluster: Arc<dyn ClusterApi>, poll_interval: Duration) -> Self {
        Self {
            cluster,
            http: Client::new(),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 單次檢查，不會回傳錯誤：查詢失敗視為尚未就緒
    pub async fn observe(&self, unit: &DeployableUnit) -> Observation {
        match &unit.readiness {
            ReadinessCheck::None => Observation::ready("no readiness check"),
            ReadinessCheck::Replicas { workload, replicas } => {
                match self.cluster.resource_status(&unit.namespace, workload).await {
                    Ok(Some(status)) => Observation {
                        ready: replicas_satisfied(&status, *replicas),
                        status: status.to_string(),
                    },
                    Ok(None) => Observation::not_ready(format!("workload {} not found", workload)),
                    Err(e) => Observation::not_ready(format!("status query failed: {}", e)),
                }
            }
            ReadinessCheck::LabelSelector { selector, replicas } => {
                match self.cluster.list_resources(&unit.namespace, selector).await {
                    Ok(items) => {
                        let wanted = replicas.unwrap_or(1) as usize;
                        let all_ready = items.iter().all(|s| replicas_satisfied(s, None));
                        let summary = items
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        Observation {
                            ready: !items.is_empty() && items.len() >= wanted && all_ready,
                            status: format!("{} workload(s) for {}: [{}]", items.len(), selector, summary),
                        }
                    }
                    Err(e) => Observation::not_ready(format!("list query failed: {}", e)),
                }
            }
            ReadinessCheck::Http {
                url,
                expected_status,
            } => {
                let timeout = self.poll_interval.max(Duration::from_secs(1));
                match self.http.get(url).timeout(timeout).send().await {
                    Ok(response) => {
                        let code = response.status().as_u16();
                        Observation {
                            ready: code == *expected_status,
                            status: format!("GET {} -> {}", url, code),
                        }
                    }
                    Err(e) => Observation::not_ready(format!("GET {} failed: {}", url, e)),
                }
            }
        }
    }

    /// Polls until ready, `timeout` elapses, or the run is cancelled. The
    /// first check happens immediately.
    pub async fn wait_ready(
        &self,
        unit: &DeployableUnit,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Duration> {
        let start = Instant::now();
        let deadline = start + timeout.min(MAX_WAIT);

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let observation = self.observe(unit).await;
            if observation.ready {
                let elapsed = start.elapsed();
                tracing::debug!("✅ {} ready after {:?} ({})", unit.id, elapsed, observation.status);
                return Ok(elapsed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(OrchestratorError::ReadinessTimeout {
                    unit: unit.id.clone(),
                    waited: now.duration_since(start),
                    last_status: observation.status,
                });
            }

            tracing::debug!("⏳ {} not ready: {}", unit.id, observation.status);
            cancel
                .sleep(self.poll_interval.min(deadline.duration_since(now)))
                .await?;
        }
    }
}
