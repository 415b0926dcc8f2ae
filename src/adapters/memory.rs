use crate::domain::model::{ApplyOutcome, Manifest, WorkloadStatus};
use crate::domain::ports::ClusterApi;
use crate::utils::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct ClusterState {
    manifests: BTreeMap<(String, String), String>,
    workloads: HashMap<(String, String), WorkloadStatus>,
    rejections: HashMap<String, String>,
    transient_failures: u32,
    apply_calls: usize,
    status_queries: usize,
    applies_in_flight: usize,
    max_applies_in_flight: usize,
}

/// In-process cluster. Backs `--dry-run` (with `auto_ready`) and the tests.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    auto_ready: bool,
    apply_latency: Option<Duration>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有查詢的 workload 都回報就緒
    pub fn auto_ready() -> Self {
        Self {
            auto_ready: true,
            ..Self::default()
        }
    }

    /// Every apply takes `latency` before it is recorded.
    pub fn with_apply_latency(mut self, latency: Duration) -> Self {
        self.apply_latency = Some(latency);
        self
    }

    pub async fn set_workload(&self, namespace: &str, status: WorkloadStatus) {
        let mut state = self.state.lock().await;
        state
            .workloads
            .insert((namespace.to_string(), status.name.clone()), status);
    }

    pub async fn set_replicas(&self, namespace: &str, name: &str, desired: u32, available: u32) {
        self.set_workload(
            namespace,
            WorkloadStatus {
                name: name.to_string(),
                desired_replicas: desired,
                available_replicas: available,
                phase: None,
            },
        )
        .await;
    }

    /// Rejects every apply of `source` with `message`.
    pub async fn reject_manifest(&self, source: &str, message: &str) {
        let mut state = self.state.lock().await;
        state
            .rejections
            .insert(source.to_string(), message.to_string());
    }

    /// The next `count` applies fail with a transient error.
    pub async fn fail_next_applies(&self, count: u32) {
        self.state.lock().await.transient_failures = count;
    }

    pub async fn apply_calls(&self) -> usize {
        self.state.lock().await.apply_calls
    }

    /// Highest number of `apply_manifest` calls seen running at once.
    pub async fn max_applies_in_flight(&self) -> usize {
        self.state.lock().await.max_applies_in_flight
    }

    pub async fn status_queries(&self) -> usize {
        self.state.lock().await.status_queries
    }

    /// Applied manifests keyed by (namespace, source).
    pub async fn applied(&self) -> BTreeMap<(String, String), String> {
        self.state.lock().await.manifests.clone()
    }

    fn ready_status(name: &str) -> WorkloadStatus {
        WorkloadStatus {
            name: name.to_string(),
            desired_replicas: 1,
            available_replicas: 1,
            phase: Some("Running".to_string()),
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn apply_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<ApplyOutcome> {
        if let Some(latency) = self.apply_latency {
            {
                let mut state = self.state.lock().await;
                state.applies_in_flight += 1;
                state.max_applies_in_flight = state.max_applies_in_flight.max(state.applies_in_flight);
            }
            tokio::time::sleep(latency).await;
            self.state.lock().await.applies_in_flight -= 1;
        }

        let mut state = self.state.lock().await;
        state.apply_calls += 1;
        state.max_applies_in_flight = state.max_applies_in_flight.max(1);

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(OrchestratorError::TransientApplyError {
                manifest: manifest.source.clone(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        if let Some(message) = state.rejections.get(&manifest.source) {
            return Err(OrchestratorError::ApplyRejected {
                manifest: manifest.source.clone(),
                message: message.clone(),
            });
        }

        let key = (namespace.to_string(), manifest.source.clone());
        let outcome = match state.manifests.get(&key) {
            None => ApplyOutcome::Created,
            Some(body) if *body == manifest.body => ApplyOutcome::Unchanged,
            Some(_) => ApplyOutcome::Updated,
        };
        state.manifests.insert(key, manifest.body.clone());
        Ok(outcome)
    }

    async fn resource_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        let mut state = self.state.lock().await;
        state.status_queries += 1;

        let known = state
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned();
        if known.is_none() && self.auto_ready {
            return Ok(Some(Self::ready_status(name)));
        }
        Ok(known)
    }

    async fn list_resources(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadStatus>> {
        let mut state = self.state.lock().await;
        state.status_queries += 1;

        // label 以 workload 名稱模擬：`app=vote` 對應名稱為 vote 的 workload
        let wanted = selector.split('=').nth(1).unwrap_or(selector);
        let mut matches: Vec<WorkloadStatus> = state
            .workloads
            .iter()
            .filter(|((ns, name), _)| ns == namespace && name == wanted)
            .map(|(_, status)| status.clone())
            .collect();

        if matches.is_empty() && self.auto_ready {
            matches.push(Self::ready_status(wanted));
        }
        Ok(matches)
    }
}
