use crate::domain::model::{
    ApplyOutcome, DeploymentRun, LoadTestSpec, Manifest, SwarmStats, WorkerInfo, WorkloadStatus,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Any conformant orchestration API able to apply manifests and report
/// workload status.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn apply_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<ApplyOutcome>;

    /// `Ok(None)` when the workload does not exist (yet).
    async fn resource_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>>;

    async fn list_resources(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadStatus>>;
}

#[async_trait]
impl<T: ClusterApi + ?Sized> ClusterApi for Arc<T> {
    async fn apply_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<ApplyOutcome> {
        (**self).apply_manifest(namespace, manifest).await
    }

    async fn resource_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        (**self).resource_status(namespace, name).await
    }

    async fn list_resources(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadStatus>> {
        (**self).list_resources(namespace, selector).await
    }
}

/// Coordinator side of a coordinator/worker load generator.
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    async fn connected_workers(&self) -> Result<Vec<WorkerInfo>>;
    async fn start_swarm(&self, spec: &LoadTestSpec) -> Result<()>;
    async fn stats(&self) -> Result<SwarmStats>;
    async fn stop_swarm(&self) -> Result<()>;
}

pub trait RunStore: Send + Sync {
    fn append(&self, run: &DeploymentRun) -> impl std::future::Future<Output = Result<()>> + Send;

    /// 最新的快照；`run_id` 為 None 時回傳最後一次執行
    fn latest(
        &self,
        run_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<DeploymentRun>> + Send;
}
