// Application wiring: graph file + run options -> configured orchestrator

use crate::adapters::{HttpClusterApi, InMemoryCluster, LocustClient};
use crate::config::GraphConfig;
use crate::core::applier::ResourceApplier;
use crate::core::cancel::CancelSignal;
use crate::core::engine::{Orchestrator, RunPlan};
use crate::core::load_test::{LoadTestCoordinator, DEFAULT_WORKER_POLL};
use crate::core::prober::HealthProber;
use crate::core::rate_limiter::RateLimitedCluster;
use crate::core::readiness::ReadinessGate;
use crate::domain::model::DeploymentRun;
use crate::domain::ports::{ClusterApi, RunStore};
use crate::utils::error::{OrchestratorError, Result};
use crate::utils::monitor::SystemMonitor;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub dry_run: bool,
    pub skip_load_test: bool,
    pub parallelism: Option<usize>,
    pub monitor: bool,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            dry_run: false,
            skip_load_test: false,
            parallelism: None,
            monitor: false,
        }
    }
}

/// The rate-limited gateway client, or an in-memory cluster for `--dry-run`.
pub fn connect_cluster(config: &GraphConfig, dry_run: bool) -> Result<Arc<dyn ClusterApi>> {
    if dry_run {
        tracing::info!("🧪 Dry run: using an in-memory cluster");
        return Ok(Arc::new(InMemoryCluster::auto_ready()));
    }

    let url = config.cluster_url().ok_or_else(|| OrchestratorError::MissingConfig {
        field: "cluster.api_url".to_string(),
    })?;
    let api = HttpClusterApi::new(url, config.request_timeout()?)?.with_token(config.cluster_token());
    Ok(Arc::new(RateLimitedCluster::new(api, config.rate_limit())))
}

pub fn build_orchestrator(
    config: &GraphConfig,
    cluster: Arc<dyn ClusterApi>,
    options: &RunOptions,
) -> Result<Orchestrator> {
    let mut settings = config.engine_settings()?;
    if options.parallelism.is_some() {
        settings.parallelism = options.parallelism;
    }
    settings.skip_load_test = options.skip_load_test || options.dry_run;

    let applier = ResourceApplier::new(cluster.clone(), config.backoff()?);
    let gate = ReadinessGate::new(cluster, config.poll_interval()?);
    let prober = HealthProber::new(config.probe_timeout()?);

    let mut orchestrator =
        Orchestrator::new(applier, gate, prober, settings).with_monitor(SystemMonitor::new(options.monitor));

    if let Some(url) = config.locust_url().filter(|_| !options.dry_run) {
        let locust = LocustClient::new(url, config.request_timeout()?)?;
        orchestrator = orchestrator.with_load_test(LoadTestCoordinator::new(Arc::new(locust), DEFAULT_WORKER_POLL));
    }

    Ok(orchestrator)
}

pub fn build_plan(config: &GraphConfig, options: &RunOptions) -> Result<RunPlan> {
    let mut plan = config.run_plan(options.timeout)?;
    if options.dry_run {
        // 模擬叢集時沒有可探測的後端
        for unit in &mut plan.units {
            unit.observability = None;
        }
        plan.load_test = None;
    }
    Ok(plan)
}

/// Runs the graph end to end, recording start and end snapshots in `store`.
pub async fn run_graph<S: RunStore>(
    config: &GraphConfig,
    options: &RunOptions,
    cancel: &CancelSignal,
    store: &S,
) -> Result<DeploymentRun> {
    let cluster = connect_cluster(config, options.dry_run)?;
    let orchestrator = build_orchestrator(config, cluster, options)?;
    let plan = build_plan(config, options)?;

    orchestrator.run_recorded(plan, cancel, store).await
}
