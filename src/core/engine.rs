use crate::core::applier::ResourceApplier;
use crate::core::cancel::CancelSignal;
use crate::core::graph::DependencyGraph;
use crate::core::load_test::LoadTestCoordinator;
use crate::core::prober::HealthProber;
use crate::core::readiness::{ReadinessGate, MAX_WAIT};
use crate::domain::model::{
    DeployableUnit, DeploymentRun, EndpointSpec, HealthState, LoadTestSpec, RunState, UnitStatus,
};
use crate::domain::ports::RunStore;
use crate::utils::error::{OrchestratorError, Result};
use crate::utils::monitor::SystemMonitor;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

pub const MAX_PARALLELISM: usize = 8;
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(300);

type Ledger = Arc<Mutex<DeploymentRun>>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 同時部署的 unit 數；None 時取獨立根節點數
    pub parallelism: Option<usize>,
    pub unit_timeout: Duration,
    pub skip_load_test: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallelism: None,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            skip_load_test: false,
        }
    }
}

/// Everything one `run` needs: the units to deploy, the optional load test
/// and the overall deadline for the Deploying stage.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub units: Vec<DeployableUnit>,
    pub load_test: Option<LoadTestSpec>,
    pub timeout: Duration,
}

enum StageOutcome {
    Completed,
    Failed,
    Aborted,
}

pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub struct Orchestrator {
    applier: Arc<ResourceApplier>,
    gate: Arc<ReadinessGate>,
    prober: HealthProber,
    load_test: Option<LoadTestCoordinator>,
    settings: EngineSettings,
    monitor: SystemMonitor,
}

impl Orchestrator {
    pub fn new(applier: ResourceApplier, gate: ReadinessGate, prober: HealthProber, settings: EngineSettings) -> Self {
        Self {
            applier: Arc::new(applier),
            gate: Arc::new(gate),
            prober,
            load_test: None,
            settings,
            monitor: SystemMonitor::default(),
        }
    }

    pub fn with_load_test(mut self, coordinator: LoadTestCoordinator) -> Self {
        self.load_test = Some(coordinator);
        self
    }

    pub fn with_monitor(mut self, monitor: SystemMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn run(&self, plan: RunPlan, cancel: &CancelSignal) -> DeploymentRun {
        let run = DeploymentRun::new(new_run_id(), plan.name.clone());
        self.execute(run, plan, cancel).await
    }

    /// Same as `run`, appending a snapshot to `store` when the run starts and
    /// once it has finished. Only the first append can fail the call; a failed
    /// final append is logged and the finished run is still returned.
    pub async fn run_recorded<S: RunStore>(
        &self,
        plan: RunPlan,
        cancel: &CancelSignal,
        store: &S,
    ) -> Result<DeploymentRun> {
        let run = DeploymentRun::new(new_run_id(), plan.name.clone());
        store.append(&run).await?;

        let run = self.execute(run, plan, cancel).await;
        if let Err(e) = store.append(&run).await {
            tracing::error!("❌ Could not record final state of run {} ({}): {}", run.id(), run.state(), e);
        }
        Ok(run)
    }

    async fn execute(&self, mut run: DeploymentRun, plan: RunPlan, cancel: &CancelSignal) -> DeploymentRun {
        tracing::info!("🚀 Run {} started for graph '{}'", run.id(), plan.name);
        self.monitor.log_stage("Planning");

        // Planning
        let (graph, order) = match DependencyGraph::build(plan.units)
            .and_then(|graph| graph.topological_order().map(|order| (graph, order)))
        {
            Ok(planned) => planned,
            Err(e) => {
                tracing::error!("❌ Planning failed: {}", e);
                run.record_error(RunState::Planning, None, &e);
                finish(&mut run, RunState::Failed);
                return run;
            }
        };
        tracing::info!("🧭 Deployment order: {}", order.join(" → "));
        run.set_order(order.clone());

        if cancel.is_cancelled() {
            abort(&mut run);
            return run;
        }

        // Deploying
        advance(&mut run, RunState::Deploying);
        self.monitor.log_stage("Deploying");
        let deadline = Instant::now() + plan.timeout.min(MAX_WAIT);
        let ledger: Ledger = Arc::new(Mutex::new(run));
        let deployed = self.deploy(&graph, &order, &ledger, deadline, cancel).await;
        let mut run = match Arc::try_unwrap(ledger) {
            Ok(ledger) => ledger.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        match deployed {
            StageOutcome::Completed => {}
            StageOutcome::Failed => {
                finish(&mut run, RunState::Failed);
                return run;
            }
            StageOutcome::Aborted => {
                abort(&mut run);
                return run;
            }
        }

        // Probing
        advance(&mut run, RunState::Probing);
        self.monitor.log_stage("Probing");
        match self.probe(&graph, &order, &mut run, cancel).await {
            StageOutcome::Completed => {}
            StageOutcome::Failed => {
                finish(&mut run, RunState::Failed);
                return run;
            }
            StageOutcome::Aborted => {
                abort(&mut run);
                return run;
            }
        }

        // LoadTesting
        match (&plan.load_test, &self.load_test) {
            (Some(_), _) if self.settings.skip_load_test => {
                tracing::info!("⏭️ Load test skipped");
            }
            (Some(spec), Some(coordinator)) => {
                advance(&mut run, RunState::LoadTesting);
                self.monitor.log_stage("LoadTesting");
                match coordinator.run_load_test(spec, cancel).await {
                    Ok(result) => {
                        for violation in result.violations(&spec.thresholds) {
                            tracing::warn!("⚠️ Load test threshold violated: {}", violation);
                            run.mark_degraded(format!("load test: {}", violation));
                        }
                        run.set_load_test(result);
                    }
                    Err(OrchestratorError::Cancelled) => {
                        abort(&mut run);
                        return run;
                    }
                    Err(e) => {
                        tracing::error!("❌ Load test failed: {}", e);
                        run.record_error(RunState::LoadTesting, None, &e);
                        finish(&mut run, RunState::Failed);
                        return run;
                    }
                }
            }
            (Some(_), None) => {
                tracing::warn!("Load test configured but no load generator available, skipping");
            }
            (None, _) => {}
        }

        let terminal = if run.is_degraded() {
            RunState::Degraded
        } else {
            RunState::Succeeded
        };
        finish(&mut run, terminal);
        run
    }

    async fn deploy(
        &self,
        graph: &DependencyGraph,
        order: &[String],
        ledger: &Ledger,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> StageOutcome {
        let parallelism = self
            .settings
            .parallelism
            .unwrap_or_else(|| graph.roots().len())
            .clamp(1, MAX_PARALLELISM);
        tracing::debug!("Deploying {} units with parallelism {}", order.len(), parallelism);

        let mut pending: Vec<&DeployableUnit> = order.iter().filter_map(|id| graph.unit(id)).collect();
        let mut ready: HashSet<String> = HashSet::new();
        // 失敗或被略過的 unit；其下游全部略過
        let mut blocked: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<(String, bool)> = JoinSet::new();
        let mut any_failed = false;

        loop {
            let mut index = 0;
            while index < pending.len() && !cancel.is_cancelled() {
                let unit = pending[index];

                if let Some(failed_dep) = unit.dependencies.iter().find(|d| blocked.contains(*d)) {
                    tracing::warn!("⏭️ Skipping {}: dependency {} did not become ready", unit.id, failed_dep);
                    let note = format!("dependency {} did not become ready", failed_dep);
                    ledger.lock().await.update_unit(&unit.id, |record| {
                        record.set_status(UnitStatus::Skipped);
                        record.note = Some(note);
                    });
                    blocked.insert(unit.id.clone());
                    pending.remove(index);
                    continue;
                }

                let deps_ready = unit.dependencies.iter().all(|d| ready.contains(d));
                if !deps_ready || tasks.len() >= parallelism {
                    index += 1;
                    continue;
                }

                pending.remove(index);
                let now = Instant::now();
                if now >= deadline {
                    let error = OrchestratorError::ReadinessTimeout {
                        unit: unit.id.clone(),
                        waited: Duration::ZERO,
                        last_status: "run timeout reached before apply".to_string(),
                    };
                    tracing::error!("❌ {}", error);
                    let mut run = ledger.lock().await;
                    run.update_unit(&unit.id, |record| {
                        record.set_status(UnitStatus::Failed);
                        record.note = Some(error.to_string());
                    });
                    run.record_error(RunState::Deploying, Some(&unit.id), &error);
                    blocked.insert(unit.id.clone());
                    any_failed = true;
                    continue;
                }

                let readiness_timeout = unit
                    .readiness_timeout
                    .unwrap_or(self.settings.unit_timeout)
                    .min(deadline - now);
                let task = UnitTask {
                    applier: self.applier.clone(),
                    gate: self.gate.clone(),
                    ledger: ledger.clone(),
                    unit: unit.clone(),
                    readiness_timeout,
                    cancel: cancel.clone(),
                };
                let id = unit.id.clone();
                tasks.spawn(async move {
                    match tokio::time::timeout_at(deadline, task.deploy()).await {
                        Ok(ok) => (id, ok),
                        Err(_) => {
                            task.timed_out(now.elapsed()).await;
                            (id, false)
                        }
                    }
                });
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("🛑 Cancellation requested, waiting for {} in-flight unit(s)", tasks.len());
                    while tasks.join_next().await.is_some() {}
                    return StageOutcome::Aborted;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((unit_id, true))) => {
                        ready.insert(unit_id);
                    }
                    Some(Ok((unit_id, false))) => {
                        blocked.insert(unit_id);
                        any_failed = true;
                    }
                    Some(Err(join_error)) => {
                        let error = OrchestratorError::Cluster(format!("deploy task aborted: {}", join_error));
                        tracing::error!("❌ {}", error);
                        ledger.lock().await.record_error(RunState::Deploying, None, &error);
                        any_failed = true;
                    }
                    None => break,
                },
            }
        }

        if !cancel.is_cancelled() {
            // 只有 task 異常結束時才會殘留
            for unit in pending {
                ledger.lock().await.update_unit(&unit.id, |record| {
                    record.set_status(UnitStatus::Skipped);
                    record.note = Some("upstream deploy task aborted".to_string());
                });
            }
        }

        if cancel.is_cancelled() {
            StageOutcome::Aborted
        } else if any_failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Completed
        }
    }

    async fn probe(
        &self,
        graph: &DependencyGraph,
        order: &[String],
        run: &mut DeploymentRun,
        cancel: &CancelSignal,
    ) -> StageOutcome {
        let targets: Vec<(String, EndpointSpec)> = order
            .iter()
            .filter(|id| run.unit(id).map(|u| u.status) == Some(UnitStatus::Ready))
            .filter_map(|id| graph.unit(id))
            .filter_map(|unit| {
                unit.observability
                    .clone()
                    .map(|endpoint| (unit.id.clone(), endpoint))
            })
            .collect();

        if targets.is_empty() {
            tracing::info!("No observability endpoints to probe");
            return StageOutcome::Completed;
        }
        tracing::info!("🔍 Probing {} observability endpoint(s)", targets.len());

        let results = tokio::select! {
            results = self.prober.probe_all(targets) => results,
            _ = cancel.cancelled() => return StageOutcome::Aborted,
        };

        let mut failed = false;
        for result in results {
            if let Some(error) = result.to_error() {
                match result.health {
                    HealthState::Unreachable(_) if result.required => {
                        run.record_error(RunState::Probing, Some(&result.unit), &error);
                        failed = true;
                    }
                    _ => run.mark_degraded(error.to_string()),
                }
            }
            run.add_probe(result);
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Completed
        }
    }
}

/// Owned pieces a spawned deploy task needs.
struct UnitTask {
    applier: Arc<ResourceApplier>,
    gate: Arc<ReadinessGate>,
    ledger: Ledger,
    unit: DeployableUnit,
    readiness_timeout: Duration,
    cancel: CancelSignal,
}

impl UnitTask {
    /// Apply then wait for readiness. `true` when the unit ended Ready.
    async fn deploy(&self) -> bool {
        let id = self.unit.id.as_str();
        self.ledger
            .lock()
            .await
            .update_unit(id, |record| record.set_status(UnitStatus::Applying));
        tracing::info!("📦 Applying {} ({} manifest(s))", id, self.unit.manifests.len());

        let attempt = self.applier.apply_with_retry(&self.unit, &self.cancel).await;
        let outcome = match attempt.result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ledger
                    .lock()
                    .await
                    .update_unit(id, |record| record.attempts = attempt.attempts);
                self.fail(e).await;
                return false;
            }
        };
        self.ledger.lock().await.update_unit(id, |record| {
            record.attempts = attempt.attempts;
            record.apply_outcome = Some(outcome);
            record.set_status(UnitStatus::WaitingReady);
        });
        tracing::debug!("{} applied ({:?}), waiting up to {:?}", id, outcome, self.readiness_timeout);

        match self
            .gate
            .wait_ready(&self.unit, self.readiness_timeout, &self.cancel)
            .await
        {
            Ok(elapsed) => {
                tracing::info!("✅ {} ready after {:.1}s", id, elapsed.as_secs_f64());
                self.ledger.lock().await.update_unit(id, |record| {
                    record.ready_after_ms = Some(elapsed.as_millis() as u64);
                    record.set_status(UnitStatus::Ready);
                });
                true
            }
            Err(e) => {
                self.fail(e).await;
                false
            }
        }
    }

    async fn timed_out(&self, waited: Duration) {
        self.fail(OrchestratorError::ReadinessTimeout {
            unit: self.unit.id.clone(),
            waited,
            last_status: "run timeout reached".to_string(),
        })
        .await;
    }

    async fn fail(&self, error: OrchestratorError) {
        let id = self.unit.id.as_str();
        let mut run = self.ledger.lock().await;

        if matches!(error, OrchestratorError::Cancelled) {
            // 保留中斷前的狀態
            run.update_unit(id, |record| record.note = Some("interrupted by abort".to_string()));
            return;
        }

        tracing::error!("❌ {} failed: {}", id, error);
        run.update_unit(id, |record| {
            record.set_status(UnitStatus::Failed);
            record.note = Some(error.to_string());
        });
        run.record_error(RunState::Deploying, Some(id), &error);
    }
}

fn advance(run: &mut DeploymentRun, next: RunState) {
    if let Err(e) = run.transition(next) {
        tracing::warn!("{}", e);
    } else {
        tracing::info!("➡️ Run {} entered {}", run.id(), next);
    }
}

fn finish(run: &mut DeploymentRun, terminal: RunState) {
    advance(run, terminal);
    let elapsed = run
        .finished_at()
        .map(|end| (end - run.started_at()).num_milliseconds() as f64 / 1000.0)
        .unwrap_or_default();
    match terminal {
        RunState::Succeeded => tracing::info!("🎉 Run {} succeeded in {:.1}s", run.id(), elapsed),
        RunState::Degraded => tracing::warn!(
            "⚠️ Run {} degraded after {:.1}s: {}",
            run.id(),
            elapsed,
            run.degraded_reasons().join("; ")
        ),
        _ => tracing::error!("Run {} ended {} after {:.1}s", run.id(), terminal, elapsed),
    }
}

fn abort(run: &mut DeploymentRun) {
    let stage = run.state();
    run.record_error(stage, None, &OrchestratorError::Cancelled);
    finish(run, RunState::Aborted);
}
