use crate::utils::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// 來源路徑（僅用於辨識與錯誤訊息）
    pub source: String,
    pub body: String,
}

fn default_http_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// available == desired, or available >= `replicas` when given
    Replicas {
        workload: String,
        #[serde(default)]
        replicas: Option<u32>,
    },
    LabelSelector {
        selector: String,
        #[serde(default)]
        replicas: Option<u32>,
    },
    Http {
        url: String,
        #[serde(default = "default_http_status")]
        expected_status: u16,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeKind {
    Http {
        #[serde(default)]
        expected_status: Option<u16>,
    },
    PrometheusTarget {
        job: String,
    },
    LokiReady,
    JaegerService {
        service: String,
    },
}

impl ProbeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::Http { .. } => "http",
            ProbeKind::PrometheusTarget { .. } => "prometheus_target",
            ProbeKind::LokiReady => "loki_ready",
            ProbeKind::JaegerService { .. } => "jaeger_service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub url: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(flatten)]
    pub probe: ProbeKind,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct DeployableUnit {
    pub id: String,
    pub namespace: String,
    pub manifests: Vec<Manifest>,
    pub dependencies: BTreeSet<String>,
    pub readiness: ReadinessCheck,
    pub readiness_timeout: Option<Duration>,
    pub observability: Option<EndpointSpec>,
}

impl DeployableUnit {
    pub fn new(id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            manifests: Vec::new(),
            dependencies: BTreeSet::new(),
            readiness: ReadinessCheck::None,
            readiness_timeout: None,
            observability: None,
        }
    }

    pub fn with_manifest(mut self, source: impl Into<String>, body: impl Into<String>) -> Self {
        self.manifests.push(Manifest {
            source: source.into(),
            body: body.into(),
        });
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessCheck) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    pub fn with_observability(mut self, endpoint: EndpointSpec) -> Self {
        self.observability = Some(endpoint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub name: String,
    #[serde(default)]
    pub desired_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub phase: Option<String>,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} available",
            self.name, self.available_replicas, self.desired_replicas
        )?;
        if let Some(phase) = &self.phase {
            write!(f, " ({})", phase)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    /// 多個 manifest 的結果合併：任何變更優先於 unchanged
    pub fn merge(self, other: ApplyOutcome) -> ApplyOutcome {
        use ApplyOutcome::*;
        match (self, other) {
            (Created, _) | (_, Created) => Created,
            (Updated, _) | (_, Updated) => Updated,
            _ => Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Applying,
    WaitingReady,
    Ready,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, UnitStatus::Ready | UnitStatus::Failed | UnitStatus::Skipped)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnitStatus::Pending => "Pending",
            UnitStatus::Applying => "Applying",
            UnitStatus::WaitingReady => "WaitingReady",
            UnitStatus::Ready => "Ready",
            UnitStatus::Failed => "Failed",
            UnitStatus::Skipped => "Skipped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded(String),
    Unreachable(String),
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => f.write_str("Healthy"),
            HealthState::Degraded(reason) => write!(f, "Degraded ({})", reason),
            HealthState::Unreachable(reason) => write!(f, "Unreachable ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub unit: String,
    pub endpoint: String,
    pub kind: String,
    pub url: String,
    pub required: bool,
    pub health: HealthState,
    pub latency_ms: u64,
}

impl ProbeResult {
    pub fn to_error(&self) -> Option<OrchestratorError> {
        match &self.health {
            HealthState::Healthy => None,
            HealthState::Degraded(reason) => Some(OrchestratorError::EndpointDegraded {
                endpoint: self.endpoint.clone(),
                reason: reason.clone(),
            }),
            HealthState::Unreachable(reason) => Some(OrchestratorError::EndpointUnreachable {
                endpoint: self.endpoint.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadThresholds {
    pub max_error_rate: f64,
    pub max_p95_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestSpec {
    pub target_url: String,
    pub users: u32,
    pub spawn_rate: f64,
    pub duration: Duration,
    pub connect_timeout: Duration,
    pub thresholds: LoadThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub state: String,
    pub user_count: u32,
}

/// Aggregated counters as reported by the load-generation coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmStats {
    pub total_requests: u64,
    pub total_failures: u64,
    pub rps: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub workers: Vec<WorkerInfo>,
}

/// Immutable once built; only accessors are exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestResult {
    target_url: String,
    total_requests: u64,
    total_failures: u64,
    rps: f64,
    error_rate: f64,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    worker_users: BTreeMap<String, u32>,
    finished_at: DateTime<Utc>,
}

impl LoadTestResult {
    pub fn from_stats(target_url: &str, stats: &SwarmStats) -> Self {
        let error_rate = if stats.total_requests == 0 {
            0.0
        } else {
            stats.total_failures as f64 / stats.total_requests as f64
        };

        Self {
            target_url: target_url.to_string(),
            total_requests: stats.total_requests,
            total_failures: stats.total_failures,
            rps: stats.rps,
            error_rate,
            p50_ms: stats.p50_ms,
            p95_ms: stats.p95_ms,
            p99_ms: stats.p99_ms,
            worker_users: stats
                .workers
                .iter()
                .map(|w| (w.id.clone(), w.user_count))
                .collect(),
            finished_at: Utc::now(),
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn rps(&self) -> f64 {
        self.rps
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn p50_ms(&self) -> f64 {
        self.p50_ms
    }

    pub fn p95_ms(&self) -> f64 {
        self.p95_ms
    }

    pub fn p99_ms(&self) -> f64 {
        self.p99_ms
    }

    pub fn worker_users(&self) -> &BTreeMap<String, u32> {
        &self.worker_users
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// 與門檻比較，回傳所有違規描述
    pub fn violations(&self, thresholds: &LoadThresholds) -> Vec<String> {
        let mut violations = Vec::new();
        if self.total_requests == 0 {
            violations.push("no requests were generated".to_string());
        }
        if self.error_rate > thresholds.max_error_rate {
            violations.push(format!(
                "error rate {:.2}% exceeds {:.2}%",
                self.error_rate * 100.0,
                thresholds.max_error_rate * 100.0
            ));
        }
        if self.p95_ms > thresholds.max_p95_ms {
            violations.push(format!(
                "p95 latency {:.0}ms exceeds {:.0}ms",
                self.p95_ms, thresholds.max_p95_ms
            ));
        }
        violations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Deploying,
    Probing,
    LoadTesting,
    Succeeded,
    Degraded,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Degraded | RunState::Failed | RunState::Aborted
        )
    }

    /// CLI 結束代碼
    pub fn exit_code(&self) -> i32 {
        match self {
            RunState::Succeeded => 0,
            RunState::Degraded => 2,
            RunState::Aborted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Planning => "Planning",
            RunState::Deploying => "Deploying",
            RunState::Probing => "Probing",
            RunState::LoadTesting => "LoadTesting",
            RunState::Succeeded => "Succeeded",
            RunState::Degraded => "Degraded",
            RunState::Failed => "Failed",
            RunState::Aborted => "Aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub stage: RunState,
    pub unit: Option<String>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: String,
    pub status: UnitStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub apply_outcome: Option<ApplyOutcome>,
    pub ready_after_ms: Option<u64>,
    pub note: Option<String>,
}

impl UnitRecord {
    fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: UnitStatus::Pending,
            started_at: None,
            finished_at: None,
            attempts: 0,
            apply_outcome: None,
            ready_after_ms: None,
            note: None,
        }
    }

    pub fn set_status(&mut self, status: UnitStatus) {
        if status == UnitStatus::Applying && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if status.is_settled() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
    }
}

/// One orchestration attempt. Once the run reaches a terminal state every
/// mutator becomes a no-op and `transition` is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    id: String,
    graph: String,
    state: RunState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    order: Vec<String>,
    units: Vec<UnitRecord>,
    probes: Vec<ProbeResult>,
    load_test: Option<LoadTestResult>,
    errors: Vec<RunError>,
    degraded_reasons: Vec<String>,
    history: Vec<StateTransition>,
}

impl DeploymentRun {
    pub fn new(id: impl Into<String>, graph: impl Into<String>) -> Self {
        let started_at = Utc::now();
        Self {
            id: id.into(),
            graph: graph.into(),
            state: RunState::Planning,
            started_at,
            finished_at: None,
            order: Vec::new(),
            units: Vec::new(),
            probes: Vec::new(),
            load_test: None,
            errors: Vec::new(),
            degraded_reasons: Vec::new(),
            history: vec![StateTransition {
                state: RunState::Planning,
                at: started_at,
            }],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn units(&self) -> &[UnitRecord] {
        &self.units
    }

    pub fn unit(&self, id: &str) -> Option<&UnitRecord> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn probes(&self) -> &[ProbeResult] {
        &self.probes
    }

    pub fn load_test(&self) -> Option<&LoadTestResult> {
        self.load_test.as_ref()
    }

    pub fn errors(&self) -> &[RunError] {
        &self.errors
    }

    pub fn degraded_reasons(&self) -> &[String] {
        &self.degraded_reasons
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_reasons.is_empty()
    }

    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(OrchestratorError::TerminalState {
                state: self.state.to_string(),
            });
        }

        let at = Utc::now();
        self.state = next;
        self.history.push(StateTransition { state: next, at });
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        if self.state.is_terminal() {
            tracing::warn!("Ignoring update to finished run {}", self.id);
            return false;
        }
        true
    }

    pub(crate) fn set_order(&mut self, order: Vec<String>) {
        if !self.is_open() {
            return;
        }
        self.units = order.iter().map(|id| UnitRecord::pending(id)).collect();
        self.order = order;
    }

    pub(crate) fn update_unit<F: FnOnce(&mut UnitRecord)>(&mut self, id: &str, update: F) {
        if !self.is_open() {
            return;
        }
        if let Some(record) = self.units.iter_mut().find(|u| u.id == id) {
            update(record);
        }
    }

    pub(crate) fn record_error(&mut self, stage: RunState, unit: Option<&str>, error: &OrchestratorError) {
        if !self.is_open() {
            return;
        }
        // 同一階段的錯誤依部署順序排列，與完成先後無關
        let position = |id: Option<&str>| id.and_then(|id| self.order.iter().position(|o| o == id));
        let at = match position(unit) {
            Some(p) => self
                .errors
                .iter()
                .position(|e| e.stage == stage && position(e.unit.as_deref()).is_some_and(|q| q > p))
                .unwrap_or(self.errors.len()),
            None => self.errors.len(),
        };
        self.errors.insert(
            at,
            RunError {
                stage,
                unit: unit.map(str::to_string),
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        );
    }

    pub(crate) fn add_probe(&mut self, probe: ProbeResult) {
        if self.is_open() {
            self.probes.push(probe);
        }
    }

    pub(crate) fn set_load_test(&mut self, result: LoadTestResult) {
        if self.is_open() {
            self.load_test = Some(result);
        }
    }

    pub(crate) fn mark_degraded(&mut self, reason: impl Into<String>) {
        if self.is_open() {
            self.degraded_reasons.push(reason.into());
        }
    }
}
