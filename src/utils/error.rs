use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unit '{0}' is already defined")]
    DuplicateUnit(String),

    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Manifest '{manifest}' rejected by cluster API: {message}")]
    ApplyRejected { manifest: String, message: String },

    #[error("Transient error applying '{manifest}': {message}")]
    TransientApplyError { manifest: String, message: String },

    #[error("Unit '{unit}' not ready after {waited:?} (last status: {last_status})")]
    ReadinessTimeout {
        unit: String,
        waited: Duration,
        last_status: String,
    },

    #[error("Endpoint '{endpoint}' unreachable: {reason}")]
    EndpointUnreachable { endpoint: String, reason: String },

    #[error("Endpoint '{endpoint}' degraded: {reason}")]
    EndpointDegraded { endpoint: String, reason: String },

    #[error("No load-test workers connected within {waited:?}{}", .detail.as_ref().map(|d| format!(" ({})", d)).unwrap_or_default())]
    NoWorkersConnected {
        waited: Duration,
        detail: Option<String>,
    },

    #[error("Load test against '{target}' attempted {attempted} requests with zero successful responses")]
    ZeroThroughput { target: String, attempted: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cluster API error: {0}")]
    Cluster(String),

    #[error("Load generator error: {0}")]
    LoadGenerator(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfig { field: String },

    #[error("Run '{0}' not found in history")]
    RunNotFound(String),

    #[error("Run is already in terminal state {state}")]
    TerminalState { state: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Graph,
    Apply,
    Readiness,
    Probe,
    LoadTest,
    Configuration,
    System,
    Cancellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl OrchestratorError {
    /// 報表中使用的穩定錯誤名稱
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateUnit(_) => "DuplicateUnit",
            Self::UnknownDependency { .. } => "UnknownDependency",
            Self::CycleDetected { .. } => "CycleDetected",
            Self::ApplyRejected { .. } => "ApplyRejected",
            Self::TransientApplyError { .. } => "TransientApplyError",
            Self::ReadinessTimeout { .. } => "ReadinessTimeout",
            Self::EndpointUnreachable { .. } => "Unreachable",
            Self::EndpointDegraded { .. } => "Degraded",
            Self::NoWorkersConnected { .. } => "NoWorkersConnected",
            Self::ZeroThroughput { .. } => "ZeroThroughput",
            Self::Cancelled => "Cancelled",
            Self::Cluster(_) => "ClusterError",
            Self::LoadGenerator(_) => "LoadGeneratorError",
            Self::HttpError(_) => "HttpError",
            Self::IoError(_) => "IoError",
            Self::SerializationError(_) => "SerializationError",
            Self::ConfigError { .. } => "ConfigError",
            Self::InvalidConfigValue { .. } => "InvalidConfigValue",
            Self::MissingConfig { .. } => "MissingConfig",
            Self::RunNotFound(_) => "RunNotFound",
            Self::TerminalState { .. } => "TerminalState",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateUnit(_) | Self::UnknownDependency { .. } | Self::CycleDetected { .. } => {
                ErrorCategory::Graph
            }
            Self::ApplyRejected { .. } | Self::TransientApplyError { .. } | Self::Cluster(_) => {
                ErrorCategory::Apply
            }
            Self::ReadinessTimeout { .. } => ErrorCategory::Readiness,
            Self::EndpointUnreachable { .. } | Self::EndpointDegraded { .. } => ErrorCategory::Probe,
            Self::NoWorkersConnected { .. } | Self::ZeroThroughput { .. } | Self::LoadGenerator(_) => {
                ErrorCategory::LoadTest
            }
            Self::ConfigError { .. }
            | Self::InvalidConfigValue { .. }
            | Self::MissingConfig { .. } => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::HttpError(_)
            | Self::IoError(_)
            | Self::SerializationError(_)
            | Self::RunNotFound(_)
            | Self::TerminalState { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled | Self::EndpointDegraded { .. } => ErrorSeverity::Low,
            Self::TransientApplyError { .. } | Self::ReadinessTimeout { .. } | Self::HttpError(_) => {
                ErrorSeverity::Medium
            }
            Self::IoError(_) | Self::SerializationError(_) | Self::TerminalState { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Transient errors are retried by the applier; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientApplyError { .. } => true,
            Self::HttpError(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::DuplicateUnit(id) => format!("Rename one of the units declared as '{}'", id),
            Self::UnknownDependency { dependency, .. } => format!(
                "Declare a unit named '{}' or remove it from depends_on",
                dependency
            ),
            Self::CycleDetected { .. } => {
                "Break the cycle by removing one depends_on edge from the listed units".to_string()
            }
            Self::ApplyRejected { .. } => {
                "Fix the manifest; the cluster API message above is reported verbatim".to_string()
            }
            Self::TransientApplyError { .. } | Self::Cluster(_) => {
                "Check that the cluster API is reachable (e.g. `kind get clusters`, `kubectl proxy`)"
                    .to_string()
            }
            Self::ReadinessTimeout { unit, .. } => format!(
                "Inspect the pods of '{}' (`kubectl describe` / `kubectl logs`) or raise the readiness timeout",
                unit
            ),
            Self::EndpointUnreachable { endpoint, .. } => format!(
                "Verify the service and port-forward for '{}'; a Running pod does not mean the backend is integrated",
                endpoint
            ),
            Self::EndpointDegraded { endpoint, .. } => format!(
                "Check the scrape/ingest configuration feeding '{}'",
                endpoint
            ),
            Self::NoWorkersConnected { .. } => "Workers could not reach the coordinator: check the master service name/DNS and port 5557 in the worker deployment".to_string(),
            Self::ZeroThroughput { target, .. } => format!(
                "Workers are connected but every request failed: verify the target host '{}' resolves from inside the cluster",
                target
            ),
            Self::LoadGenerator(_) => "Check that the load-test coordinator web UI is reachable".to_string(),
            Self::Cancelled => "The run was aborted; already-applied units were left running".to_string(),
            Self::HttpError(_) => "Check network connectivity and endpoint URLs".to_string(),
            Self::IoError(_) => "Check file paths and permissions".to_string(),
            Self::SerializationError(_) => "The history file may be corrupted; inspect it manually".to_string(),
            Self::ConfigError { field, .. }
            | Self::InvalidConfigValue { field, .. }
            | Self::MissingConfig { field } => format!("Review the '{}' setting in the graph file", field),
            Self::RunNotFound(_) => "List the history file to find valid run ids".to_string(),
            Self::TerminalState { .. } => "Start a new run instead of modifying a finished one".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Graph => format!("Deployment graph is invalid: {}", self),
            ErrorCategory::Apply => format!("Applying manifests failed: {}", self),
            ErrorCategory::Readiness => format!("A unit never became ready: {}", self),
            ErrorCategory::Probe => format!("Observability check failed: {}", self),
            ErrorCategory::LoadTest => format!("Load test failed: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Cancellation => "Run aborted by user".to_string(),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
