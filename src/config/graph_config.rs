use crate::core::applier::BackoffPolicy;
use crate::core::engine::{EngineSettings, RunPlan, DEFAULT_UNIT_TIMEOUT};
use crate::core::prober::DEFAULT_PROBE_TIMEOUT;
use crate::core::rate_limiter::RateLimitConfig;
use crate::core::readiness::DEFAULT_POLL_INTERVAL;
use crate::domain::model::{DeployableUnit, EndpointSpec, LoadTestSpec, LoadThresholds, Manifest, ReadinessCheck};
use crate::utils::error::{OrchestratorError, Result};
use crate::utils::validation::{
    parse_duration, validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub orchestrator: OrchestratorSection,
    pub cluster: Option<ClusterSection>,
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
    pub load_test: Option<LoadTestSection>,
    /// manifest 相對路徑的基準目錄
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub poll_interval: Option<String>,
    pub unit_timeout: Option<String>,
    pub probe_timeout: Option<String>,
    pub parallelism: Option<usize>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub api_url: String,
    pub token: Option<String>,
    pub request_timeout: Option<String>,
    pub requests_per_second: Option<f64>,
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    pub base: Option<String>,
    pub cap: Option<String>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    pub id: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub manifests: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub readiness: Option<ReadinessCheck>,
    pub readiness_timeout: Option<String>,
    pub observability: Option<EndpointSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub master_url: String,
    pub target_url: String,
    pub users: u32,
    pub spawn_rate: f64,
    pub duration: String,
    pub connect_timeout: Option<String>,
    pub max_error_rate: Option<f64>,
    pub max_p95_ms: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

fn duration_field(field: &str, value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw).map_err(|e| match e {
            OrchestratorError::InvalidConfigValue { value, reason, .. } => {
                OrchestratorError::InvalidConfigValue {
                    field: field.to_string(),
                    value,
                    reason,
                }
            }
            other => other,
        }),
    }
}

impl GraphConfig {
    /// 從 TOML 檔案載入；manifest 路徑相對於檔案所在目錄
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| OrchestratorError::ConfigError {
            field: "graph".to_string(),
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| OrchestratorError::ConfigError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CLUSTER_TOKEN})；未定義的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| OrchestratorError::ConfigError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn name(&self) -> &str {
        &self.orchestrator.name
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        duration_field(
            "orchestrator.poll_interval",
            self.orchestrator.poll_interval.as_deref(),
            DEFAULT_POLL_INTERVAL,
        )
    }

    pub fn unit_timeout(&self) -> Result<Duration> {
        duration_field(
            "orchestrator.unit_timeout",
            self.orchestrator.unit_timeout.as_deref(),
            DEFAULT_UNIT_TIMEOUT,
        )
    }

    pub fn probe_timeout(&self) -> Result<Duration> {
        duration_field(
            "orchestrator.probe_timeout",
            self.orchestrator.probe_timeout.as_deref(),
            DEFAULT_PROBE_TIMEOUT,
        )
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        duration_field(
            "cluster.request_timeout",
            self.cluster.as_ref().and_then(|c| c.request_timeout.as_deref()),
            Duration::from_secs(10),
        )
    }

    pub fn cluster_url(&self) -> Option<&str> {
        self.cluster.as_ref().map(|c| c.api_url.as_str())
    }

    /// 未設定或環境變數未展開時為 None
    pub fn cluster_token(&self) -> Option<String> {
        self.cluster
            .as_ref()
            .and_then(|c| c.token.clone())
            .filter(|t| !t.is_empty() && !t.contains("${"))
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        let defaults = RateLimitConfig::default();
        match &self.cluster {
            Some(cluster) => RateLimitConfig {
                capacity: cluster.burst.map(f64::from).unwrap_or(defaults.capacity),
                refill_per_sec: cluster.requests_per_second.unwrap_or(defaults.refill_per_sec),
            },
            None => defaults,
        }
    }

    pub fn backoff(&self) -> Result<BackoffPolicy> {
        let defaults = BackoffPolicy::default();
        let Some(retry) = &self.retry else {
            return Ok(defaults);
        };

        Ok(BackoffPolicy {
            base: duration_field("retry.base", retry.base.as_deref(), defaults.base)?,
            cap: duration_field("retry.cap", retry.cap.as_deref(), defaults.cap)?,
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
        })
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            parallelism: self.orchestrator.parallelism,
            unit_timeout: self.unit_timeout()?,
            skip_load_test: false,
        })
    }

    fn resolve(&self, manifest: &str) -> PathBuf {
        let path = Path::new(manifest);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Builds the deployable units, reading every manifest from disk.
    pub fn units(&self) -> Result<Vec<DeployableUnit>> {
        let mut units = Vec::with_capacity(self.units.len());

        for (index, unit) in self.units.iter().enumerate() {
            let namespace = unit
                .namespace
                .clone()
                .unwrap_or_else(|| self.orchestrator.namespace.clone());
            let mut built = DeployableUnit::new(unit.id.clone(), namespace);

            for source in &unit.manifests {
                let path = self.resolve(source);
                let body = std::fs::read_to_string(&path).map_err(|e| OrchestratorError::ConfigError {
                    field: format!("units[{}].manifests", index),
                    message: format!("cannot read {}: {}", path.display(), e),
                })?;
                built.manifests.push(Manifest {
                    source: source.clone(),
                    body,
                });
            }

            built.dependencies = unit.depends_on.iter().cloned().collect();
            if let Some(readiness) = &unit.readiness {
                built = built.with_readiness(readiness.clone());
            }
            if let Some(raw) = &unit.readiness_timeout {
                let field = format!("units[{}].readiness_timeout", index);
                built = built.with_readiness_timeout(duration_field(&field, Some(raw.as_str()), DEFAULT_UNIT_TIMEOUT)?);
            }
            if let Some(endpoint) = &unit.observability {
                built = built.with_observability(endpoint.clone());
            }
            units.push(built);
        }

        Ok(units)
    }

    pub fn locust_url(&self) -> Option<&str> {
        self.load_test
            .as_ref()
            .filter(|lt| lt.enabled)
            .map(|lt| lt.master_url.as_str())
    }

    /// None when no load test is configured or it is disabled.
    pub fn load_test_spec(&self) -> Result<Option<LoadTestSpec>> {
        let Some(lt) = self.load_test.as_ref().filter(|lt| lt.enabled) else {
            return Ok(None);
        };

        Ok(Some(LoadTestSpec {
            target_url: lt.target_url.clone(),
            users: lt.users,
            spawn_rate: lt.spawn_rate,
            duration: duration_field("load_test.duration", Some(lt.duration.as_str()), Duration::from_secs(60))?,
            connect_timeout: duration_field(
                "load_test.connect_timeout",
                lt.connect_timeout.as_deref(),
                Duration::from_secs(30),
            )?,
            thresholds: LoadThresholds {
                max_error_rate: lt.max_error_rate.unwrap_or(0.01),
                max_p95_ms: lt.max_p95_ms.unwrap_or(1000.0),
            },
        }))
    }

    pub fn run_plan(&self, timeout: Duration) -> Result<RunPlan> {
        Ok(RunPlan {
            name: self.orchestrator.name.clone(),
            units: self.units()?,
            load_test: self.load_test_spec()?,
            timeout,
        })
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("orchestrator.name", &self.orchestrator.name)?;
        validate_non_empty_string("orchestrator.namespace", &self.orchestrator.namespace)?;
        if let Some(parallelism) = self.orchestrator.parallelism {
            validate_positive_number("orchestrator.parallelism", parallelism, 1)?;
        }
        self.poll_interval()?;
        self.unit_timeout()?;
        self.probe_timeout()?;

        if let Some(cluster) = &self.cluster {
            validate_url("cluster.api_url", &cluster.api_url)?;
            self.request_timeout()?;
            if let Some(rps) = cluster.requests_per_second {
                validate_range("cluster.requests_per_second", rps, 0.1, 10_000.0)?;
            }
            if let Some(burst) = cluster.burst {
                validate_positive_number("cluster.burst", burst as usize, 1)?;
            }
        }

        let backoff = self.backoff()?;
        validate_positive_number("retry.max_attempts", backoff.max_attempts as usize, 1)?;

        if self.units.is_empty() {
            return Err(OrchestratorError::MissingConfig {
                field: "units".to_string(),
            });
        }
        for (index, unit) in self.units.iter().enumerate() {
            validate_non_empty_string(&format!("units[{}].id", index), &unit.id)?;
            for manifest in &unit.manifests {
                validate_path(&format!("units[{}].manifests", index), manifest)?;
            }
            if let Some(ReadinessCheck::Http { url, .. }) = &unit.readiness {
                validate_url(&format!("units[{}].readiness.url", index), url)?;
            }
            if let Some(endpoint) = &unit.observability {
                validate_url(&format!("units[{}].observability.url", index), &endpoint.url)?;
            }
        }

        if let Some(lt) = self.load_test.as_ref().filter(|lt| lt.enabled) {
            validate_url("load_test.master_url", &lt.master_url)?;
            validate_url("load_test.target_url", &lt.target_url)?;
            validate_positive_number("load_test.users", lt.users as usize, 1)?;
            validate_range("load_test.spawn_rate", lt.spawn_rate, 0.1, 10_000.0)?;
            if let Some(rate) = lt.max_error_rate {
                validate_range("load_test.max_error_rate", rate, 0.0, 1.0)?;
            }
            self.load_test_spec()?;
        }

        Ok(())
    }
}

impl Validate for GraphConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ProbeKind;
    use std::io::Write;
    use tempfile::TempDir;

    const VOTING: &str = r#"
[orchestrator]
name = "voting-app"
namespace = "vote"
poll_interval = "1s"
unit_timeout = "3m"

[cluster]
api_url = "http://127.0.0.1:8001"
requests_per_second = 5.0
burst = 10

[retry]
base = "500ms"
max_attempts = 3

[[units]]
id = "redis"
manifests = ["k8s/redis.yaml"]
[units.readiness]
kind = "replicas"
workload = "redis"

[[units]]
id = "worker"
manifests = ["k8s/worker.yaml"]
depends_on = ["redis"]
readiness_timeout = "90s"
[units.readiness]
kind = "label_selector"
selector = "app=worker"

[[units]]
id = "prometheus"
namespace = "monitoring"
[units.observability]
name = "prometheus"
url = "http://localhost:9090"
kind = "prometheus_target"
job = "redis-exporter"
required = false

[load_test]
master_url = "http://localhost:8089"
target_url = "http://vote.vote.svc.cluster.local"
users = 50
spawn_rate = 5.0
duration = "2m"
max_p95_ms = 800.0
"#;

    fn write_graph(dir: &TempDir, content: &str) -> PathBuf {
        let k8s = dir.path().join("k8s");
        std::fs::create_dir_all(&k8s).unwrap();
        std::fs::write(k8s.join("redis.yaml"), "kind: Deployment\nname: redis\n").unwrap();
        std::fs::write(k8s.join("worker.yaml"), "kind: Deployment\nname: worker\n").unwrap();

        let path = dir.path().join("graph.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_voting_graph() {
        let dir = TempDir::new().unwrap();
        let config = GraphConfig::from_file(write_graph(&dir, VOTING)).unwrap();
        config.validate().unwrap();

        assert_eq!(config.name(), "voting-app");
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(config.unit_timeout().unwrap(), Duration::from_secs(180));

        let backoff = config.backoff().unwrap();
        assert_eq!(backoff.base, Duration::from_millis(500));
        assert_eq!(backoff.cap, Duration::from_secs(30));
        assert_eq!(backoff.max_attempts, 3);

        let limit = config.rate_limit();
        assert_eq!(limit.capacity, 10.0);
        assert_eq!(limit.refill_per_sec, 5.0);

        let units = config.units().unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].manifests[0].source, "k8s/redis.yaml");
        assert!(units[0].manifests[0].body.contains("name: redis"));
        assert!(units[1].dependencies.contains("redis"));
        assert_eq!(units[1].readiness_timeout, Some(Duration::from_secs(90)));
        assert_eq!(units[2].namespace, "monitoring");
        let endpoint = units[2].observability.as_ref().unwrap();
        assert!(!endpoint.required);
        assert_eq!(
            endpoint.probe,
            ProbeKind::PrometheusTarget {
                job: "redis-exporter".to_string()
            }
        );

        let spec = config.load_test_spec().unwrap().unwrap();
        assert_eq!(spec.duration, Duration::from_secs(120));
        assert_eq!(spec.connect_timeout, Duration::from_secs(30));
        assert_eq!(spec.thresholds.max_p95_ms, 800.0);
        assert_eq!(config.locust_url(), Some("http://localhost:8089"));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("ORCH_TEST_CLUSTER_URL", "http://10.0.0.5:8001");
        let content = VOTING.replace("http://127.0.0.1:8001", "${ORCH_TEST_CLUSTER_URL}");
        let config = GraphConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.cluster_url(), Some("http://10.0.0.5:8001"));

        let unresolved = VOTING.replace(
            "api_url = \"http://127.0.0.1:8001\"",
            "api_url = \"http://127.0.0.1:8001\"\ntoken = \"${ORCH_TEST_UNSET_TOKEN}\"",
        );
        let config = GraphConfig::from_toml_str(&unresolved).unwrap();
        assert!(config.cluster_token().is_none());
    }

    #[test]
    fn test_missing_manifest_file() {
        let dir = TempDir::new().unwrap();
        let content = VOTING.replace("k8s/worker.yaml", "k8s/missing.yaml");
        let config = GraphConfig::from_file(write_graph(&dir, &content)).unwrap();

        let err = config.units().unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_url = VOTING.replace("http://127.0.0.1:8001", "not-a-url");
        let config = GraphConfig::from_toml_str(&bad_url).unwrap();
        assert!(config.validate().is_err());

        let bad_duration = VOTING.replace("\"3m\"", "\"soon\"");
        let config = GraphConfig::from_toml_str(&bad_duration).unwrap();
        match config.validate().unwrap_err() {
            OrchestratorError::InvalidConfigValue { field, .. } => {
                assert_eq!(field, "orchestrator.unit_timeout")
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let no_units = "[orchestrator]\nname = \"empty\"\n";
        let config = GraphConfig::from_toml_str(no_units).unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), "MissingConfig");
    }

    #[test]
    fn test_disabled_load_test() {
        let content = VOTING.replace("[load_test]", "[load_test]\nenabled = false");
        let config = GraphConfig::from_toml_str(&content).unwrap();
        assert!(config.load_test_spec().unwrap().is_none());
        assert!(config.locust_url().is_none());
    }
}
