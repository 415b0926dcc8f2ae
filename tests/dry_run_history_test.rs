use anyhow::Result;
use stack_orchestrator::adapters::JsonlRunStore;
use stack_orchestrator::domain::model::UnitStatus;
use stack_orchestrator::domain::ports::RunStore;
use stack_orchestrator::utils::error::OrchestratorError;
use stack_orchestrator::{cancel_pair, render_report, run_graph, CancelSignal, GraphConfig, RunOptions, RunState};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_graph(dir: &Path, units: &str) -> Result<GraphConfig> {
    let k8s = dir.join("k8s");
    std::fs::create_dir_all(&k8s)?;
    for name in ["redis", "db", "worker", "result", "vote", "loki"] {
        std::fs::write(k8s.join(format!("{}.yaml", name)), format!("kind: Deployment\nname: {}\n", name))?;
    }

    let content = format!(
        r#"
[orchestrator]
name = "voting-app"
namespace = "vote"
poll_interval = "50ms"

[load_test]
master_url = "http://locust-master.loadtest.svc:8089"
target_url = "http://vote.vote.svc"
users = 20
spawn_rate = 2.0
duration = "30s"

{}
"#,
        units
    );
    let path = dir.join("graph.toml");
    std::fs::write(&path, content)?;
    Ok(GraphConfig::from_file(&path)?)
}

const VOTING_UNITS: &str = r#"
[[units]]
id = "redis"
manifests = ["k8s/redis.yaml"]
[units.readiness]
kind = "replicas"
workload = "redis"

[[units]]
id = "db"
manifests = ["k8s/db.yaml"]

[[units]]
id = "worker"
manifests = ["k8s/worker.yaml"]
depends_on = ["redis", "db"]

[[units]]
id = "result"
manifests = ["k8s/result.yaml"]
depends_on = ["worker"]

[[units]]
id = "vote"
manifests = ["k8s/vote.yaml"]
depends_on = ["redis"]

[[units]]
id = "loki"
namespace = "monitoring"
manifests = ["k8s/loki.yaml"]
[units.observability]
name = "loki"
url = "http://loki.monitoring.svc:3100"
kind = "loki_ready"
"#;

fn dry_run_options() -> RunOptions {
    let mut options = RunOptions::new(Duration::from_secs(60));
    options.dry_run = true;
    options
}

#[tokio::test]
async fn test_dry_run_needs_no_cluster_section() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_graph(temp_dir.path(), VOTING_UNITS)?;
    assert!(config.cluster.is_none());

    let store = JsonlRunStore::new(temp_dir.path().join("runs.jsonl"));
    let run = run_graph(&config, &dry_run_options(), &CancelSignal::never(), &store).await?;

    assert_eq!(run.state(), RunState::Succeeded);
    assert_eq!(run.order().len(), 6);
    assert!(run.units().iter().all(|u| u.status == UnitStatus::Ready));
    // 模擬模式不探測也不壓測
    assert!(run.probes().is_empty());
    assert!(run.load_test().is_none());

    let history = std::fs::read_to_string(store.path())?;
    assert_eq!(history.lines().count(), 2);

    let report = render_report(&run);
    assert!(report.contains("voting-app"));
    assert!(report.contains("Succeeded"));
    Ok(())
}

#[tokio::test]
async fn test_real_run_without_cluster_url_is_config_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_graph(temp_dir.path(), VOTING_UNITS)?;
    let store = JsonlRunStore::new(temp_dir.path().join("runs.jsonl"));

    let result = run_graph(
        &config,
        &RunOptions::new(Duration::from_secs(60)),
        &CancelSignal::never(),
        &store,
    )
    .await;

    match result {
        Err(OrchestratorError::MissingConfig { field }) => assert_eq!(field, "cluster.api_url"),
        other => panic!("expected MissingConfig, got {:?}", other.map(|r| r.state())),
    }
    assert!(!store.path().exists());
    Ok(())
}

#[tokio::test]
async fn test_cycle_is_recorded_as_failed_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let units = r#"
[[units]]
id = "worker"
manifests = ["k8s/worker.yaml"]
depends_on = ["result"]

[[units]]
id = "result"
manifests = ["k8s/result.yaml"]
depends_on = ["worker"]
"#;
    let config = write_graph(temp_dir.path(), units)?;
    let store = JsonlRunStore::new(temp_dir.path().join("runs.jsonl"));

    let run = run_graph(&config, &dry_run_options(), &CancelSignal::never(), &store).await?;

    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(run.errors()[0].stage, RunState::Planning);
    assert_eq!(run.errors()[0].kind, "CycleDetected");
    assert!(run.units().iter().all(|u| u.status == UnitStatus::Pending));

    let latest = store.latest(None).await?;
    assert_eq!(latest.id(), run.id());
    assert_eq!(latest.state(), RunState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start_is_aborted() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_graph(temp_dir.path(), VOTING_UNITS)?;
    let store = JsonlRunStore::new(temp_dir.path().join("runs.jsonl"));

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let run = run_graph(&config, &dry_run_options(), &signal, &store).await?;

    assert_eq!(run.state(), RunState::Aborted);
    assert_eq!(run.state().exit_code(), 130);
    assert!(run.errors().iter().any(|e| e.kind == "Cancelled"));
    Ok(())
}

#[tokio::test]
async fn test_status_reads_back_each_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_graph(temp_dir.path(), VOTING_UNITS)?;
    let store = JsonlRunStore::new(temp_dir.path().join("nested/dir/runs.jsonl"));

    let first = run_graph(&config, &dry_run_options(), &CancelSignal::never(), &store).await?;
    let second = run_graph(&config, &dry_run_options(), &CancelSignal::never(), &store).await?;
    assert_ne!(first.id(), second.id());

    assert_eq!(store.latest(None).await?.id(), second.id());
    assert_eq!(store.latest(Some(first.id())).await?, first);

    match store.latest(Some("run_19700101_000000_deadbeef")).await {
        Err(OrchestratorError::RunNotFound(id)) => assert_eq!(id, "run_19700101_000000_deadbeef"),
        other => panic!("expected RunNotFound, got {:?}", other.map(|r| r.state())),
    }
    Ok(())
}
