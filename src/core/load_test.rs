use crate::core::cancel::CancelSignal;
use crate::domain::model::{LoadTestResult, LoadTestSpec, WorkerInfo};
use crate::domain::ports::LoadGenerator;
use crate::utils::error::{OrchestratorError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_WORKER_POLL: Duration = Duration::from_secs(2);

/// Drives a coordinator/worker load generator through one swarm.
pub struct LoadTestCoordinator {
    generator: Arc<dyn LoadGenerator>,
    poll_interval: Duration,
}

impl LoadTestCoordinator {
    pub fn new(generator: Arc<dyn LoadGenerator>, poll_interval: Duration) -> Self {
        Self {
            generator,
            poll_interval,
        }
    }

    pub async fn run_load_test(&self, spec: &LoadTestSpec, cancel: &CancelSignal) -> Result<LoadTestResult> {
        let workers = self.wait_for_workers(spec.connect_timeout, cancel).await?;
        tracing::info!(
            "🐝 {} worker(s) connected, swarming {} with {} users",
            workers.len(),
            spec.target_url,
            spec.users
        );

        self.generator.start_swarm(spec).await?;

        if let Err(cancelled) = cancel.sleep(spec.duration).await {
            // 中止時仍嘗試停止 swarm
            if let Err(e) = self.generator.stop_swarm().await {
                tracing::warn!("Failed to stop swarm after cancel: {}", e);
            }
            return Err(cancelled);
        }

        let stats = self.generator.stats().await;
        if let Err(e) = self.generator.stop_swarm().await {
            tracing::warn!("Failed to stop swarm: {}", e);
        }
        let stats = stats?;

        if stats.total_requests > 0
            && stats.total_failures >= stats.total_requests
            && !spec.target_url.trim().is_empty()
        {
            return Err(OrchestratorError::ZeroThroughput {
                target: spec.target_url.clone(),
                attempted: stats.total_requests,
            });
        }

        let result = LoadTestResult::from_stats(&spec.target_url, &stats);
        tracing::info!(
            "📈 {} requests, {:.1} rps, {:.2}% errors, p95 {:.0}ms",
            result.total_requests(),
            result.rps(),
            result.error_rate() * 100.0,
            result.p95_ms()
        );
        Ok(result)
    }

    async fn wait_for_workers(&self, timeout: Duration, cancel: &CancelSignal) -> Result<Vec<WorkerInfo>> {
        let start = Instant::now();

        loop {
            let last_error = match self.generator.connected_workers().await {
                Ok(workers) if !workers.is_empty() => return Ok(workers),
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            };

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(OrchestratorError::NoWorkersConnected {
                    waited,
                    detail: last_error,
                });
            }

            tracing::debug!("⏳ Waiting for load-test workers ({:?} elapsed)", waited);
            cancel.sleep(self.poll_interval.min(timeout - waited)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::cancel_pair;
    use crate::domain::model::{LoadThresholds, SwarmStats};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        started: usize,
        stopped: usize,
    }

    struct FakeGenerator {
        created: Instant,
        workers_after: Option<Duration>,
        stats: SwarmStats,
        calls: Mutex<Calls>,
    }

    impl FakeGenerator {
        fn new(workers_after: Option<Duration>, stats: SwarmStats) -> Self {
            Self {
                created: Instant::now(),
                workers_after,
                stats,
                calls: Mutex::new(Calls::default()),
            }
        }
    }

    #[async_trait]
    impl LoadGenerator for FakeGenerator {
        async fn connected_workers(&self) -> Result<Vec<WorkerInfo>> {
            match self.workers_after {
                Some(after) if self.created.elapsed() >= after => Ok(vec![WorkerInfo {
                    id: "locust-worker-1".to_string(),
                    state: "ready".to_string(),
                    user_count: 0,
                }]),
                _ => Ok(Vec::new()),
            }
        }

        async fn start_swarm(&self, _spec: &LoadTestSpec) -> Result<()> {
            self.calls.lock().await.started += 1;
            Ok(())
        }

        async fn stats(&self) -> Result<SwarmStats> {
            Ok(self.stats.clone())
        }

        async fn stop_swarm(&self) -> Result<()> {
            self.calls.lock().await.stopped += 1;
            Ok(())
        }
    }

    fn spec() -> LoadTestSpec {
        LoadTestSpec {
            target_url: "http://vote.vote.svc.cluster.local".to_string(),
            users: 50,
            spawn_rate: 5.0,
            duration: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            thresholds: LoadThresholds {
                max_error_rate: 0.01,
                max_p95_ms: 500.0,
            },
        }
    }

    fn stats(requests: u64, failures: u64) -> SwarmStats {
        SwarmStats {
            total_requests: requests,
            total_failures: failures,
            rps: requests as f64 / 60.0,
            p50_ms: 20.0,
            p95_ms: 120.0,
            p99_ms: 300.0,
            workers: Vec::new(),
        }
    }

    fn coordinator(generator: Arc<FakeGenerator>) -> LoadTestCoordinator {
        LoadTestCoordinator::new(generator, DEFAULT_WORKER_POLL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_workers_is_distinct_error() {
        let generator = Arc::new(FakeGenerator::new(None, stats(0, 0)));
        let start = Instant::now();

        let err = coordinator(generator.clone())
            .run_load_test(&spec(), &CancelSignal::never())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "NoWorkersConnected");
        assert!(matches!(err, OrchestratorError::NoWorkersConnected { detail: None, .. }));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(generator.calls.lock().await.started, 0);
    }

    struct DownMaster;

    #[async_trait]
    impl LoadGenerator for DownMaster {
        async fn connected_workers(&self) -> Result<Vec<WorkerInfo>> {
            Err(OrchestratorError::LoadGenerator("connection refused".to_string()))
        }

        async fn start_swarm(&self, _spec: &LoadTestSpec) -> Result<()> {
            Ok(())
        }

        async fn stats(&self) -> Result<SwarmStats> {
            Ok(stats(0, 0))
        }

        async fn stop_swarm(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_master_reports_last_error() {
        let err = LoadTestCoordinator::new(Arc::new(DownMaster), DEFAULT_WORKER_POLL)
            .run_load_test(&spec(), &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::NoWorkersConnected { waited, detail } => {
                assert!(waited >= Duration::from_secs(30));
                assert!(detail.unwrap_or_default().contains("connection refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_throughput() {
        let generator = Arc::new(FakeGenerator::new(Some(Duration::ZERO), stats(400, 400)));

        let err = coordinator(generator.clone())
            .run_load_test(&spec(), &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::ZeroThroughput { attempted, target } => {
                assert_eq!(attempted, 400);
                assert!(target.contains("vote"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(generator.calls.lock().await.stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_after_workers_join() {
        let generator = Arc::new(FakeGenerator::new(Some(Duration::from_secs(5)), stats(6000, 3)));
        let start = Instant::now();

        let result = coordinator(generator.clone())
            .run_load_test(&spec(), &CancelSignal::never())
            .await
            .unwrap();

        // 等待 worker (~6s) + 壓測 60s
        assert!(start.elapsed() >= Duration::from_secs(65));
        assert_eq!(result.total_requests(), 6000);
        assert!(result.violations(&spec().thresholds).is_empty());

        let calls = generator.calls.lock().await;
        assert_eq!(calls.started, 1);
        assert_eq!(calls.stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_swarm_stops_generator() {
        let generator = Arc::new(FakeGenerator::new(Some(Duration::ZERO), stats(10, 0)));
        let (handle, signal) = cancel_pair();

        let task = tokio::spawn({
            let coordinator = coordinator(generator.clone());
            async move { coordinator.run_load_test(&spec(), &signal).await }
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert_eq!(generator.calls.lock().await.stopped, 1);
    }
}
