use crate::core::cancel::CancelSignal;
use crate::domain::model::{ApplyOutcome, DeployableUnit, Manifest};
use crate::domain::ports::ClusterApi;
use crate::utils::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[derive(Debug)]
pub struct ApplyAttempt {
    pub attempts: u32,
    pub result: Result<ApplyOutcome>,
}

/// Submits unit manifests to the cluster API.
pub struct ResourceApplier {
    cluster: Arc<dyn ClusterApi>,
    backoff: BackoffPolicy,
    // unit id -> (namespace, manifests) last applied successfully
    applied: Mutex<HashMap<String, (String, Vec<Manifest>)>>,
}

impl ResourceApplier {
    pub fn new(cluster: Arc<dyn ClusterApi>, backoff: BackoffPolicy) -> Self {
        Self {
            cluster,
            backoff,
            applied: Mutex::new(HashMap::new()),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Idempotent: an unchanged unit is not resubmitted.
    pub async fn apply(&self, unit: &DeployableUnit) -> Result<ApplyOutcome> {
        {
            let applied = self.applied.lock().await;
            if let Some((namespace, manifests)) = applied.get(&unit.id) {
                if *namespace == unit.namespace && *manifests == unit.manifests {
                    tracing::debug!("⏭️ {} unchanged since last apply", unit.id);
                    return Ok(ApplyOutcome::Unchanged);
                }
            }
        }

        let mut outcome = ApplyOutcome::Unchanged;
        for manifest in &unit.manifests {
            tracing::debug!("📤 Applying {} to namespace {}", manifest.source, unit.namespace);
            let result = self.cluster.apply_manifest(&unit.namespace, manifest).await?;
            outcome = outcome.merge(result);
        }

        self.applied.lock().await.insert(
            unit.id.clone(),
            (unit.namespace.clone(), unit.manifests.clone()),
        );
        Ok(outcome)
    }

    /// Retries transient failures with exponential backoff; rejections and
    /// other errors are returned immediately.
    pub async fn apply_with_retry(&self, unit: &DeployableUnit, cancel: &CancelSignal) -> ApplyAttempt {
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return ApplyAttempt {
                    attempts,
                    result: Err(OrchestratorError::Cancelled),
                };
            }

            attempts += 1;
            match self.apply(unit).await {
                Ok(outcome) => {
                    return ApplyAttempt {
                        attempts,
                        result: Ok(outcome),
                    }
                }
                Err(e) if e.is_transient() && attempts < self.backoff.max_attempts => {
                    let delay = self.backoff.delay(attempts);
                    tracing::warn!(
                        "🔁 {} apply attempt {}/{} failed: {} (retrying in {:?})",
                        unit.id,
                        attempts,
                        self.backoff.max_attempts,
                        e,
                        delay
                    );
                    if let Err(cancelled) = cancel.sleep(delay).await {
                        return ApplyAttempt {
                            attempts,
                            result: Err(cancelled),
                        };
                    }
                }
                Err(e) => {
                    return ApplyAttempt {
                        attempts,
                        result: Err(e),
                    }
                }
            }
        }
    }
}
