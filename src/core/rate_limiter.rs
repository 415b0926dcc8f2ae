use crate::domain::model::{ApplyOutcome, Manifest, WorkloadStatus};
use crate::domain::ports::ClusterApi;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20.0,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every caller of the cluster API.
#[derive(Debug)]
pub struct TokenBucket {
    cfg: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(cfg: RateLimitConfig) -> Self {
        let capacity = cfg.capacity.max(1.0);
        Self {
            cfg: RateLimitConfig {
                capacity,
                refill_per_sec: cfg.refill_per_sec.max(f64::MIN_POSITIVE),
            },
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 非阻塞：有 token 則取用
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.cfg.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.cfg.refill_per_sec).min(self.cfg.capacity);
    }
}

/// Funnels every cluster request through one token bucket.
pub struct RateLimitedCluster<C: ClusterApi> {
    inner: C,
    limiter: TokenBucket,
}

impl<C: ClusterApi> RateLimitedCluster<C> {
    pub fn new(inner: C, cfg: RateLimitConfig) -> Self {
        Self {
            inner,
            limiter: TokenBucket::new(cfg),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ClusterApi> ClusterApi for RateLimitedCluster<C> {
    async fn apply_manifest(&self, namespace: &str, manifest: &Manifest) -> Result<ApplyOutcome> {
        self.limiter.acquire().await;
        self.inner.apply_manifest(namespace, manifest).await
    }

    async fn resource_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>> {
        self.limiter.acquire().await;
        self.inner.resource_status(namespace, name).await
    }

    async fn list_resources(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadStatus>> {
        self.limiter.acquire().await;
        self.inner.list_resources(namespace, selector).await
    }
}
