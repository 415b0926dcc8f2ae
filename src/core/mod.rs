pub mod applier;
pub mod cancel;
pub mod engine;
pub mod graph;
pub mod load_test;
pub mod prober;
pub mod rate_limiter;
pub mod readiness;
pub mod report;

pub use crate::domain::model::{DeployableUnit, DeploymentRun, RunState};
pub use crate::domain::ports::{ClusterApi, LoadGenerator, RunStore};
pub use crate::utils::error::Result;
pub use engine::{EngineSettings, Orchestrator, RunPlan};
