pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::GraphConfig;

pub use app::{run_graph, RunOptions};
pub use core::cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use core::engine::{EngineSettings, Orchestrator, RunPlan};
pub use core::report::render_report;
pub use domain::model::{DeploymentRun, RunState};
pub use utils::error::{OrchestratorError, Result};
