#[cfg(feature = "cli")]
pub mod cli;
pub mod graph_config;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command, LogFormat, OutputFormat, RunArgs, StatusArgs};
pub use graph_config::GraphConfig;
