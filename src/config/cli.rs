use crate::adapters::run_store::DEFAULT_HISTORY_PATH;
use crate::utils::error::Result;
use crate::utils::validation::{parse_duration, validate_path, validate_positive_number, Validate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

#[derive(Debug, Parser)]
#[command(name = "orchestrate")]
#[command(about = "Deploys a dependency graph of units and validates the running stack")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, default_value = DEFAULT_HISTORY_PATH, help = "Run history file (JSON Lines)")]
    pub history: String,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the graph, probe observability backends and run the load test
    Run(RunArgs),
    /// Show the latest recorded state of a run
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, help = "Graph file (TOML)")]
    pub graph: String,

    #[arg(long, value_parser = parse_timeout, help = "Deadline for the deploy stage, e.g. 10m")]
    pub timeout: Duration,

    #[arg(long, help = "Simulate the cluster in memory; skips probes and the load test")]
    pub dry_run: bool,

    #[arg(long)]
    pub skip_load_test: bool,

    #[arg(long, help = "Units deployed concurrently (default: number of independent roots, max 8)")]
    pub parallelism: Option<usize>,

    #[arg(long, help = "Log process CPU/memory at every stage")]
    pub monitor: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, help = "Run id (defaults to the most recent run)")]
    pub run: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl Validate for RunArgs {
    fn validate(&self) -> Result<()> {
        validate_path("graph", &self.graph)?;
        if let Some(parallelism) = self.parallelism {
            validate_positive_number("parallelism", parallelism, 1)?;
        }
        Ok(())
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("history", &self.history)?;
        match &self.command {
            Command::Run(args) => args.validate(),
            Command::Status(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = CliConfig::try_parse_from([
            "orchestrate",
            "run",
            "--graph",
            "deploy/voting.toml",
            "--timeout",
            "10m",
            "--parallelism",
            "2",
            "--output",
            "json",
            "--verbose",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.history, DEFAULT_HISTORY_PATH);
        match &cli.command {
            Command::Run(args) => {
                assert_eq!(args.graph, "deploy/voting.toml");
                assert_eq!(args.timeout, Duration::from_secs(600));
                assert_eq!(args.parallelism, Some(2));
                assert_eq!(args.output, OutputFormat::Json);
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_timeout_is_required_and_parsed() {
        assert!(CliConfig::try_parse_from(["orchestrate", "run", "--graph", "g.toml"]).is_err());
        assert!(CliConfig::try_parse_from([
            "orchestrate",
            "run",
            "--graph",
            "g.toml",
            "--timeout",
            "soon"
        ])
        .is_err());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let cli = CliConfig::try_parse_from([
            "orchestrate",
            "run",
            "--graph",
            "g.toml",
            "--timeout",
            "30s",
            "--parallelism",
            "0",
        ])
        .unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_parse_status_command() {
        let cli = CliConfig::try_parse_from([
            "orchestrate",
            "status",
            "--run",
            "run_20261016_101500_1a2b3c4d",
            "--history",
            "/tmp/runs.jsonl",
        ])
        .unwrap();

        assert_eq!(cli.history, "/tmp/runs.jsonl");
        match cli.command {
            Command::Status(args) => {
                assert_eq!(args.run.as_deref(), Some("run_20261016_101500_1a2b3c4d"));
                assert_eq!(args.output, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
