use clap::Parser;
use stack_orchestrator::adapters::JsonlRunStore;
use stack_orchestrator::config::{Command, LogFormat, OutputFormat, RunArgs, StatusArgs};
use stack_orchestrator::domain::ports::RunStore;
use stack_orchestrator::utils::{logger, validation::Validate};
use stack_orchestrator::{
    cancel_pair, render_report, run_graph, CliConfig, DeploymentRun, GraphConfig, OrchestratorError, RunOptions,
};

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    match config.log_format {
        LogFormat::Text => logger::init_cli_logger(config.verbose),
        LogFormat::Json => logger::init_json_logger(config.verbose),
    }
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        std::process::exit(report_error(&e));
    }

    let store = JsonlRunStore::new(&config.history);
    let exit_code = match &config.command {
        Command::Run(args) => run(args, &store).await,
        Command::Status(args) => status(args, &store).await,
    };
    std::process::exit(exit_code);
}

async fn run(args: &RunArgs, store: &JsonlRunStore) -> i32 {
    let graph = match GraphConfig::from_file(&args.graph).and_then(|graph| {
        graph.validate()?;
        Ok(graph)
    }) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::error!("❌ Graph file {} is invalid: {}", args.graph, e);
            return report_error(&e);
        }
    };

    let options = RunOptions {
        timeout: args.timeout,
        dry_run: args.dry_run,
        skip_load_test: args.skip_load_test,
        parallelism: args.parallelism,
        monitor: args.monitor,
    };
    if options.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    // Ctrl-C 中止執行：已套用的 unit 保留
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, aborting run");
            handle.cancel();
        }
    });

    match run_graph(&graph, &options, &signal, store).await {
        Ok(run) => {
            print_run(&run, args.output);
            run.state().exit_code()
        }
        Err(e) => report_error(&e),
    }
}

async fn status(args: &StatusArgs, store: &JsonlRunStore) -> i32 {
    match store.latest(args.run.as_deref()).await {
        Ok(run) => {
            print_run(&run, args.output);
            0
        }
        Err(e) => report_error(&e),
    }
}

fn print_run(run: &DeploymentRun, output: OutputFormat) {
    match output {
        OutputFormat::Text => print!("{}", render_report(run)),
        OutputFormat::Json => match serde_json::to_string_pretty(run) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                report_error(&e.into());
            }
        },
    }
}

fn report_error(e: &OrchestratorError) -> i32 {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    1
}
