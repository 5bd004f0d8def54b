use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use pg_backup_lib::backup::{Orchestrator, Script};
use pg_backup_lib::cli::{Action, Cli, RunArgs, StartArgs};
use pg_backup_lib::config::FileConfig;
use pg_backup_lib::metrics::{BackupMetrics, PushGateway, Reporter};
use pg_backup_lib::schedule;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let file_config = match &cli.config {
        Some(path) => match FileConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!(target: "config", "{e}");
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };

    match cli.action {
        Action::Backup(args) => backup(&args, &file_config),
        Action::Start(args) => start(&args, &file_config),
    }
}

fn orchestrator(args: &RunArgs, file_config: &FileConfig) -> Orchestrator<Script, PushGateway> {
    let params = args.run_parameters(file_config);
    log::debug!(target: "config", "Run parameters: {params:?}");

    let script = Script::new(&params.script_path);
    let push_gateway = params.push_gateway.as_deref().map(PushGateway::new);
    let reporter = Reporter::new(BackupMetrics::default(), push_gateway, &params.job);

    Orchestrator::new(params, script, reporter)
}

/// One-shot: any error fails the process.
fn backup(args: &RunArgs, file_config: &FileConfig) -> ExitCode {
    let connection_strings = args.connection_strings(file_config);
    let mut orchestrator = orchestrator(args, file_config);

    match orchestrator.run_once(&connection_strings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "backup", "Error during backup: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Recurring: runs until interrupted, only a broken schedule fails the process.
fn start(args: &StartArgs, file_config: &FileConfig) -> ExitCode {
    let schedule = args.cron_schedule(file_config);
    let connection_strings = args.run.connection_strings(file_config);
    let mut orchestrator = orchestrator(&args.run, file_config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!(target: "schedule", "Starting the async runtime failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let shutdown = CancellationToken::new();

        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!(target: "schedule", "Received interrupt");
                    interrupt.cancel();
                }
                Err(e) => log::warn!(target: "schedule", "Listening for interrupts failed: {e}"),
            }
        });

        schedule::run_forever(
            &schedule,
            move || orchestrator.run_once(&connection_strings),
            shutdown,
        )
        .await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "schedule", "{e}");
            ExitCode::FAILURE
        }
    }
}
