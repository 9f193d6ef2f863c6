mod cli;
mod commands;
mod error;
mod output;

use std::path::Path;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as FileBuilder, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use netmode_config::LoggingConfig;
use netmode_core::Orchestrator;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "netmode", &mut std::io::stdout());
            Ok(())
        }

        // Config commands must work even when the file does not parse
        Command::Config(args) => {
            let _guard = init_tracing(&global, &LoggingConfig::default(), false)?;
            commands::config_cmd::handle(args, &global)
        }

        cmd => {
            let config = commands::config_cmd::resolve(&global)?;
            let daemon = matches!(cmd, Command::Watchdog);
            let _guard = init_tracing(&global, &config.logging, daemon)?;

            let orch = Orchestrator::open(config.to_orchestrator_config()?);
            tracing::debug!(command = ?cmd, root = %config.paths.root.display(), "dispatching command");
            commands::dispatch(cmd, &orch, &config, &global).await
        }
    }
}

/// Logs go to stderr, plus a file when `logging.file` is set. `RUST_LOG`
/// wins over everything; `-v` wins over the configured level. Interactive
/// commands default to `warn` so their stdout stays clean.
fn init_tracing(
    global: &GlobalOpts,
    logging: &LoggingConfig,
    daemon: bool,
) -> Result<Option<WorkerGuard>, CliError> {
    let level = match global.verbose {
        0 if daemon => logging.level.as_str(),
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if logging.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    });

    let mut guard = None;
    if let Some(path) = &logging.file {
        let (writer, worker) = tracing_appender::non_blocking(open_log_file(path)?);
        layers.push(if logging.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_writer(writer).with_ansi(false).boxed()
        });
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<tracing_appender::rolling::RollingFileAppender, CliError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("netmode.log");
    std::fs::create_dir_all(dir)?;
    FileBuilder::new()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}
