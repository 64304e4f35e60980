// artstage/src/main.rs
use std::fs;
use std::process;

use artstage_common::config::Config;
use artstage_common::error::{ArtError, Result as artResult};
use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::CliArgs;

const LOG_ENV_VAR: &str = "ARTSTAGE_LOG";
const LOG_FILE_NAME: &str = "artstage.log";

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::WARN);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let log_dir = config.logs_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Warning:".yellow().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    // The appender flushes on drop; it has to live until the process exits.
    Box::leak(Box::new(guard));

    debug!(
        "Verbose logging enabled. Writing logs to: {}/{}",
        log_dir.display(),
        LOG_FILE_NAME
    );
}

/// Bad configuration or an unsafe archive fails the same way on every run.
fn retry_hint(err: &ArtError) -> Option<&'static str> {
    if err.is_fatal_input() {
        None
    } else {
        Some("Running again reuses the archives and extractions already staged.")
    }
}

#[tokio::main]
async fn main() -> artResult<()> {
    let cli_args = CliArgs::parse();

    let mut config = match Config::load(cli_args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            process::exit(1);
        }
    };
    cli_args.command.overrides().apply(&mut config);

    init_logging(&config, cli_args.verbose);
    debug!("Effective configuration: {:?}", config);

    if let Err(e) = cli_args.command.run(config).await {
        error!("Command failed: {:#}", e);
        debug!("Root cause: {:?}", e.root_cause());
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        if let Some(hint) = retry_hint(&e) {
            eprintln!("{}", hint.dimmed());
        }
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
