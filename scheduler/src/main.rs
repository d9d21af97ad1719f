//! Scheduler daemon entry point.
//!
//! Loads configuration, wires the control-plane core, and serves the
//! Unix-socket protocol to client applications until a shutdown signal
//! arrives.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod policy;
mod transport;
mod wrap;

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sched_core::{event_log, Algorithm, LinearAlgorithm, SchedulerConfig, SchedulerCore};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(about = "Scheduler daemon for heterogeneous compute resources", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file (defaults to $SCHED_CONFIG or config.yml)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the Unix socket path from the config file
    #[arg(long = "socket", value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Override the log directory from the config file
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<String>,

    /// Override the log level from the config file (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

fn config_path(cli: &CliArgs) -> PathBuf {
    cli.config.clone().unwrap_or_else(|| {
        std::env::var("SCHED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yml"))
    })
}

fn resolve_algorithm(name: &str) -> Arc<dyn Algorithm> {
    match name {
        "linear" => Arc::new(LinearAlgorithm),
        other => {
            tracing::warn!(algorithm = other, "unknown algorithm, falling back to linear");
            Arc::new(LinearAlgorithm)
        }
    }
}

fn init_logging(log_dir: &str, log_level: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "scheduler.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("scheduler={log_level},sched_core={log_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    guard
}

fn print_error_chain(e: &anyhow::Error) {
    error!("FATAL ERROR: failed to start scheduler");
    error!("Error: {}", e);
    let mut source = e.source();
    while let Some(err) = source {
        error!("  Caused by: {}", err);
        source = err.source();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let path = config_path(&cli);

    let mut config = match SchedulerConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            // Logging isn't initialized yet; this is the one place we print
            // straight to stderr before anything else can run.
            eprintln!("failed to load configuration from {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    if let Some(socket) = &cli.socket {
        config.socket_path = socket.display().to_string();
    }
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir = log_dir.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone();
    }

    let _guard = init_logging(&config.log_dir, &config.log_level);
    info!(config = %path.display(), resources = config.resources.len(), "scheduler starting");
    event_log::scheduler_start();
    event_log::resources(&config.resources.iter().map(|r| r.name.clone()).collect::<Vec<_>>());
    event_log::algorithm(&config.algorithm);

    let algorithm = resolve_algorithm(&config.algorithm);
    let core = SchedulerCore::build(&config, algorithm);

    let wrap_state = match &config.upstream_socket {
        Some(path) => {
            let (state, link) = wrap::connect(std::path::Path::new(path))
                .await
                .with_context(|| format!("failed to establish upstream link to {path}"))?;
            tokio::spawn(link);
            info!(upstream = %path, "running in wrap mode");
            Some(state)
        }
        None => None,
    };

    let socket_path = PathBuf::from(&config.socket_path);
    let run_result: Result<()> = async {
        let core_loop = core.clone();
        let core_run = tokio::spawn(core_loop.run());
        let serve_result = tokio::select! {
            result = transport::serve(core.clone(), &socket_path, wrap_state) => result,
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                Ok(())
            }
        };
        core.shutdown();
        let _ = core_run.await;
        serve_result
    }
    .await;

    if let Err(e) = &run_result {
        print_error_chain(e);
        std::process::exit(1);
    }

    event_log::scheduler_stop();
    info!("scheduler shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_config_yml() {
        std::env::remove_var("SCHED_CONFIG");
        let cli = CliArgs {
            config: None,
            socket: None,
            log_dir: None,
            log_level: None,
        };
        assert_eq!(config_path(&cli), PathBuf::from("config.yml"));
    }
}
