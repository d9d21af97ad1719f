//! Synthetic-clock replay driver entry point.
//!
//! Loads a scheduler configuration and a simulation file, then replays the
//! task arrivals on a logical clock instead of real time, driving the same
//! [`sched_core::core::SchedulerCore`] the `scheduler` daemon uses, minus
//! the transport and the async trigger loops.
//!
//! Grounded in `CSimMain`/`CSimQueue`: the original spins up a dedicated
//! simulation thread that feeds a time-sorted event list into the same
//! `CScheduleComputer`/`CScheduleExecutor` pair the live scheduler uses.
//! Here the whole replay is a single-threaded synchronous loop — there is
//! no tokio runtime in this binary at all, since `Computer::compute_once`
//! and `Executor::step_dispatch` are plain synchronous calls and nothing
//! else in the replay path needs to await.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod adapter;
mod sim_queue;
mod simfile;

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sched_core::{Algorithm, LinearAlgorithm, SchedulerConfig, SchedulerCore};
use tracing::{info, warn};

use adapter::SimAdapter;
use sim_queue::{SimEvent, SimQueue};

#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Synthetic-clock replay driver for offline placement algorithm evaluation", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file (defaults to $SCHED_CONFIG or config.yml)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to the simulation input file (defaults to $SCHED_SIMFILE or simfile.json)
    #[arg(long = "simfile", value_name = "PATH")]
    simfile: Option<PathBuf>,

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

fn simfile_path(cli: &CliArgs) -> PathBuf {
    cli.simfile.clone().unwrap_or_else(|| {
        std::env::var("SCHED_SIMFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("simfile.json"))
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
    let file_appender = tracing_appender::rolling::daily(log_dir, "simulator.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("simulator={log_level},sched_core={log_level}")));

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
    tracing::error!("FATAL ERROR: simulation failed");
    tracing::error!("Error: {}", e);
    let mut source = e.source();
    while let Some(err) = source {
        tracing::error!("  Caused by: {}", err);
        source = err.source();
    }
}

fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let cfg_path = config_path(&cli);

    let mut config = match SchedulerConfig::load(&cfg_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", cfg_path.display());
            std::process::exit(1);
        }
    };
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir = log_dir.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone();
    }

    let _guard = init_logging(&config.log_dir, &config.log_level);
    info!(config = %cfg_path.display(), resources = config.resources.len(), "simulation starting");
    sched_core::event_log::scheduler_start();
    sched_core::event_log::resources(&config.resources.iter().map(|r| r.name.clone()).collect::<Vec<_>>());
    sched_core::event_log::algorithm(&config.algorithm);

    let algorithm = resolve_algorithm(&config.algorithm);
    let core = SchedulerCore::build(&config, algorithm);

    let sim_path = simfile_path(&cli);
    let result = run(core, &sim_path);
    sched_core::event_log::scheduler_stop();
    if let Err(e) = &result {
        print_error_chain(e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(core: Arc<SchedulerCore>, sim_path: &PathBuf) -> Result<()> {
    let sim = simfile::load(sim_path, |name| core.resource_id_by_name(name))
        .with_context(|| format!("failed to load simulation file {}", sim_path.display()))?;

    let queue = Arc::new(std::sync::Mutex::new(SimQueue::new()));
    let current_tick = Arc::new(AtomicU64::new(0));
    let adapter = SimAdapter::new(queue.clone(), current_tick.clone());

    let arrival_count = sim.arrivals.len();
    for (tick, batch) in sim.arrivals {
        queue.lock().unwrap().schedule(tick, SimEvent::TaskArrival(batch));
    }
    info!(batches = arrival_count, "loaded simulation events");

    let mut events_processed: u64 = 0;
    loop {
        let popped = queue.lock().unwrap().pop();
        let Some((tick, event)) = popped else { break };
        current_tick.store(tick, Ordering::Release);
        events_processed += 1;

        match event {
            SimEvent::TaskArrival(batch) => {
                let adapter_handle: sched_core::AdapterHandle = adapter.clone();
                match core.task_database.register_task_list(batch.specs.clone(), Some(adapter_handle)) {
                    Ok(ids) => {
                        adapter.record_task_specs(&ids, &batch.specs);
                        for id in &ids {
                            if let Some(name) = core.task_database.task(*id).map(|t| t.lock().unwrap().name.clone()) {
                                sched_core::event_log::task_registered(*id, &name);
                            }
                        }
                        info!(tick, tasks = ids.len(), "tasks arrived");
                        core.task_list_changed();
                        core.computer.compute_once();
                        core.executor.step_dispatch();
                    }
                    Err(e) => warn!(error = %e, tick, "rejected simulated tasklist"),
                }
            }
            SimEvent::TaskComplete { task_id } => {
                let Some(task) = core.task_database.task(task_id) else { continue };
                let resource_id = {
                    let mut t = task.lock().unwrap();
                    t.started();
                    t.finished();
                    t.assigned_resource
                };
                sched_core::event_log::task_finished(task_id);
                if let Some(resource_id) = resource_id {
                    if let Some(resource) = core.resources.get(resource_id) {
                        resource.on_task_finished(task_id);
                    }
                }
                core.task_list_changed();
                core.computer.compute_once();
                core.executor.step_dispatch();
            }
        }
    }

    adapter.close();
    if core.task_database.all_terminal() {
        info!(events = events_processed, final_tick = current_tick.load(Ordering::Acquire), "simulation complete, all tasks terminal");
    } else {
        warn!(events = events_processed, "simulation queue drained but tasks remain unfinished");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_config_yml() {
        std::env::remove_var("SCHED_CONFIG");
        let cli = CliArgs {
            config: None,
            simfile: None,
            log_dir: None,
            log_level: None,
        };
        assert_eq!(config_path(&cli), PathBuf::from("config.yml"));
    }

    #[test]
    fn simfile_path_defaults_to_simfile_json() {
        std::env::remove_var("SCHED_SIMFILE");
        let cli = CliArgs {
            config: None,
            simfile: None,
            log_dir: None,
            log_level: None,
        };
        assert_eq!(simfile_path(&cli), PathBuf::from("simfile.json"));
    }
}
