//! The scheduler daemon's entry point: parses `workflow.toml`, builds the
//! task-definition registry and dependency graph, brings up the run
//! directory and persistence layer, and drives `Scheduler::run()` to
//! completion. Generalises `agent/src/main.rs`'s `Agent::new`/`run`/
//! `shutdown` lifecycle and signal-handling pattern from the monitoring
//! agent to the workflow scheduler.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::error::Error as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod commands;
mod config;
mod context;
mod database;
mod error;
mod jobrunner;
mod messages;
mod pool;
mod rundir;
mod scheduler;
mod state;
mod subprocess;
mod summary;
mod taskproxy;
mod xtrigger;

#[cfg(test)]
mod tests;

use commands::StopMode;
use config::ConfigManager;
use context::SchedulerContext;
use database::RunDatabase;
use rundir::{ContactFile, RunDir};
use scheduler::{Scheduler, SchedulerEvent};

const CONTACT_API_VERSION: u32 = 1;

/// Command-line arguments for the scheduler daemon.
#[derive(Parser, Debug)]
#[command(name = "cylc-scheduler")]
#[command(about = "Cycling workflow scheduler daemon", long_about = None)]
struct CliArgs {
    /// Run directory, containing `workflow.toml` and holding `log/`,
    /// `share/`, and `.service/` once the scheduler starts.
    #[arg(value_name = "RUN_DIR")]
    run_dir: PathBuf,

    /// Workflow name reported in logs and the contact file. Defaults to the
    /// run directory's final path component.
    #[arg(long = "name", value_name = "NAME")]
    suite_name: Option<String>,

    /// Scheduler tick interval in seconds.
    #[arg(long = "tick-seconds", value_name = "SECS", default_value_t = 1)]
    tick_seconds: u64,
}

fn build_task_registry_and_graph(
    config: &common::config::EngineConfig,
) -> Result<(common::taskdef::TaskDefRegistry, common::graph::DependencyGraph)> {
    let mut graph = common::graph::DependencyGraph::new();
    for (sequence_spec, body) in &config.scheduling.graphs {
        graph.add_section(body, sequence_spec).with_context(|| format!("invalid graph section '{}'", sequence_spec))?;
    }

    let mut defs = common::taskdef::TaskDefRegistry::new();
    for name in graph.all_task_names() {
        let ns = config.runtime.get(&name).cloned().unwrap_or_default();
        let mut def = common::taskdef::TaskDef::new(name.clone());
        def.sequence_specs = graph.sequence_specs_for(&name).into_iter().map(String::from).collect();
        def.custom_outputs = ns.outputs.clone();
        def.execution_retry_delays = parse_retry_delays(&ns.execution_retry_delays);
        def.submission_retry_delays = parse_retry_delays(&ns.submission_retry_delays);
        def.expiration_offset = ns.expire_offset.clone();
        defs.insert(def);
    }
    Ok((defs, graph))
}

fn parse_retry_delays(delays: &[String]) -> Vec<Duration> {
    delays
        .iter()
        .filter_map(|d| common::cycling::Interval::parse_iso(d).ok())
        .map(|iv| Duration::from_secs_f64(iv.approx_seconds().abs()))
        .collect()
}

async fn build_scheduler(run_dir: PathBuf, suite_name: String, tick: Duration) -> Result<(Scheduler, tokio::sync::watch::Receiver<summary::StateSummary>, tokio::sync::mpsc::Sender<SchedulerEvent>, RunDir)> {
    let mut config_manager = ConfigManager::new(run_dir.clone())?;
    config_manager.load_config().await?;
    let config = config_manager.config.clone().expect("configuration loaded");

    let (defs, graph) = build_task_registry_and_graph(&config)?;
    let cycling_mode = config.scheduling.cycling_mode();
    let initial_point = common::cycling::CyclePoint::parse(&config.scheduling.initial_cycle_point, cycling_mode)?;
    let final_cycle_point = config.scheduling.final_cycle_point.as_ref().and_then(|s| common::cycling::CyclePoint::parse(s, cycling_mode).ok());

    let rundir = RunDir::new(&run_dir);
    rundir.ensure_layout()?;

    let database = RunDatabase::new(rundir.service_dir(), config.cylc.database_busy_timeout_seconds)?;
    let mut ctx = SchedulerContext::new(config.clone(), defs, database, suite_name.clone())?;

    // `graph` built above is re-derived inside `SchedulerContext::new` from
    // the same config, but sequence registration happens here since it
    // needs the already-parsed task names.
    let _ = &graph;
    for name in ctx.defs.names().map(str::to_string).collect::<Vec<_>>() {
        let Some(def) = ctx.defs.get(&name) else { continue };
        let sequences: Vec<common::cycling::Sequence> = def
            .sequence_specs
            .iter()
            .filter_map(|spec| common::cycling::Sequence::parse(spec, cycling_mode, Some(&initial_point), final_cycle_point.as_ref()).ok())
            .collect();
        ctx.pool.register_sequences(&name, sequences);
    }

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(config.cylc.channel_buffer_size);
    let (scheduler, summary_rx) = Scheduler::new(ctx, inbound_rx, tick);
    Ok((scheduler, summary_rx, inbound_tx, rundir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./log/scheduler", "scheduler.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("engine=info,common=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    let suite_name = cli_args
        .suite_name
        .clone()
        .or_else(|| cli_args.run_dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "workflow".to_string());

    info!(suite_name = %suite_name, run_dir = %cli_args.run_dir.display(), "starting scheduler");

    let (mut scheduler, _summary_rx, inbound_tx, rundir) =
        match build_scheduler(cli_args.run_dir.clone(), suite_name.clone(), Duration::from_secs(cli_args.tick_seconds)).await {
            Ok(built) => built,
            Err(e) => {
                error!("fatal error bringing up scheduler: {}", e);
                let mut source = e.source();
                while let Some(err) = source {
                    error!("  caused by: {}", err);
                    source = err.source();
                }
                std::process::exit(1);
            }
        };

    let contact = ContactFile::new("localhost", 0, CONTACT_API_VERSION);
    if let Err(e) = rundir.write_contact_file(&contact) {
        error!("failed to write contact file: {}", e);
        std::process::exit(1);
    }

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).unwrap();
            let mut sigint = signal(SignalKind::interrupt()).unwrap();
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.unwrap();
            info!("received Ctrl+C");
        }
    };

    let run_handle = tokio::spawn(async move {
        let result = scheduler.run().await;
        (result, scheduler.stalled_abort())
    });

    tokio::pin!(run_handle);
    tokio::select! {
        _ = &mut run_handle => {}
        _ = shutdown_signal => {
            info!("shutdown signal received, requesting clean stop");
            let _ = inbound_tx.send(SchedulerEvent::Command(commands::Command::Stop { mode: StopMode::Clean })).await;
        }
    }

    let exit_code = match run_handle.await {
        Ok((Ok(()), true)) => {
            warn!("scheduler stopped: stall-triggered abort");
            2
        }
        Ok((Ok(()), false)) => {
            info!("scheduler stopped cleanly");
            0
        }
        Ok((Err(e), _)) => {
            error!("scheduler error: {}", e);
            1
        }
        Err(e) => {
            error!("scheduler task panicked: {}", e);
            1
        }
    };

    rundir.remove_contact_file().ok();
    info!("scheduler shutdown complete");
    std::process::exit(exit_code);
}
