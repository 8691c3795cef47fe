//! `cylc-query`: a read-only HTTP surface over a scheduler's run
//! directory. It never talks to the scheduler process directly — there's
//! no shared memory across the process boundary — so it rebuilds a
//! `StateSummary` on a timer by re-reading `run.db`, the same snapshot
//! `engine::summary::build_summary` publishes in-process, and serves
//! whatever it last read. Structured the way `server/src/main.rs` wires
//! its background tasks around a shutdown broadcast channel, trimmed
//! from "cleanup + WAL checkpoint + reconfigure + health-monitor" down to
//! the one poll loop this surface needs.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod api;
mod config;
mod database;

use common::summary::{RunStatus, StateSummary, TaskSummary};
use config::ConfigManager;
use database::QueryDatabase;

#[derive(Parser, Debug)]
#[command(name = "cylc-query", about = "Read-only HTTP surface over a scheduler's run directory", long_about = None)]
struct CliArgs {
    /// Path to the scheduler's run directory (the one passed to `cylc-scheduler`).
    run_dir: PathBuf,

    /// Optional path to a `query.toml`; defaults to `<run_dir>/query.toml` if present.
    #[arg(long = "config")]
    config_file: Option<PathBuf>,

    /// Override the listen address from config.
    #[arg(long = "listen-address")]
    listen_address: Option<String>,
}

/// Reads every `(name, cycle_point)`'s latest row and turns it into a
/// `StateSummary`. Family rollups are left empty: family membership lives
/// in the workflow's task-definition graph, which this process doesn't
/// parse, so there's nothing it could honestly roll up.
fn build_summary_from_db(db: &QueryDatabase, cycling_mode: &str) -> Result<StateSummary> {
    let rows = db.latest_task_states()?;
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    let mut max_point: Option<String> = None;
    let mut tasks = Vec::with_capacity(rows.len());

    for row in rows {
        *histogram.entry(row.state.clone()).or_insert(0) += 1;
        max_point = Some(match max_point {
            Some(m) if m >= row.cycle_point => m,
            _ => row.cycle_point.clone(),
        });
        tasks.push(TaskSummary {
            name: row.name,
            point: row.cycle_point,
            state: row.state,
            submit_num: row.submit_num,
            host: row.host,
            job_id: row.job_id,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            mean_elapsed_seconds: None,
        });
    }

    Ok(StateSummary {
        cycling_mode: cycling_mode.to_string(),
        min_active_point: None,
        max_active_point: max_point,
        runahead_bound: None,
        status: RunStatus::Running,
        states_histogram: histogram,
        tasks,
        families: Vec::new(),
    })
}

/// Best-effort: read `workflow.toml` just for the cycling mode label. A
/// missing or unparseable file degrades the summary's `cycling_mode`
/// field to `"unknown"` rather than failing the whole process — this
/// surface's job is to serve whatever it can about a live run, not to
/// validate the workflow's configuration.
fn read_cycling_mode(run_dir: &std::path::Path) -> String {
    let path = run_dir.join("workflow.toml");
    match std::fs::read_to_string(&path).ok().and_then(|text| common::config::EngineConfig::from_toml_str(&text).ok()) {
        Some(config) => format!("{:?}", config.scheduling.cycling_mode()).to_lowercase(),
        None => {
            warn!("could not read cycling mode from {}, defaulting to 'unknown'", path.display());
            "unknown".to_string()
        }
    }
}

async fn poll_loop(db: std::sync::Arc<QueryDatabase>, cycling_mode: String, tx: watch::Sender<StateSummary>, interval: Duration, mut shutdown_rx: tokio::sync::broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match build_summary_from_db(&db, &cycling_mode) {
                    Ok(summary) => {
                        if tx.send(summary).is_err() {
                            info!("all summary receivers dropped, stopping poll loop");
                            return;
                        }
                    }
                    Err(e) => warn!("failed to rebuild summary from run database: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("poll loop received shutdown signal");
                return;
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                info!("received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "query.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("query=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).json().with_current_span(false).with_span_list(false).with_writer(non_blocking).init();

    let cli_args = CliArgs::parse();
    info!(run_dir = %cli_args.run_dir.display(), "cylc-query starting up");

    let config_path = cli_args.config_file.clone().unwrap_or_else(|| cli_args.run_dir.join("query.toml"));
    let mut manager = match ConfigManager::new(config_path) {
        Ok(m) => m,
        Err(e) => {
            error!("failed to load query configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(addr) = cli_args.listen_address {
        manager.config.listen_address = addr;
    }
    if let Err(e) = manager.config.validate() {
        error!("invalid query configuration: {}", e);
        std::process::exit(1);
    }

    let listen_address: std::net::SocketAddr = manager.config.listen_address.parse().context("invalid listen address")?;
    let service_dir = cli_args.run_dir.join(".service");
    let cycling_mode = read_cycling_mode(&cli_args.run_dir);
    let database = std::sync::Arc::new(QueryDatabase::new(&service_dir));

    let initial = build_summary_from_db(&database, &cycling_mode).unwrap_or_else(|e| {
        warn!("run database not readable yet ({}), starting with an empty summary", e);
        StateSummary::empty(cycling_mode.clone())
    });
    let (summary_tx, summary_rx) = watch::channel(initial);

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let poll_task = tokio::spawn(poll_loop(
        std::sync::Arc::clone(&database),
        cycling_mode,
        summary_tx,
        Duration::from_secs(manager.config.poll_interval_seconds),
        shutdown_rx,
    ));

    let app_state = api::AppState::new(summary_rx, std::sync::Arc::clone(&database), manager.config.api_key.clone());
    let app = api::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind to {listen_address}"))?;
    info!("serving scheduler snapshot on {}", listen_address);

    let shutdown_tx_for_server = shutdown_tx.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx_for_server.send(());
        })
        .await;
    if let Err(e) = result {
        error!("HTTP server error: {}", e);
    }

    let _ = poll_task.await;
    info!("cylc-query shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_built_from_empty_database_rows_has_no_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let db = QueryDatabase::new(dir.path());
        // No run.db exists yet; build_summary_from_db should surface the
        // error rather than panicking, same as main()'s fallback path.
        assert!(build_summary_from_db(&db, "integer").is_err());
    }
}
