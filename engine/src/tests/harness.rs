//! Shared scaffolding for the integration tests in this directory: build a
//! fully wired `Scheduler` from a `workflow.toml` string, with its database
//! in a throwaway directory and the `simulation` job runner standing in for
//! a real batch system. Mirrors `build_scheduler` in `main.rs`, minus the
//! run-directory/contact-file bookkeeping a test has no use for.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use common::config::EngineConfig;
use common::cycling::{CyclePoint, Sequence};

use crate::context::SchedulerContext;
use crate::database::RunDatabase;
use crate::scheduler::{Scheduler, SchedulerEvent};
use crate::summary::StateSummary;

pub fn build_test_scheduler(
    toml: &str,
) -> (Scheduler, watch::Receiver<StateSummary>, mpsc::Sender<SchedulerEvent>, tempfile::TempDir) {
    let config = EngineConfig::from_toml_str(toml).expect("valid test workflow.toml");
    let (defs, _graph) = crate::build_task_registry_and_graph(&config).expect("valid graph sections");

    let cycling_mode = config.scheduling.cycling_mode();
    let initial_point = CyclePoint::parse(&config.scheduling.initial_cycle_point, cycling_mode).expect("valid initial point");
    let final_cycle_point = config
        .scheduling
        .final_cycle_point
        .as_ref()
        .and_then(|s| CyclePoint::parse(s, cycling_mode).ok());

    let dir = tempfile::tempdir().expect("tempdir");
    let database = RunDatabase::new(dir.path(), 5).expect("run database");
    let mut ctx = SchedulerContext::new(config, defs, database, "test-suite").expect("scheduler context");

    for name in ctx.defs.names().map(str::to_string).collect::<Vec<_>>() {
        let Some(def) = ctx.defs.get(&name) else { continue };
        let sequences: Vec<Sequence> = def
            .sequence_specs
            .iter()
            .filter_map(|spec| Sequence::parse(spec, cycling_mode, Some(&initial_point), final_cycle_point.as_ref()).ok())
            .collect();
        ctx.pool.register_sequences(&name, sequences);
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (scheduler, summary_rx) = Scheduler::new(ctx, inbound_rx, Duration::from_millis(10));
    (scheduler, summary_rx, inbound_tx, dir)
}
