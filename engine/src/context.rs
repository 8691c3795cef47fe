//! `SchedulerContext`: the bundle of owned, unshared components the event
//! loop drives each tick. Global mutable state is replaced by passing this
//! through components rather than reaching for statics; only the
//! persistence connection and the subprocess pool are shared with spawned
//! tokio tasks, and only via channels (§9).

use std::collections::HashMap;

use common::broadcast::BroadcastStore;
use common::config::EngineConfig;
use common::cycling::{CyclePoint, CyclingMode, Interval, IsoDuration};
use common::graph::{DependencyGraph, TaskTrigger, TriggerExpr};
use common::taskdef::TaskDefRegistry;

use crate::database::RunDatabase;
use crate::jobrunner::JobRunner;
use crate::pool::TaskPool;
use crate::subprocess::SubprocessPool;
use crate::taskproxy::TaskProxy;
use crate::xtrigger::XTriggerManager;

pub struct SchedulerContext {
    pub config: EngineConfig,
    pub cycling_mode: CyclingMode,
    pub initial_point: CyclePoint,
    pub defs: TaskDefRegistry,
    pub graph: DependencyGraph,
    pub pool: TaskPool,
    pub broadcast: BroadcastStore,
    pub xtriggers: XTriggerManager,
    pub subprocess_pool: SubprocessPool,
    pub job_runner: Box<dyn JobRunner>,
    pub database: RunDatabase,
    pub suite_name: String,
    pub stop_requested: bool,
    /// Per-upstream-task cleanup reach: `None` means some downstream
    /// dependency references it unboundedly (retain forever); `Some(iv)`
    /// is the furthest-forward intercycle offset any dependent uses.
    /// Tasks absent from this map have no downstream dependent and are
    /// eligible for cleanup as soon as they're terminal and behind the
    /// pool's minimum active point.
    cleanup_offsets: HashMap<String, Option<Interval>>,
}

impl SchedulerContext {
    pub fn new(
        config: EngineConfig,
        defs: TaskDefRegistry,
        database: RunDatabase,
        suite_name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let cycling_mode = config.scheduling.cycling_mode();
        let initial_point = CyclePoint::parse(&config.scheduling.initial_cycle_point, cycling_mode)?;
        let runahead_limit = resolve_runahead_limit(&config.scheduling.runahead_limit, cycling_mode);
        let final_cycle_point = config
            .scheduling
            .final_cycle_point
            .as_ref()
            .and_then(|s| CyclePoint::parse(s, cycling_mode).ok());
        let job_runner = crate::jobrunner::resolve_runner(&config.cylc.job_runner)?;
        let suite_name = suite_name.into();

        let mut graph = DependencyGraph::new();
        for (sequence_spec, body) in &config.scheduling.graphs {
            graph.add_section(body, sequence_spec)?;
        }
        let cleanup_offsets = compute_cleanup_offsets(&graph, defs.names(), cycling_mode);

        Ok(SchedulerContext {
            pool: TaskPool::new(runahead_limit, final_cycle_point),
            broadcast: BroadcastStore::new(),
            xtriggers: XTriggerManager::new(suite_name.clone()),
            subprocess_pool: SubprocessPool::new(config.cylc.subprocess_pool_size, config.cylc.channel_buffer_size),
            job_runner,
            database,
            suite_name,
            stop_requested: false,
            cycling_mode,
            initial_point,
            graph,
            cleanup_offsets,
            defs,
            config,
        })
    }

    /// Spawn successors for every newly-submitted/running proxy, with
    /// prerequisites materialised from the dependency graph.
    pub fn spawn_successors(&mut self) {
        self.pool.spawn_successors(&self.defs, &self.graph, self.cycling_mode, &self.initial_point);
    }

    /// The cutoff cycle point past which a terminal proxy of this task may
    /// be dropped, per §4.8's intercycle-offset rule.
    pub fn cleanup_cutoff_for(&self, proxy: &TaskProxy) -> Option<CyclePoint> {
        match self.cleanup_offsets.get(&proxy.id.name) {
            None => Some(proxy.id.point),
            Some(None) => None,
            Some(Some(reach)) => proxy.id.point.add(reach).ok(),
        }
    }
}

/// An absolute interval (`"PT6H"`, `"P2D"`, or a bare integer under integer
/// cycling). The "multiple of the shortest sequence interval" policy form
/// (`"P3"`) is accepted as a literal count of cycles under integer cycling
/// and otherwise falls back to zero, since no sequence-interval registry is
/// threaded in at this point.
fn resolve_runahead_limit(policy: &str, mode: CyclingMode) -> Interval {
    match mode {
        CyclingMode::Iso8601 => Interval::parse_iso(policy).unwrap_or(Interval::Iso(IsoDuration::default())),
        CyclingMode::Integer => policy
            .trim_start_matches('P')
            .parse::<i64>()
            .map(Interval::Int)
            .unwrap_or(Interval::Int(0)),
    }
}

fn compute_cleanup_offsets(
    graph: &DependencyGraph,
    task_names: impl Iterator<Item = impl AsRef<str>>,
    mode: CyclingMode,
) -> HashMap<String, Option<Interval>> {
    let mut offsets: HashMap<String, Option<Interval>> = HashMap::new();
    for downstream in task_names {
        for dep in graph.dependencies_for(downstream.as_ref()) {
            let mut triggers = Vec::new();
            collect_triggers(&dep.lhs, &mut triggers);
            for t in triggers {
                if t.absolute {
                    offsets.insert(t.task_name.clone(), None);
                    continue;
                }
                let reach = match &t.offset {
                    None => Some(match mode {
                        CyclingMode::Iso8601 => Interval::Iso(IsoDuration::default()),
                        CyclingMode::Integer => Interval::Int(0),
                    }),
                    Some(offset_str) => parse_offset_interval(offset_str, mode).map(|iv| iv.negate()),
                };
                match (offsets.get(&t.task_name).cloned(), reach) {
                    (Some(None), _) => {} // already unbounded
                    (_, None) => {
                        offsets.insert(t.task_name.clone(), None);
                    }
                    (Some(Some(existing)), Some(candidate)) => {
                        if candidate.approx_seconds() > existing.approx_seconds() {
                            offsets.insert(t.task_name.clone(), Some(candidate));
                        }
                    }
                    (None, Some(candidate)) => {
                        offsets.insert(t.task_name.clone(), Some(candidate));
                    }
                }
            }
        }
    }
    offsets
}

fn collect_triggers(expr: &TriggerExpr, out: &mut Vec<TaskTrigger>) {
    match expr {
        TriggerExpr::Trigger(t) => out.push(t.clone()),
        TriggerExpr::XTrigger(_) => {}
        TriggerExpr::Not(inner) => collect_triggers(inner, out),
        TriggerExpr::And(parts) | TriggerExpr::Or(parts) => {
            for p in parts {
                collect_triggers(p, out);
            }
        }
    }
}

fn parse_offset_interval(offset: &str, mode: CyclingMode) -> Option<Interval> {
    match mode {
        CyclingMode::Iso8601 => Interval::parse_iso(offset).ok(),
        CyclingMode::Integer => {
            let negative = offset.starts_with('-');
            let digits = offset.trim_start_matches('-').trim_start_matches('P');
            digits.parse::<i64>().ok().map(|n| Interval::Int(if negative { -n } else { n }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreferenced_task_has_no_cleanup_offset_entry() {
        let graph = DependencyGraph::new();
        let offsets = compute_cleanup_offsets(&graph, std::iter::empty::<&str>(), CyclingMode::Integer);
        assert!(offsets.is_empty());
    }

    #[test]
    fn same_cycle_reference_yields_zero_reach() {
        let mut graph = DependencyGraph::new();
        graph.add_section("foo => bar", "R1").unwrap();
        let offsets = compute_cleanup_offsets(&graph, ["bar"].into_iter(), CyclingMode::Integer);
        assert_eq!(offsets.get("foo"), Some(&Some(Interval::Int(0))));
    }

    #[test]
    fn absolute_reference_is_unbounded() {
        let mut graph = DependencyGraph::new();
        graph.add_section("foo[^] => bar", "R1").unwrap();
        let offsets = compute_cleanup_offsets(&graph, ["bar"].into_iter(), CyclingMode::Integer);
        assert_eq!(offsets.get("foo"), Some(&None));
    }

    #[test]
    fn offset_reference_computes_positive_reach() {
        let mut graph = DependencyGraph::new();
        graph.add_section("foo[-P1] => bar", "R1").unwrap();
        let offsets = compute_cleanup_offsets(&graph, ["bar"].into_iter(), CyclingMode::Integer);
        assert_eq!(offsets.get("foo"), Some(&Some(Interval::Int(1))));
    }
}
