//! The set of active task instances. Generalises `agent/src/scheduler.rs`'s
//! `running_tasks: HashMap<String, TaskHandle>` plus ticker-task pattern
//! into a `HashMap<(name, point), TaskProxy>` with no per-task ticker —
//! the event loop re-evaluates readiness every tick instead.

use std::collections::HashMap;

use common::cycling::{CyclePoint, CyclingMode, Interval, Sequence};
use common::graph::DependencyGraph;
use common::prerequisite::Prerequisite;
use common::taskdef::TaskDefRegistry;

use crate::state::TaskState;
use crate::taskproxy::{TaskId, TaskProxy};

pub struct TaskPool {
    proxies: HashMap<(String, CyclePoint), TaskProxy>,
    /// One or more sequences per task name, used to compute successors and
    /// the runahead window.
    sequences: HashMap<String, Vec<Sequence>>,
    min_active_point: Option<CyclePoint>,
    runahead_limit: Interval,
    final_cycle_point: Option<CyclePoint>,
}

impl TaskPool {
    pub fn new(runahead_limit: Interval, final_cycle_point: Option<CyclePoint>) -> Self {
        TaskPool {
            proxies: HashMap::new(),
            sequences: HashMap::new(),
            min_active_point: None,
            runahead_limit,
            final_cycle_point,
        }
    }

    pub fn register_sequences(&mut self, task_name: &str, sequences: Vec<Sequence>) {
        self.sequences.insert(task_name.to_string(), sequences);
    }

    /// The earliest point on each of a task's registered sequences, used to
    /// seed the pool with its first instances at workflow startup.
    pub fn first_points(&self, task_name: &str) -> Vec<CyclePoint> {
        self.sequences
            .get(task_name)
            .map(|seqs| seqs.iter().filter_map(|s| s.first_point()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, name: &str, point: &CyclePoint) -> Option<&TaskProxy> {
        self.proxies.get(&(name.to_string(), *point))
    }

    pub fn get_mut(&mut self, name: &str, point: &CyclePoint) -> Option<&mut TaskProxy> {
        self.proxies.get_mut(&(name.to_string(), *point))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskProxy> {
        self.proxies.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskProxy> {
        self.proxies.values_mut()
    }

    /// Insert a proxy. Invariant: a proxy exists only if its point lies on
    /// at least one of its task's sequences — callers (`spawn_successors`,
    /// `insert` command handler) are expected to have checked `on_sequence`
    /// before calling this.
    pub fn insert(&mut self, proxy: TaskProxy) {
        let key = (proxy.id.name.clone(), proxy.id.point);
        self.proxies.insert(key, proxy);
        self.recompute_min_active_point();
    }

    pub fn remove(&mut self, name: &str, point: &CyclePoint) -> Option<TaskProxy> {
        let removed = self.proxies.remove(&(name.to_string(), *point));
        self.recompute_min_active_point();
        removed
    }

    /// The runahead window bound: `min_active_point + runahead_limit`. A
    /// candidate point beyond this bound must wait in `runahead`.
    pub fn runahead_bound(&self) -> Option<CyclePoint> {
        self.min_active_point.and_then(|p| p.add(&self.runahead_limit).ok())
    }

    fn recompute_min_active_point(&mut self) {
        let candidate = self
            .proxies
            .values()
            .filter(|p| !p.state.is_final())
            .map(|p| p.id.point)
            .min();
        // Monotone non-decreasing, per the invariant in §3 (modulo reload,
        // which is out of scope for this in-memory recompute).
        if let Some(c) = candidate {
            self.min_active_point = Some(match self.min_active_point {
                Some(prev) if prev > c => prev,
                _ => c,
            });
        }
    }

    pub fn min_active_point(&self) -> Option<CyclePoint> {
        self.min_active_point
    }

    /// For each sequence of each existing proxy's task, compute the next
    /// point and spawn a successor proxy (in `waiting` or `runahead`
    /// depending on the window) if one does not already exist. Prerequisites
    /// for the new proxy are materialised from `graph` at the new point, so
    /// it starts with every atom it will ever need to watch for, per §4.8.
    pub fn spawn_successors(
        &mut self,
        defs: &TaskDefRegistry,
        graph: &DependencyGraph,
        mode: CyclingMode,
        initial_point: &CyclePoint,
    ) {
        let mut to_spawn = Vec::new();
        for proxy in self.proxies.values() {
            if proxy.state != TaskState::Submitted && proxy.state != TaskState::Running {
                continue;
            }
            if let Some(sequences) = self.sequences.get(&proxy.id.name) {
                for seq in sequences {
                    if let Some(next) = seq.next(&proxy.id.point) {
                        if let Some(end) = self.final_cycle_point {
                            if next > end {
                                continue;
                            }
                        }
                        if !self.proxies.contains_key(&(proxy.id.name.clone(), next)) {
                            to_spawn.push((proxy.id.name.clone(), next));
                        }
                    }
                }
            }
        }

        for (name, point) in to_spawn {
            let Some(def) = defs.get(&name) else { continue };
            let beyond_runahead = self.runahead_bound().map(|bound| point > bound).unwrap_or(false);
            let execution_retry_delays = def
                .execution_retry_delays
                .iter()
                .filter_map(|d| Interval::parse_iso(&format!("PT{}S", d.as_secs())).ok())
                .collect();
            let prerequisites = graph
                .materialise_for(&name, &point, mode, initial_point)
                .map(|exprs| exprs.into_iter().map(Prerequisite::new).collect())
                .unwrap_or_default();
            let suicide_triggers = graph
                .suicide_triggers_for(&name, &point, mode, initial_point)
                .map(|exprs| exprs.into_iter().map(Prerequisite::new).collect())
                .unwrap_or_default();
            let mut proxy = TaskProxy::new(
                TaskId::new(name.clone(), point),
                prerequisites,
                &def.custom_outputs,
                execution_retry_delays,
                Vec::new(),
            )
            .with_suicide_triggers(suicide_triggers);
            if beyond_runahead {
                proxy.state = TaskState::Runahead;
            }
            self.proxies.insert((name, point), proxy);
        }
        self.recompute_min_active_point();
    }

    /// Release any `runahead` proxies now within the window after the
    /// minimum active point has advanced.
    pub fn release_runahead(&mut self) {
        let bound = self.runahead_bound();
        for proxy in self.proxies.values_mut() {
            if proxy.state == TaskState::Runahead {
                if bound.map(|b| proxy.id.point <= b).unwrap_or(true) {
                    let _ = proxy.apply_event(crate::state::Event::RunaheadReleased);
                }
            }
        }
    }

    /// Drop terminal proxies whose cleanup cutoff has been passed by the
    /// pool's minimum active point. `cutoff_of` is supplied by the caller
    /// (computed from the dependency graph's intercycle offsets, §4.8); a
    /// `None` cutoff means "retain forever".
    pub fn cleanup_terminal(&mut self, cutoff_of: impl Fn(&TaskProxy) -> Option<CyclePoint>) {
        let min = match self.min_active_point {
            Some(m) => m,
            None => return,
        };
        let doomed: Vec<(String, CyclePoint)> = self
            .proxies
            .values()
            .filter(|p| p.state.is_final())
            .filter_map(|p| cutoff_of(p).map(|cutoff| (p, cutoff)))
            .filter(|(_, cutoff)| *cutoff < min)
            .map(|(p, _)| (p.id.name.clone(), p.id.point))
            .collect();
        for key in doomed {
            self.proxies.remove(&key);
        }
    }

    /// Stall iff every non-terminal proxy is `waiting`/`held`, each has an
    /// unsatisfied prerequisite, and no `running`/`submitted`/`ready`/
    /// `queued` proxy exists whose success could still satisfy one.
    pub fn is_stalled(&self) -> bool {
        let non_terminal: Vec<&TaskProxy> = self.proxies.values().filter(|p| !p.state.is_final()).collect();
        if non_terminal.is_empty() {
            return false;
        }
        let all_waiting_or_held = non_terminal
            .iter()
            .all(|p| matches!(p.state, TaskState::Waiting | TaskState::Held) && !p.prerequisites.iter().all(|pr| pr.is_satisfied()));
        if !all_waiting_or_held {
            return false;
        }
        let any_progressable = self
            .proxies
            .values()
            .any(|p| matches!(p.state, TaskState::Running | TaskState::Submitted | TaskState::Ready | TaskState::Queued));
        !any_progressable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cycling::CyclingMode;

    fn point(n: i64) -> CyclePoint {
        CyclePoint::parse(&n.to_string(), CyclingMode::Integer).unwrap()
    }

    fn make_proxy(name: &str, p: CyclePoint, state: TaskState) -> TaskProxy {
        let mut proxy = TaskProxy::new(TaskId::new(name, p), Vec::new(), &[], Vec::new(), Vec::new());
        proxy.state = state;
        proxy
    }

    #[test]
    fn min_active_point_tracks_lowest_non_terminal() {
        let mut pool = TaskPool::new(Interval::Int(2), None);
        pool.insert(make_proxy("foo", point(1), TaskState::Waiting));
        pool.insert(make_proxy("foo", point(2), TaskState::Running));
        assert_eq!(pool.min_active_point(), Some(point(1)));
    }

    #[test]
    fn min_active_point_is_monotone_after_removal() {
        let mut pool = TaskPool::new(Interval::Int(2), None);
        pool.insert(make_proxy("foo", point(1), TaskState::Waiting));
        pool.insert(make_proxy("foo", point(3), TaskState::Waiting));
        pool.remove("foo", &point(1));
        // Even though point(1) is gone, the min must not regress below the
        // highest value it previously reached artificially low, it simply
        // recomputes from what's left.
        assert_eq!(pool.min_active_point(), Some(point(3)));
    }

    #[test]
    fn empty_pool_never_stalls() {
        let pool = TaskPool::new(Interval::Int(2), None);
        assert!(!pool.is_stalled());
    }

    #[test]
    fn pool_with_runnable_progress_does_not_stall() {
        let mut pool = TaskPool::new(Interval::Int(2), None);
        pool.insert(make_proxy("foo", point(1), TaskState::Waiting));
        pool.insert(make_proxy("bar", point(1), TaskState::Running));
        assert!(!pool.is_stalled());
    }

    #[test]
    fn runahead_releases_when_within_bound() {
        let mut pool = TaskPool::new(Interval::Int(1), None);
        pool.insert(make_proxy("foo", point(1), TaskState::Running));
        pool.insert(make_proxy("foo", point(2), TaskState::Runahead));
        pool.release_runahead();
        assert_eq!(pool.get("foo", &point(2)).unwrap().state, TaskState::Waiting);
    }
}
