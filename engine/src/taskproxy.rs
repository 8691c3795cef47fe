//! `TaskProxy`: one active task instance in the pool. Generalises the
//! agent's `TaskHandle` (name + config + running flag) into the richer
//! per-instance record a cycling scheduler needs: state, prerequisites,
//! outputs, xtrigger satisfaction, submit bookkeeping and timing history.

use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use common::cycling::CyclePoint;
use common::prerequisite::Prerequisite;

use crate::error::StateTransitionError;
use crate::state::{self, Event, HeldFrom, TaskState};

/// Recent-runtime history is capped at 10 entries, per the elapsed-time
/// deque described for mean-runtime reporting.
const ELAPSED_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId {
    pub name: String,
    pub point: CyclePoint,
}

impl TaskId {
    pub fn new(name: impl Into<String>, point: CyclePoint) -> Self {
        TaskId { name: name.into(), point }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.name, self.point)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobHostInfo {
    pub host: Option<String>,
    pub batch_sys_job_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TimingRecord {
    pub submitted_at: Option<SystemTime>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

pub struct TaskProxy {
    pub id: TaskId,
    pub state: TaskState,
    pub held_from: Option<HeldFrom>,
    pub prerequisites: Vec<Prerequisite>,
    /// Materialised `=> !task` expressions (§4.2). Satisfying any one of
    /// these removes the proxy from the pool without running it, instead of
    /// contributing to [`Self::is_ready_to_queue`].
    pub suicide_triggers: Vec<Prerequisite>,
    pub outputs: common::prerequisite::TaskOutputs,
    pub xtriggers: BTreeMap<String, bool>,
    pub clock_trigger: Option<(String, bool)>,
    pub submit_num: u32,
    pub job_host: JobHostInfo,
    pub timing: TimingRecord,
    pub elapsed_seconds: VecDeque<f64>,
    pub execution_retry_delays: Vec<common::cycling::Interval>,
    pub submission_retry_delays: Vec<common::cycling::Interval>,
}

impl TaskProxy {
    pub fn new(
        id: TaskId,
        prerequisites: Vec<Prerequisite>,
        custom_outputs: &[String],
        execution_retry_delays: Vec<common::cycling::Interval>,
        submission_retry_delays: Vec<common::cycling::Interval>,
    ) -> Self {
        TaskProxy {
            id,
            state: TaskState::Waiting,
            held_from: None,
            prerequisites,
            suicide_triggers: Vec::new(),
            outputs: common::prerequisite::TaskOutputs::new(custom_outputs),
            xtriggers: BTreeMap::new(),
            clock_trigger: None,
            submit_num: 0,
            job_host: JobHostInfo::default(),
            timing: TimingRecord::default(),
            elapsed_seconds: VecDeque::with_capacity(ELAPSED_HISTORY_LEN),
            execution_retry_delays,
            submission_retry_delays,
        }
    }

    /// All prerequisites (and any declared xtriggers/clock-trigger) are
    /// satisfied.
    pub fn is_ready_to_queue(&self) -> bool {
        self.prerequisites.iter().all(|p| p.is_satisfied())
            && self.xtriggers.values().all(|&satisfied| satisfied)
            && self.clock_trigger.as_ref().map(|(_, sat)| *sat).unwrap_or(true)
    }

    /// Attach this instance's materialised suicide-trigger expressions,
    /// built by the caller from the dependency graph at spawn time.
    pub fn with_suicide_triggers(mut self, suicide_triggers: Vec<Prerequisite>) -> Self {
        self.suicide_triggers = suicide_triggers;
        self
    }

    /// Any suicide trigger has fired: the caller should remove this proxy
    /// from the pool instead of letting it run.
    pub fn should_suicide(&self) -> bool {
        self.suicide_triggers.iter().any(|p| p.is_satisfied())
    }

    /// Record that an upstream task reached `output` at its cycle point,
    /// updating every prerequisite (and suicide-trigger) atom that
    /// references it.
    pub fn satisfy_prerequisite(&mut self, upstream_task_id: &str, output: &str) {
        for prereq in &mut self.prerequisites {
            prereq.satisfy_output(upstream_task_id, output);
        }
        for prereq in &mut self.suicide_triggers {
            prereq.satisfy_output(upstream_task_id, output);
        }
    }

    pub fn satisfy_xtrigger(&mut self, label: &str) {
        if let Some(sat) = self.xtriggers.get_mut(label) {
            *sat = true;
        }
    }

    /// Apply a state-machine event, guarding against regressions on
    /// terminal/already-active states (the idempotency rule from §4.5:
    /// "receiving the same message twice does not double-advance state").
    pub fn apply_event(&mut self, event: Event) -> Result<(), StateTransitionError> {
        if self.state.is_final() && !matches!(event, Event::Hold | Event::Release) {
            return Ok(());
        }
        let next = state::transition(self.state, &event, self.held_from)?;
        if let Event::Hold = event {
            self.held_from = match self.state {
                TaskState::Queued => Some(HeldFrom::Queued),
                _ => Some(HeldFrom::Waiting),
            };
        }
        self.state = next;
        Ok(())
    }

    /// Reset outputs and prerequisite-satisfied flags that were set in the
    /// submit now ending, in preparation for a retry. Satisfied outputs are
    /// monotonic within one submit only (per the invariant in §3).
    pub fn begin_new_submit(&mut self) {
        self.submit_num += 1;
        self.outputs.reset();
        self.timing = TimingRecord::default();
    }

    pub fn record_finish(&mut self, success: bool) {
        self.timing.finished_at = Some(SystemTime::now());
        if let (Some(start), Some(finish)) = (self.timing.started_at, self.timing.finished_at) {
            if let Ok(elapsed) = finish.duration_since(start) {
                if self.elapsed_seconds.len() == ELAPSED_HISTORY_LEN {
                    self.elapsed_seconds.pop_front();
                }
                self.elapsed_seconds.push_back(elapsed.as_secs_f64());
            }
        }
        let output = if success { "succeeded" } else { "failed" };
        self.outputs.set_completed(output);
    }

    pub fn mean_elapsed_seconds(&self) -> Option<f64> {
        if self.elapsed_seconds.is_empty() {
            None
        } else {
            Some(self.elapsed_seconds.iter().sum::<f64>() / self.elapsed_seconds.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cycling::{CyclePoint, CyclingMode};

    fn point(s: &str) -> CyclePoint {
        CyclePoint::parse(s, CyclingMode::Integer).unwrap()
    }

    #[test]
    fn ready_to_queue_requires_all_prerequisites() {
        let mut proxy = TaskProxy::new(TaskId::new("foo", point("1")), vec![], &[], vec![], vec![]);
        assert!(proxy.is_ready_to_queue());
        proxy.xtriggers.insert("clock".to_string(), false);
        assert!(!proxy.is_ready_to_queue());
        proxy.satisfy_xtrigger("clock");
        assert!(proxy.is_ready_to_queue());
    }

    #[test]
    fn duplicate_success_event_is_a_no_op() {
        let mut proxy = TaskProxy::new(TaskId::new("foo", point("1")), vec![], &[], vec![], vec![]);
        for ev in [
            Event::ReadyToRun,
            Event::QueueAdmitted,
            Event::SubmitAccepted,
            Event::Started,
            Event::Succeeded,
        ] {
            proxy.apply_event(ev).unwrap();
        }
        assert_eq!(proxy.state, TaskState::Succeeded);
        proxy.apply_event(Event::Succeeded).unwrap();
        assert_eq!(proxy.state, TaskState::Succeeded);
    }

    #[test]
    fn hold_then_release_restores_queued() {
        let mut proxy = TaskProxy::new(TaskId::new("foo", point("1")), vec![], &[], vec![], vec![]);
        proxy.apply_event(Event::ReadyToRun).unwrap();
        assert_eq!(proxy.state, TaskState::Queued);
        proxy.apply_event(Event::Hold).unwrap();
        assert_eq!(proxy.state, TaskState::Held);
        proxy.apply_event(Event::Release).unwrap();
        assert_eq!(proxy.state, TaskState::Queued);
    }

    #[test]
    fn suicide_trigger_fires_independently_of_normal_prerequisites() {
        use common::prerequisite::{Atom, Expr, Prerequisite};

        let mut proxy = TaskProxy::new(TaskId::new("bar", point("3")), vec![], &[], vec![], vec![])
            .with_suicide_triggers(vec![Prerequisite::new(Expr::Atom(Atom {
                task_id: "c.3".to_string(),
                output: "failed".to_string(),
            }))]);
        assert!(proxy.is_ready_to_queue());
        assert!(!proxy.should_suicide());
        proxy.satisfy_prerequisite("c.3", "failed");
        assert!(proxy.should_suicide());
    }

    #[test]
    fn elapsed_history_caps_at_ten() {
        let mut proxy = TaskProxy::new(TaskId::new("foo", point("1")), vec![], &[], vec![], vec![]);
        for _ in 0..15 {
            proxy.timing.started_at = Some(SystemTime::now());
            proxy.record_finish(true);
        }
        assert!(proxy.elapsed_seconds.len() <= ELAPSED_HISTORY_LEN);
    }
}
